//! PLCI allocation, removal and the internal command sequencer
//!
//! A PLCI is one signaling leg. Multi step adapter interactions on a PLCI run as internal
//! commands: an active [CommandFn] with its current step in `internal_command`, and
//! further commands waiting behind it in a bounded FIFO. Each step function takes the
//! adapter return code of the previous step and either issues exactly one more adapter
//! request, leaving its next step recorded, or falls through with
//! [Adapter::next_internal_command].

use std::collections::VecDeque;

use crate::{
    appl::{ApplMask, ApplTable},
    capi::{Adapter, ncci::NcciTable},
    config::{B1Facilities, MAX_INTERNAL_COMMAND_LEVELS},
    message::{CapiHeader, Command, SubCommand},
    parse::ApiSave,
    queue::MsgInQueue,
    xdi::{Entity, Rc, Req},
};

use super::{
    bprot::BProtocol, dtmf::DtmfState, ec::EcState, fax::FaxState, manufacturer::Tel,
    mixer::LiState,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, strum_macros::Display)]
/// Signaling state of a PLCI
pub enum PlciState {
    /// Free, or allocated and not yet part of a call
    #[default]
    Idle,
    /// Adapter level listen entity waiting for incoming calls
    Listening,
    /// Outgoing call being set up
    OutgConPending,
    /// Incoming call offered to applications
    IncConPending,
    /// Incoming call alerting
    IncConAlert,
    /// Incoming call alerting with the B channel already through connected
    IncConConnectedAlert,
    /// Incoming call accepted, waiting for the network
    IncConAccept,
    /// Call active
    Connected,
    /// Local disconnect in progress
    OutgDisPending,
    /// Call cleared, waiting for DISCONNECT_RESP
    IncDisPending,
    /// Permanent connection without signaling being brought up
    LocalConnect,
    /// Suspend in progress
    Suspending,
    /// Resume in progress
    Resuming,
    /// Advanced voice PLCI without a call
    AdvVoiceNoSig,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, strum_macros::Display)]
/// Supplementary service sub state of a PLCI
pub enum SuppState {
    /// No service active
    #[default]
    Idle,
    /// Hold requested
    HoldRequest,
    /// Call on hold
    CallHeld,
    /// Retrieve requested
    RetrieveRequest,
    /// ECT or three party request in progress
    PtyRequest,
    /// Three party conference active
    Conference,
}

/// Where a request came from, which decides who consumes its completion
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Issued by the handler of the CAPI command owning the PLCI
    Command,
    /// Issued by an internal command step
    Internal,
    /// Issued on behalf of an indication or a teardown
    Unsolicited,
    /// Data path
    Data,
}

/// Transmit buffer handed to the adapter with an N_DATA
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TxBuffer {
    pub(crate) appl: u16,
    pub(crate) tx_ref: u32,
    pub(crate) handle: u16,
    pub(crate) flags: u16,
    pub(crate) number: u16,
}

/// A request waiting for, or in, the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingReq {
    pub(crate) entity: Entity,
    pub(crate) req: Req,
    pub(crate) ch: u8,
    pub(crate) ncci: u8,
    pub(crate) data: Vec<u8>,
    pub(crate) origin: Origin,
    pub(crate) tx: Option<TxBuffer>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) struct EntityState {
    pub(crate) id: u8,
    pub(crate) assigning: bool,
    pub(crate) removing: bool,
}

impl EntityState {
    /// Assigned or being assigned
    pub(crate) fn is_live(&self) -> bool {
        self.id != 0 || self.assigning
    }
}

/// Internal command functions
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display)]
pub(crate) enum CommandFn {
    SelectB,
    Dtmf,
    Ec,
    Mixer,
    MixerNotify,
    AdvVoice,
    FaxConnectAck,
    CodecWait,
}

/// A message parked until a prerequisite completes, then dispatched again
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpoofedMsg {
    pub(crate) appl: u16,
    pub(crate) header: CapiHeader,
    pub(crate) saved: ApiSave,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Plci {
    pub(crate) id: u8,
    pub(crate) state: PlciState,
    pub(crate) supp_state: SuppState,
    pub(crate) command: Option<(Command, SubCommand)>,
    /// Application and message number of `command`, for its confirmation
    pub(crate) cmd_appl: u16,
    pub(crate) number: u16,
    pub(crate) appl: Option<u16>,
    pub(crate) c_ind_mask: ApplMask,
    pub(crate) sig: EntityState,
    pub(crate) nl: EntityState,
    pub(crate) sig_none: bool,
    pub(crate) remove_pending: bool,
    pub(crate) release_after_b3: bool,
    pub(crate) req_ring: VecDeque<PendingReq>,
    pub(crate) in_flight: Option<PendingReq>,
    pub(crate) internal_command: u16,
    pub(crate) internal_command_queue: [Option<CommandFn>; MAX_INTERNAL_COMMAND_LEVELS],
    pub(crate) msg_in_queue: MsgInQueue,
    pub(crate) ncci_ring_list: u8,
    pub(crate) channels: u8,
    pub(crate) cip: u16,
    pub(crate) bprot: BProtocol,
    pub(crate) b1_facilities: B1Facilities,
    pub(crate) b1_prev: Option<B1Facilities>,
    pub(crate) related_pty: u8,
    pub(crate) tel: Tel,
    pub(crate) codec_for: u8,
    pub(crate) spoofed: Option<SpoofedMsg>,
    pub(crate) dtmf: DtmfState,
    pub(crate) ec: EcState,
    pub(crate) li: LiState,
    pub(crate) fax: FaxState,
}

impl Plci {
    /// Request in flight, queued requests or an active internal command
    pub(crate) fn busy(&self) -> bool {
        self.in_flight.is_some() || !self.req_ring.is_empty() || self.internal_command != 0
    }

    pub(crate) fn has_pending_requests(&self) -> bool {
        self.in_flight.is_some() || !self.req_ring.is_empty()
    }

    pub(crate) fn internal_queue_depth(&self) -> usize {
        self.internal_command_queue.iter().flatten().count()
    }

    pub(crate) fn snapshot(&self, ncci: &NcciTable) -> PlciSnapshot {
        PlciSnapshot {
            id: self.id,
            state: self.state,
            supp_state: self.supp_state,
            appl: self.appl,
            c_ind_mask: self.c_ind_mask,
            command: self.command.map(|c| c.0),
            sig_id: self.sig.id,
            nl_id: self.nl.id,
            internal_command: self.internal_command,
            internal_queue_depth: self.internal_queue_depth(),
            queued_messages: self.msg_in_queue.len(),
            queue_positions: self.msg_in_queue.positions(),
            pending_requests: self.req_ring.len() + self.in_flight.is_some() as usize,
            nccis: ncci.ring(self.ncci_ring_list),
            channels: self.channels,
            b1_facilities: self.b1_facilities,
            related_pty: self.related_pty,
        }
    }
}

/// Observable state of a PLCI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlciSnapshot {
    /// PLCI number
    pub id: u8,
    /// Signaling state
    pub state: PlciState,
    /// Supplementary service state
    pub supp_state: SuppState,
    /// Owning application
    pub appl: Option<u16>,
    /// Applications offered the call that have not answered yet
    pub c_ind_mask: ApplMask,
    /// CAPI command currently owning the PLCI
    pub command: Option<Command>,
    /// Signaling entity ID, 0 if not assigned
    pub sig_id: u8,
    /// Network layer entity ID, 0 if not assigned
    pub nl_id: u8,
    /// Step of the active internal command, 0 if none
    pub internal_command: u16,
    /// Internal commands active or waiting
    pub internal_queue_depth: usize,
    /// Application messages waiting in the PLCI queue
    pub queued_messages: usize,
    /// Ring positions `(read, write, wrap)` of the PLCI queue
    pub queue_positions: (usize, usize, usize),
    /// Adapter requests queued or in flight
    pub pending_requests: usize,
    /// NCCIs linked to this PLCI, in ring order
    pub nccis: Vec<u8>,
    /// Open B3 connections
    pub channels: u8,
    /// DSP resources on the B1 layer
    pub b1_facilities: B1Facilities,
    /// Partner PLCI of an ECT or three party request
    pub related_pty: u8,
}

impl Adapter {
    /// Allocates a free PLCI
    pub(crate) fn get_plci(&mut self) -> Option<u8> {
        let i = self.plci.iter().position(|p| p.id == 0)?;
        let id = i as u8 + 1;
        self.plci[i] = Plci {
            id,
            ..Default::default()
        };
        log::debug!("get_plci {id}");
        Some(id)
    }

    /// Frees the PLCI once nothing is left on the adapter and no application still has
    /// to answer an indication. Returns true if the PLCI is free
    pub(crate) fn plci_remove_check(&mut self, appls: &mut ApplTable, p: u8) -> bool {
        if !self.valid_plci(p) {
            return true;
        }
        let pl = self.pl(p);
        if pl.nl.is_live() || pl.sig.is_live() || !pl.c_ind_mask.is_empty() || pl.in_flight.is_some() {
            return false;
        }
        log::debug!("plci_remove_complete {p}");
        if self.adv_codec_plci == p {
            self.adv_codec_plci = 0;
        }
        if self.listen_plci == p {
            self.listen_plci = 0;
        }
        self.ncci_remove(appls, p, 0, false);
        self.plci_free_msg_in_queue(appls, p);
        self.channel_flow_control_remove(p);
        self.plci[p as usize - 1] = Plci::default();
        true
    }

    /// Tears a PLCI down: adapter side removal, NCCIs, queued messages. A PLCI still
    /// offered to applications is parked in [PlciState::OutgDisPending] until they answer
    pub(crate) fn plci_remove(&mut self, appls: &mut ApplTable, p: u8) {
        if self.plci_remove_check(appls, p) {
            return;
        }
        if self.pl(p).remove_pending {
            log::debug!("plci_remove {p}: removal already pending");
            return;
        }
        log::debug!("plci_remove {p} state {}", self.pl(p).state);
        self.mixer_remove(appls, p);
        let pl = self.pl_mut(p);
        pl.remove_pending = true;
        pl.req_ring.clear();
        pl.internal_command = 0;
        pl.internal_command_queue = Default::default();
        pl.spoofed = None;
        let (nl, sig, state) = (pl.nl, pl.sig, pl.state);
        if nl.is_live() && !nl.removing {
            self.push_req(p, Entity::Nl, Req::Remove, 0, 0, Vec::new(), Origin::Unsolicited);
        }
        if sig.is_live() && !sig.removing {
            if !matches!(state, PlciState::Idle | PlciState::Listening | PlciState::IncDisPending) {
                self.sig_req(p, Req::Hangup, Vec::new(), Origin::Unsolicited);
            }
            self.push_req(p, Entity::Sig, Req::Remove, 0, 0, Vec::new(), Origin::Unsolicited);
        }
        self.ncci_remove(appls, p, 0, false);
        self.plci_free_msg_in_queue(appls, p);
        let pl = self.pl_mut(p);
        pl.channels = 0;
        pl.appl = None;
        if matches!(pl.state, PlciState::IncConPending | PlciState::IncConAlert) {
            pl.state = PlciState::OutgDisPending;
        }
        self.send_req(p);
        self.plci_remove_check(appls, p);
    }

    /// Drops everything queued on the PLCI, returning DATA_B3 payloads to their pools
    pub(crate) fn plci_free_msg_in_queue(&mut self, appls: &mut ApplTable, p: u8) {
        for e in self.pl_mut(p).msg_in_queue.clear() {
            if e.msg.is(Command::DataB3, SubCommand::Req) {
                if let Some(a) = appls.get_mut(e.appl) {
                    a.transmit_buffer_free(crate::get_dword(&e.msg.params));
                }
            }
        }
    }

    /// Runs `f` now if no internal command is active, else queues it
    pub(crate) fn start_internal_command(&mut self, appls: &mut ApplTable, p: u8, f: CommandFn) {
        log::debug!("start_internal_command plci {p} {f}");
        let pl = self.pl_mut(p);
        if pl.internal_command == 0 && pl.internal_command_queue[0].is_none() {
            pl.internal_command_queue[0] = Some(f);
            self.run_internal(appls, p, f, Rc::Ok);
        } else {
            match pl.internal_command_queue.iter().position(Option::is_none) {
                Some(i) => pl.internal_command_queue[i] = Some(f),
                None => log::error!("plci {p}: internal command queue full, {f} dropped"),
            }
        }
    }

    /// Retires the active internal command and runs the queued ones until one of them
    /// waits on the adapter
    pub(crate) fn next_internal_command(&mut self, appls: &mut ApplTable, p: u8) {
        log::debug!("next_internal_command plci {p}");
        let pl = self.pl_mut(p);
        pl.internal_command = 0;
        pl.internal_command_queue[0] = None;
        loop {
            if !self.valid_plci(p) {
                return;
            }
            let pl = self.pl_mut(p);
            let Some(f) = pl.internal_command_queue[1] else {
                return;
            };
            pl.internal_command_queue.rotate_left(1);
            self.run_internal(appls, p, f, Rc::Ok);
            if !self.valid_plci(p) || self.pl(p).internal_command != 0 {
                return;
            }
            self.pl_mut(p).internal_command_queue[0] = None;
        }
    }

    /// Feeds an adapter completion to the active internal command
    pub(crate) fn internal_rc(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let pl = self.pl(p);
        match pl.internal_command_queue[0] {
            Some(f) if pl.internal_command != 0 => self.run_internal(appls, p, f, rc),
            _ => log::warn!("plci {p}: return code {rc:?} without active internal command"),
        }
    }

    fn run_internal(&mut self, appls: &mut ApplTable, p: u8, f: CommandFn, rc: Rc) {
        match f {
            CommandFn::SelectB => self.select_b_command(appls, p, rc),
            CommandFn::Dtmf => self.dtmf_command(appls, p, rc),
            CommandFn::Ec => self.ec_command(appls, p, rc),
            CommandFn::Mixer => self.mixer_command(appls, p, rc),
            CommandFn::MixerNotify => self.mixer_notify_command(appls, p, rc),
            CommandFn::AdvVoice => self.adv_voice_command(appls, p, rc),
            CommandFn::FaxConnectAck => self.fax_connect_ack_command(appls, p, rc),
            CommandFn::CodecWait => self.codec_wait_command(appls, p, rc),
        }
    }
}

#[cfg(test)]
pub mod plci_test {
    use super::*;
    use crate::config::{AdapterProfile, EngineConfig};

    fn adapter(max_plci: u8) -> Adapter {
        let profile = AdapterProfile {
            max_plci,
            ..Default::default()
        };
        Adapter::new(1, profile, EngineConfig::default())
    }

    #[test]
    fn test_get_plci_exhaustion() {
        let mut a = adapter(2);
        assert_eq!(a.get_plci(), Some(1));
        assert_eq!(a.get_plci(), Some(2));
        assert_eq!(a.get_plci(), None);
        a.plci_remove(&mut ApplTable::default(), 1);
        assert_eq!(a.get_plci(), Some(1));
    }

    #[test]
    fn test_internal_queue_fifo() {
        let mut a = adapter(1);
        let mut appls = ApplTable::default();
        let p = a.get_plci().unwrap();
        let pl = a.pl_mut(p);
        pl.internal_command = 1;
        pl.internal_command_queue[0] = Some(CommandFn::Dtmf);
        for f in [CommandFn::Ec, CommandFn::Mixer, CommandFn::SelectB, CommandFn::AdvVoice] {
            a.start_internal_command(&mut appls, p, f);
        }
        // the fifth one does not fit
        assert_eq!(
            a.pl(p).internal_command_queue,
            [Some(CommandFn::Dtmf), Some(CommandFn::Ec), Some(CommandFn::Mixer), Some(CommandFn::SelectB)]
        );
        assert_eq!(a.pl(p).internal_queue_depth(), MAX_INTERNAL_COMMAND_LEVELS);
        assert!(a.pl(p).busy());
    }

    #[test]
    fn test_remove_order() {
        let mut a = adapter(1);
        let mut appls = ApplTable::default();
        let p = a.get_plci().unwrap();
        let pl = a.pl_mut(p);
        pl.sig.id = 1;
        pl.nl.id = 2;
        pl.state = PlciState::Connected;
        pl.appl = Some(1);
        a.plci_remove(&mut appls, p);

        let sent = &a.xdi_out[0];
        assert_eq!((sent.entity, sent.req, sent.id), (Entity::Nl, Req::Remove, 2));
        let queued: Vec<(Entity, Req)> = a.pl(p).req_ring.iter().map(|r| (r.entity, r.req)).collect();
        assert_eq!(queued, vec![(Entity::Sig, Req::Hangup), (Entity::Sig, Req::Remove)]);
        assert!(a.pl(p).remove_pending);
        assert_eq!(a.pl(p).appl, None);
        // a second removal adds nothing
        a.plci_remove(&mut appls, p);
        assert_eq!(a.pl(p).req_ring.len(), 2);
    }

    #[test]
    fn test_remove_idle_plci_frees_at_once() {
        let mut a = adapter(1);
        let p = a.get_plci().unwrap();
        a.plci_remove(&mut ApplTable::default(), p);
        assert!(!a.valid_plci(p));
        assert!(a.xdi_out.is_empty());
    }
}

//! The CAPI engine proper
//!
//! An [Adapter] owns the PLCI arena, the NCCI/channel mapping table, the per channel flow
//! control state and the line interconnect table of one controller. Handlers for
//! application messages and for adapter completions are `impl Adapter` blocks spread over
//! the submodules, one per message family or feature.
//!
//! Handlers never talk to the transport or the message sink directly. Outgoing CAPI
//! messages and adapter requests collect in two outboxes which the
//! [crate::engine::CapiEngine] flushes after each entry call.

use crate::{
    config::{AdapterProfile, ChannelFlow, EngineConfig, MAX_NL_CHANNEL},
    info::Info,
    message::{CapiMessage, Command, Out, SubCommand, encode_params},
    xdi::{Entity, Req, XdiRequest},
};

pub mod b3;
pub mod bprot;
pub mod connect;
pub mod data;
pub mod dispatch;
pub mod dtmf;
pub mod ec;
pub mod facility;
pub mod fax;
pub mod manufacturer;
pub mod mixer;
pub mod ncci;
pub mod plci;
pub mod resource;

pub use ncci::{NcciSnapshot, NcciState};
pub use plci::{PlciSnapshot, PlciState, SuppState};

use mixer::MixerTable;
use ncci::NcciTable;
use plci::{Origin, PendingReq, Plci};

/// Listen parameters of one application on one adapter
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub(crate) struct ListenMask {
    pub(crate) info_mask: u32,
    pub(crate) cip_mask: u32,
    pub(crate) cip_mask2: u32,
    /// Supplementary service notification mask
    pub(crate) notification_mask: u32,
}

/// CAPI message waiting to be handed to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outbound {
    pub(crate) appl: u16,
    pub(crate) msg: CapiMessage,
}

/// Outcome of a message handler
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Nothing to send
    Done,
    /// Requests were queued on this PLCI, start sending them
    SendReq(u8),
    /// The attempt failed before anything reached the adapter. Drop the request ring
    ResetReq(u8),
}

/// One controller
#[derive(Debug)]
pub struct Adapter {
    pub(crate) controller: u8,
    pub(crate) profile: AdapterProfile,
    pub(crate) config: EngineConfig,
    pub(crate) plci: Vec<Plci>,
    pub(crate) ncci: NcciTable,
    pub(crate) ch_flow: Vec<ChannelFlow>,
    pub(crate) ch_flow_plci: Vec<u8>,
    pub(crate) listen: Vec<ListenMask>,
    pub(crate) listen_plci: u8,
    pub(crate) adv_codec_plci: u8,
    pub(crate) mixer: MixerTable,
    pub(crate) outbox: Vec<Outbound>,
    pub(crate) xdi_out: Vec<XdiRequest>,
}

impl Adapter {
    pub(crate) fn new(controller: u8, profile: AdapterProfile, config: EngineConfig) -> Self {
        Self {
            controller,
            profile,
            config,
            plci: (0..profile.max_plci).map(|_| Plci::default()).collect(),
            ncci: NcciTable::default(),
            ch_flow: vec![ChannelFlow::empty(); MAX_NL_CHANNEL + 1],
            ch_flow_plci: vec![0; MAX_NL_CHANNEL + 1],
            listen: vec![ListenMask::default(); crate::config::MAX_APPL as usize + 1],
            listen_plci: 0,
            adv_codec_plci: 0,
            mixer: MixerTable::new(profile.max_plci as usize),
            outbox: Vec::new(),
            xdi_out: Vec::new(),
        }
    }

    /// Controller number
    pub fn controller(&self) -> u8 {
        self.controller
    }

    /// Capabilities the adapter was attached with
    pub fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    /// Number of NCCI mapping anomalies seen so far
    pub fn ncci_mapping_bug(&self) -> u32 {
        self.ncci.mapping_bug
    }

    /// True if `p` names an allocated PLCI
    pub(crate) fn valid_plci(&self, p: u8) -> bool {
        p != 0 && (p as usize) <= self.plci.len() && self.plci[p as usize - 1].id != 0
    }

    pub(crate) fn pl(&self, p: u8) -> &Plci {
        &self.plci[p as usize - 1]
    }

    pub(crate) fn pl_mut(&mut self, p: u8) -> &mut Plci {
        &mut self.plci[p as usize - 1]
    }

    /// CAPI identifier for a PLCI / NCCI of this controller
    pub(crate) fn id(&self, p: u8, ncci: u8) -> u32 {
        self.controller as u32 | (p as u32) << 8 | (ncci as u32) << 16
    }

    /// Queues an outgoing CAPI message. Indications get their message number when
    /// the engine flushes the outbox
    pub(crate) fn sendf(&mut self, appl: u16, cmd: Command, sub: SubCommand, id: u32, number: u16, params: &[Out<'_>]) {
        log::debug!("sendf {cmd}_{sub} appl {appl} id {id:08x} number {number}");
        let msg = CapiMessage::new(appl, cmd, sub, number, id, encode_params(params));
        self.outbox.push(Outbound { appl, msg });
    }

    /// Queues a DATA_B3_IND carrying `data`
    pub(crate) fn send_data_ind(&mut self, appl: u16, id: u32, params: &[Out<'_>], data: Vec<u8>) {
        let msg = CapiMessage::new(appl, Command::DataB3, SubCommand::Ind, 0, id, encode_params(params))
            .with_data(data);
        self.outbox.push(Outbound { appl, msg });
    }

    /// Queues a confirmation whose only parameter is the info word
    pub(crate) fn send_conf(&mut self, appl: u16, cmd: Command, id: u32, number: u16, info: Info) {
        self.sendf(appl, cmd, SubCommand::Conf, id, number, &[Out::W(info.into())]);
    }

    /// Confirmation to the application that issued the command owning `p`
    pub(crate) fn conf_to_cmd(&mut self, p: u8, cmd: Command, id: u32, info: Info) {
        let (appl, number) = (self.pl(p).cmd_appl, self.pl(p).number);
        self.send_conf(appl, cmd, id, number, info);
    }

    /// Indication to the application owning `p`, dropped if there is none
    pub(crate) fn ind_to_owner(&mut self, p: u8, cmd: Command, id: u32, params: &[Out<'_>]) {
        match self.pl(p).appl {
            Some(appl) => self.sendf(appl, cmd, SubCommand::Ind, id, 0, params),
            None => log::debug!("plci {p}: no owner for {cmd}_IND"),
        }
    }

    /// Queues a request for the signaling entity of `p`
    pub(crate) fn sig_req(&mut self, p: u8, req: Req, data: Vec<u8>, origin: Origin) {
        self.push_req(p, Entity::Sig, req, 0, 0, data, origin);
    }

    /// Queues a request for the network layer entity of `p`
    pub(crate) fn nl_req(&mut self, p: u8, req: Req, ncci: u8, data: Vec<u8>, origin: Origin) {
        let ch = if ncci != 0 { self.ncci.ncci_ch[ncci as usize] } else { 0 };
        self.push_req(p, Entity::Nl, req, ch, ncci, data, origin);
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push_req(&mut self, p: u8, entity: Entity, req: Req, ch: u8, ncci: u8, data: Vec<u8>, origin: Origin) {
        let pl = self.pl_mut(p);
        match (req, entity) {
            (Req::Assign, Entity::Sig) => pl.sig.assigning = true,
            (Req::Assign, Entity::Nl) => pl.nl.assigning = true,
            (Req::Remove, Entity::Sig) => pl.sig.removing = true,
            (Req::Remove, Entity::Nl) => pl.nl.removing = true,
            _ => {}
        }
        pl.req_ring.push_back(PendingReq {
            entity,
            req,
            ch,
            ncci,
            data,
            origin,
            tx: None,
        });
    }

    /// Hands the next queued request of `p` to the adapter unless one is in flight
    pub(crate) fn send_req(&mut self, p: u8) {
        if !self.valid_plci(p) {
            return;
        }
        let controller = self.controller;
        let pl = self.pl_mut(p);
        if pl.in_flight.is_some() {
            return;
        }
        let Some(r) = pl.req_ring.pop_front() else {
            return;
        };
        let id = match (r.req, r.entity) {
            (Req::Assign, _) => 0,
            (_, Entity::Sig) => pl.sig.id,
            (_, Entity::Nl) => pl.nl.id,
        };
        log::debug!("send_req plci {p} {} {} id {id} ch {}", r.entity, r.req, r.ch);
        self.xdi_out.push(XdiRequest {
            controller,
            plci: p,
            entity: r.entity,
            id,
            req: r.req,
            ch: r.ch,
            data: r.data.clone(),
        });
        self.pl_mut(p).in_flight = Some(r);
    }

    /// Snapshot of a PLCI for observation
    pub fn plci_snapshot(&self, p: u8) -> Option<PlciSnapshot> {
        self.valid_plci(p).then(|| self.pl(p).snapshot(&self.ncci))
    }

    /// Snapshot of an NCCI for observation
    pub fn ncci_snapshot(&self, ncci: u8) -> Option<NcciSnapshot> {
        self.ncci.snapshot(ncci)
    }

    /// Allocated PLCI numbers
    pub fn plcis(&self) -> impl Iterator<Item = u8> + '_ {
        self.plci.iter().filter(|p| p.id != 0).map(|p| p.id)
    }
}

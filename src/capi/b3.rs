//! B3 connections (NCCIs) on top of a connected PLCI, and SELECT_B

use crate::{
    appl::ApplTable,
    capi::{
        Adapter, Dispatch, NcciState, PlciState,
        bprot::BProtocol,
        dispatch::MsgCtx,
        plci::{CommandFn, Origin, PendingReq},
    },
    config::MAX_CHANNELS_PER_PLCI,
    info::Info,
    message::{Command, Out},
    parse::ApiParse,
    xdi::{Entity, IndResponse, NlInd, Rc, Req},
};

const SELECT_B_REMOVE: u16 = 1;
const SELECT_B_ASSIGN: u16 = 2;

impl Adapter {
    /// NCCI addressed by a B3 message if it exists and belongs to an owned PLCI
    fn b3_target(&self, c: &MsgCtx<'_>) -> Option<(u8, u8)> {
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) || !self.ncci.owned_by(c.ncci, p) {
            return None;
        }
        Some((p, c.ncci as u8))
    }

    pub(crate) fn connect_b3_req(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) {
            self.send_conf(c.appl, Command::ConnectB3, c.id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        }
        let id = self.id(p, 0);
        let pl = self.pl(p);
        if !matches!(pl.state, PlciState::Connected) || !pl.nl.is_live() {
            self.send_conf(c.appl, Command::ConnectB3, id, c.number, Info::WrongState);
            return Dispatch::Done;
        }
        if pl.channels >= MAX_CHANNELS_PER_PLCI {
            self.send_conf(c.appl, Command::ConnectB3, id, c.number, Info::OutOfNcci);
            return Dispatch::Done;
        }
        let preserved = self.preserved_ncci(p);
        let ncpi = if self.pl(p).bprot.is_fax() {
            let config = self.fax_config_data(p);
            self.push_req(p, Entity::Nl, Req::NEData, 0, 0, config, Origin::Command);
            Vec::new()
        } else {
            parms[0].info.to_vec()
        };
        self.push_req(p, Entity::Nl, Req::NConnect, 0, preserved, ncpi, Origin::Command);
        Dispatch::SendReq(p)
    }

    pub(crate) fn connect_b3_req_rc(&mut self, _appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc, ch: u8) {
        match req.req {
            Req::NEData if !rc.is_ok() => {
                let id = self.id(p, 0);
                self.conf_to_cmd(p, Command::ConnectB3, id, Info::B3ParmNotSupported);
            }
            Req::NConnect if rc.is_ok() && ch != 0 => {
                let ncci = self.get_ncci(p, ch, req.ncci);
                self.ncci.ncci_state[ncci as usize] = NcciState::OutgConPending;
                self.pl_mut(p).channels += 1;
                let id = self.id(p, ncci);
                self.conf_to_cmd(p, Command::ConnectB3, id, Info::Success);
            }
            Req::NConnect => {
                let id = self.id(p, 0);
                self.conf_to_cmd(p, Command::ConnectB3, id, Info::WrongState);
            }
            _ => {}
        }
    }

    pub(crate) fn connect_b3_res(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let Some((p, ncci)) = self.b3_target(c) else {
            log::debug!("CONNECT_B3_RESP appl {} for unknown ncci {:08x}", c.appl, c.id);
            return Dispatch::Done;
        };
        if self.ncci.ncci_state[ncci as usize] != NcciState::IncConPending {
            log::debug!("CONNECT_B3_RESP ncci {ncci} in {}", self.ncci.ncci_state[ncci as usize]);
            return Dispatch::Done;
        }
        if parms[0].word() != 0 {
            self.ncci.ncci_state[ncci as usize] = NcciState::OutgDisPending;
            self.nl_req(p, Req::NDisc, ncci, Vec::new(), Origin::Unsolicited);
            return Dispatch::SendReq(p);
        }
        self.ncci.ncci_state[ncci as usize] = NcciState::IncActPending;
        if self.pl(p).bprot.is_fax() {
            self.pl_mut(p).fax.ncci = ncci;
            self.start_internal_command(appls, p, CommandFn::FaxConnectAck);
        } else {
            self.nl_req(p, Req::NConnectAck, ncci, parms[1].info.to_vec(), Origin::Command);
        }
        Dispatch::SendReq(p)
    }

    pub(crate) fn connect_b3_res_rc(&mut self, _appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        if req.req != Req::NConnectAck {
            return;
        }
        if rc.is_ok() {
            self.b3_active(p, req.ncci, Vec::new());
        } else {
            log::error!("plci {p}: B3 accept of ncci {} failed", req.ncci);
        }
    }

    /// NCCI reached the data phase
    pub(crate) fn b3_active(&mut self, p: u8, ncci: u8, ncpi: Vec<u8>) {
        if !self.ncci.owned_by(ncci as u16, p) {
            return;
        }
        self.ncci.ncci_state[ncci as usize] = NcciState::Connected;
        let ncpi = if self.pl(p).bprot.is_fax() { self.fax_ncpi(p) } else { ncpi };
        let id = self.id(p, ncci);
        self.ind_to_owner(p, Command::ConnectB3Active, id, &[Out::S(&ncpi)]);
    }

    pub(crate) fn disconnect_b3_req(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let Some((p, ncci)) = self.b3_target(c) else {
            self.send_conf(c.appl, Command::DisconnectB3, c.id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        };
        let id = self.id(p, ncci);
        let state = self.ncci.ncci_state[ncci as usize];
        if matches!(state, NcciState::Idle | NcciState::OutgDisPending | NcciState::IncDisPending)
            || !self.pl(p).nl.is_live()
        {
            self.send_conf(c.appl, Command::DisconnectB3, id, c.number, Info::WrongState);
            return Dispatch::Done;
        }
        self.ncci.ncci_state[ncci as usize] = NcciState::OutgDisPending;
        self.nl_req(p, Req::NDisc, ncci, parms[0].info.to_vec(), Origin::Command);
        Dispatch::SendReq(p)
    }

    pub(crate) fn disconnect_b3_req_rc(&mut self, _appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        let id = self.id(p, req.ncci);
        if rc.is_ok() {
            self.conf_to_cmd(p, Command::DisconnectB3, id, Info::Success);
        } else {
            self.ncci.ncci_state[req.ncci as usize] = NcciState::Connected;
            self.conf_to_cmd(p, Command::DisconnectB3, id, Info::WrongState);
        }
    }

    /// DISCONNECT_B3_IND for an NCCI, unless it was already reported
    pub(crate) fn disconnect_b3_ind(&mut self, p: u8, ncci: u8, reason: u16, ncpi: &[u8]) {
        let state = &mut self.ncci.ncci_state[ncci as usize];
        if matches!(*state, NcciState::Idle | NcciState::IncDisPending) {
            return;
        }
        *state = NcciState::IncDisPending;
        let ncpi = if self.pl(p).bprot.is_fax() { self.fax_ncpi(p) } else { ncpi.to_vec() };
        let id = self.id(p, ncci);
        self.ind_to_owner(p, Command::DisconnectB3, id, &[Out::W(reason), Out::S(&ncpi)]);
    }

    /// Reason reported in DISCONNECT_B3_IND for a B3 connection ended by the adapter
    pub(crate) fn b3_disc_reason(&self, p: u8, cause: u8) -> u16 {
        match self.fax_disc_reason(p) {
            Some(r) => r,
            None if cause != 0 => Info::L3Error.into(),
            None => 0,
        }
    }

    pub(crate) fn disconnect_b3_res(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>) -> Dispatch {
        let Some((p, ncci)) = self.b3_target(c) else {
            return Dispatch::Done;
        };
        if self.ncci.ncci_state[ncci as usize] != NcciState::IncDisPending {
            log::debug!("DISCONNECT_B3_RESP ncci {ncci} in {}", self.ncci.ncci_state[ncci as usize]);
            return Dispatch::Done;
        }
        let mut d = Dispatch::Done;
        if std::mem::take(&mut self.ncci.data[ncci as usize].disc_ack_needed) && self.pl(p).nl.id != 0 {
            self.nl_req(p, Req::NDiscAck, ncci, Vec::new(), Origin::Unsolicited);
            d = Dispatch::SendReq(p);
        }
        self.ncci.ncci_state[ncci as usize] = NcciState::Idle;
        self.ncci_remove(appls, p, ncci, false);
        let pl = self.pl_mut(p);
        pl.channels = pl.channels.saturating_sub(1);
        if pl.release_after_b3 && pl.channels == 0 {
            self.plci_remove(appls, p);
            return Dispatch::Done;
        }
        d
    }

    pub(crate) fn reset_b3_req(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>) -> Dispatch {
        let Some((p, ncci)) = self.b3_target(c) else {
            self.send_conf(c.appl, Command::ResetB3, c.id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        };
        let id = self.id(p, ncci);
        if self.pl(p).bprot.is_transparent() {
            self.send_conf(c.appl, Command::ResetB3, id, c.number, Info::ResetNotSupported);
            return Dispatch::Done;
        }
        if self.ncci.ncci_state[ncci as usize] != NcciState::Connected {
            self.send_conf(c.appl, Command::ResetB3, id, c.number, Info::WrongState);
            return Dispatch::Done;
        }
        self.ncci.ncci_state[ncci as usize] = NcciState::OutgResPending;
        self.nl_req(p, Req::NReset, ncci, Vec::new(), Origin::Command);
        Dispatch::SendReq(p)
    }

    pub(crate) fn reset_b3_req_rc(&mut self, _appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        let id = self.id(p, req.ncci);
        if rc.is_ok() {
            self.conf_to_cmd(p, Command::ResetB3, id, Info::Success);
        } else {
            self.ncci.ncci_state[req.ncci as usize] = NcciState::Connected;
            self.conf_to_cmd(p, Command::ResetB3, id, Info::WrongState);
        }
    }

    pub(crate) fn reset_b3_res(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>) -> Dispatch {
        let Some((p, ncci)) = self.b3_target(c) else {
            return Dispatch::Done;
        };
        if self.ncci.ncci_state[ncci as usize] != NcciState::IncResPending {
            return Dispatch::Done;
        }
        self.ncci.ncci_state[ncci as usize] = NcciState::Connected;
        self.nl_req(p, Req::NResetAck, ncci, Vec::new(), Origin::Unsolicited);
        Dispatch::SendReq(p)
    }

    pub(crate) fn select_b_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) {
            self.send_conf(c.appl, Command::SelectB, c.id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        }
        let id = self.id(p, 0);
        let pl = self.pl(p);
        if pl.state != PlciState::Connected || pl.channels != 0 {
            self.send_conf(c.appl, Command::SelectB, id, c.number, Info::WrongState);
            return Dispatch::Done;
        }
        match BProtocol::from_parms(&parms[0], &self.profile) {
            Ok(bprot) => {
                self.pl_mut(p).bprot = bprot;
                self.start_internal_command(appls, p, CommandFn::SelectB);
                Dispatch::SendReq(p)
            }
            Err(info) => {
                self.send_conf(c.appl, Command::SelectB, id, c.number, info);
                Dispatch::Done
            }
        }
    }

    /// Replaces the network layer entity with one running the newly selected protocols.
    /// NCCI numbers of the PLCI are kept for the new entity
    pub(crate) fn select_b_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let step = std::mem::take(&mut self.pl_mut(p).internal_command);
        log::debug!("select_b_command plci {p} step {step} {rc:?}");
        let id = self.id(p, 0);
        match step {
            0 if self.pl(p).nl.is_live() => {
                self.ncci_remove(appls, p, 0, true);
                self.push_req(p, Entity::Nl, Req::Remove, 0, 0, Vec::new(), Origin::Internal);
                self.pl_mut(p).internal_command = SELECT_B_REMOVE;
            }
            SELECT_B_REMOVE if !rc.is_ok() => {
                self.conf_to_cmd(p, Command::SelectB, id, Info::WrongState);
                self.next_internal_command(appls, p);
            }
            0 | SELECT_B_REMOVE => {
                let data = self.pl(p).bprot.assign_data();
                self.push_req(p, Entity::Nl, Req::Assign, 0, 0, data, Origin::Internal);
                self.pl_mut(p).internal_command = SELECT_B_ASSIGN;
            }
            _ => {
                let info = if rc.is_ok() { Info::Success } else { Info::B1ParmNotSupported };
                self.conf_to_cmd(p, Command::SelectB, id, info);
                self.next_internal_command(appls, p);
            }
        }
    }

    /// Network layer indication on `p`
    pub(crate) fn nl_ind(&mut self, appls: &mut ApplTable, p: u8, ind: NlInd) -> IndResponse {
        log::debug!("nl_ind plci {p} {ind:?}");
        let ch = ind.ch();
        match ind {
            NlInd::Connect { ncpi, .. } => self.connect_b3_ind(p, ch, ncpi),
            NlInd::ConnectAck { ncpi, .. } => match self.ncci.ncci_of(p, ch) {
                Some(ncci) if self.ncci.ncci_state[ncci as usize] == NcciState::OutgConPending => {
                    self.b3_active(p, ncci, ncpi)
                }
                _ => log::warn!("plci {p}: unexpected connect ack on ch {ch}"),
            },
            NlInd::Disc { cause, ncpi, .. } => {
                if let Some(ncci) = self.ncci.ncci_of(p, ch) {
                    self.ncci.data[ncci as usize].disc_ack_needed = true;
                    let reason = self.b3_disc_reason(p, cause);
                    self.disconnect_b3_ind(p, ncci, reason, &ncpi);
                }
            }
            NlInd::DiscAck { ncpi, .. } => {
                if let Some(ncci) = self.ncci.ncci_of(p, ch) {
                    let reason = self.b3_disc_reason(p, 0);
                    self.disconnect_b3_ind(p, ncci, reason, &ncpi);
                }
            }
            NlInd::Data { data, .. } => return self.data_ind(appls, p, ch, data),
            NlInd::DataAck { .. } => self.data_ack_ind(p, ch),
            NlInd::Reset { .. } => self.reset_b3_ind(p, ch, NcciState::IncResPending),
            NlInd::ResetAck { .. } => self.reset_b3_ind(p, ch, NcciState::Connected),
            NlInd::UData { data, .. } => self.udata_ind(p, &data),
            NlInd::EData { data, .. } => self.fax_edata_ind(p, &data),
        }
        IndResponse::Accepted
    }

    fn connect_b3_ind(&mut self, p: u8, ch: u8, ncpi: Vec<u8>) {
        let pl = self.pl(p);
        if pl.appl.is_none() || pl.state != PlciState::Connected {
            log::warn!("plci {p}: B3 connect on ch {ch} in {}, ignored", pl.state);
            return;
        }
        let preserved = self.preserved_ncci(p);
        let ncci = self.get_ncci(p, ch, preserved);
        self.ncci.ncci_state[ncci as usize] = NcciState::IncConPending;
        self.pl_mut(p).channels += 1;
        let ncpi = if self.pl(p).bprot.is_fax() { self.fax_ncpi(p) } else { ncpi };
        let id = self.id(p, ncci);
        self.ind_to_owner(p, Command::ConnectB3, id, &[Out::S(&ncpi)]);
    }

    fn reset_b3_ind(&mut self, p: u8, ch: u8, next: NcciState) {
        let Some(ncci) = self.ncci.ncci_of(p, ch) else {
            return;
        };
        self.ncci.ncci_state[ncci as usize] = next;
        let id = self.id(p, ncci);
        self.ind_to_owner(p, Command::ResetB3, id, &[Out::S(&[])]);
    }
}

#[cfg(test)]
pub mod b3_test {
    use super::*;
    use crate::config::{AdapterProfile, EngineConfig};

    fn connected() -> (Adapter, ApplTable, u8) {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        appls.register(1, Default::default(), &EngineConfig::default()).unwrap();
        let p = a.get_plci().unwrap();
        let pl = a.pl_mut(p);
        pl.appl = Some(1);
        pl.state = PlciState::Connected;
        pl.nl.id = 3;
        (a, appls, p)
    }

    #[test]
    fn test_incoming_b3_lifecycle() {
        let (mut a, mut appls, p) = connected();
        a.nl_ind(&mut appls, p, NlInd::Connect { ch: 5, ncpi: vec![] });
        let ncci = a.ncci.ncci_of(p, 5).unwrap();
        assert_eq!(ncci, 5);
        assert_eq!(a.ncci.ncci_state[5], NcciState::IncConPending);
        assert_eq!(a.pl(p).channels, 1);
        assert!(a.outbox[0].msg.is(Command::ConnectB3, crate::message::SubCommand::Ind));

        a.nl_ind(&mut appls, p, NlInd::Disc { ch: 5, cause: 0, ncpi: vec![] });
        assert_eq!(a.ncci.ncci_state[5], NcciState::IncDisPending);
        assert!(a.ncci.data[5].disc_ack_needed);
        // a second report for the same NCCI is suppressed
        a.disconnect_b3_ind(p, 5, 0, &[]);
        let inds = a
            .outbox
            .iter()
            .filter(|o| o.msg.is(Command::DisconnectB3, crate::message::SubCommand::Ind))
            .count();
        assert_eq!(inds, 1);
    }

    #[test]
    fn test_b3_connect_ignored_when_not_connected() {
        let (mut a, mut appls, p) = connected();
        a.pl_mut(p).state = PlciState::OutgConPending;
        a.nl_ind(&mut appls, p, NlInd::Connect { ch: 2, ncpi: vec![] });
        assert_eq!(a.ncci.ncci_of(p, 2), None);
        assert!(a.outbox.is_empty());
    }

    #[test]
    fn test_select_b_preserves_ncci_numbers() {
        let (mut a, mut appls, p) = connected();
        let n = a.get_ncci(p, 4, 0);
        a.start_internal_command(&mut appls, p, CommandFn::SelectB);
        assert_eq!(a.pl(p).req_ring.back().map(|r| r.req), Some(Req::Remove));
        assert_eq!(a.preserved_ncci(p), n);
        assert_eq!(a.ncci.ncci_of(p, 4), None);

        // network layer entity removed
        a.pl_mut(p).req_ring.clear();
        a.pl_mut(p).nl = Default::default();
        a.select_b_command(&mut appls, p, Rc::Ok);
        assert_eq!(a.pl(p).req_ring.back().map(|r| r.req), Some(Req::Assign));

        a.pl_mut(p).req_ring.clear();
        a.pl_mut(p).nl.id = 5;
        a.select_b_command(&mut appls, p, Rc::Ok);
        assert_eq!(a.pl(p).internal_command, 0);
        let conf = &a.outbox.last().unwrap().msg;
        assert!(conf.is(Command::SelectB, crate::message::SubCommand::Conf));
        assert_eq!(crate::get_word(&conf.params), u16::from(Info::Success));

        // the next connection gets the old number on its new channel
        a.nl_ind(&mut appls, p, NlInd::Connect { ch: 9, ncpi: vec![] });
        assert_eq!(a.ncci.ncci_of(p, 9), Some(n));
        assert_eq!(a.ncci.ring(a.pl(p).ncci_ring_list), vec![n]);
    }

    #[test]
    fn test_disc_reason() {
        let (a, _, p) = connected();
        assert_eq!(a.b3_disc_reason(p, 0), 0);
        assert_eq!(a.b3_disc_reason(p, 0x10), u16::from(Info::L3Error));
    }
}

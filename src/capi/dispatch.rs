//! Application message entry and adapter completion routing
//!
//! [Adapter::api_put] either queues an application message on its PLCI or parses it
//! against [FTABLE] and hands it to its handler. [Adapter::callback] takes adapter
//! completions and indications. Completions are routed by the [Origin] of the request
//! they complete; after each one the PLCI is pumped: the next request goes out, queued
//! data is sent and queued application messages are dispatched while the PLCI is idle.

use crate::{
    CapiError, CapiResult,
    appl::ApplTable,
    capi::{
        Adapter, Dispatch, PlciState,
        manufacturer::Tel,
        plci::{EntityState, Origin, PendingReq},
    },
    config::{ChannelFlow, MAX_DATA_ACK, MAX_DATA_B3},
    get_word,
    message::{CapiMessage, Command, SubCommand},
    parse::{ApiParse, api_parse},
    xdi::{Entity, IndResponse, Rc, Req, XdiEvent},
};

/// Parameter formats per command. A command listed more than once accepts any of its
/// formats, tried in order
pub(crate) const FTABLE: &[(Command, SubCommand, &str)] = &[
    (Command::DataB3, SubCommand::Req, "dwww"),
    (Command::DataB3, SubCommand::Resp, "w"),
    (Command::Info, SubCommand::Req, "ss"),
    (Command::Info, SubCommand::Resp, ""),
    (Command::Connect, SubCommand::Req, "wsssssssss"),
    (Command::Connect, SubCommand::Resp, "wsssss"),
    (Command::ConnectActive, SubCommand::Resp, ""),
    (Command::Disconnect, SubCommand::Req, "s"),
    (Command::Disconnect, SubCommand::Resp, ""),
    (Command::Listen, SubCommand::Req, "dddss"),
    (Command::Alert, SubCommand::Req, "s"),
    (Command::Facility, SubCommand::Req, "ws"),
    (Command::Facility, SubCommand::Resp, "ws"),
    (Command::ConnectB3, SubCommand::Req, "s"),
    (Command::ConnectB3, SubCommand::Resp, "ws"),
    (Command::ConnectB3Active, SubCommand::Resp, ""),
    (Command::DisconnectB3, SubCommand::Req, "s"),
    (Command::DisconnectB3, SubCommand::Resp, ""),
    (Command::ResetB3, SubCommand::Req, "s"),
    (Command::ResetB3, SubCommand::Resp, ""),
    (Command::ConnectB3T90Active, SubCommand::Resp, "ws"),
    (Command::ConnectB3T90Active, SubCommand::Resp, ""),
    (Command::SelectB, SubCommand::Req, "s"),
    (Command::Manufacturer, SubCommand::Req, "dws"),
    (Command::Manufacturer, SubCommand::Resp, "dws"),
    (Command::Manufacturer, SubCommand::Resp, ""),
];

/// What a handler knows about the message it handles
#[derive(Debug, Clone, Copy)]
pub(crate) struct MsgCtx<'a> {
    pub(crate) appl: u16,
    pub(crate) id: u32,
    pub(crate) number: u16,
    /// Addressed PLCI if it exists, else 0
    pub(crate) plci: u8,
    pub(crate) ncci: u16,
    pub(crate) msg: &'a CapiMessage,
}

impl Adapter {
    /// Entry for an application message addressed to this adapter
    pub(crate) fn api_put(&mut self, appls: &mut ApplTable, appl: u16, mut msg: CapiMessage) -> CapiResult<()> {
        let p = msg.header.plci;
        let mut tx_ref = None;
        if msg.is(Command::DataB3, SubCommand::Req) {
            if msg.params.len() < 10 {
                return Err(CapiError::BadMessage);
            }
            let data = msg.data.take().unwrap_or_default();
            let a = appls.get_mut(appl).ok_or(CapiError::IllegalApplication(appl))?;
            let r = a.transmit_buffer_set(data).ok_or(CapiError::QueueFull)?;
            msg.params[..4].copy_from_slice(&r.to_le_bytes());
            tx_ref = Some(r);
        }
        let res = self.admit(appls, appl, msg);
        if res.is_err() {
            if let Some(r) = tx_ref {
                if let Some(a) = appls.get_mut(appl) {
                    a.transmit_buffer_free(r);
                }
            }
        }
        if self.valid_plci(p) {
            self.channel_xmit_extended_xon(appls, p);
            self.pump(appls, p);
        }
        res
    }

    /// Queues `msg` behind earlier work on its PLCI or dispatches it now
    fn admit(&mut self, appls: &mut ApplTable, appl: u16, msg: CapiMessage) -> CapiResult<()> {
        let p = msg.header.plci;
        if !self.valid_plci(p) {
            return self.dispatch(appls, appl, &msg);
        }
        let ncci = msg.header.ncci;
        let pl = self.pl(p);
        let queue = if msg.is(Command::DataB3, SubCommand::Req) && self.ncci.owned_by(ncci, p) {
            let d = &self.ncci.data[ncci as usize];
            let (mut n, mut l) = (d.data_pending, d.data_ack_pending);
            for e in pl.msg_in_queue.iter() {
                if e.msg.is(Command::DataB3, SubCommand::Req) && e.msg.header.ncci == ncci {
                    n += 1;
                    if get_word(e.msg.params.get(8..).unwrap_or(&[])) & 0x0004 != 0 {
                        l += 1;
                    }
                }
            }
            let wants_ack = get_word(msg.params.get(8..).unwrap_or(&[])) & 0x0004 != 0;
            if n >= MAX_DATA_B3 || (wants_ack && l >= MAX_DATA_ACK) {
                log::debug!("DATA_B3_REQ plci {p} ncci {ncci}: {n} pending {l} ack pending, queue full");
                return Err(CapiError::QueueFull);
            }
            !pl.msg_in_queue.is_empty()
        } else {
            pl.busy() || !pl.msg_in_queue.is_empty()
        };
        if queue {
            let (cmd, sub) = (msg.header.command, msg.header.subcommand);
            self.pl_mut(p).msg_in_queue.push(appl, msg)?;
            log::debug!("plci {p}: queued {cmd:02x}_{sub:02x} from appl {appl}");
            return Ok(());
        }
        self.dispatch(appls, appl, &msg)
    }

    /// Parses `msg` against its format and runs its handler
    pub(crate) fn dispatch(&mut self, appls: &mut ApplTable, appl: u16, msg: &CapiMessage) -> CapiResult<()> {
        let h = &msg.header;
        let (Some(cmd), Some(sub)) = (h.cmd(), h.sub()) else {
            log::warn!("appl {appl}: unknown command {:04x}", h.command_word());
            return Err(CapiError::BadMessage);
        };
        let p = if self.valid_plci(h.plci) { h.plci } else { 0 };
        let parms = FTABLE
            .iter()
            .filter(|(c, s, _)| *c == cmd && *s == sub)
            .find_map(|(_, _, fmt)| api_parse(&msg.params, fmt).ok());
        let Some(parms) = parms else {
            log::warn!("{cmd}_{sub} appl {appl}: parameter format error");
            if p != 0 && !self.pl(p).has_pending_requests() {
                self.pl_mut(p).command = None;
            }
            return Err(CapiError::BadMessage);
        };
        log::debug!("{cmd}_{sub} appl {appl} id {:08x} number {}", h.id(), h.number);
        log::trace!("params {:02x?}", msg.params);
        if p != 0 && cmd != Command::DataB3 {
            let pl = self.pl_mut(p);
            pl.command = Some((cmd, sub));
            pl.cmd_appl = appl;
            pl.number = h.number;
        }
        let c = MsgCtx {
            appl,
            id: h.id(),
            number: h.number,
            plci: p,
            ncci: h.ncci,
            msg,
        };
        let d = self.handle(appls, &c, &parms);
        let q = match d {
            Dispatch::SendReq(q) => {
                self.send_req(q);
                q
            }
            Dispatch::ResetReq(q) => {
                if self.valid_plci(q) {
                    self.pl_mut(q).req_ring.clear();
                }
                q
            }
            Dispatch::Done => p,
        };
        for q in [p, q] {
            if self.valid_plci(q) && !self.pl(q).busy() {
                self.pl_mut(q).command = None;
            }
        }
        Ok(())
    }

    fn handle(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        use Command as C;
        use SubCommand as S;
        match (c.msg.header.cmd(), c.msg.header.sub()) {
            (Some(C::Connect), Some(S::Req)) => self.connect_req(appls, c, parms),
            (Some(C::Connect), Some(S::Resp)) => self.connect_res(appls, c, parms),
            (Some(C::ConnectActive), Some(S::Resp)) => Dispatch::Done,
            (Some(C::Disconnect), Some(S::Req)) => self.disconnect_req(appls, c, parms),
            (Some(C::Disconnect), Some(S::Resp)) => self.disconnect_res(appls, c),
            (Some(C::Listen), Some(S::Req)) => self.listen_req(appls, c, parms),
            (Some(C::Info), Some(S::Req)) => self.info_req(appls, c, parms),
            (Some(C::Info), Some(S::Resp)) => Dispatch::Done,
            (Some(C::Alert), Some(S::Req)) => self.alert_req(appls, c, parms),
            (Some(C::Facility), Some(S::Req)) => self.facility_req(appls, c, parms),
            (Some(C::Facility), Some(S::Resp)) => Dispatch::Done,
            (Some(C::ConnectB3), Some(S::Req)) => self.connect_b3_req(appls, c, parms),
            (Some(C::ConnectB3), Some(S::Resp)) => self.connect_b3_res(appls, c, parms),
            (Some(C::ConnectB3Active), Some(S::Resp)) => Dispatch::Done,
            (Some(C::DisconnectB3), Some(S::Req)) => self.disconnect_b3_req(appls, c, parms),
            (Some(C::DisconnectB3), Some(S::Resp)) => self.disconnect_b3_res(appls, c),
            (Some(C::DataB3), Some(S::Req)) => self.data_b3_req(appls, c, parms),
            (Some(C::DataB3), Some(S::Resp)) => self.data_b3_res(appls, c, parms),
            (Some(C::ResetB3), Some(S::Req)) => self.reset_b3_req(appls, c),
            (Some(C::ResetB3), Some(S::Resp)) => self.reset_b3_res(appls, c),
            (Some(C::ConnectB3T90Active), Some(S::Resp)) => Dispatch::Done,
            (Some(C::SelectB), Some(S::Req)) => self.select_b_req(appls, c, parms),
            (Some(C::Manufacturer), Some(S::Req)) => self.manufacturer_req(appls, c, parms),
            (Some(C::Manufacturer), Some(S::Resp)) => Dispatch::Done,
            _ => Dispatch::Done,
        }
    }

    /// Entry for an adapter completion or indication
    pub(crate) fn callback(&mut self, appls: &mut ApplTable, event: XdiEvent) -> IndResponse {
        match event {
            XdiEvent::ReturnCode { plci, rc, id, ch } => {
                self.return_code(appls, plci, rc, id, ch);
                IndResponse::Accepted
            }
            XdiEvent::Sig { plci, ind } => {
                if self.valid_plci(plci) {
                    self.sig_ind(appls, plci, ind);
                    self.pump(appls, plci);
                } else {
                    log::warn!("signaling indication for free plci {plci}: {ind:?}");
                }
                IndResponse::Accepted
            }
            XdiEvent::Nl { plci, ind } => {
                if !self.valid_plci(plci) {
                    log::warn!("network layer indication for free plci {plci}: {ind:?}");
                    return IndResponse::Accepted;
                }
                let r = self.nl_ind(appls, plci, ind);
                self.pump(appls, plci);
                r
            }
        }
    }

    fn return_code(&mut self, appls: &mut ApplTable, p: u8, rc: Rc, id: u8, ch: u8) {
        if !self.valid_plci(p) {
            log::warn!("return code {rc:?} for free plci {p}");
            return;
        }
        let Some(req) = self.pl_mut(p).in_flight.take() else {
            log::warn!("plci {p}: return code {rc:?} without request in flight");
            return;
        };
        log::debug!("rc plci {p} {} {} {rc:?} id {id} ch {ch}", req.entity, req.req);
        if rc == Rc::OkFc && req.entity == Entity::Nl {
            if req.ch != 0 {
                self.ch_flow[req.ch as usize] |= ChannelFlow::OK_FC_PENDING;
            }
            self.pl_mut(p).in_flight = Some(req);
            return;
        }
        if req.ch != 0 {
            self.ch_flow[req.ch as usize].remove(ChannelFlow::OK_FC_PENDING);
        }
        if !rc.is_ok() {
            log::error!("plci {p}: {} {} failed with {rc:?}", req.entity, req.req);
        }
        let pl = self.pl_mut(p);
        match (req.req, req.entity) {
            (Req::Assign, Entity::Sig) => {
                pl.sig.assigning = false;
                if rc.is_ok() {
                    pl.sig.id = id;
                }
            }
            (Req::Assign, Entity::Nl) => {
                pl.nl.assigning = false;
                if rc.is_ok() {
                    pl.nl.id = id;
                }
            }
            (Req::Remove, Entity::Sig) => pl.sig = EntityState::default(),
            (Req::Remove, Entity::Nl) => pl.nl = EntityState::default(),
            _ => {}
        }
        if !rc.is_ok() && matches!(req.req, Req::Assign) {
            // requests queued behind a failed assign have no entity to go to
            let entity = req.entity;
            self.pl_mut(p).req_ring.retain(|r| r.entity != entity || r.req == Req::Assign);
        }
        if req.origin == Origin::Data {
            self.data_rc(appls, p, req, rc);
        } else if !self.pl(p).remove_pending {
            match req.origin {
                Origin::Command => self.command_rc(appls, p, &req, rc, ch),
                Origin::Internal => self.internal_rc(appls, p, rc),
                Origin::Unsolicited => self.unsolicited_rc(appls, p, &req, rc),
                Origin::Data => {}
            }
        }
        if self.valid_plci(p) && self.pl(p).remove_pending {
            self.plci_remove_check(appls, p);
        }
        self.pump(appls, p);
    }

    /// Completion of a request issued by the CAPI command owning the PLCI
    fn command_rc(&mut self, appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc, ch: u8) {
        let Some((cmd, sub)) = self.pl(p).command else {
            log::debug!("plci {p}: {} completed after its command", req.req);
            return;
        };
        if !rc.is_ok() {
            self.pl_mut(p).req_ring.retain(|r| r.origin != Origin::Command);
        }
        match (cmd, sub) {
            (Command::Connect, SubCommand::Req) => self.connect_req_rc(appls, p, req, rc),
            (Command::Connect, SubCommand::Resp) => self.connect_res_rc(appls, p, req, rc),
            (Command::Disconnect, SubCommand::Req) => self.disconnect_req_rc(appls, p, req, rc),
            (Command::Alert, SubCommand::Req) => self.alert_req_rc(appls, p, req, rc),
            (Command::Info, SubCommand::Req) => self.info_req_rc(appls, p, req, rc),
            (Command::ConnectB3, SubCommand::Req) => self.connect_b3_req_rc(appls, p, req, rc, ch),
            (Command::ConnectB3, SubCommand::Resp) => self.connect_b3_res_rc(appls, p, req, rc),
            (Command::DisconnectB3, SubCommand::Req) => self.disconnect_b3_req_rc(appls, p, req, rc),
            (Command::ResetB3, SubCommand::Req) => self.reset_b3_req_rc(appls, p, req, rc),
            (Command::Facility, SubCommand::Req) => self.facility_req_rc(appls, p, req, rc),
            (Command::Manufacturer, SubCommand::Req) => self.manufacturer_req_rc(appls, p, req, rc),
            _ => log::debug!("plci {p}: {} completed for {cmd}_{sub}", req.req),
        }
    }

    /// Completion of a request issued on behalf of an indication or a teardown
    fn unsolicited_rc(&mut self, appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        match (req.req, req.entity) {
            (Req::Assign, Entity::Sig) if self.pl(p).state == PlciState::Listening => {
                if !rc.is_ok() {
                    log::error!("listen plci {p} could not be assigned");
                    self.plci_remove(appls, p);
                }
            }
            (Req::Assign, Entity::Sig) if self.pl(p).tel == Tel::CodecPlci => self.codec_assigned(appls, p, rc),
            (Req::Assign, Entity::Nl) if !rc.is_ok() => {
                log::error!("plci {p}: no network layer entity, B3 connections impossible");
            }
            (Req::NXon, _) => self.channel_xon_rc(req.ch),
            _ => {}
        }
    }

    /// Moves work forward on `p` after a state change
    pub(crate) fn pump(&mut self, appls: &mut ApplTable, p: u8) {
        if !self.valid_plci(p) {
            return;
        }
        self.send_req(p);
        self.send_data(appls, p);
        self.channel_xmit_xon(p);
        self.drain_queue(appls, p);
        if self.valid_plci(p) && !self.pl(p).busy() {
            self.pl_mut(p).command = None;
        }
    }

    /// Dispatches queued application messages while the PLCI is idle
    fn drain_queue(&mut self, appls: &mut ApplTable, p: u8) {
        while self.valid_plci(p) && !self.pl(p).busy() && !self.pl(p).remove_pending {
            let Some(e) = self.pl_mut(p).msg_in_queue.pop() else {
                break;
            };
            log::debug!("plci {p}: dequeued {:04x} from appl {}", e.msg.header.command_word(), e.appl);
            if let Err(err) = self.dispatch(appls, e.appl, &e.msg) {
                log::warn!("plci {p}: queued message dropped: {err}");
                if e.msg.is(Command::DataB3, SubCommand::Req) {
                    if let Some(a) = appls.get_mut(e.appl) {
                        a.transmit_buffer_free(crate::get_dword(&e.msg.params));
                    }
                }
            }
            self.send_data(appls, p);
        }
    }

    /// Hands the next request of every PLCI to the adapter. Feature commands may queue
    /// requests on PLCIs other than the one the triggering event addressed
    pub(crate) fn kick_all(&mut self) {
        for p in 1..=self.plci.len() as u8 {
            self.send_req(p);
        }
    }

    /// Drops everything an application holds on this adapter
    pub(crate) fn release_appl(&mut self, appls: &mut ApplTable, appl: u16) {
        log::debug!("release appl {appl} on controller {}", self.controller);
        for p in 1..=self.plci.len() as u8 {
            if !self.valid_plci(p) {
                continue;
            }
            let pl = self.pl_mut(p);
            if pl.c_ind_mask.test(appl) {
                pl.c_ind_mask.clear(appl);
                if pl.c_ind_mask.is_empty() && pl.appl.is_none() {
                    self.plci_remove(appls, p);
                    continue;
                }
            }
            if self.valid_plci(p) && self.pl(p).appl == Some(appl) {
                self.plci_remove(appls, p);
            }
        }
        if let Some(l) = self.listen.get_mut(appl as usize) {
            *l = Default::default();
        }
        self.listen_check(appls);
    }
}

#[cfg(test)]
pub mod dispatch_test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_command_has_a_format() {
        for cmd in Command::iter() {
            assert!(FTABLE.iter().any(|(c, _, _)| *c == cmd), "{cmd} missing");
        }
        // applications never send confirmations or indications
        assert!(FTABLE.iter().all(|(_, s, _)| matches!(s, SubCommand::Req | SubCommand::Resp)));
    }
}

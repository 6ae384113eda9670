//! Call control: CONNECT, DISCONNECT, LISTEN, ALERT and INFO, and the signaling
//! indications driving a PLCI through its states

use crate::{
    appl::ApplTable,
    capi::{
        Adapter, Dispatch, PlciState,
        bprot::BProtocol,
        dispatch::MsgCtx,
        manufacturer::Tel,
        plci::{CommandFn, Origin, PendingReq, SpoofedMsg},
    },
    ie::{self, IeWriter},
    info::Info,
    message::{CapiMessage, Command, Out, SubCommand, encode_params},
    parse::{ApiParse, ApiSave, put_struct},
    xdi::{Entity, Rc, Req, SigInd},
};

/// CONNECT_RESP reject value: ignore the call
const REJECT_IGNORE: u16 = 1;

/// Info number reported for a remote ALERTING message
const INFO_ALERTING: u16 = 0x8001;

/// B channel use requested in the additional info of CONNECT_REQ
#[derive(Debug, Clone, PartialEq, Eq)]
enum BChannel {
    /// Switched B channel, optionally with a channel identification
    Switched(Vec<u8>),
    /// No call control: D channel data or leased line channels
    Permanent(Vec<u8>),
}

fn b_channel_info(ai: &ApiParse<'_>, channels: u8) -> Result<BChannel, Info> {
    if ai.is_empty() {
        return Ok(BChannel::Switched(Vec::new()));
    }
    let aif = ai.parse("ssss").map_err(|_| Info::WrongMessageFormat)?;
    let bci = &aif[0];
    if bci.is_empty() {
        return Ok(BChannel::Switched(Vec::new()));
    }
    match bci.word() {
        0 | 2 => Ok(BChannel::Switched(Vec::new())),
        1 => Ok(BChannel::Permanent(Vec::new())),
        3 => {
            let f = bci.parse("ws").map_err(|_| Info::WrongMessageFormat)?;
            if f[1].is_empty() {
                return Err(Info::WrongMessageFormat);
            }
            Ok(BChannel::Switched(f[1].info.to_vec()))
        }
        4 => {
            let f = bci.parse("ws").map_err(|_| Info::WrongMessageFormat)?;
            let chs: Vec<u8> = f[1]
                .info
                .iter()
                .enumerate()
                .flat_map(|(i, byte)| (0..8).filter(move |b| byte & (1 << b) != 0).map(move |b| (i * 8 + b) as u8))
                .collect();
            if chs.is_empty() || chs.iter().any(|&ch| ch == 0 || ch > channels) {
                return Err(Info::WrongMessageFormat);
            }
            Ok(BChannel::Permanent(chs))
        }
        _ => Err(Info::WrongMessageFormat),
    }
}

/// Q.931 cause for a CONNECT_RESP reject value
fn reject_cause(reject: u16) -> u8 {
    match reject {
        3 => 17,
        4 => 44,
        5 => 29,
        6 => 6,
        7 => 88,
        8 => 27,
        r if r & 0xFF00 == 0x3400 => (r & 0x7F) as u8,
        _ => 16,
    }
}

fn cip_match(mask: u32, cip: u16) -> bool {
    mask & 1 != 0 || (cip < 32 && mask & (1 << cip) != 0)
}

fn additional_ies(ai: &ApiParse<'_>) -> IeWriter {
    let aif = ai.parse("ssss").unwrap_or_default();
    let get = |i: usize| aif.get(i).map(|a| a.info).unwrap_or(&[]);
    IeWriter::new()
        .add(ie::KEY, get(1))
        .add(ie::UUI, get(2))
        .add(ie::FTY, get(3))
}

impl Adapter {
    pub(crate) fn connect_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        if !self.profile.enabled {
            log::warn!("CONNECT_REQ on disabled controller {}", self.controller);
            self.send_conf(c.appl, Command::Connect, c.id, c.number, Info::L1Error);
            return Dispatch::Done;
        }
        let reuse = Some(c.plci).filter(|&p| {
            p != 0 && {
                let pl = self.pl(p);
                pl.appl == Some(c.appl) && matches!(pl.state, PlciState::Idle | PlciState::AdvVoiceNoSig)
            }
        });
        let Some(p) = reuse.or_else(|| self.get_plci()) else {
            log::warn!("CONNECT_REQ appl {}: out of PLCI", c.appl);
            self.send_conf(c.appl, Command::Connect, c.id, c.number, Info::OutOfPlci);
            return Dispatch::Done;
        };
        let pl = self.pl_mut(p);
        let prev_state = pl.state;
        pl.appl = Some(c.appl);
        pl.command = Some((Command::Connect, SubCommand::Req));
        pl.cmd_appl = c.appl;
        pl.number = c.number;
        if pl.tel == Tel::AdvVoice && !self.codec_ready() {
            log::debug!("plci {p}: CONNECT_REQ waits for the codec");
            self.pl_mut(p).spoofed = Some(SpoofedMsg {
                appl: c.appl,
                header: c.msg.header,
                saved: ApiSave::save(parms, "wsssssssss"),
            });
            self.start_internal_command(appls, p, CommandFn::CodecWait);
            return Dispatch::Done;
        }
        match self.connect_req_start(parms, p, reuse.is_some()) {
            Ok(()) => Dispatch::SendReq(p),
            Err(info) => {
                log::debug!("plci {p}: CONNECT_REQ failed {info:?}");
                let id = self.id(p, 0);
                self.send_conf(c.appl, Command::Connect, id, c.number, info);
                self.sendf(c.appl, Command::Disconnect, SubCommand::Ind, id, 0, &[Out::W(info.into())]);
                self.pl_mut(p).req_ring.clear();
                if reuse.is_none() {
                    self.plci_remove(appls, p);
                } else {
                    self.pl_mut(p).state = prev_state;
                }
                Dispatch::ResetReq(p)
            }
        }
    }

    fn connect_req_start(&mut self, parms: &[ApiParse<'_>], p: u8, reused: bool) -> Result<(), Info> {
        let bprot = BProtocol::from_parms(&parms[5], &self.profile)?;
        let b = b_channel_info(&parms[9], self.profile.channels)?;
        let cip = parms[0].word();
        match b {
            BChannel::Permanent(chs) => {
                let mut data = bprot.assign_data();
                data.extend(IeWriter::new().add(ie::CHI, &chs).into_bytes());
                let pl = self.pl_mut(p);
                pl.bprot = bprot;
                pl.cip = cip;
                pl.sig_none = true;
                pl.state = PlciState::LocalConnect;
                self.push_req(p, Entity::Nl, Req::Assign, 0, 0, data, Origin::Command);
            }
            BChannel::Switched(chi) => {
                let bc = match parms[6].is_empty() {
                    false => parms[6].info,
                    true => ie::cip_bc(cip, self.profile.u_law).ok_or(Info::CipNotSupported)?,
                };
                let hlc = match parms[8].is_empty() {
                    false => parms[8].info,
                    true => ie::cip_hlc(cip).unwrap_or(&[]),
                };
                let ies = additional_ies(&parms[9])
                    .add(ie::CPN, parms[1].info)
                    .add(ie::OAD, parms[2].info)
                    .add(ie::DSA, parms[3].info)
                    .add(ie::OSA, parms[4].info)
                    .add(ie::BC, bc)
                    .add(ie::LLC, parms[7].info)
                    .add(ie::HLC, hlc)
                    .add(ie::CHI, &chi)
                    .into_bytes();
                let pl = self.pl_mut(p);
                pl.bprot = bprot;
                pl.cip = cip;
                pl.state = PlciState::OutgConPending;
                if reused && pl.sig.is_live() {
                    let id = self.id(p, 0);
                    self.conf_to_cmd(p, Command::Connect, id, Info::Success);
                } else {
                    self.sig_req(p, Req::Assign, Vec::new(), Origin::Command);
                }
                self.sig_req(p, Req::CallReq, ies, Origin::Command);
            }
        }
        Ok(())
    }

    pub(crate) fn connect_req_rc(&mut self, appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        let id = self.id(p, 0);
        match (req.req, req.entity) {
            (Req::Assign, Entity::Sig) if rc.is_ok() => self.conf_to_cmd(p, Command::Connect, id, Info::Success),
            (Req::Assign, Entity::Sig) => {
                self.conf_to_cmd(p, Command::Connect, id, Info::OutOfPlci);
                self.pl_mut(p).appl = None;
                self.plci_remove(appls, p);
            }
            (Req::CallReq, _) if !rc.is_ok() => {
                self.ind_to_owner(p, Command::Disconnect, id, &[Out::W(Info::L3Error.into())]);
                self.pl_mut(p).state = PlciState::IncDisPending;
            }
            (Req::Assign, Entity::Nl) if rc.is_ok() => {
                self.conf_to_cmd(p, Command::Connect, id, Info::Success);
                self.pl_mut(p).state = PlciState::Connected;
                self.ind_to_owner(p, Command::ConnectActive, id, &[Out::S(&[]), Out::S(&[]), Out::S(&[])]);
            }
            (Req::Assign, Entity::Nl) => {
                self.conf_to_cmd(p, Command::Connect, id, Info::L1Error);
                self.pl_mut(p).appl = None;
                self.plci_remove(appls, p);
            }
            _ => {}
        }
    }

    pub(crate) fn connect_res(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let p = c.plci;
        if p == 0 {
            log::debug!("CONNECT_RESP appl {} for unknown plci", c.appl);
            return Dispatch::Done;
        }
        let pl = self.pl_mut(p);
        if !matches!(
            pl.state,
            PlciState::IncConPending | PlciState::IncConAlert | PlciState::IncConConnectedAlert
        ) || !pl.c_ind_mask.test(c.appl)
        {
            log::debug!("plci {p}: CONNECT_RESP from appl {} ignored in {}", c.appl, pl.state);
            return Dispatch::Done;
        }
        pl.c_ind_mask.clear(c.appl);
        let id = self.id(p, 0);
        let mut reject = parms[0].word();
        let bprot = if reject == 0 {
            BProtocol::from_parms(&parms[1], &self.profile).unwrap_or_else(|info| {
                log::warn!("plci {p}: CONNECT_RESP B protocol rejected {info:?}");
                reject = 0x3400 | 88;
                BProtocol::default()
            })
        } else {
            BProtocol::default()
        };
        if reject != 0 {
            if !self.pl(p).c_ind_mask.is_empty() {
                let info: u16 = Info::OtherApplConnected.into();
                self.sendf(c.appl, Command::Disconnect, SubCommand::Ind, id, 0, &[Out::W(info)]);
                return Dispatch::Done;
            }
            let pl = self.pl_mut(p);
            pl.appl = Some(c.appl);
            pl.state = PlciState::OutgDisPending;
            if reject == REJECT_IGNORE {
                self.sig_req(p, Req::Reject, Vec::new(), Origin::Command);
            } else {
                let cau = IeWriter::new().add(ie::CAU, &[0x80, 0x80 | reject_cause(reject)]).into_bytes();
                self.sig_req(p, Req::Hangup, cau, Origin::Command);
            }
            return Dispatch::SendReq(p);
        }
        let losers: Vec<u16> = self.pl(p).c_ind_mask.iter().collect();
        for appl in losers {
            let info: u16 = Info::OtherApplConnected.into();
            self.sendf(appl, Command::Disconnect, SubCommand::Ind, id, 0, &[Out::W(info)]);
        }
        let pl = self.pl_mut(p);
        pl.c_ind_mask.clear_all();
        pl.appl = Some(c.appl);
        pl.bprot = bprot;
        pl.state = PlciState::IncConAccept;
        let ies = additional_ies(&parms[5])
            .add(ie::CONN_NR, parms[2].info)
            .add(ie::CONN_SA, parms[3].info)
            .add(ie::LLC, parms[4].info)
            .into_bytes();
        self.sig_req(p, Req::CallRes, ies, Origin::Command);
        Dispatch::SendReq(p)
    }

    pub(crate) fn connect_res_rc(&mut self, _appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        match req.req {
            Req::Reject | Req::Hangup => self.report_disconnect(p, 0),
            Req::CallRes if !rc.is_ok() => self.report_disconnect(p, Info::L3Error.into()),
            _ => {}
        }
    }

    pub(crate) fn disconnect_req(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>, _parms: &[ApiParse<'_>]) -> Dispatch {
        let p = c.plci;
        if p == 0 {
            self.send_conf(c.appl, Command::Disconnect, c.id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        }
        let id = self.id(p, 0);
        let pl = self.pl(p);
        let offered = pl.appl.is_none() && pl.c_ind_mask.test(c.appl);
        let (state, sig_none, sig_live) = (pl.state, pl.sig_none, pl.sig.is_live());
        if !offered && pl.appl != Some(c.appl) {
            self.send_conf(c.appl, Command::Disconnect, id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        }
        match state {
            PlciState::IncConPending | PlciState::IncConAlert | PlciState::IncConConnectedAlert if offered => {
                let pl = self.pl_mut(p);
                pl.c_ind_mask.clear(c.appl);
                let others: Vec<u16> = pl.c_ind_mask.iter().collect();
                pl.c_ind_mask.clear_all();
                pl.appl = Some(c.appl);
                pl.state = PlciState::OutgDisPending;
                for appl in others {
                    self.sendf(appl, Command::Disconnect, SubCommand::Ind, id, 0, &[Out::W(0)]);
                }
                self.sig_req(p, Req::Hangup, Vec::new(), Origin::Command);
            }
            PlciState::OutgDisPending | PlciState::IncDisPending | PlciState::Idle | PlciState::Listening => {
                self.send_conf(c.appl, Command::Disconnect, id, c.number, Info::WrongState);
                return Dispatch::Done;
            }
            _ if sig_none => {
                self.pl_mut(p).state = PlciState::OutgDisPending;
                self.push_req(p, Entity::Nl, Req::Remove, 0, 0, Vec::new(), Origin::Command);
            }
            _ if sig_live => {
                self.pl_mut(p).state = PlciState::OutgDisPending;
                self.sig_req(p, Req::Hangup, Vec::new(), Origin::Command);
            }
            _ => {
                self.send_conf(c.appl, Command::Disconnect, id, c.number, Info::WrongState);
                return Dispatch::Done;
            }
        }
        self.send_conf(c.appl, Command::Disconnect, id, c.number, Info::Success);
        Dispatch::SendReq(p)
    }

    pub(crate) fn disconnect_req_rc(&mut self, _appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        match (req.req, req.entity) {
            (Req::Remove, Entity::Nl) => self.report_disconnect(p, 0),
            (Req::Hangup, _) if !rc.is_ok() => self.report_disconnect(p, 0),
            _ => {}
        }
    }

    pub(crate) fn disconnect_res(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>) -> Dispatch {
        let p = c.plci;
        if p == 0 {
            return Dispatch::Done;
        }
        let pl = self.pl_mut(p);
        let member = pl.c_ind_mask.test(c.appl);
        pl.c_ind_mask.clear(c.appl);
        if !member && pl.appl != Some(c.appl) {
            return Dispatch::Done;
        }
        if matches!(pl.state, PlciState::IncDisPending | PlciState::OutgDisPending) && pl.c_ind_mask.is_empty() {
            if pl.channels == 0 {
                self.plci_remove(appls, p);
            } else {
                pl.release_after_b3 = true;
            }
        }
        Dispatch::Done
    }

    /// DISCONNECT_B3_IND for every open NCCI, then DISCONNECT_IND to the owner
    pub(crate) fn report_disconnect(&mut self, p: u8, reason: u16) {
        let b3_reason = self.b3_disc_reason(p, 0);
        for ncci in self.ncci.ring(self.pl(p).ncci_ring_list) {
            self.disconnect_b3_ind(p, ncci, b3_reason, &[]);
        }
        let id = self.id(p, 0);
        self.ind_to_owner(p, Command::Disconnect, id, &[Out::W(reason)]);
        self.pl_mut(p).state = PlciState::IncDisPending;
    }

    pub(crate) fn listen_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let Some(l) = self.listen.get_mut(c.appl as usize) else {
            self.send_conf(c.appl, Command::Listen, c.id, c.number, Info::IllegalApplication);
            return Dispatch::Done;
        };
        l.info_mask = parms[0].dword();
        l.cip_mask = parms[1].dword();
        l.cip_mask2 = parms[2].dword();
        log::debug!(
            "listen appl {} info {:08x} cip {:08x}",
            c.appl,
            l.info_mask,
            l.cip_mask
        );
        let info = self.listen_check(appls);
        self.send_conf(c.appl, Command::Listen, c.id & 0x7F, c.number, info);
        Dispatch::Done
    }

    /// Keeps one listening signaling entity assigned while any application listens
    pub(crate) fn listen_check(&mut self, appls: &mut ApplTable) -> Info {
        let listening = self.listen.iter().any(|l| l.cip_mask != 0 || l.cip_mask2 != 0);
        if listening && self.listen_plci == 0 {
            let Some(p) = self.get_plci() else {
                log::warn!("controller {}: no PLCI left to listen on", self.controller);
                return Info::OutOfListen;
            };
            self.listen_plci = p;
            self.pl_mut(p).state = PlciState::Listening;
            self.sig_req(p, Req::Assign, Vec::new(), Origin::Unsolicited);
            self.send_req(p);
        } else if !listening && self.listen_plci != 0 {
            let p = self.listen_plci;
            self.listen_plci = 0;
            self.plci_remove(appls, p);
        }
        Info::Success
    }

    pub(crate) fn alert_req(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let p = c.plci;
        if p == 0 {
            self.send_conf(c.appl, Command::Alert, c.id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        }
        let id = self.id(p, 0);
        let pl = self.pl(p);
        let offered = pl.c_ind_mask.test(c.appl);
        let info = match pl.state {
            _ if !offered => Info::WrongIdentifier,
            PlciState::IncConPending => {
                let early_b = parms[0]
                    .parse("ssss")
                    .ok()
                    .and_then(|f| f.first().filter(|b| !b.is_empty()).map(|b| b.word() == 0))
                    .unwrap_or(false);
                self.pl_mut(p).state = if early_b {
                    PlciState::IncConConnectedAlert
                } else {
                    PlciState::IncConAlert
                };
                let ies = additional_ies(&parms[0]).into_bytes();
                self.sig_req(p, Req::CallAlert, ies, Origin::Command);
                return Dispatch::SendReq(p);
            }
            PlciState::IncConAlert | PlciState::IncConConnectedAlert => Info::AlertIgnored,
            _ => Info::WrongState,
        };
        self.send_conf(c.appl, Command::Alert, id, c.number, info);
        Dispatch::Done
    }

    pub(crate) fn alert_req_rc(&mut self, _appls: &mut ApplTable, p: u8, _req: &PendingReq, rc: Rc) {
        let id = self.id(p, 0);
        if rc.is_ok() {
            self.conf_to_cmd(p, Command::Alert, id, Info::Success);
        } else {
            self.pl_mut(p).state = PlciState::IncConPending;
            self.conf_to_cmd(p, Command::Alert, id, Info::WrongState);
        }
    }

    pub(crate) fn info_req(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let p = c.plci;
        if p == 0 {
            self.send_conf(c.appl, Command::Info, c.id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        }
        let id = self.id(p, 0);
        let pl = self.pl(p);
        if pl.appl != Some(c.appl) && !pl.c_ind_mask.test(c.appl) {
            self.send_conf(c.appl, Command::Info, id, c.number, Info::WrongIdentifier);
            return Dispatch::Done;
        }
        if !pl.sig.is_live() || pl.sig_none {
            self.send_conf(c.appl, Command::Info, id, c.number, Info::WrongState);
            return Dispatch::Done;
        }
        let ies = additional_ies(&parms[1]).add(ie::CPN, parms[0].info).into_bytes();
        self.sig_req(p, Req::InfoReq, ies, Origin::Command);
        Dispatch::SendReq(p)
    }

    pub(crate) fn info_req_rc(&mut self, _appls: &mut ApplTable, p: u8, _req: &PendingReq, rc: Rc) {
        let id = self.id(p, 0);
        let info = if rc.is_ok() { Info::Success } else { Info::WrongState };
        self.conf_to_cmd(p, Command::Info, id, info);
    }

    /// Signaling indication on `p`
    pub(crate) fn sig_ind(&mut self, appls: &mut ApplTable, p: u8, ind: SigInd) {
        let state = self.pl(p).state;
        log::debug!("sig_ind plci {p} in {state}: {ind:?}");
        match ind {
            SigInd::Indicate { ies } => self.indicate_ind(appls, p, &ies),
            SigInd::CallCon { ies } if state == PlciState::OutgConPending => self.call_connected(appls, p, &ies),
            SigInd::CallInd { ies }
                if matches!(state, PlciState::IncConAccept | PlciState::IncConConnectedAlert) =>
            {
                self.call_connected(appls, p, &ies)
            }
            SigInd::CallCon { .. } | SigInd::CallInd { .. } => {
                log::warn!("plci {p}: call connected in {state}, ignored");
            }
            SigInd::Alert { ies } => {
                self.info_forward(p, INFO_ALERTING, &[], ie::info_mask_bit(ie::PI));
                self.info_ind(p, &ies);
            }
            SigInd::Hangup { ies } => self.hangup_ind(appls, p, &ies),
            SigInd::Info { ies } => self.info_ind(p, &ies),
            other => self.supp_ind(appls, p, other),
        }
    }

    fn indicate_ind(&mut self, appls: &mut ApplTable, p: u8, ies: &[u8]) {
        if self.listen_plci == p {
            self.listen_plci = 0;
        }
        if self.pl(p).state != PlciState::Listening {
            log::warn!("plci {p}: incoming call on a PLCI that is not listening");
            return;
        }
        let find = |code| ie::find_ie(ies, code).unwrap_or(&[]);
        let cip = ie::find_cip(find(ie::BC), find(ie::HLC), self.profile.u_law);
        let mut ai = Vec::new();
        for code in [ie::CHI, ie::KEY, ie::UUI, ie::FTY] {
            put_struct(&mut ai, find(code));
        }
        let params = encode_params(&[
            Out::W(cip),
            Out::S(find(ie::CPN)),
            Out::S(find(ie::OAD)),
            Out::S(find(ie::DSA)),
            Out::S(find(ie::OSA)),
            Out::S(find(ie::BC)),
            Out::S(find(ie::LLC)),
            Out::S(find(ie::HLC)),
            Out::S(&ai),
            Out::S(&[]),
        ]);
        let pl = self.pl_mut(p);
        pl.cip = cip;
        pl.state = PlciState::IncConPending;
        pl.c_ind_mask.clear_all();
        let id = self.id(p, 0);
        let offered: Vec<u16> = appls
            .ids()
            .filter(|&a| self.listen.get(a as usize).is_some_and(|l| cip_match(l.cip_mask, cip)))
            .collect();
        for appl in offered {
            self.pl_mut(p).c_ind_mask.set(appl);
            let msg = CapiMessage::new(appl, Command::Connect, SubCommand::Ind, 0, id, params.clone());
            self.outbox.push(super::Outbound { appl, msg });
        }
        if self.pl(p).c_ind_mask.is_empty() {
            log::debug!("plci {p}: nobody listens for cip {cip}");
            self.plci_remove(appls, p);
        }
        self.listen_check(appls);
    }

    fn call_connected(&mut self, appls: &mut ApplTable, p: u8, ies: &[u8]) {
        let find = |code| ie::find_ie(ies, code).unwrap_or(&[]);
        let id = self.id(p, 0);
        self.pl_mut(p).state = PlciState::Connected;
        self.ind_to_owner(
            p,
            Command::ConnectActive,
            id,
            &[Out::S(find(ie::CONN_NR)), Out::S(find(ie::CONN_SA)), Out::S(find(ie::LLC))],
        );
        if !self.pl(p).nl.is_live() {
            let data = self.pl(p).bprot.assign_data();
            self.push_req(p, Entity::Nl, Req::Assign, 0, 0, data, Origin::Unsolicited);
        }
        if self.pl(p).tel == Tel::AdvVoice {
            self.start_internal_command(appls, p, CommandFn::AdvVoice);
        }
    }

    fn hangup_ind(&mut self, appls: &mut ApplTable, p: u8, ies: &[u8]) {
        let cause = ie::find_ie(ies, ie::CAU).map(ie::cause_value).unwrap_or(0);
        let reason: u16 = if cause != 0 { Info::NetworkCause(cause).into() } else { 0 };
        let pl = self.pl(p);
        let id = self.id(p, 0);
        let owner = pl.appl;
        let offered: Vec<u16> = pl.c_ind_mask.iter().collect();
        match pl.state {
            PlciState::IncDisPending => {
                if owner.is_none() && offered.is_empty() {
                    self.plci_remove(appls, p);
                }
            }
            PlciState::IncConPending | PlciState::IncConAlert | PlciState::IncConConnectedAlert
                if owner.is_none() =>
            {
                for appl in &offered {
                    self.sendf(*appl, Command::Disconnect, SubCommand::Ind, id, 0, &[Out::W(reason)]);
                }
                self.pl_mut(p).state = PlciState::IncDisPending;
                if offered.is_empty() {
                    self.plci_remove(appls, p);
                }
            }
            _ if owner.is_some() => self.report_disconnect(p, reason),
            _ => self.plci_remove(appls, p),
        }
    }

    fn info_ind(&mut self, p: u8, ies: &[u8]) {
        for (code, content) in ie::ies(ies) {
            let bit = ie::info_mask_bit(code);
            if bit != 0 {
                self.info_forward(p, code as u16, content, bit);
            }
        }
    }

    /// INFO_IND to the owner, or to every application offered the call, whose info
    /// mask has `bit`
    fn info_forward(&mut self, p: u8, number: u16, content: &[u8], bit: u32) {
        let pl = self.pl(p);
        let targets: Vec<u16> = match pl.appl {
            Some(a) => vec![a],
            None => pl.c_ind_mask.iter().collect(),
        };
        let id = self.id(p, 0);
        for appl in targets {
            if self.listen.get(appl as usize).is_some_and(|l| l.info_mask & bit != 0) {
                self.sendf(appl, Command::Info, SubCommand::Ind, id, 0, &[Out::W(number), Out::S(content)]);
            }
        }
    }
}

//! FACILITY_REQ selector dispatch and the supplementary services (selector 3)

use crate::{
    appl::ApplTable,
    capi::{Adapter, Dispatch, PlciState, SuppState, dispatch::MsgCtx, plci::{Origin, PendingReq}},
    config::{ApplOptions, ManufacturerFeatures},
    ie::{self, IeWriter},
    info::Info,
    message::{Command, Out, SubCommand, encode_params},
    parse::ApiParse,
    xdi::{Rc, Req, SigInd},
};

/// Facility selector: DTMF
pub const SELECTOR_DTMF: u16 = 1;
/// Facility selector: supplementary services
pub const SELECTOR_SU_SERV: u16 = 3;
/// Facility selector: line interconnect
pub const SELECTOR_LINE_INTERCONNECT: u16 = 5;
/// Facility selector: echo canceller
pub const SELECTOR_ECHO_CANCELLER: u16 = 8;
/// Private echo canceller selector accepted from applications using the private layout
pub const PRIV_SELECTOR_ECHO_CANCELLER: u16 = 0xFF;

const S_GET_SUPPORTED_SERVICES: u16 = 0;
const S_LISTEN: u16 = 1;
const S_HOLD: u16 = 2;
const S_RETRIEVE: u16 = 3;
const S_SUSPEND: u16 = 4;
const S_RESUME: u16 = 5;
const S_ECT: u16 = 6;
const S_3PTY_BEGIN: u16 = 7;
const S_3PTY_END: u16 = 8;

/// Service codes carried in S_SERVICE requests and their acknowledgements
const SERVICE_ECT: u8 = 1;
const SERVICE_3PTY_BEGIN: u8 = 2;
const SERVICE_3PTY_END: u8 = 3;

/// Hold/retrieve, terminal portability, ECT, three party
const SUPPORTED_SERVICES: u32 = 0x0000_000F;

/// Supplementary service parameter: function word and a struct carrying the result word
/// and function specific data
fn supp_param(function: u16, info: Info, extra: &[Out<'_>]) -> Vec<u8> {
    let mut inner = vec![Out::W(info.into())];
    inner.extend_from_slice(extra);
    let inner = encode_params(&inner);
    encode_params(&[Out::W(function), Out::S(&inner)])
}

fn service_function(service: u8) -> u16 {
    match service {
        SERVICE_ECT => S_ECT,
        SERVICE_3PTY_BEGIN => S_3PTY_BEGIN,
        _ => S_3PTY_END,
    }
}

impl Adapter {
    pub(crate) fn facility_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let selector = parms[0].word();
        let priv_ec = appls
            .get(c.appl)
            .is_some_and(|a| a.options.contains(ApplOptions::PRIV_EC_SPEC));
        match selector {
            SELECTOR_DTMF => self.dtmf_req(appls, c, &parms[1]),
            SELECTOR_SU_SERV => self.supp_req(appls, c, &parms[1]),
            SELECTOR_LINE_INTERCONNECT => self.mixer_req(appls, c, &parms[1]),
            SELECTOR_ECHO_CANCELLER => self.ec_req(appls, c, selector, &parms[1]),
            PRIV_SELECTOR_ECHO_CANCELLER if priv_ec => self.ec_req(appls, c, selector, &parms[1]),
            _ => {
                log::debug!("FACILITY_REQ appl {}: selector {selector} not supported", c.appl);
                self.facility_conf(c.appl, c.id, c.number, Info::FacilityNotSupported, selector, &[]);
                Dispatch::Done
            }
        }
    }

    /// FACILITY_CONF with the facility specific parameter struct
    pub(crate) fn facility_conf(&mut self, appl: u16, id: u32, number: u16, info: Info, selector: u16, param: &[u8]) {
        let info: u16 = info.into();
        self.sendf(appl, Command::Facility, SubCommand::Conf, id, number, &[Out::W(info), Out::W(selector), Out::S(param)]);
    }

    /// FACILITY_IND to the owner of `p`
    pub(crate) fn facility_ind(&mut self, p: u8, selector: u16, param: &[u8]) {
        let id = self.id(p, 0);
        self.ind_to_owner(p, Command::Facility, id, &[Out::W(selector), Out::S(param)]);
    }

    fn supp_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, param: &ApiParse<'_>) -> Dispatch {
        let Ok(f) = param.parse("ws") else {
            self.facility_conf(c.appl, c.id, c.number, Info::WrongMessageFormat, SELECTOR_SU_SERV, &[]);
            return Dispatch::Done;
        };
        let function = f[0].word();
        if !self.profile.features.contains(ManufacturerFeatures::SUPPLEMENTARY_SERVICES)
            && function != S_GET_SUPPORTED_SERVICES
        {
            let conf = supp_param(function, Info::SupplementaryServiceNotSupported, &[]);
            self.facility_conf(c.appl, c.id, c.number, Info::Success, SELECTOR_SU_SERV, &conf);
            return Dispatch::Done;
        }
        let (info, d) = match function {
            S_GET_SUPPORTED_SERVICES => {
                let services = if self.profile.features.contains(ManufacturerFeatures::SUPPLEMENTARY_SERVICES) {
                    SUPPORTED_SERVICES
                } else {
                    0
                };
                let conf = supp_param(function, Info::Success, &[Out::D(services)]);
                self.facility_conf(c.appl, c.id, c.number, Info::Success, SELECTOR_SU_SERV, &conf);
                return Dispatch::Done;
            }
            S_LISTEN => match (f[1].parse("d"), self.listen.get_mut(c.appl as usize)) {
                (Ok(mask), Some(l)) => {
                    l.notification_mask = mask[0].dword();
                    (Info::Success, Dispatch::Done)
                }
                _ => (Info::WrongMessageFormat, Dispatch::Done),
            },
            S_RESUME => self.resume_req(c, &f[1]),
            _ => self.supp_call_req(appls, c, function, &f[1]),
        };
        let conf = supp_param(function, info, &[]);
        let id = if c.plci != 0 { self.id(c.plci, 0) } else { c.id };
        self.facility_conf(c.appl, id, c.number, Info::Success, SELECTOR_SU_SERV, &conf);
        d
    }

    /// Services acting on an existing call of the requesting application
    fn supp_call_req(&mut self, _appls: &mut ApplTable, c: &MsgCtx<'_>, function: u16, param: &ApiParse<'_>) -> (Info, Dispatch) {
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) {
            return (Info::WrongIdentifier, Dispatch::Done);
        }
        let pl = self.pl(p);
        let (state, supp) = (pl.state, pl.supp_state);
        match function {
            S_HOLD if state == PlciState::Connected && supp == SuppState::Idle => {
                self.pl_mut(p).supp_state = SuppState::HoldRequest;
                self.sig_req(p, Req::CallHold, Vec::new(), Origin::Command);
            }
            S_RETRIEVE if supp == SuppState::CallHeld => {
                self.pl_mut(p).supp_state = SuppState::RetrieveRequest;
                self.sig_req(p, Req::CallRetrieve, Vec::new(), Origin::Command);
            }
            S_SUSPEND if state == PlciState::Connected && supp == SuppState::Idle => {
                let identity = param.parse("s").map(|f| f[0].info.to_vec()).unwrap_or_default();
                self.pl_mut(p).state = PlciState::Suspending;
                let data = IeWriter::new().add(ie::CAI, &identity).into_bytes();
                self.sig_req(p, Req::Suspend, data, Origin::Command);
            }
            S_ECT | S_3PTY_BEGIN => {
                let Ok(rp) = param.parse("d") else {
                    return (Info::WrongMessageFormat, Dispatch::Done);
                };
                let related = ((rp[0].dword() >> 8) & 0xFF) as u8;
                if !self.valid_plci(related) || related == p || self.pl(related).appl != Some(c.appl) {
                    return (Info::WrongIdentifier, Dispatch::Done);
                }
                if supp != SuppState::Idle && supp != SuppState::CallHeld {
                    return (Info::RequestNotAllowedInThisState, Dispatch::Done);
                }
                let service = if function == S_ECT { SERVICE_ECT } else { SERVICE_3PTY_BEGIN };
                let pl = self.pl_mut(p);
                pl.related_pty = related;
                pl.supp_state = SuppState::PtyRequest;
                self.sig_req(p, Req::SService, vec![service, related], Origin::Command);
            }
            S_3PTY_END if supp == SuppState::Conference => {
                self.pl_mut(p).supp_state = SuppState::PtyRequest;
                self.sig_req(p, Req::SService, vec![SERVICE_3PTY_END], Origin::Command);
            }
            S_HOLD | S_RETRIEVE | S_SUSPEND | S_3PTY_END => {
                return (Info::RequestNotAllowedInThisState, Dispatch::Done);
            }
            _ => return (Info::SupplementaryServiceNotSupported, Dispatch::Done),
        }
        (Info::Success, Dispatch::SendReq(p))
    }

    /// Resume brings a suspended call back on a new PLCI
    fn resume_req(&mut self, c: &MsgCtx<'_>, param: &ApiParse<'_>) -> (Info, Dispatch) {
        let Some(p) = self.get_plci() else {
            return (Info::OutOfPlci, Dispatch::Done);
        };
        let identity = param.parse("s").map(|f| f[0].info.to_vec()).unwrap_or_default();
        let pl = self.pl_mut(p);
        pl.appl = Some(c.appl);
        pl.state = PlciState::Resuming;
        pl.command = Some((Command::Facility, SubCommand::Req));
        pl.cmd_appl = c.appl;
        pl.number = c.number;
        self.sig_req(p, Req::Assign, Vec::new(), Origin::Command);
        let data = IeWriter::new().add(ie::CAI, &identity).into_bytes();
        self.sig_req(p, Req::Resume, data, Origin::Command);
        (Info::Success, Dispatch::SendReq(p))
    }

    /// Adapter refused a supplementary service request: report it and restore the state
    pub(crate) fn facility_req_rc(&mut self, appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        if rc.is_ok() {
            return;
        }
        let pl = self.pl_mut(p);
        let function = match req.req {
            Req::CallHold => {
                pl.supp_state = SuppState::Idle;
                S_HOLD
            }
            Req::CallRetrieve => {
                pl.supp_state = SuppState::CallHeld;
                S_RETRIEVE
            }
            Req::Suspend => {
                pl.state = PlciState::Connected;
                S_SUSPEND
            }
            Req::Assign | Req::Resume => {
                let ind = supp_param(S_RESUME, Info::OutOfPlci, &[]);
                self.facility_ind(p, SELECTOR_SU_SERV, &ind);
                self.plci_remove(appls, p);
                return;
            }
            Req::SService => {
                let service = req.data.first().copied().unwrap_or(0);
                if service == SERVICE_3PTY_END {
                    pl.supp_state = SuppState::Conference;
                } else {
                    pl.supp_state = SuppState::Idle;
                    pl.related_pty = 0;
                }
                service_function(service)
            }
            _ => return,
        };
        let ind = supp_param(function, Info::L3Error, &[]);
        self.facility_ind(p, SELECTOR_SU_SERV, &ind);
    }

    /// Supplementary service indications
    pub(crate) fn supp_ind(&mut self, appls: &mut ApplTable, p: u8, ind: SigInd) {
        let cause_info = |cause: u8| Info::NetworkCause(cause);
        let (function, info) = match ind {
            SigInd::HoldAck => {
                self.pl_mut(p).supp_state = SuppState::CallHeld;
                (S_HOLD, Info::Success)
            }
            SigInd::HoldRej { cause } => {
                self.pl_mut(p).supp_state = SuppState::Idle;
                (S_HOLD, cause_info(cause))
            }
            SigInd::RetrieveAck => {
                self.pl_mut(p).supp_state = SuppState::Idle;
                (S_RETRIEVE, Info::Success)
            }
            SigInd::RetrieveRej { cause } => {
                self.pl_mut(p).supp_state = SuppState::CallHeld;
                (S_RETRIEVE, cause_info(cause))
            }
            SigInd::SuspendAck => {
                let ind = supp_param(S_SUSPEND, Info::Success, &[]);
                self.facility_ind(p, SELECTOR_SU_SERV, &ind);
                self.report_disconnect(p, 0);
                return;
            }
            SigInd::SuspendRej { cause } => {
                self.pl_mut(p).state = PlciState::Connected;
                (S_SUSPEND, cause_info(cause))
            }
            SigInd::ResumeAck { ies } => {
                let ind = supp_param(S_RESUME, Info::Success, &[]);
                self.facility_ind(p, SELECTOR_SU_SERV, &ind);
                self.pl_mut(p).state = PlciState::OutgConPending;
                self.sig_ind(appls, p, SigInd::CallCon { ies });
                return;
            }
            SigInd::ResumeRej { cause } => {
                let ind = supp_param(S_RESUME, cause_info(cause), &[]);
                self.facility_ind(p, SELECTOR_SU_SERV, &ind);
                self.plci_remove(appls, p);
                return;
            }
            SigInd::SServiceAck { service } => {
                let pl = self.pl_mut(p);
                pl.supp_state = if service == SERVICE_3PTY_BEGIN {
                    SuppState::Conference
                } else {
                    SuppState::Idle
                };
                if service != SERVICE_3PTY_BEGIN {
                    pl.related_pty = 0;
                }
                (service_function(service), Info::Success)
            }
            SigInd::SServiceRej { service, cause } => {
                let pl = self.pl_mut(p);
                if service == SERVICE_3PTY_END {
                    pl.supp_state = SuppState::Conference;
                } else {
                    pl.supp_state = SuppState::Idle;
                    pl.related_pty = 0;
                }
                (service_function(service), cause_info(cause))
            }
            other => {
                log::warn!("plci {p}: unhandled signaling indication {other:?}");
                return;
            }
        };
        let ind = supp_param(function, info, &[]);
        self.facility_ind(p, SELECTOR_SU_SERV, &ind);
    }
}

#[cfg(test)]
pub mod facility_test {
    use super::*;
    use crate::config::{AdapterProfile, EngineConfig};

    #[test]
    fn test_supp_param_layout() {
        assert_eq!(supp_param(S_HOLD, Info::Success, &[]), vec![2, 0, 2, 0, 0]);
        assert_eq!(
            supp_param(S_GET_SUPPORTED_SERVICES, Info::Success, &[Out::D(SUPPORTED_SERVICES)]),
            vec![0, 0, 6, 0, 0, 0x0F, 0, 0, 0]
        );
    }

    #[test]
    fn test_hold_ack_and_reject() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        let p = a.get_plci().unwrap();
        a.pl_mut(p).appl = Some(1);
        a.pl_mut(p).supp_state = SuppState::HoldRequest;
        a.supp_ind(&mut appls, p, SigInd::HoldAck);
        assert_eq!(a.pl(p).supp_state, SuppState::CallHeld);
        a.pl_mut(p).supp_state = SuppState::RetrieveRequest;
        a.supp_ind(&mut appls, p, SigInd::RetrieveRej { cause: 0x1F });
        assert_eq!(a.pl(p).supp_state, SuppState::CallHeld);
        assert_eq!(a.outbox.len(), 2);
        // the failed retrieve carries the network cause
        let last = &a.outbox[1].msg.params;
        assert_eq!(last[..2], [SELECTOR_SU_SERV as u8, 0]);
        assert_eq!(crate::get_word(&last[6..]), u16::from(Info::NetworkCause(0x1F)));
    }

    #[test]
    fn test_three_party_conference() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        let p = a.get_plci().unwrap();
        a.pl_mut(p).appl = Some(1);
        a.pl_mut(p).related_pty = 2;
        a.supp_ind(&mut appls, p, SigInd::SServiceAck { service: SERVICE_3PTY_BEGIN });
        assert_eq!(a.pl(p).supp_state, SuppState::Conference);
        assert_eq!(a.pl(p).related_pty, 2);
        a.supp_ind(&mut appls, p, SigInd::SServiceAck { service: SERVICE_3PTY_END });
        assert_eq!(a.pl(p).supp_state, SuppState::Idle);
        assert_eq!(a.pl(p).related_pty, 0);
    }
}

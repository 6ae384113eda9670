//! DTMF facility (selector 1): tone detection and generation on the B channel DSP,
//! plus routing of DSP user data indications

use crate::{
    appl::ApplTable,
    capi::{Adapter, Dispatch, PlciState, dispatch::MsgCtx, facility::SELECTOR_DTMF, plci::{CommandFn, Origin}},
    config::{B1Facilities, ManufacturerFeatures},
    info::Info,
    message::{Out, encode_params},
    parse::ApiParse,
    xdi::Rc,
};

/// DTMF function: start forwarding detected digits
pub const DTMF_LISTEN_START: u16 = 1;
/// DTMF function: stop forwarding detected digits
pub const DTMF_LISTEN_STOP: u16 = 2;
/// DTMF function: send digits
pub const DTMF_SEND_DIGITS: u16 = 3;

/// DTMF result words in the FACILITY_CONF parameter
const DTMF_SUCCESS: u16 = 0;
const DTMF_INCORRECT_DIGIT: u16 = 1;
const DTMF_UNKNOWN_REQUEST: u16 = 2;

const DTMF_DEFAULT_TONE_MS: u16 = 40;
const DTMF_DEFAULT_GAP_MS: u16 = 40;

/// DSP parameter block codes
pub(crate) const DSP_DTMF_LISTEN_START: u8 = 0x01;
pub(crate) const DSP_DTMF_LISTEN_STOP: u8 = 0x02;
pub(crate) const DSP_DTMF_SEND_DIGITS: u8 = 0x03;

/// User data indication codes from the DSP
pub(crate) const UDATA_DTMF_DIGITS: u8 = 0x10;
pub(crate) const UDATA_EC_EVENT: u8 = 0x11;
pub(crate) const UDATA_MIXER_EVENT: u8 = 0x12;

const DTMF_RESOURCE: u16 = 1;
const DTMF_WRITE: u16 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DtmfState {
    /// Detected digits are forwarded to the owner
    pub(crate) listen_active: bool,
    /// Function of the request being carried out
    pub(crate) function: u16,
    pub(crate) tone_ms: u16,
    pub(crate) gap_ms: u16,
    pub(crate) digits: Vec<u8>,
}

/// Digits the DSP can generate
pub(crate) fn dtmf_digit_valid(d: u8) -> bool {
    matches!(d, b'0'..=b'9' | b'*' | b'#' | b'A'..=b'D' | b'a'..=b'd')
}

impl Adapter {
    pub(crate) fn dtmf_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, param: &ApiParse<'_>) -> Dispatch {
        let Ok(f) = param.parse("w") else {
            self.facility_conf(c.appl, c.id, c.number, Info::WrongMessageFormat, SELECTOR_DTMF, &[]);
            return Dispatch::Done;
        };
        let function = f[0].word();
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) {
            self.facility_conf(c.appl, c.id, c.number, Info::WrongIdentifier, SELECTOR_DTMF, &[]);
            return Dispatch::Done;
        }
        let id = self.id(p, 0);
        let features = self.profile.features;
        let supported = match function {
            DTMF_LISTEN_START | DTMF_LISTEN_STOP => {
                features.intersects(ManufacturerFeatures::HARDDTMF | ManufacturerFeatures::SOFTDTMF_RECEIVE)
            }
            DTMF_SEND_DIGITS => {
                features.intersects(ManufacturerFeatures::DTMF_TONE | ManufacturerFeatures::SOFTDTMF_SEND)
            }
            _ => {
                let conf = encode_params(&[Out::W(DTMF_UNKNOWN_REQUEST)]);
                self.facility_conf(c.appl, id, c.number, Info::Success, SELECTOR_DTMF, &conf);
                return Dispatch::Done;
            }
        };
        if !supported {
            self.facility_conf(c.appl, id, c.number, Info::FacilityNotSupported, SELECTOR_DTMF, &[]);
            return Dispatch::Done;
        }
        if !matches!(self.pl(p).state, PlciState::Connected | PlciState::IncConConnectedAlert) {
            self.facility_conf(c.appl, id, c.number, Info::WrongState, SELECTOR_DTMF, &[]);
            return Dispatch::Done;
        }
        // tone and gap durations and the digits are optional
        let full = param.parse("wwws").ok();
        let word = |i: usize, default: u16| match full.as_ref().map(|f| f[i].word()) {
            Some(0) | None => default,
            Some(v) => v,
        };
        let (tone_ms, gap_ms) = (word(1, DTMF_DEFAULT_TONE_MS), word(2, DTMF_DEFAULT_GAP_MS));
        let digits = full.as_ref().map(|f| f[3].info.to_vec()).unwrap_or_default();
        if function == DTMF_SEND_DIGITS && !digits.iter().all(|d| dtmf_digit_valid(*d)) {
            let conf = encode_params(&[Out::W(DTMF_INCORRECT_DIGIT)]);
            self.facility_conf(c.appl, id, c.number, Info::Success, SELECTOR_DTMF, &conf);
            return Dispatch::Done;
        }
        let dtmf = &mut self.pl_mut(p).dtmf;
        dtmf.function = function;
        dtmf.tone_ms = tone_ms;
        dtmf.gap_ms = gap_ms;
        dtmf.digits = digits;
        self.start_internal_command(appls, p, CommandFn::Dtmf);
        Dispatch::SendReq(p)
    }

    fn dtmf_conf(&mut self, p: u8, info: Info, result: u16) {
        let (appl, number) = (self.pl(p).cmd_appl, self.pl(p).number);
        let id = self.id(p, 0);
        let conf = encode_params(&[Out::W(result)]);
        self.facility_conf(appl, id, number, info, SELECTOR_DTMF, &conf);
    }

    /// Adds or drops the DTMF DSP resources, then hands the request to the DSP
    pub(crate) fn dtmf_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let step = std::mem::take(&mut self.pl_mut(p).internal_command);
        log::debug!("dtmf_command plci {p} step {step} {rc:?}");
        let function = self.pl(p).dtmf.function;
        match step {
            0 => {
                let mut want = self.pl(p).b1_facilities;
                match function {
                    DTMF_LISTEN_START => want.insert(B1Facilities::DTMFR),
                    DTMF_LISTEN_STOP => want.remove(B1Facilities::DTMFR),
                    _ => want.insert(B1Facilities::DTMFX),
                }
                if self.adjust_b1_facilities(p, want) {
                    self.pl_mut(p).internal_command = DTMF_RESOURCE;
                    return;
                }
            }
            DTMF_RESOURCE => {
                if !self.b1_resource_rc(p, rc) {
                    self.dtmf_conf(p, Info::FacilityNotSupported, DTMF_SUCCESS);
                    self.next_internal_command(appls, p);
                    return;
                }
            }
            _ => {
                if rc.is_ok() {
                    match function {
                        DTMF_LISTEN_START => self.pl_mut(p).dtmf.listen_active = true,
                        DTMF_LISTEN_STOP => self.pl_mut(p).dtmf.listen_active = false,
                        _ => {}
                    }
                    self.dtmf_conf(p, Info::Success, DTMF_SUCCESS);
                } else {
                    self.dtmf_conf(p, Info::FacilityNotSupported, DTMF_SUCCESS);
                }
                self.next_internal_command(appls, p);
                return;
            }
        }
        let d = &self.pl(p).dtmf;
        let code = match function {
            DTMF_LISTEN_START => DSP_DTMF_LISTEN_START,
            DTMF_LISTEN_STOP => DSP_DTMF_LISTEN_STOP,
            _ => DSP_DTMF_SEND_DIGITS,
        };
        let mut data = vec![code];
        data.extend_from_slice(&d.tone_ms.to_le_bytes());
        data.extend_from_slice(&d.gap_ms.to_le_bytes());
        data.extend_from_slice(&d.digits);
        if self.dsp_req(p, data, Origin::Internal) {
            self.pl_mut(p).internal_command = DTMF_WRITE;
        } else {
            self.dtmf_conf(p, Info::WrongState, DTMF_SUCCESS);
            self.next_internal_command(appls, p);
        }
    }

    /// DSP user data indication on the network layer entity of `p`
    pub(crate) fn udata_ind(&mut self, p: u8, data: &[u8]) {
        let Some((&code, rest)) = data.split_first() else {
            return;
        };
        match code {
            UDATA_DTMF_DIGITS if self.pl(p).dtmf.listen_active => {
                log::debug!("plci {p}: dtmf digits {:?}", String::from_utf8_lossy(rest));
                self.facility_ind(p, SELECTOR_DTMF, rest);
            }
            UDATA_DTMF_DIGITS => log::debug!("plci {p}: dtmf digits while not listening"),
            UDATA_EC_EVENT => self.ec_event_ind(p, rest),
            UDATA_MIXER_EVENT => self.mixer_event_ind(p, rest),
            _ => log::debug!("plci {p}: udata {code:02x} ignored"),
        }
    }
}

#[cfg(test)]
pub mod dtmf_test {
    use super::*;
    use crate::{
        config::{AdapterProfile, EngineConfig},
        message::{CapiMessage, Command, SubCommand},
        xdi::{Entity, Req},
    };

    fn connected(a: &mut Adapter) -> u8 {
        let p = a.get_plci().unwrap();
        let pl = a.pl_mut(p);
        pl.appl = Some(1);
        pl.state = PlciState::Connected;
        pl.sig.id = 3;
        pl.cmd_appl = 1;
        pl.number = 9;
        p
    }

    fn req(a: &mut Adapter, appls: &mut ApplTable, p: u8, param: &[u8]) -> Dispatch {
        let msg = CapiMessage::new(1, Command::Facility, SubCommand::Req, 9, a.id(p, 0), Vec::new());
        let c = MsgCtx { appl: 1, id: a.id(p, 0), number: 9, plci: p, ncci: 0, msg: &msg };
        a.dtmf_req(appls, &c, &ApiParse { info: param })
    }

    #[test]
    fn test_digit_validation() {
        assert!(b"0123456789*#ABCDabcd".iter().all(|d| dtmf_digit_valid(*d)));
        assert!(!dtmf_digit_valid(b'E'));
        assert!(!dtmf_digit_valid(b' '));
    }

    #[test]
    fn test_listen_start_runs_resource_then_dsp() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        let p = connected(&mut a);
        let d = req(&mut a, &mut appls, p, &[1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(d, Dispatch::SendReq(p));
        assert_eq!(a.pl(p).req_ring[0].req, Req::B1Config);
        a.pl_mut(p).req_ring.clear();
        a.dtmf_command(&mut appls, p, Rc::Ok);
        let r = &a.pl(p).req_ring[0];
        assert_eq!((r.entity, r.req), (Entity::Sig, Req::TelCtrl));
        assert_eq!(r.data, vec![DSP_DTMF_LISTEN_START, 40, 0, 40, 0]);
        a.dtmf_command(&mut appls, p, Rc::Ok);
        assert!(a.pl(p).dtmf.listen_active);
        assert_eq!(a.pl(p).internal_command, 0);
        let conf = &a.outbox.last().unwrap().msg;
        assert!(conf.is(Command::Facility, SubCommand::Conf));
        assert_eq!(conf.header.number, 9);

        a.udata_ind(p, &[UDATA_DTMF_DIGITS, b'4', b'2']);
        let ind = &a.outbox.last().unwrap().msg;
        assert!(ind.is(Command::Facility, SubCommand::Ind));
        assert_eq!(ind.params, vec![1, 0, 2, b'4', b'2']);
    }

    #[test]
    fn test_send_rejects_bad_digit() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        let p = connected(&mut a);
        let d = req(&mut a, &mut appls, p, &[3, 0, 0, 0, 0, 0, 2, b'1', b'X']);
        assert_eq!(d, Dispatch::Done);
        assert!(a.pl(p).req_ring.is_empty());
        let conf = &a.outbox[0].msg;
        // info, selector, struct { DTMF_INCORRECT_DIGIT }
        assert_eq!(conf.params, vec![0, 0, 1, 0, 2, 1, 0]);
    }

    #[test]
    fn test_digits_dropped_when_not_listening() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let p = connected(&mut a);
        a.udata_ind(p, &[UDATA_DTMF_DIGITS, b'1']);
        assert!(a.outbox.is_empty());
    }

    #[test]
    fn test_requires_connected_call() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        let p = connected(&mut a);
        a.pl_mut(p).state = PlciState::OutgConPending;
        assert_eq!(req(&mut a, &mut appls, p, &[1, 0]), Dispatch::Done);
        assert_eq!(crate::get_word(&a.outbox[0].msg.params), u16::from(Info::WrongState));
    }
}

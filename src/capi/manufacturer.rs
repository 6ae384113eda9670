//! MANUFACTURER_REQ with the Eicon manufacturer id, and advanced voice
//!
//! Advanced voice routes the B channel of a PLCI through a codec PLCI of the adapter.
//! The codec PLCI is assigned on the first ADV_CODEC request. A CONNECT_REQ arriving
//! on an advanced voice PLCI before that assignment completed is saved and replayed
//! from [CommandFn::CodecWait] once the codec is there.

use crate::{
    appl::ApplTable,
    capi::{
        Adapter, Dispatch, PlciState,
        dispatch::MsgCtx,
        plci::{CommandFn, Origin, PendingReq},
    },
    config::{ApplOptions, B1Facilities, DI_MANU_ID, ManufacturerFeatures},
    info::Info,
    message::{CapiMessage, Command, Out, SubCommand},
    parse::ApiParse,
    xdi::{Entity, Rc, Req},
};

/// Allocates a PLCI with a signaling entity but no call
pub const MANUFACTURER_FUNCTION_ASSIGN_PLCI: u16 = 1;
/// Attaches the handset codec to a PLCI (advanced voice)
pub const MANUFACTURER_FUNCTION_ADV_CODEC: u16 = 2;
/// Raw DSP parameter block for the B channel of a PLCI
pub const MANUFACTURER_FUNCTION_DSP_CTRL: u16 = 3;
/// Sets the application options
pub const MANUFACTURER_FUNCTION_OPTIONS: u16 = 9;

/// Assign data of the codec signaling entity
const CODEC_ASSIGN: u8 = 0x01;
pub(crate) const DSP_ADV_VOICE_ON: u8 = 0x40;

const CODEC_WAIT: u16 = 1;
const ADV_VOICE_RESOURCE: u16 = 1;
const ADV_VOICE_WRITE: u16 = 2;

/// Telephony role of a PLCI
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum Tel {
    #[default]
    None,
    /// B channel runs through the adapter codec
    AdvVoice,
    /// The codec PLCI itself
    CodecPlci,
}

impl Adapter {
    /// Codec PLCI exists and its signaling entity is assigned
    pub(crate) fn codec_ready(&self) -> bool {
        let q = self.adv_codec_plci;
        q != 0 && self.valid_plci(q) && self.pl(q).sig.id != 0
    }

    fn manufacturer_conf(&mut self, appl: u16, id: u32, number: u16, function: u16, info: Info) {
        self.sendf(
            appl,
            Command::Manufacturer,
            SubCommand::Conf,
            id,
            number,
            &[Out::D(DI_MANU_ID), Out::W(function), Out::W(info.into())],
        );
    }

    pub(crate) fn manufacturer_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let function = parms[1].word();
        if parms[0].dword() != DI_MANU_ID {
            log::debug!("MANUFACTURER_REQ appl {}: foreign manufacturer {:08x}", c.appl, parms[0].dword());
            self.sendf(
                c.appl,
                Command::Manufacturer,
                SubCommand::Conf,
                c.id,
                c.number,
                &[Out::D(parms[0].dword()), Out::W(function), Out::W(Info::FacilityNotSupported.into())],
            );
            return Dispatch::Done;
        }
        let p = c.plci;
        let owned = p != 0 && self.pl(p).appl == Some(c.appl);
        match function {
            MANUFACTURER_FUNCTION_ASSIGN_PLCI => {
                let Some(p) = self.get_plci() else {
                    self.manufacturer_conf(c.appl, c.id, c.number, function, Info::OutOfPlci);
                    return Dispatch::Done;
                };
                let pl = self.pl_mut(p);
                pl.appl = Some(c.appl);
                pl.command = Some((Command::Manufacturer, SubCommand::Req));
                pl.cmd_appl = c.appl;
                pl.number = c.number;
                self.sig_req(p, Req::Assign, Vec::new(), Origin::Command);
                Dispatch::SendReq(p)
            }
            MANUFACTURER_FUNCTION_ADV_CODEC => self.adv_codec_req(appls, c, function),
            MANUFACTURER_FUNCTION_DSP_CTRL if owned => {
                if self.dsp_req(p, parms[2].info.to_vec(), Origin::Command) {
                    Dispatch::SendReq(p)
                } else {
                    let id = self.id(p, 0);
                    self.manufacturer_conf(c.appl, id, c.number, function, Info::WrongState);
                    Dispatch::Done
                }
            }
            MANUFACTURER_FUNCTION_DSP_CTRL => {
                self.manufacturer_conf(c.appl, c.id, c.number, function, Info::WrongIdentifier);
                Dispatch::Done
            }
            MANUFACTURER_FUNCTION_OPTIONS => {
                let info = match (parms[2].parse("d"), appls.get_mut(c.appl)) {
                    (Ok(o), Some(a)) => {
                        a.options = ApplOptions::from_bits_truncate(o[0].dword());
                        log::debug!("appl {}: options {:?}", c.appl, a.options);
                        Info::Success
                    }
                    _ => Info::WrongMessageFormat,
                };
                self.manufacturer_conf(c.appl, c.id, c.number, function, info);
                Dispatch::Done
            }
            _ => {
                self.manufacturer_conf(c.appl, c.id, c.number, function, Info::FacilityNotSupported);
                Dispatch::Done
            }
        }
    }

    /// Puts the PLCI addressed by `c` (or a new one) on advanced voice and assigns the
    /// codec PLCI if the adapter has none yet
    fn adv_codec_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, function: u16) -> Dispatch {
        if !self.profile.features.contains(ManufacturerFeatures::ADV_VOICE) {
            self.manufacturer_conf(c.appl, c.id, c.number, function, Info::FacilityNotSupported);
            return Dispatch::Done;
        }
        let p = match c.plci {
            0 => match self.get_plci() {
                Some(p) => {
                    self.pl_mut(p).appl = Some(c.appl);
                    p
                }
                None => {
                    self.manufacturer_conf(c.appl, c.id, c.number, function, Info::OutOfPlci);
                    return Dispatch::Done;
                }
            },
            p if self.pl(p).appl == Some(c.appl) => p,
            _ => {
                self.manufacturer_conf(c.appl, c.id, c.number, function, Info::WrongIdentifier);
                return Dispatch::Done;
            }
        };
        let mut d = Dispatch::Done;
        if self.adv_codec_plci == 0 {
            let Some(q) = self.get_plci() else {
                if c.plci == 0 {
                    self.plci_remove(appls, p);
                }
                self.manufacturer_conf(c.appl, c.id, c.number, function, Info::OutOfPlci);
                return Dispatch::Done;
            };
            log::debug!("plci {q}: codec plci for {p}");
            let codec = self.pl_mut(q);
            codec.tel = Tel::CodecPlci;
            codec.codec_for = p;
            self.adv_codec_plci = q;
            self.sig_req(q, Req::Assign, vec![CODEC_ASSIGN], Origin::Unsolicited);
            d = Dispatch::SendReq(q);
        } else {
            let q = self.adv_codec_plci;
            self.pl_mut(q).codec_for = p;
        }
        let pl = self.pl_mut(p);
        pl.tel = Tel::AdvVoice;
        if pl.state == PlciState::Idle {
            pl.state = PlciState::AdvVoiceNoSig;
        }
        let connected = pl.state == PlciState::Connected;
        let id = self.id(p, 0);
        self.manufacturer_conf(c.appl, id, c.number, function, Info::Success);
        if connected {
            self.start_internal_command(appls, p, CommandFn::AdvVoice);
            self.send_req(p);
        }
        d
    }

    pub(crate) fn manufacturer_req_rc(&mut self, appls: &mut ApplTable, p: u8, req: &PendingReq, rc: Rc) {
        let id = self.id(p, 0);
        let (appl, number) = (self.pl(p).cmd_appl, self.pl(p).number);
        match (req.req, req.entity) {
            (Req::Assign, Entity::Sig) => {
                let info = if rc.is_ok() { Info::Success } else { Info::OutOfPlci };
                self.manufacturer_conf(appl, id, number, MANUFACTURER_FUNCTION_ASSIGN_PLCI, info);
                if !rc.is_ok() {
                    self.pl_mut(p).appl = None;
                    self.plci_remove(appls, p);
                }
            }
            (Req::TelCtrl, _) => {
                let info = if rc.is_ok() { Info::Success } else { Info::FacilityNotSupported };
                self.manufacturer_conf(appl, id, number, MANUFACTURER_FUNCTION_DSP_CTRL, info);
            }
            _ => {}
        }
    }

    /// Completion of the codec PLCI's signaling assign
    pub(crate) fn codec_assigned(&mut self, appls: &mut ApplTable, codec: u8, rc: Rc) {
        let p = self.pl(codec).codec_for;
        log::debug!("codec plci {codec} assigned {rc:?} for plci {p}");
        if !rc.is_ok() {
            self.adv_codec_plci = 0;
        }
        if self.valid_plci(p) {
            let pl = self.pl(p);
            if pl.internal_command_queue[0] == Some(CommandFn::CodecWait) && pl.internal_command == CODEC_WAIT {
                self.codec_wait_command(appls, p, rc);
                self.send_req(p);
            }
        }
        if !rc.is_ok() {
            self.plci_remove(appls, codec);
        }
    }

    /// Holds a saved CONNECT_REQ until the codec PLCI is assigned, then dispatches it again
    pub(crate) fn codec_wait_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let step = std::mem::take(&mut self.pl_mut(p).internal_command);
        log::debug!("codec_wait_command plci {p} step {step} {rc:?}");
        let ready = self.codec_ready();
        if step == 0 && !ready && self.adv_codec_plci != 0 {
            self.pl_mut(p).internal_command = CODEC_WAIT;
            return;
        }
        let spoofed = self.pl_mut(p).spoofed.take();
        self.next_internal_command(appls, p);
        let Some(s) = spoofed else {
            return;
        };
        if !ready || !rc.is_ok() {
            log::warn!("plci {p}: codec unavailable, CONNECT_REQ from appl {} fails", s.appl);
            let id = self.id(p, 0);
            self.send_conf(s.appl, Command::Connect, id, s.header.number, Info::L1Error);
            self.sendf(s.appl, Command::Disconnect, SubCommand::Ind, id, 0, &[Out::W(Info::L1Error.into())]);
            self.pl_mut(p).req_ring.retain(|r| r.origin != Origin::Command);
            return;
        }
        let msg = CapiMessage {
            header: s.header,
            params: s.saved.area().to_vec(),
            data: None,
        };
        if let Err(e) = self.dispatch(appls, s.appl, &msg) {
            log::error!("plci {p}: replay of CONNECT_REQ failed: {e}");
        }
    }

    /// Switches the B channel of a connected advanced voice PLCI onto the codec
    pub(crate) fn adv_voice_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let step = std::mem::take(&mut self.pl_mut(p).internal_command);
        log::debug!("adv_voice_command plci {p} step {step} {rc:?}");
        match step {
            0 => {
                let want = self.pl(p).b1_facilities | B1Facilities::VOICE;
                if self.adjust_b1_facilities(p, want) {
                    self.pl_mut(p).internal_command = ADV_VOICE_RESOURCE;
                    return;
                }
            }
            ADV_VOICE_RESOURCE => {
                if !self.b1_resource_rc(p, rc) {
                    self.next_internal_command(appls, p);
                    return;
                }
            }
            _ => {
                if !rc.is_ok() {
                    log::error!("plci {p}: advanced voice coefficients rejected");
                }
                self.next_internal_command(appls, p);
                return;
            }
        }
        let data = vec![DSP_ADV_VOICE_ON, self.adv_codec_plci, self.profile.u_law as u8];
        if self.dsp_req(p, data, Origin::Internal) {
            self.pl_mut(p).internal_command = ADV_VOICE_WRITE;
        } else {
            self.next_internal_command(appls, p);
        }
    }
}

#[cfg(test)]
pub mod manufacturer_test {
    use super::*;
    use crate::{
        appl::ApplParams,
        config::{AdapterProfile, EngineConfig},
        parse::api_parse,
    };

    fn manu(function: u16, param: &[u8]) -> Vec<u8> {
        let mut v = DI_MANU_ID.to_le_bytes().to_vec();
        v.extend_from_slice(&function.to_le_bytes());
        crate::parse::put_struct(&mut v, param);
        v
    }

    fn run(a: &mut Adapter, appls: &mut ApplTable, plci: u8, params: Vec<u8>) -> Dispatch {
        let msg = CapiMessage::new(1, Command::Manufacturer, SubCommand::Req, 6, a.id(plci, 0), params);
        let parms = api_parse(&msg.params, "dws").unwrap();
        let c = MsgCtx { appl: 1, id: a.id(plci, 0), number: 6, plci, ncci: 0, msg: &msg };
        a.manufacturer_req(appls, &c, &parms)
    }

    #[test]
    fn test_foreign_manufacturer() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        let mut params = manu(1, &[]);
        params[..4].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        assert_eq!(run(&mut a, &mut appls, 0, params), Dispatch::Done);
        let conf = &a.outbox[0].msg.params;
        assert_eq!(crate::get_dword(conf), 0x1234_5678);
        assert_eq!(crate::get_word(&conf[6..]), u16::from(Info::FacilityNotSupported));
    }

    #[test]
    fn test_options() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        appls.register(1, ApplParams::default(), &EngineConfig::default()).unwrap();
        run(&mut a, &mut appls, 0, manu(MANUFACTURER_FUNCTION_OPTIONS, &[3, 0, 0, 0]));
        assert_eq!(appls.get(1).unwrap().options, ApplOptions::OLD_LI_SPEC | ApplOptions::PRIV_EC_SPEC);
    }

    #[test]
    fn test_adv_codec_assigns_codec_plci() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        let d = run(&mut a, &mut appls, 0, manu(MANUFACTURER_FUNCTION_ADV_CODEC, &[]));
        let q = a.adv_codec_plci;
        assert_eq!(d, Dispatch::SendReq(q));
        let p = 1;
        assert_eq!(q, 2);
        assert_eq!(a.pl(p).tel, Tel::AdvVoice);
        assert_eq!(a.pl(p).state, PlciState::AdvVoiceNoSig);
        assert_eq!(a.pl(q).tel, Tel::CodecPlci);
        assert_eq!(a.pl(q).req_ring[0].req, Req::Assign);
        assert!(!a.codec_ready());
        a.pl_mut(q).sig.id = 9;
        assert!(a.codec_ready());
    }

    #[test]
    fn test_codec_failure_fails_parked_connect() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let mut appls = ApplTable::default();
        run(&mut a, &mut appls, 0, manu(MANUFACTURER_FUNCTION_ADV_CODEC, &[]));
        let (p, q) = (1, a.adv_codec_plci);
        a.pl_mut(p).spoofed = Some(crate::capi::plci::SpoofedMsg {
            appl: 1,
            header: CapiMessage::new(1, Command::Connect, SubCommand::Req, 11, a.id(p, 0), Vec::new()).header,
            saved: Default::default(),
        });
        a.start_internal_command(&mut appls, p, CommandFn::CodecWait);
        assert_eq!(a.pl(p).internal_command, CODEC_WAIT);
        // as left by the failed assign completion
        a.pl_mut(q).req_ring.clear();
        a.pl_mut(q).sig.assigning = false;
        a.codec_assigned(&mut appls, q, Rc::OutOfResources);
        assert_eq!(a.adv_codec_plci, 0);
        assert!(!a.valid_plci(q));
        assert_eq!(a.pl(p).internal_command, 0);
        assert!(a.pl(p).spoofed.is_none());
        let n = a.outbox.len();
        let conf = &a.outbox[n - 2].msg;
        assert!(conf.is(Command::Connect, SubCommand::Conf));
        assert_eq!(conf.header.number, 11);
        assert_eq!(crate::get_word(&conf.params), u16::from(Info::L1Error));
        let ind = &a.outbox[n - 1];
        assert_eq!(ind.appl, 1);
        assert!(ind.msg.is(Command::Disconnect, SubCommand::Ind));
        assert_eq!(ind.msg.header.id(), a.id(p, 0));
        assert_eq!(crate::get_word(&ind.msg.params), u16::from(Info::L1Error));
    }
}

//! Line echo canceller facility (selector 8, or the private selector for applications
//! that asked for the private parameter layout)

use crate::{
    appl::ApplTable,
    capi::{
        Adapter, Dispatch,
        dispatch::MsgCtx,
        facility::PRIV_SELECTOR_ECHO_CANCELLER,
        plci::{CommandFn, Origin},
    },
    config::{B1Facilities, ManufacturerFeatures},
    info::Info,
    message::{Out, encode_params},
    parse::ApiParse,
    xdi::Rc,
};

/// Echo canceller function: report options and limits
pub const EC_GET_SUPPORTED_SERVICES: u16 = 0;
/// Echo canceller function: enable
pub const EC_ENABLE_OPERATION: u16 = 1;
/// Echo canceller function: disable
pub const EC_DISABLE_OPERATION: u16 = 2;
/// Function code of bypass indications
pub const EC_BYPASS_INDICATION: u16 = 3;

bitflags::bitflags! {
    /// Echo canceller options
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct EcOptions: u16 {
        /// Disable the canceller while a 2100 Hz tone is seen
        const DISABLE_NON_LINEAR_PROCESSING = 0x0001;
        /// Bypass on 2100 Hz tone
        const BYPASS_ON_2100HZ = 0x0002;
        /// Bypass on 2100 Hz tone with phase reversals
        const BYPASS_ON_REV_2100HZ = 0x0004;
        /// Reset the coefficients when enabled
        const RESET_COEFFICIENTS = 0x0008;
    }
}

const EC_MAX_TAIL_LENGTH: u16 = 256;
const EC_MAX_PRE_DELAY: u16 = 100;
const EC_DEFAULT_TAIL_LENGTH: u16 = 128;

pub(crate) const DSP_EC_ENABLE: u8 = 0x20;
pub(crate) const DSP_EC_DISABLE: u8 = 0x21;

const EC_RESOURCE: u16 = 1;
const EC_WRITE: u16 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct EcState {
    pub(crate) enabled: bool,
    /// Selector the application used, echoed in confirmations and indications
    pub(crate) selector: u16,
    pub(crate) function: u16,
    pub(crate) options: EcOptions,
    pub(crate) tail_length: u16,
    pub(crate) pre_delay: u16,
}

/// Parameter struct of an echo canceller confirmation or indication. The private
/// layout carries the words flat, without the inner struct
fn ec_param(selector: u16, function: u16, words: &[u16]) -> Vec<u8> {
    let words: Vec<Out<'_>> = words.iter().map(|w| Out::W(*w)).collect();
    let inner = encode_params(&words);
    if selector == PRIV_SELECTOR_ECHO_CANCELLER {
        let mut v = function.to_le_bytes().to_vec();
        v.extend_from_slice(&inner);
        v
    } else {
        encode_params(&[Out::W(function), Out::S(&inner)])
    }
}

impl Adapter {
    pub(crate) fn ec_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, selector: u16, param: &ApiParse<'_>) -> Dispatch {
        let private = selector == PRIV_SELECTOR_ECHO_CANCELLER;
        let parsed = if private {
            param.parse("w").map(|f| (f[0].word(), param.parse("wwww").ok().map(|f| [f[1].word(), f[2].word(), f[3].word()])))
        } else {
            param.parse("ws").map(|f| {
                let enable = f[1].parse("www").ok().map(|e| [e[0].word(), e[1].word(), e[2].word()]);
                (f[0].word(), enable)
            })
        };
        let Ok((function, enable)) = parsed else {
            self.facility_conf(c.appl, c.id, c.number, Info::WrongMessageFormat, selector, &[]);
            return Dispatch::Done;
        };
        if !self.profile.features.contains(ManufacturerFeatures::ECHO_CANCELLER) {
            self.facility_conf(c.appl, c.id, c.number, Info::FacilityNotSupported, selector, &[]);
            return Dispatch::Done;
        }
        match function {
            EC_GET_SUPPORTED_SERVICES => {
                let supported = EcOptions::all().bits();
                let conf = ec_param(
                    selector,
                    function,
                    &[Info::Success.into(), supported, EC_MAX_TAIL_LENGTH, EC_MAX_PRE_DELAY],
                );
                self.facility_conf(c.appl, c.id, c.number, Info::Success, selector, &conf);
                return Dispatch::Done;
            }
            EC_ENABLE_OPERATION | EC_DISABLE_OPERATION => {}
            _ => {
                let conf = ec_param(selector, function, &[Info::FacilityNotSupported.into()]);
                self.facility_conf(c.appl, c.id, c.number, Info::Success, selector, &conf);
                return Dispatch::Done;
            }
        }
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) {
            self.facility_conf(c.appl, c.id, c.number, Info::WrongIdentifier, selector, &[]);
            return Dispatch::Done;
        }
        let [options, tail, pre_delay] = enable.unwrap_or_default();
        let ec = &mut self.pl_mut(p).ec;
        ec.selector = selector;
        ec.function = function;
        if function == EC_ENABLE_OPERATION {
            ec.options = EcOptions::from_bits_truncate(options);
            ec.tail_length = match tail {
                0 => EC_DEFAULT_TAIL_LENGTH,
                t => t.min(EC_MAX_TAIL_LENGTH),
            };
            ec.pre_delay = pre_delay.min(EC_MAX_PRE_DELAY);
        }
        self.start_internal_command(appls, p, CommandFn::Ec);
        Dispatch::SendReq(p)
    }

    fn ec_conf(&mut self, p: u8, info: Info) {
        let pl = self.pl(p);
        let (appl, number, selector, function) = (pl.cmd_appl, pl.number, pl.ec.selector, pl.ec.function);
        let id = self.id(p, 0);
        let conf = ec_param(selector, function, &[info.into()]);
        self.facility_conf(appl, id, number, Info::Success, selector, &conf);
    }

    pub(crate) fn ec_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let step = std::mem::take(&mut self.pl_mut(p).internal_command);
        log::debug!("ec_command plci {p} step {step} {rc:?}");
        let enable = self.pl(p).ec.function == EC_ENABLE_OPERATION;
        match step {
            0 => {
                let mut want = self.pl(p).b1_facilities;
                want.set(B1Facilities::EC, enable);
                if self.adjust_b1_facilities(p, want) {
                    self.pl_mut(p).internal_command = EC_RESOURCE;
                    return;
                }
            }
            EC_RESOURCE => {
                if !self.b1_resource_rc(p, rc) {
                    self.ec_conf(p, Info::FacilityNotSupported);
                    self.next_internal_command(appls, p);
                    return;
                }
            }
            _ => {
                if rc.is_ok() {
                    self.pl_mut(p).ec.enabled = enable;
                    self.ec_conf(p, Info::Success);
                } else {
                    self.ec_conf(p, Info::FacilityNotSupported);
                }
                self.next_internal_command(appls, p);
                return;
            }
        }
        let ec = &self.pl(p).ec;
        let data = if enable {
            let mut d = vec![DSP_EC_ENABLE];
            d.extend_from_slice(&ec.options.bits().to_le_bytes());
            d.extend_from_slice(&ec.tail_length.to_le_bytes());
            d.extend_from_slice(&ec.pre_delay.to_le_bytes());
            d
        } else {
            vec![DSP_EC_DISABLE]
        };
        if self.dsp_req(p, data, Origin::Internal) {
            self.pl_mut(p).internal_command = EC_WRITE;
        } else {
            // no B channel yet: the resources take effect when one is assigned
            self.pl_mut(p).ec.enabled = enable;
            self.ec_conf(p, Info::Success);
            self.next_internal_command(appls, p);
        }
    }

    /// Bypass state change reported by the DSP
    pub(crate) fn ec_event_ind(&mut self, p: u8, data: &[u8]) {
        let ec = &self.pl(p).ec;
        if !ec.enabled {
            log::debug!("plci {p}: echo canceller event while disabled");
            return;
        }
        let selector = ec.selector;
        let event = crate::get_word(data);
        log::debug!("plci {p}: echo canceller bypass event {event}");
        let ind = ec_param(selector, EC_BYPASS_INDICATION, &[event]);
        self.facility_ind(p, selector, &ind);
    }
}

//! Line interconnect (selector 5): cross connections between the B channels of PLCIs on
//! one adapter
//!
//! The adapter wide [MixerTable] records which PLCIs hear each other. A connect or
//! disconnect changes the table first, then every affected PLCI runs an internal command
//! that adjusts its B1 resources and writes its new set of mixer coefficients to the
//! DSP. Only the requesting PLCI confirms; its partners run [CommandFn::MixerNotify].

use crate::{
    appl::ApplTable,
    capi::{
        Adapter, Dispatch, PlciState,
        dispatch::MsgCtx,
        facility::SELECTOR_LINE_INTERCONNECT,
        plci::{CommandFn, Origin},
    },
    config::{ApplOptions, B1Facilities, ManufacturerFeatures},
    info::Info,
    message::{Out, encode_params},
    parse::{ApiParse, struct_list},
    xdi::Rc,
};

/// Line interconnect function: report services and limits
pub const LI_GET_SUPPORTED_SERVICES: u16 = 0;
/// Line interconnect function: connect
pub const LI_CONNECT: u16 = 1;
/// Line interconnect function: disconnect
pub const LI_DISCONNECT: u16 = 2;

/// Indication function: connection active
pub const LI_IND_CONNECT_ACTIVE: u16 = 1;
/// Indication function: connection ended
pub const LI_IND_DISCONNECT: u16 = 2;

/// Disconnect reason: requested by an application
pub const LI_REASON_USER_REQUEST: u16 = 0;
/// Disconnect reason: a participant PLCI went away
pub const LI_REASON_PLCI_REMOVED: u16 = 1;
/// Disconnect reason: the adapter lost the B channel path
pub const LI_REASON_CHANNEL_LOST: u16 = 2;

/// Data path bit, as seen from the PLCI a table entry belongs to: transmit
pub const LI_PATH_TRANSMIT: u8 = 0x01;
/// Data path bit: receive
pub const LI_PATH_RECEIVE: u8 = 0x02;
const LI_PATH_MASK: u8 = LI_PATH_TRANSMIT | LI_PATH_RECEIVE;
const LI_CONNECTED: u8 = 0x80;

/// Cross connect, monitor and conference
const LI_SUPPORTED_FEATURES: u32 = 0x0000_0007;

pub(crate) const DSP_MIXER_WRITE: u8 = 0x30;

const MIXER_RESOURCE: u16 = 1;
const MIXER_WRITE: u16 = 2;

/// Symmetric table of cross connections between PLCIs, indexed by PLCI number
#[derive(Debug, Clone)]
pub(crate) struct MixerTable {
    n: usize,
    entries: Vec<u8>,
}

impl MixerTable {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            n,
            entries: vec![0; n * n],
        }
    }

    fn idx(&self, a: u8, b: u8) -> Option<usize> {
        let (a, b) = (a as usize, b as usize);
        (a != 0 && b != 0 && a <= self.n && b <= self.n).then(|| (a - 1) * self.n + b - 1)
    }

    /// Connects `a` and `b`. `path` is seen from `a`
    pub(crate) fn connect(&mut self, a: u8, b: u8, path: u8) -> bool {
        let (Some(ab), Some(ba)) = (self.idx(a, b), self.idx(b, a)) else {
            return false;
        };
        if a == b {
            return false;
        }
        let path = path & LI_PATH_MASK;
        let swapped = (path & LI_PATH_TRANSMIT) << 1 | (path & LI_PATH_RECEIVE) >> 1;
        self.entries[ab] = LI_CONNECTED | path;
        self.entries[ba] = LI_CONNECTED | swapped;
        true
    }

    /// Returns false if they were not connected
    pub(crate) fn disconnect(&mut self, a: u8, b: u8) -> bool {
        let (Some(ab), Some(ba)) = (self.idx(a, b), self.idx(b, a)) else {
            return false;
        };
        let was = self.entries[ab] & LI_CONNECTED != 0;
        self.entries[ab] = 0;
        self.entries[ba] = 0;
        was
    }

    pub(crate) fn is_connected(&self, a: u8, b: u8) -> bool {
        self.idx(a, b).is_some_and(|i| self.entries[i] & LI_CONNECTED != 0)
    }

    /// Partners of `a` with the data path seen from `a`
    pub(crate) fn partners(&self, a: u8) -> Vec<(u8, u8)> {
        (1..=self.n as u8)
            .filter_map(|b| {
                let e = self.entries[self.idx(a, b)?];
                (e & LI_CONNECTED != 0).then_some((b, e & LI_PATH_MASK))
            })
            .collect()
    }

    /// Drops every connection of `a`, returning its former partners
    pub(crate) fn remove(&mut self, a: u8) -> Vec<u8> {
        let partners: Vec<u8> = self.partners(a).into_iter().map(|(b, _)| b).collect();
        for b in &partners {
            self.disconnect(a, *b);
        }
        partners
    }
}

/// Line interconnect request being carried out on a PLCI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LiState {
    pub(crate) function: u16,
    pub(crate) old_layout: bool,
    /// Participant identifiers and their individual results
    pub(crate) results: Vec<(u32, Info)>,
}

fn li_ind_param(function: u16, partner_id: u32, reason: u16) -> Vec<u8> {
    let inner = match function {
        LI_IND_DISCONNECT => encode_params(&[Out::D(partner_id), Out::W(reason)]),
        _ => encode_params(&[Out::D(partner_id)]),
    };
    encode_params(&[Out::W(function), Out::S(&inner)])
}

impl Adapter {
    fn li_conf(&mut self, appl: u16, id: u32, number: u16, info: Info, li: &LiState) {
        let mut inner = encode_params(&[Out::W(info.into())]);
        if li.old_layout {
            if let Some((pid, r)) = li.results.first() {
                inner = encode_params(&[Out::W((*r).into()), Out::D(*pid)]);
            }
        } else {
            let mut list = Vec::new();
            for (pid, r) in &li.results {
                let one = encode_params(&[Out::W((*r).into()), Out::D(*pid)]);
                list.extend(encode_params(&[Out::S(&one)]));
            }
            inner.extend(encode_params(&[Out::S(&list)]));
        }
        let conf = encode_params(&[Out::W(li.function), Out::S(&inner)]);
        self.facility_conf(appl, id, number, Info::Success, SELECTOR_LINE_INTERCONNECT, &conf);
    }

    /// Participant on this adapter that can be cross connected with `p`
    fn li_participant(&self, p: u8, pid: u32) -> Result<u8, Info> {
        let q = ((pid >> 8) & 0xFF) as u8;
        if (pid & 0x7F) as u8 != self.controller || !self.valid_plci(q) || q == p {
            return Err(Info::WrongIdentifier);
        }
        match self.pl(q).state {
            PlciState::Connected | PlciState::IncConConnectedAlert | PlciState::AdvVoiceNoSig => Ok(q),
            _ => Err(Info::WrongState),
        }
    }

    pub(crate) fn mixer_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, param: &ApiParse<'_>) -> Dispatch {
        let Ok(f) = param.parse("ws") else {
            self.facility_conf(c.appl, c.id, c.number, Info::WrongMessageFormat, SELECTOR_LINE_INTERCONNECT, &[]);
            return Dispatch::Done;
        };
        let function = f[0].word();
        if !self.profile.features.contains(ManufacturerFeatures::XCONNECT) {
            self.facility_conf(c.appl, c.id, c.number, Info::FacilityNotSupported, SELECTOR_LINE_INTERCONNECT, &[]);
            return Dispatch::Done;
        }
        let old_layout = appls
            .get(c.appl)
            .is_some_and(|a| a.options.contains(ApplOptions::OLD_LI_SPEC));
        if function == LI_GET_SUPPORTED_SERVICES {
            let max = self.plci.len() as u32;
            let inner = encode_params(&[
                Out::W(Info::Success.into()),
                Out::D(LI_SUPPORTED_FEATURES),
                Out::D(max),
                Out::D(max.saturating_sub(1)),
            ]);
            let conf = encode_params(&[Out::W(function), Out::S(&inner)]);
            self.facility_conf(c.appl, c.id, c.number, Info::Success, SELECTOR_LINE_INTERCONNECT, &conf);
            return Dispatch::Done;
        }
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) {
            self.facility_conf(c.appl, c.id, c.number, Info::WrongIdentifier, SELECTOR_LINE_INTERCONNECT, &[]);
            return Dispatch::Done;
        }
        let id = self.id(p, 0);
        // (participant id, data path)
        let list: Result<Vec<(u32, u8)>, _> = match (function, old_layout) {
            (LI_CONNECT, true) => f[1].parse("dd").map(|d| vec![(d[0].dword(), d[1].dword() as u8)]),
            (LI_DISCONNECT, true) => f[1].parse("d").map(|d| vec![(d[0].dword(), 0)]),
            (LI_CONNECT, false) => f[1].parse("ds").and_then(|d| {
                struct_list(d[1].info)?
                    .iter()
                    .map(|s| s.parse("dd").map(|e| (e[0].dword(), e[1].dword() as u8)))
                    .collect()
            }),
            (LI_DISCONNECT, false) => f[1].parse("s").and_then(|d| {
                struct_list(d[0].info)?
                    .iter()
                    .map(|s| s.parse("d").map(|e| (e[0].dword(), 0)))
                    .collect()
            }),
            _ => {
                let inner = encode_params(&[Out::W(Info::FacilityNotSupported.into())]);
                let conf = encode_params(&[Out::W(function), Out::S(&inner)]);
                self.facility_conf(c.appl, id, c.number, Info::Success, SELECTOR_LINE_INTERCONNECT, &conf);
                return Dispatch::Done;
            }
        };
        let Ok(list) = list else {
            self.facility_conf(c.appl, id, c.number, Info::WrongMessageFormat, SELECTOR_LINE_INTERCONNECT, &[]);
            return Dispatch::Done;
        };
        if function == LI_CONNECT
            && !matches!(
                self.pl(p).state,
                PlciState::Connected | PlciState::IncConConnectedAlert | PlciState::AdvVoiceNoSig
            )
        {
            self.facility_conf(c.appl, id, c.number, Info::WrongState, SELECTOR_LINE_INTERCONNECT, &[]);
            return Dispatch::Done;
        }
        let mut results = Vec::with_capacity(list.len());
        let mut changed = Vec::new();
        for (pid, path) in list {
            let r = match self.li_participant(p, pid) {
                Ok(q) => {
                    let done = if function == LI_CONNECT {
                        self.mixer.connect(p, q, path)
                    } else {
                        self.mixer.disconnect(p, q)
                    };
                    if done {
                        changed.push(q);
                        Info::Success
                    } else {
                        Info::WrongState
                    }
                }
                Err(info) => info,
            };
            results.push((pid, r));
        }
        let li = LiState {
            function,
            old_layout,
            results,
        };
        if changed.is_empty() {
            self.li_conf(c.appl, id, c.number, Info::Success, &li);
            return Dispatch::Done;
        }
        self.pl_mut(p).li = li;
        for q in changed {
            let ind = match function {
                LI_CONNECT => li_ind_param(LI_IND_CONNECT_ACTIVE, id, 0),
                _ => li_ind_param(LI_IND_DISCONNECT, id, LI_REASON_USER_REQUEST),
            };
            self.facility_ind(q, SELECTOR_LINE_INTERCONNECT, &ind);
            self.start_internal_command(appls, q, CommandFn::MixerNotify);
        }
        self.start_internal_command(appls, p, CommandFn::Mixer);
        Dispatch::SendReq(p)
    }

    /// Writes the mixer state of `p`. Returns Some(ok) once the command is finished,
    /// None while it waits on the adapter
    fn mixer_step(&mut self, p: u8, rc: Rc) -> Option<bool> {
        let step = std::mem::take(&mut self.pl_mut(p).internal_command);
        log::debug!("mixer step plci {p} step {step} {rc:?}");
        match step {
            0 => {
                let mut want = self.pl(p).b1_facilities;
                want.set(B1Facilities::MIXER, !self.mixer.partners(p).is_empty());
                if self.adjust_b1_facilities(p, want) {
                    self.pl_mut(p).internal_command = MIXER_RESOURCE;
                    return None;
                }
            }
            MIXER_RESOURCE => {
                if !self.b1_resource_rc(p, rc) {
                    return Some(false);
                }
            }
            MIXER_WRITE => return Some(rc.is_ok()),
            other => {
                log::warn!("plci {p}: unexpected mixer step {other}");
                return Some(false);
            }
        }
        let partners = self.mixer.partners(p);
        let mut data = vec![DSP_MIXER_WRITE, partners.len() as u8];
        for (q, path) in partners {
            data.extend_from_slice(&[q, path]);
        }
        if self.dsp_req(p, data, Origin::Internal) {
            self.pl_mut(p).internal_command = MIXER_WRITE;
            None
        } else {
            Some(true)
        }
    }

    pub(crate) fn mixer_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let Some(ok) = self.mixer_step(p, rc) else {
            return;
        };
        let mut li = std::mem::take(&mut self.pl_mut(p).li);
        let info = if ok {
            Info::Success
        } else {
            for r in li.results.iter_mut().filter(|r| r.1 == Info::Success) {
                r.1 = Info::FacilityNotSupported;
            }
            Info::FacilityNotSupported
        };
        let (appl, number) = (self.pl(p).cmd_appl, self.pl(p).number);
        let id = self.id(p, 0);
        self.li_conf(appl, id, number, info, &li);
        self.next_internal_command(appls, p);
    }

    pub(crate) fn mixer_notify_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        match self.mixer_step(p, rc) {
            Some(false) => log::error!("plci {p}: mixer update failed"),
            Some(true) => {}
            None => return,
        }
        self.next_internal_command(appls, p);
    }

    /// Cross connection lost as reported by the DSP: `[partner plci, reason]`
    pub(crate) fn mixer_event_ind(&mut self, p: u8, data: &[u8]) {
        let (Some(&q), reason) = (data.first(), data.get(1).copied().unwrap_or(0)) else {
            return;
        };
        if !self.mixer.disconnect(p, q) {
            log::debug!("plci {p}: mixer event for unconnected plci {q}");
            return;
        }
        let reason = if reason == 0 { LI_REASON_CHANNEL_LOST } else { reason as u16 };
        let (pid, qid) = (self.id(p, 0), self.id(q, 0));
        self.facility_ind(p, SELECTOR_LINE_INTERCONNECT, &li_ind_param(LI_IND_DISCONNECT, qid, reason));
        if self.valid_plci(q) {
            self.facility_ind(q, SELECTOR_LINE_INTERCONNECT, &li_ind_param(LI_IND_DISCONNECT, pid, reason));
        }
    }

    /// Drops the cross connections of a PLCI being removed and updates its partners
    pub(crate) fn mixer_remove(&mut self, appls: &mut ApplTable, p: u8) {
        let pid = self.id(p, 0);
        for q in self.mixer.remove(p) {
            if !self.valid_plci(q) {
                continue;
            }
            log::debug!("mixer_remove plci {p}: updating partner {q}");
            self.facility_ind(q, SELECTOR_LINE_INTERCONNECT, &li_ind_param(LI_IND_DISCONNECT, pid, LI_REASON_PLCI_REMOVED));
            self.start_internal_command(appls, q, CommandFn::MixerNotify);
        }
    }
}

//! Fax G3 (B3 protocol T.30): B3 configuration written with N_EDATA, T.30 progress
//! reported by the adapter, and the T.30 NCPI

use crate::{
    appl::ApplTable,
    capi::{Adapter, NcciState, plci::Origin},
    info::Info,
    message::{Out, encode_params},
    parse::{api_parse, put_struct},
    xdi::{Rc, Req},
};

/// N_EDATA request code carrying the B3 configuration
pub(crate) const EDATA_FAX_CONFIG: u8 = 0x01;

/// T.30 progress codes in N_EDATA indications
pub(crate) const EDATA_DIS: u8 = 0x01;
pub(crate) const EDATA_DCS: u8 = 0x02;
pub(crate) const EDATA_TRAIN_OK: u8 = 0x03;
pub(crate) const EDATA_PAGE_END: u8 = 0x04;
pub(crate) const EDATA_EOP: u8 = 0x05;
pub(crate) const EDATA_FAILURE: u8 = 0x06;

/// Resolution bit of the NCPI
pub const FAX_RESOLUTION_HIGH: u16 = 0x0001;

const FAX_DEFAULT_RATE: u16 = 14400;

const FAX_CONFIG: u16 = 1;
const FAX_ACK: u16 = 2;

/// T.30 session state of a PLCI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FaxState {
    pub(crate) rate: u16,
    pub(crate) resolution: u16,
    pub(crate) format: u16,
    pub(crate) pages: u16,
    /// Station identification of the remote side
    pub(crate) station_id: Vec<u8>,
    pub(crate) trained: bool,
    pub(crate) eop_seen: bool,
    pub(crate) last_failure: Option<Info>,
    /// NCCI of an incoming fax connection being accepted
    pub(crate) ncci: u8,
}

fn fax_failure(code: u16) -> Info {
    match code {
        1 => Info::FaxNoG3Remote,
        2 => Info::FaxTrainingError,
        3 => Info::FaxDisconnectedBeforeTransfer,
        4 => Info::FaxRemoteAbort,
        _ => Info::FaxProcedureError,
    }
}

impl Adapter {
    /// Starts a fax session on `p`: clears the T.30 progress and returns the B3
    /// configuration block for the adapter (resolution, format, station id, head line)
    pub(crate) fn fax_config_data(&mut self, p: u8) -> Vec<u8> {
        let pl = self.pl_mut(p);
        pl.fax = FaxState {
            ncci: pl.fax.ncci,
            ..Default::default()
        };
        let cfg = &pl.bprot.b3_config;
        let (resolution, format, station, head) = match api_parse(cfg, "wwss") {
            Ok(f) => (f[0].word(), f[1].word(), f[2].info, f[3].info),
            Err(_) => {
                if !cfg.is_empty() {
                    log::warn!("plci {p}: malformed T.30 configuration, using defaults");
                }
                (0, 0, &[][..], &[][..])
            }
        };
        let mut data = vec![EDATA_FAX_CONFIG];
        data.extend_from_slice(&resolution.to_le_bytes());
        data.extend_from_slice(&format.to_le_bytes());
        put_struct(&mut data, station);
        put_struct(&mut data, head);
        data
    }

    /// T.30 progress from the adapter
    pub(crate) fn fax_edata_ind(&mut self, p: u8, data: &[u8]) {
        let Some((&code, rest)) = data.split_first() else {
            return;
        };
        let word = |i: usize| rest.get(i..).map(crate::get_word).unwrap_or(0);
        let fax = &mut self.pl_mut(p).fax;
        match code {
            EDATA_DIS => {
                fax.rate = word(0);
                fax.station_id = api_parse(rest.get(2..).unwrap_or(&[]), "s")
                    .map(|f| f[0].info.to_vec())
                    .unwrap_or_default();
            }
            EDATA_DCS => {
                fax.rate = word(0);
                fax.resolution = word(2);
                fax.format = word(4);
            }
            EDATA_TRAIN_OK => fax.trained = true,
            EDATA_PAGE_END => fax.pages += 1,
            EDATA_EOP => {
                fax.pages += 1;
                fax.eop_seen = true;
            }
            EDATA_FAILURE => fax.last_failure = Some(fax_failure(word(0))),
            _ => log::debug!("plci {p}: fax edata {code:02x} ignored"),
        }
        log::trace!("plci {p}: fax {:?}", self.pl(p).fax);
    }

    /// T.30 NCPI: rate, resolution, format, pages, remote station id
    pub(crate) fn fax_ncpi(&self, p: u8) -> Vec<u8> {
        let fax = &self.pl(p).fax;
        let rate = if fax.rate == 0 { FAX_DEFAULT_RATE } else { fax.rate };
        encode_params(&[
            Out::W(rate),
            Out::W(fax.resolution),
            Out::W(fax.format),
            Out::W(fax.pages),
            Out::S(&fax.station_id),
        ])
    }

    /// Reason for DISCONNECT_B3_IND of a fax connection, None if `p` is not on fax
    pub(crate) fn fax_disc_reason(&self, p: u8) -> Option<u16> {
        let pl = self.pl(p);
        if !pl.bprot.is_fax() {
            return None;
        }
        let fax = &pl.fax;
        let reason = match fax.last_failure {
            _ if fax.eop_seen => 0,
            Some(info) => info.into(),
            None if fax.pages == 0 => Info::FaxDisconnectedBeforeTransfer.into(),
            None => 0,
        };
        Some(reason)
    }

    /// Accepts an incoming fax connection: configuration first, then N_CONNECT_ACK
    pub(crate) fn fax_connect_ack_command(&mut self, appls: &mut ApplTable, p: u8, rc: Rc) {
        let step = std::mem::take(&mut self.pl_mut(p).internal_command);
        log::debug!("fax_connect_ack_command plci {p} step {step} {rc:?}");
        let ncci = self.pl(p).fax.ncci;
        match step {
            0 => {
                let config = self.fax_config_data(p);
                self.nl_req(p, Req::NEData, ncci, config, Origin::Internal);
                self.pl_mut(p).internal_command = FAX_CONFIG;
            }
            FAX_CONFIG if rc.is_ok() => {
                self.nl_req(p, Req::NConnectAck, ncci, Vec::new(), Origin::Internal);
                self.pl_mut(p).internal_command = FAX_ACK;
            }
            FAX_CONFIG => {
                log::error!("plci {p}: fax configuration rejected, dropping ncci {ncci}");
                self.ncci.ncci_state[ncci as usize] = NcciState::OutgDisPending;
                self.nl_req(p, Req::NDisc, ncci, Vec::new(), Origin::Unsolicited);
                self.next_internal_command(appls, p);
            }
            _ => {
                if rc.is_ok() {
                    self.b3_active(p, ncci, Vec::new());
                } else {
                    log::error!("plci {p}: fax accept of ncci {ncci} failed");
                }
                self.next_internal_command(appls, p);
            }
        }
    }
}

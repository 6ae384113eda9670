//! NCCI numbers and their mapping to adapter channels
//!
//! The mapping lives in adapter wide tables indexed by NCCI and by channel. NCCIs owned by
//! one PLCI are threaded into a ring through `ncci_next`, headed by the PLCI's
//! `ncci_ring_list`. Mapping confusion is never fatal: it bumps `mapping_bug` and the
//! code carries on with a best effort mapping.

use std::collections::VecDeque;

use crate::{
    appl::ApplTable,
    capi::{Adapter, plci::TxBuffer},
    config::{MAX_NCCI, MAX_NL_CHANNEL},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, strum_macros::Display)]
/// B3 connection state
pub enum NcciState {
    /// Mapped, no connection
    #[default]
    Idle,
    /// CONNECT_B3_REQ issued
    OutgConPending,
    /// CONNECT_B3_IND sent, waiting for CONNECT_B3_RESP
    IncConPending,
    /// Accepted, waiting for the adapter
    IncActPending,
    /// Data transfer
    Connected,
    /// DISCONNECT_B3_REQ issued
    OutgDisPending,
    /// DISCONNECT_B3_IND sent, waiting for DISCONNECT_B3_RESP
    IncDisPending,
    /// RESET_B3_REQ issued
    OutgResPending,
    /// RESET_B3_IND sent for a remote reset, waiting for RESET_B3_RESP
    IncResPending,
}

/// DATA_B3_CONF held back until the remote confirms delivery
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct DataAck {
    pub(crate) appl: u16,
    pub(crate) handle: u16,
    pub(crate) number: u16,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NcciData {
    pub(crate) tx: VecDeque<TxBuffer>,
    pub(crate) ack: VecDeque<DataAck>,
    pub(crate) data_pending: usize,
    pub(crate) data_ack_pending: usize,
    pub(crate) disc_ack_needed: bool,
    pub(crate) ncpi: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct NcciTable {
    pub(crate) ncci_ch: Vec<u8>,
    pub(crate) ch_ncci: Vec<u8>,
    pub(crate) ncci_plci: Vec<u8>,
    pub(crate) ncci_state: Vec<NcciState>,
    pub(crate) ncci_next: Vec<u8>,
    pub(crate) data: Vec<NcciData>,
    pub(crate) mapping_bug: u32,
}

impl Default for NcciTable {
    fn default() -> Self {
        Self {
            ncci_ch: vec![0; MAX_NCCI + 1],
            ch_ncci: vec![0; MAX_NL_CHANNEL + 1],
            ncci_plci: vec![0; MAX_NCCI + 1],
            ncci_state: vec![NcciState::Idle; MAX_NCCI + 1],
            ncci_next: vec![0; MAX_NCCI + 1],
            data: vec![NcciData::default(); MAX_NCCI + 1],
            mapping_bug: 0,
        }
    }
}

/// Observable state of an NCCI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcciSnapshot {
    /// NCCI number
    pub ncci: u8,
    /// Owning PLCI
    pub plci: u8,
    /// Adapter channel, 0 while the number is only reserved
    pub ch: u8,
    /// B3 state
    pub state: NcciState,
    /// DATA_B3_REQ accepted and not yet confirmed
    pub data_pending: usize,
    /// DATA_B3_REQ with delivery confirmation not yet confirmed
    pub data_ack_pending: usize,
    /// DATA_B3_REQ waiting for the adapter
    pub queued_tx: usize,
}

impl NcciTable {
    /// NCCIs of a ring in ring order, starting at `head`
    pub(crate) fn ring(&self, head: u8) -> Vec<u8> {
        let mut out = Vec::new();
        let mut i = head;
        while i != 0 && out.len() <= MAX_NCCI {
            out.push(i);
            i = self.ncci_next[i as usize];
            if i == head {
                break;
            }
        }
        out
    }

    /// True while channel and NCCI point at each other
    pub(crate) fn mapping_valid(&self, ncci: u8) -> bool {
        let n = ncci as usize;
        n != 0 && n <= MAX_NCCI && self.ncci_plci[n] != 0 && {
            let ch = self.ncci_ch[n];
            ch != 0 && self.ch_ncci[ch as usize] == ncci
        }
    }

    /// NCCI mapped to `ch` for PLCI `p`
    pub(crate) fn ncci_of(&self, p: u8, ch: u8) -> Option<u8> {
        let ncci = *self.ch_ncci.get(ch as usize)?;
        (ncci != 0 && self.ncci_plci[ncci as usize] == p).then_some(ncci)
    }

    /// True if `ncci` is in range and owned by `p`
    pub(crate) fn owned_by(&self, ncci: u16, p: u8) -> bool {
        ncci != 0 && (ncci as usize) <= MAX_NCCI && self.ncci_plci[ncci as usize] == p
    }

    pub(crate) fn snapshot(&self, ncci: u8) -> Option<NcciSnapshot> {
        let n = ncci as usize;
        if n == 0 || n > MAX_NCCI || self.ncci_plci[n] == 0 {
            return None;
        }
        let d = &self.data[n];
        Some(NcciSnapshot {
            ncci,
            plci: self.ncci_plci[n],
            ch: if self.mapping_valid(ncci) { self.ncci_ch[n] } else { 0 },
            state: self.ncci_state[n],
            data_pending: d.data_pending,
            data_ack_pending: d.data_ack_pending,
            queued_tx: d.tx.len(),
        })
    }
}

impl Adapter {
    /// NCCI for channel `ch` of PLCI `p`, establishing the mapping if needed
    pub(crate) fn get_ncci(&mut self, p: u8, ch: u8, force_ncci: u8) -> u8 {
        let chu = ch as usize;
        let t = &mut self.ncci;
        if ch != 0 && t.ch_ncci[chu] != 0 {
            let ncci = t.ch_ncci[chu];
            if t.ncci_plci[ncci as usize] != p {
                t.mapping_bug += 1;
                log::warn!(
                    "NCCI mapping exists {} {ch:02x} {ncci:02x} owner {:02x} requested by {p:02x}",
                    t.mapping_bug,
                    t.ncci_plci[ncci as usize]
                );
            }
            return ncci;
        }
        let ncci = if force_ncci != 0 {
            force_ncci
        } else if ch != 0 && chu <= MAX_NCCI && t.ncci_plci[chu] == 0 {
            ch
        } else if let Some(n) = (1..=MAX_NCCI).find(|&n| t.ncci_plci[n] == 0) {
            n as u8
        } else {
            t.mapping_bug += 1;
            log::warn!("NCCI mapping overflow {} {ch:02x} {p:02x}", t.mapping_bug);
            self.ncci_overflow_scan();
            let alias = if (1..=MAX_NCCI).contains(&chu) {
                ch
            } else {
                ((chu.max(1) - 1) % MAX_NCCI + 1) as u8
            };
            let prev = self.ncci.ncci_plci[alias as usize];
            if prev != 0 && prev != p && self.valid_plci(prev) {
                self.ncci_unlink(prev, alias);
            }
            alias
        };
        let n = ncci as usize;
        let t = &mut self.ncci;
        let old_ch = t.ncci_ch[n] as usize;
        if old_ch != 0 && t.ch_ncci[old_ch] == ncci {
            t.ch_ncci[old_ch] = 0;
        }
        t.ncci_plci[n] = p;
        t.ncci_state[n] = NcciState::Idle;
        t.ncci_ch[n] = ch;
        if ch != 0 {
            t.ch_ncci[chu] = ncci;
        }
        let head = self.pl(p).ncci_ring_list;
        if !self.ncci.ring(head).contains(&ncci) {
            if head == 0 {
                self.pl_mut(p).ncci_ring_list = ncci;
                self.ncci.ncci_next[n] = ncci;
            } else {
                let t = &mut self.ncci;
                t.ncci_next[n] = t.ncci_next[head as usize];
                t.ncci_next[head as usize] = ncci;
            }
        }
        log::debug!("NCCI mapping established {ch:02x} {ncci:02x} plci {p:02x}");
        ncci
    }

    /// Logs the owner of every NCCI and checks every PLCI ring closes
    fn ncci_overflow_scan(&self) {
        for n in 1..=MAX_NCCI {
            log::trace!(
                "ncci {n:02x} plci {:02x} ch {:02x} next {:02x}",
                self.ncci.ncci_plci[n],
                self.ncci.ncci_ch[n],
                self.ncci.ncci_next[n]
            );
        }
        for pl in self.plci.iter().filter(|pl| pl.id != 0 && pl.ncci_ring_list != 0) {
            let head = pl.ncci_ring_list;
            let mut i = head;
            let mut steps = 0;
            loop {
                i = self.ncci.ncci_next[i as usize];
                steps += 1;
                if i == head {
                    break;
                }
                if i == 0 || steps > MAX_NCCI {
                    log::warn!("NCCI ring of plci {:02x} does not close", pl.id);
                    break;
                }
            }
        }
    }

    /// Removes `ncci` from the ring of PLCI `p`
    fn ncci_unlink(&mut self, p: u8, ncci: u8) {
        let head = self.pl(p).ncci_ring_list;
        let t = &mut self.ncci;
        let mut i = head;
        let mut steps = 0;
        while i != 0
            && t.ncci_next[i as usize] != head
            && t.ncci_next[i as usize] != ncci
            && steps <= MAX_NCCI
        {
            i = t.ncci_next[i as usize];
            steps += 1;
        }
        if i != 0 && t.ncci_next[i as usize] == ncci {
            t.ncci_next[i as usize] = t.ncci_next[ncci as usize];
            if i == ncci {
                self.pl_mut(p).ncci_ring_list = 0;
            } else if head == ncci {
                self.pl_mut(p).ncci_ring_list = i;
            }
        }
        self.ncci.ncci_next[ncci as usize] = 0;
    }

    /// Releases one NCCI of `p`, or all of them for `ncci == 0`. With `preserve_ncci` the
    /// channel is unmapped but the NCCI number stays reserved for the PLCI
    pub(crate) fn ncci_remove(&mut self, appls: &mut ApplTable, p: u8, ncci: u8, preserve_ncci: bool) {
        if ncci != 0 {
            if self.ncci.ncci_plci[ncci as usize] != p {
                self.ncci.mapping_bug += 1;
                log::warn!("NCCI mapping doesn't exist {} {ncci:02x} plci {p:02x}", self.ncci.mapping_bug);
                return;
            }
            self.ncci_release(appls, p, ncci, preserve_ncci);
            if !preserve_ncci {
                self.ncci_unlink(p, ncci);
            }
        } else {
            for n in 1..=MAX_NCCI as u8 {
                if self.ncci.ncci_plci[n as usize] == p {
                    self.ncci_release(appls, p, n, preserve_ncci);
                    if !preserve_ncci {
                        self.ncci.ncci_next[n as usize] = 0;
                    }
                }
            }
            if !preserve_ncci {
                self.pl_mut(p).ncci_ring_list = 0;
            }
        }
    }

    fn ncci_release(&mut self, appls: &mut ApplTable, p: u8, ncci: u8, preserve_ncci: bool) {
        self.ncci_free_receive_buffers(appls, p, ncci);
        self.cleanup_ncci_data(appls, ncci);
        let n = ncci as usize;
        let t = &mut self.ncci;
        let ch = t.ncci_ch[n];
        log::debug!("NCCI mapping released {ch:02x} {ncci:02x} plci {p:02x}");
        if t.ch_ncci[ch as usize] == ncci {
            t.ch_ncci[ch as usize] = 0;
        }
        t.ncci_state[n] = NcciState::Idle;
        t.data[n].disc_ack_needed = false;
        if !preserve_ncci {
            t.ncci_ch[n] = 0;
            t.ncci_plci[n] = 0;
        }
    }

    /// Returns queued transmit buffers of `ncci` to their pools and zeroes its counters.
    /// A buffer in flight to the adapter is not queued here and is freed on its completion
    pub(crate) fn cleanup_ncci_data(&mut self, appls: &mut ApplTable, ncci: u8) {
        let d = &mut self.ncci.data[ncci as usize];
        for b in d.tx.drain(..) {
            if let Some(a) = appls.get_mut(b.appl) {
                a.transmit_buffer_free(b.tx_ref);
            }
        }
        d.ack.clear();
        d.data_pending = 0;
        d.data_ack_pending = 0;
    }

    fn ncci_free_receive_buffers(&mut self, appls: &mut ApplTable, p: u8, ncci: u8) {
        if let Some(a) = self.pl(p).appl.and_then(|a| appls.get_mut(a)) {
            a.free_receive_buffers(self.controller, ncci);
        }
    }

    /// NCCI number reserved by an earlier `preserve_ncci` removal
    pub(crate) fn preserved_ncci(&self, p: u8) -> u8 {
        self.ncci
            .ring(self.pl(p).ncci_ring_list)
            .into_iter()
            .find(|&n| self.ncci.ncci_plci[n as usize] == p && !self.ncci.mapping_valid(n))
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub mod ncci_test {
    use super::*;
    use crate::config::{AdapterProfile, EngineConfig};

    fn adapter() -> (Adapter, ApplTable) {
        let a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        (a, ApplTable::default())
    }

    fn assert_bijective(a: &Adapter) {
        for n in 1..=MAX_NCCI as u8 {
            if a.ncci.mapping_valid(n) {
                let ch = a.ncci.ncci_ch[n as usize];
                let owners = a.ncci.ch_ncci.iter().filter(|&&x| x == n).count();
                assert_eq!(owners, 1, "ncci {n} ch {ch}");
            }
        }
    }

    #[test]
    fn test_prefers_channel_number() {
        let (mut a, _) = adapter();
        let p = a.get_plci().unwrap();
        assert_eq!(a.get_ncci(p, 5, 0), 5);
        assert_eq!(a.ncci.ncci_plci[5], p);
        assert_eq!(a.pl(p).ncci_ring_list, 5);
        // channel 5's preferred number is taken by another PLCI
        let q = a.get_plci().unwrap();
        a.ncci.ncci_plci[6] = q;
        assert_eq!(a.get_ncci(p, 6, 0), 1);
    }

    #[test]
    fn test_idempotent() {
        let (mut a, _) = adapter();
        let p = a.get_plci().unwrap();
        let n = a.get_ncci(p, 3, 0);
        let ring = a.ncci.ring(a.pl(p).ncci_ring_list);
        assert_eq!(a.get_ncci(p, 3, 0), n);
        assert_eq!(a.ncci.ring(a.pl(p).ncci_ring_list), ring);
        assert_eq!(a.ncci_mapping_bug(), 0);
    }

    #[test]
    fn test_ring_link_unlink() {
        let (mut a, mut appls) = adapter();
        let p = a.get_plci().unwrap();
        for ch in [1, 2, 3] {
            a.get_ncci(p, ch, 0);
        }
        let mut ring = a.ncci.ring(a.pl(p).ncci_ring_list);
        ring.sort();
        assert_eq!(ring, vec![1, 2, 3]);
        a.ncci_remove(&mut appls, p, 1, false);
        let mut ring = a.ncci.ring(a.pl(p).ncci_ring_list);
        ring.sort();
        assert_eq!(ring, vec![2, 3]);
        assert_eq!(a.ncci.ch_ncci[1], 0);
        a.ncci_remove(&mut appls, p, 0, false);
        assert_eq!(a.pl(p).ncci_ring_list, 0);
        assert!(a.ncci.ncci_plci.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_rings_stay_closed_per_plci() {
        let (mut a, _) = adapter();
        let p = a.get_plci().unwrap();
        let q = a.get_plci().unwrap();
        assert_eq!(a.get_ncci(p, 1, 0), 1);
        assert_eq!(a.get_ncci(q, 2, 0), 2);
        assert_eq!(a.get_ncci(p, 3, 0), 3);
        assert_eq!(a.ncci.ring(a.pl(p).ncci_ring_list), vec![1, 3]);
        assert_eq!(a.ncci.ring(a.pl(q).ncci_ring_list), vec![2]);
        assert_eq!(a.ncci.ncci_next[3], 1);
        assert_eq!(a.ncci.ncci_next[2], 2);
        assert_bijective(&a);
    }

    #[test]
    fn test_remove_foreign_ncci_is_anomaly() {
        let (mut a, mut appls) = adapter();
        let p = a.get_plci().unwrap();
        let q = a.get_plci().unwrap();
        let n = a.get_ncci(p, 1, 0);
        a.ncci_remove(&mut appls, q, n, false);
        assert_eq!(a.ncci_mapping_bug(), 1);
        assert_eq!(a.ncci.ncci_plci[n as usize], p);
    }

    #[test]
    fn test_preserve_and_reuse() {
        let (mut a, mut appls) = adapter();
        let p = a.get_plci().unwrap();
        let n = a.get_ncci(p, 4, 0);
        a.ncci_remove(&mut appls, p, 0, true);
        assert_eq!(a.ncci.ch_ncci[4], 0);
        assert_eq!(a.preserved_ncci(p), n);
        // renegotiated connection comes up on a different channel
        assert_eq!(a.get_ncci(p, 9, n), n);
        assert_eq!(a.ncci.ring(a.pl(p).ncci_ring_list), vec![n]);
        assert_bijective(&a);
    }

    #[test]
    fn test_exhaustion_aliases_channel() {
        let (mut a, _) = adapter();
        let p = a.get_plci().unwrap();
        for ch in 1..=MAX_NCCI as u8 {
            assert_eq!(a.get_ncci(p, ch, 0), ch);
        }
        assert_eq!(a.ncci_mapping_bug(), 0);
        let n = a.get_ncci(p, 200, 0);
        assert_eq!(n, ((200 - 1) % MAX_NCCI + 1) as u8);
        assert_eq!(a.ncci_mapping_bug(), 1);
        assert_eq!(a.ncci.ch_ncci[200], n);
        // the channel that owned the aliased number lost its mapping
        assert_eq!(a.ncci.ch_ncci[n as usize], 0);
        assert_bijective(&a);
        assert_eq!(a.ncci.ring(a.pl(p).ncci_ring_list).len(), MAX_NCCI);
    }
}

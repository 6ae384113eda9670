//! Registered applications, their receive buffer accounting and transmit buffer pools

use crate::{
    CapiError, CapiResult,
    config::{ApplOptions, EngineConfig, MAX_APPL, MAX_DATA_B3},
};

/// Parameters an application registers with
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ApplParams {
    /// Maximum number of B3 connections, 0 selects 1
    pub max_logical_connections: u16,
    /// Maximum DATA_B3_IND outstanding per NCCI, 0 selects the engine default
    pub max_b_data_blocks: u16,
    /// Maximum DATA_B3 payload, 0 selects the engine default
    pub max_b_data_len: u16,
}

/// Bitmask over application IDs
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct ApplMask([u32; 8]);

impl ApplMask {
    /// Marks `appl`
    pub fn set(&mut self, appl: u16) {
        if let Some(w) = self.0.get_mut(appl as usize >> 5) {
            *w |= 1 << (appl & 31);
        }
    }

    /// Unmarks `appl`
    pub fn clear(&mut self, appl: u16) {
        if let Some(w) = self.0.get_mut(appl as usize >> 5) {
            *w &= !(1 << (appl & 31));
        }
    }

    /// True if `appl` is marked
    pub fn test(&self, appl: u16) -> bool {
        self.0
            .get(appl as usize >> 5)
            .is_some_and(|w| w & (1 << (appl & 31)) != 0)
    }

    /// Unmarks everything
    pub fn clear_all(&mut self) {
        self.0 = [0; 8];
    }

    /// True if nothing is marked
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Marked application IDs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (1..=MAX_APPL).filter(|a| self.test(*a))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct RxSlot {
    controller: u8,
    ncci: u8,
}

/// A registered application
#[derive(Debug, Clone)]
pub struct Application {
    id: u16,
    max_ncci_data: u16,
    max_data_len: u16,
    rx: Vec<Option<RxSlot>>,
    tx: Vec<Option<Vec<u8>>>,
    number: u16,
    /// Consecutive DATA_B3 indications refused for lack of receive buffers
    pub(crate) flow_ctrl_timer: u16,
    /// Options set through the manufacturer options request
    pub(crate) options: ApplOptions,
}

impl Application {
    fn new(id: u16, params: ApplParams, cfg: &EngineConfig) -> Self {
        let conns = params.max_logical_connections.max(1) as usize;
        let max_ncci_data = match params.max_b_data_blocks {
            0 => cfg.default_max_ncci_data,
            n => n,
        };
        let max_data_len = match params.max_b_data_len {
            0 => cfg.default_max_data_len,
            n => n,
        };
        Self {
            id,
            max_ncci_data,
            max_data_len,
            rx: vec![None; conns * max_ncci_data as usize],
            tx: vec![None; conns * MAX_DATA_B3],
            number: 0,
            flow_ctrl_timer: 0,
            options: ApplOptions::empty(),
        }
    }

    /// Application ID
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Receive buffers per NCCI
    pub fn max_ncci_data(&self) -> u16 {
        self.max_ncci_data
    }

    /// Largest DATA_B3 payload the application handles
    pub fn max_data_len(&self) -> u16 {
        self.max_data_len
    }

    /// Next message number for an indication
    pub(crate) fn next_number(&mut self) -> u16 {
        let n = self.number;
        self.number = self.number.wrapping_add(1);
        n
    }

    /// Receive buffers held by the application for an NCCI
    pub fn rx_outstanding(&self, controller: u8, ncci: u8) -> usize {
        self.rx
            .iter()
            .flatten()
            .filter(|s| s.controller == controller && s.ncci == ncci)
            .count()
    }

    /// True if another DATA_B3_IND may be delivered on this NCCI
    pub(crate) fn can_receive(&self, controller: u8, ncci: u8) -> bool {
        self.rx_outstanding(controller, ncci) < self.max_ncci_data as usize
            && self.rx.iter().any(Option::is_none)
    }

    /// Takes a receive buffer for a DATA_B3_IND, returning its handle
    pub(crate) fn receive_buffer_get(&mut self, controller: u8, ncci: u8) -> Option<u16> {
        if !self.can_receive(controller, ncci) {
            return None;
        }
        let i = self.rx.iter().position(Option::is_none)?;
        self.rx[i] = Some(RxSlot { controller, ncci });
        Some(i as u16)
    }

    /// Returns a receive buffer named in a DATA_B3_RESP. False if the handle does not
    /// belong to that NCCI
    pub(crate) fn receive_buffer_free(&mut self, handle: u16, controller: u8, ncci: u8) -> bool {
        match self.rx.get_mut(handle as usize) {
            Some(slot) if *slot == Some(RxSlot { controller, ncci }) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Drops every receive buffer held for an NCCI
    pub(crate) fn free_receive_buffers(&mut self, controller: u8, ncci: u8) {
        for slot in self.rx.iter_mut() {
            if slot.is_some_and(|s| s.controller == controller && s.ncci == ncci) {
                *slot = None;
            }
        }
    }

    /// Stores a DATA_B3_REQ payload, returning the reference carried in the queued request
    pub(crate) fn transmit_buffer_set(&mut self, data: Vec<u8>) -> Option<u32> {
        let i = self.tx.iter().position(Option::is_none)?;
        self.tx[i] = Some(data);
        Some(i as u32 + 1)
    }

    /// Payload behind a transmit reference
    pub(crate) fn transmit_buffer_get(&self, r: u32) -> Option<&[u8]> {
        self.tx.get((r as usize).checked_sub(1)?)?.as_deref()
    }

    /// Releases a transmit reference
    pub(crate) fn transmit_buffer_free(&mut self, r: u32) {
        if let Some(slot) = (r as usize).checked_sub(1).and_then(|i| self.tx.get_mut(i)) {
            *slot = None;
        }
    }

    /// Transmit buffers in use
    pub fn tx_in_use(&self) -> usize {
        self.tx.iter().flatten().count()
    }
}

/// All registered applications, indexed by ID
#[derive(Debug, Clone)]
pub struct ApplTable {
    appls: Vec<Option<Application>>,
}

impl Default for ApplTable {
    fn default() -> Self {
        Self {
            appls: vec![None; MAX_APPL as usize + 1],
        }
    }
}

impl ApplTable {
    /// Registers `id`
    pub fn register(&mut self, id: u16, params: ApplParams, cfg: &EngineConfig) -> CapiResult<()> {
        match self.appls.get_mut(id as usize) {
            Some(Some(_)) => Err(CapiError::ApplicationAlreadyRegistered(id)),
            Some(slot) if id != 0 => {
                *slot = Some(Application::new(id, params, cfg));
                Ok(())
            }
            _ => Err(CapiError::IllegalApplication(id)),
        }
    }

    /// Removes `id`
    pub fn release(&mut self, id: u16) -> CapiResult<Application> {
        self.appls
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(CapiError::IllegalApplication(id))
    }

    /// Registered application
    pub fn get(&self, id: u16) -> Option<&Application> {
        self.appls.get(id as usize)?.as_ref()
    }

    /// Registered application
    pub fn get_mut(&mut self, id: u16) -> Option<&mut Application> {
        self.appls.get_mut(id as usize)?.as_mut()
    }

    /// True if `id` is registered
    pub fn is_registered(&self, id: u16) -> bool {
        self.get(id).is_some()
    }

    /// Registered IDs in ascending order
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.appls.iter().flatten().map(|a| a.id)
    }
}

#[cfg(test)]
pub mod appl_test {
    use super::*;

    #[test]
    fn test_mask() {
        let mut m = ApplMask::default();
        assert!(m.is_empty());
        m.set(1);
        m.set(33);
        m.set(240);
        assert!(m.test(33));
        assert!(!m.test(32));
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![1, 33, 240]);
        m.clear(33);
        assert!(!m.test(33));
        m.clear_all();
        assert!(m.is_empty());
    }

    #[test]
    fn test_register_release() {
        let cfg = EngineConfig::default();
        let mut t = ApplTable::default();
        t.register(5, ApplParams::default(), &cfg).unwrap();
        assert_eq!(
            t.register(5, ApplParams::default(), &cfg),
            Err(CapiError::ApplicationAlreadyRegistered(5))
        );
        assert_eq!(
            t.register(0, ApplParams::default(), &cfg),
            Err(CapiError::IllegalApplication(0))
        );
        assert_eq!(
            t.register(MAX_APPL + 1, ApplParams::default(), &cfg),
            Err(CapiError::IllegalApplication(MAX_APPL + 1))
        );
        assert_eq!(t.ids().collect::<Vec<_>>(), vec![5]);
        assert!(t.release(5).is_ok());
        assert!(t.release(5).is_err());
    }

    #[test]
    fn test_receive_buffers() {
        let cfg = EngineConfig::default();
        let params = ApplParams {
            max_logical_connections: 2,
            max_b_data_blocks: 2,
            max_b_data_len: 0,
        };
        let mut a = Application::new(1, params, &cfg);
        let h1 = a.receive_buffer_get(1, 1).unwrap();
        let h2 = a.receive_buffer_get(1, 1).unwrap();
        assert_ne!(h1, h2);
        // per NCCI limit reached
        assert!(a.receive_buffer_get(1, 1).is_none());
        // other NCCI still has room
        assert!(a.receive_buffer_get(1, 2).is_some());
        assert!(!a.receive_buffer_free(h1, 1, 2));
        assert!(a.receive_buffer_free(h1, 1, 1));
        assert!(!a.receive_buffer_free(h1, 1, 1));
        assert_eq!(a.rx_outstanding(1, 1), 1);
        a.free_receive_buffers(1, 1);
        assert_eq!(a.rx_outstanding(1, 1), 0);
    }

    #[test]
    fn test_transmit_buffers() {
        let mut a = Application::new(1, ApplParams::default(), &EngineConfig::default());
        let r = a.transmit_buffer_set(vec![1, 2, 3]).unwrap();
        assert_ne!(r, 0);
        assert_eq!(a.transmit_buffer_get(r), Some(&[1u8, 2, 3][..]));
        assert_eq!(a.tx_in_use(), 1);
        a.transmit_buffer_free(r);
        assert_eq!(a.transmit_buffer_get(r), None);
        a.transmit_buffer_free(0);
        assert_eq!(a.tx_in_use(), 0);
    }
}

//! The engine front end: adapters, registered applications, the adapter transport and
//! the application message sink
//!
//! Every entry point runs to completion and then flushes: adapter requests queued by
//! the handlers go to the [XdiTransport], CAPI messages to the [MessageSink].
//! Indications get their message number from the receiving application on the way out.

use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

use crate::{
    CapiError, CapiResult,
    appl::{ApplParams, ApplTable, Application},
    capi::{Adapter, NcciSnapshot, PlciSnapshot},
    config::{AdapterProfile, EngineConfig, MAX_MSG_SIZE},
    message::{CapiMessage, HEADER_LEN, SubCommand},
    xdi::{IndResponse, XdiEvent, XdiTransport},
};

/// Receives the CAPI messages the engine sends to applications
pub trait MessageSink {
    /// Delivers `msg` to application `appl`
    fn deliver(&mut self, appl: u16, msg: CapiMessage);
}

/// A [MessageSink] keeping every message in order. Clones share the queue
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    msgs: Arc<RwLock<VecDeque<CapiMessage>>>,
}

impl RecordingSink {
    /// New empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything delivered so far
    pub fn take_all(&self) -> Vec<CapiMessage> {
        match self.msgs.write() {
            Ok(mut m) => m.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Removes and returns the oldest message
    pub fn pop(&self) -> Option<CapiMessage> {
        self.msgs.write().ok()?.pop_front()
    }

    /// Number of messages not yet taken
    pub fn len(&self) -> usize {
        self.msgs.read().map(|m| m.len()).unwrap_or(0)
    }

    /// True if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageSink for RecordingSink {
    fn deliver(&mut self, _appl: u16, msg: CapiMessage) {
        if let Ok(mut m) = self.msgs.write() {
            m.push_back(msg);
        }
    }
}

/// CAPI engine over a set of adapters
#[derive(Debug)]
pub struct CapiEngine<T: XdiTransport, S: MessageSink> {
    config: EngineConfig,
    adapters: Vec<Adapter>,
    appls: ApplTable,
    xdi: T,
    sink: S,
}

impl<T: XdiTransport, S: MessageSink> CapiEngine<T, S> {
    /// New engine without adapters
    pub fn new(config: EngineConfig, xdi: T, sink: S) -> Self {
        Self {
            config,
            adapters: Vec::new(),
            appls: ApplTable::default(),
            xdi,
            sink,
        }
    }

    /// Attaches an adapter and returns its controller number
    pub fn add_adapter(&mut self, profile: AdapterProfile) -> u8 {
        let controller = self.adapters.len() as u8 + 1;
        log::info!(
            "controller {controller}: {} PLCIs, {} B channels, features {:?}",
            profile.max_plci,
            profile.channels,
            profile.features
        );
        self.adapters.push(Adapter::new(controller, profile, self.config));
        controller
    }

    /// Adapter behind a controller number
    pub fn adapter(&self, controller: u8) -> Option<&Adapter> {
        self.adapters.get((controller as usize).checked_sub(1)?)
    }

    /// State of one PLCI on `controller`
    pub fn plci_snapshot(&self, controller: u8, plci: u8) -> Option<PlciSnapshot> {
        self.adapter(controller)?.plci_snapshot(plci)
    }

    /// State of one NCCI on `controller`
    pub fn ncci_snapshot(&self, controller: u8, ncci: u8) -> Option<NcciSnapshot> {
        self.adapter(controller)?.ncci_snapshot(ncci)
    }

    /// How often `controller` saw an NCCI mapping anomaly
    pub fn ncci_mapping_bug(&self, controller: u8) -> Option<u32> {
        Some(self.adapter(controller)?.ncci_mapping_bug())
    }

    fn adapter_index(&self, controller: u8) -> CapiResult<usize> {
        let c = controller & 0x7F;
        if c == 0 || c as usize > self.adapters.len() {
            return Err(CapiError::IllegalController(c));
        }
        Ok(c as usize - 1)
    }

    /// Registered application
    pub fn application(&self, appl: u16) -> Option<&Application> {
        self.appls.get(appl)
    }

    /// Registers application `appl`
    pub fn register_application(&mut self, appl: u16, params: ApplParams) -> CapiResult<()> {
        self.appls.register(appl, params, &self.config)?;
        log::info!("application {appl} registered {params:?}");
        Ok(())
    }

    /// Releases application `appl` and everything it holds on every adapter
    pub fn release_application(&mut self, appl: u16) -> CapiResult<()> {
        if !self.appls.is_registered(appl) {
            return Err(CapiError::IllegalApplication(appl));
        }
        for a in self.adapters.iter_mut() {
            a.release_appl(&mut self.appls, appl);
        }
        self.flush();
        self.appls.release(appl)?;
        log::info!("application {appl} released");
        Ok(())
    }

    /// Entry for a message from application `appl`. An error means the message was not
    /// taken and no confirmation will follow
    pub fn api_put(&mut self, appl: u16, msg: CapiMessage) -> CapiResult<()> {
        let len = msg.header.length as usize;
        if len < HEADER_LEN || len > MAX_MSG_SIZE || len != HEADER_LEN + msg.params.len() {
            log::warn!("appl {appl}: bad message length {len} for {} parameter bytes", msg.params.len());
            return Err(CapiError::BadMessage);
        }
        if !self.appls.is_registered(appl) {
            return Err(CapiError::IllegalApplication(appl));
        }
        let i = self.adapter_index(msg.header.controller)?;
        let res = self.adapters[i].api_put(&mut self.appls, appl, msg);
        self.flush();
        res
    }

    /// Entry for a completion or indication from the adapter of `controller`
    pub fn callback(&mut self, controller: u8, event: XdiEvent) -> IndResponse {
        let Ok(i) = self.adapter_index(controller) else {
            log::error!("event for unknown controller {controller}: {event:?}");
            return IndResponse::Accepted;
        };
        let r = self.adapters[i].callback(&mut self.appls, event);
        self.flush();
        r
    }

    /// Hands everything queued to the transport and the sink
    fn flush(&mut self) {
        for a in self.adapters.iter_mut() {
            a.kick_all();
            for req in a.xdi_out.drain(..) {
                log::trace!("xdi {req:?}");
                self.xdi.request(req);
            }
            for mut o in a.outbox.drain(..) {
                let Some(appl) = self.appls.get_mut(o.appl) else {
                    log::debug!("message for released application {} dropped", o.appl);
                    continue;
                };
                if o.msg.header.subcommand == SubCommand::Ind as u8 {
                    o.msg.header.number = appl.next_number();
                }
                self.sink.deliver(o.appl, o.msg);
            }
        }
    }
}

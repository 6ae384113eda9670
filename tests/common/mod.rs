#![allow(dead_code)]

use diva_capi::{
    appl::ApplParams,
    capi::{Adapter, PlciSnapshot},
    config::{AdapterProfile, EngineConfig},
    engine::{CapiEngine, RecordingSink},
    info::Info,
    message::{CapiMessage, Command, Out, SubCommand, encode_params},
    xdi::{IndResponse, NlInd, Rc, SigInd, XdiEvent, XdiRequest, simulation::SimulatedXdi},
};

pub const CONTROLLER: u8 = 1;

/// Engine on one simulated adapter, with the test's view of the transport and the sink
pub struct Harness {
    pub engine: CapiEngine<SimulatedXdi, RecordingSink>,
    pub xdi: SimulatedXdi,
    pub sink: RecordingSink,
    number: u16,
}

impl Harness {
    pub fn new(profile: AdapterProfile) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let xdi = SimulatedXdi::new();
        let sink = RecordingSink::new();
        let mut engine = CapiEngine::new(EngineConfig::default(), xdi.clone(), sink.clone());
        engine.add_adapter(profile);
        Self {
            engine,
            xdi,
            sink,
            number: 0,
        }
    }

    pub fn register(&mut self, appl: u16, params: ApplParams) {
        self.engine.register_application(appl, params).unwrap();
    }

    pub fn adapter(&self) -> &Adapter {
        self.engine.adapter(CONTROLLER).unwrap()
    }

    pub fn plci(&self, p: u8) -> PlciSnapshot {
        self.adapter().plci_snapshot(p).unwrap()
    }

    /// Sends a message and returns the number it was sent with
    pub fn put(&mut self, appl: u16, cmd: Command, sub: SubCommand, id: u32, params: &[Out<'_>]) -> u16 {
        let number = self.next_number();
        let msg = CapiMessage::new(appl, cmd, sub, number, id, encode_params(params));
        self.engine.api_put(appl, msg).unwrap();
        number
    }

    pub fn next_number(&mut self) -> u16 {
        self.number += 1;
        self.number
    }

    /// Completes every adapter request successfully, including the ones issued in
    /// reaction to earlier completions
    pub fn complete_all(&mut self) -> Vec<XdiRequest> {
        let mut done = Vec::new();
        while let Some(req) = self.xdi.pop_request() {
            let ev = self.xdi.complete(&req);
            self.engine.callback(CONTROLLER, ev);
            done.push(req);
        }
        done
    }

    /// Completes the oldest adapter request with `rc`
    pub fn complete_next(&mut self, rc: Rc) -> XdiRequest {
        let req = self.xdi.pop_request().unwrap();
        let ev = self.xdi.complete_with(&req, rc);
        self.engine.callback(CONTROLLER, ev);
        req
    }

    pub fn sig(&mut self, plci: u8, ind: SigInd) {
        self.engine.callback(CONTROLLER, XdiEvent::Sig { plci, ind });
    }

    pub fn nl(&mut self, plci: u8, ind: NlInd) -> IndResponse {
        self.engine.callback(CONTROLLER, XdiEvent::Nl { plci, ind })
    }

    pub fn take(&self) -> Vec<CapiMessage> {
        self.sink.take_all()
    }

    /// Brings up an outgoing speech call for `appl` and returns its PLCI. The network
    /// layer entity is assigned and every message up to CONNECT_ACTIVE_IND is consumed
    pub fn outgoing_call(&mut self, appl: u16) -> u8 {
        let number = self.put(appl, Command::Connect, SubCommand::Req, CONTROLLER as u32, &connect_req(1, b"\x80123"));
        self.complete_all();
        let conf = self.take().into_iter().find(|m| m.is(Command::Connect, SubCommand::Conf)).unwrap();
        assert_eq!(conf.header.number, number);
        assert_eq!(info(&conf), Info::Success);
        let p = conf.header.plci;
        self.sig(p, SigInd::CallCon { ies: vec![] });
        self.complete_all();
        let msgs = self.take();
        assert!(msgs.iter().any(|m| m.is(Command::ConnectActive, SubCommand::Ind)));
        p
    }

    /// Opens a B3 connection on a connected PLCI and returns the NCCI
    pub fn b3_connect(&mut self, appl: u16, p: u8) -> u8 {
        self.put(appl, Command::ConnectB3, SubCommand::Req, id(p, 0), &[Out::S(&[])]);
        let reqs = self.complete_all();
        assert!(reqs.iter().any(|r| r.req == diva_capi::xdi::Req::NConnect));
        let conf = self.take().into_iter().find(|m| m.is(Command::ConnectB3, SubCommand::Conf)).unwrap();
        assert_eq!(info(&conf), Info::Success);
        let ncci = conf.header.ncci as u8;
        assert_ne!(ncci, 0);
        self.nl(p, NlInd::ConnectAck { ch: 1, ncpi: vec![] });
        let active = self.take();
        assert!(active[0].is(Command::ConnectB3Active, SubCommand::Ind));
        ncci
    }
}

/// CAPI identifier on the simulated controller
pub fn id(plci: u8, ncci: u8) -> u32 {
    CONTROLLER as u32 | (plci as u32) << 8 | (ncci as u32) << 16
}

/// Info word at the start of a confirmation
pub fn info(msg: &CapiMessage) -> Info {
    Info::from(word(&msg.params, 0))
}

pub fn word(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

/// CONNECT_REQ parameters: CIP value, called party number, everything else empty
pub fn connect_req(cip: u16, cpn: &[u8]) -> Vec<Out<'_>> {
    let mut p = vec![Out::W(cip), Out::S(cpn)];
    p.extend(std::iter::repeat_n(Out::S(&[]), 8));
    p
}

/// LISTEN_REQ parameters
pub fn listen_req(info_mask: u32, cip_mask: u32) -> [Out<'static>; 5] {
    [Out::D(info_mask), Out::D(cip_mask), Out::D(0), Out::S(&[]), Out::S(&[])]
}

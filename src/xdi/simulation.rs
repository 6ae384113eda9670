//! Simulated adapter transport for unit and integration testing of the engine

use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

use super::{Entity, Rc, Req, XdiEvent, XdiRequest, XdiTransport};

#[derive(Debug, Default)]
struct SimState {
    requests: VecDeque<XdiRequest>,
    next_id: u8,
    next_ch: u8,
}

/// Records every request issued by the engine and builds completions for them.
///
/// Clones share state, so a test keeps one clone while the engine owns the other.
#[derive(Debug, Clone, Default)]
pub struct SimulatedXdi {
    state: Arc<RwLock<SimState>>,
}

impl SimulatedXdi {
    /// New simulated adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns all requests issued so far
    pub fn take_requests(&self) -> Vec<XdiRequest> {
        self.state.write().unwrap().requests.drain(..).collect()
    }

    /// Removes and returns the oldest request
    pub fn pop_request(&self) -> Option<XdiRequest> {
        self.state.write().unwrap().requests.pop_front()
    }

    /// Number of requests not yet taken
    pub fn pending(&self) -> usize {
        self.state.read().unwrap().requests.len()
    }

    /// Successful completion for `req`. Assigns hand out a fresh entity ID and
    /// B3 connects a fresh channel
    pub fn complete(&self, req: &XdiRequest) -> XdiEvent {
        self.complete_with(req, Rc::Ok)
    }

    /// Completion for `req` with a given return code
    pub fn complete_with(&self, req: &XdiRequest, rc: Rc) -> XdiEvent {
        let mut s = self.state.write().unwrap();
        let (id, ch) = match (req.req, req.entity) {
            (Req::Assign, _) if rc.is_ok() => {
                s.next_id = s.next_id.wrapping_add(1).max(1);
                (s.next_id, 0)
            }
            (Req::NConnect, Entity::Nl) if rc.is_ok() => {
                s.next_ch = s.next_ch.wrapping_add(1).max(1);
                (req.id, s.next_ch)
            }
            _ => (req.id, req.ch),
        };
        XdiEvent::ReturnCode {
            plci: req.plci,
            rc,
            id,
            ch,
        }
    }
}

impl XdiTransport for SimulatedXdi {
    fn request(&mut self, req: XdiRequest) {
        self.state.write().unwrap().requests.push_back(req);
    }
}

#[cfg(test)]
pub mod simulation_test {
    use super::*;

    fn req(r: Req, entity: Entity) -> XdiRequest {
        XdiRequest {
            controller: 1,
            plci: 1,
            entity,
            id: 0,
            req: r,
            ch: 0,
            data: vec![],
        }
    }

    #[test]
    fn test_records_and_completes() {
        let sim = SimulatedXdi::new();
        let mut t = sim.clone();
        t.request(req(Req::Assign, Entity::Sig));
        t.request(req(Req::NConnect, Entity::Nl));
        assert_eq!(sim.pending(), 2);
        let reqs = sim.take_requests();
        assert_eq!(sim.pending(), 0);
        match sim.complete(&reqs[0]) {
            XdiEvent::ReturnCode { id, rc, .. } => {
                assert_eq!(rc, Rc::Ok);
                assert_eq!(id, 1);
            }
            e => panic!("unexpected {e:?}"),
        }
        match sim.complete(&reqs[1]) {
            XdiEvent::ReturnCode { ch, .. } => assert_eq!(ch, 1),
            e => panic!("unexpected {e:?}"),
        }
    }
}

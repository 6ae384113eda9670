//! B1 DSP resource adjustment shared by the feature commands

use crate::{
    capi::{Adapter, plci::Origin},
    config::B1Facilities,
    xdi::{Entity, Rc, Req},
};

impl Adapter {
    /// Switches the B1 resources of `p` to `new`. If an adapter entity exists the
    /// change is sent as a [Req::B1Config] from an internal command and true is
    /// returned: the caller must wait for the completion and pass it to
    /// [Adapter::b1_resource_rc]. Otherwise the facilities are only recorded
    pub(crate) fn adjust_b1_facilities(&mut self, p: u8, new: B1Facilities) -> bool {
        let pl = self.pl_mut(p);
        if pl.b1_facilities == new {
            return false;
        }
        log::debug!("plci {p}: b1 facilities {:?} -> {new:?}", pl.b1_facilities);
        let entity = if pl.sig.id != 0 {
            Entity::Sig
        } else if pl.nl.id != 0 {
            Entity::Nl
        } else {
            pl.b1_facilities = new;
            return false;
        };
        pl.b1_prev = Some(pl.b1_facilities);
        pl.b1_facilities = new;
        let data = new.bits().to_le_bytes().to_vec();
        self.push_req(p, entity, Req::B1Config, 0, 0, data, Origin::Internal);
        true
    }

    /// Sends a DSP parameter block (DTMF, echo canceller, mixer and voice coefficients)
    /// to whichever entity of `p` carries the B channel. False if there is none
    pub(crate) fn dsp_req(&mut self, p: u8, data: Vec<u8>, origin: Origin) -> bool {
        let pl = self.pl(p);
        let entity = if pl.nl.id != 0 {
            Entity::Nl
        } else if pl.sig.id != 0 {
            Entity::Sig
        } else {
            log::debug!("plci {p}: no entity for DSP request");
            return false;
        };
        self.push_req(p, entity, Req::TelCtrl, 0, 0, data, origin);
        true
    }

    /// Completion of a [Req::B1Config]. A failure restores the previous facilities.
    /// Returns true on success
    pub(crate) fn b1_resource_rc(&mut self, p: u8, rc: Rc) -> bool {
        let pl = self.pl_mut(p);
        let prev = pl.b1_prev.take();
        if rc.is_ok() {
            return true;
        }
        log::error!("plci {p}: b1 resource change failed {rc:?}");
        if let Some(prev) = prev {
            pl.b1_facilities = prev;
        }
        false
    }
}

#[cfg(test)]
pub mod resource_test {
    use crate::{
        capi::{Adapter, plci::Origin},
        config::{AdapterProfile, B1Facilities, EngineConfig},
        xdi::{Entity, Rc, Req},
    };

    #[test]
    fn test_adjust_without_entity() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let p = a.get_plci().unwrap();
        assert!(!a.adjust_b1_facilities(p, B1Facilities::DTMFR));
        assert_eq!(a.pl(p).b1_facilities, B1Facilities::DTMFR);
        assert!(a.pl(p).req_ring.is_empty());
    }

    #[test]
    fn test_adjust_restores_on_failure() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let p = a.get_plci().unwrap();
        a.pl_mut(p).sig.id = 7;
        assert!(a.adjust_b1_facilities(p, B1Facilities::EC));
        assert_eq!(a.pl(p).req_ring[0].req, Req::B1Config);
        assert!(!a.b1_resource_rc(p, Rc::OutOfResources));
        assert_eq!(a.pl(p).b1_facilities, B1Facilities::empty());
        assert!(a.adjust_b1_facilities(p, B1Facilities::EC));
        assert!(a.b1_resource_rc(p, Rc::Ok));
        assert_eq!(a.pl(p).b1_facilities, B1Facilities::EC);
    }

    #[test]
    fn test_dsp_req_prefers_network_layer() {
        let mut a = Adapter::new(1, AdapterProfile::default(), EngineConfig::default());
        let p = a.get_plci().unwrap();
        assert!(!a.dsp_req(p, vec![1], Origin::Internal));
        a.pl_mut(p).sig.id = 2;
        assert!(a.dsp_req(p, vec![1], Origin::Internal));
        a.pl_mut(p).nl.id = 3;
        assert!(a.dsp_req(p, vec![2], Origin::Internal));
        let entities: Vec<_> = a.pl(p).req_ring.iter().map(|r| (r.entity, r.req)).collect();
        assert_eq!(entities, vec![(Entity::Sig, Req::TelCtrl), (Entity::Nl, Req::TelCtrl)]);
    }
}

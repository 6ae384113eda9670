//! DATA_B3 in both directions and receive flow control
//!
//! Transmit: a DATA_B3_REQ parks its buffer on the NCCI transmit queue. [Adapter::send_data]
//! hands one buffer at a time to the adapter while the PLCI has nothing else in flight.
//! The confirmation goes out on completion, or on the remote delivery acknowledgement
//! when the application asked for delivery confirmation.
//!
//! Receive: a DATA_B3_IND needs a free receive buffer of the owning application. Without
//! one the indication is refused (RNR) and the channel is marked flow controlled until the
//! application returns buffers, at which point an N_XON reopens it.

use crate::{
    appl::ApplTable,
    capi::{
        Adapter, Dispatch, NcciState,
        dispatch::MsgCtx,
        ncci::DataAck,
        plci::{Origin, PendingReq, TxBuffer},
    },
    config::{ChannelFlow, DataFlags, MAX_DATA_B3_LENGTH, MAX_NL_CHANNEL},
    info::Info,
    message::{Command, Out, SubCommand},
    parse::ApiParse,
    xdi::{Entity, IndResponse, Rc, Req},
};

/// V.120 header: extension bit, the header is one octet
const V120_HEADER_EXTEND_BIT: u8 = 0x80;
/// V.120 header: break
const V120_HEADER_BREAK_BIT: u8 = 0x40;
/// V.120 header: C1 and C2 set, the frame completes a block
const V120_HEADER_FLUSH: u8 = 0x0C;

/// Flags an application may set on DATA_B3_REQ
const DATA_B3_REQ_FLAGS: DataFlags = DataFlags::QUALIFIER
    .union(DataFlags::MORE_DATA)
    .union(DataFlags::DELIVERY_CONFIRMATION)
    .union(DataFlags::EXPEDITED)
    .union(DataFlags::BREAK);

impl Adapter {
    pub(crate) fn data_b3_req(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let tx_ref = parms[0].dword();
        let handle = parms[2].word();
        let flags = parms[3].word();
        match self.data_b3_check(appls, c, parms[1].word(), flags) {
            Ok(ncci) => {
                let d = &mut self.ncci.data[ncci as usize];
                d.tx.push_back(TxBuffer {
                    appl: c.appl,
                    tx_ref,
                    handle,
                    flags,
                    number: c.number,
                });
                d.data_pending += 1;
                if flags & DataFlags::DELIVERY_CONFIRMATION.bits() != 0 {
                    d.data_ack_pending += 1;
                }
                self.send_data(appls, c.plci);
            }
            Err(info) => {
                log::debug!("DATA_B3_REQ appl {} handle {handle} refused {info:?}", c.appl);
                if let Some(a) = appls.get_mut(c.appl) {
                    a.transmit_buffer_free(tx_ref);
                }
                let info: u16 = info.into();
                self.sendf(c.appl, Command::DataB3, SubCommand::Conf, c.id, c.number, &[Out::W(handle), Out::W(info)]);
            }
        }
        Dispatch::Done
    }

    fn data_b3_check(&self, appls: &ApplTable, c: &MsgCtx<'_>, len: u16, flags: u16) -> Result<u8, Info> {
        let p = c.plci;
        if p == 0 || self.pl(p).appl != Some(c.appl) || !self.ncci.owned_by(c.ncci, p) {
            return Err(Info::WrongIdentifier);
        }
        let ncci = c.ncci as u8;
        if self.ncci.ncci_state[ncci as usize] != NcciState::Connected {
            return Err(Info::WrongState);
        }
        let max_len = appls.get(c.appl).map_or(0, |a| a.max_data_len() as usize);
        if len as usize > MAX_DATA_B3_LENGTH || len as usize > max_len {
            return Err(Info::DataLengthNotSupported);
        }
        if DataFlags::from_bits(flags).is_none_or(|f| !DATA_B3_REQ_FLAGS.contains(f)) {
            return Err(Info::FlagsNotSupported);
        }
        Ok(ncci)
    }

    /// Hands the next queued transmit buffer of `p` to the adapter if the PLCI is idle
    pub(crate) fn send_data(&mut self, appls: &mut ApplTable, p: u8) {
        if !self.valid_plci(p) || self.pl(p).busy() || self.pl(p).remove_pending {
            return;
        }
        for ncci in self.ncci.ring(self.pl(p).ncci_ring_list) {
            let n = ncci as usize;
            let ch = self.ncci.ncci_ch[n];
            if self.ncci.ncci_state[n] != NcciState::Connected
                || self.ch_flow[ch as usize].contains(ChannelFlow::OK_FC_PENDING)
            {
                continue;
            }
            let Some(tx) = self.ncci.data[n].tx.pop_front() else {
                continue;
            };
            let Some(payload) = appls.get(tx.appl).and_then(|a| a.transmit_buffer_get(tx.tx_ref)) else {
                log::warn!("plci {p} ncci {ncci}: transmit buffer {} vanished", tx.tx_ref);
                let d = &mut self.ncci.data[n];
                d.data_pending = d.data_pending.saturating_sub(1);
                continue;
            };
            let mut data = Vec::with_capacity(payload.len() + 1);
            if self.pl(p).bprot.is_v120() {
                let mut h = V120_HEADER_EXTEND_BIT | V120_HEADER_FLUSH;
                if tx.flags & DataFlags::BREAK.bits() != 0 {
                    h |= V120_HEADER_BREAK_BIT;
                }
                data.push(h);
            }
            data.extend_from_slice(payload);
            log::debug!("send_data plci {p} ncci {ncci} ch {ch} len {}", data.len());
            self.push_req(p, Entity::Nl, Req::NData, ch, ncci, data, Origin::Data);
            if let Some(r) = self.pl_mut(p).req_ring.back_mut() {
                r.tx = Some(tx);
            }
            self.send_req(p);
            return;
        }
    }

    /// Completion of an N_DATA
    pub(crate) fn data_rc(&mut self, appls: &mut ApplTable, p: u8, req: PendingReq, rc: Rc) {
        let Some(tx) = req.tx else {
            return;
        };
        if let Some(a) = appls.get_mut(tx.appl) {
            a.transmit_buffer_free(tx.tx_ref);
        }
        if !self.ncci.owned_by(req.ncci as u16, p) {
            log::debug!("plci {p}: data completion for released ncci {}", req.ncci);
            return;
        }
        let wants_ack = tx.flags & DataFlags::DELIVERY_CONFIRMATION.bits() != 0;
        let d = &mut self.ncci.data[req.ncci as usize];
        d.data_pending = d.data_pending.saturating_sub(1);
        let info = if !rc.is_ok() {
            if wants_ack {
                d.data_ack_pending = d.data_ack_pending.saturating_sub(1);
            }
            Info::L3Error
        } else if wants_ack {
            d.ack.push_back(DataAck {
                appl: tx.appl,
                handle: tx.handle,
                number: tx.number,
            });
            return;
        } else {
            Info::Success
        };
        let id = self.id(p, req.ncci);
        let info: u16 = info.into();
        self.sendf(tx.appl, Command::DataB3, SubCommand::Conf, id, tx.number, &[Out::W(tx.handle), Out::W(info)]);
    }

    pub(crate) fn data_ack_ind(&mut self, p: u8, ch: u8) {
        let Some(ncci) = self.ncci.ncci_of(p, ch) else {
            log::warn!("plci {p}: data ack on unmapped ch {ch}");
            return;
        };
        let d = &mut self.ncci.data[ncci as usize];
        let Some(ack) = d.ack.pop_front() else {
            log::warn!("plci {p} ncci {ncci}: data ack without pending confirmation");
            return;
        };
        d.data_ack_pending = d.data_ack_pending.saturating_sub(1);
        let id = self.id(p, ncci);
        self.sendf(ack.appl, Command::DataB3, SubCommand::Conf, id, ack.number, &[Out::W(ack.handle), Out::W(0)]);
    }

    pub(crate) fn data_ind(&mut self, appls: &mut ApplTable, p: u8, ch: u8, data: Vec<u8>) -> IndResponse {
        let Some(ncci) = self.ncci.ncci_of(p, ch) else {
            log::warn!("plci {p}: data on unmapped ch {ch}");
            return IndResponse::Accepted;
        };
        if !matches!(
            self.ncci.ncci_state[ncci as usize],
            NcciState::Connected | NcciState::OutgResPending | NcciState::IncResPending
        ) {
            log::debug!("plci {p} ncci {ncci}: data dropped in {}", self.ncci.ncci_state[ncci as usize]);
            return IndResponse::Accepted;
        }
        let Some(owner) = self.pl(p).appl else {
            return IndResponse::Accepted;
        };
        let controller = self.controller;
        let Some(a) = appls.get_mut(owner) else {
            return IndResponse::Accepted;
        };
        let Some(handle) = a.receive_buffer_get(controller, ncci) else {
            a.flow_ctrl_timer = a.flow_ctrl_timer.saturating_add(1);
            if a.flow_ctrl_timer == self.config.flow_ctrl_backoff {
                log::warn!("appl {owner} ncci {ncci}: receive flow control stuck, buffers not returned");
            }
            log::debug!("plci {p} ncci {ncci}: no receive buffer, RNR");
            self.channel_x_off(p, ch);
            return IndResponse::Rnr;
        };
        a.flow_ctrl_timer = 0;
        let mut flags = DataFlags::empty();
        let mut payload = &data[..];
        if self.pl(p).bprot.is_v120() {
            if let Some(&h) = data.first() {
                if h & V120_HEADER_BREAK_BIT != 0 {
                    flags |= DataFlags::BREAK;
                }
                let header_len = if h & V120_HEADER_EXTEND_BIT != 0 { 1 } else { 2 };
                payload = data.get(header_len..).unwrap_or(&[]);
            }
        }
        let id = self.id(p, ncci);
        let params = [
            Out::D(0),
            Out::W(payload.len() as u16),
            Out::W(handle),
            Out::W(flags.bits()),
        ];
        self.send_data_ind(owner, id, &params, payload.to_vec());
        IndResponse::Accepted
    }

    pub(crate) fn data_b3_res(&mut self, appls: &mut ApplTable, c: &MsgCtx<'_>, parms: &[ApiParse<'_>]) -> Dispatch {
        let p = c.plci;
        if p == 0 || !self.ncci.owned_by(c.ncci, p) {
            return Dispatch::Done;
        }
        let ncci = c.ncci as u8;
        let controller = self.controller;
        let freed = appls
            .get_mut(c.appl)
            .is_some_and(|a| a.receive_buffer_free(parms[0].word(), controller, ncci));
        if !freed {
            log::warn!("DATA_B3_RESP appl {} ncci {ncci}: unknown handle {}", c.appl, parms[0].word());
            return Dispatch::Done;
        }
        let ch = self.ncci.ncci_ch[ncci as usize];
        self.channel_x_on(p, ch);
        Dispatch::Done
    }

    /// Marks `ch` receive flow controlled
    pub(crate) fn channel_x_off(&mut self, p: u8, ch: u8) {
        if ch == 0 {
            return;
        }
        self.ch_flow[ch as usize] |= ChannelFlow::RX_FLOW_CONTROL;
        self.ch_flow_plci[ch as usize] = p;
    }

    /// Requests an XON for a flow controlled channel
    pub(crate) fn channel_x_on(&mut self, p: u8, ch: u8) {
        let f = &mut self.ch_flow[ch as usize];
        if ch != 0 && f.contains(ChannelFlow::RX_FLOW_CONTROL) && self.ch_flow_plci[ch as usize] == p {
            f.insert(ChannelFlow::XON_REQ);
        }
    }

    fn channel_can_xon(&self, appls: &ApplTable, p: u8, ch: u8) -> bool {
        let Some(ncci) = self.ncci.ncci_of(p, ch) else {
            return false;
        };
        self.pl(p)
            .appl
            .and_then(|a| appls.get(a))
            .is_some_and(|a| a.can_receive(self.controller, ncci))
    }

    /// Issues one pending XON for `p` if the PLCI is idle
    pub(crate) fn channel_xmit_xon(&mut self, p: u8) {
        if !self.valid_plci(p) || self.pl(p).busy() || self.pl(p).nl.id == 0 {
            return;
        }
        let Some(ch) = (1..=MAX_NL_CHANNEL).find(|&ch| {
            self.ch_flow_plci[ch] == p
                && self.ch_flow[ch].contains(ChannelFlow::XON_REQ)
                && !self.ch_flow[ch].contains(ChannelFlow::XON_SENT)
        }) else {
            return;
        };
        let f = &mut self.ch_flow[ch];
        f.remove(ChannelFlow::XON_REQ | ChannelFlow::RX_FLOW_CONTROL);
        f.insert(ChannelFlow::XON_SENT);
        log::debug!("plci {p}: XON ch {ch}");
        self.push_req(p, Entity::Nl, Req::NXon, ch as u8, 0, Vec::new(), Origin::Unsolicited);
        self.send_req(p);
    }

    /// Requests an XON for every flow controlled channel of `p` whose owner has receive
    /// buffers again
    pub(crate) fn channel_xmit_extended_xon(&mut self, appls: &ApplTable, p: u8) {
        for ch in 1..=MAX_NL_CHANNEL {
            if self.ch_flow_plci[ch] == p
                && self.ch_flow[ch].contains(ChannelFlow::RX_FLOW_CONTROL)
                && !self.ch_flow[ch].contains(ChannelFlow::XON_REQ)
                && self.channel_can_xon(appls, p, ch as u8)
            {
                self.ch_flow[ch].insert(ChannelFlow::XON_REQ);
            }
        }
    }

    /// Completion of an N_XON
    pub(crate) fn channel_xon_rc(&mut self, ch: u8) {
        self.ch_flow[ch as usize].remove(ChannelFlow::XON_SENT);
    }

    /// Drops the flow control state of every channel of `p`
    pub(crate) fn channel_flow_control_remove(&mut self, p: u8) {
        for ch in 1..=MAX_NL_CHANNEL {
            if self.ch_flow_plci[ch] == p {
                self.ch_flow[ch] = ChannelFlow::empty();
                self.ch_flow_plci[ch] = 0;
            }
        }
    }
}

#[cfg(test)]
pub mod data_test {
    use super::*;
    use crate::{
        appl::ApplParams,
        capi::PlciState,
        config::{AdapterProfile, EngineConfig},
    };

    fn setup(max_b_data_blocks: u16) -> (Adapter, ApplTable, u8, u8) {
        let cfg = EngineConfig::default();
        let mut a = Adapter::new(1, AdapterProfile::default(), cfg);
        let mut appls = ApplTable::default();
        let params = ApplParams {
            max_b_data_blocks,
            ..Default::default()
        };
        appls.register(1, params, &cfg).unwrap();
        let p = a.get_plci().unwrap();
        let pl = a.pl_mut(p);
        pl.appl = Some(1);
        pl.state = PlciState::Connected;
        pl.nl.id = 4;
        let ncci = a.get_ncci(p, 1, 0);
        a.ncci.ncci_state[ncci as usize] = NcciState::Connected;
        (a, appls, p, ncci)
    }

    #[test]
    fn test_rnr_and_xon() {
        let (mut a, mut appls, p, ncci) = setup(1);
        assert_eq!(a.data_ind(&mut appls, p, 1, vec![1, 2, 3]), IndResponse::Accepted);
        assert_eq!(a.data_ind(&mut appls, p, 1, vec![4]), IndResponse::Rnr);
        assert!(a.ch_flow[1].contains(ChannelFlow::RX_FLOW_CONTROL));
        assert_eq!(appls.get(1).unwrap().flow_ctrl_timer, 1);

        // returning the buffer reopens the channel
        let handle = crate::get_word(&a.outbox[0].msg.params[6..]);
        assert!(appls.get_mut(1).unwrap().receive_buffer_free(handle, 1, ncci));
        a.channel_xmit_extended_xon(&appls, p);
        assert!(a.ch_flow[1].contains(ChannelFlow::XON_REQ));
        a.channel_xmit_xon(p);
        assert!(a.ch_flow[1].contains(ChannelFlow::XON_SENT));
        assert!(!a.ch_flow[1].contains(ChannelFlow::RX_FLOW_CONTROL));
        let xon = a.xdi_out.pop().unwrap();
        assert_eq!(xon.req, Req::NXon);
        assert_eq!(xon.ch, 1);
        a.channel_xon_rc(1);
        assert!(a.ch_flow[1].is_empty());
    }

    #[test]
    fn test_v120_header_stripped() {
        let (mut a, mut appls, p, _) = setup(4);
        a.pl_mut(p).bprot.b2 = crate::capi::bprot::B2_V120_ASYNC;
        a.data_ind(&mut appls, p, 1, vec![0xC0, 0xAA, 0xBB]);
        let ind = &a.outbox[0].msg;
        assert_eq!(ind.data.as_deref(), Some(&[0xAA, 0xBB][..]));
        // length, then flags with break
        assert_eq!(crate::get_word(&ind.params[4..]), 2);
        assert_eq!(crate::get_word(&ind.params[8..]), DataFlags::BREAK.bits());
    }

    #[test]
    fn test_delivery_confirmation_held() {
        let (mut a, mut appls, p, ncci) = setup(4);
        let r = appls.get_mut(1).unwrap().transmit_buffer_set(vec![9; 4]).unwrap();
        let d = &mut a.ncci.data[ncci as usize];
        d.tx.push_back(TxBuffer {
            appl: 1,
            tx_ref: r,
            handle: 7,
            flags: DataFlags::DELIVERY_CONFIRMATION.bits(),
            number: 3,
        });
        d.data_pending = 1;
        d.data_ack_pending = 1;
        a.send_data(&mut appls, p);
        let req = a.pl_mut(p).in_flight.take().unwrap();
        assert_eq!(req.req, Req::NData);
        a.data_rc(&mut appls, p, req, Rc::Ok);
        assert!(a.outbox.is_empty());
        assert_eq!(appls.get(1).unwrap().tx_in_use(), 0);
        a.data_ack_ind(p, 1);
        assert_eq!(a.outbox.len(), 1);
        assert_eq!(a.outbox[0].msg.header.number, 3);
        assert_eq!(a.ncci.data[ncci as usize].data_ack_pending, 0);
    }
}

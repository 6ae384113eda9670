mod common;

use common::{CONTROLLER, Harness, connect_req, id, info, word};
use diva_capi::{
    appl::ApplParams,
    capi::{NcciState, PlciState, fax::FAX_RESOLUTION_HIGH},
    config::{AdapterProfile, DI_MANU_ID},
    ie,
    info::Info,
    message::{CapiMessage, Command, Out, SubCommand, encode_params},
    xdi::{Entity, NlInd, Rc, Req},
};

const EDATA_DCS: u8 = 0x02;
const EDATA_PAGE_END: u8 = 0x04;
const EDATA_EOP: u8 = 0x05;
const EDATA_FAILURE: u8 = 0x06;

fn connected() -> (Harness, u8) {
    let mut h = Harness::new(AdapterProfile::default());
    h.register(1, ApplParams::default());
    let p = h.outgoing_call(1);
    (h, p)
}

fn b_protocol(b1: u16, b2: u16, b3: u16, b3_config: &[u8]) -> Vec<u8> {
    encode_params(&[Out::W(b1), Out::W(b2), Out::W(b3), Out::S(&[]), Out::S(&[]), Out::S(b3_config)])
}

fn find(msgs: &[CapiMessage], cmd: Command, sub: SubCommand) -> &CapiMessage {
    msgs.iter().find(|m| m.is(cmd, sub)).unwrap()
}

/// Switches a connected call to T.30 and opens the fax B3 connection on channel 1
fn fax_call() -> (Harness, u8, u8) {
    let (mut h, p) = connected();
    let config = encode_params(&[Out::W(FAX_RESOLUTION_HIGH), Out::W(0), Out::S(b"+49 30 1234"), Out::S(&[])]);
    let old_nl = h.plci(p).nl_id;
    let number = h.put(1, Command::SelectB, SubCommand::Req, id(p, 0), &[Out::S(&b_protocol(4, 4, 4, &config))]);
    let reqs = h.complete_all();
    let sent: Vec<(Req, Entity)> = reqs.iter().map(|r| (r.req, r.entity)).collect();
    assert_eq!(sent, vec![(Req::Remove, Entity::Nl), (Req::Assign, Entity::Nl)]);
    assert_eq!(reqs[1].data[0], ie::LLI);
    assert_eq!(reqs[1].data[2..5], [4, 4, 4]);
    let conf = h.take();
    assert!(conf[0].is(Command::SelectB, SubCommand::Conf));
    assert_eq!(conf[0].header.number, number);
    assert_eq!(info(&conf[0]), Info::Success);
    assert_ne!(h.plci(p).nl_id, old_nl);

    h.put(1, Command::ConnectB3, SubCommand::Req, id(p, 0), &[Out::S(&[])]);
    let reqs = h.complete_all();
    assert_eq!(reqs[0].req, Req::NEData);
    // configuration block: code, resolution, format, station id, head line
    let mut block = vec![0x01, 1, 0, 0, 0, 11];
    block.extend_from_slice(b"+49 30 1234");
    block.push(0);
    assert_eq!(reqs[0].data, block);
    assert_eq!(reqs[1].req, Req::NConnect);
    assert!(reqs[1].data.is_empty());
    let msgs = h.take();
    let conf = find(&msgs, Command::ConnectB3, SubCommand::Conf);
    assert_eq!(info(conf), Info::Success);
    let ncci = conf.header.ncci as u8;

    h.nl(p, NlInd::ConnectAck { ch: 1, ncpi: vec![] });
    let active = h.take();
    assert!(active[0].is(Command::ConnectB3Active, SubCommand::Ind));
    assert_eq!(active[0].header.ncci, ncci as u16);
    // T.30 NCPI before training: default rate, nothing transferred
    assert_eq!(active[0].params, vec![9, 0x40, 0x38, 0, 0, 0, 0, 0, 0, 0]);
    (h, p, ncci)
}

#[test]
pub fn fax_transfer_reports_pages() {
    let (mut h, p, ncci) = fax_call();
    // 9600 bit/s, high resolution, two pages
    h.nl(p, NlInd::EData { ch: 1, data: vec![EDATA_DCS, 0x80, 0x25, 1, 0, 0, 0] });
    h.nl(p, NlInd::EData { ch: 1, data: vec![EDATA_PAGE_END] });
    h.nl(p, NlInd::EData { ch: 1, data: vec![EDATA_EOP] });
    assert!(h.sink.is_empty());

    h.nl(p, NlInd::Disc { ch: 1, cause: 0, ncpi: vec![] });
    let ind = h.take();
    assert!(ind[0].is(Command::DisconnectB3, SubCommand::Ind));
    assert_eq!(ind[0].header.ncci, ncci as u16);
    assert_eq!(word(&ind[0].params, 0), 0);
    assert_eq!(ind[0].params[2..], [9, 0x80, 0x25, 1, 0, 0, 0, 2, 0, 0]);
}

#[test]
pub fn fax_failure_is_the_disconnect_reason() {
    let (mut h, p, _) = fax_call();
    h.nl(p, NlInd::EData { ch: 1, data: vec![EDATA_FAILURE, 2, 0] });
    h.nl(p, NlInd::Disc { ch: 1, cause: 0x10, ncpi: vec![] });
    let ind = h.take();
    assert!(ind[0].is(Command::DisconnectB3, SubCommand::Ind));
    assert_eq!(Info::from(word(&ind[0].params, 0)), Info::FaxTrainingError);
}

#[test]
pub fn select_b_waits_for_b3_clearing() {
    let (mut h, p) = connected();
    let ncci = h.b3_connect(1, p);
    let number = h.put(1, Command::SelectB, SubCommand::Req, id(p, 0), &[Out::S(&b_protocol(1, 1, 0, &[]))]);
    let conf = h.take();
    assert_eq!(conf.len(), 1);
    assert_eq!(conf[0].header.number, number);
    assert_eq!(info(&conf[0]), Info::WrongState);
    assert_eq!(h.xdi.pending(), 0);
    // the open connection is untouched
    let s = h.adapter().ncci_snapshot(ncci).unwrap();
    assert_eq!(s.state, NcciState::Connected);
    assert_eq!(s.ch, 1);
    assert_eq!(h.plci(p).nccis, vec![ncci]);

    h.nl(p, NlInd::Disc { ch: 1, cause: 0, ncpi: vec![] });
    h.take();
    h.put(1, Command::DisconnectB3, SubCommand::Resp, id(p, ncci), &[]);
    h.complete_all();
    assert_eq!(h.plci(p).channels, 0);

    let old_nl = h.plci(p).nl_id;
    h.put(1, Command::SelectB, SubCommand::Req, id(p, 0), &[Out::S(&b_protocol(1, 1, 0, &[]))]);
    let reqs = h.complete_all();
    assert_eq!(reqs[0].req, Req::Remove);
    assert_eq!(reqs[1].data, vec![ie::LLI, 6, 1, 1, 0, 0, 0, 0]);
    let conf = h.take();
    assert_eq!(info(&conf[0]), Info::Success);
    let new_nl = h.plci(p).nl_id;
    assert_ne!(new_nl, old_nl);

    // the next B3 connection runs on the new entity
    h.put(1, Command::ConnectB3, SubCommand::Req, id(p, 0), &[Out::S(&[])]);
    let reqs = h.complete_all();
    assert_eq!((reqs[0].req, reqs[0].id), (Req::NConnect, new_nl));
    let msgs = h.take();
    let conf = find(&msgs, Command::ConnectB3, SubCommand::Conf);
    assert_eq!(info(conf), Info::Success);
    let ncci = conf.header.ncci as u8;
    h.nl(p, NlInd::ConnectAck { ch: 2, ncpi: vec![] });
    let active = h.take();
    assert!(active[0].is(Command::ConnectB3Active, SubCommand::Ind));
    assert_eq!(active[0].header.ncci, ncci as u16);
    assert_eq!(h.plci(p).nccis, vec![ncci]);
}

/// Asks for advanced voice on a fresh PLCI. Returns it with the codec PLCI, whose
/// signaling assign is left pending
fn adv_voice() -> (Harness, u8, u8) {
    let mut h = Harness::new(AdapterProfile::default());
    h.register(1, ApplParams::default());
    let params = [Out::D(DI_MANU_ID), Out::W(2), Out::S(&[])];
    let number = h.put(1, Command::Manufacturer, SubCommand::Req, CONTROLLER as u32, &params);
    let conf = h.take();
    assert_eq!(conf.len(), 1);
    assert!(conf[0].is(Command::Manufacturer, SubCommand::Conf));
    assert_eq!(conf[0].header.number, number);
    assert_eq!(Info::from(word(&conf[0].params, 6)), Info::Success);
    let p = conf[0].header.plci;
    assert_eq!(h.plci(p).state, PlciState::AdvVoiceNoSig);
    let q = h.adapter().plcis().find(|&q| q != p).unwrap();
    (h, p, q)
}

#[test]
pub fn connect_waits_for_the_codec() {
    let (mut h, p, q) = adv_voice();
    let number = h.put(1, Command::Connect, SubCommand::Req, id(p, 0), &connect_req(1, b"\x80123"));
    // nothing happens until the codec is there
    assert!(h.sink.is_empty());
    assert_eq!(h.xdi.pending(), 1);
    assert_ne!(h.plci(p).internal_command, 0);

    let codec = h.complete_next(Rc::Ok);
    assert_eq!((codec.plci, codec.req, codec.entity), (q, Req::Assign, Entity::Sig));
    assert_eq!(codec.data, vec![0x01]);
    let reqs = h.complete_all();
    let sent: Vec<(u8, Req)> = reqs.iter().map(|r| (r.plci, r.req)).collect();
    assert_eq!(sent, vec![(p, Req::Assign), (p, Req::CallReq)]);
    let conf = h.take();
    assert_eq!(conf.len(), 1);
    assert!(conf[0].is(Command::Connect, SubCommand::Conf));
    assert_eq!(conf[0].header.number, number);
    assert_eq!(conf[0].header.plci, p);
    assert_eq!(info(&conf[0]), Info::Success);
    let s = h.plci(p);
    assert_eq!(s.state, PlciState::OutgConPending);
    assert_eq!(s.internal_command, 0);
}

#[test]
pub fn connect_fails_without_codec() {
    let (mut h, p, q) = adv_voice();
    let number = h.put(1, Command::Connect, SubCommand::Req, id(p, 0), &connect_req(1, b"\x80123"));
    h.complete_next(Rc::OutOfResources);
    let msgs = h.take();
    assert_eq!(msgs.len(), 2);
    assert!(msgs[0].is(Command::Connect, SubCommand::Conf));
    assert_eq!(msgs[0].header.number, number);
    assert_eq!(info(&msgs[0]), Info::L1Error);
    assert!(msgs[1].is(Command::Disconnect, SubCommand::Ind));
    assert_eq!(msgs[1].header.plci, p);
    assert_eq!(Info::from(word(&msgs[1].params, 0)), Info::L1Error);
    assert!(h.adapter().plci_snapshot(q).is_none());
    assert_eq!(h.xdi.pending(), 0);
    assert_eq!(h.plci(p).internal_command, 0);
}

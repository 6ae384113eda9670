mod common;

use common::{CONTROLLER, Harness, connect_req, id, info, listen_req, word};
use diva_capi::{
    CapiError,
    appl::ApplParams,
    capi::PlciState,
    config::AdapterProfile,
    ie::{self, IeWriter},
    info::Info,
    message::{CapiMessage, Command, Out, SubCommand, encode_params},
    xdi::{Entity, Rc, Req, SigInd},
};

fn harness(appls: &[u16]) -> Harness {
    let mut h = Harness::new(AdapterProfile::default());
    for a in appls {
        h.register(*a, ApplParams::default());
    }
    h
}

#[test]
pub fn outgoing_call_and_local_disconnect() {
    let mut h = harness(&[1]);
    let p = h.outgoing_call(1);
    let s = h.plci(p);
    println!("{s:?}");
    assert_eq!(s.state, PlciState::Connected);
    assert_eq!(s.appl, Some(1));
    assert_ne!(s.sig_id, 0);
    assert_ne!(s.nl_id, 0);

    let number = h.put(1, Command::Disconnect, SubCommand::Req, id(p, 0), &[Out::S(&[])]);
    let conf = h.take();
    assert_eq!(conf.len(), 1);
    assert!(conf[0].is(Command::Disconnect, SubCommand::Conf));
    assert_eq!(conf[0].header.number, number);
    assert_eq!(info(&conf[0]), Info::Success);
    let reqs = h.complete_all();
    assert_eq!(reqs[0].req, Req::Hangup);

    h.sig(p, SigInd::Hangup { ies: vec![] });
    let ind = h.take();
    assert!(ind[0].is(Command::Disconnect, SubCommand::Ind));
    assert_eq!(word(&ind[0].params, 0), 0);
    assert_eq!(h.plci(p).state, PlciState::IncDisPending);

    h.put(1, Command::Disconnect, SubCommand::Resp, id(p, 0), &[]);
    let reqs = h.complete_all();
    let removed: Vec<(Req, Entity)> = reqs.iter().map(|r| (r.req, r.entity)).collect();
    assert_eq!(removed, vec![(Req::Remove, Entity::Nl), (Req::Remove, Entity::Sig)]);
    assert!(h.adapter().plci_snapshot(p).is_none());
    assert_eq!(h.adapter().plcis().count(), 0);
}

#[test]
pub fn remote_hangup_reports_network_cause() {
    let mut h = harness(&[1]);
    let p = h.outgoing_call(1);
    let cau = IeWriter::new().add(ie::CAU, &[0x80, 0x90]).into_bytes();
    h.sig(p, SigInd::Hangup { ies: cau });
    let ind = h.take();
    assert!(ind[0].is(Command::Disconnect, SubCommand::Ind));
    assert_eq!(Info::from(word(&ind[0].params, 0)), Info::NetworkCause(0x10));
}

#[test]
pub fn connect_without_free_plci() {
    let mut h = Harness::new(AdapterProfile {
        max_plci: 1,
        ..Default::default()
    });
    h.register(1, ApplParams::default());
    h.outgoing_call(1);
    let number = h.put(1, Command::Connect, SubCommand::Req, CONTROLLER as u32, &connect_req(1, b"\x80456"));
    let conf = h.take();
    assert_eq!(conf.len(), 1);
    assert!(conf[0].is(Command::Connect, SubCommand::Conf));
    assert_eq!(conf[0].header.number, number);
    assert_eq!(info(&conf[0]), Info::OutOfPlci);
    assert_eq!(h.xdi.pending(), 0);
}

#[test]
pub fn connect_with_unknown_cip() {
    let mut h = harness(&[1]);
    h.put(1, Command::Connect, SubCommand::Req, CONTROLLER as u32, &connect_req(10, b""));
    let msgs = h.take();
    assert!(msgs[0].is(Command::Connect, SubCommand::Conf));
    assert_eq!(info(&msgs[0]), Info::CipNotSupported);
    assert!(msgs[1].is(Command::Disconnect, SubCommand::Ind));
    assert_eq!(h.xdi.pending(), 0);
    assert_eq!(h.adapter().plcis().count(), 0);
}

#[test]
pub fn signaling_assign_refused_by_adapter() {
    let mut h = harness(&[1]);
    h.put(1, Command::Connect, SubCommand::Req, CONTROLLER as u32, &connect_req(1, b"\x80123"));
    let req = h.complete_next(Rc::OutOfResources);
    assert_eq!((req.req, req.entity), (Req::Assign, Entity::Sig));
    let conf = h.take();
    assert_eq!(conf.len(), 1);
    assert_eq!(info(&conf[0]), Info::OutOfPlci);
    // the call request queued behind the assign never reaches the adapter
    assert_eq!(h.xdi.pending(), 0);
    assert_eq!(h.adapter().plcis().count(), 0);
}

#[test]
pub fn message_queued_while_plci_busy() {
    let mut h = harness(&[1]);
    h.put(1, Command::Connect, SubCommand::Req, CONTROLLER as u32, &connect_req(1, b"\x80123"));
    let p = h.adapter().plcis().next().unwrap();
    let number = h.put(1, Command::Info, SubCommand::Req, id(p, 0), &[Out::S(b"\x809"), Out::S(&[])]);
    assert!(h.sink.is_empty());
    assert_eq!(h.plci(p).queued_messages, 1);

    let reqs: Vec<Req> = h.complete_all().iter().map(|r| r.req).collect();
    assert_eq!(reqs, vec![Req::Assign, Req::CallReq, Req::InfoReq]);
    let msgs = h.take();
    assert!(msgs[0].is(Command::Connect, SubCommand::Conf));
    assert!(msgs[1].is(Command::Info, SubCommand::Conf));
    assert_eq!(msgs[1].header.number, number);
    assert_eq!(info(&msgs[1]), Info::Success);
    assert_eq!(h.plci(p).queued_messages, 0);
}

#[test]
pub fn queue_full_is_reported_to_the_caller() {
    let mut h = harness(&[1]);
    h.put(1, Command::Connect, SubCommand::Req, CONTROLLER as u32, &connect_req(1, b"\x80123"));
    let p = h.adapter().plcis().next().unwrap();
    let mut queued = 0;
    for _ in 0..1000 {
        let number = h.next_number();
        let params = encode_params(&[Out::S(&[]), Out::S(&[])]);
        let msg = CapiMessage::new(1, Command::Info, SubCommand::Req, number, id(p, 0), params);
        match h.engine.api_put(1, msg) {
            Ok(()) => queued += 1,
            Err(e) => {
                assert_eq!(e, CapiError::QueueFull);
                assert_eq!(e.info(), Info::QueueFull);
                break;
            }
        }
    }
    println!("{queued} messages queued before the queue filled up");
    assert!(queued > 100 && queued < 1000);
    assert_eq!(h.plci(p).queued_messages, queued);

    h.complete_all();
    let confs = h.take().iter().filter(|m| m.is(Command::Info, SubCommand::Conf)).count();
    assert_eq!(confs, queued);
    assert_eq!(h.plci(p).queued_messages, 0);
}

#[test]
pub fn malformed_messages_are_refused() {
    let mut h = harness(&[1]);
    let params = encode_params(&[Out::W(1)]);
    let msg = CapiMessage::new(1, Command::Connect, SubCommand::Req, 1, CONTROLLER as u32, params);
    assert_eq!(h.engine.api_put(1, msg), Err(CapiError::BadMessage));

    let mut msg = CapiMessage::new(1, Command::Listen, SubCommand::Req, 2, CONTROLLER as u32, vec![0; 14]);
    msg.header.command = 0x99;
    assert_eq!(h.engine.api_put(1, msg), Err(CapiError::BadMessage));

    assert!(h.sink.is_empty());
    assert_eq!(h.xdi.pending(), 0);
    assert_eq!(h.adapter().plcis().count(), 0);
}

#[test]
pub fn incoming_call_race_between_listeners() {
    let mut h = harness(&[1, 2]);
    for appl in [1, 2] {
        h.put(appl, Command::Listen, SubCommand::Req, CONTROLLER as u32, &listen_req(0, 1 << 1));
        let conf = h.take();
        assert!(conf[0].is(Command::Listen, SubCommand::Conf));
        assert_eq!(info(&conf[0]), Info::Success);
    }
    h.complete_all();
    let lp = h.adapter().plcis().next().unwrap();
    assert_eq!(h.plci(lp).state, PlciState::Listening);

    let bc = ie::cip_bc(1, false).unwrap();
    let ies = IeWriter::new().add(ie::BC, bc).add(ie::CPN, b"\x8042").into_bytes();
    h.sig(lp, SigInd::Indicate { ies });
    let inds = h.take();
    let offered: Vec<u16> = inds
        .iter()
        .filter(|m| m.is(Command::Connect, SubCommand::Ind))
        .map(|m| m.header.appl_id)
        .collect();
    assert_eq!(offered, vec![1, 2]);
    assert_eq!(word(&inds[0].params, 0), 1);
    assert_eq!(h.plci(lp).state, PlciState::IncConPending);
    // a fresh PLCI keeps listening for the next call
    h.complete_all();
    assert_eq!(h.adapter().plcis().count(), 2);

    let resp = [Out::W(0), Out::S(&[]), Out::S(&[]), Out::S(&[]), Out::S(&[]), Out::S(&[])];
    h.put(2, Command::Connect, SubCommand::Resp, id(lp, 0), &resp);
    let loser = h.take();
    assert_eq!(loser.len(), 1);
    assert!(loser[0].is(Command::Disconnect, SubCommand::Ind));
    assert_eq!(loser[0].header.appl_id, 1);
    assert_eq!(Info::from(word(&loser[0].params, 0)), Info::OtherApplConnected);
    let reqs = h.complete_all();
    assert_eq!(reqs[0].req, Req::CallRes);

    // the late answer of the loser changes nothing
    h.put(1, Command::Connect, SubCommand::Resp, id(lp, 0), &resp);
    assert!(h.sink.is_empty());
    assert_eq!(h.xdi.pending(), 0);

    h.sig(lp, SigInd::CallInd { ies: vec![] });
    let active = h.take();
    assert!(active[0].is(Command::ConnectActive, SubCommand::Ind));
    assert_eq!(active[0].header.appl_id, 2);
    h.complete_all();
    let s = h.plci(lp);
    assert_eq!(s.state, PlciState::Connected);
    assert_eq!(s.appl, Some(2));
    assert!(s.c_ind_mask.is_empty());
    assert_ne!(s.nl_id, 0);
}

#[test]
pub fn incoming_call_rejected_with_cause() {
    let mut h = harness(&[1]);
    h.put(1, Command::Listen, SubCommand::Req, CONTROLLER as u32, &listen_req(0, 1));
    h.complete_all();
    h.take();
    let lp = h.adapter().plcis().next().unwrap();
    let bc = ie::cip_bc(1, false).unwrap();
    h.sig(lp, SigInd::Indicate { ies: IeWriter::new().add(ie::BC, bc).into_bytes() });
    h.complete_all();
    h.take();

    let resp = [Out::W(3), Out::S(&[]), Out::S(&[]), Out::S(&[]), Out::S(&[]), Out::S(&[])];
    h.put(1, Command::Connect, SubCommand::Resp, id(lp, 0), &resp);
    let hangup = h.complete_next(Rc::Ok);
    assert_eq!(hangup.req, Req::Hangup);
    // user busy
    assert_eq!(hangup.data, vec![ie::CAU, 2, 0x80, 0x91]);
    let ind = h.take();
    assert!(ind[0].is(Command::Disconnect, SubCommand::Ind));

    h.put(1, Command::Disconnect, SubCommand::Resp, id(lp, 0), &[]);
    h.complete_all();
    assert!(h.adapter().plci_snapshot(lp).is_none());
}

#[test]
pub fn release_application_clears_its_calls() {
    let mut h = harness(&[1]);
    let p = h.outgoing_call(1);
    h.engine.release_application(1).unwrap();
    let reqs: Vec<(Req, Entity)> = h.complete_all().iter().map(|r| (r.req, r.entity)).collect();
    assert_eq!(
        reqs,
        vec![(Req::Remove, Entity::Nl), (Req::Hangup, Entity::Sig), (Req::Remove, Entity::Sig)]
    );
    assert!(h.adapter().plci_snapshot(p).is_none());
    assert!(h.sink.is_empty());
    assert!(h.engine.application(1).is_none());
}

#[test]
pub fn header_length_must_match_the_parameters() {
    let mut h = harness(&[1]);
    let params = encode_params(&connect_req(1, b"\x80123"));
    let mut msg = CapiMessage::new(1, Command::Connect, SubCommand::Req, 1, CONTROLLER as u32, params.clone());
    msg.header.length = 14;
    assert_eq!(h.engine.api_put(1, msg), Err(CapiError::BadMessage));
    let mut msg = CapiMessage::new(1, Command::Connect, SubCommand::Req, 2, CONTROLLER as u32, params.clone());
    msg.header.length += 4;
    assert_eq!(h.engine.api_put(1, msg), Err(CapiError::BadMessage));
    assert!(h.sink.is_empty());
    assert_eq!(h.xdi.pending(), 0);
    assert_eq!(h.adapter().plcis().count(), 0);

    let msg = CapiMessage::new(1, Command::Connect, SubCommand::Req, 3, CONTROLLER as u32, params);
    assert!(h.engine.api_put(1, msg).is_ok());
    assert_eq!(h.xdi.pending(), 1);
    // nothing is queued behind the busy PLCI either
    let p = h.adapter().plcis().next().unwrap();
    let mut msg = CapiMessage::new(1, Command::Info, SubCommand::Req, 4, id(p, 0), encode_params(&[Out::S(&[]), Out::S(&[])]));
    msg.header.length = 12;
    assert_eq!(h.engine.api_put(1, msg), Err(CapiError::BadMessage));
    assert_eq!(h.plci(p).queued_messages, 0);
}

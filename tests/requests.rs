mod common;

use common::*;
use std::{collections::HashMap, fs::File, os::unix::io::OwnedFd, sync::Arc, thread};
use test_log::test;
use xdispatch::{
    atoms::AtomId,
    extensions::randr,
    requests::{GetAtomName, MapWindow, NoOperation},
    transport::scripted::{ScriptedTransport, SentRequest, WireItem},
    Connection, SequenceNumber, WindowId,
};

fn dev_null() -> OwnedFd {
    OwnedFd::from(File::open("/dev/null").unwrap())
}

#[test]
fn big_requests_are_promoted() {
    let (conn, transport) = connection();
    transport.set_responder(server_responder);

    assert_eq!(conn.maximum_request_length(), 0xffff);
    assert_eq!(conn.enable_big_requests(), Some(0x003f_ffff));
    assert_eq!(conn.extended_max_request_length(), Some(0x003f_ffff));
    assert_eq!(conn.maximum_request_length(), 0x003f_ffff);

    // 1 header unit + 0x1_0000 units of payload
    let future = conn.send_request(&NoOperation {
        extra_length: 0x1_0000,
    });
    assert!(future.sequence().is_some());
    future.ignore_error();

    let sent = transport.sent_requests();
    let bytes = &sent.last().unwrap().bytes;
    assert_eq!(bytes.len(), 0x1_0002 * 4);
    assert_eq!(&bytes[2..4], &[0, 0]);
    assert_eq!(&bytes[4..8], &0x1_0002u32.to_le_bytes());
}

#[test]
fn small_requests_keep_regular_header() {
    let (conn, transport) = connection();
    transport.set_responder(server_responder);
    conn.enable_big_requests();

    conn.send_request(&MapWindow {
        window: WindowId::from(0x0020_0001),
    })
    .ignore_error();

    let sent = transport.sent_requests();
    let bytes = &sent.last().unwrap().bytes;
    assert_eq!(bytes.len(), 8);
    assert_eq!(&bytes[2..4], &2u16.to_le_bytes());
}

#[test]
fn extension_requests_use_runtime_opcode() {
    let (conn, transport) = connection();
    transport.set_responder(server_responder);

    conn.send_extension_request(&randr::SelectInput {
        window: WindowId::from(ROOT),
        enable: randr::SelectMask::SCREEN_CHANGE_NOTIFY_MASK,
    })
    .ignore_error();

    let sent = transport.sent_requests();
    // QueryExtension, then the request itself
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].bytes[0], RANDR_OPCODE);
    assert_eq!(sent[1].bytes[1], 4);
    assert_eq!(&sent[1].bytes[2..4], &3u16.to_le_bytes());

    // Cached, no second query
    conn.send_extension_request(&randr::QueryVersion::default())
        .ignore_error();
    assert_eq!(transport.sent_requests().len(), 3);
}

#[test]
fn missing_extension_sends_nothing() {
    let transport = ScriptedTransport::new();
    transport.set_responder(|request| {
        // Server without any extensions
        let sequence = request.sequence.wire();
        (request.bytes[0] == QUERY_EXTENSION)
            .then(|| xdispatch::transport::RawResponse::reply(reply(0, sequence, &[0; 4])))
    });
    let conn = Connection::new(transport.clone(), setup(ROOT, 640, 480));

    let response = conn
        .send_extension_request(&randr::QueryVersion::default())
        .sync();
    assert!(response.reply.is_none());
    assert_eq!(transport.sent_requests().len(), 1);
    assert_eq!(conn.enable_big_requests(), None);
}

#[test]
fn reply_with_error_decodes_error() {
    let (conn, transport) = connection();
    let future = conn.send_request(&GetAtomName {
        atom: AtomId::from(0),
    });
    transport.set_error(1, error(5, 1, 0, 17));

    let response = future.sync();
    assert!(response.reply.is_none());
    let error = response.error.unwrap();
    assert_eq!(error.error_code, 5);
    assert_eq!(error.request_name(), Some("GetAtomName"));
}

#[test]
fn resource_ids_come_from_setup_range() {
    let (conn, _) = connection();
    let first = conn.generate_id().unwrap();
    let second = conn.generate_id().unwrap();
    assert_eq!(first.value(), 0x0020_0001);
    assert_eq!(second.value(), 0x0020_0002);
}

/// Requests with an even index in the low byte of their window were sent with fds
fn carries_fds(request: &SentRequest) -> bool {
    let window = u32::from_le_bytes([
        request.bytes[4],
        request.bytes[5],
        request.bytes[6],
        request.bytes[7],
    ]);
    (window & 0xff) % 2 == 0
}

fn assert_fds_precede_their_request(wire: &[WireItem], sent: &[SentRequest]) {
    let requests: HashMap<SequenceNumber, &SentRequest> = sent
        .iter()
        .map(|request| (request.sequence, request))
        .collect();
    let with_fds = |item: Option<&WireItem>| match item {
        Some(WireItem::Request(sequence)) => carries_fds(requests[sequence]),
        _ => false,
    };

    for (idx, item) in wire.iter().enumerate() {
        match item {
            WireItem::Fds(_) => assert!(
                with_fds(wire.get(idx + 1)),
                "file descriptors at {} not followed by their request: {:?}",
                idx,
                wire
            ),
            WireItem::Request(_) if with_fds(Some(item)) => assert!(
                idx > 0 && matches!(wire[idx - 1], WireItem::Fds(_)),
                "request at {} not preceded by its file descriptors: {:?}",
                idx,
                wire
            ),
            WireItem::Request(_) => {}
        }
    }
}

fn send_from_threads(transport: &ScriptedTransport) {
    let conn = Connection::new(transport.clone(), setup(ROOT, 640, 480));
    let writer = conn.request_writer();

    let handles: Vec<_> = (0..2u32)
        .map(|thread_idx| {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                for idx in 0..50u32 {
                    let request = MapWindow {
                        window: WindowId::from(0x0020_0000 | (thread_idx << 8) | idx),
                    };
                    if idx % 2 == 0 {
                        writer
                            .send_request_with_fds(&request, vec![dev_null()])
                            .unwrap();
                    } else {
                        writer.send_request(&request).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let wire = transport.wire_log();
    assert_eq!(
        wire.iter()
            .filter(|item| matches!(item, WireItem::Request(_)))
            .count(),
        100
    );
    assert_eq!(
        wire.iter()
            .filter(|item| matches!(item, WireItem::Fds(_)))
            .count(),
        50
    );
    assert_fds_precede_their_request(&wire, &transport.sent_requests());
}

#[test]
fn fds_and_requests_do_not_interleave_across_threads() {
    send_from_threads(&ScriptedTransport::new());
}

#[test]
fn atomic_fd_send_is_used_when_available() {
    send_from_threads(&ScriptedTransport::with_atomic_fd_send());
}

#![allow(dead_code)]

use xdispatch::{
    extensions::randr::Rotation,
    setup::{Setup, SetupResponse},
    transport::{
        scripted::{ScriptedTransport, SentRequest},
        RawError, RawResponse,
    },
    wire::{FromLeBytes, ReadBuffer, WriteBuffer},
    Connection,
};

pub const ROOT: u32 = 0x1e3;

pub const GET_INPUT_FOCUS: u8 = 43;
pub const QUERY_EXTENSION: u8 = 98;

pub const RANDR_OPCODE: u8 = 140;
pub const RANDR_FIRST_EVENT: u8 = 89;
pub const BIG_REQUESTS_OPCODE: u8 = 133;

/// Setup of a server with a single screen
pub fn setup(root: u32, width: u16, height: u16) -> Setup {
    let vendor = b"Test";
    let mut w = WriteBuffer::new();
    w.write(1u8); // success
    w.pad(1);
    w.write(11u16);
    w.write(0u16);
    w.write(0u16);
    w.write(1u32); // release
    w.write(0x0020_0000u32); // resource id base
    w.write(0x001f_ffffu32); // resource id mask
    w.write(0u32);
    w.write(vendor.len() as u16);
    w.write(0xffffu16); // maximum request length
    w.write(1u8); // screens
    w.write(0u8); // formats
    w.write(0u8);
    w.write(0u8);
    w.write(32u8);
    w.write(32u8);
    w.write(8u8);
    w.write(255u8);
    w.pad(4);
    w.write_padded(vendor);

    w.write(root);
    w.write(0x20u32); // colormap
    w.write(0x00ff_ffffu32);
    w.write(0u32);
    w.write(0u32);
    w.write(width);
    w.write(height);
    w.write(270u16);
    w.write(203u16);
    w.write(1u16);
    w.write(1u16);
    w.write(0x21u32); // root visual
    w.write(0u8);
    w.write(false);
    w.write(24u8);
    w.write(0u8); // depths

    let bytes = w.into_bytes();
    match SetupResponse::from_le_bytes(&mut ReadBuffer::new(&bytes)).unwrap() {
        SetupResponse::Success(setup) => setup,
        other => panic!("Expected successful setup, got {:?}", other),
    }
}

pub fn connection() -> (Connection, ScriptedTransport) {
    let transport = ScriptedTransport::new();
    (
        Connection::new(transport.clone(), setup(ROOT, 1024, 768)),
        transport,
    )
}

pub fn reply(data: u8, sequence: u16, body: &[u8]) -> Vec<u8> {
    assert!(body.len() <= 24);
    let mut bytes = vec![1, data];
    bytes.extend(sequence.to_le_bytes());
    bytes.extend(0u32.to_le_bytes());
    bytes.extend(body);
    bytes.resize(32, 0);
    bytes
}

pub fn focus_reply(sequence: u16, focus: u32) -> Vec<u8> {
    reply(1, sequence, &focus.to_le_bytes())
}

pub fn error(code: u8, sequence: u16, bad_value: u32, major_opcode: u8) -> RawError {
    let mut bytes = [0u8; 32];
    bytes[1] = code;
    bytes[2..4].copy_from_slice(&sequence.to_le_bytes());
    bytes[4..8].copy_from_slice(&bad_value.to_le_bytes());
    bytes[10] = major_opcode;
    RawError { bytes }
}

pub fn configure_notify(sequence: u16, window: u32, width: u16, height: u16) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write(22u8);
    w.pad(1);
    w.write(sequence);
    w.write(window);
    w.write(window);
    w.write(0u32);
    w.write(0i16);
    w.write(0i16);
    w.write(width);
    w.write(height);
    w.write(0u16);
    w.write(false);
    w.pad(5);
    w.into_bytes()
}

pub fn screen_change_notify(
    sequence: u16,
    rotation: Rotation,
    root: u32,
    width: u16,
    height: u16,
) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write(RANDR_FIRST_EVENT);
    w.write(rotation.raw() as u8);
    w.write(sequence);
    w.write(2000u32);
    w.write(1000u32);
    w.write(root);
    w.write(root);
    w.write(0u16);
    w.write(0u16);
    w.write(width);
    w.write(height);
    w.write(270u16);
    w.write(203u16);
    w.into_bytes()
}

fn extension_name(request: &SentRequest) -> &[u8] {
    let len = u16::from_le_bytes([request.bytes[4], request.bytes[5]]) as usize;
    &request.bytes[8..8 + len]
}

/// Answers what a server with RANDR and BIG-REQUESTS would answer to the requests the connection
/// sends on its own
pub fn server_responder(request: &SentRequest) -> Option<RawResponse> {
    let sequence = request.sequence.wire();
    match request.bytes[0] {
        GET_INPUT_FOCUS => Some(RawResponse::reply(focus_reply(sequence, ROOT))),
        QUERY_EXTENSION => {
            let (opcode, first_event) = match extension_name(request) {
                b"RANDR" => (RANDR_OPCODE, RANDR_FIRST_EVENT),
                b"BIG-REQUESTS" => (BIG_REQUESTS_OPCODE, 0),
                _ => return Some(RawResponse::reply(reply(0, sequence, &[0, 0, 0, 0]))),
            };
            Some(RawResponse::reply(reply(
                0,
                sequence,
                &[1, opcode, first_event, 0],
            )))
        }
        BIG_REQUESTS_OPCODE => Some(RawResponse::reply(reply(
            0,
            sequence,
            &0x003f_ffffu32.to_le_bytes(),
        ))),
        _ => None,
    }
}

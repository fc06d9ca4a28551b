use modslave_core::encoding::{Reader, Writer};
use modslave_core::frame::{Frame, MBAP_HEADER_LEN};
use modslave_core::pdu::{FunctionCode, Request};
use modslave_core::{bits_to_bytes, bytes_to_bits, DecodeError, EncodeError};

const READ_COILS_REQ: &[u8] = &[
    0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x01, 0x00, 0x13, 0x00, 0x25,
];
const READ_COILS_RESP: &[u8] = &[
    0x00, 0x01, 0x00, 0x00, 0x00, 0x08, 0xFF, 0x01, 0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B,
];
const WRITE_REGISTERS_REQ: &[u8] = &[
    0x00, 0x2A, 0x00, 0x00, 0x00, 0x0D, 0x11, 0x10, 0x00, 0x6B, 0x00, 0x03, 0x06, 0x02, 0x2B,
    0x00, 0x01, 0x00, 0x64,
];

#[test]
fn read_coils_request_golden_decode() {
    let mut r = Reader::new(READ_COILS_REQ);
    let frame = Frame::decode(&mut r).unwrap();
    assert!(r.is_empty());
    assert_eq!(frame.size(), READ_COILS_REQ.len());
    assert_eq!(
        FunctionCode::from_u8(frame.function_code()).unwrap(),
        FunctionCode::ReadCoils
    );

    let request = Request::new(&frame).unwrap();
    assert_eq!(request.offset(), 0x0013);
    assert_eq!(request.number(), 0x0025);
}

#[test]
fn read_coils_response_golden_encode() {
    let mut body = vec![0x05];
    body.extend(bits_to_bytes(
        &bytes_to_bits(&[0xCD, 0x6B, 0xB2, 0x0E, 0x1B])[..0x25],
    ));
    let frame = Frame::new(0x0001, 0xFF, 0x01, body).unwrap();

    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    frame.encode(&mut w).unwrap();
    assert_eq!(w.as_written(), READ_COILS_RESP);
}

#[test]
fn write_multiple_registers_golden_decode() {
    let mut r = Reader::new(WRITE_REGISTERS_REQ);
    let frame = Frame::decode(&mut r).unwrap();
    assert_eq!(frame.header().transaction_id, 0x002A);
    assert_eq!(frame.header().unit_id, 0x11);
    assert_eq!(frame.header().length, 0x0D);
    assert_eq!(frame.data().len(), 11);

    let request = Request::new(&frame).unwrap();
    assert_eq!(request.offset(), 0x006B);
    assert_eq!(request.number(), 3);
}

#[test]
fn back_to_back_frames_decode_in_order() {
    let mut stream = READ_COILS_REQ.to_vec();
    stream.extend_from_slice(WRITE_REGISTERS_REQ);

    let mut r = Reader::new(&stream);
    let first = Frame::decode(&mut r).unwrap();
    let second = Frame::decode(&mut r).unwrap();
    assert_eq!(first.function_code(), 0x01);
    assert_eq!(second.function_code(), 0x10);
    assert!(r.is_empty());
    assert_eq!(Frame::decode(&mut r).unwrap_err(), DecodeError::UnexpectedEof);
}

#[test]
fn truncated_payload_is_short_frame() {
    let truncated = &WRITE_REGISTERS_REQ[..WRITE_REGISTERS_REQ.len() - 1];
    let mut r = Reader::new(truncated);
    assert_eq!(Frame::decode(&mut r).unwrap_err(), DecodeError::ShortFrame);
}

#[test]
fn encode_into_exact_and_short_buffers() {
    let mut r = Reader::new(READ_COILS_RESP);
    let frame = Frame::decode(&mut r).unwrap();

    let mut exact = vec![0u8; frame.size()];
    let mut w = Writer::new(&mut exact);
    frame.encode(&mut w).unwrap();
    assert_eq!(w.as_written(), READ_COILS_RESP);

    let mut header_only = [0u8; MBAP_HEADER_LEN];
    let mut w = Writer::new(&mut header_only);
    assert_eq!(frame.encode(&mut w).unwrap_err(), EncodeError::BufferTooSmall);
}

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    HOST_HEADER_SIZE, OP_HEADER_SIZE, SERVICE_ID_BOOT, SYNC1, SYNC2,
};
use crate::errors::{Result, ToolError};

/// Outer host-API envelope: sync pair, service byte (low 6 bits), opcode,
/// then the byte length of the inner frame that follows.
pub fn host_header(service_id: u8, opcode: u8, payload_len: u32) -> [u8; HOST_HEADER_SIZE] {
    let mut header = [0u8; HOST_HEADER_SIZE];
    header[0] = SYNC1;
    header[1] = SYNC2;
    header[2] = service_id & 0x3F;
    header[3] = opcode;
    LittleEndian::write_u32(&mut header[4..8], payload_len);
    header
}

/// Inner 32-byte operation header. All integer fields little endian;
/// the three reserved words are zero.
pub fn op_header(
    service_id: u8,
    opcode: u8,
    addr: u32,
    img_type: u32,
    is_last: bool,
    num_words: u32,
) -> [u8; OP_HEADER_SIZE] {
    let mut header = [0u8; OP_HEADER_SIZE];
    header[0] = SYNC1;
    header[1] = SYNC2;
    header[2] = service_id;
    header[3] = opcode;
    LittleEndian::write_u32(&mut header[8..12], num_words);
    LittleEndian::write_u32(&mut header[16..20], addr);
    LittleEndian::write_u32(&mut header[20..24], img_type);
    LittleEndian::write_u32(&mut header[24..28], u32::from(is_last));
    header
}

/// Boot-package header used by the ROM-level SPK handoff. Same 32-byte
/// width as the operation header but with the payload length in the
/// first word slot and a zeroed tail.
pub fn spk_header(op: u8, payload_len: u32) -> [u8; OP_HEADER_SIZE] {
    let mut header = [0u8; OP_HEADER_SIZE];
    header[0] = SYNC1;
    header[1] = SYNC2;
    header[2] = SERVICE_ID_BOOT;
    header[3] = op;
    LittleEndian::write_u32(&mut header[4..8], payload_len);
    header
}

/// Right-pads a payload with 0xFF to the next 4-byte boundary.
pub fn pad_word_aligned(payload: &[u8]) -> Vec<u8> {
    let pad = (4 - payload.len() % 4) % 4;
    let mut padded = Vec::with_capacity(payload.len() + pad);
    padded.extend_from_slice(payload);
    padded.resize(payload.len() + pad, 0xFF);
    padded
}

/// An 8-byte reply header. The trailing word is the data length in
/// host-API mode and the return code itself in raw mode; which reading
/// applies is the caller's choice, not this type's.
#[derive(Debug, Clone, Copy)]
pub struct ReplyHeader {
    bytes: [u8; HOST_HEADER_SIZE],
}

impl ReplyHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HOST_HEADER_SIZE {
            return Err(ToolError::ShortRead {
                expected: HOST_HEADER_SIZE,
                got: bytes.len(),
            });
        }
        if bytes[0] != SYNC1 || bytes[1] != SYNC2 {
            return Err(ToolError::BadSync {
                got: [bytes[0], bytes[1]],
            });
        }
        let mut header = [0u8; HOST_HEADER_SIZE];
        header.copy_from_slice(&bytes[..HOST_HEADER_SIZE]);
        Ok(Self { bytes: header })
    }

    /// Byte length of the data block that follows (host-API mode).
    pub fn data_len(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[4..8])
    }

    /// The trailing word read as a return code (raw mode).
    pub fn raw_rc(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[4..8])
    }
}

#[test]
fn test_pad_word_aligned() {
    for len in 0..16usize {
        let payload = vec![0xAB; len];
        let padded = pad_word_aligned(&payload);
        let expected = len + (4 - len % 4) % 4;
        assert_eq!(padded.len(), expected);
        assert_eq!(padded.len() % 4, 0);
        assert_eq!(&padded[..len], payload.as_slice());
        assert!(padded[len..].iter().all(|b| *b == 0xFF));
    }
}

#[test]
fn test_host_header_layout() {
    let header = host_header(0x0D, 0x12, 0x0123_4567);
    assert_eq!(&header[..4], &[0x5B, 0x5A, 0x0D, 0x12]);
    assert_eq!(&header[4..8], &[0x67, 0x45, 0x23, 0x01]);
    // Service byte is masked to its low six bits
    let masked = host_header(0xFF, 0x0A, 0);
    assert_eq!(masked[2], 0x3F);
}

#[test]
fn test_op_header_layout() {
    let header = op_header(0x33, 0x12, 0xBA10_0000, 0x0002_0017, true, 0x1000);
    assert_eq!(&header[..4], &[0x5B, 0x5A, 0x33, 0x12]);
    assert_eq!(LittleEndian::read_u32(&header[4..8]), 0);
    assert_eq!(LittleEndian::read_u32(&header[8..12]), 0x1000);
    assert_eq!(LittleEndian::read_u32(&header[12..16]), 0);
    assert_eq!(LittleEndian::read_u32(&header[16..20]), 0xBA10_0000);
    assert_eq!(LittleEndian::read_u32(&header[20..24]), 0x0002_0017);
    assert_eq!(LittleEndian::read_u32(&header[24..28]), 1);
    assert_eq!(LittleEndian::read_u32(&header[28..32]), 0);
}

#[test]
fn test_spk_header_layout() {
    let header = spk_header(0x02, 0xDEAD);
    assert_eq!(&header[..4], &[0x5B, 0x5A, 0x33, 0x02]);
    assert_eq!(LittleEndian::read_u32(&header[4..8]), 0xDEAD);
    assert!(header[8..].iter().all(|b| *b == 0));
}

#[test]
fn test_reply_header_parse() {
    let reply = ReplyHeader::parse(&[0x5B, 0x5A, 0x33, 0x0A, 0x04, 0, 0, 0]).unwrap();
    assert_eq!(reply.data_len(), 4);
    assert_eq!(reply.raw_rc(), 4);

    match ReplyHeader::parse(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]) {
        Err(ToolError::BadSync { got }) => assert_eq!(got, [0x00, 0x5A]),
        other => panic!("expected BadSync, got {:?}", other),
    }

    match ReplyHeader::parse(&[0x5B, 0x5A, 0x33]) {
        Err(ToolError::ShortRead { expected: 8, got: 3 }) => {}
        other => panic!("expected ShortRead, got {:?}", other),
    }
}

//! MBAP framing.
//!
//! Every Modbus/TCP frame starts with a fixed 8-byte big-endian record:
//! transaction id, protocol id, length, unit id and function code. The length
//! field counts the unit id, the function code and the payload, so the payload
//! is always `length - 2` bytes and the whole frame is `6 + length` bytes.

use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};
use alloc::vec::Vec;

/// Transaction id, protocol id, length, unit id and function code.
pub const MBAP_HEADER_LEN: usize = 8;
/// Bytes that precede the region counted by the length field.
pub const MBAP_PREFIX_LEN: usize = 6;
pub const TCP_PROTOCOL_ID: u16 = 0x0000;
/// Largest application data unit Modbus/TCP allows on the wire.
pub const MAX_ADU_LEN: usize = 260;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    /// Echoed verbatim so the client can correlate replies.
    pub transaction_id: u16,
    /// Zero for Modbus/TCP. Not validated on decode.
    pub protocol_id: u16,
    /// Unit id byte + function code byte + payload length.
    pub length: u16,
    pub unit_id: u8,
    pub function_code: u8,
}

impl Header {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        if w.remaining() < MBAP_HEADER_LEN {
            return Err(EncodeError::BufferTooSmall);
        }
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)?;
        w.write_u8(self.unit_id)?;
        w.write_u8(self.function_code)?;
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if r.remaining() < MBAP_HEADER_LEN {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(Self {
            transaction_id: r.read_be_u16()?,
            protocol_id: r.read_be_u16()?,
            length: r.read_be_u16()?,
            unit_id: r.read_u8()?,
            function_code: r.read_u8()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; MBAP_HEADER_LEN] {
        let [tid_hi, tid_lo] = self.transaction_id.to_be_bytes();
        let [pid_hi, pid_lo] = self.protocol_id.to_be_bytes();
        let [len_hi, len_lo] = self.length.to_be_bytes();
        [
            tid_hi,
            tid_lo,
            pid_hi,
            pid_lo,
            len_hi,
            len_lo,
            self.unit_id,
            self.function_code,
        ]
    }

    /// Number of payload bytes that follow the header on the wire.
    pub fn payload_len(&self) -> Result<usize, DecodeError> {
        usize::from(self.length)
            .checked_sub(2)
            .ok_or(DecodeError::InvalidLength)
    }

    /// Sets the length field for a payload of `payload_len` bytes.
    pub fn set_payload_len(&mut self, payload_len: usize) -> Result<(), EncodeError> {
        self.length = payload_len
            .checked_add(2)
            .and_then(|len| u16::try_from(len).ok())
            .ok_or(EncodeError::ValueOutOfRange)?;
        Ok(())
    }

    /// Marks the header as an exception reply to its current function code.
    pub fn set_exception(&mut self) {
        self.function_code = self.function_code.wrapping_add(0x80);
    }

    pub const fn is_exception(&self) -> bool {
        (self.function_code & 0x80) != 0
    }
}

/// Total on-wire size of a frame carrying `header`.
pub const fn frame_size(header: &Header) -> usize {
    MBAP_PREFIX_LEN + header.length as usize
}

/// A header plus its raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: Header,
    data: Vec<u8>,
}

impl Frame {
    /// Builds a frame whose length field is derived from `data`.
    pub fn new(
        transaction_id: u16,
        unit_id: u8,
        function_code: u8,
        data: Vec<u8>,
    ) -> Result<Self, EncodeError> {
        let mut header = Header {
            transaction_id,
            protocol_id: TCP_PROTOCOL_ID,
            length: 0,
            unit_id,
            function_code,
        };
        header.set_payload_len(data.len())?;
        Ok(Self { header, data })
    }

    /// Pairs a header with a payload as-is. The caller owns the length invariant.
    pub fn from_parts(header: Header, data: Vec<u8>) -> Self {
        Self { header, data }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn function_code(&self) -> u8 {
        self.header.function_code
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn size(&self) -> usize {
        frame_size(&self.header)
    }

    /// Writes header then payload. Fails up front when `w` cannot hold the
    /// whole frame, so a partial frame is never written.
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        if w.remaining() < self.size() {
            return Err(EncodeError::BufferTooSmall);
        }
        if self.header.payload_len().ok() != Some(self.data.len()) {
            return Err(EncodeError::InvalidLength);
        }
        self.header.encode(w)?;
        w.write_all(&self.data)
    }

    /// Decodes one frame from the front of `r`.
    ///
    /// Returns [`DecodeError::ShortFrame`] when fewer than `length - 2`
    /// payload bytes follow the header. Bytes after the frame are left unread.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let header = Header::decode(r)?;
        let payload_len = header.payload_len()?;
        if r.remaining() < payload_len {
            return Err(DecodeError::ShortFrame);
        }
        let data = r.read_exact(payload_len)?.to_vec();
        Ok(Self { header, data })
    }
}

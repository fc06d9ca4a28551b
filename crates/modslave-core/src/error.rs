use core::fmt;

/// Errors that can occur while encoding Modbus data into an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EncodeError {
    BufferTooSmall,
    ValueOutOfRange,
    InvalidLength,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => f.write_str("buffer too small"),
            Self::ValueOutOfRange => f.write_str("value out of range"),
            Self::InvalidLength => f.write_str("invalid length"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Errors that can occur while decoding Modbus data from an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecodeError {
    /// Input ended inside the fixed MBAP header.
    UnexpectedEof,
    /// Input ended before the payload announced by the header's length field.
    ShortFrame,
    /// The header's length field cannot describe a valid frame.
    InvalidLength,
    /// The frame payload is too small to carry an address and quantity.
    RequestTooShort,
    InvalidFunctionCode,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => f.write_str("unexpected end of input"),
            Self::ShortFrame => f.write_str("frame shorter than its declared length"),
            Self::InvalidLength => f.write_str("invalid length"),
            Self::RequestTooShort => f.write_str("frame too small to be a valid request"),
            Self::InvalidFunctionCode => f.write_str("invalid function code"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

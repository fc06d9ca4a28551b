use crate::frame::Frame;
use crate::pdu::FunctionCode;
use crate::DecodeError;

/// Smallest payload that can carry an address and a quantity or value.
pub const MIN_REQUEST_DATA_LEN: usize = 4;

/// A read-only view over a frame that is large enough to be a request.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    frame: &'a Frame,
}

impl<'a> Request<'a> {
    pub fn new(frame: &'a Frame) -> Result<Self, DecodeError> {
        if frame.data().len() < MIN_REQUEST_DATA_LEN {
            return Err(DecodeError::RequestTooShort);
        }
        Ok(Self { frame })
    }

    pub fn frame(&self) -> &'a Frame {
        self.frame
    }

    /// First register or coil address addressed by the request.
    pub fn offset(&self) -> u16 {
        let data = self.frame.data();
        u16::from_be_bytes([data[0], data[1]])
    }

    /// Number of points addressed. Single writes carry a value in this
    /// position, so they always address exactly one point.
    pub fn number(&self) -> u16 {
        let single = FunctionCode::from_u8(self.frame.function_code())
            .map(FunctionCode::is_single_write)
            .unwrap_or(false);
        if single {
            return 1;
        }
        let data = self.frame.data();
        u16::from_be_bytes([data[2], data[3]])
    }

    /// The raw 16-bit word following the address.
    pub fn value(&self) -> u16 {
        let data = self.frame.data();
        u16::from_be_bytes([data[2], data[3]])
    }
}

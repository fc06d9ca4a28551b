use crate::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    /// Serial line only.
    ReadExceptionStatus,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    /// Serial line only.
    ReportSlaveId,
    WriteAndReadRegisters,
    Custom(u8),
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::ReadExceptionStatus => 0x07,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportSlaveId => 0x11,
            Self::WriteAndReadRegisters => 0x17,
            Self::Custom(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        if Self::is_exception(value) {
            return Err(DecodeError::InvalidFunctionCode);
        }
        match value {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x05 => Ok(Self::WriteSingleCoil),
            0x06 => Ok(Self::WriteSingleRegister),
            0x07 => Ok(Self::ReadExceptionStatus),
            0x0F => Ok(Self::WriteMultipleCoils),
            0x10 => Ok(Self::WriteMultipleRegisters),
            0x11 => Ok(Self::ReportSlaveId),
            0x17 => Ok(Self::WriteAndReadRegisters),
            _ => Ok(Self::Custom(value)),
        }
    }

    pub const fn is_exception(value: u8) -> bool {
        (value & 0x80) != 0
    }

    /// Function codes whose request carries a value, not a count, after the address.
    pub const fn is_single_write(self) -> bool {
        matches!(self, Self::WriteSingleCoil | Self::WriteSingleRegister)
    }
}

#[cfg(test)]
mod tests {
    use super::FunctionCode;
    use crate::DecodeError;

    #[test]
    fn parses_served_codes() {
        assert_eq!(FunctionCode::from_u8(0x01).unwrap(), FunctionCode::ReadCoils);
        assert_eq!(FunctionCode::from_u8(0x0F).unwrap(), FunctionCode::WriteMultipleCoils);
        assert_eq!(
            FunctionCode::from_u8(0x17).unwrap(),
            FunctionCode::WriteAndReadRegisters
        );
        assert_eq!(FunctionCode::from_u8(0x07).unwrap(), FunctionCode::ReadExceptionStatus);
        assert_eq!(FunctionCode::from_u8(0x11).unwrap(), FunctionCode::ReportSlaveId);
    }

    #[test]
    fn unknown_codes_are_custom() {
        assert_eq!(FunctionCode::from_u8(0x73).unwrap(), FunctionCode::Custom(0x73));
        assert_eq!(FunctionCode::Custom(0x73).as_u8(), 0x73);
    }

    #[test]
    fn rejects_exception_bit_codes() {
        assert_eq!(FunctionCode::from_u8(0x81).unwrap_err(), DecodeError::InvalidFunctionCode);
    }

    #[test]
    fn single_writes_carry_values() {
        assert!(FunctionCode::WriteSingleCoil.is_single_write());
        assert!(FunctionCode::WriteSingleRegister.is_single_write());
        assert!(!FunctionCode::WriteMultipleRegisters.is_single_write());
    }
}

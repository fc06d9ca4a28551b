//! Function-code dispatch against a [`RegisterBank`].
//!
//! Every operation validates in the same order and stops at the first
//! failure: payload length, quantity bounds, address range, then any
//! byte-count field. Client mistakes become exception replies; a failure
//! while building an otherwise valid reply becomes `SlaveFailure`.

use crate::bank::{checked_range, BitBank, RegisterBank, WordBank};
use crate::handler::{write_exception, ModbusHandler, ResponseWriter};
use modslave_core::bits::{bits_to_bytes, bytes_to_bits, packed_len};
use modslave_core::encoding::{Reader, Writer};
use modslave_core::frame::Frame;
use modslave_core::pdu::{ExceptionCode, FunctionCode, Request};
use modslave_core::DecodeError;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_READ_BITS: u16 = 0x07D0;
const MAX_READ_REGISTERS: u16 = 0x007D;
const MAX_WRITE_COILS: u16 = 0x07B0;
const MAX_WRITE_REGISTERS: u16 = 0x007B;
const MAX_RW_WRITE_REGISTERS: u16 = 0x0079;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

type Outcome = Result<Vec<u8>, ExceptionCode>;

/// Serves the nine data-access function codes from a shared register bank.
#[derive(Debug, Clone, Default)]
pub struct RegisterHandler {
    bank: Arc<RegisterBank>,
}

impl RegisterHandler {
    pub fn new(bank: Arc<RegisterBank>) -> Self {
        Self { bank }
    }

    pub fn bank(&self) -> &Arc<RegisterBank> {
        &self.bank
    }

    /// Runs `request` against the bank and returns the reply body, or the
    /// exception to reply with. `None` means the function code is accepted
    /// but produces no reply.
    pub fn handle(&self, request: &Frame) -> Option<Outcome> {
        let bank = &*self.bank;
        let outcome = match FunctionCode::from_u8(request.function_code()) {
            Ok(FunctionCode::ReadCoils) => read_bits(&bank.coils, request),
            Ok(FunctionCode::ReadDiscreteInputs) => read_bits(&bank.discrete_inputs, request),
            Ok(FunctionCode::ReadHoldingRegisters) => {
                read_words(&bank.holding_registers, request)
            }
            Ok(FunctionCode::ReadInputRegisters) => read_words(&bank.input_registers, request),
            Ok(FunctionCode::WriteSingleCoil) => write_single_coil(&bank.coils, request),
            Ok(FunctionCode::WriteSingleRegister) => {
                write_single_register(&bank.holding_registers, request)
            }
            Ok(FunctionCode::WriteMultipleCoils) => write_multiple_coils(&bank.coils, request),
            Ok(FunctionCode::WriteMultipleRegisters) => {
                write_multiple_registers(&bank.holding_registers, request)
            }
            Ok(FunctionCode::WriteAndReadRegisters) => {
                write_and_read_registers(&bank.holding_registers, request)
            }
            // serial line only
            Ok(FunctionCode::ReadExceptionStatus | FunctionCode::ReportSlaveId) => return None,
            Ok(FunctionCode::Custom(_)) | Err(_) => Err(ExceptionCode::IllegalFunction),
        };
        Some(outcome)
    }
}

impl ModbusHandler for RegisterHandler {
    fn serve_modbus(&self, w: &mut dyn ResponseWriter, request: &Frame) {
        let Some(outcome) = self.handle(request) else {
            return;
        };
        let written = match outcome {
            Ok(body) => w.write(&body),
            Err(code) => {
                debug!(
                    transaction_id = request.header().transaction_id,
                    function = request.function_code(),
                    exception = code.as_u8(),
                    "rejecting modbus request"
                );
                write_exception(w, code)
            }
        };
        if let Err(err) = written {
            warn!(error = %err, "failed to write modbus reply");
        }
    }
}

fn request_view(frame: &Frame) -> Result<Request<'_>, ExceptionCode> {
    Request::new(frame).map_err(|_| ExceptionCode::IllegalDataValue)
}

fn check_quantity(quantity: u16, max: u16) -> Result<(), ExceptionCode> {
    if quantity == 0 || quantity > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

/// Prefixes `data` with its one-byte length.
fn counted(data: Vec<u8>) -> Outcome {
    let byte_count = u8::try_from(data.len()).map_err(|_| ExceptionCode::SlaveFailure)?;
    let mut body = Vec::with_capacity(data.len() + 1);
    body.push(byte_count);
    body.extend_from_slice(&data);
    Ok(body)
}

fn be_words(words: &[u16]) -> Result<Vec<u8>, ExceptionCode> {
    let mut out = vec![0u8; words.len() * 2];
    Writer::new(&mut out)
        .write_be_u16s(words)
        .map_err(|_| ExceptionCode::SlaveFailure)?;
    Ok(out)
}

fn words_from_be(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

fn read_bits(bank: &BitBank, frame: &Frame) -> Outcome {
    if frame.data().len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let request = request_view(frame)?;
    let quantity = request.number();
    check_quantity(quantity, MAX_READ_BITS)?;
    let range = checked_range(request.offset(), quantity, bank.len())
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    let bits = bank.read(range).ok_or(ExceptionCode::SlaveFailure)?;
    counted(bits_to_bytes(&bits))
}

fn read_words(bank: &WordBank, frame: &Frame) -> Outcome {
    if frame.data().len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let request = request_view(frame)?;
    let quantity = request.number();
    check_quantity(quantity, MAX_READ_REGISTERS)?;
    let range = checked_range(request.offset(), quantity, bank.len())
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    let words = bank.read(range).ok_or(ExceptionCode::SlaveFailure)?;
    counted(be_words(&words)?)
}

fn write_single_coil(coils: &BitBank, frame: &Frame) -> Outcome {
    if frame.data().len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let request = request_view(frame)?;
    let address = usize::from(request.offset());
    if address >= coils.len() {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    let value = match request.value() {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(ExceptionCode::IllegalDataValue),
    };
    coils
        .set(address, value)
        .map_err(|_| ExceptionCode::IllegalDataAddress)?;

    Ok(frame.data().to_vec())
}

fn write_single_register(holdings: &WordBank, frame: &Frame) -> Outcome {
    if frame.data().len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let request = request_view(frame)?;
    let address = usize::from(request.offset());
    if address >= holdings.len() {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    holdings
        .set(address, request.value())
        .map_err(|_| ExceptionCode::IllegalDataAddress)?;

    Ok(frame.data().to_vec())
}

fn write_multiple_coils(coils: &BitBank, frame: &Frame) -> Outcome {
    let data = frame.data();
    if data.len() < 6 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let request = request_view(frame)?;
    let quantity = request.number();
    check_quantity(quantity, MAX_WRITE_COILS)?;
    let range = checked_range(request.offset(), quantity, coils.len())
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    // Byte-count mismatches on coil writes are reported as SlaveFailure,
    // unlike register writes. Existing clients depend on this.
    let byte_count = usize::from(data[4]);
    if data.len() != 5 + byte_count || byte_count != packed_len(range.len()) {
        return Err(ExceptionCode::SlaveFailure);
    }

    let bits = bytes_to_bits(&data[5..]);
    coils
        .write(range.start, &bits[..range.len()])
        .map_err(|_| ExceptionCode::SlaveFailure)?;

    Ok(data[..4].to_vec())
}

fn write_multiple_registers(holdings: &WordBank, frame: &Frame) -> Outcome {
    let data = frame.data();
    if data.len() < 7 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let request = request_view(frame)?;
    let quantity = request.number();
    check_quantity(quantity, MAX_WRITE_REGISTERS)?;
    let range = checked_range(request.offset(), quantity, holdings.len())
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    let byte_count = usize::from(data[4]);
    if data.len() != 5 + byte_count || byte_count != 2 * range.len() {
        return Err(ExceptionCode::IllegalDataValue);
    }

    holdings
        .write(range.start, &words_from_be(&data[5..]))
        .map_err(|_| ExceptionCode::SlaveFailure)?;

    Ok(data[..4].to_vec())
}

/// Write offset, write quantity and byte count of a combined request.
fn write_fields(bytes: &[u8]) -> Result<(u16, u16, u8), DecodeError> {
    let mut r = Reader::new(bytes);
    Ok((r.read_be_u16()?, r.read_be_u16()?, r.read_u8()?))
}

fn write_and_read_registers(holdings: &WordBank, frame: &Frame) -> Outcome {
    let data = frame.data();
    if data.len() < 11 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let request = request_view(frame)?;
    let read_offset = request.offset();
    let read_quantity = request.number();

    let (write_offset, write_quantity, byte_count) =
        write_fields(&data[4..]).map_err(|_| ExceptionCode::IllegalDataValue)?;
    let byte_count = usize::from(byte_count);

    if read_quantity == 0
        || read_quantity > MAX_READ_REGISTERS
        || write_quantity == 0
        || write_quantity > MAX_RW_WRITE_REGISTERS
        || byte_count != 2 * usize::from(write_quantity)
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let read_range = checked_range(read_offset, read_quantity, holdings.len());
    let write_range = checked_range(write_offset, write_quantity, holdings.len());
    let (Some(read_range), Some(write_range)) = (read_range, write_range) else {
        return Err(ExceptionCode::IllegalDataAddress);
    };

    if data.len() != 9 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }

    // The write lands before the read so overlapping ranges see new values.
    holdings
        .write(write_range.start, &words_from_be(&data[9..]))
        .map_err(|_| ExceptionCode::SlaveFailure)?;
    let words = holdings
        .read(read_range)
        .ok_or(ExceptionCode::SlaveFailure)?;
    counted(be_words(&words)?)
}

//! Modbus/TCP slave-side encoding in pure Rust.
//!
//! `modslave-core` holds the parts of the protocol that need no I/O: the MBAP
//! header and frame codec, the request view, function and exception codes, and
//! the LSB-first bit packing used by coil and discrete-input payloads. It is
//! `no_std` with `alloc`; the `std` feature only adds `std::error::Error` impls.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod bits;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod pdu;

pub use bits::{bits_to_bytes, bytes_to_bits};
pub use error::{DecodeError, EncodeError};
pub use frame::{Frame, Header};
pub use pdu::{ExceptionCode, FunctionCode, Request};

//! Async Modbus/TCP slave.
//!
//! [`ModbusTcpServer`] accepts connections and runs one task per connection.
//! Each task decodes MBAP frames, hands them to a [`ModbusHandler`] together
//! with a [`ResponseWriter`], flushes the reply and loops for the next request
//! until the peer goes away or the connection can no longer be reused.
//! [`RegisterHandler`] is the stock handler: it serves the nine data-access
//! function codes against an in-memory [`RegisterBank`].

#![forbid(unsafe_code)]

use modslave_core::{DecodeError, EncodeError};
use thiserror::Error;

pub mod bank;
pub mod conn;
pub mod dispatch;
pub mod handler;
pub mod pool;
pub mod server;

pub use bank::{BitBank, RegisterBank, WordBank};
pub use conn::{ConnState, ConnStateHook, Connection, Response};
pub use dispatch::RegisterHandler;
pub use handler::{ModbusHandler, ResponseWriter, Serialized};
pub use pool::{BufferPool, PooledBuffer};
pub use server::{
    logging_hook, serve, AcceptBackoff, ModbusTcpServer, ServerConfig, DEFAULT_ADDR,
};
#[cfg(feature = "metrics")]
pub use server::{ServerMetrics, ServerMetricsSnapshot};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
    #[error("request too large (limit {limit} bytes)")]
    RequestTooLarge { limit: usize },
}

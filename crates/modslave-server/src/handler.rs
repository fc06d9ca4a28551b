use modslave_core::frame::{Frame, Header};
use modslave_core::pdu::ExceptionCode;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

/// The sink a handler builds its reply through.
///
/// The header starts out as an echo of the request header with the protocol
/// id forced to zero. Nothing reaches the peer until the connection flushes
/// the reply after the handler returns; a handler that never writes sends no
/// reply at all.
pub trait ResponseWriter {
    /// Mutable access to the outgoing header.
    fn header(&mut self) -> &mut Header;

    /// Appends body bytes.
    ///
    /// The first call sets the header length to `2 + data.len()` and emits the
    /// header ahead of the data. Later calls only append.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Emits the header as it currently stands. A no-op once emitted.
    fn write_header(&mut self);

    /// Close the connection after this reply instead of waiting for another request.
    fn close_after_reply(&mut self);
}

pub trait ModbusHandler: Send + Sync + 'static {
    /// Serve one decoded request frame, replying through `w`.
    fn serve_modbus(&self, w: &mut dyn ResponseWriter, request: &Frame);
}

impl<T> ModbusHandler for Arc<T>
where
    T: ModbusHandler + ?Sized,
{
    fn serve_modbus(&self, w: &mut dyn ResponseWriter, request: &Frame) {
        (**self).serve_modbus(w, request)
    }
}

/// Replies with `code`: the function code gains its high bit and the body is
/// the single exception byte.
pub fn write_exception(w: &mut dyn ResponseWriter, code: ExceptionCode) -> io::Result<usize> {
    w.header().set_exception();
    w.write(&[code.as_u8()])
}

/// Runs one request at a time through the wrapped handler.
///
/// Handlers are shared by every connection of a server, and [`RegisterHandler`]
/// applies multi-point writes one cell at a time. Wrap it in `Serialized` when
/// concurrent clients must never observe a half-applied write.
///
/// [`RegisterHandler`]: crate::RegisterHandler
#[derive(Debug, Default)]
pub struct Serialized<H> {
    inner: H,
    lock: Mutex<()>,
}

impl<H> Serialized<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }

    pub fn get_ref(&self) -> &H {
        &self.inner
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: ModbusHandler> ModbusHandler for Serialized<H> {
    fn serve_modbus(&self, w: &mut dyn ResponseWriter, request: &Frame) {
        // A panicking handler leaves no state behind the unit lock.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.serve_modbus(w, request);
    }
}

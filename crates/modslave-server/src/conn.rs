//! Per-connection request loop.

use crate::handler::{ModbusHandler, ResponseWriter};
use crate::pool::{BufferPool, PooledBuffer};
use crate::server::ServerConfig;
use crate::ServerError;
use bytes::BytesMut;
use modslave_core::encoding::Reader;
use modslave_core::frame::{frame_size, Frame, Header, MBAP_HEADER_LEN, TCP_PROTOCOL_ID};
use modslave_core::DecodeError;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

#[cfg(feature = "metrics")]
use crate::server::ServerMetrics;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// Accepted, no request bytes seen yet.
    New,
    /// A request is being read or served.
    Active,
    /// Between requests, waiting for the next one.
    Idle,
    /// Taken over by the embedding application. Never entered by this crate.
    Hijacked,
    Closed,
}

impl ConnState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Hijacked => "hijacked",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called synchronously on every connection state transition.
pub type ConnStateHook = Arc<dyn Fn(SocketAddr, ConnState) + Send + Sync>;

/// The [`ResponseWriter`] handed to handlers, buffering into the
/// connection's write buffer.
pub struct Response<'a> {
    header: Header,
    wrote_header: bool,
    written: usize,
    close_after_reply: bool,
    buf: &'a mut BytesMut,
}

impl<'a> Response<'a> {
    /// Starts a reply to a request carrying `request_header`.
    pub fn new(request_header: Header, buf: &'a mut BytesMut) -> Self {
        let mut header = request_header;
        header.protocol_id = TCP_PROTOCOL_ID;
        Self {
            header,
            wrote_header: false,
            written: 0,
            close_after_reply: false,
            buf,
        }
    }

    /// Body bytes written so far, excluding the header.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn wrote_header(&self) -> bool {
        self.wrote_header
    }

    pub fn closes_after_reply(&self) -> bool {
        self.close_after_reply
    }
}

impl ResponseWriter for Response<'_> {
    fn header(&mut self) -> &mut Header {
        &mut self.header
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.wrote_header {
            self.header
                .set_payload_len(data.len())
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
            self.write_header();
        }
        if data.is_empty() {
            return Ok(0);
        }
        self.buf.extend_from_slice(data);
        self.written += data.len();
        Ok(data.len())
    }

    fn write_header(&mut self) {
        if self.wrote_header {
            return;
        }
        self.wrote_header = true;
        self.buf.extend_from_slice(&self.header.to_bytes());
    }

    fn close_after_reply(&mut self) {
        self.close_after_reply = true;
    }
}

/// One accepted client connection.
///
/// Requests are served strictly one at a time: the reply to a request is
/// flushed before the next request is read.
pub struct Connection<IO, H> {
    io: IO,
    peer: SocketAddr,
    handler: Arc<H>,
    config: Arc<ServerConfig>,
    rbuf: PooledBuffer,
    wbuf: PooledBuffer,
    state: Option<ConnState>,
    werr: Option<io::Error>,
    #[cfg(feature = "metrics")]
    metrics: Arc<ServerMetrics>,
}

impl<IO, H> Connection<IO, H>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    H: ModbusHandler,
{
    pub fn new(
        io: IO,
        peer: SocketAddr,
        handler: Arc<H>,
        config: Arc<ServerConfig>,
        pool: &BufferPool,
    ) -> Self {
        Self {
            io,
            peer,
            handler,
            config,
            rbuf: pool.read_buffer(),
            wbuf: pool.write_buffer(),
            state: None,
            werr: None,
            #[cfg(feature = "metrics")]
            metrics: Arc::new(ServerMetrics::default()),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<ServerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> Option<ConnState> {
        self.state
    }

    /// Serves requests until the connection can no longer be reused, then
    /// closes it and returns its buffers to the pool.
    pub async fn run(mut self) {
        self.set_state(ConnState::New);
        match self.serve().await {
            Ok(()) => debug!("closing connection after reply"),
            Err(ServerError::ConnectionClosed) => debug!("peer closed connection"),
            Err(err) => {
                #[cfg(feature = "metrics")]
                {
                    if matches!(
                        err,
                        ServerError::Decode(_) | ServerError::RequestTooLarge { .. }
                    ) {
                        self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                debug!(error = %err, "closing connection");
            }
        }
        if let Err(err) = self.io.shutdown().await {
            debug!(error = %err, "shutdown failed");
        }
        self.set_state(ConnState::Closed);
    }

    async fn serve(&mut self) -> Result<(), ServerError> {
        loop {
            let frame = match self.config.read_timeout {
                Some(limit) => tokio::time::timeout(limit, self.read_frame())
                    .await
                    .map_err(|_| ServerError::Timeout)??,
                None => self.read_frame().await?,
            };
            debug!(
                transaction_id = frame.header().transaction_id,
                unit_id = frame.header().unit_id,
                function = frame.function_code(),
                "received modbus request"
            );
            #[cfg(feature = "metrics")]
            self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

            let close_requested = self.dispatch(&frame)?;

            let flushed = match self.config.write_timeout {
                Some(limit) => tokio::time::timeout(limit, self.flush())
                    .await
                    .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
                None => self.flush().await,
            };
            if let Err(err) = flushed {
                let timed_out = err.kind() == io::ErrorKind::TimedOut;
                self.werr = Some(err);
                if timed_out {
                    return Err(ServerError::Timeout);
                }
            }

            if !self.reusable(close_requested) {
                if let Some(err) = self.werr.take() {
                    return Err(err.into());
                }
                return Ok(());
            }
            self.set_state(ConnState::Idle);
        }
    }

    /// Runs the handler for `frame`, leaving the encoded reply in the write
    /// buffer. Returns whether the handler asked for the connection to close.
    fn dispatch(&mut self, frame: &Frame) -> Result<bool, ServerError> {
        let handler = &self.handler;
        let mut w = Response::new(*frame.header(), &mut *self.wbuf);
        let served = catch_unwind(AssertUnwindSafe(|| handler.serve_modbus(&mut w, frame)));
        let close_requested = w.closes_after_reply();
        #[cfg(feature = "metrics")]
        let exception = w.wrote_header() && w.header.is_exception();

        if served.is_err() {
            warn!(
                peer = %self.peer,
                function = frame.function_code(),
                "modbus handler panicked; closing connection"
            );
            self.wbuf.clear();
            return Err(ServerError::Io(io::Error::new(
                io::ErrorKind::Other,
                "handler panicked",
            )));
        }
        #[cfg(feature = "metrics")]
        {
            if exception {
                self.metrics.exceptions_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(close_requested)
    }

    /// Reads one complete frame.
    ///
    /// No request may exceed `max_frame_len` on the wire; the limit is checked
    /// against the header's length field before any of the payload is
    /// buffered.
    async fn read_frame(&mut self) -> Result<Frame, ServerError> {
        let limit = self.config.max_frame_len;
        loop {
            if !self.rbuf.is_empty() {
                self.set_state(ConnState::Active);
            }
            if self.rbuf.len() >= MBAP_HEADER_LEN {
                let header = Header::decode(&mut Reader::new(&self.rbuf))?;
                let size = frame_size(&header);
                if size > limit {
                    return Err(ServerError::RequestTooLarge { limit });
                }
                if size < MBAP_HEADER_LEN {
                    return Err(DecodeError::InvalidLength.into());
                }
                if self.rbuf.len() >= size {
                    let raw = self.rbuf.split_to(size);
                    return Ok(Frame::decode(&mut Reader::new(&raw))?);
                }
                let missing = size - self.rbuf.len();
                self.rbuf.reserve(missing);
            }

            let n = self.io.read_buf(&mut *self.rbuf).await?;
            if n == 0 {
                return Err(match self.rbuf.len() {
                    0 => ServerError::ConnectionClosed,
                    len if len < MBAP_HEADER_LEN => DecodeError::UnexpectedEof.into(),
                    _ => DecodeError::ShortFrame.into(),
                });
            }
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.wbuf.is_empty() {
            return Ok(());
        }
        let result = self.io.write_all(&self.wbuf).await;
        self.wbuf.clear();
        result?;
        self.io.flush().await
    }

    fn reusable(&self, close_requested: bool) -> bool {
        self.werr.is_none() && !close_requested
    }

    fn set_state(&mut self, state: ConnState) {
        if self.state == Some(state) {
            return;
        }
        self.state = Some(state);
        trace!(peer = %self.peer, %state, "connection state");
        if let Some(hook) = &self.config.conn_state {
            hook(self.peer, state);
        }
    }
}

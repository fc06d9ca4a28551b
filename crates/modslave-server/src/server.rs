use crate::conn::{ConnState, ConnStateHook, Connection};
use crate::handler::ModbusHandler;
use crate::pool::BufferPool;
use crate::ServerError;
use modslave_core::frame::MAX_ADU_LEN;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info_span, warn, Instrument};

/// Listen address used when none is given.
pub const DEFAULT_ADDR: &str = "0.0.0.0:1502";

const BACKOFF_START: Duration = Duration::from_millis(5);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Per-connection settings shared by every connection of a server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Bound on receiving one whole request, counted from the moment the
    /// connection starts waiting for it.
    pub read_timeout: Option<Duration>,
    /// Bound on flushing one reply.
    pub write_timeout: Option<Duration>,
    /// Largest request accepted on the wire, MBAP header included.
    pub max_frame_len: usize,
    pub conn_state: Option<ConnStateHook>,
}

impl ServerConfig {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_conn_state(mut self, hook: ConnStateHook) -> Self {
        self.conn_state = Some(hook);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            max_frame_len: MAX_ADU_LEN,
            conn_state: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_frame_len", &self.max_frame_len)
            .field("conn_state", &self.conn_state.is_some())
            .finish()
    }
}

/// Delay between retries of a failing accept: 5 ms, doubling up to 1 s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptBackoff {
    delay: Option<Duration>,
}

impl AcceptBackoff {
    pub const fn new() -> Self {
        Self { delay: None }
    }

    /// The delay before the next retry.
    pub fn next(&mut self) -> Duration {
        let delay = match self.delay {
            None => BACKOFF_START,
            Some(prev) => (prev * 2).min(BACKOFF_MAX),
        };
        self.delay = Some(delay);
        delay
    }

    /// Forget past failures after a successful accept.
    pub fn reset(&mut self) {
        self.delay = None;
    }
}

/// Errors worth retrying: the failure belongs to one pending connection or to
/// a momentary resource shortage, not to the listening socket.
fn is_transient_accept_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    #[cfg(unix)]
    {
        if matches!(err.raw_os_error(), Some(ENFILE) | Some(EMFILE)) {
            return true;
        }
    }
    false
}

/// System-wide file table full.
#[cfg(unix)]
const ENFILE: i32 = 23;
/// Per-process descriptor limit reached.
#[cfg(unix)]
const EMFILE: i32 = 24;

#[cfg(feature = "metrics")]
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub(crate) connections_accepted: AtomicU64,
    pub(crate) requests_total: AtomicU64,
    pub(crate) exceptions_sent: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
}

#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerMetricsSnapshot {
    pub connections_accepted: u64,
    pub requests_total: u64,
    pub exceptions_sent: u64,
    pub decode_errors: u64,
}

#[cfg(feature = "metrics")]
impl ServerMetrics {
    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        ServerMetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            exceptions_sent: self.exceptions_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct ModbusTcpServer<H> {
    listener: TcpListener,
    handler: Arc<H>,
    config: Arc<ServerConfig>,
    pool: Arc<BufferPool>,
    next_conn_id: AtomicU64,
    #[cfg(feature = "metrics")]
    metrics: Arc<ServerMetrics>,
}

impl<H: ModbusHandler> ModbusTcpServer<H> {
    pub async fn bind<A: ToSocketAddrs>(addr: A, handler: H) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, handler))
    }

    pub fn from_listener(listener: TcpListener, handler: H) -> Self {
        Self {
            listener,
            handler: Arc::new(handler),
            config: Arc::new(ServerConfig::default()),
            pool: Arc::new(BufferPool::new()),
            next_conn_id: AtomicU64::new(1),
            #[cfg(feature = "metrics")]
            metrics: Arc::new(ServerMetrics::default()),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    #[cfg(feature = "metrics")]
    pub fn metrics_handle(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    #[cfg(feature = "metrics")]
    pub fn metrics_snapshot(&self) -> ServerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Accepts connections until the listener fails with a non-transient
    /// error. Each connection runs on its own task; the loop never waits for
    /// one to finish.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut backoff = AcceptBackoff::new();
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) if is_transient_accept_error(&err) => {
                    let delay = backoff.next();
                    warn!(error = %err, ?delay, "modbus tcp accept failed; retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            backoff.reset();

            if let Err(err) = socket.set_nodelay(true) {
                debug!(%peer, error = %err, "could not disable nagle");
            }
            #[cfg(feature = "metrics")]
            self.metrics
                .connections_accepted
                .fetch_add(1, Ordering::Relaxed);

            let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            let conn = Connection::new(
                socket,
                peer,
                Arc::clone(&self.handler),
                Arc::clone(&self.config),
                &self.pool,
            );
            #[cfg(feature = "metrics")]
            let conn = conn.with_metrics(Arc::clone(&self.metrics));

            debug!(id, %peer, "accepted modbus tcp connection");
            tokio::spawn(conn.run().instrument(info_span!("conn", id, %peer)));
        }
    }
}

/// Binds `addr` (or [`DEFAULT_ADDR`] when empty) and serves `handler` with the
/// default configuration.
pub async fn serve<H: ModbusHandler>(addr: &str, handler: H) -> Result<(), ServerError> {
    let addr = if addr.is_empty() { DEFAULT_ADDR } else { addr };
    ModbusTcpServer::bind(addr, handler).await?.run().await
}

/// Logs every state transition at debug level.
pub fn logging_hook() -> ConnStateHook {
    Arc::new(|peer: SocketAddr, state: ConnState| {
        debug!(%peer, %state, "modbus connection state");
    })
}

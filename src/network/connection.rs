//! Server side of one management connection
//!
//! Requests on a connection are served strictly one after another. Any
//! request failure closes the connection, since the stream position is
//! no longer known.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::handler::{Dispatcher, ServerContext};
use crate::protocol::ProtocolError;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for or serving requests
    Open,
    /// Loop has ended, stream is being shut down
    Closing,
    /// Connection has been closed
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Requests completed successfully
    pub requests_served: u64,
    /// Requests that ended in an error
    pub requests_failed: u64,
}

/// Why a connection's request loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the stream between requests
    PeerClosed,
    /// The node is shutting down
    Shutdown,
    /// A request failed
    Failed(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "connection closed by peer"),
            CloseReason::Shutdown => write!(f, "server shutting down"),
            CloseReason::Failed(e) => write!(f, "request failed: {}", e),
        }
    }
}

/// An accepted management connection
pub struct Connection {
    /// Remote peer address
    remote_addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    state: ConnectionState,
    /// Last activity timestamp
    last_activity: Instant,
    stats: ConnectionStats,
}

impl Connection {
    /// Wrap an accepted TCP stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            remote_addr,
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            state: ConnectionState::Open,
            last_activity: Instant::now(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Get time since last activity
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Serve requests until the peer closes, a request fails or the node shuts down
    pub async fn serve(&mut self, dispatcher: &Dispatcher, ctx: &ServerContext) -> CloseReason {
        let mut shutdown = ctx.shutdown.clone();
        let reason = loop {
            let result = tokio::select! {
                result = dispatcher.dispatch(ctx, &mut self.reader, &mut self.writer) => result,
                _ = shutdown_requested(&mut shutdown) => break CloseReason::Shutdown,
            };
            self.last_activity = Instant::now();

            match result {
                Ok(true) => self.stats.requests_served += 1,
                Ok(false) => break CloseReason::PeerClosed,
                Err(e) => {
                    self.stats.requests_failed += 1;
                    tracing::error!("Request from {} failed: {}", self.remote_addr, e);
                    break CloseReason::Failed(e.to_string());
                }
            }
        };

        if let Err(e) = self.close().await {
            tracing::debug!("Error closing connection to {}: {}", self.remote_addr, e);
        }
        reason
    }

    /// Flush and shut down the write side
    pub async fn close(&mut self) -> ConnectionResult<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closing;
        let result = self.writer.shutdown().await;
        self.state = ConnectionState::Closed;
        result.map_err(ConnectionError::from)
    }
}

/// Resolves once the shutdown flag is raised
///
/// Never resolves if the sender is gone without raising it.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

//! Management client
//!
//! Sends one request at a time to a domain controller or server manager
//! and reads back the typed response.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::NetworkConfig;
use crate::protocol::envelope::{read_response_end, read_response_header, write_request_header};
use crate::protocol::opcodes::HandlerId;
use crate::protocol::{CodecConfig, ProtocolError, ProtocolResult, DEFAULT_CHUNK_SIZE};

/// Client errors
#[derive(Error, Debug)]
pub enum ManagementError {
    #[error("Management endpoint {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connecting to {addr} timed out after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    /// The exchange failed after the connection was up, including a
    /// response frame cut short by the peer
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type ManagementResult<T> = Result<T, ManagementError>;

/// How the client obtains a connection for each request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStrategy {
    /// Open a new connection per request
    Establish,
    /// Keep one connection open and reuse it until an error occurs
    Reuse,
}

/// Encoding settings shared by every request a client sends
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub codec: CodecConfig,
    pub chunk_size: usize,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Client half of one protocol operation
#[async_trait]
pub trait ManagementRequest: Send {
    type Response: Send;

    const HANDLER: HandlerId;
    const REQUEST: u8;
    const RESPONSE: u8;

    /// Encode the request body following the opcode
    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()>;

    /// Decode the response body between the envelope header and end marker
    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Response>;
}

type ClientStream = BufStream<TcpStream>;

/// Management protocol client
pub struct ManagementClient {
    addr: SocketAddr,
    config: NetworkConfig,
    strategy: ConnectionStrategy,
    settings: RequestSettings,
    /// Cached connection for [`ConnectionStrategy::Reuse`]
    cached: Mutex<Option<ClientStream>>,
}

impl ManagementClient {
    pub fn new(addr: SocketAddr, config: NetworkConfig) -> Self {
        let strategy = if config.reuse_connections {
            ConnectionStrategy::Reuse
        } else {
            ConnectionStrategy::Establish
        };
        Self {
            addr,
            config,
            strategy,
            settings: RequestSettings::default(),
            cached: Mutex::new(None),
        }
    }

    /// Connect to a management endpoint by hostname
    pub async fn for_host(host: &str, config: NetworkConfig) -> ManagementResult<Self> {
        let addr = super::resolve_host(host, config.port)
            .await
            .map_err(|source| ManagementError::Unreachable {
                addr: format!("{}:{}", host, config.port),
                source,
            })?;
        Ok(Self::new(addr, config))
    }

    pub fn with_strategy(mut self, strategy: ConnectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_settings(mut self, settings: RequestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn strategy(&self) -> ConnectionStrategy {
        self.strategy
    }

    /// Whether a reusable connection is currently cached
    pub async fn has_cached_connection(&self) -> bool {
        self.cached.lock().await.is_some()
    }

    async fn connect(&self) -> ManagementResult<ClientStream> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        tracing::debug!("Connecting to {}", self.addr);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ManagementError::Unreachable {
                    addr: self.addr.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ManagementError::Timeout {
                    addr: self.addr,
                    timeout,
                })
            }
        };
        stream.set_nodelay(true)?;
        Ok(BufStream::new(stream))
    }

    /// Send `request` and wait for its response
    pub async fn execute_for_result<R: ManagementRequest>(
        &self,
        request: &mut R,
    ) -> ManagementResult<R::Response> {
        let mut cached = self.cached.lock().await;
        let mut stream = match (self.strategy, cached.take()) {
            (ConnectionStrategy::Reuse, Some(stream)) if !is_stale(&stream) => stream,
            (ConnectionStrategy::Reuse, Some(_)) => {
                tracing::debug!("Cached connection to {} was closed by the peer, reconnecting", self.addr);
                self.connect().await?
            }
            _ => self.connect().await?,
        };

        match self.exchange(&mut stream, request).await {
            Ok(response) => {
                if self.strategy == ConnectionStrategy::Reuse {
                    *cached = Some(stream);
                }
                Ok(response)
            }
            Err(e) => {
                // the stream may be mid-frame; never hand it out again
                tracing::debug!("Discarding connection to {} after error: {}", self.addr, e);
                Err(ManagementError::Protocol(e))
            }
        }
    }

    /// Like [`execute_for_result`](Self::execute_for_result), taking the request by value
    pub async fn execute<R: ManagementRequest>(&self, mut request: R) -> ManagementResult<R::Response> {
        self.execute_for_result(&mut request).await
    }

    async fn exchange<R: ManagementRequest>(
        &self,
        stream: &mut ClientStream,
        request: &mut R,
    ) -> ProtocolResult<R::Response> {
        write_request_header(&mut *stream, R::HANDLER, R::REQUEST).await?;
        request.send_request(&self.settings, &mut *stream).await?;
        stream.flush().await?;

        read_response_header(&mut *stream, R::RESPONSE).await?;
        let response = request.receive_response(&self.settings, &mut *stream).await?;
        read_response_end(&mut *stream).await?;
        Ok(response)
    }
}

/// Whether the peer closed an idle cached connection
///
/// Nothing is pending between exchanges, so any readable state (EOF, a
/// reset or stray bytes) means the stream cannot carry another request.
fn is_stale(stream: &ClientStream) -> bool {
    let mut byte = [0u8; 1];
    match stream.get_ref().try_read(&mut byte) {
        Err(e) => e.kind() != io::ErrorKind::WouldBlock,
        Ok(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::super::requests::server_manager::IsActiveRequest;
    use super::*;
    use crate::handler::{Dispatcher, ServerContext};
    use crate::repository::InMemoryHostController;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, BufReader, BufWriter};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_strategy_from_config() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let client = ManagementClient::new(addr, NetworkConfig::default());
        assert_eq!(client.strategy(), ConnectionStrategy::Establish);

        let client = ManagementClient::new(addr, NetworkConfig::default().with_reuse(true));
        assert_eq!(client.strategy(), ConnectionStrategy::Reuse);
        assert!(!client.has_cached_connection().await);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        // Grab a free port, then close the listener so nothing answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ManagementClient::new(addr, NetworkConfig::default());
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ManagementError::Unreachable { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_unreachable() {
        // The NUL byte fails resolution without touching DNS
        let result = ManagementClient::for_host("bad\0host", NetworkConfig::new(9999)).await;
        match result {
            Err(ManagementError::Unreachable { addr, .. }) => assert!(addr.ends_with(":9999")),
            Err(other) => panic!("expected Unreachable, got {other:?}"),
            Ok(_) => panic!("resolution should fail"),
        }
    }

    #[tokio::test]
    async fn test_truncated_response_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 64];
            let _ = stream.read(&mut request).await.unwrap();
            // half of the magic, then hang up
            stream.write_all(&crate::protocol::MAGIC_BYTES[..2]).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let client = ManagementClient::new(addr, NetworkConfig::default());
        let err = client.execute(IsActiveRequest).await.unwrap_err();
        assert!(
            matches!(err, ManagementError::Protocol(ProtocolError::Io(_))),
            "got {err:?}"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_cached_connection_is_replaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // One request per connection, then the server hangs up
        let server = tokio::spawn(async move {
            let dispatcher = Dispatcher::standard();
            let ctx = ServerContext::detached()
                .with_host(Arc::new(InMemoryHostController::new("host-a")));
            for _ in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let (read_half, write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut writer = BufWriter::new(write_half);
                assert!(dispatcher.dispatch(&ctx, &mut reader, &mut writer).await.unwrap());
                writer.shutdown().await.unwrap();
            }
        });

        let client = ManagementClient::new(addr, NetworkConfig::default())
            .with_strategy(ConnectionStrategy::Reuse);
        assert!(client.execute(IsActiveRequest).await.unwrap());
        assert!(client.has_cached_connection().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.execute(IsActiveRequest).await.unwrap());
        server.await.unwrap();
    }
}

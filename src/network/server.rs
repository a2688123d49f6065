//! Management server
//!
//! Accepts connections and runs each one's request loop on its own task.
//! The dispatcher is built before the server starts and shared read-only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};

use super::connection::{shutdown_requested, CloseReason, Connection};
use super::NetworkConfig;
use crate::handler::{Dispatcher, ServerContext};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new client has connected
    ClientConnected { addr: SocketAddr },
    /// A client's request loop has ended
    ClientDisconnected { addr: SocketAddr, reason: String },
    /// Server started
    Started { bind_addr: SocketAddr },
    /// Server stopped
    Stopped,
}

/// Information about a connected client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub connected_at: Instant,
}

/// Management protocol server
pub struct ManagementServer {
    config: NetworkConfig,
    dispatcher: Arc<Dispatcher>,
    context: ServerContext,
    /// Connected clients
    clients: Arc<RwLock<HashMap<SocketAddr, ClientInfo>>>,
    event_tx: mpsc::Sender<ServerEvent>,
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Raised once to stop the accept loop, connections and plan streams
    shutdown_tx: watch::Sender<bool>,
    running: Arc<RwLock<bool>>,
    local_addr: Option<SocketAddr>,
}

impl ManagementServer {
    /// Create a server; the context's shutdown signal is replaced by the server's own
    pub fn new(config: NetworkConfig, dispatcher: Dispatcher, mut context: ServerContext) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        context.shutdown = shutdown_rx;

        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            context,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            running: Arc::new(RwLock::new(false)),
            local_addr: None,
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Bind and start accepting connections, returning the bound address
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }
        if *self.shutdown_tx.borrow() {
            // a stopped server cannot be restarted with the same signal
            return Err(ServerError::NotRunning);
        }

        let bind_addr = self.config.bind_string();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        tracing::info!("Management server listening on {}", local_addr);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self.event_tx.try_send(ServerEvent::Started { bind_addr: local_addr });

        let clients = self.clients.clone();
        let event_tx = self.event_tx.clone();
        let dispatcher = self.dispatcher.clone();
        let context = self.context.clone();
        let running = self.running.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);

                                let clients = clients.clone();
                                let event_tx = event_tx.clone();
                                let dispatcher = dispatcher.clone();
                                let context = context.clone();

                                tokio::spawn(async move {
                                    handle_client(stream, addr, clients, event_tx, dispatcher, context)
                                        .await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_requested(&mut shutdown) => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.try_send(ServerEvent::Stopped);
        });

        Ok(local_addr)
    }

    /// Stop accepting connections and end every open request loop
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }
        self.shutdown_tx.send_replace(true);
        Ok(())
    }

    /// Get a list of connected clients
    pub async fn clients(&self) -> Vec<ClientInfo> {
        let clients = self.clients.read().await;
        clients.values().cloned().collect()
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// Run one client's request loop and keep the client table current
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<HashMap<SocketAddr, ClientInfo>>>,
    event_tx: mpsc::Sender<ServerEvent>,
    dispatcher: Arc<Dispatcher>,
    context: ServerContext,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }
    let mut conn = Connection::new(stream, addr);

    {
        let mut clients = clients.write().await;
        clients.insert(
            addr,
            ClientInfo {
                addr,
                connected_at: Instant::now(),
            },
        );
    }
    let _ = event_tx.try_send(ServerEvent::ClientConnected { addr });

    let reason = conn.serve(&dispatcher, &context).await;
    match &reason {
        CloseReason::Failed(_) => tracing::warn!("Closed connection from {}: {}", addr, reason),
        _ => tracing::info!("Connection from {} ended: {}", addr, reason),
    }

    {
        let mut clients = clients.write().await;
        clients.remove(&addr);
    }

    let _ = event_tx.try_send(ServerEvent::ClientDisconnected {
        addr,
        reason: reason.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryDomainController;
    use std::time::Duration;

    fn server() -> ManagementServer {
        let context = ServerContext::detached()
            .with_domain(Arc::new(InMemoryDomainController::new(None)));
        let config = NetworkConfig::new(0).with_bind_address("127.0.0.1");
        ManagementServer::new(config, Dispatcher::standard(), context)
    }

    #[tokio::test]
    async fn test_detached_context_never_signals() {
        let mut shutdown = ServerContext::detached().shutdown;
        assert!(!*shutdown.borrow());
        let waited =
            tokio::time::timeout(Duration::from_millis(50), shutdown_requested(&mut shutdown)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = server();
        assert!(!server.is_running().await);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut server = server();
        let mut events = server.take_event_receiver().unwrap();
        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running().await);
        assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));

        assert!(matches!(events.recv().await, Some(ServerEvent::Started { .. })));

        let _client = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(ServerEvent::ClientConnected { .. })
        ));

        server.stop().await.unwrap();
        let mut saw_stopped = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(5), events.recv()).await
        {
            if matches!(event, ServerEvent::Stopped) {
                saw_stopped = true;
            }
            if saw_stopped && server.clients().await.is_empty() {
                break;
            }
        }
        assert!(saw_stopped);
        assert!(!server.is_running().await);
    }
}

//! Operation handlers and the opcode dispatcher
//!
//! Each protocol operation is a type implementing [`Operation`]. A request
//! runs through an explicit [`HandlerState`] machine driven by
//! [`OperationRun`]; the [`Dispatcher`] maps `(handler id, opcode)` to a
//! plain function pointer that builds a fresh run per request.

pub mod domain;
pub mod server_manager;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::protocol::envelope::{read_request_header, write_response_end, write_response_header};
use crate::protocol::opcodes::{self, HandlerId};
use crate::protocol::{CodecConfig, ProtocolError, ProtocolResult, DEFAULT_CHUNK_SIZE, DEFAULT_STREAM_QUEUE_CAPACITY};
use crate::repository::{ContentRepository, DomainController, HostController};

/// Everything an operation may need while serving a request
#[derive(Clone)]
pub struct ServerContext {
    pub codec: CodecConfig,
    pub chunk_size: usize,
    pub stream_queue_capacity: usize,
    pub domain: Option<Arc<dyn DomainController>>,
    pub content: Option<Arc<dyn ContentRepository>>,
    pub host: Option<Arc<dyn HostController>>,
    /// Raised when the node is shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl ServerContext {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            codec: CodecConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            stream_queue_capacity: DEFAULT_STREAM_QUEUE_CAPACITY,
            domain: None,
            content: None,
            host: None,
            shutdown,
        }
    }

    /// Context with a shutdown signal that is never raised
    ///
    /// [`ManagementServer`](crate::network::ManagementServer) installs its
    /// own signal, so this is the usual starting point for a node.
    pub fn detached() -> Self {
        let (_, shutdown) = watch::channel(false);
        Self::new(shutdown)
    }

    pub fn with_domain(mut self, domain: Arc<dyn DomainController>) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_content(mut self, content: Arc<dyn ContentRepository>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostController>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn domain(&self) -> ProtocolResult<&Arc<dyn DomainController>> {
        self.domain
            .as_ref()
            .ok_or(ProtocolError::CollaboratorUnavailable("domain controller"))
    }

    pub fn content(&self) -> ProtocolResult<&Arc<dyn ContentRepository>> {
        self.content
            .as_ref()
            .ok_or(ProtocolError::CollaboratorUnavailable("content repository"))
    }

    pub fn host(&self) -> ProtocolResult<&Arc<dyn HostController>> {
        self.host
            .as_ref()
            .ok_or(ProtocolError::CollaboratorUnavailable("host controller"))
    }
}

/// One protocol operation: decode a request, compute, encode a response
#[async_trait]
pub trait Operation: Default + Send + Sync + 'static {
    type Request: Send;
    type Response: Send;

    const HANDLER: HandlerId;
    const REQUEST: u8;
    const RESPONSE: u8;
    const NAME: &'static str;

    /// Decode the request body following the opcode
    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request>;

    async fn compute(
        &self,
        ctx: &ServerContext,
        request: Self::Request,
    ) -> ProtocolResult<Self::Response>;

    /// Encode the response body; the envelope is written around it
    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        response: Self::Response,
    ) -> ProtocolResult<()>;
}

/// Where a request is in its lifecycle
#[derive(Debug)]
pub enum HandlerState<Req, Resp> {
    AwaitingRequest,
    ComputingResult(Req),
    SendingResponse(Resp),
    Complete,
    Failed,
}

impl<Req, Resp> HandlerState<Req, Resp> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlerState::Complete | HandlerState::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandlerState::AwaitingRequest => "awaiting-request",
            HandlerState::ComputingResult(_) => "computing-result",
            HandlerState::SendingResponse(_) => "sending-response",
            HandlerState::Complete => "complete",
            HandlerState::Failed => "failed",
        }
    }
}

/// A single request being served by operation `O`
pub struct OperationRun<'c, O: Operation> {
    operation: O,
    ctx: &'c ServerContext,
    state: HandlerState<O::Request, O::Response>,
}

impl<'c, O: Operation> OperationRun<'c, O> {
    pub fn new(ctx: &'c ServerContext) -> Self {
        Self {
            operation: O::default(),
            ctx,
            state: HandlerState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> &HandlerState<O::Request, O::Response> {
        &self.state
    }

    /// Advance one state
    ///
    /// Any error leaves the run in [`HandlerState::Failed`]. Stepping a
    /// terminal run does nothing.
    pub async fn step(
        &mut self,
        input: &mut (dyn AsyncRead + Unpin + Send),
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let state = std::mem::replace(&mut self.state, HandlerState::Failed);
        self.state = match state {
            HandlerState::AwaitingRequest => {
                let request = self.operation.read_request(self.ctx, input).await?;
                HandlerState::ComputingResult(request)
            }
            HandlerState::ComputingResult(request) => {
                let response = self.operation.compute(self.ctx, request).await?;
                HandlerState::SendingResponse(response)
            }
            HandlerState::SendingResponse(response) => {
                write_response_header(&mut *output, O::RESPONSE).await?;
                self.operation
                    .write_response(self.ctx, &mut *output, response)
                    .await?;
                write_response_end(&mut *output).await?;
                HandlerState::Complete
            }
            terminal => terminal,
        };
        Ok(())
    }

    /// Drive the run to completion
    pub async fn run(
        mut self,
        input: &mut (dyn AsyncRead + Unpin + Send),
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        while !self.state.is_terminal() {
            self.step(&mut *input, &mut *output).await?;
        }
        Ok(())
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs one request of a registered operation
pub type HandlerFn = for<'a> fn(
    &'a ServerContext,
    &'a mut (dyn AsyncRead + Unpin + Send + 'a),
    &'a mut (dyn AsyncWrite + Unpin + Send + 'a),
) -> BoxFuture<'a, ProtocolResult<()>>;

fn run_operation<'a, O: Operation>(
    ctx: &'a ServerContext,
    input: &'a mut (dyn AsyncRead + Unpin + Send + 'a),
    output: &'a mut (dyn AsyncWrite + Unpin + Send + 'a),
) -> BoxFuture<'a, ProtocolResult<()>> {
    Box::pin(async move { OperationRun::<O>::new(ctx).run(input, output).await })
}

/// Registered operation
#[derive(Clone, Copy)]
pub struct HandlerEntry {
    pub name: &'static str,
    pub response: u8,
    pub run: HandlerFn,
}

/// Opcode to handler map for one family
pub struct OpcodeTable {
    handler: HandlerId,
    entries: HashMap<u8, HandlerEntry>,
}

impl OpcodeTable {
    pub fn new(handler: HandlerId) -> Self {
        Self {
            handler,
            entries: HashMap::new(),
        }
    }

    pub fn register<O: Operation>(&mut self) -> &mut Self {
        debug_assert_eq!(O::HANDLER, self.handler, "{} registered in wrong family", O::NAME);
        debug_assert_eq!(
            opcodes::response_for(self.handler, O::REQUEST),
            Some(O::RESPONSE),
            "{} disagrees with the opcode registry",
            O::NAME
        );
        self.entries.insert(
            O::REQUEST,
            HandlerEntry {
                name: O::NAME,
                response: O::RESPONSE,
                run: run_operation::<O>,
            },
        );
        self
    }

    pub fn lookup(&self, opcode: u8) -> ProtocolResult<&HandlerEntry> {
        self.entries.get(&opcode).ok_or(ProtocolError::InvalidOpcode {
            handler: self.handler,
            opcode,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Routes request envelopes to operation handlers
///
/// Built once before the server starts and shared read-only.
#[derive(Default)]
pub struct Dispatcher {
    tables: HashMap<HandlerId, OpcodeTable>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher serving both protocol families
    pub fn standard() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.add_table(domain::table());
        dispatcher.add_table(server_manager::table());
        dispatcher
    }

    pub fn add_table(&mut self, table: OpcodeTable) {
        self.tables.insert(table.handler, table);
    }

    pub fn table(&self, handler_id: u8) -> ProtocolResult<&OpcodeTable> {
        HandlerId::from_byte(handler_id)
            .and_then(|id| self.tables.get(&id))
            .ok_or(ProtocolError::UnknownHandler(handler_id))
    }

    /// Serve one request from `input`
    ///
    /// Returns `Ok(false)` when the peer closed the connection before
    /// sending another request.
    pub async fn dispatch<'a>(
        &self,
        ctx: &'a ServerContext,
        input: &'a mut (dyn AsyncRead + Unpin + Send + 'a),
        output: &'a mut (dyn AsyncWrite + Unpin + Send + 'a),
    ) -> ProtocolResult<bool> {
        let header = match read_request_header(&mut *input).await? {
            Some(header) => header,
            None => return Ok(false),
        };
        let table = self.table(header.handler_id)?;
        let entry = table.lookup(header.opcode)?;
        tracing::debug!(
            "Dispatching {} request {} ({:#04x} -> {:#04x})",
            table.handler,
            entry.name,
            header.opcode,
            entry.response
        );
        (entry.run)(ctx, input, output).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::{read_response_end, read_response_header, write_request_header};
    use crate::protocol::opcodes::domain_controller as dc;
    use crate::protocol::{Marshaller, Unmarshaller};
    use crate::repository::InMemoryDomainController;

    fn context() -> ServerContext {
        let (_tx, rx) = watch::channel(false);
        ServerContext::new(rx).with_domain(Arc::new(InMemoryDomainController::new(None)))
    }

    #[test]
    fn test_standard_tables_cover_registry() {
        let dispatcher = Dispatcher::standard();
        for handler in [HandlerId::DomainController, HandlerId::ServerManager] {
            let table = dispatcher.table(handler.as_byte()).unwrap();
            assert_eq!(table.len(), handler.table().len());
            for entry in handler.table() {
                let registered = table.lookup(entry.request).unwrap();
                assert_eq!(registered.response, entry.response);
                assert_eq!(registered.name, entry.name);
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_opcode_fails_request() {
        let dispatcher = Dispatcher::standard();
        let ctx = context();
        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::DomainController, 0xEE)
            .await
            .unwrap();

        let mut input = &request[..];
        let mut output = Vec::new();
        let err = dispatcher
            .dispatch(&ctx, &mut input, &mut output)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidOpcode { handler: HandlerId::DomainController, opcode: 0xEE }
        ));
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_opcode_of_other_family_is_not_borrowed() {
        // A domain-family opcode sent to the server-manager family
        let dispatcher = Dispatcher::standard();
        let ctx = context();
        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::ServerManager, dc::RESTART_SERVER_REQUEST)
            .await
            .unwrap();

        let mut input = &request[..];
        let mut output = Vec::new();
        let err = dispatcher
            .dispatch(&ctx, &mut input, &mut output)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidOpcode { handler: HandlerId::ServerManager, .. }));
    }

    #[tokio::test]
    async fn test_unknown_handler_id() {
        let dispatcher = Dispatcher::standard();
        let ctx = context();
        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::DomainController, dc::GET_DOMAIN_REQUEST)
            .await
            .unwrap();
        request[8] = 0x7F;

        let mut input = &request[..];
        let mut output = Vec::new();
        let err = dispatcher
            .dispatch(&ctx, &mut input, &mut output)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownHandler(0x7F)));
    }

    #[tokio::test]
    async fn test_state_machine_steps() {
        let ctx = context();
        let mut body = Vec::new();
        let m = Marshaller::start(&mut body, &ctx.codec).await.unwrap();
        m.finish().await.unwrap();

        let mut input = &body[..];
        let mut output = Vec::new();
        let mut run = OperationRun::<domain::GetDomain>::new(&ctx);
        assert_eq!(run.state().name(), "awaiting-request");
        run.step(&mut input, &mut output).await.unwrap();
        assert_eq!(run.state().name(), "computing-result");
        run.step(&mut input, &mut output).await.unwrap();
        assert_eq!(run.state().name(), "sending-response");
        assert!(output.is_empty());
        run.step(&mut input, &mut output).await.unwrap();
        assert_eq!(run.state().name(), "complete");
        run.step(&mut input, &mut output).await.unwrap();
        assert!(run.state().is_terminal());

        let mut cursor = &output[..];
        read_response_header(&mut cursor, dc::GET_DOMAIN_RESPONSE).await.unwrap();
        let mut u = Unmarshaller::start(&mut cursor, &ctx.codec).await.unwrap();
        u.expect_header(crate::protocol::opcodes::returns::RETURN_DOMAIN_MODEL)
            .await
            .unwrap();
        let model: crate::protocol::DomainModel = u.read_object().await.unwrap();
        assert_eq!(model.revision, 0);
        u.finish().await.unwrap();
        read_response_end(&mut cursor).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_failure_leaves_failed_state() {
        let ctx = context();
        // Body is missing its start marker
        let body = [0x00u8];
        let mut input = &body[..];
        let mut output = Vec::new();
        let mut run = OperationRun::<domain::GetDomain>::new(&ctx);
        let err = run.step(&mut input, &mut output).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedHeader { .. }));
        assert_eq!(run.state().name(), "failed");
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_missing_collaborator() {
        let (_tx, rx) = watch::channel(false);
        let ctx = ServerContext::new(rx);
        let mut body = Vec::new();
        Marshaller::start(&mut body, &ctx.codec)
            .await
            .unwrap()
            .finish()
            .await
            .unwrap();

        let mut input = &body[..];
        let mut output = Vec::new();
        let err = OperationRun::<domain::GetDomain>::new(&ctx)
            .run(&mut input, &mut output)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::CollaboratorUnavailable(_)));
    }
}

//! Operations served by a host's server manager
//!
//! The domain controller drives these to push model changes to a host and
//! to control the servers it manages.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{OpcodeTable, Operation, ServerContext};
use crate::protocol::fields;
use crate::protocol::opcodes::params::*;
use crate::protocol::opcodes::returns::*;
use crate::protocol::opcodes::server_manager as op;
use crate::protocol::opcodes::HandlerId;
use crate::protocol::{
    DomainModel, DomainModelUpdate, DomainUpdateApplierResponse, HostModel, HostModelUpdate,
    HostUpdateResult, Marshaller, ProtocolResult, ServerIdentity, ServerModel, ServerModelUpdate,
    ServerStatus, ServerUpdateResult, Unmarshaller,
};

/// Opcode table for the server-manager family
pub fn table() -> OpcodeTable {
    let mut table = OpcodeTable::new(HandlerId::ServerManager);
    table
        .register::<IsActive>()
        .register::<GetHostModel>()
        .register::<GetServerModel>()
        .register::<UpdateFullDomain>()
        .register::<UpdateDomainModel>()
        .register::<UpdateHostModel>()
        .register::<UpdateServerModel>()
        .register::<GetServerList>()
        .register::<StartServer>()
        .register::<StopServer>()
        .register::<RestartServer>();
    table
}

async fn read_no_params(
    ctx: &ServerContext,
    input: &mut (dyn AsyncRead + Unpin + Send),
) -> ProtocolResult<()> {
    Unmarshaller::start(input, &ctx.codec).await?.finish().await
}

async fn read_server_name(
    ctx: &ServerContext,
    input: &mut (dyn AsyncRead + Unpin + Send),
) -> ProtocolResult<String> {
    let mut u = Unmarshaller::start(input, &ctx.codec).await?;
    u.expect_header(PARAM_SERVER_NAME).await?;
    let name = u.read_utf().await?;
    u.finish().await?;
    Ok(name)
}

async fn read_server_and_timeout(
    ctx: &ServerContext,
    input: &mut (dyn AsyncRead + Unpin + Send),
) -> ProtocolResult<(String, i64)> {
    let mut u = Unmarshaller::start(input, &ctx.codec).await?;
    u.expect_header(PARAM_SERVER_NAME).await?;
    let name = u.read_utf().await?;
    u.expect_header(PARAM_GRACEFUL_TIMEOUT).await?;
    let timeout = u.read_long().await?;
    u.finish().await?;
    Ok((name, timeout))
}

async fn write_status(
    ctx: &ServerContext,
    output: &mut (dyn AsyncWrite + Unpin + Send),
    status: ServerStatus,
) -> ProtocolResult<()> {
    let mut m = Marshaller::start(output, &ctx.codec).await?;
    m.write_byte(RETURN_SERVER_STATUS).await?;
    m.write_object(&status).await?;
    m.finish().await
}

#[derive(Debug, Default)]
pub struct IsActive;

#[async_trait]
impl Operation for IsActive {
    type Request = ();
    type Response = bool;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::IS_ACTIVE_REQUEST;
    const RESPONSE: u8 = op::IS_ACTIVE_RESPONSE;
    const NAME: &'static str = "IS_ACTIVE";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<()> {
        read_no_params(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, _: ()) -> ProtocolResult<bool> {
        Ok(ctx.host()?.is_active().await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        active: bool,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_ACTIVE).await?;
        m.write_bool(active).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct GetHostModel;

#[async_trait]
impl Operation for GetHostModel {
    type Request = ();
    type Response = HostModel;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::GET_HOST_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_HOST_MODEL_RESPONSE;
    const NAME: &'static str = "GET_HOST_MODEL";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<()> {
        read_no_params(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, _: ()) -> ProtocolResult<HostModel> {
        Ok(ctx.host()?.host_model().await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        model: HostModel,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_HOST_MODEL).await?;
        m.write_object(&model).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct GetServerModel;

#[async_trait]
impl Operation for GetServerModel {
    type Request = String;
    type Response = Option<ServerModel>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::GET_SERVER_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_MODEL_RESPONSE;
    const NAME: &'static str = "GET_SERVER_MODEL";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<String> {
        read_server_name(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, name: String) -> ProtocolResult<Option<ServerModel>> {
        Ok(ctx.host()?.server_model(&name).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        model: Option<ServerModel>,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_SERVER_MODEL).await?;
        m.write_optional_object(model.as_ref()).await?;
        m.finish().await
    }
}

/// Replace the host's copy of the whole domain model
#[derive(Debug, Default)]
pub struct UpdateFullDomain;

#[async_trait]
impl Operation for UpdateFullDomain {
    type Request = DomainModel;
    type Response = ();

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_FULL_DOMAIN_REQUEST;
    const RESPONSE: u8 = op::UPDATE_FULL_DOMAIN_RESPONSE;
    const NAME: &'static str = "UPDATE_FULL_DOMAIN";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<DomainModel> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        u.expect_header(PARAM_DOMAIN_MODEL).await?;
        let model = u.read_object().await?;
        u.finish().await?;
        Ok(model)
    }

    async fn compute(&self, ctx: &ServerContext, model: DomainModel) -> ProtocolResult<()> {
        let host = ctx.host()?;
        tracing::info!("Host {} received domain model revision {}", host.name(), model.revision);
        host.update_full_domain(model).await;
        Ok(())
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        _: (),
    ) -> ProtocolResult<()> {
        Marshaller::start(output, &ctx.codec).await?.finish().await
    }
}

#[derive(Debug, Default)]
pub struct UpdateDomainModel;

#[async_trait]
impl Operation for UpdateDomainModel {
    type Request = Vec<DomainModelUpdate>;
    type Response = Vec<DomainUpdateApplierResponse>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_DOMAIN_MODEL_REQUEST;
    const RESPONSE: u8 = op::UPDATE_DOMAIN_MODEL_RESPONSE;
    const NAME: &'static str = "UPDATE_DOMAIN_MODEL";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        let updates =
            fields::read_object_list(&mut u, PARAM_UPDATE_COUNT, PARAM_DOMAIN_MODEL_UPDATE).await?;
        u.finish().await?;
        Ok(updates)
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        updates: Self::Request,
    ) -> ProtocolResult<Self::Response> {
        Ok(ctx.host()?.apply_domain_updates(updates).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        responses: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        fields::write_applier_responses(&mut m, RETURN_APPLY_UPDATE, &responses).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct UpdateHostModel;

#[async_trait]
impl Operation for UpdateHostModel {
    type Request = Vec<HostModelUpdate>;
    type Response = Vec<HostUpdateResult>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_HOST_MODEL_REQUEST;
    const RESPONSE: u8 = op::UPDATE_HOST_MODEL_RESPONSE;
    const NAME: &'static str = "UPDATE_HOST_MODEL";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        let updates =
            fields::read_object_list(&mut u, PARAM_UPDATE_COUNT, PARAM_HOST_MODEL_UPDATE).await?;
        u.finish().await?;
        Ok(updates)
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        updates: Self::Request,
    ) -> ProtocolResult<Self::Response> {
        Ok(ctx.host()?.apply_host_updates(updates).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        results: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        fields::write_object_list(
            &mut m,
            RETURN_UPDATE_RESULT_COUNT,
            RETURN_APPLY_HOST_UPDATE,
            &results,
        )
        .await?;
        m.finish().await
    }
}

/// Server updates, optionally rolled back as a unit
#[derive(Debug, Default)]
pub struct UpdateServerModel;

#[derive(Debug)]
pub struct ServerModelUpdates {
    pub server_name: String,
    pub allow_rollback: bool,
    pub updates: Vec<ServerModelUpdate>,
}

#[async_trait]
impl Operation for UpdateServerModel {
    type Request = ServerModelUpdates;
    type Response = Vec<ServerUpdateResult>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_SERVER_MODEL_REQUEST;
    const RESPONSE: u8 = op::UPDATE_SERVER_MODEL_RESPONSE;
    const NAME: &'static str = "UPDATE_SERVER_MODEL";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ServerModelUpdates> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        u.expect_header(PARAM_SERVER_NAME).await?;
        let server_name = u.read_utf().await?;
        u.expect_header(PARAM_ALLOW_ROLLBACK).await?;
        let allow_rollback = u.read_bool().await?;
        let updates =
            fields::read_object_list(&mut u, PARAM_UPDATE_COUNT, PARAM_SERVER_MODEL_UPDATE).await?;
        u.finish().await?;
        Ok(ServerModelUpdates {
            server_name,
            allow_rollback,
            updates,
        })
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        request: ServerModelUpdates,
    ) -> ProtocolResult<Self::Response> {
        Ok(ctx
            .host()?
            .apply_server_updates(&request.server_name, request.updates, request.allow_rollback)
            .await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        results: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        fields::write_server_results(&mut m, &results).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct GetServerList;

#[async_trait]
impl Operation for GetServerList {
    type Request = ();
    type Response = BTreeMap<ServerIdentity, ServerStatus>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::GET_SERVER_LIST_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_LIST_RESPONSE;
    const NAME: &'static str = "GET_SERVER_LIST";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<()> {
        read_no_params(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, _: ()) -> ProtocolResult<Self::Response> {
        Ok(ctx.host()?.server_statuses().await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        statuses: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        fields::write_server_statuses(&mut m, RETURN_SERVER_COUNT, &statuses).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct StartServer;

#[async_trait]
impl Operation for StartServer {
    type Request = String;
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::START_SERVER_REQUEST;
    const RESPONSE: u8 = op::START_SERVER_RESPONSE;
    const NAME: &'static str = "START_SERVER";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<String> {
        read_server_name(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, name: String) -> ProtocolResult<ServerStatus> {
        Ok(ctx.host()?.start_server(&name).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        status: ServerStatus,
    ) -> ProtocolResult<()> {
        write_status(ctx, output, status).await
    }
}

#[derive(Debug, Default)]
pub struct StopServer;

#[async_trait]
impl Operation for StopServer {
    type Request = (String, i64);
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::STOP_SERVER_REQUEST;
    const RESPONSE: u8 = op::STOP_SERVER_RESPONSE;
    const NAME: &'static str = "STOP_SERVER";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<(String, i64)> {
        read_server_and_timeout(ctx, input).await
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (name, timeout): (String, i64),
    ) -> ProtocolResult<ServerStatus> {
        Ok(ctx.host()?.stop_server(&name, timeout).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        status: ServerStatus,
    ) -> ProtocolResult<()> {
        write_status(ctx, output, status).await
    }
}

#[derive(Debug, Default)]
pub struct RestartServer;

#[async_trait]
impl Operation for RestartServer {
    type Request = (String, i64);
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::RESTART_SERVER_REQUEST;
    const RESPONSE: u8 = op::RESTART_SERVER_RESPONSE;
    const NAME: &'static str = "RESTART_SERVER";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<(String, i64)> {
        read_server_and_timeout(ctx, input).await
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (name, timeout): (String, i64),
    ) -> ProtocolResult<ServerStatus> {
        Ok(ctx.host()?.restart_server(&name, timeout).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        status: ServerStatus,
    ) -> ProtocolResult<()> {
        write_status(ctx, output, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Dispatcher;
    use crate::protocol::envelope::{read_response_end, read_response_header, write_request_header};
    use crate::protocol::ProtocolError;
    use crate::repository::InMemoryHostController;
    use std::sync::Arc;

    async fn context_with_host() -> (ServerContext, Arc<InMemoryHostController>) {
        let host = Arc::new(InMemoryHostController::new("host-a"));
        host.add_server("one", "main").await;
        host.add_server("two", "main").await;
        (ServerContext::detached().with_host(host.clone()), host)
    }

    async fn context() -> ServerContext {
        context_with_host().await.0
    }

    async fn serve(ctx: &ServerContext, request: &[u8]) -> Vec<u8> {
        let mut input = request;
        let mut output = Vec::new();
        assert!(Dispatcher::standard()
            .dispatch(ctx, &mut input, &mut output)
            .await
            .unwrap());
        output
    }

    #[tokio::test]
    async fn test_is_active() {
        let ctx = context().await;
        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::ServerManager, op::IS_ACTIVE_REQUEST)
            .await
            .unwrap();
        Marshaller::start(&mut request, &ctx.codec)
            .await
            .unwrap()
            .finish()
            .await
            .unwrap();

        let response = serve(&ctx, &request).await;
        let mut cursor = &response[..];
        read_response_header(&mut cursor, op::IS_ACTIVE_RESPONSE).await.unwrap();
        let mut u = Unmarshaller::start(&mut cursor, &ctx.codec).await.unwrap();
        u.expect_header(RETURN_ACTIVE).await.unwrap();
        assert!(u.read_bool().await.unwrap());
        u.finish().await.unwrap();
        read_response_end(&mut cursor).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_updates_with_rollback() {
        let ctx = context().await;
        let updates = vec![
            ServerModelUpdate::new("deploy", &["deployment", "a.war"]),
            ServerModelUpdate::new("fail", &[]),
            ServerModelUpdate::new("deploy", &["deployment", "b.war"]),
        ];

        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::ServerManager, op::UPDATE_SERVER_MODEL_REQUEST)
            .await
            .unwrap();
        let mut m = Marshaller::start(&mut request, &ctx.codec).await.unwrap();
        m.write_byte(PARAM_SERVER_NAME).await.unwrap();
        m.write_utf("one").await.unwrap();
        m.write_byte(PARAM_ALLOW_ROLLBACK).await.unwrap();
        m.write_bool(true).await.unwrap();
        fields::write_object_list(&mut m, PARAM_UPDATE_COUNT, PARAM_SERVER_MODEL_UPDATE, &updates)
            .await
            .unwrap();
        m.finish().await.unwrap();

        let response = serve(&ctx, &request).await;
        let mut cursor = &response[..];
        read_response_header(&mut cursor, op::UPDATE_SERVER_MODEL_RESPONSE)
            .await
            .unwrap();
        let mut u = Unmarshaller::start(&mut cursor, &ctx.codec).await.unwrap();
        let results = fields::read_server_results(&mut u).await.unwrap();
        u.finish().await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ServerUpdateResult::Cancelled);
        assert!(matches!(results[1], ServerUpdateResult::Failed(_)));
        assert_eq!(results[2], ServerUpdateResult::Cancelled);
    }

    #[tokio::test]
    async fn test_update_domain_model() {
        let (ctx, host) = context_with_host().await;
        let updates = vec![
            DomainModelUpdate::new("add-deployment", &["deployment", "a.war"]).with_value("00ff"),
            DomainModelUpdate::new("fail", &[]),
            DomainModelUpdate::new("write-attribute", &["system-property", "jvm"]).with_value("big"),
        ];

        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::ServerManager, op::UPDATE_DOMAIN_MODEL_REQUEST)
            .await
            .unwrap();
        let mut m = Marshaller::start(&mut request, &ctx.codec).await.unwrap();
        fields::write_object_list(&mut m, PARAM_UPDATE_COUNT, PARAM_DOMAIN_MODEL_UPDATE, &updates)
            .await
            .unwrap();
        m.finish().await.unwrap();

        let response = serve(&ctx, &request).await;
        let mut cursor = &response[..];
        read_response_header(&mut cursor, op::UPDATE_DOMAIN_MODEL_RESPONSE)
            .await
            .unwrap();
        let mut u = Unmarshaller::start(&mut cursor, &ctx.codec).await.unwrap();
        let responses = fields::read_applier_responses(&mut u, RETURN_APPLY_UPDATE)
            .await
            .unwrap();
        u.finish().await.unwrap();
        read_response_end(&mut cursor).await.unwrap();

        assert_eq!(responses.len(), 3);
        assert!(responses[0].domain_failure.is_none());
        assert!(responses[0].servers.is_empty());
        assert!(responses[1].domain_failure.is_some());
        assert_eq!(
            responses[2].servers,
            vec![
                ServerIdentity::new("host-a", "main", "one"),
                ServerIdentity::new("host-a", "main", "two"),
            ]
        );

        let copy = host.domain_copy().await;
        assert_eq!(copy.revision, 2);
        assert!(copy.deployments.contains_key("a.war"));
    }

    #[tokio::test]
    async fn test_get_server_list() {
        let ctx = context().await;
        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::ServerManager, op::GET_SERVER_LIST_REQUEST)
            .await
            .unwrap();
        Marshaller::start(&mut request, &ctx.codec)
            .await
            .unwrap()
            .finish()
            .await
            .unwrap();

        let response = serve(&ctx, &request).await;
        let mut cursor = &response[..];
        read_response_header(&mut cursor, op::GET_SERVER_LIST_RESPONSE)
            .await
            .unwrap();
        let mut u = Unmarshaller::start(&mut cursor, &ctx.codec).await.unwrap();
        let statuses = fields::read_server_statuses(&mut u, RETURN_SERVER_COUNT)
            .await
            .unwrap();
        u.finish().await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(
            statuses.get(&ServerIdentity::new("host-a", "main", "one")),
            Some(&ServerStatus::Stopped)
        );
    }

    #[tokio::test]
    async fn test_without_host_controller() {
        let ctx = ServerContext::detached();
        let mut request = Vec::new();
        write_request_header(&mut request, HandlerId::ServerManager, op::START_SERVER_REQUEST)
            .await
            .unwrap();
        let mut m = Marshaller::start(&mut request, &ctx.codec).await.unwrap();
        m.write_byte(PARAM_SERVER_NAME).await.unwrap();
        m.write_utf("one").await.unwrap();
        m.finish().await.unwrap();

        let mut input = &request[..];
        let mut output = Vec::new();
        let err = Dispatcher::standard()
            .dispatch(&ctx, &mut input, &mut output)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::CollaboratorUnavailable("host controller")));
        assert!(output.is_empty());
    }
}

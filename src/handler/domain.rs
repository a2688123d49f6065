//! Operations served by the domain controller
//!
//! Requests come from domain clients and from host controllers. All bodies
//! are codec framed except ADD_DEPLOYMENT_CONTENT and
//! CHECK_UNIQUE_DEPLOYMENT_NAME, which use raw marker framing around the
//! chunked content.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{OpcodeTable, Operation, ServerContext};
use crate::protocol::chunked::ChunkedReader;
use crate::protocol::codec::expect_header;
use crate::protocol::fields;
use crate::protocol::opcodes::domain_controller as op;
use crate::protocol::opcodes::params::*;
use crate::protocol::opcodes::returns::*;
use crate::protocol::opcodes::HandlerId;
use crate::protocol::streamed::{streamed_channel, write_streamed_responses, StreamedResponseReceiver};
use crate::protocol::{
    ContentHash, DeploymentPlan, DomainModel, DomainModelUpdate, DomainUpdateApplierResponse,
    DomainUpdateResult, HostModel, HostModelUpdate, HostUpdateResult, Marshaller,
    ProtocolResult, ServerIdentity, ServerModel, ServerModelUpdate, ServerStatus,
    ServerUpdateResult, Unmarshaller,
};

/// Opcode table for the domain-controller family
pub fn table() -> OpcodeTable {
    let mut table = OpcodeTable::new(HandlerId::DomainController);
    table
        .register::<GetDomain>()
        .register::<ApplyUpdates>()
        .register::<ApplyUpdate>()
        .register::<ExecuteDeploymentPlan>()
        .register::<AddDeploymentContent>()
        .register::<CheckUniqueDeploymentName>()
        .register::<ApplyServerModelUpdate>()
        .register::<ApplyHostUpdates>()
        .register::<GetHostModel>()
        .register::<GetHostControllerNames>()
        .register::<GetServerStatuses>()
        .register::<GetServerModel>()
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

/// `PARAM_HOST_NAME utf, PARAM_SERVER_NAME utf`
async fn read_host_and_server<R>(u: &mut Unmarshaller<'_, R>) -> ProtocolResult<(String, String)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    u.expect_header(PARAM_HOST_NAME).await?;
    let host = u.read_utf().await?;
    u.expect_header(PARAM_SERVER_NAME).await?;
    let server = u.read_utf().await?;
    Ok((host, server))
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
pub struct GetDomain;

#[async_trait]
impl Operation for GetDomain {
    type Request = ();
    type Response = DomainModel;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_DOMAIN_REQUEST;
    const RESPONSE: u8 = op::GET_DOMAIN_RESPONSE;
    const NAME: &'static str = "GET_DOMAIN";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<()> {
        read_no_params(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, _: ()) -> ProtocolResult<DomainModel> {
        Ok(ctx.domain()?.domain_model().await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        model: DomainModel,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_DOMAIN_MODEL).await?;
        m.write_object(&model).await?;
        m.finish().await
    }
}

/// Batched updates; one result per update, in request order
#[derive(Debug, Default)]
pub struct ApplyUpdates;

#[async_trait]
impl Operation for ApplyUpdates {
    type Request = Vec<DomainModelUpdate>;
    type Response = Vec<DomainUpdateResult>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_UPDATES_REQUEST;
    const RESPONSE: u8 = op::APPLY_UPDATES_RESPONSE;
    const NAME: &'static str = "APPLY_UPDATES";

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
        let domain = ctx.domain()?;
        tracing::info!("Received {} domain updates", updates.len());
        let mut results = Vec::with_capacity(updates.len());
        for update in updates {
            results.push(domain.apply_update(update).await);
        }
        Ok(results)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        results: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        fields::write_object_list(&mut m, RETURN_UPDATE_RESULT_COUNT, RETURN_APPLY_UPDATE, &results)
            .await?;
        m.finish().await
    }
}

/// Single update applied to the domain model only
#[derive(Debug, Default)]
pub struct ApplyUpdate;

#[async_trait]
impl Operation for ApplyUpdate {
    type Request = DomainModelUpdate;
    type Response = DomainUpdateApplierResponse;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_UPDATE_REQUEST;
    const RESPONSE: u8 = op::APPLY_UPDATE_RESPONSE;
    const NAME: &'static str = "APPLY_UPDATE";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        u.expect_header(PARAM_DOMAIN_MODEL_UPDATE).await?;
        let update = u.read_object().await?;
        u.finish().await?;
        Ok(update)
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        update: Self::Request,
    ) -> ProtocolResult<Self::Response> {
        Ok(ctx.domain()?.apply_update_to_model(update).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        response: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        fields::write_applier_response(&mut m, &response).await?;
        m.finish().await
    }
}

/// Plan execution; the response is streamed as the executor makes progress
#[derive(Debug, Default)]
pub struct ExecuteDeploymentPlan;

#[async_trait]
impl Operation for ExecuteDeploymentPlan {
    type Request = DeploymentPlan;
    type Response = StreamedResponseReceiver;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::EXECUTE_DEPLOYMENT_PLAN_REQUEST;
    const RESPONSE: u8 = op::EXECUTE_DEPLOYMENT_PLAN_RESPONSE;
    const NAME: &'static str = "EXECUTE_DEPLOYMENT_PLAN";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        u.expect_header(PARAM_DEPLOYMENT_PLAN).await?;
        let plan = u.read_object().await?;
        u.finish().await?;
        Ok(plan)
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        plan: Self::Request,
    ) -> ProtocolResult<Self::Response> {
        let domain = ctx.domain()?;
        let (sender, receiver) = streamed_channel(ctx.stream_queue_capacity);
        domain.execute_deployment_plan(plan, sender).await;
        Ok(receiver)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        mut receiver: Self::Response,
    ) -> ProtocolResult<()> {
        let mut shutdown = ctx.shutdown.clone();
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        let written = write_streamed_responses(&mut m, &mut receiver, &mut shutdown).await?;
        tracing::debug!("Streamed {} deployment plan items", written);
        m.finish().await
    }
}

/// Store deployment content streamed in chunks
///
/// The content is handed to the repository while the request is being
/// read, so the whole artifact is never held in memory.
#[derive(Debug, Default)]
pub struct AddDeploymentContent;

#[async_trait]
impl Operation for AddDeploymentContent {
    type Request = ContentHash;
    type Response = ContentHash;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::ADD_DEPLOYMENT_CONTENT_REQUEST;
    const RESPONSE: u8 = op::ADD_DEPLOYMENT_CONTENT_RESPONSE;
    const NAME: &'static str = "ADD_DEPLOYMENT_CONTENT";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let content = ctx.content()?;
        let name = fields::read_raw_utf(&mut *input, PARAM_DEPLOYMENT_NAME).await?;
        let runtime_name = fields::read_raw_utf(&mut *input, PARAM_DEPLOYMENT_RUNTIME_NAME).await?;
        expect_header(&mut *input, PARAM_DEPLOYMENT_CONTENT).await?;

        let mut chunked = ChunkedReader::new(&mut *input);
        let hash = content
            .add_deployment_content(&name, &runtime_name, &mut chunked)
            .await?;
        // the repository may stop early; the framing must still be consumed
        chunked.close().await?;
        tracing::info!(
            "Received deployment content {} in {} chunks",
            name,
            chunked.chunks_read()
        );
        Ok(hash)
    }

    async fn compute(&self, _: &ServerContext, hash: ContentHash) -> ProtocolResult<ContentHash> {
        Ok(hash)
    }

    async fn write_response(
        &self,
        _: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        hash: ContentHash,
    ) -> ProtocolResult<()> {
        fields::write_deployment_hash(output, &hash).await
    }
}

#[derive(Debug, Default)]
pub struct CheckUniqueDeploymentName;

#[async_trait]
impl Operation for CheckUniqueDeploymentName {
    type Request = String;
    type Response = bool;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::CHECK_UNIQUE_DEPLOYMENT_NAME_REQUEST;
    const RESPONSE: u8 = op::CHECK_UNIQUE_DEPLOYMENT_NAME_RESPONSE;
    const NAME: &'static str = "CHECK_UNIQUE_DEPLOYMENT_NAME";

    async fn read_request(
        &self,
        _: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<String> {
        fields::read_raw_utf(input, PARAM_DEPLOYMENT_NAME).await
    }

    async fn compute(&self, ctx: &ServerContext, name: String) -> ProtocolResult<bool> {
        Ok(ctx.domain()?.is_deployment_name_unique(&name).await)
    }

    async fn write_response(
        &self,
        _: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        unique: bool,
    ) -> ProtocolResult<()> {
        output.write_u8(RETURN_DEPLOYMENT_NAME_UNIQUE).await?;
        output.write_u8(unique as u8).await?;
        output.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ApplyServerModelUpdate;

#[async_trait]
impl Operation for ApplyServerModelUpdate {
    type Request = (ServerIdentity, ServerModelUpdate);
    type Response = ServerUpdateResult;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_SERVER_MODEL_UPDATE_REQUEST;
    const RESPONSE: u8 = op::APPLY_SERVER_MODEL_UPDATE_RESPONSE;
    const NAME: &'static str = "APPLY_SERVER_MODEL_UPDATE";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        u.expect_header(PARAM_HOST_NAME).await?;
        let host = u.read_utf().await?;
        u.expect_header(PARAM_SERVER_GROUP_NAME).await?;
        let group = u.read_utf().await?;
        u.expect_header(PARAM_SERVER_NAME).await?;
        let server = u.read_utf().await?;
        u.expect_header(PARAM_SERVER_MODEL_UPDATE).await?;
        let update = u.read_object().await?;
        u.finish().await?;
        Ok((ServerIdentity::new(&host, &group, &server), update))
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (server, update): Self::Request,
    ) -> ProtocolResult<Self::Response> {
        let mut results = ctx
            .domain()?
            .apply_updates_to_server(&server, vec![update], false)
            .await;
        Ok(results.pop().unwrap_or(ServerUpdateResult::Cancelled))
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        result: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_APPLY_SERVER_MODEL_UPDATE).await?;
        fields::write_server_result(&mut m, &result).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct ApplyHostUpdates;

#[async_trait]
impl Operation for ApplyHostUpdates {
    type Request = (String, Vec<HostModelUpdate>);
    type Response = Vec<HostUpdateResult>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_HOST_UPDATES_REQUEST;
    const RESPONSE: u8 = op::APPLY_HOST_UPDATES_RESPONSE;
    const NAME: &'static str = "APPLY_HOST_UPDATES";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        u.expect_header(PARAM_HOST_NAME).await?;
        let host = u.read_utf().await?;
        let updates =
            fields::read_object_list(&mut u, PARAM_UPDATE_COUNT, PARAM_HOST_MODEL_UPDATE).await?;
        u.finish().await?;
        Ok((host, updates))
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (host, updates): Self::Request,
    ) -> ProtocolResult<Self::Response> {
        tracing::info!("Received {} host updates for {}", updates.len(), host);
        Ok(ctx.domain()?.apply_host_updates(&host, updates).await)
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

#[derive(Debug, Default)]
pub struct GetHostModel;

#[async_trait]
impl Operation for GetHostModel {
    type Request = String;
    type Response = Option<HostModel>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_HOST_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_HOST_MODEL_RESPONSE;
    const NAME: &'static str = "GET_HOST_MODEL";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<String> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        u.expect_header(PARAM_HOST_NAME).await?;
        let host = u.read_utf().await?;
        u.finish().await?;
        Ok(host)
    }

    async fn compute(&self, ctx: &ServerContext, host: String) -> ProtocolResult<Option<HostModel>> {
        Ok(ctx.domain()?.host_model(&host).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        model: Option<HostModel>,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_HOST_MODEL).await?;
        m.write_optional_object(model.as_ref()).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct GetHostControllerNames;

#[async_trait]
impl Operation for GetHostControllerNames {
    type Request = ();
    type Response = Vec<String>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_HOST_CONTROLLER_NAMES_REQUEST;
    const RESPONSE: u8 = op::GET_HOST_CONTROLLER_NAMES_RESPONSE;
    const NAME: &'static str = "GET_HOST_CONTROLLER_NAMES";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<()> {
        read_no_params(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, _: ()) -> ProtocolResult<Vec<String>> {
        Ok(ctx.domain()?.host_controller_names().await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        names: Vec<String>,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_HOST_CONTROLLER_COUNT).await?;
        m.write_count(names.len()).await?;
        for name in &names {
            m.write_byte(RETURN_HOST_NAME).await?;
            m.write_utf(name).await?;
        }
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct GetServerStatuses;

#[async_trait]
impl Operation for GetServerStatuses {
    type Request = ();
    type Response = BTreeMap<ServerIdentity, ServerStatus>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_SERVER_STATUSES_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_STATUSES_RESPONSE;
    const NAME: &'static str = "GET_SERVER_STATUSES";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<()> {
        read_no_params(ctx, input).await
    }

    async fn compute(&self, ctx: &ServerContext, _: ()) -> ProtocolResult<Self::Response> {
        Ok(ctx.domain()?.server_statuses().await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        statuses: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        fields::write_server_statuses(&mut m, RETURN_SERVER_STATUS_COUNT, &statuses).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct GetServerModel;

#[async_trait]
impl Operation for GetServerModel {
    type Request = (String, String);
    type Response = Option<ServerModel>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_SERVER_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_MODEL_RESPONSE;
    const NAME: &'static str = "GET_SERVER_MODEL";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        let names = read_host_and_server(&mut u).await?;
        u.finish().await?;
        Ok(names)
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (host, server): Self::Request,
    ) -> ProtocolResult<Self::Response> {
        Ok(ctx.domain()?.server_model(&host, &server).await)
    }

    async fn write_response(
        &self,
        ctx: &ServerContext,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        model: Self::Response,
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &ctx.codec).await?;
        m.write_byte(RETURN_SERVER_MODEL).await?;
        m.write_optional_object(model.as_ref()).await?;
        m.finish().await
    }
}

#[derive(Debug, Default)]
pub struct StartServer;

#[async_trait]
impl Operation for StartServer {
    type Request = (String, String);
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::START_SERVER_REQUEST;
    const RESPONSE: u8 = op::START_SERVER_RESPONSE;
    const NAME: &'static str = "START_SERVER";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        let mut u = Unmarshaller::start(input, &ctx.codec).await?;
        let names = read_host_and_server(&mut u).await?;
        u.finish().await?;
        Ok(names)
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (host, server): Self::Request,
    ) -> ProtocolResult<ServerStatus> {
        Ok(ctx.domain()?.start_server(&host, &server).await)
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

/// `host, server, PARAM_GRACEFUL_TIMEOUT long`
async fn read_stop_request(
    ctx: &ServerContext,
    input: &mut (dyn AsyncRead + Unpin + Send),
) -> ProtocolResult<(String, String, i64)> {
    let mut u = Unmarshaller::start(input, &ctx.codec).await?;
    let (host, server) = read_host_and_server(&mut u).await?;
    u.expect_header(PARAM_GRACEFUL_TIMEOUT).await?;
    let timeout = u.read_long().await?;
    u.finish().await?;
    Ok((host, server, timeout))
}

#[derive(Debug, Default)]
pub struct StopServer;

#[async_trait]
impl Operation for StopServer {
    type Request = (String, String, i64);
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::STOP_SERVER_REQUEST;
    const RESPONSE: u8 = op::STOP_SERVER_RESPONSE;
    const NAME: &'static str = "STOP_SERVER";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        read_stop_request(ctx, input).await
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (host, server, timeout): Self::Request,
    ) -> ProtocolResult<ServerStatus> {
        Ok(ctx.domain()?.stop_server(&host, &server, timeout).await)
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
    type Request = (String, String, i64);
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::RESTART_SERVER_REQUEST;
    const RESPONSE: u8 = op::RESTART_SERVER_RESPONSE;
    const NAME: &'static str = "RESTART_SERVER";

    async fn read_request(
        &self,
        ctx: &ServerContext,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Request> {
        read_stop_request(ctx, input).await
    }

    async fn compute(
        &self,
        ctx: &ServerContext,
        (host, server, timeout): Self::Request,
    ) -> ProtocolResult<ServerStatus> {
        Ok(ctx.domain()?.restart_server(&host, &server, timeout).await)
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

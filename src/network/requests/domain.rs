//! Requests sent to a domain controller

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{check_count, send_empty};
use crate::network::{ManagementClient, ManagementRequest, ManagementResult, RequestSettings};
use crate::protocol::chunked::ChunkedWriter;
use crate::protocol::codec::expect_header;
use crate::protocol::fields;
use crate::protocol::opcodes::domain_controller as op;
use crate::protocol::opcodes::params::*;
use crate::protocol::opcodes::returns::*;
use crate::protocol::opcodes::HandlerId;
use crate::protocol::streamed::{read_streamed_responses, StreamedResponse};
use crate::protocol::{
    ContentHash, DeploymentPlan, DomainModel, DomainModelUpdate, DomainUpdateApplierResponse,
    DomainUpdateResult, HostModel, HostModelUpdate, HostUpdateResult, Marshaller, ProtocolResult,
    ServerIdentity, ServerModel, ServerModelUpdate, ServerStatus, ServerUpdateResult, Unmarshaller,
};

#[derive(Debug, Default)]
pub struct GetDomainRequest;

#[async_trait]
impl ManagementRequest for GetDomainRequest {
    type Response = DomainModel;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_DOMAIN_REQUEST;
    const RESPONSE: u8 = op::GET_DOMAIN_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        send_empty(settings, output).await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<DomainModel> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        u.expect_header(RETURN_DOMAIN_MODEL).await?;
        let model = u.read_object().await?;
        u.finish().await?;
        Ok(model)
    }
}

/// Batched domain updates; the response must answer every update
#[derive(Debug)]
pub struct ApplyUpdatesRequest {
    pub updates: Vec<DomainModelUpdate>,
}

#[async_trait]
impl ManagementRequest for ApplyUpdatesRequest {
    type Response = Vec<DomainUpdateResult>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_UPDATES_REQUEST;
    const RESPONSE: u8 = op::APPLY_UPDATES_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        fields::write_object_list(&mut m, PARAM_UPDATE_COUNT, PARAM_DOMAIN_MODEL_UPDATE, &self.updates)
            .await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Response> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        let results: Vec<DomainUpdateResult> =
            fields::read_object_list(&mut u, RETURN_UPDATE_RESULT_COUNT, RETURN_APPLY_UPDATE).await?;
        u.finish().await?;
        check_count(self.updates.len(), results.len())?;
        Ok(results)
    }
}

#[derive(Debug)]
pub struct ApplyUpdateRequest {
    pub update: DomainModelUpdate,
}

#[async_trait]
impl ManagementRequest for ApplyUpdateRequest {
    type Response = DomainUpdateApplierResponse;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_UPDATE_REQUEST;
    const RESPONSE: u8 = op::APPLY_UPDATE_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        m.write_byte(PARAM_DOMAIN_MODEL_UPDATE).await?;
        m.write_object(&self.update).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Response> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        let response = fields::read_applier_response(&mut u).await?;
        u.finish().await?;
        Ok(response)
    }
}

/// Plan execution; collects streamed items until the end of the frame
#[derive(Debug)]
pub struct ExecuteDeploymentPlanRequest {
    pub plan: DeploymentPlan,
}

#[async_trait]
impl ManagementRequest for ExecuteDeploymentPlanRequest {
    type Response = Vec<StreamedResponse>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::EXECUTE_DEPLOYMENT_PLAN_REQUEST;
    const RESPONSE: u8 = op::EXECUTE_DEPLOYMENT_PLAN_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        m.write_byte(PARAM_DEPLOYMENT_PLAN).await?;
        m.write_object(&self.plan).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Response> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        let items = read_streamed_responses(&mut u).await?;
        u.finish().await?;
        Ok(items)
    }
}

/// Upload deployment bytes from `content` in chunks
pub struct AddDeploymentContentRequest<S> {
    pub name: String,
    pub runtime_name: String,
    pub content: S,
}

#[async_trait]
impl<S> ManagementRequest for AddDeploymentContentRequest<S>
where
    S: AsyncRead + Unpin + Send,
{
    type Response = ContentHash;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::ADD_DEPLOYMENT_CONTENT_REQUEST;
    const RESPONSE: u8 = op::ADD_DEPLOYMENT_CONTENT_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        fields::write_raw_utf(&mut *output, PARAM_DEPLOYMENT_NAME, &self.name).await?;
        fields::write_raw_utf(&mut *output, PARAM_DEPLOYMENT_RUNTIME_NAME, &self.runtime_name)
            .await?;
        output.write_u8(PARAM_DEPLOYMENT_CONTENT).await?;

        let mut writer = ChunkedWriter::new(&mut *output, settings.chunk_size);
        writer.copy_from(&mut self.content).await?;
        let total = writer.finish().await?;
        tracing::debug!("Sent {} bytes of deployment content for {}", total, self.name);
        output.flush().await?;
        Ok(())
    }

    async fn receive_response(
        &mut self,
        _: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ContentHash> {
        fields::read_deployment_hash(input).await
    }
}

#[derive(Debug)]
pub struct CheckUniqueDeploymentNameRequest {
    pub name: String,
}

#[async_trait]
impl ManagementRequest for CheckUniqueDeploymentNameRequest {
    type Response = bool;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::CHECK_UNIQUE_DEPLOYMENT_NAME_REQUEST;
    const RESPONSE: u8 = op::CHECK_UNIQUE_DEPLOYMENT_NAME_RESPONSE;

    async fn send_request(
        &mut self,
        _: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        fields::write_raw_utf(output, PARAM_DEPLOYMENT_NAME, &self.name).await
    }

    async fn receive_response(
        &mut self,
        _: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<bool> {
        expect_header(&mut *input, RETURN_DEPLOYMENT_NAME_UNIQUE).await?;
        Ok(input.read_u8().await? != 0)
    }
}

#[derive(Debug)]
pub struct ApplyServerModelUpdateRequest {
    pub server: ServerIdentity,
    pub update: ServerModelUpdate,
}

#[async_trait]
impl ManagementRequest for ApplyServerModelUpdateRequest {
    type Response = ServerUpdateResult;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_SERVER_MODEL_UPDATE_REQUEST;
    const RESPONSE: u8 = op::APPLY_SERVER_MODEL_UPDATE_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        m.write_byte(PARAM_HOST_NAME).await?;
        m.write_utf(&self.server.host_name).await?;
        m.write_byte(PARAM_SERVER_GROUP_NAME).await?;
        m.write_utf(&self.server.server_group_name).await?;
        m.write_byte(PARAM_SERVER_NAME).await?;
        m.write_utf(&self.server.server_name).await?;
        m.write_byte(PARAM_SERVER_MODEL_UPDATE).await?;
        m.write_object(&self.update).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ServerUpdateResult> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        u.expect_header(RETURN_APPLY_SERVER_MODEL_UPDATE).await?;
        let result = fields::read_server_result(&mut u).await?;
        u.finish().await?;
        Ok(result)
    }
}

#[derive(Debug)]
pub struct ApplyHostUpdatesRequest {
    pub host_name: String,
    pub updates: Vec<HostModelUpdate>,
}

#[async_trait]
impl ManagementRequest for ApplyHostUpdatesRequest {
    type Response = Vec<HostUpdateResult>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::APPLY_HOST_UPDATES_REQUEST;
    const RESPONSE: u8 = op::APPLY_HOST_UPDATES_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        m.write_byte(PARAM_HOST_NAME).await?;
        m.write_utf(&self.host_name).await?;
        fields::write_object_list(&mut m, PARAM_UPDATE_COUNT, PARAM_HOST_MODEL_UPDATE, &self.updates)
            .await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Response> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        let results: Vec<HostUpdateResult> =
            fields::read_object_list(&mut u, RETURN_UPDATE_RESULT_COUNT, RETURN_APPLY_HOST_UPDATE)
                .await?;
        u.finish().await?;
        check_count(self.updates.len(), results.len())?;
        Ok(results)
    }
}

#[derive(Debug)]
pub struct GetHostModelRequest {
    pub host_name: String,
}

#[async_trait]
impl ManagementRequest for GetHostModelRequest {
    type Response = Option<HostModel>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_HOST_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_HOST_MODEL_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        m.write_byte(PARAM_HOST_NAME).await?;
        m.write_utf(&self.host_name).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Option<HostModel>> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        u.expect_header(RETURN_HOST_MODEL).await?;
        let model = u.read_optional_object().await?;
        u.finish().await?;
        Ok(model)
    }
}

#[derive(Debug, Default)]
pub struct GetHostControllerNamesRequest;

#[async_trait]
impl ManagementRequest for GetHostControllerNamesRequest {
    type Response = Vec<String>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_HOST_CONTROLLER_NAMES_REQUEST;
    const RESPONSE: u8 = op::GET_HOST_CONTROLLER_NAMES_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        send_empty(settings, output).await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Vec<String>> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        u.expect_header(RETURN_HOST_CONTROLLER_COUNT).await?;
        let count = u.read_count().await?;
        let mut names = Vec::new();
        for _ in 0..count {
            u.expect_header(RETURN_HOST_NAME).await?;
            names.push(u.read_utf().await?);
        }
        u.finish().await?;
        Ok(names)
    }
}

#[derive(Debug, Default)]
pub struct GetServerStatusesRequest;

#[async_trait]
impl ManagementRequest for GetServerStatusesRequest {
    type Response = BTreeMap<ServerIdentity, ServerStatus>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_SERVER_STATUSES_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_STATUSES_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        send_empty(settings, output).await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Response> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        let statuses = fields::read_server_statuses(&mut u, RETURN_SERVER_STATUS_COUNT).await?;
        u.finish().await?;
        Ok(statuses)
    }
}

/// `host, server` addressing shared by the server queries and lifecycle requests
#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub host_name: String,
    pub server_name: String,
}

impl ServerAddress {
    pub fn new(host_name: &str, server_name: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            server_name: server_name.to_string(),
        }
    }

    async fn write<W>(&self, m: &mut Marshaller<'_, W>) -> ProtocolResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        m.write_byte(PARAM_HOST_NAME).await?;
        m.write_utf(&self.host_name).await?;
        m.write_byte(PARAM_SERVER_NAME).await?;
        m.write_utf(&self.server_name).await
    }
}

async fn receive_status(
    settings: &RequestSettings,
    input: &mut (dyn AsyncRead + Unpin + Send),
) -> ProtocolResult<ServerStatus> {
    let mut u = Unmarshaller::start(input, &settings.codec).await?;
    u.expect_header(RETURN_SERVER_STATUS).await?;
    let status = u.read_object().await?;
    u.finish().await?;
    Ok(status)
}

#[derive(Debug)]
pub struct GetServerModelRequest {
    pub server: ServerAddress,
}

#[async_trait]
impl ManagementRequest for GetServerModelRequest {
    type Response = Option<ServerModel>;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::GET_SERVER_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_MODEL_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        self.server.write(&mut m).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Option<ServerModel>> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        u.expect_header(RETURN_SERVER_MODEL).await?;
        let model = u.read_optional_object().await?;
        u.finish().await?;
        Ok(model)
    }
}

#[derive(Debug)]
pub struct StartServerRequest {
    pub server: ServerAddress,
}

#[async_trait]
impl ManagementRequest for StartServerRequest {
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::START_SERVER_REQUEST;
    const RESPONSE: u8 = op::START_SERVER_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        self.server.write(&mut m).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ServerStatus> {
        receive_status(settings, input).await
    }
}

#[derive(Debug)]
pub struct StopServerRequest {
    pub server: ServerAddress,
    pub graceful_timeout: i64,
}

#[async_trait]
impl ManagementRequest for StopServerRequest {
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::STOP_SERVER_REQUEST;
    const RESPONSE: u8 = op::STOP_SERVER_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        self.server.write(&mut m).await?;
        m.write_byte(PARAM_GRACEFUL_TIMEOUT).await?;
        m.write_long(self.graceful_timeout).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ServerStatus> {
        receive_status(settings, input).await
    }
}

#[derive(Debug)]
pub struct RestartServerRequest {
    pub server: ServerAddress,
    pub graceful_timeout: i64,
}

#[async_trait]
impl ManagementRequest for RestartServerRequest {
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::DomainController;
    const REQUEST: u8 = op::RESTART_SERVER_REQUEST;
    const RESPONSE: u8 = op::RESTART_SERVER_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        self.server.write(&mut m).await?;
        m.write_byte(PARAM_GRACEFUL_TIMEOUT).await?;
        m.write_long(self.graceful_timeout).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ServerStatus> {
        receive_status(settings, input).await
    }
}

/// Domain controller operations over a [`ManagementClient`]
pub struct DomainClient {
    client: ManagementClient,
}

impl DomainClient {
    pub fn new(client: ManagementClient) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &ManagementClient {
        &self.client
    }

    pub async fn get_domain(&self) -> ManagementResult<DomainModel> {
        self.client.execute(GetDomainRequest).await
    }

    pub async fn apply_updates(
        &self,
        updates: Vec<DomainModelUpdate>,
    ) -> ManagementResult<Vec<DomainUpdateResult>> {
        self.client.execute(ApplyUpdatesRequest { updates }).await
    }

    pub async fn apply_update(
        &self,
        update: DomainModelUpdate,
    ) -> ManagementResult<DomainUpdateApplierResponse> {
        self.client.execute(ApplyUpdateRequest { update }).await
    }

    pub async fn execute_deployment_plan(
        &self,
        plan: DeploymentPlan,
    ) -> ManagementResult<Vec<StreamedResponse>> {
        self.client.execute(ExecuteDeploymentPlanRequest { plan }).await
    }

    pub async fn add_deployment_content<S>(
        &self,
        name: &str,
        runtime_name: &str,
        content: S,
    ) -> ManagementResult<ContentHash>
    where
        S: AsyncRead + Unpin + Send,
    {
        self.client
            .execute(AddDeploymentContentRequest {
                name: name.to_string(),
                runtime_name: runtime_name.to_string(),
                content,
            })
            .await
    }

    pub async fn is_deployment_name_unique(&self, name: &str) -> ManagementResult<bool> {
        self.client
            .execute(CheckUniqueDeploymentNameRequest {
                name: name.to_string(),
            })
            .await
    }

    pub async fn apply_server_model_update(
        &self,
        server: ServerIdentity,
        update: ServerModelUpdate,
    ) -> ManagementResult<ServerUpdateResult> {
        self.client
            .execute(ApplyServerModelUpdateRequest { server, update })
            .await
    }

    pub async fn apply_host_updates(
        &self,
        host_name: &str,
        updates: Vec<HostModelUpdate>,
    ) -> ManagementResult<Vec<HostUpdateResult>> {
        self.client
            .execute(ApplyHostUpdatesRequest {
                host_name: host_name.to_string(),
                updates,
            })
            .await
    }

    pub async fn host_model(&self, host_name: &str) -> ManagementResult<Option<HostModel>> {
        self.client
            .execute(GetHostModelRequest {
                host_name: host_name.to_string(),
            })
            .await
    }

    pub async fn host_controller_names(&self) -> ManagementResult<Vec<String>> {
        self.client.execute(GetHostControllerNamesRequest).await
    }

    pub async fn server_statuses(
        &self,
    ) -> ManagementResult<BTreeMap<ServerIdentity, ServerStatus>> {
        self.client.execute(GetServerStatusesRequest).await
    }

    pub async fn server_model(
        &self,
        host_name: &str,
        server_name: &str,
    ) -> ManagementResult<Option<ServerModel>> {
        let server = ServerAddress::new(host_name, server_name);
        self.client.execute(GetServerModelRequest { server }).await
    }

    pub async fn start_server(
        &self,
        host_name: &str,
        server_name: &str,
    ) -> ManagementResult<ServerStatus> {
        let server = ServerAddress::new(host_name, server_name);
        self.client.execute(StartServerRequest { server }).await
    }

    pub async fn stop_server(
        &self,
        host_name: &str,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ManagementResult<ServerStatus> {
        let server = ServerAddress::new(host_name, server_name);
        self.client
            .execute(StopServerRequest {
                server,
                graceful_timeout,
            })
            .await
    }

    pub async fn restart_server(
        &self,
        host_name: &str,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ManagementResult<ServerStatus> {
        let server = ServerAddress::new(host_name, server_name);
        self.client
            .execute(RestartServerRequest {
                server,
                graceful_timeout,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Dispatcher, ServerContext};
    use crate::network::{ConnectionStrategy, ManagementServer, NetworkConfig};
    use crate::protocol::opcodes::plan;
    use crate::protocol::{DeploymentAction, DeploymentActionKind, PlanEventValue};
    use crate::protocol::error_codes;
    use crate::repository::{
        content_hash_of, ContentRepository, InMemoryDomainController, InMemoryHostController,
        MemoryContentRepository,
    };
    use std::sync::Arc;

    struct Harness {
        server: ManagementServer,
        client: DomainClient,
        content: Arc<MemoryContentRepository>,
    }

    async fn harness(strategy: ConnectionStrategy) -> Harness {
        let content = Arc::new(MemoryContentRepository::new());
        let dc = InMemoryDomainController::new(Some(content.clone()));
        let host = Arc::new(InMemoryHostController::new("host-a"));
        host.add_server("server-one", "main").await;
        host.add_server("server-two", "main").await;
        dc.register_host(host).await;

        let context = ServerContext::detached()
            .with_domain(Arc::new(dc))
            .with_content(content.clone());
        let config = NetworkConfig::new(0).with_bind_address("127.0.0.1");
        let mut server = ManagementServer::new(config.clone(), Dispatcher::standard(), context);
        let addr = server.start().await.unwrap();

        let client = ManagementClient::new(addr, config).with_strategy(strategy);
        Harness {
            server,
            client: DomainClient::new(client),
            content,
        }
    }

    #[tokio::test]
    async fn test_batched_updates_over_tcp() {
        let mut h = harness(ConnectionStrategy::Establish).await;
        let updates = vec![
            DomainModelUpdate::new("write-attribute", &["profile", "db", "pool"]).with_value("10"),
            DomainModelUpdate::new("fail", &[]),
            DomainModelUpdate::new("add-deployment", &["deployment", "a.war"]).with_value("00ff"),
        ];

        let results = h.client.apply_updates(updates).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert_eq!(results[0].server_results.len(), 2);
        assert!(results[1].domain_failure.is_some());
        assert!(results[2].is_success());

        let model = h.client.get_domain().await.unwrap();
        assert_eq!(
            model.attributes.get("profile/db/pool").map(String::as_str),
            Some("10")
        );
        assert!(model.deployments.contains_key("a.war"));
        assert_eq!(model.revision, 2);
        h.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_update_over_tcp() {
        let mut h = harness(ConnectionStrategy::Reuse).await;
        let response = h
            .client
            .apply_update(DomainModelUpdate::new("write-attribute", &["a"]).with_value("b"))
            .await
            .unwrap();
        assert!(response.domain_failure.is_none());
        assert!(response.host_failures.is_empty());
        assert_eq!(
            response.servers,
            vec![
                ServerIdentity::new("host-a", "main", "server-one"),
                ServerIdentity::new("host-a", "main", "server-two"),
            ]
        );

        let response = h
            .client
            .apply_update(DomainModelUpdate::new("remove-deployment", &["deployment", "none.war"]))
            .await
            .unwrap();
        assert_eq!(
            response.domain_failure.map(|f| f.code),
            Some(error_codes::NOT_FOUND)
        );
        assert_eq!(h.client.get_domain().await.unwrap().revision, 1);
        h.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_host_updates_over_tcp() {
        let mut h = harness(ConnectionStrategy::Establish).await;
        let updates = vec![
            HostModelUpdate::new("write-attribute", &["interface", "public"]).with_value("10.0.0.1"),
            HostModelUpdate::new("fail", &[]),
        ];

        let results = h
            .client
            .apply_host_updates("host-a", updates.clone())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0],
            HostUpdateResult::Applied {
                servers: vec!["server-one".to_string(), "server-two".to_string()]
            }
        );
        assert!(matches!(&results[1], HostUpdateResult::Failed(f) if f.code == error_codes::UPDATE_REJECTED));

        let host = h.client.host_model("host-a").await.unwrap().unwrap();
        assert_eq!(
            host.attributes.get("interface/public").map(String::as_str),
            Some("10.0.0.1")
        );

        let results = h.client.apply_host_updates("nowhere", updates).await.unwrap();
        assert!(results
            .iter()
            .all(|r| matches!(r, HostUpdateResult::Failed(f) if f.code == error_codes::NOT_FOUND)));
        h.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_deployment_upload() {
        let mut h = harness(ConnectionStrategy::Establish).await;
        let data: Vec<u8> = (0..10 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();

        let hash = h
            .client
            .add_deployment_content("big.war", "big.war", &data[..])
            .await
            .unwrap();
        assert_eq!(hash, content_hash_of(&data));
        assert!(h.content.has_content(&hash).await);
        assert_eq!(h.content.get(&hash).await.unwrap().len(), data.len());
        assert!(h.client.is_deployment_name_unique("big.war").await.unwrap());
        h.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_plan_over_tcp() {
        let mut h = harness(ConnectionStrategy::Reuse).await;
        let hash = h
            .client
            .add_deployment_content("app.war", "app.war", &b"war bytes"[..])
            .await
            .unwrap();

        let plan = DeploymentPlan::new(vec![
            DeploymentAction::new(DeploymentActionKind::Add, "app.war").with_content(&hash.to_hex()),
            DeploymentAction::new(DeploymentActionKind::Deploy, "app.war"),
        ]);
        let plan_id = plan.id;
        let items = h.client.execute_deployment_plan(plan).await.unwrap();

        assert_eq!(items.first().map(|i| i.protocol_value), Some(plan::RETURN_DEPLOYMENT_PLAN_ID));
        assert_eq!(items[0].value, Some(PlanEventValue::Id(plan_id)));
        let last = items.last().unwrap();
        assert_eq!(last.protocol_value, plan::RETURN_DEPLOYMENT_PLAN_COMPLETE);
        assert!(last.is_last_in_stream);
        assert_eq!(
            items
                .iter()
                .filter(|i| i.protocol_value == plan::RETURN_SERVER_DEPLOYMENT_RESULT)
                .count(),
            2
        );

        assert!(h.client.inner().has_cached_connection().await);
        assert!(!h.client.is_deployment_name_unique("app.war").await.unwrap());
        let model = h.client.server_model("host-a", "server-one").await.unwrap().unwrap();
        assert_eq!(model.deployments, vec!["app.war"]);
        h.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_lifecycle_over_tcp() {
        let mut h = harness(ConnectionStrategy::Reuse).await;
        assert_eq!(h.client.host_controller_names().await.unwrap(), vec!["host-a"]);
        assert!(h.client.host_model("host-a").await.unwrap().is_some());
        assert!(h.client.host_model("nowhere").await.unwrap().is_none());

        assert_eq!(
            h.client.start_server("host-a", "server-one").await.unwrap(),
            ServerStatus::Started
        );
        assert_eq!(
            h.client.restart_server("host-a", "server-one", 0).await.unwrap(),
            ServerStatus::Started
        );
        let statuses = h.client.server_statuses().await.unwrap();
        assert_eq!(
            statuses.get(&ServerIdentity::new("host-a", "main", "server-one")),
            Some(&ServerStatus::Started)
        );
        assert_eq!(
            h.client.stop_server("host-a", "server-two", 100).await.unwrap(),
            ServerStatus::Stopped
        );

        let result = h
            .client
            .apply_server_model_update(
                ServerIdentity::new("host-a", "main", "server-one"),
                ServerModelUpdate::new("fail", &[]),
            )
            .await
            .unwrap();
        assert!(matches!(result, ServerUpdateResult::Failed(_)));
        h.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reused_connection_dropped_after_error() {
        let mut h = harness(ConnectionStrategy::Reuse).await;
        h.client.get_domain().await.unwrap();
        assert!(h.client.inner().has_cached_connection().await);

        // The server closes every connection on shutdown
        h.server.stop().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(h.client.get_domain().await.is_err());
        assert!(!h.client.inner().has_cached_connection().await);
    }
}

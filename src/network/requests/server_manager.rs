//! Requests a domain controller sends to a host's server manager

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{check_count, receive_empty, send_empty};
use crate::network::{ManagementClient, ManagementRequest, ManagementResult, RequestSettings};
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

#[derive(Debug, Default)]
pub struct IsActiveRequest;

#[async_trait]
impl ManagementRequest for IsActiveRequest {
    type Response = bool;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::IS_ACTIVE_REQUEST;
    const RESPONSE: u8 = op::IS_ACTIVE_RESPONSE;

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
    ) -> ProtocolResult<bool> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        u.expect_header(RETURN_ACTIVE).await?;
        let active = u.read_bool().await?;
        u.finish().await?;
        Ok(active)
    }
}

#[derive(Debug, Default)]
pub struct GetHostModelRequest;

#[async_trait]
impl ManagementRequest for GetHostModelRequest {
    type Response = HostModel;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::GET_HOST_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_HOST_MODEL_RESPONSE;

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
    ) -> ProtocolResult<HostModel> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        u.expect_header(RETURN_HOST_MODEL).await?;
        let model = u.read_object().await?;
        u.finish().await?;
        Ok(model)
    }
}

async fn send_server_name(
    settings: &RequestSettings,
    output: &mut (dyn AsyncWrite + Unpin + Send),
    server_name: &str,
) -> ProtocolResult<()> {
    let mut m = Marshaller::start(output, &settings.codec).await?;
    m.write_byte(PARAM_SERVER_NAME).await?;
    m.write_utf(server_name).await?;
    m.finish().await
}

async fn send_server_and_timeout(
    settings: &RequestSettings,
    output: &mut (dyn AsyncWrite + Unpin + Send),
    server_name: &str,
    graceful_timeout: i64,
) -> ProtocolResult<()> {
    let mut m = Marshaller::start(output, &settings.codec).await?;
    m.write_byte(PARAM_SERVER_NAME).await?;
    m.write_utf(server_name).await?;
    m.write_byte(PARAM_GRACEFUL_TIMEOUT).await?;
    m.write_long(graceful_timeout).await?;
    m.finish().await
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
    pub server_name: String,
}

#[async_trait]
impl ManagementRequest for GetServerModelRequest {
    type Response = Option<ServerModel>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::GET_SERVER_MODEL_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_MODEL_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        send_server_name(settings, output, &self.server_name).await
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
pub struct UpdateFullDomainRequest {
    pub model: DomainModel,
}

#[async_trait]
impl ManagementRequest for UpdateFullDomainRequest {
    type Response = ();

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_FULL_DOMAIN_REQUEST;
    const RESPONSE: u8 = op::UPDATE_FULL_DOMAIN_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        m.write_byte(PARAM_DOMAIN_MODEL).await?;
        m.write_object(&self.model).await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<()> {
        receive_empty(settings, input).await
    }
}

#[derive(Debug)]
pub struct UpdateDomainModelRequest {
    pub updates: Vec<DomainModelUpdate>,
}

#[async_trait]
impl ManagementRequest for UpdateDomainModelRequest {
    type Response = Vec<DomainUpdateApplierResponse>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_DOMAIN_MODEL_REQUEST;
    const RESPONSE: u8 = op::UPDATE_DOMAIN_MODEL_RESPONSE;

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
        let responses = fields::read_applier_responses(&mut u, RETURN_APPLY_UPDATE).await?;
        u.finish().await?;
        check_count(self.updates.len(), responses.len())?;
        Ok(responses)
    }
}

#[derive(Debug)]
pub struct UpdateHostModelRequest {
    pub updates: Vec<HostModelUpdate>,
}

#[async_trait]
impl ManagementRequest for UpdateHostModelRequest {
    type Response = Vec<HostUpdateResult>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_HOST_MODEL_REQUEST;
    const RESPONSE: u8 = op::UPDATE_HOST_MODEL_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
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

/// Server model updates for one server, optionally all-or-nothing
#[derive(Debug)]
pub struct UpdateServerModelRequest {
    pub server_name: String,
    pub allow_rollback: bool,
    pub updates: Vec<ServerModelUpdate>,
}

#[async_trait]
impl ManagementRequest for UpdateServerModelRequest {
    type Response = Vec<ServerUpdateResult>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::UPDATE_SERVER_MODEL_REQUEST;
    const RESPONSE: u8 = op::UPDATE_SERVER_MODEL_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        let mut m = Marshaller::start(output, &settings.codec).await?;
        m.write_byte(PARAM_SERVER_NAME).await?;
        m.write_utf(&self.server_name).await?;
        m.write_byte(PARAM_ALLOW_ROLLBACK).await?;
        m.write_bool(self.allow_rollback).await?;
        fields::write_object_list(&mut m, PARAM_UPDATE_COUNT, PARAM_SERVER_MODEL_UPDATE, &self.updates)
            .await?;
        m.finish().await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<Self::Response> {
        let mut u = Unmarshaller::start(input, &settings.codec).await?;
        let results = fields::read_server_results(&mut u).await?;
        u.finish().await?;
        check_count(self.updates.len(), results.len())?;
        Ok(results)
    }
}

#[derive(Debug, Default)]
pub struct GetServerListRequest;

#[async_trait]
impl ManagementRequest for GetServerListRequest {
    type Response = BTreeMap<ServerIdentity, ServerStatus>;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::GET_SERVER_LIST_REQUEST;
    const RESPONSE: u8 = op::GET_SERVER_LIST_RESPONSE;

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
        let statuses = fields::read_server_statuses(&mut u, RETURN_SERVER_COUNT).await?;
        u.finish().await?;
        Ok(statuses)
    }
}

#[derive(Debug)]
pub struct StartServerRequest {
    pub server_name: String,
}

#[async_trait]
impl ManagementRequest for StartServerRequest {
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::START_SERVER_REQUEST;
    const RESPONSE: u8 = op::START_SERVER_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        send_server_name(settings, output, &self.server_name).await
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
    pub server_name: String,
    pub graceful_timeout: i64,
}

#[async_trait]
impl ManagementRequest for StopServerRequest {
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::STOP_SERVER_REQUEST;
    const RESPONSE: u8 = op::STOP_SERVER_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        send_server_and_timeout(settings, output, &self.server_name, self.graceful_timeout).await
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
    pub server_name: String,
    pub graceful_timeout: i64,
}

#[async_trait]
impl ManagementRequest for RestartServerRequest {
    type Response = ServerStatus;

    const HANDLER: HandlerId = HandlerId::ServerManager;
    const REQUEST: u8 = op::RESTART_SERVER_REQUEST;
    const RESPONSE: u8 = op::RESTART_SERVER_RESPONSE;

    async fn send_request(
        &mut self,
        settings: &RequestSettings,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> ProtocolResult<()> {
        send_server_and_timeout(settings, output, &self.server_name, self.graceful_timeout).await
    }

    async fn receive_response(
        &mut self,
        settings: &RequestSettings,
        input: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ProtocolResult<ServerStatus> {
        receive_status(settings, input).await
    }
}

/// Server manager operations over a [`ManagementClient`]
pub struct ServerManagerClient {
    client: ManagementClient,
}

impl ServerManagerClient {
    pub fn new(client: ManagementClient) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &ManagementClient {
        &self.client
    }

    pub async fn is_active(&self) -> ManagementResult<bool> {
        self.client.execute(IsActiveRequest).await
    }

    pub async fn host_model(&self) -> ManagementResult<HostModel> {
        self.client.execute(GetHostModelRequest).await
    }

    pub async fn server_model(&self, server_name: &str) -> ManagementResult<Option<ServerModel>> {
        self.client
            .execute(GetServerModelRequest {
                server_name: server_name.to_string(),
            })
            .await
    }

    pub async fn update_full_domain(&self, model: DomainModel) -> ManagementResult<()> {
        self.client.execute(UpdateFullDomainRequest { model }).await
    }

    pub async fn update_domain_model(
        &self,
        updates: Vec<DomainModelUpdate>,
    ) -> ManagementResult<Vec<DomainUpdateApplierResponse>> {
        self.client.execute(UpdateDomainModelRequest { updates }).await
    }

    pub async fn update_host_model(
        &self,
        updates: Vec<HostModelUpdate>,
    ) -> ManagementResult<Vec<HostUpdateResult>> {
        self.client.execute(UpdateHostModelRequest { updates }).await
    }

    pub async fn update_server_model(
        &self,
        server_name: &str,
        updates: Vec<ServerModelUpdate>,
        allow_rollback: bool,
    ) -> ManagementResult<Vec<ServerUpdateResult>> {
        self.client
            .execute(UpdateServerModelRequest {
                server_name: server_name.to_string(),
                allow_rollback,
                updates,
            })
            .await
    }

    pub async fn server_list(&self) -> ManagementResult<BTreeMap<ServerIdentity, ServerStatus>> {
        self.client.execute(GetServerListRequest).await
    }

    pub async fn start_server(&self, server_name: &str) -> ManagementResult<ServerStatus> {
        self.client
            .execute(StartServerRequest {
                server_name: server_name.to_string(),
            })
            .await
    }

    pub async fn stop_server(
        &self,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ManagementResult<ServerStatus> {
        self.client
            .execute(StopServerRequest {
                server_name: server_name.to_string(),
                graceful_timeout,
            })
            .await
    }

    pub async fn restart_server(
        &self,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ManagementResult<ServerStatus> {
        self.client
            .execute(RestartServerRequest {
                server_name: server_name.to_string(),
                graceful_timeout,
            })
            .await
    }
}

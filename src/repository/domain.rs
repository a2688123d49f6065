//! In-memory domain controller and deployment-plan executor

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::host::unknown_host;
use super::{apply_to_domain_model, ContentRepository, DomainController, HostController};
use crate::protocol::opcodes::plan;
use crate::protocol::streamed::{StreamedResponse, StreamedResponseSender};
use crate::protocol::{
    error_codes, ContentHash, DeploymentAction, DeploymentActionKind, DeploymentPlan,
    DomainModel, DomainModelUpdate, DomainUpdateApplierResponse, DomainUpdateResult, HostModel,
    HostModelUpdate, HostUpdateResult, PlanEventValue, ServerIdentity, ServerModel,
    ServerModelUpdate, ServerStatus, ServerUpdateResult, UpdateFailure,
};

struct DomainState {
    model: RwLock<DomainModel>,
    hosts: RwLock<BTreeMap<String, Arc<dyn HostController>>>,
    content: Option<Arc<dyn ContentRepository>>,
}

impl DomainState {
    async fn host(&self, host_name: &str) -> Option<Arc<dyn HostController>> {
        self.hosts.read().await.get(host_name).cloned()
    }

    async fn all_hosts(&self) -> Vec<Arc<dyn HostController>> {
        self.hosts.read().await.values().cloned().collect()
    }

    async fn all_servers(&self) -> Vec<ServerIdentity> {
        let mut servers = Vec::new();
        for host in self.all_hosts().await {
            servers.extend(host.server_statuses().await.into_keys());
        }
        servers
    }

    async fn apply_to_model(&self, update: &DomainModelUpdate) -> DomainUpdateApplierResponse {
        let applied = {
            let mut model = self.model.write().await;
            apply_to_domain_model(&mut model, update)
        };
        match applied {
            Ok(reaches_servers) => {
                let servers = if reaches_servers {
                    self.all_servers().await
                } else {
                    Vec::new()
                };
                let mut response = DomainUpdateApplierResponse::applied(servers);
                response.host_failures = self.push_to_hosts(update).await;
                response
            }
            Err(failure) => DomainUpdateApplierResponse::failed(failure),
        }
    }

    /// Keep each host's copy of the domain model in step
    async fn push_to_hosts(&self, update: &DomainModelUpdate) -> BTreeMap<String, UpdateFailure> {
        let mut failures = BTreeMap::new();
        for host in self.all_hosts().await {
            let mut responses = host.apply_domain_updates(vec![update.clone()]).await;
            let Some(response) = responses.pop() else {
                continue;
            };
            if let Some(failure) = response.domain_failure {
                failures.insert(host.name().to_string(), failure);
            }
            failures.extend(response.host_failures);
        }
        failures
    }

    /// Put the model back as it was and hand every host the restored copy
    async fn restore(&self, snapshot: DomainModel) {
        *self.model.write().await = snapshot.clone();
        for host in self.all_hosts().await {
            host.update_full_domain(snapshot.clone()).await;
        }
    }

    async fn apply_to_server(
        &self,
        server: &ServerIdentity,
        updates: Vec<ServerModelUpdate>,
        allow_rollback: bool,
    ) -> Vec<ServerUpdateResult> {
        match self.host(&server.host_name).await {
            Some(host) => {
                host.apply_server_updates(&server.server_name, updates, allow_rollback)
                    .await
            }
            None => {
                let failure = unknown_host(&server.host_name);
                updates
                    .iter()
                    .map(|_| ServerUpdateResult::Failed(failure.clone()))
                    .collect()
            }
        }
    }
}

/// Domain controller keeping the domain model in memory
///
/// Hosts are registered explicitly; their server managers may be local
/// [`InMemoryHostController`](super::InMemoryHostController)s or any other
/// [`HostController`].
#[derive(Clone)]
pub struct InMemoryDomainController {
    state: Arc<DomainState>,
}

impl InMemoryDomainController {
    pub fn new(content: Option<Arc<dyn ContentRepository>>) -> Self {
        Self::with_model(DomainModel::default(), content)
    }

    pub fn with_model(model: DomainModel, content: Option<Arc<dyn ContentRepository>>) -> Self {
        Self {
            state: Arc::new(DomainState {
                model: RwLock::new(model),
                hosts: RwLock::new(BTreeMap::new()),
                content,
            }),
        }
    }

    /// Register a host and hand it the current domain model
    pub async fn register_host(&self, host: Arc<dyn HostController>) {
        let model = self.state.model.read().await.clone();
        host.update_full_domain(model).await;
        tracing::info!("Registered host controller {}", host.name());
        self.state
            .hosts
            .write()
            .await
            .insert(host.name().to_string(), host);
    }

    /// Reject plans that cannot start
    ///
    /// Whether each action fits the model is only known while the plan
    /// runs; those failures arrive as action results.
    async fn validate_plan(&self, plan: &DeploymentPlan) -> Result<(), UpdateFailure> {
        let invalid = |message: String| UpdateFailure::new(error_codes::PLAN_INVALID, message);
        if plan.actions.is_empty() {
            return Err(invalid(format!("plan {} has no actions", plan.id)));
        }

        for action in &plan.actions {
            let name = &action.deployment_name;
            match action.kind {
                DeploymentActionKind::Add => {
                    let hash = action
                        .content_hash
                        .as_deref()
                        .ok_or_else(|| invalid(format!("add of {} carries no content", name)))?;
                    let bytes = hex::decode(hash)
                        .map_err(|_| invalid(format!("bad content hash {}", hash)))?;
                    if let Some(content) = &self.state.content {
                        if !content.has_content(&ContentHash(bytes)).await {
                            return Err(invalid(format!("no content stored for {}", hash)));
                        }
                    }
                }
                DeploymentActionKind::Replace if action.replaced.is_none() => {
                    return Err(invalid(format!("replace of {} names no old deployment", name)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Domain-level update performed by a plan action
fn model_update_for(action: &DeploymentAction) -> DomainModelUpdate {
    let address = ["deployment", action.deployment_name.as_str()];
    match action.kind {
        DeploymentActionKind::Add => DomainModelUpdate::new("add-deployment", &address)
            .with_value(action.content_hash.as_deref().unwrap_or_default()),
        DeploymentActionKind::Deploy => DomainModelUpdate::new("deploy", &address),
        DeploymentActionKind::Redeploy => DomainModelUpdate::new("redeploy", &address),
        DeploymentActionKind::Undeploy => DomainModelUpdate::new("undeploy", &address),
        DeploymentActionKind::Replace => DomainModelUpdate::new("replace-deployment", &address)
            .with_value(action.replaced.as_deref().unwrap_or_default()),
        DeploymentActionKind::Remove => DomainModelUpdate::new("remove-deployment", &address),
    }
}

/// Server-level update pushed for a plan action, if the action reaches servers
fn server_update_for(action: &DeploymentAction) -> Option<ServerModelUpdate> {
    let address = ["deployment", action.deployment_name.as_str()];
    let update = match action.kind {
        DeploymentActionKind::Add | DeploymentActionKind::Remove => return None,
        DeploymentActionKind::Deploy => ServerModelUpdate::new("deploy", &address),
        DeploymentActionKind::Redeploy => ServerModelUpdate::new("redeploy", &address),
        DeploymentActionKind::Undeploy => ServerModelUpdate::new("undeploy", &address),
        DeploymentActionKind::Replace => ServerModelUpdate::new("replace", &address)
            .with_value(action.replaced.as_deref().unwrap_or_default()),
    };
    Some(update)
}

/// Execute a validated plan, streaming results in execution order
///
/// Every action is applied to the domain model first; servers only see
/// the set once the model accepted it. A failed action with
/// `rollback_on_failure` restores the model as it was before the set and
/// no server is touched.
async fn run_plan(state: Arc<DomainState>, plan: DeploymentPlan, sender: StreamedResponseSender) {
    let set_id = Uuid::new_v4();
    let header = vec![
        StreamedResponse::item(plan::RETURN_DEPLOYMENT_PLAN_ID, PlanEventValue::Id(plan.id)),
        StreamedResponse::item(plan::RETURN_DEPLOYMENT_SET_ID, PlanEventValue::Id(set_id)),
    ];
    if sender.send_batch(header).await.is_err() {
        tracing::warn!("Client went away before plan {} started", plan.id);
        return;
    }

    let snapshot = state.model.read().await.clone();
    let mut accepted = Vec::with_capacity(plan.actions.len());
    let mut failed = false;
    for action in &plan.actions {
        let response = state.apply_to_model(&model_update_for(action)).await;
        let servers = response.servers.clone();
        let ok = response.domain_failure.is_none();
        let batch = vec![
            StreamedResponse::item(plan::RETURN_DEPLOYMENT_ACTION_ID, PlanEventValue::Id(action.id)),
            StreamedResponse::item(
                plan::RETURN_DEPLOYMENT_ACTION_MODEL_RESULT,
                PlanEventValue::ModelResult(response),
            ),
        ];
        if sender.send_batch(batch).await.is_err() {
            return;
        }

        if ok {
            accepted.push((action, servers));
        } else {
            failed = true;
            if plan.rollback_on_failure {
                break;
            }
        }
    }

    if failed && plan.rollback_on_failure {
        tracing::info!("Rolling back deployment set {} of plan {}", set_id, plan.id);
        state.restore(snapshot).await;
        let batch = vec![
            StreamedResponse::item(plan::RETURN_DEPLOYMENT_SET_ROLLBACK, PlanEventValue::Id(set_id)),
            StreamedResponse::complete(),
        ];
        if sender.send_batch(batch).await.is_err() {
            tracing::warn!("Client went away before plan {} completed", plan.id);
        }
        return;
    }

    for (action, servers) in accepted {
        let Some(update) = server_update_for(action) else {
            continue;
        };
        for server in servers {
            let mut results = state
                .apply_to_server(&server, vec![update.clone()], plan.rollback_on_failure)
                .await;
            let result = results.pop().unwrap_or(ServerUpdateResult::Cancelled);
            let batch = vec![
                StreamedResponse::item(
                    plan::RETURN_SERVER_DEPLOYMENT,
                    PlanEventValue::Server(server),
                ),
                StreamedResponse::item(
                    plan::RETURN_SERVER_DEPLOYMENT_RESULT,
                    PlanEventValue::ServerResult(result),
                ),
            ];
            if sender.send_batch(batch).await.is_err() {
                return;
            }
        }
    }

    if sender.send(StreamedResponse::complete()).await.is_err() {
        tracing::warn!("Client went away before plan {} completed", plan.id);
    }
}

#[async_trait]
impl DomainController for InMemoryDomainController {
    async fn domain_model(&self) -> DomainModel {
        self.state.model.read().await.clone()
    }

    async fn apply_update(&self, update: DomainModelUpdate) -> DomainUpdateResult {
        let response = self.state.apply_to_model(&update).await;
        if let Some(failure) = response.domain_failure {
            return DomainUpdateResult::failed(failure);
        }

        let mut result = DomainUpdateResult {
            host_failures: response.host_failures,
            ..Default::default()
        };
        let server_update = ServerModelUpdate {
            operation: update.operation.clone(),
            address: update.address.clone(),
            value: update.value.clone(),
        };
        for server in response.servers {
            let mut results = self
                .state
                .apply_to_server(&server, vec![server_update.clone()], false)
                .await;
            match results.pop() {
                Some(ServerUpdateResult::Success(value)) => {
                    result
                        .server_results
                        .insert(server, value.unwrap_or_default());
                }
                Some(ServerUpdateResult::Failed(failure)) => {
                    result.server_failures.insert(server, failure);
                }
                Some(ServerUpdateResult::Cancelled) | Some(ServerUpdateResult::TimedOut) | None => {
                    result.server_failures.insert(
                        server,
                        UpdateFailure::new(error_codes::INTERNAL_ERROR, "server update did not complete"),
                    );
                }
            }
        }
        result
    }

    async fn apply_update_to_model(
        &self,
        update: DomainModelUpdate,
    ) -> DomainUpdateApplierResponse {
        self.state.apply_to_model(&update).await
    }

    async fn apply_updates_to_server(
        &self,
        server: &ServerIdentity,
        updates: Vec<ServerModelUpdate>,
        allow_rollback: bool,
    ) -> Vec<ServerUpdateResult> {
        self.state.apply_to_server(server, updates, allow_rollback).await
    }

    async fn apply_host_updates(
        &self,
        host_name: &str,
        updates: Vec<HostModelUpdate>,
    ) -> Vec<HostUpdateResult> {
        match self.state.host(host_name).await {
            Some(host) => host.apply_host_updates(updates).await,
            None => {
                let failure = unknown_host(host_name);
                updates
                    .iter()
                    .map(|_| HostUpdateResult::Failed(failure.clone()))
                    .collect()
            }
        }
    }

    async fn execute_deployment_plan(&self, plan: DeploymentPlan, sender: StreamedResponseSender) {
        tracing::info!(
            "Executing deployment plan {} ({} actions)",
            plan.id,
            plan.actions.len()
        );
        if let Err(failure) = self.validate_plan(&plan).await {
            tracing::warn!("Rejected deployment plan {}: {}", plan.id, failure);
            if sender.send(StreamedResponse::invalid(failure)).await.is_err() {
                tracing::warn!("Client went away before plan {} was rejected", plan.id);
            }
            return;
        }
        tokio::spawn(run_plan(self.state.clone(), plan, sender));
    }

    async fn host_model(&self, host_name: &str) -> Option<HostModel> {
        match self.state.host(host_name).await {
            Some(host) => Some(host.host_model().await),
            None => None,
        }
    }

    async fn host_controller_names(&self) -> Vec<String> {
        self.state.hosts.read().await.keys().cloned().collect()
    }

    async fn server_statuses(&self) -> BTreeMap<ServerIdentity, ServerStatus> {
        let mut statuses = BTreeMap::new();
        for host in self.state.all_hosts().await {
            statuses.extend(host.server_statuses().await);
        }
        statuses
    }

    async fn server_model(&self, host_name: &str, server_name: &str) -> Option<ServerModel> {
        self.state.host(host_name).await?.server_model(server_name).await
    }

    async fn start_server(&self, host_name: &str, server_name: &str) -> ServerStatus {
        match self.state.host(host_name).await {
            Some(host) => host.start_server(server_name).await,
            None => ServerStatus::DoesNotExist,
        }
    }

    async fn stop_server(
        &self,
        host_name: &str,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ServerStatus {
        match self.state.host(host_name).await {
            Some(host) => host.stop_server(server_name, graceful_timeout).await,
            None => ServerStatus::DoesNotExist,
        }
    }

    async fn restart_server(
        &self,
        host_name: &str,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ServerStatus {
        match self.state.host(host_name).await {
            Some(host) => host.restart_server(server_name, graceful_timeout).await,
            None => ServerStatus::DoesNotExist,
        }
    }

    async fn is_deployment_name_unique(&self, name: &str) -> bool {
        !self.state.model.read().await.deployments.contains_key(name)
    }
}

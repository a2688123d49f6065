//! In-memory server manager for one host

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{apply_to_domain_model, apply_to_server_model, not_found, rejected, HostController, REJECTED_OPERATION};
use crate::protocol::{
    error_codes, DomainModel, DomainModelUpdate, DomainUpdateApplierResponse, HostModel,
    HostModelUpdate, HostUpdateResult, ServerIdentity, ServerModel, ServerModelUpdate,
    ServerStatus, ServerUpdateResult, UpdateFailure,
};

#[derive(Debug, Clone)]
struct ManagedServer {
    status: ServerStatus,
    model: ServerModel,
}

#[derive(Debug, Default)]
struct HostState {
    domain: DomainModel,
    host: HostModel,
    servers: BTreeMap<String, ManagedServer>,
}

impl HostState {
    fn identities(&self) -> Vec<ServerIdentity> {
        self.servers
            .iter()
            .map(|(name, s)| ServerIdentity::new(&self.host.name, &s.model.server_group_name, name))
            .collect()
    }
}

/// Host controller keeping its servers in memory
///
/// Servers are not real processes; lifecycle operations only move the
/// recorded status. Host updates are recorded as attributes.
pub struct InMemoryHostController {
    name: String,
    state: RwLock<HostState>,
}

impl InMemoryHostController {
    pub fn new(name: &str) -> Self {
        let state = HostState {
            host: HostModel {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            name: name.to_string(),
            state: RwLock::new(state),
        }
    }

    /// Register a stopped server in `group`
    pub async fn add_server(&self, server_name: &str, group: &str) {
        let mut state = self.state.write().await;
        state
            .host
            .servers
            .insert(server_name.to_string(), group.to_string());
        state.host.revision += 1;
        state.servers.insert(
            server_name.to_string(),
            ManagedServer {
                status: ServerStatus::Stopped,
                model: ServerModel {
                    server_name: server_name.to_string(),
                    server_group_name: group.to_string(),
                    ..Default::default()
                },
            },
        );
    }

    /// This host's copy of the domain model
    pub async fn domain_copy(&self) -> DomainModel {
        self.state.read().await.domain.clone()
    }

    async fn set_status(&self, server_name: &str, status: ServerStatus) -> ServerStatus {
        let mut state = self.state.write().await;
        match state.servers.get_mut(server_name) {
            Some(server) => {
                server.status = status;
                status
            }
            None => ServerStatus::DoesNotExist,
        }
    }
}

#[async_trait]
impl HostController for InMemoryHostController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_active(&self) -> bool {
        true
    }

    async fn host_model(&self) -> HostModel {
        self.state.read().await.host.clone()
    }

    async fn server_model(&self, server_name: &str) -> Option<ServerModel> {
        let state = self.state.read().await;
        state.servers.get(server_name).map(|s| s.model.clone())
    }

    async fn update_full_domain(&self, model: DomainModel) {
        tracing::info!(
            "Host {} received domain model revision {}",
            self.name,
            model.revision
        );
        self.state.write().await.domain = model;
    }

    async fn apply_domain_updates(
        &self,
        updates: Vec<DomainModelUpdate>,
    ) -> Vec<DomainUpdateApplierResponse> {
        let mut state = self.state.write().await;
        let mut responses = Vec::with_capacity(updates.len());
        for update in &updates {
            let response = match apply_to_domain_model(&mut state.domain, update) {
                Ok(true) => DomainUpdateApplierResponse::applied(state.identities()),
                Ok(false) => DomainUpdateApplierResponse::applied(Vec::new()),
                Err(failure) => DomainUpdateApplierResponse::failed(failure),
            };
            responses.push(response);
        }
        responses
    }

    async fn apply_host_updates(&self, updates: Vec<HostModelUpdate>) -> Vec<HostUpdateResult> {
        let mut state = self.state.write().await;
        let mut results = Vec::with_capacity(updates.len());
        for update in &updates {
            if update.operation == REJECTED_OPERATION {
                results.push(HostUpdateResult::Failed(rejected(format!(
                    "host update {} rejected",
                    update
                ))));
                continue;
            }
            state.host.attributes.insert(
                update.address.join("/"),
                update.value.clone().unwrap_or_default(),
            );
            state.host.revision += 1;
            results.push(HostUpdateResult::Applied {
                servers: state.servers.keys().cloned().collect(),
            });
        }
        results
    }

    async fn apply_server_updates(
        &self,
        server_name: &str,
        updates: Vec<ServerModelUpdate>,
        allow_rollback: bool,
    ) -> Vec<ServerUpdateResult> {
        let mut state = self.state.write().await;
        let server = match state.servers.get_mut(server_name) {
            Some(server) => server,
            None => {
                let failure = not_found(format!("no server {}", server_name));
                return updates
                    .iter()
                    .map(|_| ServerUpdateResult::Failed(failure.clone()))
                    .collect();
            }
        };

        let mut working = server.model.clone();
        let mut results = Vec::with_capacity(updates.len());
        for (index, update) in updates.iter().enumerate() {
            match apply_to_server_model(&mut working, update) {
                Ok(value) => results.push(ServerUpdateResult::Success(value)),
                Err(failure) if allow_rollback => {
                    tracing::info!(
                        "Rolling back {} update(s) on {} after {}",
                        index,
                        server_name,
                        failure
                    );
                    // earlier updates are undone, later ones never run
                    let mut rolled_back = vec![ServerUpdateResult::Cancelled; index];
                    rolled_back.push(ServerUpdateResult::Failed(failure));
                    rolled_back.resize(updates.len(), ServerUpdateResult::Cancelled);
                    return rolled_back;
                }
                Err(failure) => results.push(ServerUpdateResult::Failed(failure)),
            }
        }
        server.model = working;
        results
    }

    async fn server_statuses(&self) -> BTreeMap<ServerIdentity, ServerStatus> {
        let state = self.state.read().await;
        state
            .identities()
            .into_iter()
            .filter_map(|id| {
                let status = state.servers.get(&id.server_name)?.status;
                Some((id, status))
            })
            .collect()
    }

    async fn start_server(&self, server_name: &str) -> ServerStatus {
        tracing::info!("Starting server {} on {}", server_name, self.name);
        self.set_status(server_name, ServerStatus::Started).await
    }

    async fn stop_server(&self, server_name: &str, graceful_timeout: i64) -> ServerStatus {
        tracing::info!(
            "Stopping server {} on {} (graceful timeout {} ms)",
            server_name,
            self.name,
            graceful_timeout
        );
        self.set_status(server_name, ServerStatus::Stopped).await
    }

    async fn restart_server(&self, server_name: &str, graceful_timeout: i64) -> ServerStatus {
        match self.stop_server(server_name, graceful_timeout).await {
            ServerStatus::DoesNotExist => ServerStatus::DoesNotExist,
            _ => self.start_server(server_name).await,
        }
    }
}

/// Failure used when a host cannot be found
pub(crate) fn unknown_host(host_name: &str) -> UpdateFailure {
    UpdateFailure::new(error_codes::NOT_FOUND, format!("no host {}", host_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn host_with_servers() -> InMemoryHostController {
        let host = InMemoryHostController::new("host-a");
        host.add_server("server-one", "main").await;
        host.add_server("server-two", "other").await;
        host
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let host = host_with_servers().await;
        assert_eq!(host.start_server("server-one").await, ServerStatus::Started);
        assert_eq!(host.stop_server("server-one", 100).await, ServerStatus::Stopped);
        assert_eq!(host.restart_server("server-one", 0).await, ServerStatus::Started);
        assert_eq!(host.start_server("missing").await, ServerStatus::DoesNotExist);

        let statuses = host.server_statuses().await;
        let id = ServerIdentity::new("host-a", "main", "server-one");
        assert_eq!(statuses.get(&id), Some(&ServerStatus::Started));
        assert_eq!(statuses.len(), 2);
    }

    #[tokio::test]
    async fn test_server_updates_without_rollback() {
        let host = host_with_servers().await;
        let updates = vec![
            ServerModelUpdate::new("deploy", &["deployment", "a.war"]),
            ServerModelUpdate::new(REJECTED_OPERATION, &[]),
            ServerModelUpdate::new("deploy", &["deployment", "b.war"]),
        ];
        let results = host.apply_server_updates("server-one", updates, false).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(matches!(results[1], ServerUpdateResult::Failed(_)));
        assert!(results[2].is_success());

        let model = host.server_model("server-one").await.unwrap();
        assert_eq!(model.deployments, vec!["a.war", "b.war"]);
    }

    #[tokio::test]
    async fn test_server_updates_with_rollback() {
        let host = host_with_servers().await;
        let updates = vec![
            ServerModelUpdate::new("deploy", &["deployment", "a.war"]),
            ServerModelUpdate::new(REJECTED_OPERATION, &[]),
            ServerModelUpdate::new("deploy", &["deployment", "b.war"]),
        ];
        let results = host.apply_server_updates("server-one", updates, true).await;
        assert_eq!(
            results,
            vec![
                ServerUpdateResult::Cancelled,
                ServerUpdateResult::Failed(UpdateFailure::new(
                    error_codes::UPDATE_REJECTED,
                    "update rejected by server"
                )),
                ServerUpdateResult::Cancelled,
            ]
        );
        let model = host.server_model("server-one").await.unwrap();
        assert!(model.deployments.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_server_fails_every_update() {
        let host = host_with_servers().await;
        let updates = vec![
            ServerModelUpdate::new("deploy", &["deployment", "a.war"]),
            ServerModelUpdate::new("deploy", &["deployment", "b.war"]),
        ];
        let results = host.apply_server_updates("missing", updates, false).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, ServerUpdateResult::Failed(_))));
    }

    #[tokio::test]
    async fn test_host_updates_recorded() {
        let host = host_with_servers().await;
        let results = host
            .apply_host_updates(vec![
                HostModelUpdate::new("write-attribute", &["interface", "public"]).with_value("10.0.0.1"),
                HostModelUpdate::new(REJECTED_OPERATION, &[]),
            ])
            .await;
        assert!(matches!(&results[0], HostUpdateResult::Applied { servers } if servers.len() == 2));
        assert!(matches!(&results[1], HostUpdateResult::Failed(f) if f.code == error_codes::UPDATE_REJECTED));

        let model = host.host_model().await;
        assert_eq!(
            model.attributes.get("interface/public").map(String::as_str),
            Some("10.0.0.1")
        );
    }

    #[tokio::test]
    async fn test_domain_updates_report_servers() {
        let host = host_with_servers().await;
        host.update_full_domain(DomainModel {
            revision: 7,
            ..Default::default()
        })
        .await;

        let responses = host
            .apply_domain_updates(vec![
                DomainModelUpdate::new("write-attribute", &["system-property", "jvm"]).with_value("big"),
                DomainModelUpdate::new(REJECTED_OPERATION, &[]),
            ])
            .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].servers.len(), 2);
        assert!(responses[1].domain_failure.is_some());
        assert_eq!(host.domain_copy().await.revision, 8);
    }
}

//! Host controller reached over the server-manager protocol

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::HostController;
use crate::network::{ManagementError, ManagementResult, ServerManagerClient};
use crate::protocol::{
    error_codes, DomainModel, DomainModelUpdate, DomainUpdateApplierResponse, HostModel,
    HostModelUpdate, HostUpdateResult, ServerIdentity, ServerModel, ServerModelUpdate,
    ServerStatus, ServerUpdateResult, UpdateFailure,
};

/// A host whose server manager runs on another node
///
/// Every call is one request on the wrapped [`ServerManagerClient`]. When
/// the host cannot be reached the failure is logged and reported in the
/// shape the caller expects: updates fail with `HOST_UNREACHABLE`,
/// lifecycle calls return [`ServerStatus::Unknown`].
pub struct RemoteHostController {
    name: String,
    client: ServerManagerClient,
}

impl RemoteHostController {
    /// Ask the remote server manager for its host name
    pub async fn connect(client: ServerManagerClient) -> ManagementResult<Self> {
        let name = client.host_model().await?.name;
        tracing::info!("Connected to host controller {}", name);
        Ok(Self { name, client })
    }

    fn unreachable(&self, err: &ManagementError) -> UpdateFailure {
        UpdateFailure::new(
            error_codes::HOST_UNREACHABLE,
            format!("host {} unreachable: {}", self.name, err),
        )
    }

    fn log_failure(&self, what: &str, err: &ManagementError) {
        tracing::warn!("{} on host {} failed: {}", what, self.name, err);
    }
}

#[async_trait]
impl HostController for RemoteHostController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_active(&self) -> bool {
        match self.client.is_active().await {
            Ok(active) => active,
            Err(err) => {
                self.log_failure("Activity check", &err);
                false
            }
        }
    }

    async fn host_model(&self) -> HostModel {
        match self.client.host_model().await {
            Ok(model) => model,
            Err(err) => {
                self.log_failure("Host model read", &err);
                HostModel {
                    name: self.name.clone(),
                    ..Default::default()
                }
            }
        }
    }

    async fn server_model(&self, server_name: &str) -> Option<ServerModel> {
        match self.client.server_model(server_name).await {
            Ok(model) => model,
            Err(err) => {
                self.log_failure("Server model read", &err);
                None
            }
        }
    }

    async fn update_full_domain(&self, model: DomainModel) {
        if let Err(err) = self.client.update_full_domain(model).await {
            self.log_failure("Full domain update", &err);
        }
    }

    async fn apply_domain_updates(
        &self,
        updates: Vec<DomainModelUpdate>,
    ) -> Vec<DomainUpdateApplierResponse> {
        let count = updates.len();
        match self.client.update_domain_model(updates).await {
            Ok(responses) => responses,
            Err(err) => {
                self.log_failure("Domain update", &err);
                let failure = self.unreachable(&err);
                (0..count)
                    .map(|_| {
                        let mut response = DomainUpdateApplierResponse::applied(Vec::new());
                        response
                            .host_failures
                            .insert(self.name.clone(), failure.clone());
                        response
                    })
                    .collect()
            }
        }
    }

    async fn apply_host_updates(&self, updates: Vec<HostModelUpdate>) -> Vec<HostUpdateResult> {
        let count = updates.len();
        match self.client.update_host_model(updates).await {
            Ok(results) => results,
            Err(err) => {
                self.log_failure("Host update", &err);
                vec![HostUpdateResult::Failed(self.unreachable(&err)); count]
            }
        }
    }

    async fn apply_server_updates(
        &self,
        server_name: &str,
        updates: Vec<ServerModelUpdate>,
        allow_rollback: bool,
    ) -> Vec<ServerUpdateResult> {
        let count = updates.len();
        match self
            .client
            .update_server_model(server_name, updates, allow_rollback)
            .await
        {
            Ok(results) => results,
            Err(err) => {
                self.log_failure("Server update", &err);
                vec![ServerUpdateResult::Failed(self.unreachable(&err)); count]
            }
        }
    }

    async fn server_statuses(&self) -> BTreeMap<ServerIdentity, ServerStatus> {
        match self.client.server_list().await {
            Ok(statuses) => statuses,
            Err(err) => {
                self.log_failure("Server list", &err);
                BTreeMap::new()
            }
        }
    }

    async fn start_server(&self, server_name: &str) -> ServerStatus {
        match self.client.start_server(server_name).await {
            Ok(status) => status,
            Err(err) => {
                self.log_failure("Start", &err);
                ServerStatus::Unknown
            }
        }
    }

    async fn stop_server(&self, server_name: &str, graceful_timeout: i64) -> ServerStatus {
        match self.client.stop_server(server_name, graceful_timeout).await {
            Ok(status) => status,
            Err(err) => {
                self.log_failure("Stop", &err);
                ServerStatus::Unknown
            }
        }
    }

    async fn restart_server(&self, server_name: &str, graceful_timeout: i64) -> ServerStatus {
        match self.client.restart_server(server_name, graceful_timeout).await {
            Ok(status) => status,
            Err(err) => {
                self.log_failure("Restart", &err);
                ServerStatus::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Dispatcher, ServerContext};
    use crate::network::{ManagementClient, ManagementServer, NetworkConfig};
    use crate::protocol::streamed::{streamed_channel, StreamEvent};
    use crate::protocol::opcodes::plan;
    use crate::protocol::{DeploymentAction, DeploymentActionKind, DeploymentPlan};
    use crate::repository::{
        DomainController, InMemoryDomainController, InMemoryHostController, REJECTED_OPERATION,
    };
    use std::sync::Arc;
    use tokio::sync::watch;

    /// A node serving `host-b` and a domain controller that reaches it remotely
    async fn remote_node() -> (ManagementServer, Arc<InMemoryHostController>, InMemoryDomainController) {
        let host = Arc::new(InMemoryHostController::new("host-b"));
        host.add_server("one", "main").await;
        host.add_server("two", "main").await;

        let config = NetworkConfig::new(0).with_bind_address("127.0.0.1");
        let context = ServerContext::detached().with_host(host.clone());
        let mut server = ManagementServer::new(config.clone(), Dispatcher::standard(), context);
        let addr = server.start().await.unwrap();

        let client = ServerManagerClient::new(ManagementClient::new(addr, config));
        let remote = RemoteHostController::connect(client).await.unwrap();
        assert_eq!(remote.name(), "host-b");

        let dc = InMemoryDomainController::new(None);
        dc.register_host(Arc::new(remote)).await;
        (server, host, dc)
    }

    #[tokio::test]
    async fn test_updates_reach_remote_host() {
        let (mut server, host, dc) = remote_node().await;
        assert_eq!(dc.host_controller_names().await, vec!["host-b"]);

        let result = dc
            .apply_update(
                DomainModelUpdate::new("write-attribute", &["system-property", "jvm"]).with_value("big"),
            )
            .await;
        assert!(result.is_success());
        assert_eq!(result.server_results.len(), 2);
        assert_eq!(host.domain_copy().await.revision, 1);
        assert_eq!(
            host.domain_copy().await.attributes.get("system-property/jvm").map(String::as_str),
            Some("big")
        );

        let rejected = dc
            .apply_update(DomainModelUpdate::new(REJECTED_OPERATION, &[]))
            .await;
        assert!(rejected.domain_failure.is_some());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_plan_deploys_to_remote_servers() {
        let (mut server, host, dc) = remote_node().await;
        dc.apply_update(
            DomainModelUpdate::new("add-deployment", &["deployment", "app.war"]).with_value("00ff"),
        )
        .await;

        let plan = DeploymentPlan::new(vec![DeploymentAction::new(
            DeploymentActionKind::Deploy,
            "app.war",
        )]);
        let (tx, mut rx) = streamed_channel(8);
        dc.execute_deployment_plan(plan, tx).await;

        let (_tx, mut shutdown) = watch::channel(false);
        let mut values = Vec::new();
        while let Some(StreamEvent::Batch(batch)) = rx.take(&mut shutdown).await.unwrap() {
            let done = batch.iter().any(|i| i.is_last_in_stream);
            values.extend(batch.iter().map(|i| i.protocol_value));
            if done {
                break;
            }
        }
        assert_eq!(
            values.iter().filter(|v| **v == plan::RETURN_SERVER_DEPLOYMENT_RESULT).count(),
            2
        );
        assert_eq!(values.last(), Some(&plan::RETURN_DEPLOYMENT_PLAN_COMPLETE));

        let model = host.server_model("one").await.unwrap();
        assert_eq!(model.deployments, vec!["app.war"]);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_through_remote_host() {
        let (mut server, host, dc) = remote_node().await;
        assert_eq!(dc.start_server("host-b", "one").await, ServerStatus::Started);
        assert_eq!(host.server_statuses().await.len(), 2);
        assert_eq!(
            dc.server_statuses()
                .await
                .get(&ServerIdentity::new("host-b", "main", "one")),
            Some(&ServerStatus::Started)
        );
        assert_eq!(dc.stop_server("host-b", "one", 0).await, ServerStatus::Stopped);
        assert_eq!(dc.start_server("host-b", "missing").await, ServerStatus::DoesNotExist);

        let results = dc
            .apply_host_updates(
                "host-b",
                vec![HostModelUpdate::new("write-attribute", &["interface", "public"]).with_value("x")],
            )
            .await;
        assert!(matches!(&results[0], HostUpdateResult::Applied { servers } if servers.len() == 2));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_failures() {
        let (mut server, _host, dc) = remote_node().await;
        server.stop().await.unwrap();

        assert_eq!(dc.start_server("host-b", "one").await, ServerStatus::Unknown);
        assert!(dc.server_statuses().await.is_empty());

        let results = dc
            .apply_host_updates("host-b", vec![HostModelUpdate::new("write-attribute", &[])])
            .await;
        assert!(matches!(
            &results[0],
            HostUpdateResult::Failed(f) if f.code == error_codes::HOST_UNREACHABLE
        ));

        let server_results = dc
            .apply_updates_to_server(
                &ServerIdentity::new("host-b", "main", "one"),
                vec![ServerModelUpdate::new("deploy", &["deployment", "a.war"])],
                false,
            )
            .await;
        assert!(matches!(
            &server_results[0],
            ServerUpdateResult::Failed(f) if f.code == error_codes::HOST_UNREACHABLE
        ));

        // the model still accepts the update; the host's miss is reported
        let result = dc
            .apply_update(DomainModelUpdate::new("write-attribute", &["a"]).with_value("b"))
            .await;
        assert!(result.domain_failure.is_none());
        assert!(result.host_failures.contains_key("host-b"));
    }
}

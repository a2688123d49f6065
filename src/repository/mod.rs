//! Collaborators behind the protocol handlers
//!
//! The handlers only see the traits defined here. The in-memory
//! implementations are recording fakes: they keep the deployment table
//! and record every other update without interpreting it, which is enough
//! to run a node end to end. [`RemoteHostController`] reaches a host's
//! server manager over the wire.

mod content;
mod domain;
mod host;
mod remote;

pub use content::*;
pub use domain::*;
pub use host::*;
pub use remote::*;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use tokio::io::AsyncRead;

use crate::protocol::streamed::StreamedResponseSender;
use crate::protocol::{
    error_codes, ContentHash, DeploymentPlan, DeploymentUnit, DomainModel, DomainModelUpdate,
    DomainUpdateApplierResponse, DomainUpdateResult, HostModel, HostModelUpdate,
    HostUpdateResult, ServerIdentity, ServerModel, ServerModelUpdate, ServerStatus,
    ServerUpdateResult, UpdateFailure,
};

/// The domain-wide management model, as seen by the domain controller
#[async_trait]
pub trait DomainController: Send + Sync {
    async fn domain_model(&self) -> DomainModel;

    /// Apply an update to the domain model and push it to affected servers
    async fn apply_update(&self, update: DomainModelUpdate) -> DomainUpdateResult;

    /// Apply an update to the domain model only
    async fn apply_update_to_model(&self, update: DomainModelUpdate)
        -> DomainUpdateApplierResponse;

    async fn apply_updates_to_server(
        &self,
        server: &ServerIdentity,
        updates: Vec<ServerModelUpdate>,
        allow_rollback: bool,
    ) -> Vec<ServerUpdateResult>;

    async fn apply_host_updates(
        &self,
        host_name: &str,
        updates: Vec<HostModelUpdate>,
    ) -> Vec<HostUpdateResult>;

    /// Start executing a plan; results arrive through `sender`
    async fn execute_deployment_plan(&self, plan: DeploymentPlan, sender: StreamedResponseSender);

    async fn host_model(&self, host_name: &str) -> Option<HostModel>;

    async fn host_controller_names(&self) -> Vec<String>;

    async fn server_statuses(&self) -> BTreeMap<ServerIdentity, ServerStatus>;

    async fn server_model(&self, host_name: &str, server_name: &str) -> Option<ServerModel>;

    async fn start_server(&self, host_name: &str, server_name: &str) -> ServerStatus;

    async fn stop_server(
        &self,
        host_name: &str,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ServerStatus;

    async fn restart_server(
        &self,
        host_name: &str,
        server_name: &str,
        graceful_timeout: i64,
    ) -> ServerStatus;

    async fn is_deployment_name_unique(&self, name: &str) -> bool;
}

/// One host's server manager
#[async_trait]
pub trait HostController: Send + Sync {
    fn name(&self) -> &str;

    async fn is_active(&self) -> bool;

    async fn host_model(&self) -> HostModel;

    async fn server_model(&self, server_name: &str) -> Option<ServerModel>;

    /// Replace the host's copy of the domain model
    async fn update_full_domain(&self, model: DomainModel);

    async fn apply_domain_updates(
        &self,
        updates: Vec<DomainModelUpdate>,
    ) -> Vec<DomainUpdateApplierResponse>;

    async fn apply_host_updates(&self, updates: Vec<HostModelUpdate>) -> Vec<HostUpdateResult>;

    async fn apply_server_updates(
        &self,
        server_name: &str,
        updates: Vec<ServerModelUpdate>,
        allow_rollback: bool,
    ) -> Vec<ServerUpdateResult>;

    async fn server_statuses(&self) -> BTreeMap<ServerIdentity, ServerStatus>;

    async fn start_server(&self, server_name: &str) -> ServerStatus;

    async fn stop_server(&self, server_name: &str, graceful_timeout: i64) -> ServerStatus;

    async fn restart_server(&self, server_name: &str, graceful_timeout: i64) -> ServerStatus;
}

/// Content-addressed store for deployment bytes
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Consume `stream` to its end and store it
    async fn add_deployment_content(
        &self,
        name: &str,
        runtime_name: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
    ) -> io::Result<ContentHash>;

    async fn has_content(&self, hash: &ContentHash) -> bool;
}

/// Operation every in-memory collaborator rejects
pub const REJECTED_OPERATION: &str = "fail";

fn rejected(message: impl Into<String>) -> UpdateFailure {
    UpdateFailure::new(error_codes::UPDATE_REJECTED, message)
}

fn not_found(message: impl Into<String>) -> UpdateFailure {
    UpdateFailure::new(error_codes::NOT_FOUND, message)
}

/// Second address element, e.g. the name in `["deployment", "app.war"]`
fn deployment_name(address: &[String]) -> Result<&str, UpdateFailure> {
    match address {
        [k, name, ..] if k == "deployment" => Ok(name.as_str()),
        _ => Err(rejected(format!(
            "address /{} does not name a deployment",
            address.join("/")
        ))),
    }
}

/// Record one update in a domain model
///
/// Deployment operations keep the deployment table that plans and name
/// checks read. Any other update is stored as an attribute under its
/// address. Returns whether the update must be pushed to servers; the
/// model is untouched when the update is rejected.
pub fn apply_to_domain_model(
    model: &mut DomainModel,
    update: &DomainModelUpdate,
) -> Result<bool, UpdateFailure> {
    let reaches_servers = match update.operation.as_str() {
        REJECTED_OPERATION => return Err(rejected(format!("update {} rejected", update))),
        "add-deployment" => {
            let name = deployment_name(&update.address)?;
            let hash = update
                .value
                .as_deref()
                .ok_or_else(|| rejected("add-deployment needs a content hash"))?;
            if model.deployments.contains_key(name) {
                return Err(rejected(format!("deployment {} already exists", name)));
            }
            model.deployments.insert(
                name.to_string(),
                DeploymentUnit {
                    name: name.to_string(),
                    runtime_name: name.to_string(),
                    hash: hash.to_string(),
                },
            );
            false
        }
        "remove-deployment" => {
            let name = deployment_name(&update.address)?;
            model
                .deployments
                .remove(name)
                .ok_or_else(|| not_found(format!("no deployment {}", name)))?;
            false
        }
        "deploy" | "redeploy" | "undeploy" | "replace-deployment" => {
            let name = deployment_name(&update.address)?;
            if !model.deployments.contains_key(name) {
                return Err(not_found(format!("no deployment {}", name)));
            }
            true
        }
        _ => {
            model.attributes.insert(
                update.address.join("/"),
                update.value.clone().unwrap_or_default(),
            );
            true
        }
    };
    model.revision += 1;
    Ok(reaches_servers)
}

/// Record one update in a server's runtime model
///
/// Returns the deployment name for operations that leave something
/// deployed.
pub fn apply_to_server_model(
    model: &mut ServerModel,
    update: &ServerModelUpdate,
) -> Result<Option<String>, UpdateFailure> {
    let result = match update.operation.as_str() {
        REJECTED_OPERATION => return Err(rejected("update rejected by server")),
        "deploy" | "redeploy" | "replace" => {
            let name = deployment_name(&update.address)?;
            if let Some(old) = update.value.as_deref() {
                model.deployments.retain(|d| d != old);
            }
            if !model.deployments.iter().any(|d| d == name) {
                model.deployments.push(name.to_string());
            }
            Some(name.to_string())
        }
        "undeploy" => {
            let name = deployment_name(&update.address)?;
            model.deployments.retain(|d| d != name);
            None
        }
        _ => None,
    };
    model.revision += 1;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_table() {
        let mut model = DomainModel::default();
        let add = DomainModelUpdate::new("add-deployment", &["deployment", "app.war"])
            .with_value("abcd");
        assert_eq!(apply_to_domain_model(&mut model, &add), Ok(false));
        assert!(apply_to_domain_model(&mut model, &add).is_err());

        let deploy = DomainModelUpdate::new("deploy", &["deployment", "app.war"]);
        assert_eq!(apply_to_domain_model(&mut model, &deploy), Ok(true));
        let missing = DomainModelUpdate::new("deploy", &["deployment", "other.war"]);
        let failure = apply_to_domain_model(&mut model, &missing).unwrap_err();
        assert_eq!(failure.code, error_codes::NOT_FOUND);
        assert_eq!(model.revision, 2);
    }

    #[test]
    fn test_other_updates_recorded_as_attributes() {
        let mut model = DomainModel::default();
        let update = DomainModelUpdate::new("write-attribute", &["profile", "web", "timeout"])
            .with_value("30");
        assert_eq!(apply_to_domain_model(&mut model, &update), Ok(true));
        assert_eq!(
            model.attributes.get("profile/web/timeout").map(String::as_str),
            Some("30")
        );
    }

    #[test]
    fn test_rejected_operation_leaves_model() {
        let mut model = DomainModel::default();
        let update = DomainModelUpdate::new(REJECTED_OPERATION, &[]);
        let failure = apply_to_domain_model(&mut model, &update).unwrap_err();
        assert_eq!(failure.code, error_codes::UPDATE_REJECTED);
        assert_eq!(model, DomainModel::default());
    }

    #[test]
    fn test_server_deploy_undeploy() {
        let mut model = ServerModel::default();
        let deploy = ServerModelUpdate::new("deploy", &["deployment", "app.war"]);
        assert_eq!(
            apply_to_server_model(&mut model, &deploy).unwrap().as_deref(),
            Some("app.war")
        );
        let undeploy = ServerModelUpdate::new("undeploy", &["deployment", "app.war"]);
        assert_eq!(apply_to_server_model(&mut model, &undeploy), Ok(None));
        assert!(model.deployments.is_empty());
        assert_eq!(model.revision, 2);
    }
}

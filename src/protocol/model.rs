//! Model value objects carried by the protocol
//!
//! The protocol moves these intact; it never interprets update contents.
//! Every type that travels as an object field implements [`WireObject`]
//! and is listed in [`WIRE_TYPES`] so the default resolver accepts it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::codec::WireObject;

macro_rules! wire_object {
    ($ty:ty, $name:literal) => {
        impl WireObject for $ty {
            const TYPE_NAME: &'static str = $name;
        }
    };
}

/// Type names accepted by [`TypeResolver::protocol_types`](super::codec::TypeResolver::protocol_types)
pub const WIRE_TYPES: &[&str] = &[
    "domainwire.ServerIdentity",
    "domainwire.DomainModelUpdate",
    "domainwire.HostModelUpdate",
    "domainwire.ServerModelUpdate",
    "domainwire.UpdateFailure",
    "domainwire.DomainUpdateResult",
    "domainwire.DomainUpdateApplierResponse",
    "domainwire.HostUpdateResult",
    "domainwire.ServerUpdateResult",
    "domainwire.ServerStatus",
    "domainwire.DomainModel",
    "domainwire.HostModel",
    "domainwire.ServerModel",
    "domainwire.DeploymentPlan",
    "domainwire.PlanEventValue",
];

/// Composite key identifying one managed server process
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub host_name: String,
    pub server_group_name: String,
    pub server_name: String,
}

impl ServerIdentity {
    pub fn new(host_name: &str, server_group_name: &str, server_name: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            server_group_name: server_group_name.to_string(),
            server_name: server_name.to_string(),
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.host_name, self.server_group_name, self.server_name
        )
    }
}

wire_object!(ServerIdentity, "domainwire.ServerIdentity");

macro_rules! model_update {
    ($(#[$meta:meta])* $ty:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $ty {
            /// Operation name, e.g. `add-deployment`
            pub operation: String,
            /// Address of the model element the update targets
            pub address: Vec<String>,
            /// Optional operation argument
            #[serde(default)]
            pub value: Option<String>,
        }

        impl $ty {
            pub fn new(operation: &str, address: &[&str]) -> Self {
                Self {
                    operation: operation.to_string(),
                    address: address.iter().map(|s| s.to_string()).collect(),
                    value: None,
                }
            }

            pub fn with_value(mut self, value: &str) -> Self {
                self.value = Some(value.to_string());
                self
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}@/{}", self.operation, self.address.join("/"))
            }
        }

        wire_object!($ty, $name);
    };
}

model_update!(
    /// Change descriptor for the domain-wide model
    DomainModelUpdate,
    "domainwire.DomainModelUpdate"
);
model_update!(
    /// Change descriptor for one host's model
    HostModelUpdate,
    "domainwire.HostModelUpdate"
);
model_update!(
    /// Change descriptor for one server's runtime model
    ServerModelUpdate,
    "domainwire.ServerModelUpdate"
);

/// Application-level failure carried inside a well-formed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFailure {
    pub code: u32,
    pub message: String,
}

impl UpdateFailure {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for UpdateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

wire_object!(UpdateFailure, "domainwire.UpdateFailure");

/// Error codes for [`UpdateFailure`]
pub mod error_codes {
    pub const UPDATE_REJECTED: u32 = 1;
    pub const NOT_FOUND: u32 = 2;
    pub const PLAN_INVALID: u32 = 3;
    pub const PLAN_EXECUTOR_FAILED: u32 = 4;
    pub const HOST_UNREACHABLE: u32 = 5;
    pub const INTERNAL_ERROR: u32 = 100;
}

/// Outcome of one update in a batched domain update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUpdateResult {
    pub domain_failure: Option<UpdateFailure>,
    pub host_failures: BTreeMap<String, UpdateFailure>,
    pub server_failures: BTreeMap<ServerIdentity, UpdateFailure>,
    pub server_results: BTreeMap<ServerIdentity, String>,
}

impl DomainUpdateResult {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failed(failure: UpdateFailure) -> Self {
        Self {
            domain_failure: Some(failure),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.domain_failure.is_none()
            && self.host_failures.is_empty()
            && self.server_failures.is_empty()
    }
}

wire_object!(DomainUpdateResult, "domainwire.DomainUpdateResult");

/// Outcome of applying a single update to the domain model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUpdateApplierResponse {
    pub domain_failure: Option<UpdateFailure>,
    pub host_failures: BTreeMap<String, UpdateFailure>,
    /// Servers the update must subsequently be pushed to
    pub servers: Vec<ServerIdentity>,
}

impl DomainUpdateApplierResponse {
    pub fn failed(failure: UpdateFailure) -> Self {
        Self {
            domain_failure: Some(failure),
            ..Default::default()
        }
    }

    pub fn applied(servers: Vec<ServerIdentity>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }
}

wire_object!(DomainUpdateApplierResponse, "domainwire.DomainUpdateApplierResponse");

/// Outcome of one host model update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostUpdateResult {
    Applied { servers: Vec<String> },
    Failed(UpdateFailure),
}

wire_object!(HostUpdateResult, "domainwire.HostUpdateResult");

/// Outcome of one server model update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerUpdateResult {
    Success(Option<String>),
    Failed(UpdateFailure),
    Cancelled,
    TimedOut,
}

impl ServerUpdateResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ServerUpdateResult::Success(_))
    }
}

wire_object!(ServerUpdateResult, "domainwire.ServerUpdateResult");

/// Lifecycle status of a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Disabled,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    DoesNotExist,
    Unknown,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Disabled => "DISABLED",
            ServerStatus::Starting => "STARTING",
            ServerStatus::Started => "STARTED",
            ServerStatus::Stopping => "STOPPING",
            ServerStatus::Stopped => "STOPPED",
            ServerStatus::Failed => "FAILED",
            ServerStatus::DoesNotExist => "DOES_NOT_EXIST",
            ServerStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

wire_object!(ServerStatus, "domainwire.ServerStatus");

/// Deployment registered in the domain model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    pub name: String,
    pub runtime_name: String,
    /// Hex-encoded content hash
    pub hash: String,
}

/// Domain-wide configuration model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainModel {
    pub revision: u64,
    pub deployments: BTreeMap<String, DeploymentUnit>,
    /// Attribute values set through updates, keyed by address
    pub attributes: BTreeMap<String, String>,
}

wire_object!(DomainModel, "domainwire.DomainModel");

/// One host controller's model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostModel {
    pub name: String,
    pub revision: u64,
    /// Server name to server group name
    pub servers: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, String>,
}

wire_object!(HostModel, "domainwire.HostModel");

/// One server's runtime model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerModel {
    pub server_name: String,
    pub server_group_name: String,
    pub revision: u64,
    pub deployments: Vec<String>,
}

wire_object!(ServerModel, "domainwire.ServerModel");

/// What a deployment action does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentActionKind {
    Add,
    Deploy,
    Redeploy,
    Undeploy,
    Replace,
    Remove,
}

/// One step of a deployment plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAction {
    pub id: Uuid,
    pub kind: DeploymentActionKind,
    pub deployment_name: String,
    /// Hex content hash, for `Add`
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Deployment being replaced, for `Replace`
    #[serde(default)]
    pub replaced: Option<String>,
}

impl DeploymentAction {
    pub fn new(kind: DeploymentActionKind, deployment_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            deployment_name: deployment_name.to_string(),
            content_hash: None,
            replaced: None,
        }
    }

    pub fn with_content(mut self, hash: &str) -> Self {
        self.content_hash = Some(hash.to_string());
        self
    }

    pub fn replacing(mut self, old: &str) -> Self {
        self.replaced = Some(old.to_string());
        self
    }
}

/// Ordered set of deployment actions executed as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub id: Uuid,
    pub actions: Vec<DeploymentAction>,
    pub rollback_on_failure: bool,
    /// Graceful shutdown timeout for affected servers, in milliseconds
    #[serde(default)]
    pub graceful_shutdown_timeout: Option<i64>,
}

impl DeploymentPlan {
    pub fn new(actions: Vec<DeploymentAction>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actions,
            rollback_on_failure: false,
            graceful_shutdown_timeout: None,
        }
    }

    pub fn with_rollback(mut self) -> Self {
        self.rollback_on_failure = true;
        self
    }
}

wire_object!(DeploymentPlan, "domainwire.DeploymentPlan");

/// Value attached to a streamed deployment-plan item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanEventValue {
    Id(Uuid),
    Name(String),
    Server(ServerIdentity),
    ModelResult(DomainUpdateApplierResponse),
    ServerResult(ServerUpdateResult),
    Failure(UpdateFailure),
}

wire_object!(PlanEventValue, "domainwire.PlanEventValue");

/// Content address of stored deployment bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(pub Vec<u8>);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

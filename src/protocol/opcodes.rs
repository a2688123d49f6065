//! Opcode registry
//!
//! Fixed byte tables for both protocol families plus the marker bytes that
//! frame individual fields. Values are part of the published wire surface;
//! changing any of them requires a [`PROTOCOL_VERSION`](super::PROTOCOL_VERSION) bump.

use std::fmt;

/// Selects which dispatcher table handles a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HandlerId {
    /// Requests bound for the domain controller
    DomainController = 0x01,
    /// Requests bound for a host's server manager
    ServerManager = 0x02,
}

impl HandlerId {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(HandlerId::DomainController),
            0x02 => Some(HandlerId::ServerManager),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// The opcode table for this family
    pub fn table(self) -> &'static [OpcodeEntry] {
        match self {
            HandlerId::DomainController => domain_controller::TABLE,
            HandlerId::ServerManager => server_manager::TABLE,
        }
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerId::DomainController => write!(f, "domain-controller"),
            HandlerId::ServerManager => write!(f, "server-manager"),
        }
    }
}

/// One request/response pair of a family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeEntry {
    pub name: &'static str,
    pub request: u8,
    pub response: u8,
}

const fn entry(name: &'static str, request: u8, response: u8) -> OpcodeEntry {
    OpcodeEntry { name, request, response }
}

/// Look up the response opcode paired with `request` in a family table
pub fn response_for(handler: HandlerId, request: u8) -> Option<u8> {
    handler
        .table()
        .iter()
        .find(|e| e.request == request)
        .map(|e| e.response)
}

/// Domain-controller-facing family
pub mod domain_controller {
    use super::{entry, OpcodeEntry};

    pub const GET_DOMAIN_REQUEST: u8 = 0x01;
    pub const GET_DOMAIN_RESPONSE: u8 = 0x02;
    pub const APPLY_UPDATES_REQUEST: u8 = 0x03;
    pub const APPLY_UPDATES_RESPONSE: u8 = 0x04;
    pub const APPLY_UPDATE_REQUEST: u8 = 0x05;
    pub const APPLY_UPDATE_RESPONSE: u8 = 0x06;
    pub const EXECUTE_DEPLOYMENT_PLAN_REQUEST: u8 = 0x07;
    pub const EXECUTE_DEPLOYMENT_PLAN_RESPONSE: u8 = 0x08;
    pub const ADD_DEPLOYMENT_CONTENT_REQUEST: u8 = 0x09;
    pub const ADD_DEPLOYMENT_CONTENT_RESPONSE: u8 = 0x0A;
    pub const CHECK_UNIQUE_DEPLOYMENT_NAME_REQUEST: u8 = 0x0B;
    pub const CHECK_UNIQUE_DEPLOYMENT_NAME_RESPONSE: u8 = 0x0C;
    pub const APPLY_SERVER_MODEL_UPDATE_REQUEST: u8 = 0x0D;
    pub const APPLY_SERVER_MODEL_UPDATE_RESPONSE: u8 = 0x0E;
    pub const APPLY_HOST_UPDATES_REQUEST: u8 = 0x0F;
    pub const APPLY_HOST_UPDATES_RESPONSE: u8 = 0x10;
    pub const GET_HOST_MODEL_REQUEST: u8 = 0x11;
    pub const GET_HOST_MODEL_RESPONSE: u8 = 0x12;
    pub const GET_HOST_CONTROLLER_NAMES_REQUEST: u8 = 0x13;
    pub const GET_HOST_CONTROLLER_NAMES_RESPONSE: u8 = 0x14;
    pub const GET_SERVER_STATUSES_REQUEST: u8 = 0x15;
    pub const GET_SERVER_STATUSES_RESPONSE: u8 = 0x16;
    pub const GET_SERVER_MODEL_REQUEST: u8 = 0x17;
    pub const GET_SERVER_MODEL_RESPONSE: u8 = 0x18;
    pub const START_SERVER_REQUEST: u8 = 0x19;
    pub const START_SERVER_RESPONSE: u8 = 0x1A;
    pub const STOP_SERVER_REQUEST: u8 = 0x1B;
    pub const STOP_SERVER_RESPONSE: u8 = 0x1C;
    pub const RESTART_SERVER_REQUEST: u8 = 0x1D;
    pub const RESTART_SERVER_RESPONSE: u8 = 0x1E;

    pub const TABLE: &[OpcodeEntry] = &[
        entry("GET_DOMAIN", GET_DOMAIN_REQUEST, GET_DOMAIN_RESPONSE),
        entry("APPLY_UPDATES", APPLY_UPDATES_REQUEST, APPLY_UPDATES_RESPONSE),
        entry("APPLY_UPDATE", APPLY_UPDATE_REQUEST, APPLY_UPDATE_RESPONSE),
        entry(
            "EXECUTE_DEPLOYMENT_PLAN",
            EXECUTE_DEPLOYMENT_PLAN_REQUEST,
            EXECUTE_DEPLOYMENT_PLAN_RESPONSE,
        ),
        entry(
            "ADD_DEPLOYMENT_CONTENT",
            ADD_DEPLOYMENT_CONTENT_REQUEST,
            ADD_DEPLOYMENT_CONTENT_RESPONSE,
        ),
        entry(
            "CHECK_UNIQUE_DEPLOYMENT_NAME",
            CHECK_UNIQUE_DEPLOYMENT_NAME_REQUEST,
            CHECK_UNIQUE_DEPLOYMENT_NAME_RESPONSE,
        ),
        entry(
            "APPLY_SERVER_MODEL_UPDATE",
            APPLY_SERVER_MODEL_UPDATE_REQUEST,
            APPLY_SERVER_MODEL_UPDATE_RESPONSE,
        ),
        entry("APPLY_HOST_UPDATES", APPLY_HOST_UPDATES_REQUEST, APPLY_HOST_UPDATES_RESPONSE),
        entry("GET_HOST_MODEL", GET_HOST_MODEL_REQUEST, GET_HOST_MODEL_RESPONSE),
        entry(
            "GET_HOST_CONTROLLER_NAMES",
            GET_HOST_CONTROLLER_NAMES_REQUEST,
            GET_HOST_CONTROLLER_NAMES_RESPONSE,
        ),
        entry("GET_SERVER_STATUSES", GET_SERVER_STATUSES_REQUEST, GET_SERVER_STATUSES_RESPONSE),
        entry("GET_SERVER_MODEL", GET_SERVER_MODEL_REQUEST, GET_SERVER_MODEL_RESPONSE),
        entry("START_SERVER", START_SERVER_REQUEST, START_SERVER_RESPONSE),
        entry("STOP_SERVER", STOP_SERVER_REQUEST, STOP_SERVER_RESPONSE),
        entry("RESTART_SERVER", RESTART_SERVER_REQUEST, RESTART_SERVER_RESPONSE),
    ];
}

/// Server-manager-facing family
pub mod server_manager {
    use super::{entry, OpcodeEntry};

    pub const IS_ACTIVE_REQUEST: u8 = 0x01;
    pub const IS_ACTIVE_RESPONSE: u8 = 0x02;
    pub const GET_HOST_MODEL_REQUEST: u8 = 0x03;
    pub const GET_HOST_MODEL_RESPONSE: u8 = 0x04;
    pub const GET_SERVER_MODEL_REQUEST: u8 = 0x05;
    pub const GET_SERVER_MODEL_RESPONSE: u8 = 0x06;
    pub const UPDATE_FULL_DOMAIN_REQUEST: u8 = 0x07;
    pub const UPDATE_FULL_DOMAIN_RESPONSE: u8 = 0x08;
    pub const UPDATE_DOMAIN_MODEL_REQUEST: u8 = 0x09;
    pub const UPDATE_DOMAIN_MODEL_RESPONSE: u8 = 0x0A;
    pub const UPDATE_HOST_MODEL_REQUEST: u8 = 0x0B;
    pub const UPDATE_HOST_MODEL_RESPONSE: u8 = 0x0C;
    pub const UPDATE_SERVER_MODEL_REQUEST: u8 = 0x0D;
    pub const UPDATE_SERVER_MODEL_RESPONSE: u8 = 0x0E;
    pub const GET_SERVER_LIST_REQUEST: u8 = 0x0F;
    pub const GET_SERVER_LIST_RESPONSE: u8 = 0x10;
    pub const START_SERVER_REQUEST: u8 = 0x11;
    pub const START_SERVER_RESPONSE: u8 = 0x12;
    pub const STOP_SERVER_REQUEST: u8 = 0x13;
    pub const STOP_SERVER_RESPONSE: u8 = 0x14;
    pub const RESTART_SERVER_REQUEST: u8 = 0x15;
    pub const RESTART_SERVER_RESPONSE: u8 = 0x16;

    pub const TABLE: &[OpcodeEntry] = &[
        entry("IS_ACTIVE", IS_ACTIVE_REQUEST, IS_ACTIVE_RESPONSE),
        entry("GET_HOST_MODEL", GET_HOST_MODEL_REQUEST, GET_HOST_MODEL_RESPONSE),
        entry("GET_SERVER_MODEL", GET_SERVER_MODEL_REQUEST, GET_SERVER_MODEL_RESPONSE),
        entry("UPDATE_FULL_DOMAIN", UPDATE_FULL_DOMAIN_REQUEST, UPDATE_FULL_DOMAIN_RESPONSE),
        entry("UPDATE_DOMAIN_MODEL", UPDATE_DOMAIN_MODEL_REQUEST, UPDATE_DOMAIN_MODEL_RESPONSE),
        entry("UPDATE_HOST_MODEL", UPDATE_HOST_MODEL_REQUEST, UPDATE_HOST_MODEL_RESPONSE),
        entry("UPDATE_SERVER_MODEL", UPDATE_SERVER_MODEL_REQUEST, UPDATE_SERVER_MODEL_RESPONSE),
        entry("GET_SERVER_LIST", GET_SERVER_LIST_REQUEST, GET_SERVER_LIST_RESPONSE),
        entry("START_SERVER", START_SERVER_REQUEST, START_SERVER_RESPONSE),
        entry("STOP_SERVER", STOP_SERVER_REQUEST, STOP_SERVER_RESPONSE),
        entry("RESTART_SERVER", RESTART_SERVER_REQUEST, RESTART_SERVER_RESPONSE),
    ];
}

/// Markers preceding request fields
pub mod params {
    pub const PARAM_DOMAIN_MODEL: u8 = 0x20;
    pub const PARAM_DOMAIN_MODEL_UPDATE: u8 = 0x21;
    pub const PARAM_HOST_MODEL_UPDATE: u8 = 0x22;
    pub const PARAM_SERVER_MODEL_UPDATE: u8 = 0x23;
    pub const PARAM_UPDATE_COUNT: u8 = 0x24;
    pub const PARAM_HOST_NAME: u8 = 0x25;
    pub const PARAM_SERVER_GROUP_NAME: u8 = 0x26;
    pub const PARAM_SERVER_NAME: u8 = 0x27;
    pub const PARAM_DEPLOYMENT_PLAN: u8 = 0x28;
    pub const PARAM_DEPLOYMENT_NAME: u8 = 0x29;
    pub const PARAM_DEPLOYMENT_RUNTIME_NAME: u8 = 0x2A;
    pub const PARAM_DEPLOYMENT_CONTENT: u8 = 0x2B;
    pub const PARAM_GRACEFUL_TIMEOUT: u8 = 0x2C;
    pub const PARAM_ALLOW_ROLLBACK: u8 = 0x2D;
}

/// Markers preceding response fields
pub mod returns {
    pub const RETURN_DOMAIN_MODEL: u8 = 0x40;
    pub const RETURN_UPDATE_RESULT_COUNT: u8 = 0x41;
    pub const RETURN_APPLY_UPDATE: u8 = 0x42;
    pub const RETURN_APPLY_HOST_UPDATE: u8 = 0x43;
    pub const RETURN_APPLY_SERVER_MODEL_UPDATE: u8 = 0x44;
    pub const RETURN_HOST_MODEL: u8 = 0x45;
    pub const RETURN_HOST_CONTROLLER_COUNT: u8 = 0x46;
    pub const RETURN_HOST_NAME: u8 = 0x47;
    pub const RETURN_SERVER_GROUP_NAME: u8 = 0x48;
    pub const RETURN_SERVER_NAME: u8 = 0x49;
    pub const RETURN_SERVER_STATUS: u8 = 0x4A;
    pub const RETURN_SERVER_STATUS_COUNT: u8 = 0x4B;
    pub const RETURN_SERVER_MODEL: u8 = 0x4C;
    pub const RETURN_DEPLOYMENT_HASH_LENGTH: u8 = 0x4D;
    pub const RETURN_DEPLOYMENT_HASH: u8 = 0x4E;
    pub const RETURN_DEPLOYMENT_NAME_UNIQUE: u8 = 0x4F;

    // Field-encoded update results
    pub const RETURN_UPDATE_FAILURE: u8 = 0x50;
    pub const RETURN_UPDATE_SUCCESS: u8 = 0x51;
    pub const RETURN_HOST_FAILURE_COUNT: u8 = 0x52;
    pub const RETURN_SERVER_COUNT: u8 = 0x53;
    pub const RETURN_UPDATE_CANCELLED: u8 = 0x54;
    pub const RETURN_UPDATE_TIMED_OUT: u8 = 0x55;
    pub const RETURN_UPDATE_RESULT: u8 = 0x56;
    pub const RETURN_ACTIVE: u8 = 0x57;
}

/// Protocol values of streamed deployment-plan items
pub mod plan {
    pub const RETURN_DEPLOYMENT_PLAN_ID: u8 = 0x60;
    pub const RETURN_DEPLOYMENT_PLAN_INVALID: u8 = 0x61;
    pub const RETURN_DEPLOYMENT_SET_ID: u8 = 0x62;
    pub const RETURN_DEPLOYMENT_SET_ROLLBACK: u8 = 0x63;
    pub const RETURN_DEPLOYMENT_ACTION_ID: u8 = 0x64;
    pub const RETURN_DEPLOYMENT_ACTION_MODEL_RESULT: u8 = 0x65;
    pub const RETURN_SERVER_DEPLOYMENT: u8 = 0x66;
    pub const RETURN_SERVER_DEPLOYMENT_ROLLBACK: u8 = 0x67;
    pub const RETURN_SERVER_DEPLOYMENT_RESULT: u8 = 0x68;
    pub const RETURN_DEPLOYMENT_PLAN_COMPLETE: u8 = 0x69;
    pub const RETURN_DEPLOYMENT_PLAN_FAILED: u8 = 0x6A;

    /// Whether an item with this protocol value is followed by a value object
    pub fn carries_value(protocol_value: u8) -> bool {
        protocol_value != RETURN_DEPLOYMENT_PLAN_COMPLETE
    }

    /// Whether this is a known streamed protocol value
    pub fn is_known(protocol_value: u8) -> bool {
        (RETURN_DEPLOYMENT_PLAN_ID..=RETURN_DEPLOYMENT_PLAN_FAILED).contains(&protocol_value)
    }
}

/// Structural markers owned by the envelope, codec and chunk framing
pub mod framing {
    pub const REQUEST_OPERATION: u8 = 0x90;
    pub const RESPONSE_END: u8 = 0x91;
    pub const STREAM_START: u8 = 0x7A;
    pub const STREAM_END: u8 = 0x7B;
    pub const CHUNK_START: u8 = 0x98;
    pub const CHUNK_END: u8 = 0x99;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_unique(table: &[OpcodeEntry]) {
        let mut requests = HashSet::new();
        let mut responses = HashSet::new();
        for e in table {
            assert!(requests.insert(e.request), "duplicate request {:#x}", e.request);
            assert!(responses.insert(e.response), "duplicate response {:#x}", e.response);
        }
    }

    #[test]
    fn test_tables_are_one_to_one() {
        assert_unique(domain_controller::TABLE);
        assert_unique(server_manager::TABLE);
    }

    #[test]
    fn test_response_lookup() {
        assert_eq!(
            response_for(HandlerId::DomainController, domain_controller::APPLY_UPDATES_REQUEST),
            Some(domain_controller::APPLY_UPDATES_RESPONSE)
        );
        assert_eq!(
            response_for(HandlerId::ServerManager, server_manager::IS_ACTIVE_REQUEST),
            Some(server_manager::IS_ACTIVE_RESPONSE)
        );
        assert_eq!(response_for(HandlerId::DomainController, 0xEE), None);
    }

    #[test]
    fn test_handler_id_roundtrip() {
        for id in [HandlerId::DomainController, HandlerId::ServerManager] {
            assert_eq!(HandlerId::from_byte(id.as_byte()), Some(id));
        }
        assert_eq!(HandlerId::from_byte(0x00), None);
    }

    #[test]
    fn test_plan_values_avoid_framing_markers() {
        for value in plan::RETURN_DEPLOYMENT_PLAN_ID..=plan::RETURN_DEPLOYMENT_PLAN_FAILED {
            assert_ne!(value, framing::STREAM_END);
            assert_ne!(value, framing::STREAM_START);
        }
        assert!(!plan::carries_value(plan::RETURN_DEPLOYMENT_PLAN_COMPLETE));
        assert!(plan::carries_value(plan::RETURN_DEPLOYMENT_PLAN_ID));
    }
}

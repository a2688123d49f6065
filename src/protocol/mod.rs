//! Protocol module - Defines the wire protocol spoken between the domain
//! controller and remote host/server-manager processes
//!
//! Every connection turn is one request envelope followed by one response
//! envelope:
//! - 4 bytes magic, 4 bytes protocol version (big-endian)
//! - 1 byte handler id selecting the opcode family (requests only)
//! - 1 byte operation opcode
//! - Marker-prefixed body, codec framed or raw depending on the operation

pub mod chunked;
pub mod codec;
pub mod envelope;
pub mod fields;
pub mod model;
pub mod opcodes;
pub mod streamed;

pub use codec::*;
pub use model::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port for management connections
pub const DEFAULT_PORT: u16 = 9999;

/// Magic bytes for protocol identification
pub const MAGIC_BYTES: [u8; 4] = [0x44, 0x57, 0x49, 0x52]; // "DWIR"

/// Default chunk size for deployment content (64 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default capacity of the streamed-response queue, in batches
pub const DEFAULT_STREAM_QUEUE_CAPACITY: usize = 32;

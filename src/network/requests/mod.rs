//! Typed request stubs for both protocol families
//!
//! Each stub implements [`ManagementRequest`](super::ManagementRequest) and
//! mirrors the field order of the matching handler through
//! [`crate::protocol::fields`].

pub mod domain;
pub mod server_manager;

pub use domain::DomainClient;
pub use server_manager::ServerManagerClient;

use tokio::io::{AsyncRead, AsyncWrite};

use super::RequestSettings;
use crate::protocol::{Marshaller, ProtocolError, ProtocolResult, Unmarshaller};

/// Reject a batched response that does not answer every update
fn check_count(expected: usize, actual: usize) -> ProtocolResult<()> {
    if expected != actual {
        return Err(ProtocolError::ResponseCountMismatch { expected, actual });
    }
    Ok(())
}

/// Codec frame with no fields
async fn send_empty(
    settings: &RequestSettings,
    output: &mut (dyn AsyncWrite + Unpin + Send),
) -> ProtocolResult<()> {
    Marshaller::start(output, &settings.codec).await?.finish().await
}

async fn receive_empty(
    settings: &RequestSettings,
    input: &mut (dyn AsyncRead + Unpin + Send),
) -> ProtocolResult<()> {
    Unmarshaller::start(input, &settings.codec).await?.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mismatch() {
        assert!(check_count(3, 3).is_ok());
        assert!(matches!(
            check_count(3, 2),
            Err(ProtocolError::ResponseCountMismatch { expected: 3, actual: 2 })
        ));
    }
}

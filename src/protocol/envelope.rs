//! Request and response envelopes
//!
//! Every request starts with the magic/version preamble, the handler id
//! and the opcode; every response starts with the preamble and the
//! response opcode and ends with [`RESPONSE_END`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::codec::{expect_header, ProtocolError, ProtocolResult};
use super::opcodes::framing::{REQUEST_OPERATION, RESPONSE_END};
use super::opcodes::HandlerId;
use super::{MAGIC_BYTES, PROTOCOL_VERSION};

/// Decoded request preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Raw handler id byte, resolved by the dispatcher
    pub handler_id: u8,
    pub opcode: u8,
}

async fn write_preamble<W>(output: &mut W) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    output.write_all(&MAGIC_BYTES).await?;
    output.write_u32(PROTOCOL_VERSION).await?;
    Ok(())
}

async fn check_version<R>(input: &mut R) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let remote = input.read_u32().await?;
    if remote != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote,
        });
    }
    Ok(())
}

async fn read_preamble<R>(input: &mut R) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).await?;
    if magic != MAGIC_BYTES {
        return Err(ProtocolError::InvalidMagic);
    }
    check_version(&mut *input).await
}

/// Write the request preamble, handler id and opcode
pub async fn write_request_header<W>(
    output: &mut W,
    handler: HandlerId,
    opcode: u8,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_preamble(&mut *output).await?;
    output.write_u8(handler.as_byte()).await?;
    output.write_u8(REQUEST_OPERATION).await?;
    output.write_u8(opcode).await?;
    Ok(())
}

/// Read a request preamble
///
/// Returns `None` when the peer closed the connection cleanly between
/// requests.
pub async fn read_request_header<R>(input: &mut R) -> ProtocolResult<Option<RequestHeader>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut magic = [0u8; 4];
    let first = input.read(&mut magic[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    input.read_exact(&mut magic[1..]).await?;
    if magic != MAGIC_BYTES {
        return Err(ProtocolError::InvalidMagic);
    }
    check_version(&mut *input).await?;

    let handler_id = input.read_u8().await?;
    expect_header(&mut *input, REQUEST_OPERATION).await?;
    let opcode = input.read_u8().await?;
    Ok(Some(RequestHeader { handler_id, opcode }))
}

/// Write the response preamble and response opcode
pub async fn write_response_header<W>(output: &mut W, response_opcode: u8) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_preamble(&mut *output).await?;
    output.write_u8(response_opcode).await?;
    Ok(())
}

/// Read the response preamble and check the response opcode
pub async fn read_response_header<R>(input: &mut R, expected: u8) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_preamble(&mut *input).await?;
    let actual = input.read_u8().await?;
    if actual != expected {
        return Err(ProtocolError::UnexpectedResponse { expected, actual });
    }
    Ok(())
}

/// Terminate a response and flush it to the peer
pub async fn write_response_end<W>(output: &mut W) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    output.write_u8(RESPONSE_END).await?;
    output.flush().await?;
    Ok(())
}

pub async fn read_response_end<R>(input: &mut R) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    expect_header(input, RESPONSE_END).await
}

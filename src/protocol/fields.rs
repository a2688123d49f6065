//! Field encodings shared by handlers and request stubs
//!
//! Both sides of an operation go through these helpers so the field order
//! is written down exactly once.

use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::codec::{
    expect_header, read_count, read_utf, write_utf, Marshaller, ProtocolError, ProtocolResult,
    Unmarshaller, WireObject,
};
use super::model::{
    ContentHash, DomainUpdateApplierResponse, ServerIdentity, ServerStatus, ServerUpdateResult, UpdateFailure,
};
use super::opcodes::returns::*;

/// Upper bound on up-front allocation for a received count
const MAX_PREALLOCATE: usize = 1024;

/// `count_marker count, count x (item_marker object)`
pub async fn write_object_list<W, T>(
    m: &mut Marshaller<'_, W>,
    count_marker: u8,
    item_marker: u8,
    items: &[T],
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: WireObject,
{
    m.write_byte(count_marker).await?;
    m.write_count(items.len()).await?;
    for item in items {
        m.write_byte(item_marker).await?;
        m.write_object(item).await?;
    }
    Ok(())
}

pub async fn read_object_list<R, T>(
    u: &mut Unmarshaller<'_, R>,
    count_marker: u8,
    item_marker: u8,
) -> ProtocolResult<Vec<T>>
where
    R: AsyncRead + Unpin + ?Sized,
    T: WireObject,
{
    u.expect_header(count_marker).await?;
    let count = u.read_count().await?;
    let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATE));
    for _ in 0..count {
        u.expect_header(item_marker).await?;
        items.push(u.read_object().await?);
    }
    Ok(items)
}

pub async fn write_identity<W>(m: &mut Marshaller<'_, W>, id: &ServerIdentity) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    m.write_byte(RETURN_HOST_NAME).await?;
    m.write_utf(&id.host_name).await?;
    m.write_byte(RETURN_SERVER_GROUP_NAME).await?;
    m.write_utf(&id.server_group_name).await?;
    m.write_byte(RETURN_SERVER_NAME).await?;
    m.write_utf(&id.server_name).await
}

pub async fn read_identity<R>(u: &mut Unmarshaller<'_, R>) -> ProtocolResult<ServerIdentity>
where
    R: AsyncRead + Unpin + ?Sized,
{
    u.expect_header(RETURN_HOST_NAME).await?;
    let host_name = u.read_utf().await?;
    u.expect_header(RETURN_SERVER_GROUP_NAME).await?;
    let server_group_name = u.read_utf().await?;
    u.expect_header(RETURN_SERVER_NAME).await?;
    let server_name = u.read_utf().await?;
    Ok(ServerIdentity {
        host_name,
        server_group_name,
        server_name,
    })
}

/// Domain failure, or host failures plus the affected servers
pub async fn write_applier_response<W>(
    m: &mut Marshaller<'_, W>,
    response: &DomainUpdateApplierResponse,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if let Some(failure) = &response.domain_failure {
        m.write_byte(RETURN_UPDATE_FAILURE).await?;
        return m.write_object(failure).await;
    }
    m.write_byte(RETURN_UPDATE_SUCCESS).await?;
    m.write_byte(RETURN_HOST_FAILURE_COUNT).await?;
    m.write_count(response.host_failures.len()).await?;
    for (host, failure) in &response.host_failures {
        m.write_byte(RETURN_HOST_NAME).await?;
        m.write_utf(host).await?;
        m.write_byte(RETURN_UPDATE_FAILURE).await?;
        m.write_object(failure).await?;
    }
    m.write_byte(RETURN_SERVER_COUNT).await?;
    m.write_count(response.servers.len()).await?;
    for server in &response.servers {
        write_identity(m, server).await?;
    }
    Ok(())
}

pub async fn read_applier_response<R>(
    u: &mut Unmarshaller<'_, R>,
) -> ProtocolResult<DomainUpdateApplierResponse>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match u.read_byte().await? {
        RETURN_UPDATE_FAILURE => {
            let failure: UpdateFailure = u.read_object().await?;
            return Ok(DomainUpdateApplierResponse::failed(failure));
        }
        RETURN_UPDATE_SUCCESS => {}
        actual => {
            return Err(ProtocolError::UnexpectedHeader {
                expected: RETURN_UPDATE_SUCCESS,
                actual,
            })
        }
    }

    u.expect_header(RETURN_HOST_FAILURE_COUNT).await?;
    let host_count = u.read_count().await?;
    let mut host_failures = BTreeMap::new();
    for _ in 0..host_count {
        u.expect_header(RETURN_HOST_NAME).await?;
        let host = u.read_utf().await?;
        u.expect_header(RETURN_UPDATE_FAILURE).await?;
        host_failures.insert(host, u.read_object().await?);
    }

    u.expect_header(RETURN_SERVER_COUNT).await?;
    let server_count = u.read_count().await?;
    let mut servers = Vec::with_capacity(server_count.min(MAX_PREALLOCATE));
    for _ in 0..server_count {
        servers.push(read_identity(u).await?);
    }

    Ok(DomainUpdateApplierResponse {
        domain_failure: None,
        host_failures,
        servers,
    })
}

pub async fn write_server_result<W>(
    m: &mut Marshaller<'_, W>,
    result: &ServerUpdateResult,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match result {
        ServerUpdateResult::Cancelled => m.write_byte(RETURN_UPDATE_CANCELLED).await,
        ServerUpdateResult::TimedOut => m.write_byte(RETURN_UPDATE_TIMED_OUT).await,
        ServerUpdateResult::Failed(failure) => {
            m.write_byte(RETURN_UPDATE_FAILURE).await?;
            m.write_object(failure).await
        }
        ServerUpdateResult::Success(value) => {
            m.write_byte(RETURN_UPDATE_RESULT).await?;
            m.write_bool(value.is_some()).await?;
            if let Some(value) = value {
                m.write_utf(value).await?;
            }
            Ok(())
        }
    }
}

pub async fn read_server_result<R>(u: &mut Unmarshaller<'_, R>) -> ProtocolResult<ServerUpdateResult>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match u.read_byte().await? {
        RETURN_UPDATE_CANCELLED => Ok(ServerUpdateResult::Cancelled),
        RETURN_UPDATE_TIMED_OUT => Ok(ServerUpdateResult::TimedOut),
        RETURN_UPDATE_FAILURE => Ok(ServerUpdateResult::Failed(u.read_object().await?)),
        RETURN_UPDATE_RESULT => {
            let value = if u.read_bool().await? {
                Some(u.read_utf().await?)
            } else {
                None
            };
            Ok(ServerUpdateResult::Success(value))
        }
        actual => Err(ProtocolError::UnexpectedHeader {
            expected: RETURN_UPDATE_RESULT,
            actual,
        }),
    }
}

/// `count_marker count, count x (identity, RETURN_SERVER_STATUS object)`
pub async fn write_server_statuses<W>(
    m: &mut Marshaller<'_, W>,
    count_marker: u8,
    statuses: &BTreeMap<ServerIdentity, ServerStatus>,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    m.write_byte(count_marker).await?;
    m.write_count(statuses.len()).await?;
    for (id, status) in statuses {
        write_identity(m, id).await?;
        m.write_byte(RETURN_SERVER_STATUS).await?;
        m.write_object(status).await?;
    }
    Ok(())
}

pub async fn read_server_statuses<R>(
    u: &mut Unmarshaller<'_, R>,
    count_marker: u8,
) -> ProtocolResult<BTreeMap<ServerIdentity, ServerStatus>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    u.expect_header(count_marker).await?;
    let count = u.read_count().await?;
    let mut statuses = BTreeMap::new();
    for _ in 0..count {
        let id = read_identity(u).await?;
        u.expect_header(RETURN_SERVER_STATUS).await?;
        statuses.insert(id, u.read_object().await?);
    }
    Ok(statuses)
}

/// `RETURN_UPDATE_RESULT_COUNT n, n x (item_marker, applier response)`
pub async fn write_applier_responses<W>(
    m: &mut Marshaller<'_, W>,
    item_marker: u8,
    responses: &[DomainUpdateApplierResponse],
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    m.write_byte(RETURN_UPDATE_RESULT_COUNT).await?;
    m.write_count(responses.len()).await?;
    for response in responses {
        m.write_byte(item_marker).await?;
        write_applier_response(m, response).await?;
    }
    Ok(())
}

pub async fn read_applier_responses<R>(
    u: &mut Unmarshaller<'_, R>,
    item_marker: u8,
) -> ProtocolResult<Vec<DomainUpdateApplierResponse>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    u.expect_header(RETURN_UPDATE_RESULT_COUNT).await?;
    let count = u.read_count().await?;
    let mut responses = Vec::with_capacity(count.min(MAX_PREALLOCATE));
    for _ in 0..count {
        u.expect_header(item_marker).await?;
        responses.push(read_applier_response(u).await?);
    }
    Ok(responses)
}

/// `RETURN_UPDATE_RESULT_COUNT n, n x (RETURN_APPLY_SERVER_MODEL_UPDATE, result)`
pub async fn write_server_results<W>(
    m: &mut Marshaller<'_, W>,
    results: &[ServerUpdateResult],
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    m.write_byte(RETURN_UPDATE_RESULT_COUNT).await?;
    m.write_count(results.len()).await?;
    for result in results {
        m.write_byte(RETURN_APPLY_SERVER_MODEL_UPDATE).await?;
        write_server_result(m, result).await?;
    }
    Ok(())
}

pub async fn read_server_results<R>(
    u: &mut Unmarshaller<'_, R>,
) -> ProtocolResult<Vec<ServerUpdateResult>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    u.expect_header(RETURN_UPDATE_RESULT_COUNT).await?;
    let count = u.read_count().await?;
    let mut results = Vec::with_capacity(count.min(MAX_PREALLOCATE));
    for _ in 0..count {
        u.expect_header(RETURN_APPLY_SERVER_MODEL_UPDATE).await?;
        results.push(read_server_result(u).await?);
    }
    Ok(results)
}

/// Upper bound on a received content hash
const MAX_HASH_LEN: usize = 1024;

/// `marker utf` written outside codec framing
pub async fn write_raw_utf<W>(output: &mut W, marker: u8, value: &str) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    output.write_u8(marker).await?;
    write_utf(output, value).await
}

pub async fn read_raw_utf<R>(input: &mut R, marker: u8) -> ProtocolResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    expect_header(&mut *input, marker).await?;
    read_utf(input).await
}

/// `RETURN_DEPLOYMENT_HASH_LENGTH int, RETURN_DEPLOYMENT_HASH bytes`, unframed
pub async fn write_deployment_hash<W>(output: &mut W, hash: &ContentHash) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    output.write_u8(RETURN_DEPLOYMENT_HASH_LENGTH).await?;
    output.write_i32(hash.as_bytes().len() as i32).await?;
    output.write_u8(RETURN_DEPLOYMENT_HASH).await?;
    output.write_all(hash.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

pub async fn read_deployment_hash<R>(input: &mut R) -> ProtocolResult<ContentHash>
where
    R: AsyncRead + Unpin + ?Sized,
{
    expect_header(&mut *input, RETURN_DEPLOYMENT_HASH_LENGTH).await?;
    let len = read_count(&mut *input).await?;
    if len > MAX_HASH_LEN {
        return Err(ProtocolError::ObjectTooLarge(len, MAX_HASH_LEN));
    }
    expect_header(&mut *input, RETURN_DEPLOYMENT_HASH).await?;
    let mut hash = vec![0u8; len];
    input.read_exact(&mut hash).await?;
    Ok(ContentHash(hash))
}

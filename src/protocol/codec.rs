//! Protocol codec for encoding/decoding request and response bodies
//!
//! Bodies are sequences of marker-prefixed fields. Object fields are
//! serialized with bincode behind a restricted type resolver; the
//! [`Marshaller`]/[`Unmarshaller`] pair adds explicit start/finish framing
//! so a reader can tell a complete body from a truncated one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::opcodes::framing::{STREAM_END, STREAM_START};
use super::opcodes::HandlerId;

/// Maximum serialized object size (10 MB)
pub const DEFAULT_MAX_OBJECT_SIZE: usize = 10 * 1024 * 1024;

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },

    #[error("Unknown handler id {0:#04x}")]
    UnknownHandler(u8),

    #[error("Invalid opcode {opcode:#04x} received by {handler} handler")]
    InvalidOpcode { handler: HandlerId, opcode: u8 },

    #[error("Expected header {expected:#04x}, found {actual:#04x}")]
    UnexpectedHeader { expected: u8, actual: u8 },

    #[error("Expected response opcode {expected:#04x}, found {actual:#04x}")]
    UnexpectedResponse { expected: u8, actual: u8 },

    #[error("Expected object of type {expected}, found {actual}")]
    UnexpectedType { expected: &'static str, actual: String },

    #[error("Type not allowed by resolver: {0}")]
    TypeNotAllowed(String),

    #[error("Object too large: {0} bytes (max: {1})")]
    ObjectTooLarge(usize, usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("String field too long: {0} bytes")]
    StringTooLong(usize),

    #[error("Negative count: {0}")]
    NegativeCount(i32),

    #[error("Response count {actual} does not match request count {expected}")]
    ResponseCountMismatch { expected: usize, actual: usize },

    #[error("Invalid streamed item: {0}")]
    InvalidStreamItem(String),

    #[error("Interrupted while waiting for streamed responses")]
    Interrupted,

    #[error("No {0} collaborator configured")]
    CollaboratorUnavailable(&'static str),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A value that can travel as an object field
///
/// `TYPE_NAME` is written ahead of the payload and checked against the
/// reader's [`TypeResolver`].
pub trait WireObject: Serialize + DeserializeOwned + Send + Sync {
    const TYPE_NAME: &'static str;
}

/// Restricted resolver deciding which object types a reader will accept
#[derive(Debug, Clone, Default)]
pub struct TypeResolver {
    allowed: HashSet<String>,
}

impl TypeResolver {
    /// A resolver that accepts nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// A resolver that accepts every model type of this protocol
    pub fn protocol_types() -> Self {
        let mut resolver = Self::empty();
        for name in super::model::WIRE_TYPES {
            resolver.allowed.insert((*name).to_string());
        }
        resolver
    }

    pub fn allow<T: WireObject>(mut self) -> Self {
        self.allowed.insert(T::TYPE_NAME.to_string());
        self
    }

    pub fn is_allowed(&self, type_name: &str) -> bool {
        self.allowed.contains(type_name)
    }

    /// Resolve an incoming type name
    pub fn resolve(&self, type_name: &str) -> ProtocolResult<()> {
        if self.is_allowed(type_name) {
            Ok(())
        } else {
            Err(ProtocolError::TypeNotAllowed(type_name.to_string()))
        }
    }
}

/// Codec configuration shared by every marshaller on a node
#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub resolver: Arc<TypeResolver>,
    pub max_object_size: usize,
}

impl CodecConfig {
    pub fn new(resolver: TypeResolver, max_object_size: usize) -> Self {
        Self {
            resolver: Arc::new(resolver),
            max_object_size,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::new(TypeResolver::protocol_types(), DEFAULT_MAX_OBJECT_SIZE)
    }
}

/// Read one marker byte and check it
pub async fn expect_header<R>(input: &mut R, expected: u8) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let actual = input.read_u8().await?;
    if actual != expected {
        return Err(ProtocolError::UnexpectedHeader { expected, actual });
    }
    Ok(())
}

/// Write a string as u16 length + UTF-8 bytes
pub async fn write_utf<W>(output: &mut W, value: &str) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = value.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(ProtocolError::StringTooLong(bytes.len()));
    }
    output.write_u16(bytes.len() as u16).await?;
    output.write_all(bytes).await?;
    Ok(())
}

/// Read a string written by [`write_utf`]
pub async fn read_utf<R>(input: &mut R) -> ProtocolResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = input.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Read an i32 element count, rejecting negatives
pub async fn read_count<R>(input: &mut R) -> ProtocolResult<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let count = input.read_i32().await?;
    if count < 0 {
        return Err(ProtocolError::NegativeCount(count));
    }
    Ok(count as usize)
}

/// Writes a codec framed body
///
/// Created by [`Marshaller::start`], which emits the start marker. The
/// frame is only complete once [`Marshaller::finish`] has consumed the
/// marshaller, so an unfinished body cannot be mistaken for a finished one.
#[must_use = "a marshaller must be finished to terminate the frame"]
pub struct Marshaller<'a, W: ?Sized> {
    output: &'a mut W,
    config: &'a CodecConfig,
}

impl<'a, W> Marshaller<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    pub async fn start(output: &'a mut W, config: &'a CodecConfig) -> ProtocolResult<Self> {
        output.write_u8(STREAM_START).await?;
        Ok(Self { output, config })
    }

    pub async fn write_byte(&mut self, value: u8) -> ProtocolResult<()> {
        self.output.write_u8(value).await?;
        Ok(())
    }

    pub async fn write_bool(&mut self, value: bool) -> ProtocolResult<()> {
        self.output.write_u8(value as u8).await?;
        Ok(())
    }

    pub async fn write_int(&mut self, value: i32) -> ProtocolResult<()> {
        self.output.write_i32(value).await?;
        Ok(())
    }

    pub async fn write_long(&mut self, value: i64) -> ProtocolResult<()> {
        self.output.write_i64(value).await?;
        Ok(())
    }

    /// Write an element count
    pub async fn write_count(&mut self, count: usize) -> ProtocolResult<()> {
        let count = i32::try_from(count)
            .map_err(|_| ProtocolError::ObjectTooLarge(count, i32::MAX as usize))?;
        self.write_int(count).await
    }

    pub async fn write_utf(&mut self, value: &str) -> ProtocolResult<()> {
        write_utf(&mut *self.output, value).await
    }

    pub async fn write_object<T: WireObject>(&mut self, value: &T) -> ProtocolResult<()> {
        let payload = bincode::serialize(value)?;
        if payload.len() > self.config.max_object_size {
            return Err(ProtocolError::ObjectTooLarge(
                payload.len(),
                self.config.max_object_size,
            ));
        }
        write_utf(&mut *self.output, T::TYPE_NAME).await?;
        self.output.write_u32(payload.len() as u32).await?;
        self.output.write_all(&payload).await?;
        Ok(())
    }

    /// Write a presence flag followed by the object when present
    pub async fn write_optional_object<T: WireObject>(
        &mut self,
        value: Option<&T>,
    ) -> ProtocolResult<()> {
        match value {
            Some(v) => {
                self.write_bool(true).await?;
                self.write_object(v).await
            }
            None => self.write_bool(false).await,
        }
    }

    /// Terminate the frame and flush
    pub async fn finish(self) -> ProtocolResult<()> {
        self.output.write_u8(STREAM_END).await?;
        self.output.flush().await?;
        Ok(())
    }
}

/// Reads a codec framed body written by a [`Marshaller`]
#[must_use = "an unmarshaller must be finished to consume the end of the frame"]
pub struct Unmarshaller<'a, R: ?Sized> {
    input: &'a mut R,
    config: &'a CodecConfig,
    ended: bool,
}

impl<'a, R> Unmarshaller<'a, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    pub async fn start(input: &'a mut R, config: &'a CodecConfig) -> ProtocolResult<Self> {
        expect_header(&mut *input, STREAM_START).await?;
        Ok(Self {
            input,
            config,
            ended: false,
        })
    }

    pub async fn read_byte(&mut self) -> ProtocolResult<u8> {
        Ok(self.input.read_u8().await?)
    }

    pub async fn expect_header(&mut self, expected: u8) -> ProtocolResult<()> {
        expect_header(&mut *self.input, expected).await
    }

    pub async fn read_bool(&mut self) -> ProtocolResult<bool> {
        Ok(self.input.read_u8().await? != 0)
    }

    pub async fn read_int(&mut self) -> ProtocolResult<i32> {
        Ok(self.input.read_i32().await?)
    }

    pub async fn read_long(&mut self) -> ProtocolResult<i64> {
        Ok(self.input.read_i64().await?)
    }

    pub async fn read_count(&mut self) -> ProtocolResult<usize> {
        read_count(&mut *self.input).await
    }

    pub async fn read_utf(&mut self) -> ProtocolResult<String> {
        read_utf(&mut *self.input).await
    }

    pub async fn read_object<T: WireObject>(&mut self) -> ProtocolResult<T> {
        let type_name = read_utf(&mut *self.input).await?;
        self.config.resolver.resolve(&type_name)?;
        if type_name != T::TYPE_NAME {
            return Err(ProtocolError::UnexpectedType {
                expected: T::TYPE_NAME,
                actual: type_name,
            });
        }

        let len = self.input.read_u32().await? as usize;
        if len > self.config.max_object_size {
            return Err(ProtocolError::ObjectTooLarge(len, self.config.max_object_size));
        }
        let mut payload = vec![0u8; len];
        self.input.read_exact(&mut payload).await?;
        Ok(bincode::deserialize(&payload)?)
    }

    pub async fn read_optional_object<T: WireObject>(&mut self) -> ProtocolResult<Option<T>> {
        if self.read_bool().await? {
            Ok(Some(self.read_object().await?))
        } else {
            Ok(None)
        }
    }

    /// Read the next marker, or `None` once the end of the frame is reached
    ///
    /// Used by readers of open-ended bodies such as streamed plan results.
    pub async fn next_marker(&mut self) -> ProtocolResult<Option<u8>> {
        if self.ended {
            return Ok(None);
        }
        let marker = self.input.read_u8().await?;
        if marker == STREAM_END {
            self.ended = true;
            return Ok(None);
        }
        Ok(Some(marker))
    }

    /// Consume the end-of-frame marker
    pub async fn finish(self) -> ProtocolResult<()> {
        if !self.ended {
            expect_header(&mut *self.input, STREAM_END).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::model::{DomainModelUpdate, ServerIdentity};

    const MARK_A: u8 = 0x21;
    const MARK_B: u8 = 0x22;

    #[tokio::test]
    async fn test_field_roundtrip() {
        let config = CodecConfig::default();
        let update = DomainModelUpdate::new("add-profile", &["profile", "web"]);

        let mut buf = Vec::new();
        let mut m = Marshaller::start(&mut buf, &config).await.unwrap();
        m.write_byte(MARK_A).await.unwrap();
        m.write_utf("host-a").await.unwrap();
        m.write_byte(MARK_B).await.unwrap();
        m.write_long(-42).await.unwrap();
        m.write_object(&update).await.unwrap();
        m.write_optional_object::<DomainModelUpdate>(None).await.unwrap();
        m.finish().await.unwrap();

        let mut cursor = &buf[..];
        let mut u = Unmarshaller::start(&mut cursor, &config).await.unwrap();
        u.expect_header(MARK_A).await.unwrap();
        assert_eq!(u.read_utf().await.unwrap(), "host-a");
        u.expect_header(MARK_B).await.unwrap();
        assert_eq!(u.read_long().await.unwrap(), -42);
        assert_eq!(u.read_object::<DomainModelUpdate>().await.unwrap(), update);
        assert!(u.read_optional_object::<DomainModelUpdate>().await.unwrap().is_none());
        u.finish().await.unwrap();
        assert!(cursor.is_empty());
    }

    #[tokio::test]
    async fn test_field_order_mismatch_fails_fast() {
        let config = CodecConfig::default();
        let mut buf = Vec::new();
        let mut m = Marshaller::start(&mut buf, &config).await.unwrap();
        m.write_byte(MARK_A).await.unwrap();
        m.write_int(7).await.unwrap();
        m.write_byte(MARK_B).await.unwrap();
        m.write_utf("x").await.unwrap();
        m.finish().await.unwrap();

        // Reader expects the fields the other way round
        let mut cursor = &buf[..];
        let mut u = Unmarshaller::start(&mut cursor, &config).await.unwrap();
        match u.expect_header(MARK_B).await {
            Err(ProtocolError::UnexpectedHeader { expected, actual }) => {
                assert_eq!(expected, MARK_B);
                assert_eq!(actual, MARK_A);
            }
            other => panic!("expected header mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_missing_finish_is_detected() {
        let config = CodecConfig::default();
        let mut buf = Vec::new();
        {
            let mut m = Marshaller::start(&mut buf, &config).await.unwrap();
            m.write_byte(MARK_A).await.unwrap();
            // dropped without finish
            drop(m);
        }

        let mut cursor = &buf[..];
        let mut u = Unmarshaller::start(&mut cursor, &config).await.unwrap();
        u.expect_header(MARK_A).await.unwrap();
        match u.finish().await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolver_rejects_unknown_types() {
        let writer_config = CodecConfig::default();
        let reader_config = CodecConfig::new(TypeResolver::empty(), DEFAULT_MAX_OBJECT_SIZE);
        let id = ServerIdentity::new("host", "group", "server");

        let mut buf = Vec::new();
        let mut m = Marshaller::start(&mut buf, &writer_config).await.unwrap();
        m.write_object(&id).await.unwrap();
        m.finish().await.unwrap();

        let mut cursor = &buf[..];
        let mut u = Unmarshaller::start(&mut cursor, &reader_config).await.unwrap();
        let err = u.read_object::<ServerIdentity>().await.unwrap_err();
        assert!(matches!(err, ProtocolError::TypeNotAllowed(name) if name == ServerIdentity::TYPE_NAME));
    }

    #[tokio::test]
    async fn test_unexpected_object_type() {
        let config = CodecConfig::default();
        let id = ServerIdentity::new("host", "group", "server");

        let mut buf = Vec::new();
        let mut m = Marshaller::start(&mut buf, &config).await.unwrap();
        m.write_object(&id).await.unwrap();
        m.finish().await.unwrap();

        let mut cursor = &buf[..];
        let mut u = Unmarshaller::start(&mut cursor, &config).await.unwrap();
        let err = u.read_object::<DomainModelUpdate>().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedType { .. }));
    }

    #[tokio::test]
    async fn test_object_size_limit() {
        let small = CodecConfig::new(TypeResolver::protocol_types(), 4);
        let update = DomainModelUpdate::new("a-rather-long-operation-name", &[]);

        let mut buf = Vec::new();
        let mut m = Marshaller::start(&mut buf, &small).await.unwrap();
        let err = m.write_object(&update).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ObjectTooLarge(_, 4)));
    }

    #[tokio::test]
    async fn test_next_marker_stops_at_end() {
        let config = CodecConfig::default();
        let mut buf = Vec::new();
        let mut m = Marshaller::start(&mut buf, &config).await.unwrap();
        m.write_byte(MARK_A).await.unwrap();
        m.write_byte(MARK_B).await.unwrap();
        m.finish().await.unwrap();

        let mut cursor = &buf[..];
        let mut u = Unmarshaller::start(&mut cursor, &config).await.unwrap();
        assert_eq!(u.next_marker().await.unwrap(), Some(MARK_A));
        assert_eq!(u.next_marker().await.unwrap(), Some(MARK_B));
        assert_eq!(u.next_marker().await.unwrap(), None);
        u.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_negative_count_rejected() {
        let bytes = (-1i32).to_be_bytes();
        let mut cursor = &bytes[..];
        let err = read_count(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::NegativeCount(-1)));
    }
}

//! Chunked content transfer
//!
//! Deployment content is sent as `CHUNK_START | u32 length | payload`
//! tuples terminated by `CHUNK_END`, so neither side ever holds the whole
//! artifact in memory.
//!
//! A [`ChunkedReader`] must be drained or [`closed`](ChunkedReader::close)
//! before any further field is read from the same input. Reading on
//! without doing so lands in the middle of the chunk framing.

use bytes::{BufMut, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::codec::ProtocolResult;
use super::opcodes::framing::{CHUNK_END, CHUNK_START};

/// Framing overhead of a single chunk: marker plus length
pub const CHUNK_HEADER_LEN: usize = 5;

enum ReadState {
    Marker,
    Length { buf: [u8; 4], filled: usize },
    Payload { remaining: usize },
    Eof,
}

/// Exposes a chunked stream as an ordinary [`AsyncRead`]
pub struct ChunkedReader<'a, R: ?Sized> {
    inner: &'a mut R,
    state: ReadState,
    chunks: u64,
}

impl<'a, R> ChunkedReader<'a, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    pub fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            state: ReadState::Marker,
            chunks: 0,
        }
    }

    /// Whether the terminating marker has been consumed
    pub fn is_closed(&self) -> bool {
        matches!(self.state, ReadState::Eof)
    }

    /// Number of chunks read so far
    pub fn chunks_read(&self) -> u64 {
        self.chunks
    }

    /// Discard the rest of the stream up to and including `CHUNK_END`
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) -> io::Result<u64> {
        let mut discarded = 0u64;
        let mut sink = [0u8; 8192];
        loop {
            let n = self.read(&mut sink).await?;
            if n == 0 {
                return Ok(discarded);
            }
            discarded += n as u64;
        }
    }
}

fn eof() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed inside chunked content",
    )
}

impl<R> AsyncRead for ChunkedReader<'_, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ReadState::Eof => return Poll::Ready(Ok(())),
                ReadState::Marker => {
                    let mut byte = [0u8; 1];
                    let mut marker = ReadBuf::new(&mut byte);
                    ready!(Pin::new(&mut *this.inner).poll_read(cx, &mut marker))?;
                    if marker.filled().is_empty() {
                        return Poll::Ready(Err(eof()));
                    }
                    this.state = match byte[0] {
                        CHUNK_START => ReadState::Length {
                            buf: [0u8; 4],
                            filled: 0,
                        },
                        CHUNK_END => ReadState::Eof,
                        other => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("invalid chunk marker {:#04x}", other),
                            )))
                        }
                    };
                }
                ReadState::Length { buf: len_buf, filled } => {
                    let mut rb = ReadBuf::new(&mut len_buf[*filled..]);
                    ready!(Pin::new(&mut *this.inner).poll_read(cx, &mut rb))?;
                    let n = rb.filled().len();
                    if n == 0 {
                        return Poll::Ready(Err(eof()));
                    }
                    *filled += n;
                    if *filled == 4 {
                        let len = u32::from_be_bytes(*len_buf) as usize;
                        this.chunks += 1;
                        this.state = if len == 0 {
                            ReadState::Marker
                        } else {
                            ReadState::Payload { remaining: len }
                        };
                    }
                }
                ReadState::Payload { remaining } => {
                    if buf.remaining() == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let max = (*remaining).min(buf.remaining());
                    let dst = buf.initialize_unfilled_to(max);
                    let mut rb = ReadBuf::new(dst);
                    ready!(Pin::new(&mut *this.inner).poll_read(cx, &mut rb))?;
                    let n = rb.filled().len();
                    if n == 0 {
                        return Poll::Ready(Err(eof()));
                    }
                    buf.advance(n);
                    *remaining -= n;
                    if *remaining == 0 {
                        this.state = ReadState::Marker;
                    }
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

/// Splits written bytes into chunks of at most `chunk_size`
///
/// Empty chunks are never written; [`finish`](Self::finish) emits the
/// final partial chunk and the terminator.
pub struct ChunkedWriter<'a, W: ?Sized> {
    output: &'a mut W,
    buffer: BytesMut,
    chunk_size: usize,
    total: u64,
}

impl<'a, W> ChunkedWriter<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    pub fn new(output: &'a mut W, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            output,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            total: 0,
        }
    }

    pub async fn write(&mut self, mut data: &[u8]) -> ProtocolResult<()> {
        while !data.is_empty() {
            let space = self.chunk_size - self.buffer.len();
            let take = space.min(data.len());
            self.buffer.put_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.chunk_size {
                self.flush_chunk().await?;
            }
        }
        Ok(())
    }

    /// Copy everything from `reader` into the chunked stream
    pub async fn copy_from<S>(&mut self, reader: &mut S) -> ProtocolResult<u64>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(copied);
            }
            self.write(&buf[..n]).await?;
            copied += n as u64;
        }
    }

    async fn flush_chunk(&mut self) -> ProtocolResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.output.write_u8(CHUNK_START).await?;
        self.output.write_u32(self.buffer.len() as u32).await?;
        self.output.write_all(&self.buffer).await?;
        self.total += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Write any buffered bytes and the terminator, returning the byte count
    pub async fn finish(mut self) -> ProtocolResult<u64> {
        self.flush_chunk().await?;
        self.output.write_u8(CHUNK_END).await?;
        Ok(self.total)
    }
}

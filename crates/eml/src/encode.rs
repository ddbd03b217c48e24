//! Streaming base64 encoding
//!
//! Messages are encoded in chunks whose size is a multiple of three bytes, so
//! the concatenation of the encoded chunks is exactly the base64 encoding of
//! the whole input and padding can only appear at the very end.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, Stream};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Raw bytes read per chunk (48 KiB, a multiple of 3)
pub const DEFAULT_CHUNK_SIZE: usize = 48 * 1024;

/// Encode everything `reader` yields as a stream of base64 text chunks
pub fn base64_stream<R>(reader: R) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    base64_stream_with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
}

/// Like [`base64_stream`] with an explicit raw chunk size
///
/// The size is rounded down to a multiple of three (minimum three).
pub fn base64_stream_with_chunk_size<R>(
    reader: R,
    chunk_size: usize,
) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let chunk_size = (chunk_size.max(3) / 3) * 3;

    stream::try_unfold((reader, vec![0u8; chunk_size]), next_chunk)
}

type ChunkState<R> = (R, Vec<u8>);

async fn next_chunk<R>(
    (mut reader, mut buf): ChunkState<R>,
) -> io::Result<Option<(String, ChunkState<R>)>>
where
    R: AsyncRead + Unpin,
{
    let filled = fill(&mut reader, &mut buf).await?;
    if filled == 0 {
        return Ok(None);
    }

    let encoded = STANDARD.encode(&buf[..filled]);
    Ok(Some((encoded, (reader, buf))))
}

/// Length of the base64 encoding of `raw_len` bytes, padding included
pub fn encoded_len(raw_len: u64) -> u64 {
    raw_len.div_ceil(3) * 4
}

/// Read until `buf` is full or the reader is exhausted
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

//! Per-parse buffering on top of a [`ByteSource`].

use bytes::{Bytes, BytesMut};

use crate::error::{FastHeaderError, FastHeaderResult};
use crate::reader::{ByteSource, EndianAwareReader, Endianness};

/// Buffering for the leading bytes of a source, owned by a single parse call.
///
/// The buffer is seeded with the prefix the registry already fetched for sniffing and grows
/// contiguously from offset 0 through [`ensure`](Self::ensure). Requests that fall entirely
/// inside it are served from memory; everything else goes to the source.
#[derive(Debug)]
pub struct PrefetchBuffer<'a> {
    source: &'a dyn ByteSource,
    buffer: BytesMut,
}

impl<'a> PrefetchBuffer<'a> {
    /// Construct a new PrefetchBuffer, seeded with already-fetched leading bytes.
    pub fn new(source: &'a dyn ByteSource, prefix: Bytes) -> Self {
        Self {
            source,
            buffer: BytesMut::from(prefix.as_ref()),
        }
    }

    /// The underlying source.
    pub fn source(&self) -> &'a dyn ByteSource {
        self.source
    }

    /// Number of leading bytes held.
    pub fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Whether no bytes are held yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The leading bytes held so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Grow the buffer until it holds at least `len` leading bytes.
    ///
    /// Only the missing tail is fetched.
    pub async fn ensure(&mut self, len: u64) -> FastHeaderResult<()> {
        let held = self.len();
        if len <= held {
            return Ok(());
        }
        let bytes = fetch_exact(self.source, held, len - held).await?;
        self.buffer.extend_from_slice(&bytes);
        Ok(())
    }

    /// Fetch `length` bytes at `start`, from the buffer when it covers the whole window.
    pub async fn fetch(&self, start: u64, length: u64) -> FastHeaderResult<Bytes> {
        match start.checked_add(length) {
            Some(end) if end <= self.len() => Ok(Bytes::copy_from_slice(
                &self.buffer[start as usize..end as usize],
            )),
            Some(_) => fetch_exact(self.source, start, length).await,
            None => Err(FastHeaderError::EndOfFile(length, 0)),
        }
    }

    /// The first `length` bytes of the source, clamped to its size when that is known.
    ///
    /// Buffered bytes are reused; only the remainder is fetched.
    pub async fn peek(&self, length: u64) -> FastHeaderResult<Bytes> {
        let length = self.source.size().map_or(length, |size| length.min(size));
        if length == 0 {
            return Ok(Bytes::new());
        }
        if length <= self.len() {
            return Ok(Bytes::copy_from_slice(&self.buffer[..length as usize]));
        }
        let tail = fetch_exact(self.source, self.len(), length - self.len()).await?;
        let mut peek = BytesMut::with_capacity(length as usize);
        peek.extend_from_slice(&self.buffer);
        peek.extend_from_slice(&tail);
        Ok(peek.freeze())
    }
}

/// Fetch from the source, refusing short reads from implementations that break the contract.
async fn fetch_exact(source: &dyn ByteSource, start: u64, length: u64) -> FastHeaderResult<Bytes> {
    let bytes = source.fetch(start, length).await?;
    if bytes.len() as u64 != length {
        return Err(FastHeaderError::EndOfFile(length, bytes.len() as u64));
    }
    Ok(bytes)
}

/// A seekable, endian-aware read position over a [`PrefetchBuffer`].
pub(crate) struct MetadataCursor<'a> {
    fetch: &'a PrefetchBuffer<'a>,
    offset: u64,
    endianness: Endianness,
}

impl<'a> MetadataCursor<'a> {
    pub fn new_with_offset(fetch: &'a PrefetchBuffer<'a>, endianness: Endianness, offset: u64) -> Self {
        Self {
            fetch,
            offset,
            endianness,
        }
    }

    pub fn seek(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Read the given number of bytes, advancing the internal cursor state by the same amount.
    pub(crate) async fn read(&mut self, length: u64) -> FastHeaderResult<EndianAwareReader> {
        let bytes = self.fetch.fetch(self.offset, length).await?;
        self.offset += length;
        Ok(EndianAwareReader::new(bytes, self.endianness))
    }

    /// Read a u16 from the cursor, advancing the internal state by 2 bytes.
    pub(crate) async fn read_u16(&mut self) -> FastHeaderResult<u16> {
        self.read(2).await?.read_u16()
    }

    /// Read a u32 from the cursor, advancing the internal state by 4 bytes.
    pub(crate) async fn read_u32(&mut self) -> FastHeaderResult<u32> {
        self.read(4).await?.read_u32()
    }

    /// Read a u64 from the cursor, advancing the internal state by 8 bytes.
    pub(crate) async fn read_u64(&mut self) -> FastHeaderResult<u64> {
        self.read(8).await?.read_u64()
    }
}

//! Local byte sources backed by a memory map or an in-memory buffer.

use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use memmap2::Mmap;

use crate::error::{FastHeaderError, FastHeaderResult};
use crate::reader::{ByteSource, FetchCounter};

enum LocalData {
    Mapped(Mmap),
    Memory(Bytes),
}

impl AsRef<[u8]> for LocalData {
    fn as_ref(&self) -> &[u8] {
        match self {
            LocalData::Mapped(mmap) => &mmap[..],
            LocalData::Memory(bytes) => &bytes[..],
        }
    }
}

/// A blocking [`ByteSource`] over a local file.
///
/// Files are memory-mapped read-only; streams that cannot produce a mapping are read into memory
/// once. Each `fetch` is a bounds-checked slice and never touches the disk through a syscall of
/// its own.
pub struct LocalSource {
    data: LocalData,
    counter: FetchCounter,
}

impl Debug for LocalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.data {
            LocalData::Mapped(_) => "mapped",
            LocalData::Memory(_) => "memory",
        };
        f.debug_struct("LocalSource")
            .field("kind", &kind)
            .field("len", &self.len())
            .field("bytes_fetched", &self.counter.bytes())
            .finish()
    }
}

impl LocalSource {
    /// Open and map the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> FastHeaderResult<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Map an already opened file.
    pub fn from_file(file: File) -> FastHeaderResult<Self> {
        // Zero-length mappings are rejected on some platforms.
        if file.metadata()?.len() == 0 {
            return Ok(Self::from_bytes(Bytes::new()));
        }
        // SAFETY: the map is read-only. Truncating the file underneath the map while a parse is
        // running is outside of what this crate guards against.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            data: LocalData::Mapped(mmap),
            counter: FetchCounter::new(),
        })
    }

    /// Read a non-seekable stream to its end and serve windows from memory.
    pub fn from_reader(mut reader: impl Read) -> FastHeaderResult<Self> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(Self::from_bytes(buffer.into()))
    }

    /// Serve windows from an in-memory buffer.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            data: LocalData::Memory(bytes),
            counter: FetchCounter::new(),
        }
    }

    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        self.data.as_ref().len() as u64
    }

    /// Whether the source holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The synchronous read behind [`ByteSource::fetch`].
    pub fn read(&self, start: u64, length: u64) -> FastHeaderResult<Bytes> {
        if length == 0 {
            return Err(FastHeaderError::InvalidRange(start));
        }
        let available = self.len().saturating_sub(start);
        if length > available {
            return Err(FastHeaderError::EndOfFile(length, available));
        }
        let range = start as usize..(start + length) as usize;
        let bytes = Bytes::copy_from_slice(&self.data.as_ref()[range]);
        self.counter.record_bytes(length);
        Ok(bytes)
    }
}

impl ByteSource for LocalSource {
    fn fetch(&self, start: u64, length: u64) -> BoxFuture<'_, FastHeaderResult<Bytes>> {
        futures::future::ready(self.read(start, length)).boxed()
    }

    fn size(&self) -> Option<u64> {
        Some(self.len())
    }

    fn bytes_fetched(&self) -> u64 {
        self.counter.bytes()
    }

    fn requests_made(&self) -> u64 {
        0
    }
}

/// A cooperative [`ByteSource`] over a local file.
///
/// Reads are offloaded to tokio's blocking pool so page faults on the mapping never stall the
/// scheduler. Requires a tokio runtime.
#[derive(Debug, Clone)]
pub struct AsyncLocalSource(Arc<LocalSource>);

impl AsyncLocalSource {
    /// Open and map the file at `path` on the blocking pool.
    pub async fn open(path: impl AsRef<Path>) -> FastHeaderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let source = spawn_blocking(move || LocalSource::open(path)).await?;
        Ok(Self::new(source))
    }

    /// Map an already opened file on the blocking pool.
    pub async fn from_file(file: File) -> FastHeaderResult<Self> {
        let source = spawn_blocking(move || LocalSource::from_file(file)).await?;
        Ok(Self::new(source))
    }

    /// Wrap an opened [`LocalSource`].
    pub fn new(source: LocalSource) -> Self {
        Self(Arc::new(source))
    }

    /// Access the wrapped blocking source.
    pub fn inner(&self) -> &LocalSource {
        &self.0
    }
}

impl ByteSource for AsyncLocalSource {
    fn fetch(&self, start: u64, length: u64) -> BoxFuture<'_, FastHeaderResult<Bytes>> {
        let source = self.0.clone();
        spawn_blocking(move || source.read(start, length)).boxed()
    }

    fn size(&self) -> Option<u64> {
        Some(self.0.len())
    }

    fn bytes_fetched(&self) -> u64 {
        self.0.bytes_fetched()
    }

    fn requests_made(&self) -> u64 {
        0
    }
}

/// Run `f` on tokio's blocking pool.
pub(crate) async fn spawn_blocking<T, F>(f: F) -> FastHeaderResult<T>
where
    F: FnOnce() -> FastHeaderResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| FastHeaderError::External(Box::new(err)))?
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_bounds() {
        let source = LocalSource::from_bytes(Bytes::from_static(b"0123456789"));
        assert_eq!(source.read(2, 3).unwrap().as_ref(), b"234");
        assert_eq!(source.read(0, 10).unwrap().len(), 10);
        assert!(matches!(
            source.read(8, 4),
            Err(FastHeaderError::EndOfFile(4, 2))
        ));
        assert!(matches!(
            source.read(20, 1),
            Err(FastHeaderError::EndOfFile(1, 0))
        ));
        assert!(matches!(
            source.read(0, 0),
            Err(FastHeaderError::InvalidRange(0))
        ));
        // only successful reads are counted
        assert_eq!(source.bytes_fetched(), 13);
        assert_eq!(source.requests_made(), 0);
    }

    #[test]
    fn test_mapped_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello mapped world").unwrap();
        file.flush().unwrap();

        let source = LocalSource::open(file.path()).unwrap();
        assert_eq!(source.size(), Some(18));
        let bytes = futures::executor::block_on(source.fetch(6, 6)).unwrap();
        assert_eq!(bytes.as_ref(), b"mapped");
        assert_eq!(source.bytes_fetched(), 6);
    }

    #[test]
    fn test_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = LocalSource::open(file.path()).unwrap();
        assert!(source.is_empty());
        assert!(source.read(0, 1).is_err());
    }

    #[test]
    fn test_stream() {
        let stream = std::io::Cursor::new(b"streamed".to_vec());
        let source = LocalSource::from_reader(stream).unwrap();
        assert_eq!(source.read(0, 6).unwrap().as_ref(), b"stream");
    }

    #[tokio::test]
    async fn test_async_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 100]).unwrap();
        file.flush().unwrap();

        let source = AsyncLocalSource::open(file.path()).await.unwrap();
        assert_eq!(source.fetch(90, 10).await.unwrap().as_ref(), &[7u8; 10]);
        assert!(source.fetch(95, 10).await.is_err());
        assert_eq!(source.bytes_fetched(), 10);
    }
}

//! Top-level header reads: open a source, sniff a prefix, hand it to the chosen parser.

use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::future::join_all;
use url::Url;

use crate::error::FastHeaderResult;
use crate::header::HeaderResult;
use crate::reader::local::spawn_blocking;
use crate::reader::{AsyncLocalSource, ByteSource, LocalSource};
use crate::registry::{global, FormatRegistry};

/// Sniff prefix sizes, tried largest first.
const PREFIX_LADDER: [u64; 6] = [4096, 1024, 512, 256, 128, 64];

/// Options for one header read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Also return this many leading bytes, base64 encoded.
    pub peek: Option<usize>,
    /// Walk the whole TIFF IFD chain to report `ifd_count`.
    pub count_ifds: bool,
}

impl ReadOptions {
    /// Request a peek payload of `bytes` leading bytes.
    pub fn with_peek(mut self, bytes: usize) -> Self {
        self.peek = Some(bytes);
        self
    }

    /// Enable or disable IFD counting.
    pub fn with_count_ifds(mut self, count_ifds: bool) -> Self {
        self.count_ifds = count_ifds;
        self
    }
}

/// Something a header can be read from.
pub enum Source {
    /// A local file path.
    Path(PathBuf),
    /// An `http` or `https` URL.
    Url(Url),
    /// An already opened file.
    File(File),
    /// Any readable stream. It is read to the end into memory.
    Stream(Box<dyn Read + Send>),
    /// Bytes already in memory.
    Bytes(Bytes),
}

impl Source {
    /// The name used for extension fallback and in error messages.
    pub fn identifier(&self) -> String {
        match self {
            Source::Path(path) => path.display().to_string(),
            Source::Url(url) => url.to_string(),
            Source::File(_) => "<file>".to_string(),
            Source::Stream(_) => "<stream>".to_string(),
            Source::Bytes(_) => "<bytes>".to_string(),
        }
    }
}

impl Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Source::Url(url) => f.debug_tuple("Url").field(&url.as_str()).finish(),
            Source::File(file) => f.debug_tuple("File").field(file).finish(),
            Source::Stream(_) => f.write_str("Stream"),
            Source::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
        }
    }
}

impl From<&str> for Source {
    /// Strings starting with `http://` or `https://` are URLs, anything else is a path.
    fn from(value: &str) -> Self {
        let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            if let Ok(url) = Url::parse(value) {
                return Source::Url(url);
            }
        }
        Source::Path(value.into())
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

impl From<&Path> for Source {
    fn from(value: &Path) -> Self {
        Source::Path(value.to_path_buf())
    }
}

impl From<PathBuf> for Source {
    fn from(value: PathBuf) -> Self {
        Source::Path(value)
    }
}

impl From<Url> for Source {
    fn from(value: Url) -> Self {
        Source::Url(value)
    }
}

impl From<File> for Source {
    fn from(value: File) -> Self {
        Source::File(value)
    }
}

impl From<Bytes> for Source {
    fn from(value: Bytes) -> Self {
        Source::Bytes(value)
    }
}

#[cfg(feature = "reqwest")]
fn open_url_blocking(url: Url) -> FastHeaderResult<Box<dyn ByteSource>> {
    let client = crate::reader::http::shared_blocking_client()?;
    Ok(Box::new(crate::reader::HttpSource::new(client, url)))
}

#[cfg(feature = "reqwest")]
fn open_url(url: Url) -> FastHeaderResult<Box<dyn ByteSource>> {
    let client = crate::reader::http::shared_client()?;
    Ok(Box::new(crate::reader::HttpSource::new(client, url)))
}

#[cfg(not(feature = "reqwest"))]
fn open_url_blocking(url: Url) -> FastHeaderResult<Box<dyn ByteSource>> {
    open_url(url)
}

#[cfg(not(feature = "reqwest"))]
fn open_url(url: Url) -> FastHeaderResult<Box<dyn ByteSource>> {
    Err(crate::error::FastHeaderError::General(format!(
        "cannot open {url}: built without HTTP support"
    )))
}

/// Open a blocking byte source.
pub fn open_blocking(source: Source) -> FastHeaderResult<Box<dyn ByteSource>> {
    let source: Box<dyn ByteSource> = match source {
        Source::Path(path) => Box::new(LocalSource::open(path)?),
        Source::File(file) => Box::new(LocalSource::from_file(file)?),
        Source::Stream(stream) => Box::new(LocalSource::from_reader(stream)?),
        Source::Bytes(bytes) => Box::new(LocalSource::from_bytes(bytes)),
        Source::Url(url) => open_url_blocking(url)?,
    };
    Ok(source)
}

/// Open a cooperative byte source. Requires a tokio runtime.
pub async fn open(source: Source) -> FastHeaderResult<Box<dyn ByteSource>> {
    let source: Box<dyn ByteSource> = match source {
        Source::Path(path) => Box::new(AsyncLocalSource::open(path).await?),
        Source::File(file) => Box::new(AsyncLocalSource::from_file(file).await?),
        Source::Stream(stream) => {
            Box::new(spawn_blocking(move || LocalSource::from_reader(stream)).await?)
        }
        Source::Bytes(bytes) => Box::new(LocalSource::from_bytes(bytes)),
        Source::Url(url) => open_url(url)?,
    };
    Ok(source)
}

/// Fetch the largest ladder prefix the source can supply.
///
/// Sizes beyond a known source size are skipped and running past the end moves down the
/// ladder. A source shorter than every size yields an empty prefix.
async fn sniff_prefix(source: &dyn ByteSource) -> FastHeaderResult<Bytes> {
    for length in PREFIX_LADDER {
        if source.size().is_some_and(|size| length > size) {
            continue;
        }
        match source.fetch(0, length).await {
            Ok(prefix) => return Ok(prefix),
            Err(err) if err.is_end_of_file() => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(Bytes::new())
}

/// Sniff and parse an already opened source with `registry`.
///
/// Only a failure to pick a parser is returned as `Err`. Sniffing and parse failures become a
/// failed [`HeaderResult`].
pub async fn read_from(
    registry: &FormatRegistry,
    identifier: &str,
    source: &dyn ByteSource,
    options: &ReadOptions,
) -> FastHeaderResult<HeaderResult> {
    let prefix = match sniff_prefix(source).await {
        Ok(prefix) => prefix,
        Err(err) => return Ok(HeaderResult::new(Err(err), source)),
    };
    let parser = registry.choose(identifier, &prefix)?;
    Ok(parser.read(source, prefix, options).await)
}

/// Read the header of `source` cooperatively. Requires a tokio runtime.
///
/// Returns `Err` only with
/// [`FastHeaderError::UnknownFormat`](crate::error::FastHeaderError::UnknownFormat).
pub async fn read_header(
    source: impl Into<Source>,
    options: &ReadOptions,
) -> FastHeaderResult<HeaderResult> {
    let source = source.into();
    let identifier = source.identifier();
    let byte_source = match open(source).await {
        Ok(byte_source) => byte_source,
        Err(err) => return Ok(HeaderResult::failed(&err)),
    };
    read_from(global(), &identifier, byte_source.as_ref(), options).await
}

/// Read the header of `source`, blocking the current thread.
///
/// Same semantics as [`read_header`]. Must not be called from within an async runtime when
/// `source` is a URL.
pub fn read_header_blocking(
    source: impl Into<Source>,
    options: &ReadOptions,
) -> FastHeaderResult<HeaderResult> {
    let source = source.into();
    let identifier = source.identifier();
    let byte_source = match open_blocking(source) {
        Ok(byte_source) => byte_source,
        Err(err) => return Ok(HeaderResult::failed(&err)),
    };
    futures::executor::block_on(read_from(
        global(),
        &identifier,
        byte_source.as_ref(),
        options,
    ))
}

async fn read_isolated(source: Source, options: &ReadOptions) -> HeaderResult {
    let identifier = source.identifier();
    let byte_source = match open(source).await {
        Ok(byte_source) => byte_source,
        Err(err) => return HeaderResult::failed(&err),
    };
    match read_from(global(), &identifier, byte_source.as_ref(), options).await {
        Ok(result) => result,
        Err(err) => HeaderResult::new(Err(err), byte_source.as_ref()),
    }
}

/// Read many headers concurrently, one result per source in input order.
///
/// Every failure, including an unknown format, is confined to its own result.
pub async fn read_headers<I>(sources: I, options: &ReadOptions) -> Vec<HeaderResult>
where
    I: IntoIterator,
    I::Item: Into<Source>,
{
    join_all(
        sources
            .into_iter()
            .map(|source| read_isolated(source.into(), options)),
    )
    .await
}

//! Format detection and the parser capability.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use tracing::debug;
use url::Url;

use crate::dispatch::ReadOptions;
use crate::error::{FastHeaderError, FastHeaderResult};
use crate::fetch::PrefetchBuffer;
use crate::header::{HeaderData, HeaderResult};
use crate::parsers::{JpegParser, MrcParser, PngParser, TiffParser};
use crate::reader::ByteSource;

/// Magic bytes expected at a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Byte offset from the start of the file.
    pub offset: usize,
    /// Bytes expected at `offset`.
    pub pattern: &'static [u8],
}

impl Signature {
    /// Create a new signature.
    pub const fn new(offset: usize, pattern: &'static [u8]) -> Self {
        Self { offset, pattern }
    }

    /// Whether `prefix` is long enough and holds the pattern at the offset.
    pub fn matches(&self, prefix: &[u8]) -> bool {
        prefix.get(self.offset..self.offset + self.pattern.len()) == Some(self.pattern)
    }
}

/// A parser for one file format.
///
/// Implementations only provide [`parse`](Self::parse); [`read`](Self::read) and
/// [`read_blocking`](Self::read_blocking) wrap it with failure capture, the optional peek
/// payload, and the source's I/O counters.
pub trait FormatParser: Debug + Send + Sync {
    /// Format name reported in results.
    fn name(&self) -> &'static str;

    /// Lowercase file extensions without the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Magic bytes identifying the format. Any one match is enough.
    fn signatures(&self) -> &'static [Signature];

    /// Lower values are preferred when several parsers match.
    fn priority(&self) -> i32 {
        100
    }

    /// Whether `prefix` carries one of this format's signatures.
    fn probe(&self, prefix: &[u8]) -> bool {
        self.signatures()
            .iter()
            .any(|signature| signature.matches(prefix))
    }

    /// Extract the header metadata, growing `buffer` as the format requires.
    fn parse<'a>(
        &'a self,
        buffer: &'a mut PrefetchBuffer<'_>,
        options: &'a ReadOptions,
    ) -> BoxFuture<'a, FastHeaderResult<HeaderData>>;

    /// Parse `source`, reusing `prefix` as its already fetched leading bytes.
    ///
    /// Never fails: errors are returned as a failed [`HeaderResult`] carrying the counters
    /// accumulated so far.
    fn read<'a>(
        &'a self,
        source: &'a dyn ByteSource,
        prefix: Bytes,
        options: &'a ReadOptions,
    ) -> BoxFuture<'a, HeaderResult> {
        async move {
            let mut buffer = PrefetchBuffer::new(source, prefix);
            let outcome = match self.parse(&mut buffer, options).await {
                Ok(data) => attach_peek(&buffer, data, options.peek).await,
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                debug!(format = self.name(), %err, "parse failed");
            }
            HeaderResult::new(outcome, source)
        }
        .boxed()
    }

    /// [`read`](Self::read), driven on the current thread.
    ///
    /// `source` must be a blocking source such as [`LocalSource`](crate::reader::LocalSource)
    /// or an [`HttpSource`](crate::reader::HttpSource) over a blocking client.
    fn read_blocking(
        &self,
        source: &dyn ByteSource,
        prefix: Bytes,
        options: &ReadOptions,
    ) -> HeaderResult {
        futures::executor::block_on(self.read(source, prefix, options))
    }
}

async fn attach_peek(
    buffer: &PrefetchBuffer<'_>,
    mut data: HeaderData,
    peek: Option<usize>,
) -> FastHeaderResult<HeaderData> {
    if let Some(peek) = peek.filter(|&peek| peek > 0) {
        let bytes = buffer.peek(peek as u64).await?;
        data.peek_bytes_b64 = Some(STANDARD.encode(&bytes));
    }
    Ok(data)
}

fn sort_key(parser: &dyn FormatParser) -> (i32, &'static str) {
    (parser.priority(), parser.name())
}

/// Insert after every entry whose key is not greater, keeping equal keys in registration order.
fn insert_sorted(list: &mut Vec<Arc<dyn FormatParser>>, parser: Arc<dyn FormatParser>) {
    let key = sort_key(parser.as_ref());
    let index = list.partition_point(|existing| sort_key(existing.as_ref()) <= key);
    list.insert(index, parser);
}

/// A registry of format parsers.
///
/// Parsers are kept ordered by `(priority, name)`, both overall and per extension, so the
/// choice never depends on registration order. [`Default`] holds the built-in parsers;
/// [`new`](Self::new) starts empty.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    parsers: Vec<Arc<dyn FormatParser>>,
    by_extension: HashMap<String, Vec<Arc<dyn FormatParser>>>,
}

impl FormatRegistry {
    /// Create a new format registry with no parsers registered
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
            by_extension: HashMap::new(),
        }
    }

    /// Register a parser for its signatures and extensions.
    pub fn register(&mut self, parser: Arc<dyn FormatParser>) {
        for extension in parser.extensions() {
            let list = self
                .by_extension
                .entry(extension.to_ascii_lowercase())
                .or_default();
            insert_sorted(list, parser.clone());
        }
        insert_sorted(&mut self.parsers, parser);
    }

    /// All registered parsers, most preferred first.
    pub fn parsers(&self) -> impl Iterator<Item = &Arc<dyn FormatParser>> {
        self.parsers.iter()
    }

    /// The most preferred parser whose signature matches `prefix`.
    pub fn sniff(&self, prefix: &[u8]) -> Option<&Arc<dyn FormatParser>> {
        self.parsers.iter().find(|parser| parser.probe(prefix))
    }

    /// The most preferred parser registered for `extension`.
    pub fn for_extension(&self, extension: &str) -> Option<&Arc<dyn FormatParser>> {
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .and_then(|list| list.first())
    }

    /// Pick a parser by signature, falling back to the extension of `identifier`.
    ///
    /// For `http(s)` URLs the extension is taken from the URL path, ignoring the query.
    pub fn choose(&self, identifier: &str, prefix: &[u8]) -> FastHeaderResult<Arc<dyn FormatParser>> {
        if let Some(parser) = self.sniff(prefix) {
            debug!(identifier, format = parser.name(), "matched signature");
            return Ok(parser.clone());
        }
        if let Some(parser) = extension(identifier).and_then(|ext| self.for_extension(&ext)) {
            debug!(identifier, format = parser.name(), "matched extension");
            return Ok(parser.clone());
        }
        Err(FastHeaderError::UnknownFormat(identifier.to_string()))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MrcParser));
        registry.register(Arc::new(TiffParser));
        registry.register(Arc::new(PngParser));
        registry.register(Arc::new(JpegParser));
        registry
    }
}

/// The built-in registry, built on first use and read-only afterwards.
pub fn global() -> &'static FormatRegistry {
    static REGISTRY: Lazy<FormatRegistry> = Lazy::new(FormatRegistry::default);
    &REGISTRY
}

/// Lowercase extension of a path or URL, without the leading dot.
fn extension(identifier: &str) -> Option<String> {
    let path = match Url::parse(identifier) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url.path().to_string(),
        _ => identifier.to_string(),
    };
    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

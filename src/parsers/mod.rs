//! Format parsers, one per supported file format.
//!
//! Every parser implements [`FormatParser`](crate::registry::FormatParser) and is registered in
//! the default [`FormatRegistry`](crate::registry::FormatRegistry).

pub mod jpeg;
pub mod mrc;
pub mod png;
pub mod tiff;

pub use jpeg::JpegParser;
pub use mrc::MrcParser;
pub use png::PngParser;
pub use tiff::TiffParser;

use crate::error::{FastHeaderError, FastHeaderResult};
use crate::fetch::PrefetchBuffer;

/// Grow `buffer` to a fixed header length, reporting a source that is too short as a parse error.
pub(crate) async fn ensure_header(
    buffer: &mut PrefetchBuffer<'_>,
    len: u64,
    format: &str,
) -> FastHeaderResult<()> {
    match buffer.ensure(len).await {
        Err(err) if err.is_end_of_file() => Err(FastHeaderError::parse(format!(
            "File too small to be a valid {format}"
        ))),
        result => result,
    }
}

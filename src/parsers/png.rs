//! PNG images. Dimensions come from the IHDR chunk, which the format requires to be first.

use futures::future::{BoxFuture, FutureExt};

use crate::dispatch::ReadOptions;
use crate::error::{FastHeaderError, FastHeaderResult};
use crate::fetch::PrefetchBuffer;
use crate::header::HeaderData;
use crate::parsers::ensure_header;
use crate::registry::{FormatParser, Signature};

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const HEADER_LEN: u64 = 24;

/// Reads width and height from the 24-byte PNG prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngParser;

impl FormatParser for PngParser {
    fn name(&self) -> &'static str {
        "PNG"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png"]
    }

    fn signatures(&self) -> &'static [Signature] {
        const SIGNATURES: &[Signature] = &[Signature::new(0, PNG_SIGNATURE)];
        SIGNATURES
    }

    fn priority(&self) -> i32 {
        40
    }

    fn parse<'a>(
        &'a self,
        buffer: &'a mut PrefetchBuffer<'_>,
        _options: &'a ReadOptions,
    ) -> BoxFuture<'a, FastHeaderResult<HeaderData>> {
        parse_png(buffer).boxed()
    }
}

async fn parse_png(buffer: &mut PrefetchBuffer<'_>) -> FastHeaderResult<HeaderData> {
    ensure_header(buffer, HEADER_LEN, "PNG").await?;
    let header = &buffer.as_slice()[..HEADER_LEN as usize];

    if &header[..8] != PNG_SIGNATURE {
        return Err(FastHeaderError::parse("Invalid PNG signature"));
    }
    if &header[12..16] != b"IHDR" {
        return Err(FastHeaderError::parse("IHDR chunk not found"));
    }
    let width = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);
    let height = u32::from_be_bytes([header[20], header[21], header[22], header[23]]);

    Ok(HeaderData {
        format: "PNG".to_string(),
        width: Some(width.into()),
        height: Some(height.into()),
        dtype: Some("uint8".to_string()),
        ..Default::default()
    })
}

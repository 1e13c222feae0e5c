//! JPEG images.
//!
//! There is no fixed header: the parser walks the marker segments from the start of the stream
//! until it reaches a Start-Of-Frame segment. The scan buffer grows in 4 KiB steps as the scan
//! offset advances and never beyond 64 KiB.

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::dispatch::ReadOptions;
use crate::error::{FastHeaderError, FastHeaderResult};
use crate::fetch::PrefetchBuffer;
use crate::header::HeaderData;
use crate::registry::{FormatParser, Signature};

const SOI: &[u8; 2] = b"\xFF\xD8";
const CHUNK: u64 = 4096;
const SCAN_CAP: u64 = 64 * 1024;

/// Reads width and height from the first Start-Of-Frame segment.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegParser;

impl FormatParser for JpegParser {
    fn name(&self) -> &'static str {
        "JPEG"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "jpeg"]
    }

    fn signatures(&self) -> &'static [Signature] {
        const SIGNATURES: &[Signature] = &[Signature::new(0, SOI)];
        SIGNATURES
    }

    fn priority(&self) -> i32 {
        50
    }

    fn parse<'a>(
        &'a self,
        buffer: &'a mut PrefetchBuffer<'_>,
        _options: &'a ReadOptions,
    ) -> BoxFuture<'a, FastHeaderResult<HeaderData>> {
        parse_jpeg(buffer).boxed()
    }
}

/// Markers that stand alone without a length field.
fn is_standalone(marker: u8) -> bool {
    // TEM, RST0-7, SOI, EOI
    matches!(marker, 0x01 | 0xD0..=0xD9)
}

/// SOF0-SOF15, except DHT, JPG and DAC which share the range.
fn is_start_of_frame(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// Make sure `[offset, offset + n)` is buffered, growing to the next chunk boundary.
async fn need(buffer: &mut PrefetchBuffer<'_>, offset: u64, n: u64) -> FastHeaderResult<()> {
    let end = offset + n;
    if end <= buffer.len() {
        return Ok(());
    }
    if end > SCAN_CAP {
        return Err(FastHeaderError::parse("SOF not found within 64 KiB"));
    }
    let target = (end.div_ceil(CHUNK) * CHUNK).min(SCAN_CAP);
    let target = buffer
        .source()
        .size()
        .map_or(target, |size| target.min(size))
        .max(end);
    debug!(from = buffer.len(), to = target, "growing JPEG scan buffer");
    match buffer.ensure(target).await {
        // Without a known size the chunk boundary may lie past the end of the file.
        Err(err) if target > end && err.is_end_of_file() => {
            debug!(from = buffer.len(), to = end, %err, "retrying with the exact window");
            buffer.ensure(end).await
        }
        result => result,
    }
}

async fn parse_jpeg(buffer: &mut PrefetchBuffer<'_>) -> FastHeaderResult<HeaderData> {
    need(buffer, 0, SOI.len() as u64).await?;
    if &buffer.as_slice()[..2] != SOI {
        return Err(FastHeaderError::parse("Missing SOI marker"));
    }

    let mut offset = 2u64;
    loop {
        need(buffer, offset, 2).await?;
        let data = buffer.as_slice();
        if data[offset as usize] != 0xFF {
            return Err(FastHeaderError::parse("Marker sync lost"));
        }
        let marker = data[offset as usize + 1];
        if marker == 0xFF {
            // fill byte
            offset += 1;
            continue;
        }
        offset += 2;
        if is_standalone(marker) {
            continue;
        }

        need(buffer, offset, 2).await?;
        let data = buffer.as_slice();
        let segment_length =
            u16::from_be_bytes([data[offset as usize], data[offset as usize + 1]]) as u64;
        if segment_length < 2 {
            return Err(FastHeaderError::parse("Invalid segment length"));
        }
        offset += 2;

        if is_start_of_frame(marker) {
            if segment_length < 7 {
                return Err(FastHeaderError::parse("SOF segment too short"));
            }
            need(buffer, offset, 5).await?;
            let body = &buffer.as_slice()[offset as usize..offset as usize + 5];
            let precision = body[0];
            let height = u16::from_be_bytes([body[1], body[2]]);
            let width = u16::from_be_bytes([body[3], body[4]]);
            let dtype = if precision > 8 { "uint16" } else { "uint8" };
            return Ok(HeaderData {
                format: "JPEG".to_string(),
                width: Some(width.into()),
                height: Some(height.into()),
                dtype: Some(dtype.to_string()),
                ..Default::default()
            });
        }

        offset += segment_length - 2;
    }
}

//! TIFF and BigTIFF images.
//!
//! Only the first Image File Directory is decoded. Its entries are read with one fetch, and
//! out-of-line values are resolved through the same [`PrefetchBuffer`], so small files and
//! files whose first IFD sits inside the sniff prefix need no further I/O. With
//! [`ReadOptions::count_ifds`] the rest of the IFD chain is walked as well, reading only each
//! directory's entry count and next offset.

mod reader;
pub mod tags;

use std::collections::{BTreeMap, HashSet};

use futures::future::{BoxFuture, FutureExt};
use tracing::warn;

use crate::dispatch::ReadOptions;
use crate::error::FastHeaderResult;
use crate::fetch::PrefetchBuffer;
use crate::header::HeaderData;
use crate::registry::{FormatParser, Signature};
use reader::{count_ifds, ImageFileDirectoryReader, TiffHeader};
pub use tags::{TagValue, Type};

/// Reads dimensions, sample type and the tag table of the first IFD.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiffParser;

impl FormatParser for TiffParser {
    fn name(&self) -> &'static str {
        "TIFF"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["tif", "tiff"]
    }

    fn signatures(&self) -> &'static [Signature] {
        const SIGNATURES: &[Signature] = &[
            Signature::new(0, b"II*\0"),
            Signature::new(0, b"MM\0*"),
            Signature::new(0, b"II+\0"),
            Signature::new(0, b"MM\0+"),
        ];
        SIGNATURES
    }

    fn priority(&self) -> i32 {
        10
    }

    fn parse<'a>(
        &'a self,
        buffer: &'a mut PrefetchBuffer<'_>,
        options: &'a ReadOptions,
    ) -> BoxFuture<'a, FastHeaderResult<HeaderData>> {
        parse_tiff(buffer, options.count_ifds).boxed()
    }
}

async fn parse_tiff(
    buffer: &mut PrefetchBuffer<'_>,
    count: bool,
) -> FastHeaderResult<HeaderData> {
    let header = TiffHeader::read(buffer).await?;
    let buffer = &*buffer;

    let ifd = ImageFileDirectoryReader::open(buffer, header.first_ifd_offset, &header).await?;
    let (tags, next_ifd_offset) = ifd.read(buffer).await?;

    let width = dimension(&tags, tags::IMAGE_WIDTH);
    let height = dimension(&tags, tags::IMAGE_LENGTH);
    let dtype = sample_dtype(&tags, header.bigtiff);
    if width.is_none() || height.is_none() || dtype.is_none() {
        warn!(
            ?width,
            ?height,
            ?dtype,
            "could not resolve all of ImageWidth, ImageLength and BitsPerSample"
        );
    }

    let ifd_count = if count {
        let seen = HashSet::from([header.first_ifd_offset]);
        Some(count_ifds(buffer, &header, seen, next_ifd_offset).await?)
    } else {
        None
    };

    Ok(HeaderData {
        format: if header.bigtiff { "BigTIFF" } else { "TIFF" }.to_string(),
        width,
        height,
        dtype,
        ifd_count,
        tags: Some(tags),
        ..Default::default()
    })
}

/// ImageWidth and ImageLength may be SHORT or LONG (LONG8 in BigTIFF).
fn dimension(tags: &BTreeMap<u16, TagValue>, tag: u16) -> Option<u64> {
    match tags.get(&tag)? {
        value @ (TagValue::Short(_) | TagValue::Unsigned(_) | TagValue::UnsignedBig(_)) => {
            value.as_u64()
        }
        _ => None,
    }
}

fn sample_dtype(tags: &BTreeMap<u16, TagValue>, bigtiff: bool) -> Option<String> {
    let bits = tags
        .get(&tags::BITS_PER_SAMPLE)?
        .first()
        .and_then(TagValue::as_u64)?;
    match bits {
        8 | 16 | 32 => Some(format!("uint{bits}")),
        64 if bigtiff => Some("uint64".to_string()),
        _ => {
            warn!(bits, "unsupported BitsPerSample");
            None
        }
    }
}

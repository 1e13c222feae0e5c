use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use tracing::warn;

use crate::error::{FastHeaderError, FastHeaderResult};
use crate::fetch::{MetadataCursor, PrefetchBuffer};
use crate::parsers::ensure_header;
use crate::parsers::tiff::tags::{TagValue, Type};
use crate::reader::{EndianAwareReader, Endianness};

/// Out-of-line tag values larger than this are not fetched.
const MAX_TAG_VALUE_BYTES: u64 = 64 * 1024;

/// The fixed TIFF or BigTIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TiffHeader {
    pub endianness: Endianness,
    pub bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Validate the magic bytes, read the endianness, and check for the bigtiff flag.
    ///
    /// Grows `buffer` to 8 bytes, or to 16 bytes for BigTIFF.
    pub async fn read(buffer: &mut PrefetchBuffer<'_>) -> FastHeaderResult<Self> {
        ensure_header(buffer, 8, "TIFF").await?;
        let head = buffer.as_slice();

        // Should be b"II" for little endian or b"MM" for big endian
        let endianness = match &head[..2] {
            b"II" => Endianness::LittleEndian,
            b"MM" => Endianness::BigEndian,
            magic => {
                return Err(FastHeaderError::parse(format!(
                    "unexpected magic bytes {magic:?}"
                )))
            }
        };
        let mut reader = EndianAwareReader::new(Bytes::copy_from_slice(&head[2..8]), endianness);

        match reader.read_u16()? {
            42 => Ok(Self {
                endianness,
                bigtiff: false,
                first_ifd_offset: reader.read_u32()?.into(),
            }),
            43 => {
                ensure_header(buffer, 16, "BigTIFF").await?;
                let mut reader = EndianAwareReader::new(
                    Bytes::copy_from_slice(&buffer.as_slice()[4..16]),
                    endianness,
                );
                // Bytesize of offsets, always 8 in BigTIFF
                let offset_bytes = reader.read_u16()?;
                if offset_bytes != 8 {
                    return Err(FastHeaderError::parse(format!(
                        "BigTIFF offset size must be 8, not {offset_bytes}"
                    )));
                }
                if reader.read_u16()? != 0 {
                    return Err(FastHeaderError::parse("BigTIFF constant not zero"));
                }
                Ok(Self {
                    endianness,
                    bigtiff: true,
                    first_ifd_offset: reader.read_u64()?,
                })
            }
            version => Err(FastHeaderError::parse(format!(
                "unexpected TIFF version {version}"
            ))),
        }
    }
}

/// Reads one Image File Directory.
///
/// The entry count is read first; [`read`](Self::read) then pulls every entry together with the
/// offset of the following IFD in a single fetch.
pub(crate) struct ImageFileDirectoryReader {
    endianness: Endianness,
    bigtiff: bool,
    /// The byte offset of the beginning of this IFD
    ifd_start_offset: u64,
    /// The number of tags in this IFD
    tag_count: u64,
    /// 12 bytes for classic TIFF and 20 bytes for BigTIFF.
    ifd_entry_byte_size: u64,
    /// The number of bytes that the value for the number of tags takes up.
    tag_count_byte_size: u64,
}

impl ImageFileDirectoryReader {
    /// Read the entry count of the IFD starting at the given file offset.
    pub async fn open(
        fetch: &PrefetchBuffer<'_>,
        ifd_start_offset: u64,
        header: &TiffHeader,
    ) -> FastHeaderResult<Self> {
        let mut cursor =
            MetadataCursor::new_with_offset(fetch, header.endianness, ifd_start_offset);

        // Tag   2 bytes
        // Type  2 bytes
        // Count:
        //  - bigtiff: 8 bytes
        //  - else: 4 bytes
        // Value:
        //  - bigtiff: 8 bytes either a pointer the value itself
        //  - else: 4 bytes either a pointer the value itself
        let (tag_count, ifd_entry_byte_size, tag_count_byte_size) = if header.bigtiff {
            (cursor.read_u64().await?, 20, 8)
        } else {
            (cursor.read_u16().await?.into(), 12, 2)
        };

        Ok(Self {
            endianness: header.endianness,
            bigtiff: header.bigtiff,
            ifd_start_offset,
            tag_count,
            ifd_entry_byte_size,
            tag_count_byte_size,
        })
    }

    /// Width of an offset field, which is also the inline value capacity of an entry.
    fn offset_byte_size(&self) -> u64 {
        if self.bigtiff {
            8
        } else {
            4
        }
    }

    fn entries_start(&self) -> u64 {
        self.ifd_start_offset + self.tag_count_byte_size
    }

    /// Byte size of all entries, rejecting counts that run past the addressable range.
    fn entries_byte_size(&self) -> FastHeaderResult<u64> {
        self.tag_count
            .checked_mul(self.ifd_entry_byte_size)
            .filter(|size| {
                self.entries_start()
                    .checked_add(*size)
                    .and_then(|end| end.checked_add(self.offset_byte_size()))
                    .is_some()
            })
            .ok_or_else(|| {
                FastHeaderError::parse(format!(
                    "IFD at offset {} declares {} entries",
                    self.ifd_start_offset, self.tag_count
                ))
            })
    }

    fn read_offset(&self, reader: &mut EndianAwareReader) -> FastHeaderResult<u64> {
        if self.bigtiff {
            reader.read_u64()
        } else {
            Ok(reader.read_u32()?.into())
        }
    }

    /// Read all tags out of this IFD, along with the offset of the next IFD.
    pub async fn read(
        &self,
        fetch: &PrefetchBuffer<'_>,
    ) -> FastHeaderResult<(BTreeMap<u16, TagValue>, Option<u64>)> {
        let entries_byte_size = self.entries_byte_size()?;
        let block_len = entries_byte_size + self.offset_byte_size();
        let block = fetch.fetch(self.entries_start(), block_len).await?;

        let mut tags = BTreeMap::new();
        let entry_size = self.ifd_entry_byte_size as usize;
        for idx in 0..self.tag_count as usize {
            let entry = block.slice(idx * entry_size..(idx + 1) * entry_size);
            if let Some((tag, value)) = self.read_entry(fetch, entry).await? {
                tags.insert(tag, value);
            }
        }

        let mut next =
            EndianAwareReader::new(block.slice(entries_byte_size as usize..), self.endianness);
        let next_ifd_offset = self.read_offset(&mut next)?;
        Ok((tags, (next_ifd_offset != 0).then_some(next_ifd_offset)))
    }

    /// Read only the offset of the next IFD, skipping over the entries.
    pub async fn next_ifd_offset(&self, fetch: &PrefetchBuffer<'_>) -> FastHeaderResult<Option<u64>> {
        let position = self.entries_start() + self.entries_byte_size()?;
        let mut cursor = MetadataCursor::new_with_offset(fetch, self.endianness, position);
        let next_ifd_offset = if self.bigtiff {
            cursor.read_u64().await?
        } else {
            cursor.read_u32().await?.into()
        };
        Ok((next_ifd_offset != 0).then_some(next_ifd_offset))
    }

    /// Decode one entry. Entries that cannot be resolved are skipped with a warning.
    async fn read_entry(
        &self,
        fetch: &PrefetchBuffer<'_>,
        entry: Bytes,
    ) -> FastHeaderResult<Option<(u16, TagValue)>> {
        let mut reader = EndianAwareReader::new(entry, self.endianness);
        let tag = reader.read_u16()?;
        let type_code = reader.read_u16()?;
        let count = if self.bigtiff {
            reader.read_u64()?
        } else {
            reader.read_u32()?.into()
        };

        let Ok(tag_type) = Type::try_from(type_code) else {
            warn!(tag, type_code, "skipping tag with unknown field type");
            return Ok(None);
        };
        if count == 0 {
            return Ok(Some((tag, TagValue::List(vec![]))));
        }
        let Some(value_byte_length) = count.checked_mul(tag_type.size()) else {
            warn!(tag, count, "skipping tag with oversized value count");
            return Ok(None);
        };

        let mut data = if value_byte_length <= self.offset_byte_size() {
            // The value is stored inline in the offset field.
            reader
        } else {
            let offset = self.read_offset(&mut reader)?;
            if value_byte_length > MAX_TAG_VALUE_BYTES {
                warn!(tag, value_byte_length, "skipping oversized tag value");
                return Ok(None);
            }
            match fetch.fetch(offset, value_byte_length).await {
                Ok(bytes) => EndianAwareReader::new(bytes, self.endianness),
                Err(err) if err.is_end_of_file() => {
                    warn!(tag, offset, %err, "tag value lies past the end of the file");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        };

        let value = TagValue::decode(&mut data, tag_type, count)?;
        Ok(Some((tag, value)))
    }
}

/// Walk the IFD chain onwards from `next`, returning the total number of IFDs including those
/// already in `seen`.
///
/// Only entry counts and next offsets are read. A repeated offset is a parse error.
pub(crate) async fn count_ifds(
    fetch: &PrefetchBuffer<'_>,
    header: &TiffHeader,
    mut seen: HashSet<u64>,
    mut next: Option<u64>,
) -> FastHeaderResult<u64> {
    while let Some(offset) = next {
        if !seen.insert(offset) {
            return Err(FastHeaderError::parse(format!(
                "IFD chain loops back to offset {offset}"
            )));
        }
        let ifd = ImageFileDirectoryReader::open(fetch, offset, header).await?;
        next = ifd.next_ifd_offset(fetch).await?;
    }
    Ok(seen.len() as u64)
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::reader::{ByteSource, LocalSource};

    /// Classic little-endian TIFF: header, one IFD at 8 with three entries, an out-of-line
    /// ASCII value at 50, and a second IFD at 64 with no entries.
    fn two_ifds() -> Vec<u8> {
        let mut data = b"II*\0".to_vec();
        data.extend_from_slice(&8u32.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        // width, SHORT, 1, 640
        data.extend_from_slice(&[0x00, 0x01, 3, 0, 1, 0, 0, 0, 0x80, 0x02, 0, 0]);
        // unknown field type 99
        data.extend_from_slice(&[0x10, 0x01, 99, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
        // software, ASCII, 6, at offset 50
        data.extend_from_slice(&[0x31, 0x01, 2, 0, 6, 0, 0, 0, 50, 0, 0, 0]);
        data.extend_from_slice(&64u32.to_le_bytes());
        data.resize(50, 0);
        data.extend_from_slice(b"tests\0");
        data.resize(64, 0);
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data
    }

    #[test]
    fn test_read_ifd() {
        let source = LocalSource::from_bytes(two_ifds().into());
        let mut buffer = PrefetchBuffer::new(&source, Bytes::new());
        let header = block_on(TiffHeader::read(&mut buffer)).unwrap();
        assert_eq!(header.endianness, Endianness::LittleEndian);
        assert!(!header.bigtiff);
        assert_eq!(header.first_ifd_offset, 8);

        let ifd = block_on(ImageFileDirectoryReader::open(&buffer, 8, &header)).unwrap();
        let (tags, next) = block_on(ifd.read(&buffer)).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[&256], TagValue::Short(640));
        assert_eq!(tags[&305], TagValue::Ascii("tests".into()));
        assert_eq!(next, Some(64));
        assert_eq!(block_on(ifd.next_ifd_offset(&buffer)).unwrap(), Some(64));
    }

    #[test]
    fn test_count_ifds() {
        let source = LocalSource::from_bytes(two_ifds().into());
        let mut buffer = PrefetchBuffer::new(&source, Bytes::new());
        let header = block_on(TiffHeader::read(&mut buffer)).unwrap();
        let count = block_on(count_ifds(&buffer, &header, HashSet::new(), Some(8))).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_ifd_cycle() {
        let mut data = two_ifds();
        // point the second IFD back at the first
        data[66..70].copy_from_slice(&8u32.to_le_bytes());
        let source = LocalSource::from_bytes(data.into());
        let mut buffer = PrefetchBuffer::new(&source, Bytes::new());
        let header = block_on(TiffHeader::read(&mut buffer)).unwrap();
        let err = block_on(count_ifds(&buffer, &header, HashSet::new(), Some(8))).unwrap_err();
        assert!(err.to_string().contains("loops back"));
    }

    #[test]
    fn test_bad_headers() {
        let cases: [&[u8]; 4] = [
            b"XX*\0\x08\0\0\0",
            b"II\x2a\x01\x08\0\0\0",
            b"II+\0\x04\0\0\0\x10\0\0\0\0\0\0\0",
            b"II+\0\x08\0\x01\0\x10\0\0\0\0\0\0\0",
        ];
        for case in cases {
            let source = LocalSource::from_bytes(Bytes::from_static(case));
            let mut buffer = PrefetchBuffer::new(&source, Bytes::new());
            let err = block_on(TiffHeader::read(&mut buffer)).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Parse, "{case:?}");
        }
        let source = LocalSource::from_bytes(Bytes::from_static(b"II*\0"));
        let mut buffer = PrefetchBuffer::new(&source, Bytes::new());
        let err = block_on(TiffHeader::read(&mut buffer)).unwrap_err();
        assert_eq!(err.to_string(), "File too small to be a valid TIFF");
        assert_eq!(source.bytes_fetched(), 0);
    }

    #[test]
    fn test_entry_count_overflow() {
        let mut data = b"II+\0\x08\0\0\0".to_vec();
        data.extend_from_slice(&16u64.to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        let source = LocalSource::from_bytes(data.into());
        let mut buffer = PrefetchBuffer::new(&source, Bytes::new());
        let header = block_on(TiffHeader::read(&mut buffer)).unwrap();
        assert!(header.bigtiff);
        let ifd = block_on(ImageFileDirectoryReader::open(&buffer, 16, &header)).unwrap();
        let err = block_on(ifd.read(&buffer)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }
}

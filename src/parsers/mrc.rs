//! MRC electron microscopy volumes.

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use num_enum::TryFromPrimitive;
use tracing::warn;

use crate::dispatch::ReadOptions;
use crate::error::{FastHeaderError, FastHeaderResult};
use crate::fetch::PrefetchBuffer;
use crate::header::HeaderData;
use crate::parsers::ensure_header;
use crate::reader::{EndianAwareReader, Endianness};
use crate::registry::{FormatParser, Signature};

const HEADER_LEN: u64 = 1024;
const CELL_OFFSET: usize = 40;
const MAGIC_OFFSET: usize = 208;
const MAGIC: &[u8; 4] = b"MAP ";
const ANGSTROM: f64 = 1e-10;

/// Voxel data type codes stored at offset 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
enum Mode {
    Int8 = 0,
    Int16 = 1,
    Float32 = 2,
    Complex64 = 4,
    Uint16 = 6,
    Float16 = 12,
}

impl Mode {
    fn dtype(&self) -> &'static str {
        match self {
            Mode::Int8 => "int8",
            Mode::Int16 => "int16",
            Mode::Float32 => "float32",
            Mode::Complex64 => "complex64",
            Mode::Uint16 => "uint16",
            Mode::Float16 => "float16",
        }
    }
}

/// Reads the fixed 1024-byte MRC header.
#[derive(Debug, Default, Clone, Copy)]
pub struct MrcParser;

impl FormatParser for MrcParser {
    fn name(&self) -> &'static str {
        "MRC"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["mrc", "map"]
    }

    fn signatures(&self) -> &'static [Signature] {
        const SIGNATURES: &[Signature] = &[Signature::new(MAGIC_OFFSET, MAGIC)];
        SIGNATURES
    }

    fn priority(&self) -> i32 {
        10
    }

    fn parse<'a>(
        &'a self,
        buffer: &'a mut PrefetchBuffer<'_>,
        _options: &'a ReadOptions,
    ) -> BoxFuture<'a, FastHeaderResult<HeaderData>> {
        parse_mrc(buffer).boxed()
    }
}

async fn parse_mrc(buffer: &mut PrefetchBuffer<'_>) -> FastHeaderResult<HeaderData> {
    ensure_header(buffer, HEADER_LEN, "MRC").await?;
    let header = Bytes::copy_from_slice(&buffer.as_slice()[..HEADER_LEN as usize]);

    let magic = &header[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()];
    if magic != MAGIC {
        warn!(?magic, "invalid MRC magic bytes");
    }

    let mut reader = EndianAwareReader::new(header.clone(), Endianness::LittleEndian);
    let (nx, ny, nz) = (reader.read_i32()?, reader.read_i32()?, reader.read_i32()?);
    let mode = reader.read_i32()?;
    if nx < 0 || ny < 0 || nz < 0 {
        return Err(FastHeaderError::parse(format!(
            "Negative MRC dimensions {nx}x{ny}x{nz}"
        )));
    }
    let mode = Mode::try_from(mode)
        .map_err(|_| FastHeaderError::parse(format!("Unsupported mode {mode}")))?;

    reader.advance(CELL_OFFSET - 16);
    let (cell_x, cell_y, cell_z) = (reader.read_f32()?, reader.read_f32()?, reader.read_f32()?);

    Ok(HeaderData {
        format: "MRC".to_string(),
        width: Some(nx as u64),
        height: Some(ny as u64),
        dtype: Some(mode.dtype().to_string()),
        depth: (nz > 1).then_some(nz as u64),
        single_voxel_physical_size_x: voxel_size(cell_x, nx),
        single_voxel_physical_size_y: voxel_size(cell_y, ny),
        single_voxel_physical_size_z: voxel_size(cell_z, nz),
        ..Default::default()
    })
}

/// Physical size of one voxel in metres along an axis, from the cell size in Ångström.
fn voxel_size(cell: f32, dimension: i32) -> Option<f64> {
    (cell != 0.0 && dimension != 0).then(|| f64::from(cell) * ANGSTROM / f64::from(dimension))
}

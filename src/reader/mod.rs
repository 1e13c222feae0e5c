//! Abstractions for reading byte windows from local files and HTTP servers.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use bytes::buf::Reader;
use bytes::{Buf, Bytes};
use futures::future::BoxFuture;

use crate::error::FastHeaderResult;

pub mod http;
pub mod local;

pub use http::{HttpConfig, HttpResponse, HttpSource, HttpTransport, RANGE_FALLBACK_MAX};
pub use local::{AsyncLocalSource, LocalSource};

/// The interface parsers use to pull exact byte windows out of a file or URL.
///
/// This was derived from the Parquet
/// [`AsyncFileReader`](https://docs.rs/parquet/latest/parquet/arrow/async_reader/trait.AsyncFileReader.html)
///
/// Notes:
///
/// 1. `fetch(start, length)` resolves to exactly `length` bytes or to an error. It never
///    resolves to a short read.
///
/// 2. Blocking sources ([`LocalSource`], [`HttpSource`] over a blocking client) return futures
///    that complete without suspending, so they can be driven with
///    [`futures::executor::block_on`]. Cooperative sources ([`AsyncLocalSource`],
///    [`HttpSource`] over an async client) need a tokio runtime.
///
/// 3. Every source counts the bytes it has received and the network round trips it has made.
pub trait ByteSource: Debug + Send + Sync {
    /// Retrieve `length` bytes starting at absolute offset `start`.
    fn fetch(&self, start: u64, length: u64) -> BoxFuture<'_, FastHeaderResult<Bytes>>;

    /// Total length of the source, when it is known without a separate fetch.
    fn size(&self) -> Option<u64>;

    /// Bytes actually received so far.
    fn bytes_fetched(&self) -> u64;

    /// Network round trips made so far.
    fn requests_made(&self) -> u64;
}

/// This allows Box<dyn ByteSource + '_> to be used as a ByteSource,
impl ByteSource for Box<dyn ByteSource + '_> {
    fn fetch(&self, start: u64, length: u64) -> BoxFuture<'_, FastHeaderResult<Bytes>> {
        self.as_ref().fetch(start, length)
    }

    fn size(&self) -> Option<u64> {
        self.as_ref().size()
    }

    fn bytes_fetched(&self) -> u64 {
        self.as_ref().bytes_fetched()
    }

    fn requests_made(&self) -> u64 {
        self.as_ref().requests_made()
    }
}

/// This allows Arc<dyn ByteSource + '_> to be used as a ByteSource,
impl ByteSource for Arc<dyn ByteSource + '_> {
    fn fetch(&self, start: u64, length: u64) -> BoxFuture<'_, FastHeaderResult<Bytes>> {
        self.as_ref().fetch(start, length)
    }

    fn size(&self) -> Option<u64> {
        self.as_ref().size()
    }

    fn bytes_fetched(&self) -> u64 {
        self.as_ref().bytes_fetched()
    }

    fn requests_made(&self) -> u64 {
        self.as_ref().requests_made()
    }
}

/// Running I/O totals for one source.
#[derive(Debug, Default)]
pub struct FetchCounter {
    bytes: AtomicU64,
    requests: AtomicU64,
}

impl FetchCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `bytes` received without a network round trip.
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one network round trip that delivered `bytes`.
    pub fn record_request(&self, bytes: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes received so far.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Round trips made so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Little Endian
    LittleEndian,
    /// Big Endian
    BigEndian,
}

pub(crate) struct EndianAwareReader {
    reader: Reader<Bytes>,
    endianness: Endianness,
}

impl EndianAwareReader {
    pub(crate) fn new(bytes: Bytes, endianness: Endianness) -> Self {
        Self {
            reader: bytes.reader(),
            endianness,
        }
    }

    /// Read a u8 from the cursor, advancing the internal state by 1 byte.
    pub(crate) fn read_u8(&mut self) -> FastHeaderResult<u8> {
        Ok(self.reader.read_u8()?)
    }

    /// Read a i8 from the cursor, advancing the internal state by 1 byte.
    pub(crate) fn read_i8(&mut self) -> FastHeaderResult<i8> {
        Ok(self.reader.read_i8()?)
    }

    pub(crate) fn read_u16(&mut self) -> FastHeaderResult<u16> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_u16::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_u16::<BigEndian>()?),
        }
    }

    pub(crate) fn read_i16(&mut self) -> FastHeaderResult<i16> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_i16::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_i16::<BigEndian>()?),
        }
    }

    pub(crate) fn read_u32(&mut self) -> FastHeaderResult<u32> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_u32::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_u32::<BigEndian>()?),
        }
    }

    pub(crate) fn read_i32(&mut self) -> FastHeaderResult<i32> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_i32::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_i32::<BigEndian>()?),
        }
    }

    pub(crate) fn read_u64(&mut self) -> FastHeaderResult<u64> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_u64::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_u64::<BigEndian>()?),
        }
    }

    pub(crate) fn read_i64(&mut self) -> FastHeaderResult<i64> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_i64::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_i64::<BigEndian>()?),
        }
    }

    pub(crate) fn read_f32(&mut self) -> FastHeaderResult<f32> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_f32::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_f32::<BigEndian>()?),
        }
    }

    pub(crate) fn read_f64(&mut self) -> FastHeaderResult<f64> {
        match self.endianness {
            Endianness::LittleEndian => Ok(self.reader.read_f64::<LittleEndian>()?),
            Endianness::BigEndian => Ok(self.reader.read_f64::<BigEndian>()?),
        }
    }

    /// Skip `amount` bytes.
    pub(crate) fn advance(&mut self, amount: usize) {
        self.reader.get_mut().advance(amount);
    }

    /// Bytes left to read.
    pub(crate) fn remaining(&self) -> usize {
        self.reader.get_ref().remaining()
    }
}

impl AsRef<[u8]> for EndianAwareReader {
    fn as_ref(&self) -> &[u8] {
        self.reader.get_ref().as_ref()
    }
}

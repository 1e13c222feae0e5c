#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fastheader::error::FastHeaderResult;
use fastheader::reader::{HttpConfig, HttpResponse, HttpSource, HttpTransport};
use futures::future::{BoxFuture, FutureExt};
use tempfile::NamedTempFile;
use tiff::encoder::{colortype, TiffEncoder};
use url::Url;

pub(crate) fn mrc(nx: i32, ny: i32, nz: i32, mode: i32, cell: [f32; 3]) -> Vec<u8> {
    let mut data = vec![0u8; 1024];
    for (i, value) in [nx, ny, nz, mode].iter().enumerate() {
        data[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    for (i, value) in cell.iter().enumerate() {
        data[40 + i * 4..44 + i * 4].copy_from_slice(&value.to_le_bytes());
    }
    data[208..212].copy_from_slice(b"MAP ");
    // voxel payload
    data.resize(1024 + 4096, 7);
    data
}

pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[8, 6, 0, 0, 0, 0, 0, 0, 0]);
    data.resize(2000, 0);
    data
}

/// A JPEG whose SOF0 segment starts after `padding` bytes of APP1 segments.
pub(crate) fn jpeg(width: u16, height: u16, padding: usize) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    let mut remaining = padding;
    while remaining > 0 {
        let body = remaining.min(60_000);
        data.extend_from_slice(&[0xFF, 0xE1]);
        data.extend_from_slice(&((body + 2) as u16).to_be_bytes());
        data.resize(data.len() + body, 0x20);
        remaining -= body;
    }
    data.extend_from_slice(&[0xFF, 0xC0, 0, 11, 8]);
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&[1, 1, 0x11, 0]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// A classic TIFF with `pages` 16-bit grayscale images.
pub(crate) fn tiff_gray16(width: u32, height: u32, pages: usize) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
    let image = vec![0u16; (width * height) as usize];
    for _ in 0..pages {
        encoder
            .write_image::<colortype::Gray16>(width, height, &image)
            .unwrap();
    }
    drop(encoder);
    cursor.into_inner()
}

/// A BigTIFF with one RGB image.
pub(crate) fn bigtiff_rgb8(width: u32, height: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new_big(&mut cursor).unwrap();
    let image = vec![0u8; (width * height * 3) as usize];
    encoder
        .write_image::<colortype::RGB8>(width, height, &image)
        .unwrap();
    drop(encoder);
    cursor.into_inner()
}

/// Write `data` to a temporary file ending in `.{extension}`.
pub(crate) fn temp_file(data: &[u8], extension: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()
        .unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

/// How a [`FakeServer`] treats `Range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeSupport {
    /// Declares `Accept-Ranges: bytes` and answers with 206.
    Honoured,
    /// No `Accept-Ranges` and always answers with 200.
    Absent,
    /// Declares `Accept-Ranges: bytes` but still answers with 200.
    Ignored,
}

/// An in-process HTTP server that counts requests.
#[derive(Debug)]
pub(crate) struct FakeServer {
    content: Bytes,
    ranges: RangeSupport,
    declares_length: bool,
    pub heads: AtomicUsize,
    pub full_gets: AtomicUsize,
    pub range_gets: AtomicUsize,
}

impl FakeServer {
    pub(crate) fn new(content: impl Into<Bytes>, ranges: RangeSupport) -> Arc<Self> {
        Self::build(content.into(), ranges, true)
    }

    /// A range-honouring server that never sends `Content-Length`.
    pub(crate) fn without_length(content: impl Into<Bytes>) -> Arc<Self> {
        Self::build(content.into(), RangeSupport::Honoured, false)
    }

    fn build(content: Bytes, ranges: RangeSupport, declares_length: bool) -> Arc<Self> {
        Arc::new(Self {
            content,
            ranges,
            declares_length,
            heads: AtomicUsize::new(0),
            full_gets: AtomicUsize::new(0),
            range_gets: AtomicUsize::new(0),
        })
    }

    pub(crate) fn gets(&self) -> usize {
        self.full_gets.load(Ordering::SeqCst) + self.range_gets.load(Ordering::SeqCst)
    }

    fn respond(&self, status: u16, body: Bytes) -> FastHeaderResult<HttpResponse> {
        Ok(HttpResponse {
            status,
            content_length: self.declares_length.then_some(body.len() as u64),
            accept_ranges: self.ranges != RangeSupport::Absent,
            body,
        })
    }
}

impl HttpTransport for FakeServer {
    fn head(&self, _url: &Url, _timeout: Duration) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        let mut response = self.respond(200, Bytes::new());
        if let Ok(response) = &mut response {
            response.content_length = self
                .declares_length
                .then_some(self.content.len() as u64);
        }
        futures::future::ready(response).boxed()
    }

    fn get(
        &self,
        _url: &Url,
        range: Option<Range<u64>>,
        _timeout: Duration,
    ) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
        let response = match range {
            Some(range) if self.ranges == RangeSupport::Honoured => {
                self.range_gets.fetch_add(1, Ordering::SeqCst);
                let len = self.content.len() as u64;
                if range.start >= len {
                    self.respond(416, Bytes::new())
                } else {
                    let end = range.end.min(len);
                    self.respond(206, self.content.slice(range.start as usize..end as usize))
                }
            }
            Some(_) => {
                self.range_gets.fetch_add(1, Ordering::SeqCst);
                self.respond(200, self.content.clone())
            }
            None => {
                self.full_gets.fetch_add(1, Ordering::SeqCst);
                self.respond(200, self.content.clone())
            }
        };
        futures::future::ready(response).boxed()
    }
}

pub(crate) fn http_source(
    server: &Arc<FakeServer>,
    path: &str,
    fallback_max: u64,
) -> HttpSource<Arc<FakeServer>> {
    let url = Url::parse(&format!("http://files.example.com/{path}")).unwrap();
    HttpSource::new(server.clone(), url).with_config(HttpConfig {
        fallback_max,
        ..Default::default()
    })
}

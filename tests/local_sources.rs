use std::fs::File;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use fastheader::error::ErrorKind;
use fastheader::{read_header, read_header_blocking, read_headers, ReadOptions, Source};

mod util;

#[tokio::test]
async fn test_blocking_and_async_agree() {
    let options = ReadOptions::default().with_peek(16).with_count_ifds(true);
    let files = [
        (util::mrc(64, 32, 8, 2, [64.0, 32.0, 8.0]), "mrc"),
        (util::png(640, 480), "png"),
        (util::jpeg(800, 600, 30_000), "jpg"),
        (util::tiff_gray16(40, 30, 2), "tif"),
        (util::bigtiff_rgb8(20, 10), "tif"),
    ];

    for (data, extension) in files {
        let file = util::temp_file(&data, extension);
        let blocking = read_header_blocking(file.path(), &options).unwrap();
        let cooperative = read_header(file.path(), &options).await.unwrap();
        assert!(blocking.success(), "{extension}: {:?}", blocking.error());
        assert_eq!(blocking, cooperative, "{extension}");
        assert_eq!(blocking.requests_made, 0);
        assert!(blocking.bytes_fetched > 0);
    }
}

#[test]
fn test_mrc_volume() {
    let data = util::mrc(128, 96, 10, 1, [256.0, 192.0, 30.0]);
    let file = util::temp_file(&data, "mrc");

    let result = read_header_blocking(file.path(), &ReadOptions::default()).unwrap();
    let header = result.data().unwrap();
    assert_eq!(header.format, "MRC");
    assert_eq!((header.width, header.height, header.depth), (Some(128), Some(96), Some(10)));
    assert_eq!(header.dtype.as_deref(), Some("int16"));
    let x = header.single_voxel_physical_size_x.unwrap();
    let z = header.single_voxel_physical_size_z.unwrap();
    assert!((x - 2e-10).abs() < 1e-16);
    assert!((z - 3e-10).abs() < 1e-16);
    assert_eq!(result.bytes_fetched, 4096);
}

#[test]
fn test_peek_is_leading_bytes() {
    let data = util::png(3, 2);
    let file = util::temp_file(&data, "png");

    for peek in [8, 100, 1500] {
        let options = ReadOptions::default().with_peek(peek);
        let result = read_header_blocking(file.path(), &options).unwrap();
        let header = result.data().unwrap();
        assert_eq!(
            header.peek_bytes_b64.as_deref(),
            Some(STANDARD.encode(&data[..peek]).as_str())
        );
    }

    // A peek past the end is clamped to the file.
    let result = read_header_blocking(file.path(), &ReadOptions::default().with_peek(5000)).unwrap();
    let encoded = result.data().unwrap().peek_bytes_b64.clone().unwrap();
    assert_eq!(STANDARD.decode(encoded).unwrap(), data);
}

#[test]
fn test_ifd_count() {
    let options = ReadOptions::default().with_count_ifds(true);

    let file = util::temp_file(&util::tiff_gray16(16, 16, 3), "tif");
    let result = read_header_blocking(file.path(), &options).unwrap();
    let header = result.data().unwrap();
    assert_eq!(header.ifd_count, Some(3));
    assert_eq!((header.width, header.height), (Some(16), Some(16)));
    assert_eq!(header.dtype.as_deref(), Some("uint16"));

    let file = util::temp_file(&util::tiff_gray16(16, 16, 1), "tif");
    let result = read_header_blocking(file.path(), &options).unwrap();
    assert_eq!(result.data().unwrap().ifd_count, Some(1));

    let result = read_header_blocking(file.path(), &ReadOptions::default()).unwrap();
    assert_eq!(result.data().unwrap().ifd_count, None);
}

#[test]
fn test_bigtiff() {
    let file = util::temp_file(&util::bigtiff_rgb8(20, 10), "tiff");
    let result = read_header_blocking(file.path(), &ReadOptions::default()).unwrap();
    let header = result.data().unwrap();
    assert_eq!(header.format, "BigTIFF");
    assert_eq!((header.width, header.height), (Some(20), Some(10)));
    assert_eq!(header.dtype.as_deref(), Some("uint8"));
    assert!(header.tags.as_ref().unwrap().contains_key(&258));
}

#[test]
fn test_handle_sources() {
    let data = util::jpeg(33, 44, 200);
    let file = util::temp_file(&data, "jpg");
    let options = ReadOptions::default();

    let sources = [
        Source::File(File::open(file.path()).unwrap()),
        Source::Stream(Box::new(Cursor::new(data.clone()))),
        Source::Bytes(Bytes::from(data.clone())),
    ];
    for source in sources {
        let result = read_header_blocking(source, &options).unwrap();
        let header = result.data().unwrap();
        assert_eq!(header.format, "JPEG");
        assert_eq!((header.width, header.height), (Some(33), Some(44)));
    }
}

#[test]
fn test_extension_fallback() {
    let file = util::temp_file(&[0u8; 300], "png");
    let result = read_header_blocking(file.path(), &ReadOptions::default()).unwrap();
    let error = result.error().unwrap();
    assert_eq!(error.kind, ErrorKind::Parse);
    assert_eq!(error.message, "Invalid PNG signature");
}

#[test]
fn test_unknown_format() {
    let file = util::temp_file(b"just some text, nothing to see here", "txt");
    let err = read_header_blocking(file.path(), &ReadOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownFormat);
}

#[test]
fn test_truncated_header() {
    let data = util::mrc(4, 4, 1, 0, [0.0; 3]);
    let file = util::temp_file(&data[..500], "mrc");
    let result = read_header_blocking(file.path(), &ReadOptions::default()).unwrap();
    assert_eq!(
        result.error().unwrap().message,
        "File too small to be a valid MRC"
    );
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let png = util::temp_file(&util::png(7, 9), "png");
    let text = util::temp_file(&[b'a'; 100], "txt");
    let tiff = util::temp_file(&util::tiff_gray16(5, 6, 2), "tif");

    let sources = vec![
        Source::from(png.path()),
        Source::from(text.path()),
        Source::from("/nowhere/missing.mrc"),
        Source::from(tiff.path()),
    ];
    let results = read_headers(sources, &ReadOptions::default().with_count_ifds(true)).await;
    assert_eq!(results.len(), 4);

    assert_eq!(results[0].data().unwrap().width, Some(7));
    assert_eq!(results[1].error().unwrap().kind, ErrorKind::UnknownFormat);
    assert!(results[1].bytes_fetched > 0);
    assert_eq!(results[2].error().unwrap().kind, ErrorKind::Io);
    assert_eq!(results[2].bytes_fetched, 0);
    assert_eq!(results[3].data().unwrap().ifd_count, Some(2));
}

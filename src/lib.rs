#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod header;
pub mod parsers;
pub mod reader;
pub mod registry;

pub use dispatch::{read_header, read_header_blocking, read_headers, ReadOptions, Source};
pub use header::{HeaderData, HeaderError, HeaderResult};
pub use registry::{FormatParser, FormatRegistry, Signature};

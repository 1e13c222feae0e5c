//! The result of one header read.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, FastHeaderError, FastHeaderResult};
use crate::parsers::tiff::TagValue;
use crate::reader::ByteSource;

/// Metadata extracted from a header. Fields without a value are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderData {
    /// Format name, e.g. `"TIFF"` or `"BigTIFF"`.
    pub format: String,
    /// Width in pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    /// Height in pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    /// Sample data type name, e.g. `"uint8"` or `"float32"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    /// Number of sections of a volume, only when there is more than one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
    /// Voxel size along x in metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_voxel_physical_size_x: Option<f64>,
    /// Voxel size along y in metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_voxel_physical_size_y: Option<f64>,
    /// Voxel size along z in metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_voxel_physical_size_z: Option<f64>,
    /// Number of IFDs in the chain, when counting was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifd_count: Option<u64>,
    /// Every decoded tag of the first IFD, keyed by tag id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<u16, TagValue>>,
    /// Standard base64 of the leading bytes, when a peek was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peek_bytes_b64: Option<String>,
}

/// The stored form of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderError {
    /// Boundary category.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
}

impl From<&FastHeaderError> for HeaderError {
    fn from(err: &FastHeaderError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one parse attempt together with the I/O it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderResult {
    /// Metadata on success, the failure otherwise.
    pub outcome: Result<HeaderData, HeaderError>,
    /// Bytes the source received for this read.
    pub bytes_fetched: u64,
    /// Network round trips the source made for this read.
    pub requests_made: u64,
}

impl HeaderResult {
    /// Build a result, taking the counters from `source` as they are now.
    pub fn new(outcome: FastHeaderResult<HeaderData>, source: &dyn ByteSource) -> Self {
        Self {
            outcome: outcome.map_err(|err| HeaderError::from(&err)),
            bytes_fetched: source.bytes_fetched(),
            requests_made: source.requests_made(),
        }
    }

    /// A failure that happened before any source I/O could be attributed.
    pub fn failed(err: &FastHeaderError) -> Self {
        Self {
            outcome: Err(err.into()),
            bytes_fetched: 0,
            requests_made: 0,
        }
    }

    /// Whether parsing succeeded.
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The metadata, on success.
    pub fn data(&self) -> Option<&HeaderData> {
        self.outcome.as_ref().ok()
    }

    /// The failure, if parsing failed.
    pub fn error(&self) -> Option<&HeaderError> {
        self.outcome.as_ref().err()
    }

    /// Flatten into a single mapping.
    ///
    /// `success`, `bytes_fetched` and `requests_made` are always present and `error` only on
    /// failure. On success every metadata field with a value is included, restricted to
    /// `fields` when given.
    pub fn to_fields(&self, fields: Option<&[&str]>) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("success".into(), self.success().into());
        match &self.outcome {
            Ok(data) => {
                if let Ok(Value::Object(metadata)) = serde_json::to_value(data) {
                    let wanted = |key: &str| fields.map_or(true, |fields| fields.contains(&key));
                    map.extend(
                        metadata
                            .into_iter()
                            .filter(|(key, value)| !value.is_null() && wanted(key.as_str())),
                    );
                }
            }
            Err(err) => {
                map.insert("error".into(), err.message.clone().into());
            }
        }
        map.insert("bytes_fetched".into(), self.bytes_fetched.into());
        map.insert("requests_made".into(), self.requests_made.into());
        map
    }
}

impl Serialize for HeaderResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_fields(None).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn png() -> HeaderResult {
        HeaderResult {
            outcome: Ok(HeaderData {
                format: "PNG".into(),
                width: Some(3),
                height: Some(2),
                dtype: Some("uint8".into()),
                ..Default::default()
            }),
            bytes_fetched: 4096,
            requests_made: 0,
        }
    }

    #[test]
    fn test_success_fields() {
        let value = serde_json::to_value(png()).unwrap();
        assert_eq!(
            value,
            json!({
                "success": true,
                "format": "PNG",
                "width": 3,
                "height": 2,
                "dtype": "uint8",
                "bytes_fetched": 4096,
                "requests_made": 0,
            })
        );
    }

    #[test]
    fn test_filtered_fields() {
        let fields = png().to_fields(Some(&["width", "depth", "success"][..]));
        assert_eq!(
            Value::Object(fields),
            json!({"success": true, "width": 3, "bytes_fetched": 4096, "requests_made": 0})
        );
    }

    #[test]
    fn test_failure_fields() {
        let result = HeaderResult {
            outcome: Err((&FastHeaderError::parse("Invalid PNG signature")).into()),
            bytes_fetched: 24,
            requests_made: 2,
        };
        assert!(!result.success());
        assert_eq!(result.error().unwrap().kind, ErrorKind::Parse);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "success": false,
                "error": "Invalid PNG signature",
                "bytes_fetched": 24,
                "requests_made": 2,
            })
        );
    }

    #[test]
    fn test_tags_and_nan() {
        let mut tags = BTreeMap::new();
        tags.insert(256, TagValue::Short(3));
        let result = HeaderResult {
            outcome: Ok(HeaderData {
                format: "TIFF".into(),
                single_voxel_physical_size_x: Some(f64::NAN),
                tags: Some(tags),
                ..Default::default()
            }),
            bytes_fetched: 0,
            requests_made: 0,
        };
        let fields = result.to_fields(None);
        assert_eq!(fields["tags"], json!({"256": 3}));
        assert!(!fields.contains_key("single_voxel_physical_size_x"));
    }
}

//! Conversion of raw result documents into a [MeasurementSet].
//!
//! Three document shapes are recognised:
//! - NLMT round trips, either a top-level array of records or an object carrying a `round_trips`
//!   array. Delays are in nanoseconds and are reported in milliseconds.
//! - iPerf results, an object with an `intervals` array or, failing that, an `end.streams`
//!   summary. Rates are in bits per second and are reported in Mbps.
//! - Legacy dashboard exports, an object with a `measurements` array of `latency_ms` values.
//!
//! Anything else is rejected with [SchemaError::UnsupportedSchema].

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use netgauge_summary_model::{MeasurementSet, MeasurementSetError, ToolFamily, ToolKind};
use serde_json::Value;

mod iperf;
mod legacy;
mod nlmt;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Nanoseconds per millisecond.
pub(crate) const NANOS_PER_MILLI: f64 = 1e6;
/// Bits per second per megabit per second.
pub(crate) const BPS_PER_MBPS: f64 = 1e6;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read result document: {0}")]
    Io(#[from] std::io::Error),
    #[error("Result document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported result document: {kind}")]
    UnsupportedSchema {
        /// The family that was expected, if any.
        family: Option<ToolFamily>,
        /// A short description of what the document looked like.
        kind: String,
    },
    #[error("Result document produced invalid samples: {0}")]
    InvalidSamples(#[from] MeasurementSetError),
}

/// The recognised document shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    NlmtRecords,
    NlmtRoundTrips,
    IperfIntervals,
    IperfSummaryStreams,
    LegacyMeasurements,
}

impl DocumentShape {
    pub fn family(&self) -> ToolFamily {
        match self {
            DocumentShape::NlmtRecords
            | DocumentShape::NlmtRoundTrips
            | DocumentShape::LegacyMeasurements => ToolFamily::Nlmt,
            DocumentShape::IperfIntervals | DocumentShape::IperfSummaryStreams => {
                ToolFamily::Iperf
            }
        }
    }
}

/// Identify the shape of a parsed document.
pub fn detect_shape(document: &Value) -> Option<DocumentShape> {
    match document {
        Value::Array(records) if records.iter().all(Value::is_object) => {
            Some(DocumentShape::NlmtRecords)
        }
        Value::Object(map) => {
            if map.get("round_trips").is_some_and(Value::is_array) {
                Some(DocumentShape::NlmtRoundTrips)
            } else if map.get("intervals").is_some_and(|v| {
                v.as_array().is_some_and(|intervals| !intervals.is_empty())
            }) {
                Some(DocumentShape::IperfIntervals)
            } else if document
                .pointer("/end/streams")
                .is_some_and(Value::is_array)
            {
                Some(DocumentShape::IperfSummaryStreams)
            } else if map.get("measurements").is_some_and(Value::is_array) {
                Some(DocumentShape::LegacyMeasurements)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Guess the tool that wrote a document. Client mode is assumed, the documents don't say.
pub fn infer_tool(document: &Value) -> Result<ToolKind, SchemaError> {
    match detect_shape(document).map(|shape| shape.family()) {
        Some(ToolFamily::Nlmt) => Ok(ToolKind::NlmtClient),
        Some(ToolFamily::Iperf) => Ok(ToolKind::IperfClient),
        None => Err(unsupported(None, document)),
    }
}

/// Convert a parsed document written by `tool` into a [MeasurementSet].
pub fn normalize(tool: ToolKind, document: &Value) -> Result<MeasurementSet, SchemaError> {
    let shape = detect_shape(document)
        .filter(|shape| shape.family() == tool.family())
        .ok_or_else(|| unsupported(Some(tool.family()), document))?;
    log::trace!("Normalizing {tool} document with shape {shape:?}");

    match shape {
        DocumentShape::NlmtRecords => nlmt::normalize_records(tool, document, None),
        DocumentShape::NlmtRoundTrips => nlmt::normalize_round_trips(tool, document),
        DocumentShape::IperfIntervals => iperf::normalize_intervals(tool, document),
        DocumentShape::IperfSummaryStreams => iperf::normalize_summary_streams(tool, document),
        DocumentShape::LegacyMeasurements => legacy::normalize(tool, document),
    }
}

/// Parse raw bytes as JSON, transparently inflating them if they are gzip compressed.
pub fn decode_document(bytes: &[u8]) -> Result<Value, SchemaError> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut inflated)?;
        Ok(serde_json::from_slice(&inflated)?)
    } else {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Read and decode a result file, compressed or not.
pub fn read_document(path: impl AsRef<Path>) -> Result<Value, SchemaError> {
    let bytes = std::fs::read(path.as_ref())?;
    decode_document(&bytes)
}

/// Read a result file and normalize it. When `tool` is [None] it is inferred from the document.
pub fn normalize_file(
    tool: Option<ToolKind>,
    path: impl AsRef<Path>,
) -> Result<MeasurementSet, SchemaError> {
    let document = read_document(path)?;
    let tool = match tool {
        Some(tool) => tool,
        None => infer_tool(&document)?,
    };
    normalize(tool, &document)
}

fn unsupported(family: Option<ToolFamily>, document: &Value) -> SchemaError {
    SchemaError::UnsupportedSchema {
        family,
        kind: describe(document),
    }
}

/// Describe a document well enough to tell why it wasn't recognised.
fn describe(document: &Value) -> String {
    match document {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => {
            let non_objects = items.iter().filter(|v| !v.is_object()).count();
            format!("array of {} items, {non_objects} not objects", items.len())
        }
        Value::Object(map) => {
            let mut keys = map.keys().take(8).cloned().collect::<Vec<_>>();
            if map.len() > keys.len() {
                keys.push("...".to_string());
            }
            match map.get("error").and_then(Value::as_str) {
                // iPerf reports failures in-band
                Some(error) => format!("object with keys [{}], error: {error}", keys.join(", ")),
                None => format!("object with keys [{}]", keys.join(", ")),
            }
        }
    }
}

/// Drop samples whose value can't be reported and log why.
pub(crate) fn keep_reportable(sequence_number: u64, value: f64) -> bool {
    if !value.is_finite() || value < 0.0 {
        log::debug!("Dropping sample {sequence_number} with unusable value {value}");
        return false;
    }
    true
}

//! Turns NLMT and iPerf result files into normalized [MeasurementSet]s and summarises them.
//!
//! Used by the runner once an artifact is located, and directly for files that were produced
//! elsewhere and uploaded for re-analysis.

mod aggregate;
pub mod normalize;
pub mod report;

pub use aggregate::summarize;
pub use normalize::{
    decode_document, detect_shape, infer_tool, normalize, normalize_file, read_document,
    DocumentShape, SchemaError,
};
pub use report::{summary_table, write_json_report, SummaryOutput};

pub use netgauge_summary_model::{MeasurementSet, Sample, SummaryStats, ToolKind};

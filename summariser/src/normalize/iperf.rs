use chrono::{DateTime, Utc};
use netgauge_summary_model::{MeasurementSet, Sample, ToolKind};
use serde::Deserialize;
use serde_json::Value;

use super::{keep_reportable, SchemaError, BPS_PER_MBPS};

#[derive(Debug, Deserialize)]
struct Interval {
    #[serde(default)]
    streams: Vec<IntervalStream>,
}

#[derive(Debug, Deserialize)]
struct IntervalStream {
    /// Offset from the start of the test, in seconds.
    start: Option<f64>,
    bits_per_second: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SummaryStream {
    receiver: Option<Rate>,
    sender: Option<Rate>,
    udp: Option<Rate>,
}

#[derive(Debug, Deserialize)]
struct Rate {
    bits_per_second: Option<f64>,
}

impl SummaryStream {
    /// Prefer what arrived over what was sent.
    fn bits_per_second(&self) -> Option<f64> {
        [&self.receiver, &self.sender, &self.udp]
            .into_iter()
            .flatten()
            .find_map(|rate| rate.bits_per_second)
    }
}

/// Normalize per-interval throughput. Each interval's value is the sum of its streams' rates.
///
/// Intervals where no stream reported a rate are skipped. The sequence number is the interval's
/// position in the document.
pub(super) fn normalize_intervals(
    tool: ToolKind,
    document: &Value,
) -> Result<MeasurementSet, SchemaError> {
    let intervals: Vec<Interval> =
        serde_json::from_value(document.get("intervals").cloned().unwrap_or(Value::Null))?;
    let test_start = test_start(document);

    let samples = intervals
        .iter()
        .enumerate()
        .filter_map(|(index, interval)| {
            let sequence_number = index as u64;
            let rates = interval
                .streams
                .iter()
                .filter_map(|s| s.bits_per_second)
                .collect::<Vec<_>>();
            if rates.is_empty() {
                log::debug!("Interval {index} has no stream rates, skipping");
                return None;
            }

            let value = rates.iter().sum::<f64>() / BPS_PER_MBPS;
            let offset = interval.streams.iter().find_map(|s| s.start);
            keep_reportable(sequence_number, value).then(|| {
                Sample::new(sequence_number, value).with_timestamp(offset_from(test_start, offset))
            })
        })
        .collect::<Vec<_>>();

    Ok(MeasurementSet::new(tool, samples)?.with_tool_summary(end_summary(document)))
}

/// Normalize the end-of-test summary when no intervals were recorded, one sample per stream.
pub(super) fn normalize_summary_streams(
    tool: ToolKind,
    document: &Value,
) -> Result<MeasurementSet, SchemaError> {
    let streams: Vec<SummaryStream> = serde_json::from_value(
        document
            .pointer("/end/streams")
            .cloned()
            .unwrap_or(Value::Null),
    )?;

    let samples = streams
        .iter()
        .enumerate()
        .filter_map(|(index, stream)| {
            let sequence_number = index as u64;
            let value = stream.bits_per_second()? / BPS_PER_MBPS;
            keep_reportable(sequence_number, value)
                .then(|| Sample::new(sequence_number, value).with_timestamp(test_start(document)))
        })
        .collect::<Vec<_>>();

    Ok(MeasurementSet::new(tool, samples)?.with_tool_summary(end_summary(document)))
}

fn test_start(document: &Value) -> Option<DateTime<Utc>> {
    let secs = document.pointer("/start/timestamp/timesecs")?.as_i64()?;
    DateTime::from_timestamp(secs, 0)
}

/// An offset that does not fit the calendar leaves the sample without a timestamp.
fn offset_from(start: Option<DateTime<Utc>>, offset_secs: Option<f64>) -> Option<DateTime<Utc>> {
    let start = start?;
    let offset_millis = (offset_secs? * 1000.0).round();
    if !offset_millis.is_finite() || offset_millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let offset = chrono::Duration::try_milliseconds(offset_millis as i64)?;
    start.checked_add_signed(offset)
}

fn end_summary(document: &Value) -> Option<Value> {
    document
        .pointer("/end/sum_received")
        .or_else(|| document.pointer("/end/sum"))
        .cloned()
}

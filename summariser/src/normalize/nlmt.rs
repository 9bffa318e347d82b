use chrono::{DateTime, Utc};
use netgauge_summary_model::{MeasurementSet, Sample, ToolKind};
use serde::Deserialize;
use serde_json::Value;

use super::{keep_reportable, SchemaError, NANOS_PER_MILLI};

#[derive(Debug, Deserialize)]
struct RoundTrip {
    seqno: Option<u64>,
    delay: Option<Delay>,
    timestamps: Option<Timestamps>,
}

#[derive(Debug, Deserialize)]
struct Delay {
    /// Round-trip time in nanoseconds.
    rtt: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Timestamps {
    client: Option<ClientTimestamps>,
}

#[derive(Debug, Deserialize)]
struct ClientTimestamps {
    send: Option<Clock>,
}

#[derive(Debug, Deserialize)]
struct Clock {
    /// Wall clock time in nanoseconds since the Unix epoch.
    wall: Option<i64>,
}

impl RoundTrip {
    fn sent_at(&self) -> Option<DateTime<Utc>> {
        let wall = self.timestamps.as_ref()?.client.as_ref()?.send.as_ref()?.wall?;
        Some(DateTime::from_timestamp_nanos(wall))
    }
}

/// Normalize the tool's native layout, an object holding `round_trips` and an optional summary
/// block under `stats` or, in older results, `summary`.
pub(super) fn normalize_round_trips(
    tool: ToolKind,
    document: &Value,
) -> Result<MeasurementSet, SchemaError> {
    let records = document.get("round_trips").unwrap_or(&Value::Null);
    let tool_summary = document
        .get("stats")
        .or_else(|| document.get("summary"))
        .cloned();
    normalize_records(tool, records, tool_summary)
}

/// Normalize a plain array of round-trip records.
///
/// Records without a delay, or with a null round-trip time, were lost and are skipped. Records
/// without a sequence number take their position in the array.
pub(super) fn normalize_records(
    tool: ToolKind,
    records: &Value,
    tool_summary: Option<Value>,
) -> Result<MeasurementSet, SchemaError> {
    let records: Vec<RoundTrip> = serde_json::from_value(records.clone())?;
    let total = records.len();

    let mut samples = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let sequence_number = record.seqno.unwrap_or(index as u64);
            let rtt = record.delay.as_ref()?.rtt?;
            let value = rtt as f64 / NANOS_PER_MILLI;
            keep_reportable(sequence_number, value)
                .then(|| Sample::new(sequence_number, value).with_timestamp(record.sent_at()))
        })
        .collect::<Vec<_>>();

    samples.sort_by_key(|s| s.sequence_number);
    let before_dedup = samples.len();
    samples.dedup_by_key(|s| s.sequence_number);
    if samples.len() < before_dedup {
        log::warn!(
            "Dropped {} round trips with repeated sequence numbers",
            before_dedup - samples.len()
        );
    }
    log::debug!("Kept {} of {total} round trips", samples.len());

    Ok(MeasurementSet::new(tool, samples)?.with_tool_summary(tool_summary))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::normalize;

    #[test]
    fn converts_nanoseconds_to_milliseconds() {
        let document = json!([
            {"seqno": 0, "delay": {"rtt": 12_345_678}},
            {"seqno": 1, "delay": {"rtt": 1}},
            {"seqno": 2, "delay": {"rtt": 40_000_000}},
        ]);

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        let values = set.values().collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                12_345_678.0 / 1_000_000.0,
                1.0 / 1_000_000.0,
                40_000_000.0 / 1_000_000.0
            ]
        );
    }

    #[test]
    fn lost_round_trips_are_absent_not_zero() {
        let document = json!([
            {"seqno": 0, "delay": {"rtt": 5_000_000}},
            {"seqno": 1, "lost": "true"},
            {"seqno": 2, "delay": {"rtt": null}},
            {"seqno": 3, "delay": {}},
            {"seqno": 4, "delay": {"rtt": 7_000_000}},
        ]);

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        let sequence_numbers = set
            .samples()
            .iter()
            .map(|s| s.sequence_number)
            .collect::<Vec<_>>();
        assert_eq!(sequence_numbers, vec![0, 4]);
        assert!(set.values().all(|v| v > 0.0));
    }

    #[test]
    fn reorders_and_dedups_sequence_numbers() {
        let document = json!([
            {"seqno": 2, "delay": {"rtt": 2_000_000}},
            {"seqno": 1, "delay": {"rtt": 1_000_000}},
            {"seqno": 2, "delay": {"rtt": 9_000_000}},
        ]);

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        assert_eq!(set.values().collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn missing_sequence_numbers_use_position() {
        let document = json!([
            {"delay": {"rtt": 3_000_000}},
            {"delay": {"rtt": 4_000_000}},
        ]);

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        assert_eq!(set.samples()[0].sequence_number, 0);
        assert_eq!(set.samples()[1].sequence_number, 1);
    }

    #[test]
    fn native_layout_keeps_stats_and_timestamps() {
        let document = json!({
            "stats": {"rtt": {"mean": 5_000_000}},
            "round_trips": [
                {
                    "seqno": 0,
                    "timestamps": {"client": {"send": {"wall": 1_700_000_000_000_000_000i64}}},
                    "delay": {"rtt": 5_000_000}
                }
            ]
        });

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.samples()[0].timestamp,
            Some(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
        );
        assert_eq!(
            set.tool_summary(),
            Some(&json!({"rtt": {"mean": 5_000_000}}))
        );
    }

    #[test]
    fn summary_block_is_kept_when_there_are_no_stats() {
        let document = json!({
            "summary": {"rtt": {"mean": 5_000_000}},
            "round_trips": [{"seqno": 0, "delay": {"rtt": 5_000_000}}]
        });

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        assert_eq!(set.values().collect::<Vec<_>>(), vec![5.0]);
        assert_eq!(
            set.tool_summary(),
            Some(&json!({"rtt": {"mean": 5_000_000}}))
        );
    }

    #[test]
    fn negative_delays_are_dropped() {
        let document = json!([
            {"seqno": 0, "delay": {"rtt": -5}},
            {"seqno": 1, "delay": {"rtt": 5_000_000}},
        ]);

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.samples()[0].sequence_number, 1);
    }

    #[test]
    fn wrongly_typed_fields_are_a_decode_error() {
        let document = json!([{"seqno": "first", "delay": {"rtt": 1}}]);
        let err = normalize(ToolKind::NlmtClient, &document).unwrap_err();
        assert!(matches!(err, SchemaError::Json(_)));
    }
}

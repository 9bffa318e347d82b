use chrono::{DateTime, Utc};
use netgauge_summary_model::{MeasurementSet, Sample, ToolKind};
use serde::Deserialize;
use serde_json::Value;

use super::{keep_reportable, SchemaError};

/// One entry of the dashboard's own export, latencies are already in milliseconds.
#[derive(Debug, Deserialize)]
struct Measurement {
    latency_ms: Option<f64>,
    timestamp: Option<Value>,
}

pub(super) fn normalize(tool: ToolKind, document: &Value) -> Result<MeasurementSet, SchemaError> {
    let measurements: Vec<Measurement> = serde_json::from_value(
        document
            .get("measurements")
            .cloned()
            .unwrap_or(Value::Null),
    )?;

    let samples = measurements
        .iter()
        .enumerate()
        .filter_map(|(index, m)| {
            let sequence_number = index as u64;
            let value = m.latency_ms?;
            keep_reportable(sequence_number, value).then(|| {
                Sample::new(sequence_number, value)
                    .with_timestamp(m.timestamp.as_ref().and_then(parse_timestamp))
            })
        })
        .collect::<Vec<_>>();

    Ok(MeasurementSet::new(tool, samples)?)
}

/// Timestamps are either RFC 3339 strings or seconds since the epoch.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::normalize;

    #[test]
    fn reads_dashboard_export() {
        let document = json!({
            "measurements": [
                {"latency_ms": 21.5, "timestamp": "2024-05-01T10:00:00Z"},
                {"latency_ms": null, "timestamp": "2024-05-01T10:00:01Z"},
                {"latency_ms": 19.0, "timestamp": 1_714_557_602}
            ]
        });

        let set = normalize(ToolKind::NlmtClient, &document).unwrap();

        assert_eq!(set.values().collect::<Vec<_>>(), vec![21.5, 19.0]);
        assert_eq!(set.samples()[1].sequence_number, 2);
        assert_eq!(
            set.samples()[0].timestamp,
            Some(DateTime::from_timestamp(1_714_557_600, 0).unwrap())
        );
        assert_eq!(
            set.samples()[1].timestamp,
            Some(DateTime::from_timestamp(1_714_557_602, 0).unwrap())
        );
    }
}

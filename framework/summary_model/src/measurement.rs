use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The external tool, and the mode it was run in, that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolKind {
    NlmtClient,
    NlmtServer,
    IperfClient,
    IperfServer,
}

/// The family of result documents a [ToolKind] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolFamily {
    Nlmt,
    Iperf,
}

impl ToolKind {
    pub fn family(&self) -> ToolFamily {
        match self {
            ToolKind::NlmtClient | ToolKind::NlmtServer => ToolFamily::Nlmt,
            ToolKind::IperfClient | ToolKind::IperfServer => ToolFamily::Iperf,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, ToolKind::NlmtServer | ToolKind::IperfServer)
    }

    /// The unit that samples from this tool are reported in once normalized.
    pub fn unit(&self) -> Unit {
        match self.family() {
            ToolFamily::Nlmt => Unit::Milliseconds,
            ToolFamily::Iperf => Unit::Mbps,
        }
    }

    /// Whether a run of this kind leaves a result file behind.
    pub fn produces_artifact(&self) -> bool {
        !matches!(self, ToolKind::NlmtServer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::NlmtClient => "nlmt-client",
            ToolKind::NlmtServer => "nlmt-server",
            ToolKind::IperfClient => "iperf-client",
            ToolKind::IperfServer => "iperf-server",
        }
    }
}

impl Display for ToolKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown tool kind '{0}', expected one of nlmt-client, nlmt-server, iperf-client, iperf-server")]
pub struct UnknownToolKind(String);

impl FromStr for ToolKind {
    type Err = UnknownToolKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "nlmt-client" => Ok(ToolKind::NlmtClient),
            "nlmt-server" => Ok(ToolKind::NlmtServer),
            "iperf-client" => Ok(ToolKind::IperfClient),
            "iperf-server" => Ok(ToolKind::IperfServer),
            _ => Err(UnknownToolKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "Mbps")]
    Mbps,
}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Milliseconds => f.write_str("ms"),
            Unit::Mbps => f.write_str("Mbps"),
        }
    }
}

/// A single normalized observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sequence_number: u64,
    /// Round-trip time in milliseconds or throughput in Mbps, see [MeasurementSet::unit].
    pub value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Sample {
    pub fn new(sequence_number: u64, value: f64) -> Self {
        Self {
            sequence_number,
            value,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeasurementSetError {
    #[error("Sequence number {current} does not follow {previous}")]
    NotIncreasing { previous: u64, current: u64 },
    #[error("Sample {sequence_number} has invalid value {value}")]
    InvalidValue { sequence_number: u64, value: f64 },
}

/// The tool-agnostic result of one run.
///
/// Sequence numbers are strictly increasing and values are finite and non-negative. Both are
/// checked on construction so a set can't be built in a state that breaks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSet {
    tool: ToolKind,
    unit: Unit,
    samples: Vec<Sample>,
    /// Any summary block the tool wrote alongside the raw samples, kept as written.
    tool_summary: Option<serde_json::Value>,
}

impl MeasurementSet {
    pub fn new(tool: ToolKind, samples: Vec<Sample>) -> Result<Self, MeasurementSetError> {
        for pair in samples.windows(2) {
            if pair[1].sequence_number <= pair[0].sequence_number {
                return Err(MeasurementSetError::NotIncreasing {
                    previous: pair[0].sequence_number,
                    current: pair[1].sequence_number,
                });
            }
        }
        if let Some(bad) = samples
            .iter()
            .find(|s| !s.value.is_finite() || s.value < 0.0)
        {
            return Err(MeasurementSetError::InvalidValue {
                sequence_number: bad.sequence_number,
                value: bad.value,
            });
        }

        Ok(Self {
            tool,
            unit: tool.unit(),
            samples,
            tool_summary: None,
        })
    }

    pub fn with_tool_summary(mut self, tool_summary: Option<serde_json::Value>) -> Self {
        self.tool_summary = tool_summary;
        self
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + Clone + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn tool_summary(&self) -> Option<&serde_json::Value> {
        self.tool_summary.as_ref()
    }
}

/// Descriptive statistics over the values of a [MeasurementSet].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation, `0.0` when there are fewer than two samples.
    pub stddev: f64,
    pub count: usize,
}

impl SummaryStats {
    /// Statistics for a set without samples. All values are zero.
    pub fn empty() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            stddev: 0.0,
            count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_order_sequence_numbers() {
        let err = MeasurementSet::new(
            ToolKind::NlmtClient,
            vec![Sample::new(2, 1.0), Sample::new(2, 1.5)],
        )
        .unwrap_err();

        assert_eq!(
            err,
            MeasurementSetError::NotIncreasing {
                previous: 2,
                current: 2
            }
        );
    }

    #[test]
    fn rejects_negative_values() {
        let err = MeasurementSet::new(
            ToolKind::IperfClient,
            vec![Sample::new(0, 1.0), Sample::new(1, -0.5)],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            MeasurementSetError::InvalidValue {
                sequence_number: 1,
                ..
            }
        ));
    }

    #[test]
    fn unit_follows_tool_family() {
        let set = MeasurementSet::new(ToolKind::IperfServer, vec![]).unwrap();
        assert_eq!(set.unit(), Unit::Mbps);
        assert!(set.is_empty());

        let set = MeasurementSet::new(ToolKind::NlmtClient, vec![Sample::new(0, 12.5)]).unwrap();
        assert_eq!(set.unit(), Unit::Milliseconds);
        assert_eq!(set.values().collect::<Vec<_>>(), vec![12.5]);
    }

    #[test]
    fn parse_tool_kind() {
        assert_eq!("nlmt-client".parse::<ToolKind>().unwrap(), ToolKind::NlmtClient);
        assert_eq!("IPERF_SERVER".parse::<ToolKind>().unwrap(), ToolKind::IperfServer);
        assert!("ping".parse::<ToolKind>().is_err());
    }

    #[test]
    fn tool_kind_serializes_in_screaming_case() {
        let value = serde_json::to_value(ToolKind::IperfClient).unwrap();
        assert_eq!(value, serde_json::json!("IPERF_CLIENT"));
    }
}

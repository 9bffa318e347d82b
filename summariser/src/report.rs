use std::path::{Path, PathBuf};

use netgauge_summary_model::{MeasurementSet, SummaryStats, ToolKind, Unit};
use serde::{Deserialize, Serialize};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::aggregate::summarize;

/// The summary of one result file, as written to the JSON report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryOutput {
    pub source: PathBuf,
    pub tool: ToolKind,
    pub unit: Unit,
    pub stats: SummaryStats,
    pub tool_summary: Option<serde_json::Value>,
}

impl SummaryOutput {
    pub fn new(source: impl Into<PathBuf>, set: &MeasurementSet) -> Self {
        Self {
            source: source.into(),
            tool: set.tool(),
            unit: set.unit(),
            stats: summarize(set),
            tool_summary: set.tool_summary().cloned(),
        }
    }
}

#[derive(Tabled)]
struct SummaryRow {
    source: String,
    tool: ToolKind,
    unit: Unit,
    count: usize,
    #[tabled(display = "float2")]
    min: f64,
    #[tabled(display = "float2")]
    max: f64,
    #[tabled(display = "float2")]
    mean: f64,
    #[tabled(display = "float2", rename = "stddev (jitter)")]
    stddev: f64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

/// Render summaries as a table for the terminal.
pub fn summary_table(outputs: &[SummaryOutput]) -> String {
    let rows = outputs
        .iter()
        .map(|output| SummaryRow {
            source: output.source.display().to_string(),
            tool: output.tool,
            unit: output.unit,
            count: output.stats.count,
            min: output.stats.min,
            max: output.stats.max,
            mean: output.stats.mean,
            stddev: output.stats.stddev,
        })
        .collect::<Vec<_>>();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.to_string()
}

/// Write the summaries as pretty JSON into a new, timestamped file in `dir`.
pub fn write_json_report(dir: &Path, outputs: &[SummaryOutput]) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!(
        "summariser-report-{}.json",
        chrono::Utc::now().format("%Y-%m-%dT%H.%M.%S%.fZ")
    ));
    let report = std::fs::File::create_new(&path)?;
    serde_json::to_writer_pretty(report, outputs)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use netgauge_summary_model::Sample;

    use super::*;

    fn output() -> SummaryOutput {
        let set = MeasurementSet::new(
            ToolKind::IperfClient,
            vec![Sample::new(0, 90.0), Sample::new(1, 110.0)],
        )
        .unwrap();
        SummaryOutput::new("iperf_host.json", &set)
    }

    #[test]
    fn table_contains_rounded_stats() {
        let table = summary_table(&[output()]);

        assert!(table.contains("iperf_host.json"));
        assert!(table.contains("iperf-client"));
        assert!(table.contains("Mbps"));
        assert!(table.contains("100.00"));
        assert!(table.contains("14.14"));
    }

    #[test]
    fn json_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = vec![output()];

        let path = write_json_report(dir.path(), &outputs).unwrap();
        let loaded: Vec<SummaryOutput> =
            serde_json::from_reader(std::fs::File::open(path).unwrap()).unwrap();

        pretty_assertions::assert_eq!(loaded, outputs);
    }
}

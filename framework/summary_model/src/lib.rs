use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

mod measurement;
mod state;

pub use measurement::{
    MeasurementSet, MeasurementSetError, Sample, SummaryStats, ToolFamily, ToolKind, Unit,
    UnknownToolKind,
};
pub use state::{FailureReason, RunState};

/// Summary of a run group, one entry per target host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the orchestrator. Unique for each submitted request.
    pub run_id: String,
    /// The tool and mode that was run
    pub tool: ToolKind,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The duration that the run was configured with, in seconds
    pub run_duration: u64,
    /// The outcome for each host, in the order the hosts were requested
    ///
    /// Server runs have a single entry without a host.
    pub hosts: Vec<HostRunSummary>,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of.
    pub env: HashMap<String, String>,
    /// The version of NetGauge that was used for this run
    pub netgauge_version: String,
}

/// The outcome of a single host's run within a [RunSummary].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRunSummary {
    pub host: Option<String>,
    pub state: RunState,
    pub exit_code: Option<i32>,
    pub artifact: Option<PathBuf>,
    /// Statistics over the normalized samples, if the artifact could be read
    pub stats: Option<SummaryStats>,
    /// A description of what went wrong, if anything did
    pub error: Option<String>,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        tool: ToolKind,
        started_at: i64,
        run_duration: u64,
        netgauge_version: String,
    ) -> Self {
        Self {
            run_id,
            tool,
            started_at,
            run_duration,
            hosts: Vec::new(),
            env: HashMap::with_capacity(0),
            netgauge_version,
        }
    }

    /// Record the outcome for one host
    pub fn add_host(&mut self, host: HostRunSummary) {
        self.hosts.push(host);
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used for the run.
    /// It uses the
    ///     - Tool kind
    ///     - Run duration
    ///     - Target hosts
    ///     - Selected environment variables
    ///     - NetGauge version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.tool.as_str().as_bytes());
        Digest::update(&mut hasher, self.run_duration.to_le_bytes());
        self.hosts
            .iter()
            .filter_map(|h| h.host.as_deref())
            .sorted()
            .for_each(|host| Digest::update(&mut hasher, host.as_bytes()));
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.netgauge_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_summary(hosts: &[&str]) -> RunSummary {
        let mut summary = RunSummary::new(
            "run-1".to_string(),
            ToolKind::NlmtClient,
            1_700_000_000,
            60,
            "0.1.0".to_string(),
        );
        for host in hosts {
            summary.add_host(HostRunSummary {
                host: Some(host.to_string()),
                state: RunState::Completed,
                exit_code: Some(0),
                artifact: None,
                stats: Some(SummaryStats::empty()),
                error: None,
            });
        }
        summary
    }

    #[test]
    fn fingerprint_ignores_host_order_and_run_id() {
        let a = sample_summary(&["a.example", "b.example"]);
        let mut b = sample_summary(&["b.example", "a.example"]);
        b.run_id = "run-2".to_string();

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_env() {
        let a = sample_summary(&["a.example"]);
        let mut b = a.clone();
        b.add_env("NG_NLMT_PATH".to_string(), "/opt/nlmt".to_string());

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn append_and_load_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.jsonl");

        let first = sample_summary(&["a.example"]);
        let second = sample_summary(&["b.example"]);
        append_run_summary(&first, path.clone()).unwrap();
        append_run_summary(&second, path.clone()).unwrap();

        let loaded = load_summary_runs(path).unwrap();
        pretty_assertions::assert_eq!(loaded, vec![first, second]);
    }
}

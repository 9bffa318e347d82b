use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::{OutputLayout, DEFAULT_OUTPUT_ROOT};
use crate::request::DEFAULT_OUTPUT_TEMPLATE;

/// Options shared by every scenario. Flatten into the scenario's own parser.
#[derive(Debug, Clone, clap::Args)]
pub struct NetGaugeScenarioCli {
    /// Host to measure against. Repeat the flag or separate hosts with commas to run against
    /// several hosts at once, each gets its own process.
    ///
    /// For server runs this is the address to bind to and may be left out.
    #[clap(long = "host", value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// How long to measure for, e.g. `60s`, `500ms` or `2m`. A bare number is seconds.
    #[clap(long, default_value = "60s", value_parser = parse_duration)]
    pub duration: Duration,

    /// Time between probes or reports, in the same format as `--duration`.
    #[clap(long, default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,

    /// Run the tool in server mode. The duration is how long to serve for.
    #[clap(long, default_value = "false")]
    pub server: bool,

    /// Payload or buffer length in bytes.
    #[clap(long)]
    pub packet_size: Option<u32>,

    /// Directory to write results under.
    #[clap(long, env = "NG_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_ROOT)]
    pub output_dir: PathBuf,

    /// Whether each run writes into its own directory or all share the output directory.
    #[clap(long, value_enum, default_value_t)]
    pub layout: OutputLayout,

    /// Result file name. Supports `{host}`, `{timestamp}` and `{run_id}`.
    #[clap(long, default_value = DEFAULT_OUTPUT_TEMPLATE)]
    pub output_template: String,

    /// Extra time after the duration for the tool to write its results before it is killed.
    #[clap(long, value_parser = parse_duration)]
    pub grace: Option<Duration>,

    /// File that a summary of the run is appended to, as a line of JSON.
    #[clap(long, env = "RUN_SUMMARY_PATH", default_value = "run_summary.jsonl")]
    pub run_summary: PathBuf,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}

pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number = number
        .parse::<f64>()
        .map_err(|_| format!("'{s}' does not start with a number"))?;
    let secs = match unit.trim() {
        "" | "s" => number,
        "ms" => number / 1000.0,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        other => return Err(format!("Unknown duration unit '{other}', use ms, s, m or h")),
    };
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid duration '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        common: NetGaugeScenarioCli,
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("60s"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("100ms"), Ok(Duration::from_millis(100)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("0.5s"), Ok(Duration::from_millis(500)));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10 days").is_err());
    }

    #[test]
    fn hosts_split_on_commas() {
        let cli = TestCli::parse_from([
            "test",
            "--host",
            "a.example,b.example",
            "--host",
            "c.example",
            "--duration",
            "5s",
            "--layout",
            "shared",
        ]);

        assert_eq!(cli.common.hosts, ["a.example", "b.example", "c.example"]);
        assert_eq!(cli.common.duration, Duration::from_secs(5));
        assert_eq!(cli.common.interval, Duration::from_secs(1));
        assert_eq!(cli.common.layout, OutputLayout::Shared);
        assert!(!cli.common.server);
    }
}

use std::path::PathBuf;

use clap::Parser;
use netgauge_summary_model::ToolKind;

#[derive(Parser)]
#[command(about = "Summarise NLMT and iPerf result files", long_about = None)]
pub struct SummariserCli {
    /// The tool that wrote the files, for example `nlmt-client` or `iperf-client`.
    ///
    /// When omitted, the tool is inferred from the shape of each document.
    #[arg(long)]
    pub tool: Option<ToolKind>,

    /// Also write a `summariser-report-<timestamp>.json` file into the current directory.
    #[arg(long, default_value = "false")]
    pub json_report: bool,

    /// Result files to summarise, gzip compressed or plain JSON.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

//! Runs NLMT and iPerf against one or more hosts, follows their output and reads their results.

mod cli;
mod command;
mod error;
mod handle;
mod init;
mod locator;
mod orchestrator;
mod process;
mod progress;
mod request;
mod run;
mod shutdown;
mod tool_binary;
mod types;

pub mod prelude {
    pub use crate::cli::NetGaugeScenarioCli;
    pub use crate::command::build_command;
    pub use crate::error::RunError;
    pub use crate::handle::{OutputSubscription, RunHandle};
    pub use crate::init::init;
    pub use crate::locator::{ArtifactLocator, ArtifactNotFound, ArtifactPattern, LocatorConfig};
    pub use crate::orchestrator::{
        AggregateStatus, OrchestratorConfig, OrchestratorConfigBuilder, OutputLayout, RunGroup,
        RunOrchestrator, DEFAULT_OUTPUT_ROOT,
    };
    pub use crate::process::{
        CommandSpec, ExitOutcome, LaunchError, OutputLines, ProcessRunner, RunningProcess,
    };
    pub use crate::request::{
        IperfParams, NlmtParams, OutputTemplate, RequestError, RunRequest, ToolParams, Transport,
        DEFAULT_NLMT_HMAC, DEFAULT_NLMT_SERVER, DEFAULT_OUTPUT_TEMPLATE,
    };
    pub use crate::run::run;
    pub use crate::tool_binary::{tool_path, NG_IPERF_PATH_ENV, NG_NLMT_PATH_ENV};
    pub use crate::types::NetGaugeResult;

    pub use netgauge_core::prelude::{ShutdownHandle, ShutdownSignalError};
    pub use netgauge_summariser::{summarize, summary_table, SummaryOutput};
    pub use netgauge_summary_model::{
        FailureReason, MeasurementSet, RunState, Sample, SummaryStats, ToolFamily, ToolKind,
        Unit,
    };
}

//! Runs one process per target host, enforces the time budget of each and reads their results.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use chrono::{DateTime, Local};
use netgauge_core::prelude::ShutdownHandle;
use netgauge_summariser::normalize_file;
use netgauge_summary_model::{FailureReason, MeasurementSet, RunState, ToolFamily, ToolKind};

use crate::command::build_command;
use crate::error::RunError;
use crate::handle::RunHandle;
use crate::locator::{ArtifactLocator, ArtifactPattern, LocatorConfig};
use crate::process::{CommandSpec, ExitOutcome, ProcessRunner, RunningProcess};
use crate::request::RunRequest;
use crate::tool_binary::{default_binary_name, tool_path};
use crate::types::NetGaugeResult;

/// Where results are written when no output directory is configured.
pub const DEFAULT_OUTPUT_ROOT: &str = "netgauge_outputs";

/// Format of the `{timestamp}` placeholder in output file names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// How long to keep reading output after the process has gone. A tool that left a child
/// holding its pipes open would otherwise keep the run from finishing.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether each run gets its own directory under the output root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputLayout {
    /// `<output root>/<handle id>/<file>`
    #[default]
    PerRun,
    /// `<output root>/<file>`
    Shared,
}

/// Used to build an [`OrchestratorConfig`].
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    /// Directory that results are written under.
    ///
    /// If [`None`] when [`Self::build`] is called then [`DEFAULT_OUTPUT_ROOT`] is used.
    output_root: Option<PathBuf>,

    layout: OutputLayout,

    /// Path to the NLMT binary. If [`None`] it is resolved from the environment at submit time.
    nlmt_path: Option<PathBuf>,

    /// Path to the iPerf binary. If [`None`] it is resolved from the environment at submit time.
    iperf_path: Option<PathBuf>,

    /// Allowance after the run duration for the tool to flush its results and exit.
    flush_grace: Option<Duration>,

    /// How long a cancelled process has to exit before it is killed.
    cancel_grace: Option<Duration>,

    locator: Option<LocatorConfig>,
}

impl OrchestratorConfigBuilder {
    pub fn with_output_root(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.output_root = Some(path.into());
        self
    }

    pub fn with_layout(&mut self, layout: OutputLayout) -> &mut Self {
        self.layout = layout;
        self
    }

    /// Override the binary used for a tool family.
    pub fn with_binary_path(&mut self, family: ToolFamily, path: impl Into<PathBuf>) -> &mut Self {
        match family {
            ToolFamily::Nlmt => self.nlmt_path = Some(path.into()),
            ToolFamily::Iperf => self.iperf_path = Some(path.into()),
        }
        self
    }

    pub fn with_flush_grace(&mut self, grace: Duration) -> &mut Self {
        self.flush_grace = Some(grace);
        self
    }

    pub fn with_cancel_grace(&mut self, grace: Duration) -> &mut Self {
        self.cancel_grace = Some(grace);
        self
    }

    pub fn with_locator(&mut self, locator: LocatorConfig) -> &mut Self {
        self.locator = Some(locator);
        self
    }

    /// Build an [`OrchestratorConfig`], applying defaults for anything not set.
    pub fn build(self) -> OrchestratorConfig {
        OrchestratorConfig {
            output_root: self
                .output_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
            layout: self.layout,
            nlmt_path: self.nlmt_path,
            iperf_path: self.iperf_path,
            flush_grace: self.flush_grace.unwrap_or(Duration::from_secs(10)),
            cancel_grace: self.cancel_grace.unwrap_or(Duration::from_secs(3)),
            locator: self.locator.unwrap_or_default(),
        }
    }
}

/// Must be created with an [`OrchestratorConfigBuilder`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    output_root: PathBuf,
    layout: OutputLayout,
    nlmt_path: Option<PathBuf>,
    iperf_path: Option<PathBuf>,
    flush_grace: Duration,
    cancel_grace: Duration,
    locator: LocatorConfig,
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    pub fn flush_grace(&self) -> Duration {
        self.flush_grace
    }

    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    fn binary_override(&self, family: ToolFamily) -> Option<&Path> {
        match family {
            ToolFamily::Nlmt => self.nlmt_path.as_deref(),
            ToolFamily::Iperf => self.iperf_path.as_deref(),
        }
    }
}

/// Counts of runs in a group by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStatus {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    /// Failed for any reason other than cancellation.
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

impl AggregateStatus {
    pub fn from_states(states: impl IntoIterator<Item = RunState>) -> Self {
        states
            .into_iter()
            .fold(AggregateStatus::default(), |mut status, state| {
                status.total += 1;
                match state {
                    RunState::Pending => status.pending += 1,
                    RunState::Running => status.running += 1,
                    RunState::Completed => status.completed += 1,
                    RunState::Failed(FailureReason::Cancelled) => status.cancelled += 1,
                    RunState::Failed(_) => status.failed += 1,
                    RunState::TimedOut => status.timed_out += 1,
                }
                status
            })
    }

    pub fn all_completed(&self) -> bool {
        self.completed == self.total
    }

    pub fn is_finished(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

impl Display for AggregateStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} completed", self.completed, self.total)?;
        for (count, label) in [
            (self.failed, "failed"),
            (self.timed_out, "timed out"),
            (self.cancelled, "cancelled"),
            (self.running, "running"),
            (self.pending, "pending"),
        ] {
            if count > 0 {
                write!(f, ", {count} {label}")?;
            }
        }
        Ok(())
    }
}

/// The runs started for one [RunRequest], one per target host.
#[derive(Debug, Clone)]
pub struct RunGroup {
    run_id: String,
    request: Arc<RunRequest>,
    handles: Vec<RunHandle>,
    started_at: DateTime<Local>,
}

impl RunGroup {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    /// In the order the hosts were requested.
    pub fn handles(&self) -> &[RunHandle] {
        &self.handles
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn status(&self) -> AggregateStatus {
        AggregateStatus::from_states(self.handles.iter().map(RunHandle::state))
    }

    /// Wait for every run to reach a terminal state.
    pub async fn wait_all(&self) -> Vec<RunState> {
        futures::future::join_all(self.handles.iter().map(RunHandle::wait_terminal)).await
    }

    /// Wait for every run to finish and return their results in host order.
    pub async fn await_all(&self) -> Vec<Result<MeasurementSet, RunError>> {
        futures::future::join_all(self.handles.iter().map(RunHandle::await_completion)).await
    }

    pub fn cancel_all(&self) {
        self.handles.iter().for_each(RunHandle::cancel);
    }
}

/// Starts runs and supervises them until they finish.
///
/// Owns the output root, which is created when the orchestrator is.
#[derive(Debug, Clone)]
pub struct RunOrchestrator {
    config: Arc<OrchestratorConfig>,
    locator: ArtifactLocator,
    shutdown: ShutdownHandle,
}

impl RunOrchestrator {
    pub fn new(config: OrchestratorConfig) -> NetGaugeResult<Self> {
        std::fs::create_dir_all(&config.output_root).with_context(|| {
            format!(
                "Failed to create output directory '{}'",
                config.output_root.display()
            )
        })?;

        Ok(Self {
            locator: ArtifactLocator::new(config.locator),
            config: Arc::new(config),
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Use a shared shutdown signal, firing it cancels every run this orchestrator started.
    pub fn with_shutdown_handle(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start one run per target host of `request`. Returns as soon as the runs are scheduled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_run(&self, request: RunRequest) -> NetGaugeResult<RunGroup> {
        let run_id = nanoid::nanoid!();
        let started_at = Local::now();
        let timestamp = started_at.format(TIMESTAMP_FORMAT).to_string();
        let request = Arc::new(request);
        let binary = self.binary_for(request.kind());

        log::info!(
            "Submitting {} run {run_id} for {} target(s) over {:?}",
            request.kind(),
            request.targets().len(),
            request.duration()
        );

        let mut handles = Vec::new();
        for (index, host) in request.targets().into_iter().enumerate() {
            let handle_id = format!("{run_id}-{index}");
            let output_dir = match self.config.layout {
                OutputLayout::PerRun => self.config.output_root.join(&handle_id),
                OutputLayout::Shared => self.config.output_root.clone(),
            };
            std::fs::create_dir_all(&output_dir).with_context(|| {
                format!(
                    "Failed to create run output directory '{}'",
                    output_dir.display()
                )
            })?;

            let template = request.output_template();
            let file_name = template.render(host.as_deref(), &run_id, &timestamp);
            let pattern = template.search_pattern(host.as_deref(), &run_id);
            let command = build_command(
                &request,
                host.as_deref(),
                &binary,
                &output_dir,
                &file_name,
            );

            let handle = RunHandle::new(handle_id, host, request.clone());
            tokio::spawn(drive(
                handle.clone(),
                Launch {
                    command,
                    output_dir,
                    pattern,
                },
                self.clone(),
            ));
            handles.push(handle);
        }

        Ok(RunGroup {
            run_id,
            request,
            handles,
            started_at,
        })
    }

    fn binary_for(&self, tool: ToolKind) -> PathBuf {
        let family = tool.family();
        if let Some(path) = self.config.binary_override(family) {
            return path.to_path_buf();
        }
        tool_path(family).unwrap_or_else(|e| {
            // Launching the bare name fails each run with a launch error the caller can see.
            log::error!("{e:#}");
            PathBuf::from(default_binary_name(family))
        })
    }
}

struct Launch {
    command: CommandSpec,
    output_dir: PathBuf,
    pattern: ArtifactPattern,
}

enum Stop {
    /// `stop_requested` is set when the server was signalled at the end of its serving window.
    Exited {
        exit: std::io::Result<ExitOutcome>,
        stop_requested: bool,
    },
    TimedOut,
    Cancelled,
}

async fn drive(handle: RunHandle, launch: Launch, orchestrator: RunOrchestrator) {
    let (state, outcome) = supervise(&handle, launch, &orchestrator).await;
    match &outcome {
        Ok(set) => log::info!(
            "Run {} finished {state} with {} samples",
            handle.id(),
            set.len()
        ),
        Err(e) if e.is_cancelled() => log::info!("Run {} was cancelled", handle.id()),
        Err(e) => log::error!("Run {} finished {state}: {e}", handle.id()),
    }
    handle.finish(state, outcome);
}

async fn supervise(
    handle: &RunHandle,
    launch: Launch,
    orchestrator: &RunOrchestrator,
) -> (RunState, Result<MeasurementSet, RunError>) {
    let tool = handle.request().kind();
    let config = &orchestrator.config;

    if handle.is_cancel_requested() || orchestrator.shutdown.is_shutdown() {
        handle.close_output();
        return (
            RunState::Failed(FailureReason::Cancelled),
            Err(RunError::Cancelled),
        );
    }

    let started_at = SystemTime::now();
    handle.mark_started(started_at);
    log::debug!("Launching '{}'", launch.command);
    let mut process = match ProcessRunner::start(&launch.command) {
        Ok(process) => process,
        Err(e) => {
            handle.close_output();
            return (RunState::Failed(FailureReason::Launch), Err(e.into()));
        }
    };
    handle.mark_running(process.id());

    let streamer = process.take_output().map(|mut output| {
        let handle = handle.clone();
        let target = format!("{tool}::{}", handle.host().unwrap_or("server"));
        tokio::spawn(async move {
            while let Some(line) = output.next_line().await {
                log::info!(target: &target, "{line}");
                handle.push_line(line);
            }
        })
    });

    let duration = handle.request().duration();
    let budget = duration + config.flush_grace;
    let stop = wait_for_stop(handle, &mut process, orchestrator, duration, budget).await;

    let (state, exit_code) = match stop {
        Stop::Exited {
            exit: Ok(exit),
            stop_requested,
        } => (classify_exit(exit, stop_requested), exit.code()),
        Stop::Exited { exit: Err(e), .. } => {
            log::error!("Lost track of PID {:?}: {e}", process.id());
            if let Err(e) = process.kill().await {
                log::warn!("Failed to kill PID {:?}: {e}", process.id());
            }
            finish_output(handle, streamer).await;
            return (
                RunState::Failed(FailureReason::Supervision),
                Err(e.into()),
            );
        }
        Stop::TimedOut => {
            log::warn!(
                "PID {:?} still running after {budget:?}, killing it",
                process.id()
            );
            if let Err(e) = process.kill().await {
                log::error!("Failed to kill PID {:?}: {e}", process.id());
            }
            finish_output(handle, streamer).await;
            return (RunState::TimedOut, Err(RunError::TimedOut(budget)));
        }
        Stop::Cancelled => {
            if let Err(e) = process.terminate(config.cancel_grace).await {
                log::error!("Failed to stop PID {:?}: {e}", process.id());
            }
            finish_output(handle, streamer).await;
            return (
                RunState::Failed(FailureReason::Cancelled),
                Err(RunError::Cancelled),
            );
        }
    };

    handle.set_exit_code(exit_code);
    finish_output(handle, streamer).await;

    let outcome = match state {
        RunState::Completed => ingest(handle, &launch, orchestrator, started_at).await,
        RunState::Failed(FailureReason::ExitCode(code)) => {
            let partial = match ingest(handle, &launch, orchestrator, started_at).await {
                Ok(set) => Some(set),
                Err(e) => {
                    log::debug!("No partial result for run {}: {e}", handle.id());
                    None
                }
            };
            Err(RunError::ProcessExit {
                code: Some(code),
                partial,
            })
        }
        _ => Err(RunError::ProcessExit {
            code: exit_code,
            partial: None,
        }),
    };

    (state, outcome)
}

/// Wait for the process to exit, the time budget to run out or a cancellation.
///
/// Servers don't stop on their own, so once the duration has passed they are asked to stop and
/// the wait continues.
async fn wait_for_stop(
    handle: &RunHandle,
    process: &mut RunningProcess,
    orchestrator: &RunOrchestrator,
    duration: Duration,
    budget: Duration,
) -> Stop {
    let deadline = tokio::time::sleep(budget);
    tokio::pin!(deadline);
    let serving_window = tokio::time::sleep(duration);
    tokio::pin!(serving_window);
    let mut window_open = handle.request().kind().is_server();
    let mut stop_requested = false;
    let mut cancel = handle.cancel_listener();
    let mut shutdown = orchestrator.shutdown.new_listener();

    loop {
        tokio::select! {
            exit = process.wait() => return Stop::Exited { exit, stop_requested },
            _ = &mut deadline => return Stop::TimedOut,
            _ = cancel.wait_for_shutdown() => return Stop::Cancelled,
            _ = shutdown.wait_for_shutdown() => return Stop::Cancelled,
            _ = &mut serving_window, if window_open => {
                window_open = false;
                log::info!("Serving window of {duration:?} over for run {}, stopping server", handle.id());
                match process.request_termination() {
                    Ok(()) => stop_requested = true,
                    Err(e) => log::warn!("Failed to signal PID {:?}: {e}", process.id()),
                }
            }
        }
    }
}

/// Map how the process ended to a terminal state.
///
/// A server that exits after we asked it to stop is a completion however it exited.
fn classify_exit(exit: ExitOutcome, stop_requested: bool) -> RunState {
    if stop_requested {
        return RunState::Completed;
    }

    match exit {
        ExitOutcome::Exited(0) => RunState::Completed,
        ExitOutcome::Exited(code) => RunState::Failed(FailureReason::ExitCode(code)),
        ExitOutcome::Signalled => RunState::Failed(FailureReason::Signal),
    }
}

async fn finish_output(handle: &RunHandle, streamer: Option<tokio::task::JoinHandle<()>>) {
    if let Some(mut streamer) = streamer {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut streamer)
            .await
            .is_err()
        {
            log::warn!(
                "Output of run {} still open {OUTPUT_DRAIN_TIMEOUT:?} after exit, no longer reading it",
                handle.id()
            );
            streamer.abort();
        }
    }
    handle.close_output();
}

/// Find the result file the run wrote and read it.
async fn ingest(
    handle: &RunHandle,
    launch: &Launch,
    orchestrator: &RunOrchestrator,
    started_at: SystemTime,
) -> Result<MeasurementSet, RunError> {
    let tool = handle.request().kind();
    if !tool.produces_artifact() {
        return Err(RunError::NoArtifact { tool });
    }

    let path = orchestrator
        .locator
        .locate(&launch.output_dir, &launch.pattern, started_at)
        .await?;
    log::debug!("Reading result of run {} from '{}'", handle.id(), path.display());
    handle.set_artifact(path.clone());

    let set = tokio::task::spawn_blocking(move || normalize_file(Some(tool), path))
        .await
        .map_err(|e| RunError::Decode(format!("Result reader task failed: {e}")))??;
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = OrchestratorConfig::builder().build();

        assert_eq!(config.output_root(), Path::new(DEFAULT_OUTPUT_ROOT));
        assert_eq!(config.layout(), OutputLayout::PerRun);
        assert_eq!(config.flush_grace(), Duration::from_secs(10));
        assert_eq!(config.cancel_grace(), Duration::from_secs(3));
        assert_eq!(config.binary_override(ToolFamily::Nlmt), None);
    }

    #[test]
    fn config_overrides() {
        let mut builder = OrchestratorConfig::builder();
        builder
            .with_output_root("/tmp/ng")
            .with_layout(OutputLayout::Shared)
            .with_binary_path(ToolFamily::Iperf, "/opt/iperf3")
            .with_flush_grace(Duration::from_secs(1));
        let config = builder.build();

        assert_eq!(config.layout(), OutputLayout::Shared);
        assert_eq!(config.flush_grace(), Duration::from_secs(1));
        assert_eq!(
            config.binary_override(ToolFamily::Iperf),
            Some(Path::new("/opt/iperf3"))
        );
        assert_eq!(config.binary_override(ToolFamily::Nlmt), None);
    }

    #[test]
    fn aggregate_status_counts_cancelled_separately() {
        let status = AggregateStatus::from_states([
            RunState::Completed,
            RunState::Failed(FailureReason::ExitCode(1)),
            RunState::Failed(FailureReason::Cancelled),
            RunState::TimedOut,
            RunState::Running,
        ]);

        assert_eq!(status.total, 5);
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.cancelled, 1);
        assert_eq!(status.timed_out, 1);
        assert!(!status.is_finished());
        assert!(!status.all_completed());
        assert_eq!(
            status.to_string(),
            "1 of 5 completed, 1 failed, 1 timed out, 1 cancelled, 1 running"
        );
    }

    #[test]
    fn all_completed() {
        let status = AggregateStatus::from_states([RunState::Completed, RunState::Completed]);
        assert!(status.all_completed());
        assert!(status.is_finished());
        assert_eq!(status.to_string(), "2 of 2 completed");
    }

    #[test]
    fn client_exits_map_to_states() {
        assert_eq!(
            classify_exit(ExitOutcome::Exited(0), false),
            RunState::Completed
        );
        assert_eq!(
            classify_exit(ExitOutcome::Exited(1), false),
            RunState::Failed(FailureReason::ExitCode(1))
        );
        assert_eq!(
            classify_exit(ExitOutcome::Signalled, false),
            RunState::Failed(FailureReason::Signal)
        );
    }

    #[test]
    fn server_asked_to_stop_completes() {
        assert_eq!(
            classify_exit(ExitOutcome::Signalled, true),
            RunState::Completed
        );
        assert_eq!(
            classify_exit(ExitOutcome::Exited(143), true),
            RunState::Completed
        );
    }
}

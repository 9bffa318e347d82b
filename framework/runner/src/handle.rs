use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use netgauge_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use netgauge_summary_model::{MeasurementSet, RunState};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use crate::error::RunError;
use crate::request::RunRequest;

/// How many live lines a slow subscriber may fall behind before it starts missing lines.
const LIVE_OUTPUT_CAPACITY: usize = 1024;

type Outcome = Option<Result<MeasurementSet, RunError>>;

#[derive(Debug, Default)]
struct RunInfo {
    pid: Option<u32>,
    started_at: Option<SystemTime>,
    exit_code: Option<i32>,
    artifact: Option<PathBuf>,
}

/// State of one run, written by the task driving it and read through any number of
/// [RunHandle]s.
#[derive(Debug)]
struct RunShared {
    id: String,
    host: Option<String>,
    request: Arc<RunRequest>,
    info: RwLock<RunInfo>,
    state: watch::Sender<RunState>,
    outcome: watch::Sender<Outcome>,
    /// Every line so far. Append only.
    output: RwLock<Vec<String>>,
    /// Taken when the process output ends, which closes every subscription.
    live: Mutex<Option<broadcast::Sender<String>>>,
    cancel: ShutdownHandle,
}

/// One execution of a tool against one host.
///
/// Cheap to clone, all clones observe the same run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    shared: Arc<RunShared>,
}

impl RunHandle {
    pub(crate) fn new(id: String, host: Option<String>, request: Arc<RunRequest>) -> Self {
        Self {
            shared: Arc::new(RunShared {
                id,
                host,
                request,
                info: RwLock::new(RunInfo::default()),
                state: watch::Sender::new(RunState::Pending),
                outcome: watch::Sender::new(None),
                output: RwLock::new(Vec::new()),
                live: Mutex::new(Some(broadcast::channel(LIVE_OUTPUT_CAPACITY).0)),
                cancel: ShutdownHandle::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The target host, [None] for a server run without a bind address.
    pub fn host(&self) -> Option<&str> {
        self.shared.host.as_deref()
    }

    pub fn request(&self) -> &RunRequest {
        &self.shared.request
    }

    pub fn state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.info.read().pid
    }

    /// When the process was launched. Only result files written after this are considered.
    pub fn started_at(&self) -> Option<SystemTime> {
        self.shared.info.read().started_at
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.shared.info.read().exit_code
    }

    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.shared.info.read().artifact.clone()
    }

    /// A copy of every output line captured so far.
    pub fn output_lines(&self) -> Vec<String> {
        self.shared.output.read().clone()
    }

    /// Follow the output of this run, starting with the lines already captured.
    ///
    /// Subscribing after the run has finished replays the captured output and then ends.
    pub fn subscribe_output(&self) -> OutputSubscription {
        let output = self.shared.output.read();
        let receiver = self.shared.live.lock().as_ref().map(|live| live.subscribe());
        OutputSubscription {
            backlog: output.iter().cloned().collect(),
            receiver,
        }
    }

    /// Ask the run to stop. The process is sent a termination request and killed if it does not
    /// exit within the configured grace period. Has no effect on a finished run.
    pub fn cancel(&self) {
        if !self.state().is_terminal() {
            log::info!("Cancelling run {}", self.shared.id);
        }
        self.shared.cancel.shutdown();
    }

    /// Wait until the run reaches a terminal state, without waiting for its result to be read.
    pub async fn wait_terminal(&self) -> RunState {
        let mut receiver = self.shared.state.subscribe();
        if let Ok(state) = receiver.wait_for(RunState::is_terminal).await {
            return *state;
        }
        // Unreachable while this handle keeps the sender alive.
        self.state()
    }

    /// Wait for the run to finish and its result to be read.
    pub async fn await_completion(&self) -> Result<MeasurementSet, RunError> {
        self.wait_terminal().await;
        self.outcome().unwrap_or(Err(RunError::Cancelled))
    }

    /// The result if the run has finished.
    pub fn outcome(&self) -> Option<Result<MeasurementSet, RunError>> {
        self.shared.outcome.borrow().clone()
    }

    pub(crate) fn cancel_listener(&self) -> DelegatedShutdownListener {
        self.shared.cancel.new_listener()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.is_shutdown()
    }

    pub(crate) fn mark_started(&self, started_at: SystemTime) {
        self.shared.info.write().started_at = Some(started_at);
    }

    pub(crate) fn mark_running(&self, pid: Option<u32>) {
        self.shared.info.write().pid = pid;
        self.set_state(RunState::Running);
    }

    pub(crate) fn set_exit_code(&self, exit_code: Option<i32>) {
        self.shared.info.write().exit_code = exit_code;
    }

    pub(crate) fn set_artifact(&self, path: PathBuf) {
        self.shared.info.write().artifact = Some(path);
    }

    pub(crate) fn push_line(&self, line: String) {
        // Held across the send so a subscriber never sees a line both in its backlog and live.
        let mut output = self.shared.output.write();
        if let Some(live) = self.shared.live.lock().as_ref() {
            // No subscribers is fine.
            let _ = live.send(line.clone());
        }
        output.push(line);
    }

    pub(crate) fn close_output(&self) {
        let _output = self.shared.output.write();
        self.shared.live.lock().take();
    }

    /// Record the terminal state. The outcome is published first so that anyone woken by the
    /// state change can read it.
    pub(crate) fn finish(&self, state: RunState, outcome: Result<MeasurementSet, RunError>) {
        debug_assert!(state.is_terminal());
        self.shared.outcome.send_replace(Some(outcome));
        self.set_state(state);
    }

    fn set_state(&self, state: RunState) {
        let previous = self.shared.state.send_replace(state);
        log::debug!(
            "Run {} for {}: {previous} -> {state}",
            self.shared.id,
            self.host().unwrap_or("server")
        );
    }
}

/// Output lines of a run, the captured backlog first and then live lines as they arrive.
#[derive(Debug)]
pub struct OutputSubscription {
    backlog: VecDeque<String>,
    receiver: Option<broadcast::Receiver<String>>,
}

impl OutputSubscription {
    /// The next line, or [None] once the process output has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        if let Some(line) = self.backlog.pop_front() {
            return Some(line);
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Output subscriber fell behind and missed {skipped} lines");
                }
                Err(RecvError::Closed) => break,
            }
        }
        self.receiver = None;
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use netgauge_summary_model::{FailureReason, Sample, ToolKind};

    use super::*;
    use crate::request::{NlmtParams, ToolParams};

    fn handle() -> RunHandle {
        let request = RunRequest::new(
            ToolParams::NlmtClient(NlmtParams::default()),
            vec!["a.example".to_string()],
            Duration::from_secs(1),
        )
        .unwrap();
        RunHandle::new("run-1".to_string(), Some("a.example".to_string()), Arc::new(request))
    }

    #[tokio::test]
    async fn late_subscriber_gets_backlog_then_live_lines() {
        let handle = handle();
        handle.push_line("one".to_string());
        handle.push_line("two".to_string());

        let mut subscription = handle.subscribe_output();
        handle.push_line("three".to_string());
        handle.close_output();

        let mut lines = Vec::new();
        while let Some(line) = subscription.next_line().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(handle.output_lines(), lines);
    }

    #[tokio::test]
    async fn subscribing_after_close_replays_and_ends() {
        let handle = handle();
        handle.push_line("only".to_string());
        handle.close_output();

        let mut subscription = handle.subscribe_output();
        assert_eq!(subscription.next_line().await.as_deref(), Some("only"));
        assert_eq!(subscription.next_line().await, None);
    }

    #[tokio::test]
    async fn waiters_see_the_outcome_with_the_terminal_state() {
        let handle = handle();
        assert_eq!(handle.state(), RunState::Pending);

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.await_completion().await })
        };
        handle.mark_running(Some(42));
        assert_eq!(handle.pid(), Some(42));

        let set = MeasurementSet::new(ToolKind::NlmtClient, vec![Sample::new(0, 1.5)]).unwrap();
        handle.finish(RunState::Completed, Ok(set.clone()));

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap(), set);
        assert_eq!(handle.wait_terminal().await, RunState::Completed);
    }

    #[tokio::test]
    async fn cancel_is_visible_to_listeners() {
        let handle = handle();
        let mut listener = handle.cancel_listener();
        assert!(!handle.is_cancel_requested());

        handle.cancel();

        assert!(handle.is_cancel_requested());
        assert!(listener.should_shutdown());
        handle.finish(
            RunState::Failed(FailureReason::Cancelled),
            Err(RunError::Cancelled),
        );
        assert!(handle.await_completion().await.unwrap_err().is_cancelled());
    }
}

//! Launching an external tool and reading its output as it is produced.

use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Everything needed to launch a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// The process could not be started, for example because the binary is missing or not executable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to launch '{}': {source}", program.display())]
pub struct LaunchError {
    pub program: PathBuf,
    #[source]
    pub source: Arc<io::Error>,
}

/// How a process ended. A non-zero code is data here, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    /// Ended by a signal, so there is no exit code.
    Signalled,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Exited(code) => Some(*code),
            ExitOutcome::Signalled => None,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitOutcome::Exited(code),
            None => ExitOutcome::Signalled,
        }
    }
}

pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn the process with stdout and stderr captured as one line stream.
    ///
    /// The process is killed if the returned [RunningProcess] is dropped before it exits.
    pub fn start(cmd: &CommandSpec) -> Result<RunningProcess, LaunchError> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| LaunchError {
            program: cmd.program.clone(),
            source: Arc::new(e),
        })?;
        let pid = child.id();
        log::debug!("Started '{cmd}' with PID {pid:?}");

        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, sender.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, sender));
        }

        Ok(RunningProcess {
            child,
            pid,
            output: Some(OutputLines { receiver }),
        })
    }
}

/// Read a pipe line by line until it closes. Invalid UTF-8 is replaced rather than ending the
/// stream.
async fn forward_lines<R>(pipe: R, sender: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(pipe).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
                if sender.send(line).is_err() {
                    // Nobody is reading any more.
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("Stopped reading process output: {e}");
                break;
            }
        }
    }
}

/// The combined output of a process, in the order lines arrived. Ends once both stdout and stderr
/// have closed, which happens when the process exits.
#[derive(Debug)]
pub struct OutputLines {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl OutputLines {
    pub async fn next_line(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// A spawned process.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    output: Option<OutputLines>,
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Take the output stream. It can only be taken once.
    pub fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }

    /// Forward every output line to `sink` as it arrives, returning once the output ends.
    ///
    /// Returns the number of lines forwarded, which is zero if the output was already taken.
    pub async fn stream_output(&mut self, mut sink: impl FnMut(String)) -> usize {
        let Some(mut output) = self.take_output() else {
            return 0;
        };
        let mut forwarded = 0;
        while let Some(line) = output.next_line().await {
            sink(line);
            forwarded += 1;
        }
        forwarded
    }

    /// Wait for the process to exit. Safe to cancel and call again.
    pub async fn wait(&mut self) -> io::Result<ExitOutcome> {
        Ok(self.child.wait().await?.into())
    }

    /// Forcibly kill the process and wait for it to be reaped.
    pub async fn kill(&mut self) -> io::Result<ExitOutcome> {
        if let Err(e) = self.child.kill().await {
            // Already exited between the last check and now.
            log::debug!("Kill of PID {:?} failed: {e}", self.pid);
        }
        self.wait().await
    }

    /// Ask the process to stop, without waiting.
    ///
    /// Sends `SIGTERM` on Unix so the tool can flush its results. Elsewhere there is no gentle
    /// option and the process is killed.
    pub fn request_termination(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let Some(pid) = self.child.id() else {
                // Already reaped, the PID may belong to someone else now.
                return Ok(());
            };
            let pid = i32::try_from(pid)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    /// Ask the process to stop and give it `grace` to do so before killing it.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<ExitOutcome> {
        if let Err(e) = self.request_termination() {
            log::warn!("Failed to signal PID {:?}: {e}", self.pid);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?.into()),
            Err(_) => {
                log::warn!(
                    "PID {:?} did not stop within {grace:?}, killing it",
                    self.pid
                );
                self.kill().await
            }
        }
    }
}

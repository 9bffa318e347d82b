use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{error::RecvError, error::TryRecvError, Receiver, Sender};
use tokio::sync::Mutex;

/// A signal that can be fired once to ask in-flight work to stop.
///
/// Used both for the process-wide Ctrl-C signal and for cancelling a single run. Firing is sticky:
/// listeners created after [ShutdownHandle::shutdown] was called still observe the signal.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
    fired: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown(&self) {
        self.fired.store(true, Ordering::SeqCst);
        if let Err(e) = self.sender.send(()) {
            // Nobody is listening yet, the flag still records the request.
            log::trace!("No listeners for shutdown signal: {e:?}");
        }
    }

    /// Whether [ShutdownHandle::shutdown] has been called on this handle or any of its clones.
    pub fn is_shutdown(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe(), self.fired.clone())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    fired: Arc<AtomicBool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>, fired: Arc<AtomicBool>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            fired,
        }
    }

    /// Point in time check if the shutdown signal has been received.
    pub fn should_shutdown(&mut self) -> bool {
        if self.fired.load(Ordering::SeqCst) {
            return true;
        }

        match self.receiver.try_lock() {
            Ok(mut guard) => match guard.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => true,
                // Every handle was dropped without firing, which is not a request to stop.
                Err(TryRecvError::Closed) | Err(TryRecvError::Empty) => false,
            },
            Err(_) => false,
        }
    }

    /// Wait for the shutdown signal to be received. It is safe to race this with another future so
    /// that the shutdown signal can be used to cancel other work in progress.
    ///
    /// If every [ShutdownHandle] is dropped without firing then this never resolves.
    pub async fn wait_for_shutdown(&mut self) {
        if self.fired.load(Ordering::SeqCst) {
            return;
        }

        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Ok(()) => return,
                Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by shutdown signal".to_string(),
        }
    }
}

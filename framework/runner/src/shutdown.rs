use netgauge_core::prelude::ShutdownHandle;
use tokio::signal;

/// Fire the returned handle on Ctrl-C. Every run started with it is cancelled.
pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> ShutdownHandle {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("Received shutdown signal, cancelling runs...");
                listener_handle.shutdown();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C, runs can't be interrupted: {e}"),
        }
    });

    handle
}

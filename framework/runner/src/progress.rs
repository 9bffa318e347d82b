use std::cmp::min;
use std::fmt::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use netgauge_core::prelude::DelegatedShutdownListener;
use tokio::time::Instant;

use crate::orchestrator::RunGroup;

/// Displays a progress bar while the runs are in flight, showing how much of the planned duration
/// is left and how many runs have finished.
pub fn start_progress(
    planned_runtime: Duration,
    group: RunGroup,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            let hours = planned_runtime.as_secs() / 3600;
            let minutes = (planned_runtime.as_secs() % 3600) / 60;
            let seconds = planned_runtime.as_secs() % 60;
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .with_key(
                "planned_runtime",
                move |_state: &ProgressState, w: &mut dyn Write| {
                    let _ = write!(w, "{hours:02}:{minutes:02}:{seconds:02}");
                },
            )
            .progress_chars("#>-");
            pb.set_style(style);

            loop {
                let status = group.status();
                if status.is_finished() || shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                pb.set_message(status.to_string());
                pb.set_position(min(
                    start_time.elapsed().as_secs(),
                    planned_runtime.as_secs(),
                ));
                std::thread::sleep(Duration::from_secs(1));
            }
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start progress thread: {e}");
    }
}

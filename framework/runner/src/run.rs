use std::env;
use std::path::PathBuf;

use anyhow::Context;
use netgauge_core::prelude::ShutdownSignalError;
use netgauge_summariser::{summarize, summary_table, SummaryOutput};
use netgauge_summary_model::{append_run_summary, HostRunSummary, MeasurementSet, RunSummary};

use crate::cli::NetGaugeScenarioCli;
use crate::error::RunError;
use crate::handle::RunHandle;
use crate::orchestrator::{OrchestratorConfig, RunGroup, RunOrchestrator};
use crate::progress::start_progress;
use crate::request::{OutputTemplate, RunRequest, ToolParams};
use crate::shutdown::start_shutdown_listener;
use crate::tool_binary::{NG_IPERF_PATH_ENV, NG_NLMT_PATH_ENV};
use crate::types::NetGaugeResult;

/// Environment variables recorded in the run summary when set.
const RECORDED_ENV: [&str; 3] = [NG_NLMT_PATH_ENV, NG_IPERF_PATH_ENV, "NG_OUTPUT_DIR"];

/// Run `params` against the hosts given on the command line, wait for every run to finish, print
/// a summary table and append a [RunSummary] to the configured file.
///
/// Returns an error if any run failed or timed out, or if the runs were interrupted.
pub fn run(cli: NetGaugeScenarioCli, params: ToolParams) -> NetGaugeResult<()> {
    let template = OutputTemplate::new(cli.output_template.clone())?;
    let request =
        RunRequest::new(params, cli.hosts.clone(), cli.duration)?.with_output_template(template);

    log::info!(
        "Running {} against {:?} for {:?}",
        request.kind(),
        request.hosts(),
        request.duration()
    );

    let mut builder = OrchestratorConfig::builder();
    builder
        .with_output_root(&cli.output_dir)
        .with_layout(cli.layout);
    if let Some(grace) = cli.grace {
        builder.with_flush_grace(grace);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);
    let orchestrator =
        RunOrchestrator::new(builder.build())?.with_shutdown_handle(shutdown_handle.clone());

    let group = {
        let _guard = runtime.enter();
        orchestrator.submit_run(request)?
    };

    if !cli.no_progress {
        start_progress(
            cli.duration,
            group.clone(),
            shutdown_handle.new_listener(),
        );
    }

    let results = runtime.block_on(group.await_all());
    let status = group.status();
    log::info!("Run {} finished: {status}", group.run_id());

    let summary = build_run_summary(&group, &results);
    let outputs = summary_outputs(group.handles(), &results);
    if !outputs.is_empty() {
        println!("{}", summary_table(&outputs));
    }

    append_run_summary(&summary, cli.run_summary.clone()).with_context(|| {
        format!(
            "Failed to append run summary to '{}'",
            cli.run_summary.display()
        )
    })?;

    if shutdown_handle.is_shutdown() {
        return Err(ShutdownSignalError::default().into());
    }
    if status.failed > 0 || status.timed_out > 0 {
        anyhow::bail!("Not every run succeeded: {status}");
    }

    Ok(())
}

fn build_run_summary(
    group: &RunGroup,
    results: &[Result<MeasurementSet, RunError>],
) -> RunSummary {
    let mut summary = RunSummary::new(
        group.run_id().to_string(),
        group.request().kind(),
        group.started_at().timestamp(),
        group.request().duration().as_secs(),
        env!("CARGO_PKG_VERSION").to_string(),
    );

    for (handle, result) in group.handles().iter().zip(results) {
        summary.add_host(host_summary(handle, result));
    }

    for key in RECORDED_ENV {
        if let Ok(value) = env::var(key) {
            summary.add_env(key.to_string(), value);
        }
    }

    summary
}

fn host_summary(handle: &RunHandle, result: &Result<MeasurementSet, RunError>) -> HostRunSummary {
    HostRunSummary {
        host: handle.host().map(ToString::to_string),
        state: handle.state(),
        exit_code: handle.exit_code(),
        artifact: handle.artifact_path(),
        stats: samples_of(result).map(summarize),
        error: result.as_ref().err().map(ToString::to_string),
    }
}

/// The samples a run produced, including those left behind by a process that exited non-zero.
fn samples_of(result: &Result<MeasurementSet, RunError>) -> Option<&MeasurementSet> {
    match result {
        Ok(set)
        | Err(RunError::ProcessExit {
            partial: Some(set), ..
        }) => Some(set),
        Err(_) => None,
    }
}

/// One table row per run that produced samples, full or partial.
fn summary_outputs(
    handles: &[RunHandle],
    results: &[Result<MeasurementSet, RunError>],
) -> Vec<SummaryOutput> {
    handles
        .iter()
        .zip(results)
        .filter_map(|(handle, result)| {
            let set = samples_of(result)?;
            let source = handle
                .artifact_path()
                .unwrap_or_else(|| PathBuf::from(handle.host().unwrap_or("server")));
            Some(SummaryOutput::new(source, set))
        })
        .collect()
}

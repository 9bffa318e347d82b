use anyhow::{anyhow, Context};
use clap::Parser;
use log::debug;
use netgauge_summariser::{normalize_file, summary_table, write_json_report, SummaryOutput};

mod cli;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = cli::SummariserCli::parse();
    let ignore_errors = std::env::var("IGNORE_SUMMARY_ERRORS").is_ok();

    let total_files = args.files.len();
    let mut errors = vec![];
    let mut summary_outputs = vec![];

    for path in &args.files {
        debug!("Summarising {}", path.display());
        match normalize_file(args.tool, path) {
            Ok(set) => summary_outputs.push(SummaryOutput::new(path, &set)),
            Err(e) => {
                log::error!("Failed to summarise {}: {e}", path.display());
                errors.push(format!("{}: {e}", path.display()));
            }
        }
    }

    if !summary_outputs.is_empty() {
        println!("{}", summary_table(&summary_outputs));
    }

    if args.json_report {
        let cwd = std::env::current_dir().context("Failed to read the current directory")?;
        let path = write_json_report(&cwd, &summary_outputs)?;
        log::info!("Wrote report to {}", path.display());
    }

    // If any of the files failed and errors should not explicitly be ignored, return an error
    if !errors.is_empty() {
        let error_message = format!(
            "{} out of {} files failed:\n{:#?}",
            errors.len(),
            total_files,
            errors
        );

        if ignore_errors {
            log::warn!("{}", error_message);
        } else {
            return Err(anyhow!(error_message));
        }
    }

    Ok(())
}

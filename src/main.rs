use anyhow::{Context, Result};
use clap::Parser;
use msgsplit::config::{Cli, Job};
use msgsplit::io::open_input;
use msgsplit::{RunMetrics, logging, shard, transpose};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(metrics) => {
            tracing::info!(records = metrics.records_read, "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<RunMetrics> {
    let job = cli.job();
    let output = job.output();
    output.compression.ensure_available()?;

    let input = open_input(cli.input.as_deref())?;
    let sinks = output
        .sinks(job.suffix())
        .with_context(|| format!("create output directory {}", output.dir.display()))?;
    tracing::debug!(dir = %output.dir.display(), compression = ?output.compression, "writing outputs");

    let metrics = match &job {
        Job::Transpose(config, _) => transpose(input, sinks, config).context("transpose failed")?,
        Job::Shard(config, _) => shard(input, sinks, config).context("shard failed")?,
    };
    metrics.print();

    if let Some(path) = &cli.metrics {
        metrics
            .save_to_file(path)
            .with_context(|| format!("write metrics to {}", path.display()))?;
    }
    Ok(metrics)
}

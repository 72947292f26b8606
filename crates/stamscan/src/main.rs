mod cli;
mod progress;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use prost::Message;
use tracing::{info, warn};

use stamscan_core::config::AnalyzerConfig;
use stamscan_core::pipeline::{self, PipelineConfig};
use stamscan_core::worker;
use stamscan_proto::proto::AnalysisReport;

fn main() -> Result<()> {
    // stdout is reserved for results (and for protocol bytes in worker mode).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Worker => {
            let stdin = std::io::stdin().lock();
            let stdout = std::io::stdout().lock();
            worker::serve(stdin, stdout).context("worker failed")
        }
        cli::Command::Analyze {
            input,
            output,
            config,
            training_frames,
            skip_frames,
            debug_frames,
            debug_font,
        } => {
            info!(?input, ?output, ?config, ?training_frames, skip_frames, "starting analysis");

            let analyzer = match &config {
                Some(path) => AnalyzerConfig::load(path)?,
                None => AnalyzerConfig::default(),
            };
            let pipeline_config = PipelineConfig {
                analyzer,
                training_frames,
                skip_frames,
                debug_frames_dir: debug_frames,
                debug_font,
            };

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;

            let mut bar = progress::ScanBar::start();
            let result = runtime.block_on(pipeline::run_pipeline(&input, &pipeline_config, |p| {
                bar.update(p);
                async {}
            }));
            bar.finish();
            let report = result.context("pipeline failed")?;

            if report.rect_is_fallback {
                warn!("bar rectangle is the default position, results may be unreliable");
            }
            for timestamp in &report.empty_timestamps {
                println!("{timestamp}");
            }
            if let Some(output) = &output {
                write_report(&report, output)?;
            }

            info!(
                empty_events = report.empty_timestamps.len(),
                total_events = report.events.len(),
                ?output,
                "analysis complete"
            );
            Ok(())
        }
    }
}

/// Serialize the report as length-delimited protobuf and write it to a file.
fn write_report(report: &AnalysisReport, output: &Path) -> Result<()> {
    info!(?output, "writing protobuf output");

    let mut buf = Vec::new();
    report
        .encode_length_delimited(&mut buf)
        .context("failed to encode AnalysisReport")?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("failed to create output directory")?;
    }

    std::fs::write(output, &buf).with_context(|| format!("failed to write {}", output.display()))?;

    info!(?output, bytes = buf.len(), "protobuf output written");
    Ok(())
}

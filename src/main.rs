// Main entry point - configuration, wiring and the cycle run
mod application;
mod domain;
mod infrastructure;

use std::sync::Arc;

use crate::application::cycle_runner::{
    derive_worker_bound, logical_cpus, CycleRunner, SeriesWorkload,
};
use crate::application::diagnostics::Diagnostics;
use crate::application::format::format_millis;
use crate::infrastructure::config::load_run_config;
use crate::infrastructure::log_sink::LogDiagnostics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = load_run_config()?;
    let cpus = logical_cpus();
    let plan = config.plan(cpus)?;

    let workload = match config.cycles.validation_threads {
        Some(threads) => SeriesWorkload::with_validation_threads(threads)?,
        None => SeriesWorkload::new(),
    };
    let diagnostics: Arc<dyn Diagnostics> = Arc::new(LogDiagnostics::new(config.logging.clone()));
    let runner = CycleRunner::new(
        Arc::new(workload),
        diagnostics.clone(),
        derive_worker_bound(cpus),
    );

    diagnostics.record(&format!(
        "Starting Execution on a {} core system. A total of {} cycles will be run",
        cpus, plan.cycle_count
    ));

    let report = runner.run(&plan).await;

    for cycle in &report.cycles {
        match cycle.metrics() {
            Some(metrics) => tracing::info!(
                cycle = cycle.index,
                validated = metrics.samples_validated,
                "cycle completed"
            ),
            None => tracing::warn!(cycle = cycle.index, "cycle failed"),
        }
    }
    tracing::info!(
        completed = report.completed(),
        failed = report.failed(),
        parallelism = report.parallelism,
        "run finished"
    );

    // Failed cycles were already reported and do not change the exit code
    diagnostics.record("-----");
    diagnostics.record(&format!(
        "Execution Finished. Total Elapsed Time: {} ms.",
        format_millis(report.elapsed)
    ));

    Ok(())
}

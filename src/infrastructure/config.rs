use crate::domain::cycle::CyclePlan;
use crate::domain::sample::WorkProfile;
use crate::application::cycle_runner::derive_worker_bound;
use anyhow::ensure;
use chrono::{NaiveDateTime, TimeDelta};
use serde::Deserialize;
use std::path::PathBuf;

const CONFIG_FILE: &str = "config/series";
const ENV_PREFIX: &str = "SERIES";

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    pub cycles: CycleSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CycleSettings {
    /// Derived from the logical CPU count when absent.
    #[serde(default)]
    pub cycle_count: Option<usize>,
    pub samples_per_cycle: usize,
    pub start: NaiveDateTime,
    pub interval_ms: i64,
    pub max_parallel_cycles: usize,
    pub load_work_units: u32,
    pub validate_work_units: u32,
    /// Size of a dedicated validation pool; rayon's global pool when absent.
    #[serde(default)]
    pub validation_threads: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file_name: String,
    pub fallback_file: PathBuf,
    pub console: bool,
}

impl LoggingSettings {
    pub fn log_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

impl RunConfig {
    /// Turn the settings into a plan for a machine with `logical_cpus`.
    pub fn plan(&self, logical_cpus: usize) -> anyhow::Result<CyclePlan> {
        let cycles = &self.cycles;
        ensure!(
            cycles.interval_ms > 0,
            "interval_ms must be positive, got {}",
            cycles.interval_ms
        );
        ensure!(cycles.max_parallel_cycles > 0, "max_parallel_cycles must be at least 1");
        ensure!(
            cycles.validation_threads != Some(0),
            "validation_threads must be at least 1 when set"
        );

        Ok(CyclePlan {
            cycle_count: cycles
                .cycle_count
                .unwrap_or_else(|| derive_worker_bound(logical_cpus)),
            samples_per_cycle: cycles.samples_per_cycle,
            start: cycles.start,
            interval: TimeDelta::milliseconds(cycles.interval_ms),
            work: WorkProfile::new(cycles.load_work_units, cycles.validate_work_units),
            max_parallel_cycles: cycles.max_parallel_cycles,
        })
    }
}

type DefaultBuilder = config::ConfigBuilder<config::builder::DefaultState>;

fn with_defaults() -> Result<DefaultBuilder, config::ConfigError> {
    config::Config::builder()
        .set_default("cycles.samples_per_cycle", 222_222_i64)?
        .set_default("cycles.start", "1990-01-01T01:01:01.001")?
        .set_default("cycles.interval_ms", 60_000_i64)?
        .set_default("cycles.max_parallel_cycles", 4_i64)?
        .set_default("cycles.load_work_units", 1_000_i64)?
        .set_default("cycles.validate_work_units", 5_000_i64)?
        .set_default("logging.directory", "localDebug")?
        .set_default("logging.file_name", "application_log.txt")?
        .set_default("logging.fallback_file", "target/series-cycles-fallback.log")?
        .set_default("logging.console", true)
}

/// Defaults, then `config/series.*` if present, then `SERIES_*` variables
/// (`__` separates sections, e.g. `SERIES_CYCLES__SAMPLES_PER_CYCLE`).
pub fn load_run_config() -> anyhow::Result<RunConfig> {
    let settings = with_defaults()?
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
fn load_run_config_from_toml(toml: &str) -> anyhow::Result<RunConfig> {
    let settings = with_defaults()?
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;

    Ok(settings.try_deserialize()?)
}

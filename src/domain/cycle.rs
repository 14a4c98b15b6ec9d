// Cycle domain models - plan, per-cycle outcome and run report
use super::sample::WorkProfile;
use super::series::SeriesError;
use chrono::{NaiveDateTime, TimeDelta};
use std::time::Duration;
use thiserror::Error;

/// Everything a run needs, passed explicitly to the runner.
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub cycle_count: usize,
    pub samples_per_cycle: usize,
    pub start: NaiveDateTime,
    pub interval: TimeDelta,
    pub work: WorkProfile,
    /// Hard cap on simultaneously running cycles, applied on top of the
    /// hardware-derived bound.
    pub max_parallel_cycles: usize,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error("cycle panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleMetrics {
    pub build_time: Duration,
    pub validation_time: Duration,
    pub samples_validated: usize,
    pub value_sum: i128,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleMetrics),
    Failed(CycleError),
}

#[derive(Debug)]
pub struct CycleResult {
    pub index: usize,
    pub outcome: CycleOutcome,
}

impl CycleResult {
    pub fn completed(index: usize, metrics: CycleMetrics) -> Self {
        Self {
            index,
            outcome: CycleOutcome::Completed(metrics),
        }
    }

    pub fn failed(index: usize, error: CycleError) -> Self {
        Self {
            index,
            outcome: CycleOutcome::Failed(error),
        }
    }

    pub fn metrics(&self) -> Option<&CycleMetrics> {
        match &self.outcome {
            CycleOutcome::Completed(metrics) => Some(metrics),
            CycleOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CycleError> {
        match &self.outcome {
            CycleOutcome::Completed(_) => None,
            CycleOutcome::Failed(error) => Some(error),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// One entry per cycle, ordered by cycle index.
    pub cycles: Vec<CycleResult>,
    pub elapsed: Duration,
    pub parallelism: usize,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.cycles.iter().filter(|c| c.metrics().is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.cycles.iter().filter(|c| c.error().is_some()).count()
    }
}

// Series builder - generates and validates a time-descending sample series
use super::sample::{Sample, ValidationError, WorkProfile};
use chrono::{NaiveDateTime, TimeDelta};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("series has not been built yet")]
    NotBuilt,
    #[error("timestamp for sample {index} is out of range")]
    TimestampOverflow { index: usize },
    #[error("validation failed at position {position}: {source}")]
    Validation {
        position: usize,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesState {
    Empty,
    Built,
    Validated,
}

pub struct SeriesBuilder {
    start: NaiveDateTime,
    interval: TimeDelta,
    work: WorkProfile,
    pool: Option<Arc<ThreadPool>>,
    samples: Vec<Sample>,
    state: SeriesState,
    samples_validated: usize,
}

impl SeriesBuilder {
    pub fn new(start: NaiveDateTime, interval: TimeDelta) -> Self {
        Self {
            start,
            interval,
            work: WorkProfile::default(),
            pool: None,
            samples: Vec::new(),
            state: SeriesState::Empty,
            samples_validated: 0,
        }
    }

    pub fn with_work(mut self, work: WorkProfile) -> Self {
        self.work = work;
        self
    }

    /// Run validation on `pool` instead of rayon's global pool.
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Regenerate the series with `count` samples, most recent first.
    pub fn build(&mut self, count: usize) -> Result<(), SeriesError> {
        self.samples.clear();
        self.samples.reserve(count);
        self.state = SeriesState::Empty;
        self.samples_validated = 0;

        let mut timestamp = self.start;
        for index in 0..count {
            if index > 0 {
                let Some(next) = timestamp.checked_add_signed(self.interval) else {
                    self.samples.clear();
                    return Err(SeriesError::TimestampOverflow { index });
                };
                timestamp = next;
            }
            let mut sample = Sample::new(index == 0);
            sample.load_at(timestamp, &self.work);
            self.samples.push(sample);
        }

        // Generated oldest first; one reversal is cheaper than front inserts.
        self.samples.reverse();
        self.state = SeriesState::Built;

        tracing::debug!(
            count,
            newest = ?self.samples().first().map(Sample::timestamp),
            oldest = ?self.samples().last().map(Sample::timestamp),
            "series built"
        );
        Ok(())
    }

    /// Validate every sample against its chronologically earlier neighbour.
    ///
    /// Storage is time-descending, so the predecessor of position `i` is
    /// position `i + 1` and the last sample has none. Samples are validated
    /// in parallel; the first failure aborts the pass.
    pub fn validate(&mut self) -> Result<usize, SeriesError> {
        if self.state == SeriesState::Empty {
            return Err(SeriesError::NotBuilt);
        }

        // Flags describe this pass only; fail-fast may leave samples unvisited.
        self.samples.par_iter().for_each(Sample::clear_validation);

        let validated = AtomicUsize::new(0);
        let samples = &self.samples;
        let interval = self.interval;
        let work = self.work;

        let pass = || {
            (0..samples.len()).into_par_iter().try_for_each(|position| {
                let previous = samples.get(position + 1);
                samples[position]
                    .validate(previous, interval, &work)
                    .map_err(|source| SeriesError::Validation { position, source })?;
                validated.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        };

        let outcome = match &self.pool {
            Some(pool) => pool.install(pass),
            None => pass(),
        };
        if let Err(error) = outcome {
            self.state = SeriesState::Built;
            self.samples_validated = 0;
            return Err(error);
        }

        self.samples_validated = validated.into_inner();
        self.state = SeriesState::Validated;

        tracing::debug!(validated = self.samples_validated, "series validated");
        Ok(self.samples_validated)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Count from the last successful `validate`; `None` before that.
    pub fn samples_validated(&self) -> Option<usize> {
        match self.state() {
            SeriesState::Validated => Some(self.samples_validated),
            _ => None,
        }
    }

    /// Exact sum of every sample value.
    pub fn total_value(&self) -> i128 {
        self.samples().iter().map(|s| i128::from(s.value())).sum()
    }

    pub fn state(&self) -> SeriesState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }
}

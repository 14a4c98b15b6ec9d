// Sample domain model - a single time-stamped record
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Milliseconds between 0001-01-01T00:00:00 and the Unix epoch.
const TICK_EPOCH_OFFSET_MS: i64 = 62_135_596_800_000;

/// Synthetic CPU cost charged per sample operation.
///
/// The work has no observable effect on any sample; it only makes timings
/// resemble a realistic per-sample load. Zero units disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkProfile {
    pub load_units: u32,
    pub validate_units: u32,
}

impl WorkProfile {
    pub fn new(load_units: u32, validate_units: u32) -> Self {
        Self {
            load_units,
            validate_units,
        }
    }

    #[cfg(test)]
    pub fn none() -> Self {
        Self::new(0, 0)
    }
}

impl Default for WorkProfile {
    fn default() -> Self {
        Self::new(1000, 5000)
    }
}

/// Spin for `units` iterations without letting the optimizer drop the loop.
pub fn simulated_work(units: u32) {
    for i in 0..units {
        black_box(i);
    }
}

/// Encode a timestamp as whole milliseconds since 0001-01-01.
pub fn tick_value(timestamp: NaiveDateTime) -> i64 {
    timestamp.and_utc().timestamp_millis() + TICK_EPOCH_OFFSET_MS
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("previous sample is missing, but this is not the first sample")]
    MissingPredecessor,
    #[error("timestamps do not match: expected {expected}, but got {actual}")]
    TimestampMismatch {
        expected: NaiveDateTime,
        actual: NaiveDateTime,
    },
}

#[derive(Debug)]
pub struct Sample {
    is_first: bool,
    timestamp: NaiveDateTime,
    value: i64,
    validated: AtomicBool,
}

impl Sample {
    pub fn new(is_first: bool) -> Self {
        let timestamp = DateTime::<Utc>::UNIX_EPOCH.naive_utc();
        Self {
            is_first,
            timestamp,
            value: tick_value(timestamp),
            validated: AtomicBool::new(false),
        }
    }

    pub fn load_at(&mut self, timestamp: NaiveDateTime, work: &WorkProfile) {
        self.timestamp = timestamp;
        self.value = tick_value(timestamp);
        simulated_work(work.load_units);
    }

    /// Check this sample against its chronologically earlier neighbour.
    ///
    /// Only the `validated` flag of `self` is written, so any number of
    /// samples of one series may be validated concurrently.
    pub fn validate(
        &self,
        previous: Option<&Sample>,
        interval: TimeDelta,
        work: &WorkProfile,
    ) -> Result<(), ValidationError> {
        simulated_work(work.validate_units);

        match previous {
            None if !self.is_first => return Err(ValidationError::MissingPredecessor),
            Some(prev) if Some(prev.timestamp) != self.timestamp.checked_sub_signed(interval) => {
                return Err(ValidationError::TimestampMismatch {
                    expected: prev
                        .timestamp
                        .checked_add_signed(interval)
                        .unwrap_or(NaiveDateTime::MAX),
                    actual: self.timestamp,
                });
            }
            _ => {}
        }

        self.validated.store(true, Ordering::Release);
        Ok(())
    }

    pub fn clear_validation(&self) {
        self.validated.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub fn is_first(&self) -> bool {
        self.is_first
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    #[cfg(test)]
    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }
}

// Cycle runner - schedules independent build/validate/sum cycles
use crate::application::diagnostics::Diagnostics;
use crate::application::format::{format_millis, format_sum};
use crate::domain::cycle::{CycleError, CycleMetrics, CyclePlan, CycleResult, RunReport};
use crate::domain::series::{SeriesBuilder, SeriesError};
use rayon::ThreadPool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

/// Upper bound for the hardware-derived worker count.
pub const MAX_WORKER_BOUND: usize = 4;

/// Half the logical processors, clamped to `1..=MAX_WORKER_BOUND`.
pub fn derive_worker_bound(logical_cpus: usize) -> usize {
    (logical_cpus / 2).clamp(1, MAX_WORKER_BOUND)
}

pub fn logical_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// One cycle of work. Implementations run on a blocking thread and must
/// not share mutable state across cycles.
pub trait CycleWorkload: Send + Sync {
    fn run_cycle(
        &self,
        index: usize,
        plan: &CyclePlan,
        diagnostics: &dyn Diagnostics,
    ) -> Result<CycleMetrics, CycleError>;
}

/// Build, validate and sum a fresh series.
#[derive(Clone, Default)]
pub struct SeriesWorkload {
    validation_pool: Option<Arc<ThreadPool>>,
}

impl SeriesWorkload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate on a dedicated rayon pool shared by every cycle.
    pub fn with_validation_threads(threads: usize) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("series-validate-{}", i))
            .build()?;
        Ok(Self {
            validation_pool: Some(Arc::new(pool)),
        })
    }
}

impl CycleWorkload for SeriesWorkload {
    fn run_cycle(
        &self,
        index: usize,
        plan: &CyclePlan,
        diagnostics: &dyn Diagnostics,
    ) -> Result<CycleMetrics, CycleError> {
        let mut series = SeriesBuilder::new(plan.start, plan.interval).with_work(plan.work);
        if let Some(pool) = &self.validation_pool {
            series = series.with_pool(pool.clone());
        }

        diagnostics.record(&format!("Cycle {} Started Sample Load.", index));
        let timer = Instant::now();
        series.build(plan.samples_per_cycle)?;
        let build_time = timer.elapsed();
        diagnostics.record(&format!(
            "Cycle {} Finished Sample Load. Load Time: {} ms.",
            index,
            format_millis(build_time)
        ));

        diagnostics.record(&format!("Cycle {} Started Sample Validation.", index));
        let timer = Instant::now();
        series.validate()?;
        let validation_time = timer.elapsed();
        let samples_validated = series.samples_validated().ok_or(SeriesError::NotBuilt)?;
        diagnostics.record(&format!(
            "Cycle {} Finished Sample Validation. \
             Total Samples Validated: {}. Validation Time: {} ms.",
            index,
            samples_validated,
            format_millis(validation_time)
        ));

        let value_sum = series.total_value();
        diagnostics.record(&format!(
            "Cycle {} Sum of All Samples: {}.",
            index,
            format_sum(value_sum)
        ));
        diagnostics.record(&format!(
            "Cycle {} Finished. Total Cycle Time: {} ms.",
            index,
            format_millis(build_time + validation_time)
        ));

        Ok(CycleMetrics {
            build_time,
            validation_time,
            samples_validated,
            value_sum,
        })
    }
}

#[derive(Clone)]
pub struct CycleRunner {
    workload: Arc<dyn CycleWorkload>,
    diagnostics: Arc<dyn Diagnostics>,
    worker_bound: usize,
}

impl CycleRunner {
    pub fn new(
        workload: Arc<dyn CycleWorkload>,
        diagnostics: Arc<dyn Diagnostics>,
        worker_bound: usize,
    ) -> Self {
        Self {
            workload,
            diagnostics,
            worker_bound,
        }
    }

    /// Cycles allowed to run at once: the smaller of the worker bound and
    /// the plan's hard cap, never below one.
    pub fn parallelism(&self, plan: &CyclePlan) -> usize {
        self.worker_bound.min(plan.max_parallel_cycles).max(1)
    }

    /// Run every cycle of `plan` and wait for all of them.
    ///
    /// A cycle that fails or panics is reported in its `CycleResult` and
    /// never affects its siblings.
    pub async fn run(&self, plan: &CyclePlan) -> RunReport {
        let started = Instant::now();
        let parallelism = self.parallelism(plan);
        let permits = Arc::new(Semaphore::new(parallelism));
        let shared_plan = Arc::new(plan.clone());

        tracing::debug!(
            cycles = plan.cycle_count,
            parallelism,
            "scheduling cycles"
        );

        let handles: Vec<_> = (0..plan.cycle_count)
            .map(|index| {
                let permits = permits.clone();
                let workload = self.workload.clone();
                let diagnostics = self.diagnostics.clone();
                let plan = shared_plan.clone();

                tokio::spawn(async move {
                    let outcome =
                        run_scheduled(index, permits, workload, plan, diagnostics.clone()).await;
                    if let Err(error) = &outcome {
                        diagnostics
                            .record(&format!("Execution Failed in Cycle {}!\n{}", index, error));
                    }
                    outcome
                })
            })
            .collect();

        let mut cycles = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(Ok(metrics)) => {
                    tracing::debug!(
                        index,
                        build_time = ?metrics.build_time,
                        validation_time = ?metrics.validation_time,
                        validated = metrics.samples_validated,
                        sum = %metrics.value_sum,
                        "cycle completed"
                    );
                    CycleResult::completed(index, metrics)
                }
                Ok(Err(error)) => CycleResult::failed(index, error),
                Err(join_error) => {
                    let error = CycleError::Panicked(panic_message(join_error));
                    self.diagnostics
                        .record(&format!("Execution Failed in Cycle {}!\n{}", index, error));
                    CycleResult::failed(index, error)
                }
            };
            cycles.push(result);
        }

        let report = RunReport {
            cycles,
            elapsed: started.elapsed(),
            parallelism,
        };
        tracing::debug!(
            completed = report.completed(),
            failed = report.failed(),
            "all cycles finished"
        );
        report
    }
}

async fn run_scheduled(
    index: usize,
    permits: Arc<Semaphore>,
    workload: Arc<dyn CycleWorkload>,
    plan: Arc<CyclePlan>,
    diagnostics: Arc<dyn Diagnostics>,
) -> Result<CycleMetrics, CycleError> {
    let _permit = permits.acquire_owned().await.map_err(anyhow::Error::from)?;
    tracing::debug!(index, "cycle started");

    tokio::task::spawn_blocking(move || workload.run_cycle(index, &plan, diagnostics.as_ref()))
        .await
        .map_err(|e| CycleError::Panicked(panic_message(e)))?
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::{tick_value, WorkProfile};
    use crate::domain::series::SeriesError;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingDiagnostics {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingDiagnostics {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl Diagnostics for RecordingDiagnostics {
        fn record(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    /// Delegates to `SeriesWorkload`, but gives one cycle a start date so
    /// close to the end of the calendar that its build overflows.
    struct OverflowingCycle {
        target: usize,
    }

    impl CycleWorkload for OverflowingCycle {
        fn run_cycle(
            &self,
            index: usize,
            plan: &CyclePlan,
            diagnostics: &dyn Diagnostics,
        ) -> Result<CycleMetrics, CycleError> {
            if index == self.target {
                let mut broken = plan.clone();
                broken.start = NaiveDateTime::MAX - TimeDelta::minutes(1);
                return SeriesWorkload::new().run_cycle(index, &broken, diagnostics);
            }
            SeriesWorkload::new().run_cycle(index, plan, diagnostics)
        }
    }

    struct PanickingCycle;

    impl CycleWorkload for PanickingCycle {
        fn run_cycle(
            &self,
            index: usize,
            plan: &CyclePlan,
            diagnostics: &dyn Diagnostics,
        ) -> Result<CycleMetrics, CycleError> {
            if index == 0 {
                panic!("worker blew up");
            }
            SeriesWorkload::new().run_cycle(index, plan, diagnostics)
        }
    }

    #[derive(Default)]
    struct PeakTracker {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CycleWorkload for PeakTracker {
        fn run_cycle(
            &self,
            _index: usize,
            _plan: &CyclePlan,
            _diagnostics: &dyn Diagnostics,
        ) -> Result<CycleMetrics, CycleError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(CycleMetrics {
                build_time: Duration::ZERO,
                validation_time: Duration::ZERO,
                samples_validated: 0,
                value_sum: 0,
            })
        }
    }

    fn plan(cycle_count: usize, samples_per_cycle: usize) -> CyclePlan {
        CyclePlan {
            cycle_count,
            samples_per_cycle,
            start: NaiveDate::from_ymd_opt(1990, 1, 1)
                .unwrap()
                .and_hms_milli_opt(1, 1, 1, 1)
                .unwrap(),
            interval: TimeDelta::minutes(1),
            work: WorkProfile::none(),
            max_parallel_cycles: 4,
        }
    }

    fn expected_sum(plan: &CyclePlan) -> i128 {
        let n = plan.samples_per_cycle as i128;
        let first = i128::from(tick_value(plan.start));
        let step = i128::from(plan.interval.num_milliseconds());
        n * first + step * n * (n - 1) / 2
    }

    #[test]
    fn test_derive_worker_bound() {
        assert_eq!(derive_worker_bound(0), 1);
        assert_eq!(derive_worker_bound(1), 1);
        assert_eq!(derive_worker_bound(3), 1);
        assert_eq!(derive_worker_bound(4), 2);
        assert_eq!(derive_worker_bound(8), 4);
        assert_eq!(derive_worker_bound(64), 4);
    }

    #[test]
    fn test_parallelism_honours_both_caps() {
        let runner = CycleRunner::new(
            Arc::new(SeriesWorkload::new()),
            Arc::new(RecordingDiagnostics::default()),
            3,
        );
        let mut p = plan(1, 1);
        assert_eq!(runner.parallelism(&p), 3);
        p.max_parallel_cycles = 2;
        assert_eq!(runner.parallelism(&p), 2);
        p.max_parallel_cycles = 0;
        assert_eq!(runner.parallelism(&p), 1);
    }

    #[tokio::test]
    async fn test_all_cycles_complete() {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let runner = CycleRunner::new(Arc::new(SeriesWorkload::new()), diagnostics.clone(), 2);
        let plan = plan(3, 1_000);

        let report = runner.run(&plan).await;

        assert_eq!(report.cycles.len(), 3);
        assert_eq!(report.completed(), 3);
        assert_eq!(report.parallelism, 2);
        for (i, cycle) in report.cycles.iter().enumerate() {
            assert_eq!(cycle.index, i);
            let metrics = cycle.metrics().unwrap();
            assert_eq!(metrics.samples_validated, 1_000);
            assert_eq!(metrics.value_sum, expected_sum(&plan));
        }

        let messages = diagnostics.messages();
        assert!(messages.contains(&"Cycle 2 Started Sample Load.".to_string()));
        let validated_line = "Cycle 0 Finished Sample Validation. Total Samples Validated: 1000.";
        assert!(messages.iter().any(|m| m.starts_with(validated_line)));
    }

    #[tokio::test]
    async fn test_cycle_messages_in_order() {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let runner = CycleRunner::new(Arc::new(SeriesWorkload::new()), diagnostics.clone(), 1);

        runner.run(&plan(1, 5)).await;

        let prefixes: Vec<String> = diagnostics
            .messages()
            .iter()
            .map(|m| m.split(':').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            prefixes,
            vec![
                "Cycle 0 Started Sample Load.",
                "Cycle 0 Finished Sample Load. Load Time",
                "Cycle 0 Started Sample Validation.",
                "Cycle 0 Finished Sample Validation. Total Samples Validated",
                "Cycle 0 Sum of All Samples",
                "Cycle 0 Finished. Total Cycle Time",
            ]
        );
        let sum_line = "Cycle 0 Sum of All Samples: 313,833,762,905,005.00000000000000000000.";
        assert!(diagnostics.messages().contains(&sum_line.to_string()));
    }

    #[tokio::test]
    async fn test_failed_cycle_is_isolated() {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let runner = CycleRunner::new(
            Arc::new(OverflowingCycle { target: 1 }),
            diagnostics.clone(),
            4,
        );
        let plan = plan(3, 1_000);

        let report = runner.run(&plan).await;

        assert_eq!(report.completed(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.cycles[1].error(),
            Some(CycleError::Series(SeriesError::TimestampOverflow { .. }))
        ));
        for i in [0, 2] {
            let metrics = report.cycles[i].metrics().unwrap();
            assert_eq!(metrics.value_sum, expected_sum(&plan));
        }
        assert!(
            diagnostics
                .messages()
                .iter()
                .any(|m| m.starts_with("Execution Failed in Cycle 1!\n"))
        );
    }

    #[tokio::test]
    async fn test_panicking_cycle_is_isolated() {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let runner = CycleRunner::new(Arc::new(PanickingCycle), diagnostics.clone(), 2);

        let report = runner.run(&plan(2, 10)).await;

        match report.cycles[0].error() {
            Some(CycleError::Panicked(message)) => assert_eq!(message, "worker blew up"),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert!(report.cycles[1].metrics().is_some());
    }

    #[tokio::test]
    async fn test_worker_bound_limits_concurrency() {
        let tracker = Arc::new(PeakTracker::default());
        let runner = CycleRunner::new(
            tracker.clone(),
            Arc::new(RecordingDiagnostics::default()),
            2,
        );

        let report = runner.run(&plan(6, 0)).await;

        assert_eq!(report.completed(), 6);
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_plan_cap_limits_concurrency() {
        let tracker = Arc::new(PeakTracker::default());
        let runner = CycleRunner::new(
            tracker.clone(),
            Arc::new(RecordingDiagnostics::default()),
            4,
        );
        let mut plan = plan(4, 0);
        plan.max_parallel_cycles = 1;

        runner.run(&plan).await;

        assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dedicated_validation_pool() {
        let workload = SeriesWorkload::with_validation_threads(2).unwrap();
        let runner = CycleRunner::new(
            Arc::new(workload),
            Arc::new(RecordingDiagnostics::default()),
            2,
        );

        let report = runner.run(&plan(2, 500)).await;

        assert!(
            report
                .cycles
                .iter()
                .all(|c| c.metrics().map(|m| m.samples_validated) == Some(500))
        );
    }

    #[tokio::test]
    async fn test_zero_cycles() {
        let runner = CycleRunner::new(
            Arc::new(SeriesWorkload::new()),
            Arc::new(RecordingDiagnostics::default()),
            2,
        );
        let report = runner.run(&plan(0, 10)).await;
        assert!(report.cycles.is_empty());
    }
}

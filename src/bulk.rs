//! Bulk dispatch: walk an ordered collection of targets, enqueue one
//! operation per target, and tally the outcome.
//!
//! The helper awaits each ticket before building the next operation, so the
//! bulk walk itself keeps at most one of its tasks pending at a time.
//! Unrelated `enqueue` calls from other holders of the dispatcher interleave
//! through the shared queue as usual.

use std::future::Future;

use serde::Serialize;
use tracing::warn;

use crate::dispatcher::RateLimitedDispatcher;

/// How often the progress callback fires, in targets. The callback also
/// always fires on the final target.
pub const PROGRESS_EVERY: usize = 10;

/// Aggregate outcome of a bulk dispatch. Individual failures are counted,
/// never propagated; `dispatch_bulk` itself cannot fail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
}

/// Snapshot handed to the progress callback.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BulkProgress {
    /// Targets processed so far, counting from 1.
    pub current: usize,
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    pub percentage: f64,
}

impl BulkProgress {
    fn new(current: usize, total: usize, report: &BulkReport) -> Self {
        Self {
            current,
            total,
            success: report.success,
            errors: report.errors,
            percentage: (current as f64 / total as f64) * 100.0,
        }
    }
}

impl<T> RateLimitedDispatcher<T>
where
    T: Send + 'static,
{
    /// Dispatch one operation per target, in order, through the shared
    /// queue.
    ///
    /// `operation_factory` maps a target to the zero-argument send for that
    /// target. Each send is enqueued and awaited before the next target is
    /// touched; a failing target is counted and the walk continues. The
    /// optional `progress` callback fires on the first target, every
    /// [`PROGRESS_EVERY`]th after that, and on the final one; an error it
    /// raises is logged and swallowed.
    pub async fn dispatch_bulk<U, I, F, Op, Fut, P>(
        &self,
        targets: I,
        mut operation_factory: F,
        mut progress: Option<P>,
    ) -> BulkReport
    where
        I: IntoIterator<Item = U>,
        F: FnMut(U) -> Op,
        Op: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        P: FnMut(BulkProgress) -> anyhow::Result<()>,
    {
        let targets: Vec<U> = targets.into_iter().collect();
        let total = targets.len();
        let mut report = BulkReport {
            total,
            ..BulkReport::default()
        };

        for (index, target) in targets.into_iter().enumerate() {
            let ticket = self.enqueue(operation_factory(target)).await;
            match ticket.await {
                Ok(_) => report.success += 1,
                Err(err) => {
                    report.errors += 1;
                    warn!(target_index = index, error = %err, "bulk target failed");
                }
            }

            let current = index + 1;
            if index % PROGRESS_EVERY == 0 || current == total {
                if let Some(callback) = progress.as_mut() {
                    let update = BulkProgress::new(current, total, &report);
                    if let Err(err) = callback(update) {
                        warn!(error = %err, "progress callback failed");
                    }
                }
            }
        }

        report
    }
}

/// Type hint for callers that want no progress reporting.
pub type NoProgress = fn(BulkProgress) -> anyhow::Result<()>;

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn fast_dispatcher() -> RateLimitedDispatcher<usize> {
        RateLimitedDispatcher::with_rate(10_000)
    }

    #[tokio::test]
    async fn empty_targets_yield_empty_report() {
        let dispatcher = fast_dispatcher();
        let report = dispatcher
            .dispatch_bulk(Vec::<usize>::new(), |t| move || async move { Ok(t) }, None::<NoProgress>)
            .await;
        assert_eq!(report, BulkReport::default());
    }

    #[tokio::test]
    async fn counts_successes_and_failures() {
        let dispatcher = fast_dispatcher();
        let report = dispatcher
            .dispatch_bulk(
                0..10usize,
                |recipient| {
                    move || async move {
                        if matches!(recipient, 2 | 5 | 9) {
                            anyhow::bail!("delivery failed for {recipient}")
                        }
                        Ok(recipient)
                    }
                },
                None::<NoProgress>,
            )
            .await;
        assert_eq!(
            report,
            BulkReport {
                total: 10,
                success: 7,
                errors: 3
            }
        );
    }

    #[tokio::test]
    async fn progress_callback_errors_are_swallowed() {
        let dispatcher = fast_dispatcher();
        let calls = Arc::new(Mutex::new(0usize));
        let seen = Arc::clone(&calls);
        let report = dispatcher
            .dispatch_bulk(
                0..5usize,
                |t| move || async move { Ok(t) },
                Some(move |_update: BulkProgress| {
                    *seen.lock().unwrap() += 1;
                    anyhow::bail!("operator chat is gone")
                }),
            )
            .await;
        // Walk completed despite the callback failing every time.
        assert_eq!(report.success, 5);
        // Fired on target 1 and on the final target.
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn progress_reports_percentage() {
        let dispatcher = fast_dispatcher();
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        dispatcher
            .dispatch_bulk(
                0..10usize,
                |t| move || async move { Ok(t) },
                Some(move |update: BulkProgress| {
                    sink.lock().unwrap().push(update);
                    Ok(())
                }),
            )
            .await;
        let updates = updates.lock().unwrap();
        let last = updates.last().unwrap();
        assert_eq!(last.current, 10);
        assert!((last.percentage - 100.0).abs() < f64::EPSILON);
    }
}

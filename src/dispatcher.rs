//! Rate-limited FIFO dispatch queue.
//!
//! A [`RateLimitedDispatcher`] accepts zero-argument send-operations,
//! serializes them into a single FIFO queue, and starts them at a configured
//! maximum rate: no two operations ever begin closer together than
//! `DispatcherSettings::min_interval()`. Submission order is service order,
//! nothing is dropped, and one operation failing never disturbs the rest of
//! the queue.
//!
//! The drain loop is lazy. The first `enqueue` against an idle dispatcher
//! spawns it; once it observes an empty queue it exits and the next
//! `enqueue` starts a fresh one. At most one loop is ever active per
//! dispatcher, so at most one operation is in flight at a time and the rate
//! and ordering invariants hold trivially.
//!
//! Example usage:
//! ```rust,no_run
//! use martinet::{DispatcherSettings, RateLimitedDispatcher};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dispatcher: RateLimitedDispatcher<u64> =
//!     RateLimitedDispatcher::new(DispatcherSettings::with_rate(25));
//!
//! let ticket = dispatcher
//!     .enqueue(|| async {
//!         // one unit of outbound work, e.g. a message send
//!         Ok(42)
//!     })
//!     .await;
//!
//! let message_id = ticket.await?;
//! assert_eq!(message_id, 42);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};
use crate::settings::{DispatcherSettings, OverflowPolicy};

/// Boxed future produced by invoking a send-operation.
pub type OperationFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

type BoxedOperation<T> = Box<dyn FnOnce() -> OperationFuture<T> + Send>;

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Diagnostic identifier for a queued task: admission wall-clock millis plus
/// a process-wide sequence number to break ties. Never used for ordering;
/// the queue itself is the order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId {
    millis: i64,
    seq: u64,
}

impl TaskId {
    fn next() -> Self {
        Self {
            millis: chrono::Utc::now().timestamp_millis(),
            seq: TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// One pending unit of work: the boxed operation plus the channel that
/// settles the caller's ticket. Lives in the queue until the drain loop pops
/// it; dropped immediately after its ticket is settled.
struct DispatchTask<T> {
    id: TaskId,
    operation: BoxedOperation<T>,
    enqueued_at: Instant,
    completion: oneshot::Sender<Result<T>>,
    // Held while the task occupies a bounded queue's waiting slot; dropping
    // the task (settled, cancelled, or popped) releases the slot.
    slot: Option<OwnedSemaphorePermit>,
}

impl<T> DispatchTask<T> {
    fn settle(self, outcome: Result<T>) {
        // The caller may have dropped its ticket; settlement is best-effort.
        let _ = self.completion.send(outcome);
    }
}

struct DispatcherState<T> {
    queue: VecDeque<DispatchTask<T>>,
    processing: bool,
    last_dispatch_at: Option<Instant>,
}

struct Inner<T> {
    settings: DispatcherSettings,
    state: Mutex<DispatcherState<T>>,
    // One permit per waiting slot of a bounded queue. The semaphore's permit
    // queue is FIFO-fair, so `Block`-policy enqueuers are admitted in
    // arrival order as the drain loop frees slots.
    slots: Option<Arc<Semaphore>>,
}

impl<T> Inner<T> {
    // The lock is only ever held for queue surgery and is never held across
    // an await, so a poisoned lock still guards consistent state; recover it
    // instead of propagating a panic nobody can handle.
    fn lock_state(&self) -> MutexGuard<'_, DispatcherState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Read-only snapshot of a dispatcher's queue and configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DispatcherStatus {
    pub queue_length: usize,
    pub processing: bool,
    pub rate_per_second: u32,
    pub min_interval_ms: u64,
}

/// Future returned by [`RateLimitedDispatcher::enqueue`]. Resolves exactly
/// once with the operation's outcome, only after the drain loop has actually
/// invoked it (or rejected it before invocation).
pub struct DispatchTicket<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Future for DispatchTicket<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|settled| match settled {
                Ok(outcome) => outcome,
                Err(_) => Err(DispatchError::Disconnected),
            })
    }
}

/// FIFO queue of send-operations drained at a fixed maximum rate.
///
/// Cheap to clone; clones share the same queue. Construct one instance per
/// rate-limited resource and inject it wherever sends originate.
pub struct RateLimitedDispatcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RateLimitedDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for RateLimitedDispatcher<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new(DispatcherSettings::default())
    }
}

impl<T> RateLimitedDispatcher<T>
where
    T: Send + 'static,
{
    pub fn new(settings: DispatcherSettings) -> Self {
        let slots = settings
            .queue_capacity
            .bound()
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            inner: Arc::new(Inner {
                settings,
                state: Mutex::new(DispatcherState {
                    queue: VecDeque::new(),
                    processing: false,
                    last_dispatch_at: None,
                }),
                slots,
            }),
        }
    }

    pub fn with_rate(rate_per_second: u32) -> Self {
        Self::new(DispatcherSettings::with_rate(rate_per_second))
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.inner.settings
    }

    /// Append a send-operation to the tail of the queue.
    ///
    /// Returns a [`DispatchTicket`] that settles with the operation's result
    /// once the drain loop has run it. The call itself never fails: a
    /// bounded queue under the `Reject` policy surfaces `QueueFull` through
    /// the ticket, and under `Block` this call suspends until a slot frees
    /// up, with concurrent waiters admitted in arrival order. Starting the
    /// drain loop is idempotent; the `processing` guard is checked under the
    /// same lock as the push.
    pub async fn enqueue<F, Fut>(&self, operation: F) -> DispatchTicket<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let ticket = DispatchTicket { receiver: rx };
        let id = TaskId::next();

        let slot = match &self.inner.slots {
            None => None,
            Some(slots) => match self.inner.settings.overflow_policy {
                OverflowPolicy::Reject => match Arc::clone(slots).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!(task_id = %id, "queue at capacity, rejecting task");
                        let _ = tx.send(Err(DispatchError::QueueFull));
                        return ticket;
                    }
                },
                OverflowPolicy::Block => match Arc::clone(slots).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    // The semaphore is never closed; keep the ticket sound
                    // anyway rather than panicking.
                    Err(_) => {
                        let _ = tx.send(Err(DispatchError::Disconnected));
                        return ticket;
                    }
                },
            },
        };

        let task = DispatchTask {
            id,
            operation: Box::new(move || Box::pin(operation()) as OperationFuture<T>),
            enqueued_at: Instant::now(),
            completion: tx,
            slot,
        };

        let mut state = self.inner.lock_state();
        debug!(task_id = %task.id, queue_length = state.queue.len() + 1, "task enqueued");
        state.queue.push_back(task);
        if !state.processing {
            state.processing = true;
            spawn_drain_loop(Arc::clone(&self.inner));
        }
        ticket
    }

    /// Read-only snapshot, no side effects.
    pub fn status(&self) -> DispatcherStatus {
        let state = self.inner.lock_state();
        DispatcherStatus {
            queue_length: state.queue.len(),
            processing: state.processing,
            rate_per_second: self.inner.settings.rate_per_second,
            min_interval_ms: self.inner.settings.min_interval_ms(),
        }
    }

    /// Emergency stop: discard every task still waiting in the queue without
    /// invoking it. Each discarded ticket settles with
    /// [`DispatchError::Cancelled`]. A task whose operation is already in
    /// flight is not affected. Returns the number of tasks discarded.
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<DispatchTask<T>> = {
            let mut state = self.inner.lock_state();
            state.queue.drain(..).collect()
        };
        let count = drained.len();
        // Settling drops each task, which releases its waiting slot and
        // admits the oldest blocked enqueuer, if any.
        for dispatch_task in drained {
            warn!(task_id = %dispatch_task.id, "cancelling queued task");
            dispatch_task.settle(Err(DispatchError::Cancelled));
        }
        count
    }
}

fn spawn_drain_loop<T>(inner: Arc<Inner<T>>)
where
    T: Send + 'static,
{
    tokio::spawn(drain_loop(inner));
}

/// The single cooperative loop: pop the head task, wait out the remainder of
/// the rate interval, invoke the operation, settle the ticket, repeat.
/// Failures are recorded on the failing task only. Exits once the queue is
/// empty; the empty-check and the `processing` guard clear happen in the
/// same critical section as `enqueue`'s push, so no task is ever stranded
/// behind an exiting loop.
async fn drain_loop<T>(inner: Arc<Inner<T>>)
where
    T: Send + 'static,
{
    let min_interval = inner.settings.min_interval();
    loop {
        let dispatch_task = {
            let mut state = inner.lock_state();
            match state.queue.pop_front() {
                Some(task) => task,
                None => {
                    state.processing = false;
                    break;
                }
            }
        };

        // The wait is computed from the start of the previous operation, not
        // from a fixed clock tick, so a slow operation does not earn the
        // next one a shorter gap than `min_interval`.
        let wait = {
            let state = inner.lock_state();
            state
                .last_dispatch_at
                .map(|at| min_interval.saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        {
            let mut state = inner.lock_state();
            state.last_dispatch_at = Some(Instant::now());
        }

        let DispatchTask {
            id: task_id,
            operation,
            enqueued_at,
            completion,
            slot,
        } = dispatch_task;
        // The task has left the queue; free its waiting slot before the
        // (possibly long) operation runs.
        drop(slot);

        debug!(
            task_id = %task_id,
            queued_for_ms = enqueued_at.elapsed().as_millis() as u64,
            "starting dispatch"
        );
        let outcome = match inner.settings.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(DispatchError::Operation),
                Err(_) => Err(DispatchError::TimedOut(limit)),
            },
            None => operation().await.map_err(DispatchError::Operation),
        };
        match &outcome {
            Ok(_) => debug!(task_id = %task_id, "dispatch succeeded"),
            Err(err) => warn!(task_id = %task_id, error = %err, "dispatch failed"),
        }
        let _ = completion.send(outcome);
    }
}

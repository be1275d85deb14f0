//! Background worker pool
//!
//! Background jobs run on a tokio multi-thread runtime that is started the
//! first time a job is spawned. Jobs never see the `App`: the closures and
//! futures must be `Send + 'static`, and the app is `!Send`. Every job
//! reports back over a channel with a [`JobOutcome`]; the foreground lane
//! drains that channel and hands outcomes to whoever awaits the job.

use futures_util::FutureExt;
use hearth_types::JobId;
use once_cell::unsync::OnceCell;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;

/// Why a background job produced no value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Background job was cancelled")]
    Cancelled,

    #[error("Background job panicked: {0}")]
    Panicked(String),

    #[error("Background job produced an unexpected output type")]
    OutputMismatch,
}

/// Raw outcome of a job, as carried over the result channel
pub(crate) enum JobOutcome {
    Completed(Box<dyn Any + Send>),
    Panicked(String),
    Cancelled,
}

impl JobOutcome {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        JobOutcome::Panicked(message)
    }

    pub(crate) fn into_result<R: 'static>(self) -> Result<R, JobError> {
        match self {
            JobOutcome::Completed(value) => value
                .downcast::<R>()
                .map(|value| *value)
                .map_err(|_| JobError::OutputMismatch),
            JobOutcome::Panicked(message) => Err(JobError::Panicked(message)),
            JobOutcome::Cancelled => Err(JobError::Cancelled),
        }
    }
}

impl fmt::Debug for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed(_) => f.write_str("Completed"),
            JobOutcome::Panicked(message) => f.debug_tuple("Panicked").field(message).finish(),
            JobOutcome::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Flags shared between a job, its handle and the pool
#[derive(Debug, Default)]
struct JobControl {
    cancelled: AtomicBool,
    /// The handle is gone, so nobody will take the outcome
    released: AtomicBool,
}

impl JobControl {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Handle to a background job producing `R`
///
/// Dropping the handle cancels the job; [`BackgroundTask::detach`] lets it
/// finish and discards its outcome. Cancellation is best effort: futures
/// are aborted at their next await point, blocking closures that already
/// started run to completion and their result is thrown away.
#[must_use = "dropping a BackgroundTask cancels it; call `detach` to let it run"]
pub struct BackgroundTask<R> {
    id: JobId,
    control: Arc<JobControl>,
    detached: bool,
    output: PhantomData<fn() -> R>,
}

impl<R> BackgroundTask<R> {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Request cancellation; the job's outcome becomes `JobError::Cancelled`
    pub fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Let the job run to completion without anyone taking its outcome
    pub fn detach(mut self) {
        self.detached = true;
        self.control.released.store(true, Ordering::Release);
    }
}

impl<R> Drop for BackgroundTask<R> {
    fn drop(&mut self) {
        if !self.detached {
            self.control.released.store(true, Ordering::Release);
            self.cancel();
        }
    }
}

impl<R> fmt::Debug for BackgroundTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct Delivery {
    job: JobId,
    outcome: JobOutcome,
}

struct PendingJob {
    control: Arc<JobControl>,
    abort: Option<AbortHandle>,
}

/// An outcome waiting to be taken by the job's handle
struct CompletedJob {
    control: Arc<JobControl>,
    outcome: JobOutcome,
}

/// The background lane plus the foreground side of its result channel
pub(crate) struct BackgroundPool {
    runtime: OnceCell<Runtime>,
    threads: usize,
    thread_name: String,
    sender: UnboundedSender<Delivery>,
    receiver: UnboundedReceiver<Delivery>,
    pending: HashMap<JobId, PendingJob>,
    completed: HashMap<JobId, CompletedJob>,
}

impl BackgroundPool {
    pub(crate) fn new(threads: usize, thread_name: String) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            runtime: OnceCell::new(),
            threads,
            thread_name,
            sender,
            receiver,
            pending: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    fn runtime(&self) -> std::io::Result<&Runtime> {
        self.runtime.get_or_try_init(|| {
            tracing::debug!(
                threads = self.threads,
                thread_name = %self.thread_name,
                "starting background pool"
            );
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(self.threads)
                .max_blocking_threads(self.threads)
                .thread_name(self.thread_name.clone())
                .enable_all()
                .build()
        })
    }

    fn register<R>(&mut self, id: JobId, control: Arc<JobControl>, abort: Option<AbortHandle>) -> BackgroundTask<R> {
        self.pending.insert(
            id,
            PendingJob {
                control: control.clone(),
                abort,
            },
        );
        tracing::trace!(job = %id, "spawned background job");
        BackgroundTask {
            id,
            control,
            detached: false,
            output: PhantomData,
        }
    }

    /// Run a blocking closure on the pool
    pub(crate) fn spawn<R, F>(&mut self, work: F) -> std::io::Result<BackgroundTask<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let id = JobId::new();
        let control = Arc::new(JobControl::default());
        let sender = self.sender.clone();
        let job_control = control.clone();
        self.runtime()?.spawn_blocking(move || {
            let outcome = if job_control.is_cancelled() {
                JobOutcome::Cancelled
            } else {
                match std::panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(value) => JobOutcome::Completed(Box::new(value)),
                    Err(payload) => JobOutcome::from_panic(payload),
                }
            };
            let _ = sender.send(Delivery { job: id, outcome });
        });
        Ok(self.register(id, control, None))
    }

    /// Run a future on the pool
    pub(crate) fn spawn_future<F>(&mut self, future: F) -> std::io::Result<BackgroundTask<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = JobId::new();
        let control = Arc::new(JobControl::default());
        let sender = self.sender.clone();
        let handle = self.runtime()?.spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(value) => JobOutcome::Completed(Box::new(value)),
                Err(payload) => JobOutcome::from_panic(payload),
            };
            let _ = sender.send(Delivery { job: id, outcome });
        });
        Ok(self.register(id, control, Some(handle.abort_handle())))
    }

    /// Move delivered outcomes and cancellations into `completed`
    pub(crate) fn drain(&mut self) {
        while let Ok(delivery) = self.receiver.try_recv() {
            self.deliver(delivery);
        }

        let cancelled: Vec<JobId> = self
            .pending
            .iter()
            .filter(|(_, job)| job.control.is_cancelled())
            .map(|(id, _)| *id)
            .collect();
        for id in cancelled {
            if let Some(job) = self.pending.remove(&id) {
                if let Some(abort) = job.abort {
                    abort.abort();
                }
                tracing::trace!(job = %id, "background job cancelled");
                if !job.control.is_released() {
                    self.completed.insert(
                        id,
                        CompletedJob {
                            control: job.control,
                            outcome: JobOutcome::Cancelled,
                        },
                    );
                }
            }
        }

        let before = self.completed.len();
        self.completed.retain(|_, job| !job.control.is_released());
        let purged = before - self.completed.len();
        if purged > 0 {
            tracing::trace!(purged, "discarded outcomes nobody will take");
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        let Some(job) = self.pending.remove(&delivery.job) else {
            tracing::trace!(job = %delivery.job, "discarding outcome of cancelled job");
            return;
        };
        if job.control.is_released() {
            return;
        }
        let outcome = if job.control.is_cancelled() {
            JobOutcome::Cancelled
        } else {
            delivery.outcome
        };
        if let JobOutcome::Panicked(message) = &outcome {
            tracing::warn!(job = %delivery.job, %message, "background job panicked");
        }
        self.completed.insert(
            delivery.job,
            CompletedJob {
                control: job.control,
                outcome,
            },
        );
    }

    /// Block until one more outcome arrives
    ///
    /// Must not be called from inside an async context.
    pub(crate) fn wait_for_delivery(&mut self) {
        if let Some(delivery) = self.receiver.blocking_recv() {
            self.deliver(delivery);
        }
        self.drain();
    }

    pub(crate) fn take(&mut self, id: JobId) -> Option<JobOutcome> {
        self.completed.remove(&id).map(|job| job.outcome)
    }

    pub(crate) fn is_settled(&self, id: JobId) -> bool {
        self.completed.contains_key(&id)
    }

    pub(crate) fn is_pending(&self, id: JobId) -> bool {
        self.pending.contains_key(&id)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> BackgroundPool {
        BackgroundPool::new(2, "hearth-test".to_string())
    }

    fn wait(pool: &mut BackgroundPool, id: JobId) -> JobOutcome {
        while !pool.is_settled(id) {
            pool.wait_for_delivery();
        }
        pool.take(id).unwrap()
    }

    #[test]
    fn test_blocking_job_delivers() {
        let mut pool = pool();
        let job = pool.spawn(|| 6 * 7).unwrap();
        let outcome = wait(&mut pool, job.id());
        assert_eq!(outcome.into_result::<i32>(), Ok(42));
        assert_eq!(pool.pending_len(), 0);
    }

    #[test]
    fn test_future_job_delivers() {
        let mut pool = pool();
        let job = pool
            .spawn_future(async { String::from("done") })
            .unwrap();
        let outcome = wait(&mut pool, job.id());
        assert_eq!(outcome.into_result::<String>(), Ok("done".to_string()));
    }

    #[test]
    fn test_panic_is_reported() {
        let mut pool = pool();
        let job = pool.spawn(|| -> u8 { panic!("worker blew up") }).unwrap();
        let outcome = wait(&mut pool, job.id());
        assert_eq!(
            outcome.into_result::<u8>(),
            Err(JobError::Panicked("worker blew up".to_string()))
        );
    }

    #[test]
    fn test_cancelled_job_reports_cancelled() {
        let mut pool = pool();
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let job = pool
            .spawn(move || {
                let _ = gate.recv();
                1u8
            })
            .unwrap();
        job.cancel();
        pool.drain();
        assert!(!pool.is_pending(job.id()));
        assert_eq!(
            pool.take(job.id()).unwrap().into_result::<u8>(),
            Err(JobError::Cancelled)
        );

        // The late result is discarded.
        release.send(()).unwrap();
        let late = pool.receiver.blocking_recv().unwrap();
        pool.deliver(late);
        assert!(!pool.is_settled(job.id()));
    }

    #[test]
    fn test_output_mismatch() {
        let outcome = JobOutcome::Completed(Box::new(1u32));
        assert_eq!(outcome.into_result::<String>(), Err(JobError::OutputMismatch));
    }

    #[test]
    fn test_untaken_outcome_purged_after_handle_drop() {
        let mut pool = pool();
        for _ in 0..20 {
            let job = pool.spawn(|| 1u8).unwrap();
            while !pool.is_settled(job.id()) {
                pool.wait_for_delivery();
            }
            drop(job);
            pool.drain();
        }
        assert!(pool.completed.is_empty());
        assert_eq!(pool.pending_len(), 0);
    }
}

//! Two-lane task scheduler
//!
//! - the foreground lane runs [`Resumable`] tasks one resumption at a time
//!   on the thread that owns the `App`, in FIFO order
//! - the background lane runs `Send` work on a worker pool with no access
//!   to the arena
//!
//! The lanes meet through [`App::take_background_result`]: a foreground
//! task that returns `Step::Await(job)` is parked until that job's outcome
//! is in, then resumed to collect it.

mod background;
mod foreground;

pub use background::{BackgroundTask, JobError};
pub use foreground::{Resumable, Step, Task, TaskStatus};

pub(crate) use background::BackgroundPool;

use crate::app::App;
use crate::config::RuntimeConfig;
use crate::error::Result;
use foreground::{task_pair, Progress, Runnable};
use hearth_types::JobId;
use std::collections::VecDeque;
use std::future::Future;

struct Parked {
    job: JobId,
    task: Box<dyn Runnable>,
}

/// Run queues of both lanes
pub(crate) struct Executor {
    ready: VecDeque<Box<dyn Runnable>>,
    parked: Vec<Parked>,
    background: BackgroundPool,
}

impl Executor {
    pub(crate) fn new(config: &RuntimeConfig) -> Self {
        Self {
            ready: VecDeque::new(),
            parked: Vec::new(),
            background: BackgroundPool::new(config.background_threads, config.thread_name.clone()),
        }
    }

    /// Pull in background outcomes and wake the tasks waiting on them
    fn poll(&mut self) {
        self.background.drain();
        let parked = std::mem::take(&mut self.parked);
        for Parked { job, task } in parked {
            if task.is_cancelled() {
                tracing::trace!(task = %task.id(), "dropping cancelled task");
            } else if self.background.is_settled(job) {
                self.ready.push_back(task);
            } else {
                self.parked.push(Parked { job, task });
            }
        }
    }

    fn park(&mut self, job: JobId, task: Box<dyn Runnable>) {
        if self.background.is_settled(job) {
            self.ready.push_back(task);
        } else {
            if !self.background.is_pending(job) {
                tracing::warn!(task = %task.id(), %job, "task awaits a job that is not running");
            }
            self.parked.push(Parked { job, task });
        }
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn parked_len(&self) -> usize {
        self.parked.len()
    }

    pub(crate) fn pending_jobs(&self) -> usize {
        self.background.pending_len()
    }
}

/// Waits for one job and hands its outcome to a continuation
struct Continuation<R, C> {
    job: BackgroundTask<R>,
    then: Option<C>,
}

impl<R, C> Resumable for Continuation<R, C>
where
    R: Send + 'static,
    C: FnOnce(std::result::Result<R, JobError>, &mut App) + 'static,
{
    type Output = ();

    fn resume(&mut self, cx: &mut App) -> Step<()> {
        match cx.take_background_result(&self.job) {
            None => Step::Await(self.job.id()),
            Some(result) => {
                if let Some(then) = self.then.take() {
                    then(result, cx);
                }
                Step::Done(())
            }
        }
    }
}

impl App {
    /// Queue a closure as a foreground task
    pub fn spawn<T: 'static>(&mut self, task: impl FnMut(&mut App) -> Step<T> + 'static) -> Task<T> {
        self.spawn_resumable(task)
    }

    /// Queue a state machine as a foreground task
    ///
    /// Nothing runs until the run loop is driven with
    /// [`run_until_parked`](Self::run_until_parked) or
    /// [`run_until_idle`](Self::run_until_idle).
    pub fn spawn_resumable<R: Resumable>(&mut self, task: R) -> Task<R::Output> {
        let (runner, handle) = task_pair(task);
        tracing::trace!(task = %runner.id(), "spawned foreground task");
        self.executor.ready.push_back(runner);
        handle
    }

    /// Run a blocking closure on the background pool
    pub fn spawn_background<R, F>(&mut self, work: F) -> Result<BackgroundTask<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        Ok(self.executor.background.spawn(work)?)
    }

    /// Run a future on the background pool
    pub fn spawn_background_future<F>(&mut self, future: F) -> Result<BackgroundTask<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(self.executor.background.spawn_future(future)?)
    }

    /// Collect a job's outcome if it has been delivered
    ///
    /// Returns `None` while the job is still running. An outcome can be
    /// taken once.
    pub fn take_background_result<R: 'static>(
        &mut self,
        job: &BackgroundTask<R>,
    ) -> Option<std::result::Result<R, JobError>> {
        self.executor.background.drain();
        self.executor
            .background
            .take(job.id())
            .map(|outcome| outcome.into_result())
    }

    /// Run `work` in the background, then `then` on the foreground with
    /// the job's result
    pub fn background_then<R, F, C>(&mut self, work: F, then: C) -> Result<Task<()>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(std::result::Result<R, JobError>, &mut App) + 'static,
    {
        let job = self.spawn_background(work)?;
        Ok(self.spawn_resumable(Continuation {
            job,
            then: Some(then),
        }))
    }

    /// Resume ready tasks until none are left; never blocks
    ///
    /// Returns the number of resumptions performed.
    pub fn run_until_parked(&mut self) -> usize {
        let mut resumed = 0;
        loop {
            self.executor.poll();
            let Some(mut task) = self.executor.ready.pop_front() else {
                break;
            };
            if task.is_cancelled() {
                tracing::trace!(task = %task.id(), "dropping cancelled task");
                continue;
            }

            resumed += 1;
            let progress = task.resume(self);
            self.flush_effects();
            match progress {
                Progress::Yield => self.executor.ready.push_back(task),
                Progress::Await(job) => self.executor.park(job, task),
                Progress::Finished => tracing::trace!(task = %task.id(), "task finished"),
            }
        }
        resumed
    }

    /// Drive the foreground lane until every task has finished or is
    /// parked on a job that will never deliver
    ///
    /// Blocks the calling thread while tasks wait on running jobs. Must not
    /// be called from inside an async context.
    pub fn run_until_idle(&mut self) {
        loop {
            self.run_until_parked();
            if self.executor.parked.is_empty() {
                return;
            }
            if self.executor.background.pending_len() == 0 {
                tracing::warn!(
                    parked = self.executor.parked.len(),
                    "tasks are parked on jobs that will never deliver"
                );
                return;
            }
            self.executor.background.wait_for_delivery();
        }
    }
}

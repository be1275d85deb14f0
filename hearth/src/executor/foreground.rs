//! Foreground tasks
//!
//! A foreground task is an explicit state machine: the run loop calls
//! [`Resumable::resume`] with full app access, and the returned [`Step`]
//! says whether to resume again, park until a background job delivers, or
//! stop. Plain closures of type `FnMut(&mut App) -> Step<T>` are tasks too.

use crate::app::App;
use hearth_types::{JobId, TaskId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Outcome of one resumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Resume again after the other ready tasks have had a turn
    Yield,
    /// Park until the given background job has delivered its outcome
    Await(JobId),
    /// Finished with an output
    Done(T),
    /// Finished without an output
    Abandon,
}

/// A foreground state machine
pub trait Resumable: 'static {
    type Output: 'static;

    /// Advance the task by one step
    fn resume(&mut self, cx: &mut App) -> Step<Self::Output>;
}

impl<F, T> Resumable for F
where
    F: FnMut(&mut App) -> Step<T> + 'static,
    T: 'static,
{
    type Output = T;

    fn resume(&mut self, cx: &mut App) -> Step<T> {
        self(cx)
    }
}

/// Lifecycle of a foreground task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting to be resumed
    Pending,
    /// Returned `Step::Done`
    Finished,
    /// Returned `Step::Abandon`
    Abandoned,
    /// Its handle was dropped or cancelled before it finished
    Cancelled,
}

struct TaskShared<T> {
    status: Cell<TaskStatus>,
    output: RefCell<Option<T>>,
}

/// Handle to a foreground task
///
/// Dropping the handle cancels the task: it is not resumed again, though
/// the effects of earlier resumptions remain. Call [`Task::detach`] to let
/// it run to completion unobserved.
#[must_use = "dropping a Task cancels it; call `detach` to let it run"]
pub struct Task<T> {
    id: TaskId,
    shared: Rc<TaskShared<T>>,
    detached: bool,
}

impl<T> Task<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status.get()
    }

    pub fn is_finished(&self) -> bool {
        self.status() == TaskStatus::Finished
    }

    /// Take the output of a finished task
    pub fn take_output(&self) -> Option<T> {
        self.shared.output.borrow_mut().take()
    }

    /// Let the task keep running after the handle is gone
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// Stop the task before its next resumption
    pub fn cancel(self) {}
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached && self.shared.status.get() == TaskStatus::Pending {
            self.shared.status.set(TaskStatus::Cancelled);
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// What the run loop should do with a task after resuming it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Yield,
    Await(JobId),
    Finished,
}

/// Type-erased task as stored in the run queue
pub(crate) trait Runnable {
    fn id(&self) -> TaskId;
    fn is_cancelled(&self) -> bool;
    fn resume(&mut self, cx: &mut App) -> Progress;
}

struct TaskRunner<R: Resumable> {
    id: TaskId,
    task: R,
    shared: Rc<TaskShared<R::Output>>,
}

impl<R: Resumable> Runnable for TaskRunner<R> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn is_cancelled(&self) -> bool {
        self.shared.status.get() == TaskStatus::Cancelled
    }

    fn resume(&mut self, cx: &mut App) -> Progress {
        match self.task.resume(cx) {
            Step::Yield => Progress::Yield,
            Step::Await(job) => Progress::Await(job),
            Step::Done(output) => {
                *self.shared.output.borrow_mut() = Some(output);
                self.shared.status.set(TaskStatus::Finished);
                Progress::Finished
            }
            Step::Abandon => {
                self.shared.status.set(TaskStatus::Abandoned);
                Progress::Finished
            }
        }
    }
}

/// Pair a resumable with the handle that observes it
pub(crate) fn task_pair<R: Resumable>(task: R) -> (Box<dyn Runnable>, Task<R::Output>) {
    let id = TaskId::new();
    let shared = Rc::new(TaskShared {
        status: Cell::new(TaskStatus::Pending),
        output: RefCell::new(None),
    });
    let runner = TaskRunner {
        id,
        task,
        shared: shared.clone(),
    };
    let handle = Task {
        id,
        shared,
        detached: false,
    };
    (Box::new(runner), handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_publishes_output() {
        let mut app = App::new();
        let (mut runner, task) = task_pair(|_: &mut App| Step::Done(5));
        assert_eq!(runner.resume(&mut app), Progress::Finished);
        assert!(task.is_finished());
        assert_eq!(task.take_output(), Some(5));
        assert_eq!(task.take_output(), None);
    }

    #[test]
    fn test_drop_cancels_pending() {
        let (runner, task) = task_pair(|_: &mut App| Step::<()>::Yield);
        assert!(!runner.is_cancelled());
        drop(task);
        assert!(runner.is_cancelled());
    }

    #[test]
    fn test_detach_keeps_running() {
        let (runner, task) = task_pair(|_: &mut App| Step::<()>::Yield);
        task.detach();
        assert!(!runner.is_cancelled());
    }

    #[test]
    fn test_abandon_has_no_output() {
        let mut app = App::new();
        let (mut runner, task) = task_pair(|_: &mut App| Step::<u8>::Abandon);
        assert_eq!(runner.resume(&mut app), Progress::Finished);
        assert_eq!(task.status(), TaskStatus::Abandoned);
        assert_eq!(task.take_output(), None);
    }
}

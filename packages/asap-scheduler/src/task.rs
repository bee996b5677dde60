use std::fmt;

/// A zero-argument unit of deferred work.
///
/// Tasks are single-threaded: they may capture `Rc`s and other `!Send` state,
/// and they may schedule further tasks on the scheduler that runs them.
pub struct Task {
    run: Box<dyn FnOnce()>,
}

impl Task {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self { run: Box::new(f) }
    }

    /// Consumes the task and runs it to completion.
    pub fn run(self) {
        (self.run)()
    }

    /// Wraps this task so that `around` decides how (and whether) it runs.
    ///
    /// Used by execution contexts to restore the context a task was
    /// submitted under.
    pub fn wrap(self, around: impl FnOnce(Task) + 'static) -> Task {
        Task::new(move || around(self))
    }
}

impl<F> From<F> for Task
where
    F: FnOnce() + 'static,
{
    fn from(f: F) -> Self {
        Task::new(f)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

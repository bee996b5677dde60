use crate::error::{ErrorPolicy, ErrorReporter, TaskError};
use crate::scheduler::Scheduler;
use crate::wake::{Callback, Mechanism, WakeReason, WakeUp};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

type Turn = Box<dyn FnOnce()>;

/// A single-threaded event loop driven by hand.
///
/// Each wake-up request, reported error and posted closure becomes one turn,
/// run in FIFO order by [`run_turn`](Self::run_turn). A turn that panics is
/// caught and recorded as uncaught, the way a host's global error hook would
/// see it, and the loop carries on. Useful for tests and for embedding a
/// scheduler in a loop the application already owns.
#[derive(Clone)]
pub struct ManualLoop {
    state: Rc<LoopState>,
}

struct LoopState {
    mechanism: Mechanism,
    turns: RefCell<VecDeque<Turn>>,
    requests: RefCell<Vec<WakeReason>>,
    uncaught: RefCell<Vec<TaskError>>,
}

impl Default for ManualLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualLoop {
    pub fn new() -> Self {
        Self::with_mechanism(Mechanism::Immediate)
    }

    /// A loop that reports `mechanism` as the class of its wake-up primitive.
    pub fn with_mechanism(mechanism: Mechanism) -> Self {
        Self {
            state: Rc::new(LoopState {
                mechanism,
                turns: RefCell::new(VecDeque::new()),
                requests: RefCell::new(Vec::new()),
                uncaught: RefCell::new(Vec::new()),
            }),
        }
    }

    /// A scheduler woken by this loop and reporting errors to it.
    pub fn scheduler(&self, policy: ErrorPolicy) -> Scheduler {
        Scheduler::builder(self.clone())
            .error_policy(policy)
            .reporter(self.clone())
            .build()
    }

    /// Queues an unrelated turn, as other host work would.
    pub fn post(&self, f: impl FnOnce() + 'static) {
        self.state.turns.borrow_mut().push_back(Box::new(f));
    }

    /// Runs the oldest pending turn. Returns `false` if there was none.
    pub fn run_turn(&self) -> bool {
        let Some(turn) = self.state.turns.borrow_mut().pop_front() else {
            return false;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(turn)) {
            let error = TaskError::from_panic(payload);
            tracing::debug!(error = %error, "uncaught panic in loop turn");
            self.state.uncaught.borrow_mut().push(error);
        }
        true
    }

    /// Runs turns until none are left. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.run_turn() {
            turns += 1;
        }
        turns
    }

    pub fn pending_turns(&self) -> usize {
        self.state.turns.borrow().len()
    }

    /// Every wake-up request received so far, oldest first.
    pub fn wake_requests(&self) -> Vec<WakeReason> {
        self.state.requests.borrow().clone()
    }

    /// Takes the errors that escaped a turn or were reported to the loop.
    pub fn take_uncaught(&self) -> Vec<TaskError> {
        std::mem::take(&mut *self.state.uncaught.borrow_mut())
    }
}

impl WakeUp for ManualLoop {
    fn mechanism(&self) -> Mechanism {
        self.state.mechanism
    }

    fn request(&self, callback: Callback, reason: WakeReason) {
        self.state.requests.borrow_mut().push(reason);
        self.post(move || callback());
    }
}

impl ErrorReporter for ManualLoop {
    fn report(&self, error: TaskError) {
        let state = Rc::downgrade(&self.state);
        self.post(move || {
            if let Some(state) = state.upgrade() {
                state.uncaught.borrow_mut().push(error);
            }
        });
    }
}

use crate::context::{ExecutionContext, Propagate};
use crate::error::{ErrorPolicy, ErrorReporter, TaskError};
use crate::queue::TaskQueue;
use crate::task::Task;
use crate::wake::{Callback, Mechanism, WakeReason, WakeUp};
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    pub error_policy: ErrorPolicy,
}

/// Counters describing a scheduler's activity since it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    pub pending_tasks: usize,
    /// Tasks taken off the queue and run, including ones that panicked.
    pub tasks_run: u64,
    pub tasks_failed: u64,
    pub wake_requests: u64,
    pub flushes: u64,
}

#[derive(Default)]
struct Counters {
    tasks_run: Cell<u64>,
    tasks_failed: Cell<u64>,
    wake_requests: Cell<u64>,
    flushes: Cell<u64>,
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

/// Runs tasks in a future turn of a single-threaded loop, as soon as the loop
/// is free.
///
/// Submissions are queued in FIFO order. The first submission after the
/// scheduler comes to rest requests one wake-up from the host primitive; every
/// later submission before that wake-up fires rides along with it. When the
/// wake-up fires, the queue is drained completely, including tasks submitted
/// by the tasks being drained, and only then does the scheduler come to rest.
///
/// Cloning a `Scheduler` yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

struct Inner {
    queue: TaskQueue,
    armed: Cell<bool>,
    wake: Box<dyn WakeUp>,
    flush: Callback,
    policy: ErrorPolicy,
    reporter: Option<Box<dyn ErrorReporter>>,
    context: Option<Box<dyn Propagate>>,
    counters: Counters,
}

pub struct SchedulerBuilder {
    wake: Box<dyn WakeUp>,
    config: SchedulerConfig,
    reporter: Option<Box<dyn ErrorReporter>>,
    context: Option<Box<dyn Propagate>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.config.error_policy = policy;
        self
    }

    /// Where failures go under [`ErrorPolicy::Report`]. Without one, the
    /// scheduler logs each failure from a separate wake-up after the drain.
    pub fn reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    pub fn context(mut self, context: impl ExecutionContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    pub fn build(self) -> Scheduler {
        let SchedulerBuilder {
            wake,
            config,
            reporter,
            context,
        } = self;

        tracing::debug!(
            mechanism = %wake.mechanism(),
            policy = ?config.error_policy,
            "scheduler created"
        );

        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            Inner {
                queue: TaskQueue::new(),
                armed: Cell::new(false),
                wake,
                flush: Rc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.flush();
                    }
                }),
                policy: config.error_policy,
                reporter,
                context,
                counters: Counters::default(),
            }
        });
        Scheduler { inner }
    }
}

impl Scheduler {
    pub fn new(wake: impl WakeUp + 'static) -> Self {
        Self::builder(wake).build()
    }

    pub fn with_config(wake: impl WakeUp + 'static, config: SchedulerConfig) -> Self {
        Self::builder(wake).config(config).build()
    }

    pub fn builder(wake: impl WakeUp + 'static) -> SchedulerBuilder {
        SchedulerBuilder {
            wake: Box::new(wake),
            config: SchedulerConfig::default(),
            reporter: None,
            context: None,
        }
    }

    /// Queues `f` to run in a future turn. Never runs it before returning.
    pub fn schedule(&self, f: impl FnOnce() + 'static) {
        self.submit(Task::new(f))
    }

    pub fn submit(&self, task: Task) {
        self.inner.submit(task)
    }

    /// `true` while a wake-up is outstanding or a drain is in progress.
    pub fn is_armed(&self) -> bool {
        self.inner.armed.get()
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn mechanism(&self) -> Mechanism {
        self.inner.wake.mechanism()
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.inner.policy
    }

    pub fn metrics(&self) -> Metrics {
        let counters = &self.inner.counters;
        Metrics {
            pending_tasks: self.inner.queue.len(),
            tasks_run: counters.tasks_run.get(),
            tasks_failed: counters.tasks_failed.get(),
            wake_requests: counters.wake_requests.get(),
            flushes: counters.flushes.get(),
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("mechanism", &self.mechanism())
            .field("policy", &self.inner.policy)
            .field("armed", &self.is_armed())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Inner {
    fn submit(&self, task: Task) {
        let task = match &self.context {
            Some(context) => context.bind_active(task),
            None => task,
        };
        self.queue.push(task);

        if !self.armed.get() {
            self.request_wake(WakeReason::Submitted);
            self.armed.set(true);
        }
    }

    fn request_wake(&self, reason: WakeReason) {
        bump(&self.counters.wake_requests);
        let mut request = || self.wake.request(self.flush.clone(), reason);
        match &self.context {
            Some(context) => context.detached(&mut request),
            None => request(),
        }
    }

    fn report_later(&self, error: TaskError) {
        let error = Cell::new(Some(error));
        let callback: Callback = Rc::new(move || {
            if let Some(error) = error.take() {
                tracing::error!(error = %error, "unhandled task failure");
            }
        });
        let mut request = || self.wake.request(callback.clone(), WakeReason::Reporting);
        match &self.context {
            Some(context) => context.detached(&mut request),
            None => request(),
        }
    }

    fn flush(&self) {
        let span = tracing::trace_span!("flush", mechanism = %self.wake.mechanism());
        let _enter = span.enter();
        bump(&self.counters.flushes);

        self.queue.drain_with(|task| self.run_isolated(task));

        self.armed.set(false);
        tracing::trace!("queue drained");
    }

    fn run_isolated(&self, task: Task) {
        bump(&self.counters.tasks_run);
        let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) else {
            return;
        };
        bump(&self.counters.tasks_failed);
        let error = TaskError::from_panic(payload);

        match self.policy {
            ErrorPolicy::Rethrow => {
                tracing::error!(
                    error = %error,
                    remaining = self.queue.len(),
                    "task panicked; re-arming before unwinding"
                );
                // Armed stays set: the remaining tasks belong to the new request.
                self.request_wake(WakeReason::Recovering);
                panic::resume_unwind(error.into_panic());
            }
            ErrorPolicy::Report => {
                tracing::debug!(remaining = self.queue.len(), "task panicked; continuing drain");
                match &self.reporter {
                    Some(reporter) => reporter.report(error),
                    None => self.report_later(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};

    /// Records requests instead of scheduling anything.
    #[derive(Clone, Default)]
    struct Recorder {
        requests: Rc<RefCell<Vec<(Callback, WakeReason)>>>,
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.requests.borrow().len()
        }

        fn fire(&self, index: usize) {
            let callback = self.requests.borrow()[index].0.clone();
            callback();
        }

        fn reason(&self, index: usize) -> WakeReason {
            self.requests.borrow()[index].1
        }
    }

    impl WakeUp for Recorder {
        fn mechanism(&self) -> Mechanism {
            Mechanism::Immediate
        }

        fn request(&self, callback: Callback, reason: WakeReason) {
            self.requests.borrow_mut().push((callback, reason));
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Rc<RefCell<Vec<String>>>);

    impl ErrorReporter for Collect {
        fn report(&self, error: TaskError) {
            self.0.borrow_mut().push(error.message().to_owned());
        }
    }

    #[test]
    fn schedule_never_runs_the_task_synchronously() {
        let wake = Recorder::default();
        let scheduler = Scheduler::new(wake.clone());
        let ran = Rc::new(Cell::new(false));

        {
            let ran = ran.clone();
            scheduler.schedule(move || ran.set(true));
        }
        assert!(!ran.get());
        assert!(scheduler.is_armed());

        wake.fire(0);
        assert!(ran.get());
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn submissions_between_drains_share_one_request() {
        let wake = Recorder::default();
        let scheduler = Scheduler::new(wake.clone());

        for _ in 0..10 {
            scheduler.schedule(|| {});
        }
        assert_eq!(wake.count(), 1);
        assert_eq!(wake.reason(0), WakeReason::Submitted);
        assert_eq!(scheduler.pending(), 10);

        wake.fire(0);
        assert_eq!(scheduler.pending(), 0);

        scheduler.schedule(|| {});
        scheduler.schedule(|| {});
        assert_eq!(wake.count(), 2);
    }

    #[test]
    fn rethrow_rearms_before_unwinding() {
        let wake = Recorder::default();
        let scheduler = Scheduler::new(wake.clone());
        let requests_at_panic = Rc::new(Cell::new(0));
        let after = Rc::new(Cell::new(false));

        {
            let wake = wake.clone();
            let requests_at_panic = requests_at_panic.clone();
            scheduler.schedule(move || {
                requests_at_panic.set(wake.count());
                panic!("first");
            });
        }
        {
            let after = after.clone();
            scheduler.schedule(move || after.set(true));
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| wake.fire(0)));
        let payload = result.expect_err("the panic escapes the drain");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"first"));

        assert_eq!(requests_at_panic.get(), 1);
        assert_eq!(wake.count(), 2);
        assert_eq!(wake.reason(1), WakeReason::Recovering);
        assert!(scheduler.is_armed());
        assert!(!after.get());

        wake.fire(1);
        assert!(after.get());
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn report_policy_keeps_draining() {
        let wake = Recorder::default();
        let errors = Collect::default();
        let scheduler = Scheduler::builder(wake.clone())
            .error_policy(ErrorPolicy::Report)
            .reporter(errors.clone())
            .build();
        let log = Rc::new(RefCell::new(Vec::new()));

        for step in ["ok1", "throwing", "ok2"] {
            let log = log.clone();
            scheduler.schedule(move || {
                if step == "throwing" {
                    panic!("bad task");
                }
                log.borrow_mut().push(step);
            });
        }

        wake.fire(0);
        assert_eq!(*log.borrow(), vec!["ok1", "ok2"]);
        assert_eq!(*errors.0.borrow(), vec!["bad task".to_owned()]);
        assert_eq!(wake.count(), 1);
        assert!(!scheduler.is_armed());
    }

    /// Counts `error` events seen by the thread's subscriber.
    struct ErrorEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for ErrorEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: layer::Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn default_reporting_waits_for_its_own_wake_up() {
        let logged = Arc::new(AtomicUsize::new(0));
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(ErrorEvents(logged.clone())),
        );

        let wake = Recorder::default();
        let scheduler = Scheduler::builder(wake.clone())
            .error_policy(ErrorPolicy::Report)
            .build();
        let logged_in_drain = Rc::new(Cell::new(usize::MAX));

        scheduler.schedule(|| panic!("later, please"));
        {
            let logged = logged.clone();
            let logged_in_drain = logged_in_drain.clone();
            scheduler.schedule(move || logged_in_drain.set(logged.load(Ordering::SeqCst)));
        }

        wake.fire(0);
        assert_eq!(logged_in_drain.get(), 0);
        assert_eq!(logged.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_armed());
        assert_eq!(wake.count(), 2);
        assert_eq!(wake.reason(1), WakeReason::Reporting);
        assert_eq!(scheduler.metrics().wake_requests, 1);

        wake.fire(1);
        assert_eq!(logged.load(Ordering::SeqCst), 1);
        wake.fire(1);
        assert_eq!(logged.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn metrics_track_activity() {
        let wake = Recorder::default();
        let scheduler = Scheduler::builder(wake.clone())
            .error_policy(ErrorPolicy::Report)
            .reporter(Collect::default())
            .build();

        scheduler.schedule(|| {});
        scheduler.schedule(|| panic!("counted"));
        assert_eq!(
            scheduler.metrics(),
            Metrics {
                pending_tasks: 2,
                wake_requests: 1,
                ..Metrics::default()
            }
        );

        wake.fire(0);
        assert_eq!(
            scheduler.metrics(),
            Metrics {
                pending_tasks: 0,
                tasks_run: 2,
                tasks_failed: 1,
                wake_requests: 1,
                flushes: 1,
            }
        );
    }

    #[test]
    fn stale_callbacks_are_harmless_after_drop() {
        let wake = Recorder::default();
        let scheduler = Scheduler::new(wake.clone());
        scheduler.schedule(|| {});
        drop(scheduler);
        wake.fire(0);
    }
}

//! Ambient execution contexts.
//!
//! Some hosts track a "current logical operation" that asynchronous work should
//! inherit, for error attribution or tracing. A scheduler with an
//! [`ExecutionContext`] installed binds every submitted task to the context
//! active at submission and makes its own wake-up requests with no context
//! active, so one task's context never leaks into the flush machinery.

use crate::task::Task;
use std::cell::RefCell;
use std::rc::Rc;

pub trait ExecutionContext: 'static {
    type Context: Clone + 'static;

    /// The context active right now, if any.
    fn active(&self) -> Option<Self::Context>;

    fn set_active(&self, context: Option<Self::Context>);

    /// Wraps `task` so that it runs with `context` active.
    fn bind(&self, task: Task, context: Self::Context) -> Task;
}

/// Object-safe view of an [`ExecutionContext`], as stored by the scheduler.
pub(crate) trait Propagate {
    fn bind_active(&self, task: Task) -> Task;

    /// Runs `f` with no context active, restoring the previous one after.
    fn detached(&self, f: &mut dyn FnMut());
}

impl<C: ExecutionContext> Propagate for C {
    fn bind_active(&self, task: Task) -> Task {
        match self.active() {
            Some(context) => self.bind(task, context),
            None => task,
        }
    }

    fn detached(&self, f: &mut dyn FnMut()) {
        let saved = self.active();
        if saved.is_none() {
            return f();
        }
        self.set_active(None);
        let _restore = Restore {
            context: self,
            saved,
        };
        f();
    }
}

/// Restores a saved context on drop, including while unwinding.
struct Restore<'a, C: ExecutionContext> {
    context: &'a C,
    saved: Option<C::Context>,
}

impl<C: ExecutionContext> Drop for Restore<'_, C> {
    fn drop(&mut self) {
        self.context.set_active(self.saved.take());
    }
}

/// A single-threaded ambient value slot.
///
/// Clones share the slot. `enter` makes a value current for the duration of a
/// closure; tasks scheduled meanwhile on a scheduler configured with this
/// context see the same value when they run.
pub struct Ambient<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Ambient<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone + 'static> Default for Ambient<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Ambient<T> {
    pub fn new() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
        }
    }

    pub fn current(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    pub fn enter<R>(&self, value: T, f: impl FnOnce() -> R) -> R {
        let saved = self.slot.replace(Some(value));
        let _restore = Restore {
            context: self,
            saved,
        };
        f()
    }
}

impl<T: Clone + 'static> ExecutionContext for Ambient<T> {
    type Context = T;

    fn active(&self) -> Option<T> {
        self.current()
    }

    fn set_active(&self, context: Option<T>) {
        *self.slot.borrow_mut() = context;
    }

    fn bind(&self, task: Task, context: T) -> Task {
        let ambient = self.clone();
        task.wrap(move |task| ambient.enter(context, || task.run()))
    }
}

use crate::task::Task;
use std::cell::{Cell, OnceCell, RefCell};
use std::rc::Rc;

struct Node {
    task: Cell<Option<Task>>,
    // Written exactly once, when the node stops being the tail.
    next: OnceCell<Rc<Node>>,
}

impl Node {
    fn new(task: Option<Task>) -> Self {
        Self {
            task: Cell::new(task),
            next: OnceCell::new(),
        }
    }
}

/// An unbounded FIFO queue of tasks.
///
/// The queue is a singly linked list with a consumed sentinel at `head`.
/// Appending links a node after `tail`; consuming advances `head` and takes
/// the task out of its slot, so a finished task's captures are released as
/// soon as it has run. Nothing is borrowed while a task runs, so tasks may
/// append to the queue that is draining them.
pub struct TaskQueue {
    head: RefCell<Rc<Node>>,
    tail: RefCell<Rc<Node>>,
    len: Cell<usize>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let sentinel = Rc::new(Node::new(None));
        Self {
            head: RefCell::new(sentinel.clone()),
            tail: RefCell::new(sentinel),
            len: Cell::new(0),
        }
    }

    pub fn push(&self, task: Task) {
        let node = Rc::new(Node::new(Some(task)));
        let mut tail = self.tail.borrow_mut();
        let linked = tail.next.set(node.clone()).is_ok();
        debug_assert!(linked, "tail node already had a successor");
        *tail = node;
        self.len.set(self.len.get() + 1);
    }

    /// Advances past the next pending node and takes its task.
    pub fn pop(&self) -> Option<Task> {
        let mut head = self.head.borrow_mut();
        let next = head.next.get()?.clone();
        *head = next;
        self.len.set(self.len.get() - 1);
        head.task.take()
    }

    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    /// Hands every pending task to `run`, oldest first, until the queue is
    /// caught up with its tail.
    ///
    /// Tasks appended while draining (including by the tasks themselves) are
    /// part of the same drain.
    pub fn drain_with(&self, mut run: impl FnMut(Task)) {
        while let Some(task) = self.pop() {
            run(task);
        }
    }

    pub fn drain(&self) {
        self.drain_with(Task::run)
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Unlink node by node; dropping the chain through `next` would recurse
        // once per pending task.
        let sentinel = Rc::new(Node::new(None));
        let mut cursor = Some(std::mem::replace(self.head.get_mut(), sentinel));
        while let Some(node) = cursor {
            cursor = match Rc::try_unwrap(node) {
                Ok(mut node) => node.next.take(),
                // Still shared with `tail`, which has no successor.
                Err(_) => None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn logging(log: &Rc<RefCell<Vec<u32>>>, value: u32) -> Task {
        let log = log.clone();
        Task::new(move || log.borrow_mut().push(value))
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..5 {
            queue.push(logging(&log, i));
        }
        assert_eq!(queue.len(), 5);

        queue.drain();
        assert_eq!(*log.borrow(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn drain_includes_tasks_appended_while_draining() {
        let queue = Rc::new(TaskQueue::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let q = queue.clone();
            let log = log.clone();
            queue.push(Task::new(move || {
                log.borrow_mut().push(1);
                let inner_log = log.clone();
                q.push(Task::new(move || inner_log.borrow_mut().push(3)));
            }));
        }
        queue.push(logging(&log, 2));

        queue.drain();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn consumed_tasks_release_their_captures() {
        let queue = TaskQueue::new();
        let captured = Rc::new(());

        {
            let captured = captured.clone();
            queue.push(Task::new(move || drop(captured)));
        }
        let unrelated = Rc::new(());
        {
            let unrelated = unrelated.clone();
            queue.push(Task::new(move || drop(unrelated)));
        }
        assert_eq!(Rc::strong_count(&captured), 2);

        let task = queue.pop().expect("a pending task");
        task.run();
        assert_eq!(Rc::strong_count(&captured), 1);
        assert_eq!(Rc::strong_count(&unrelated), 2);
    }

    #[test]
    fn pop_after_drain_resumes_with_new_tasks() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        queue.push(logging(&log, 1));
        queue.drain();
        queue.push(logging(&log, 2));
        queue.push(logging(&log, 3));
        queue.drain();

        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn dropping_a_long_queue_does_not_recurse() {
        let queue = TaskQueue::new();
        for _ in 0..500_000 {
            queue.push(Task::new(|| {}));
        }
        drop(queue);
    }
}

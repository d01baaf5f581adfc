//! Priority queue of accepted tasks awaiting admission.
//!
//! Higher priority dequeues first; within a priority, submission order is
//! preserved (FIFO) by a monotonically increasing sequence number.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use squadron_core::Priority;

use crate::task::Task;

struct QueuedTask {
    priority: Priority,
    seq: Reverse<u64>,
    task: Task,
}

impl QueuedTask {
    const fn key(&self) -> (Priority, Reverse<u64>) {
        (self.priority, self.seq)
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    seq: AtomicU64,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, task: Task) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.heap.lock().push(QueuedTask {
            priority: task.priority,
            seq: Reverse(seq),
            task,
        });
        self.notify.notify_one();
    }

    pub fn dequeue_next(&self) -> Option<Task> {
        self.heap.lock().pop().map(|q| q.task)
    }

    /// Resolves after the next `enqueue`; a wake-up sent while nobody was
    /// waiting is kept for the next caller.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Remove every queued task, highest priority first.
    pub fn drain(&self) -> Vec<Task> {
        let heap = std::mem::take(&mut *self.heap.lock());
        heap.into_sorted_vec().into_iter().rev().map(|q| q.task).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::{SubmitOptions, TaskTarget};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(id: &str, priority: Priority) -> Task {
        Task::new(
            &TaskTarget::from("t"),
            json!(null),
            SubmitOptions::default()
                .with_task_id(id)
                .with_priority(priority),
        )
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn priority_then_fifo() {
        let queue = TaskQueue::new();
        queue.enqueue(task("low", Priority::Low));
        queue.enqueue(task("med-1", Priority::Medium));
        queue.enqueue(task("crit", Priority::Critical));
        queue.enqueue(task("med-2", Priority::Medium));
        queue.enqueue(task("high", Priority::High));
        assert_eq!(queue.len(), 5);

        let order: Vec<Task> = std::iter::from_fn(|| queue.dequeue_next()).collect();
        assert_eq!(ids(&order), vec!["crit", "high", "med-1", "med-2", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_returns_everything_in_order() {
        let queue = TaskQueue::new();
        queue.enqueue(task("a", Priority::Low));
        queue.enqueue(task("b", Priority::High));
        queue.enqueue(task("c", Priority::Low));
        let drained = queue.drain();
        assert_eq!(ids(&drained), vec!["b", "a", "c"]);
        assert!(queue.dequeue_next().is_none());
    }

    #[tokio::test]
    async fn enqueue_wakes_waiter() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.notified().await;
                queue.dequeue_next().map(|t| t.id)
            })
        };
        tokio::task::yield_now().await;
        queue.enqueue(task("wake", Priority::Medium));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().as_str(), "wake");
    }

    #[tokio::test]
    async fn wakeup_before_wait_is_not_lost() {
        let queue = TaskQueue::new();
        queue.enqueue(task("early", Priority::Low));
        tokio::time::timeout(Duration::from_secs(1), queue.notified())
            .await
            .unwrap();
    }
}

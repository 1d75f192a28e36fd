//! Shared work queue for the worker pool
//!
//! Tasks are served lowest priority value first and FIFO within a priority.
//! The queue also tracks how many popped tasks are still being worked on, so
//! workers can tell "empty for now" apart from "run finished".

use crate::state::FetchTask;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A task with its insertion sequence number
#[derive(Debug)]
struct QueuedTask {
    task: FetchTask,
    seq: u64,
}

// BinaryHeap is a max-heap: reverse both keys so the smallest priority and
// the oldest insertion pop first
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

#[derive(Debug)]
struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
    in_flight: usize,
    producers_open: bool,
    closed: bool,
}

/// Work queue shared by the orchestrator's workers
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

impl WorkQueue {
    /// Creates an empty queue that expects more seeds until
    /// [`WorkQueue::close_producers`] is called
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                in_flight: 0,
                producers_open: true,
                closed: false,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a task; returns false if the queue has been closed
    pub fn push(&self, task: FetchTask) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueuedTask { task, seq });
        }
        self.changed.notify_waiters();
        true
    }

    /// Takes the next task, waiting while other workers may still add some
    ///
    /// Returns `None` once the queue is empty, no popped task is still being
    /// processed and no producer is open, or when the queue is closed or
    /// `cancel` fires. Queued tasks are never handed out after cancellation.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<FetchTask> {
        loop {
            let changed = self.changed.notified();
            {
                let mut state = self.lock();
                if state.closed || cancel.is_cancelled() {
                    return None;
                }
                if let Some(queued) = state.heap.pop() {
                    state.in_flight += 1;
                    return Some(queued.task);
                }
                if state.in_flight == 0 && !state.producers_open {
                    return None;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = changed => {}
            }
        }
    }

    /// Marks a popped task as finished
    ///
    /// Follow-on tasks must be pushed before this call so idle workers never
    /// observe an empty, idle queue in between.
    pub fn task_done(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    /// Signals that no more seeds will arrive
    pub fn close_producers(&self) {
        self.lock().producers_open = false;
        self.changed.notify_waiters();
    }

    /// Closes the queue and returns how many queued tasks were discarded
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            let count = state.heap.len();
            state.heap.clear();
            count
        };
        self.changed.notify_waiters();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Tasks popped and not yet marked done
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    fn task(path: &str, priority: u32) -> FetchTask {
        let url = Url::parse(&format!("https://example.com{}", path)).unwrap();
        let mut task = FetchTask::seed(url, "example.com:443".into(), 0, 1);
        task.priority = priority;
        task
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.push(task("/deep", 2));
        queue.push(task("/a", 0));
        queue.push(task("/b", 0));
        queue.push(task("/mid", 1));
        queue.close_producers();

        let mut order = Vec::new();
        while let Some(t) = queue.pop(&cancel).await {
            order.push(t.url.path().to_string());
            queue.task_done();
        }
        assert_eq!(order, vec!["/a", "/b", "/mid", "/deep"]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_in_flight_work() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();
        queue.push(task("/seed", 0));
        queue.close_producers();

        let first = queue.pop(&cancel).await.unwrap();
        assert_eq!(queue.in_flight(), 1);

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(first.next_page(
            Url::parse("https://example.com/seed?page=2").unwrap(),
            "example.com:443".into(),
        ));
        queue.task_done();

        let next = waiter.await.unwrap().unwrap();
        assert_eq!(next.depth, 1);
        queue.task_done();

        assert!(queue.pop(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_open_producer_keeps_workers_waiting() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.close_producers();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_page_keeps_arrival_order_among_seeds() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.push(task("/first", 0));
        let first = queue.pop(&cancel).await.unwrap();

        // A seed arrives before the first page's follow-up, another after it
        queue.push(task("/second", 0));
        queue.push(first.next_page(
            Url::parse("https://example.com/first?page=2").unwrap(),
            "example.com:443".into(),
        ));
        queue.task_done();
        queue.push(task("/third", 0));
        queue.close_producers();

        let mut order = Vec::new();
        while let Some(t) = queue.pop(&cancel).await {
            order.push(t.url.as_str().trim_start_matches("https://example.com").to_string());
            queue.task_done();
        }
        assert_eq!(order, vec!["/second", "/first?page=2", "/third"]);
    }

    #[tokio::test]
    async fn test_close_discards_pending() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.push(task("/a", 0));
        queue.push(task("/b", 0));

        assert_eq!(queue.close(), 2);
        assert!(!queue.push(task("/c", 0)));
        assert!(queue.pop(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_withholds_queued_tasks() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.push(task("/a", 0));
        queue.push(task("/b", 0));

        cancel.cancel();
        assert!(queue.pop(&cancel).await.is_none());
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.close(), 2);
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.pop(&cancel).await.is_none());
    }
}

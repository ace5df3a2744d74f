//! The fills-pending queue feeding the submitter. Guarded by its own mutex; the matching
//! pipeline only ever enqueues and never waits on settlement progress.

use model::{order::OrderCreation, trade::Fill};
use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio::sync::Notify;

/// A matched fill together with the signed orders the settlement contract needs to verify it.
#[derive(Clone, Debug)]
pub struct PendingFill {
    pub fill: Fill,
    pub taker: OrderCreation,
    pub maker: OrderCreation,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<(PendingFill, Instant)>,
}

#[derive(Default)]
pub struct SettlementQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl SettlementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, pending: PendingFill) {
        self.inner
            .lock()
            .unwrap()
            .pending
            .push_back((pending, Instant::now()));
        self.notify.notify_one();
    }

    /// Returns pending fills to the front of the queue, preserving their order, after a failed
    /// or reverted submission.
    pub fn prepend(&self, fills: Vec<PendingFill>) {
        let mut inner = self.inner.lock().unwrap();
        for pending in fills.into_iter().rev() {
            inner.pending.push_front((pending, Instant::now()));
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Whether a flush is due: the batch is full or the oldest pending fill is older than the
    /// timeout.
    pub fn flush_due(&self, batch_size: usize, timeout: Duration) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.pending.len() >= batch_size {
            return true;
        }
        match inner.pending.front() {
            Some((_, enqueued_at)) => enqueued_at.elapsed() >= timeout,
            None => false,
        }
    }

    pub fn take_batch(&self, max: usize) -> Vec<PendingFill> {
        let mut inner = self.inner.lock().unwrap();
        let take = inner.pending.len().min(max);
        inner
            .pending
            .drain(..take)
            .map(|(pending, _)| pending)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::trade::FillId;

    fn pending(id: u64) -> PendingFill {
        PendingFill {
            fill: Fill {
                id: FillId(id),
                ..Default::default()
            },
            taker: Default::default(),
            maker: Default::default(),
        }
    }

    #[test]
    fn takes_in_fifo_order() {
        let queue = SettlementQueue::new();
        for id in 1..=3 {
            queue.enqueue(pending(id));
        }
        let batch = queue.take_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].fill.id, FillId(1));
        assert_eq!(batch[1].fill.id, FillId(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn prepend_preserves_order() {
        let queue = SettlementQueue::new();
        queue.enqueue(pending(3));
        queue.prepend(vec![pending(1), pending(2)]);
        let batch = queue.take_batch(10);
        let ids: Vec<u64> = batch.iter().map(|pending| pending.fill.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn flush_due_on_batch_size() {
        let queue = SettlementQueue::new();
        queue.enqueue(pending(1));
        assert!(!queue.flush_due(2, Duration::from_secs(60)));
        queue.enqueue(pending(2));
        assert!(queue.flush_due(2, Duration::from_secs(60)));
    }

    #[test]
    fn flush_due_on_age() {
        let queue = SettlementQueue::new();
        assert!(!queue.flush_due(10, Duration::from_secs(0)));
        queue.enqueue(pending(1));
        assert!(queue.flush_due(10, Duration::from_secs(0)));
    }
}

//! In-memory broker.
//!
//! Queues live in RAM and are lost when the process exits. Useful for tests
//! and single-process runs without a database.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::broker::{Broker, Delivery, Queue};
use crate::error::BusError;

#[derive(Default)]
struct QueueState {
    next_tag: u64,
    ready: VecDeque<(u64, Vec<u8>)>,
    unacked: BTreeMap<u64, Vec<u8>>,
    rejected: BTreeMap<u64, Vec<u8>>,
}

/// One in-memory queue.
pub struct MemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    failing_publishes: AtomicU32,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            failing_publishes: AtomicU32::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` publish calls fail, simulating a broker outage.
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Bodies waiting to be consumed, oldest first.
    pub fn ready_bodies(&self) -> Vec<Vec<u8>> {
        self.state().ready.iter().map(|(_, b)| b.clone()).collect()
    }

    /// Dead-lettered bodies, oldest first.
    pub fn rejected_bodies(&self) -> Vec<Vec<u8>> {
        self.state().rejected.values().cloned().collect()
    }

    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, bodies: &[Vec<u8>]) -> Result<(), BusError> {
        let failing = self.failing_publishes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_publishes.store(failing - 1, Ordering::SeqCst);
            return Err(BusError::Publish {
                queue: self.name.clone(),
                reason: "broker unavailable".into(),
            });
        }

        let mut state = self.state();
        for body in bodies {
            state.next_tag += 1;
            let tag = state.next_tag;
            state.ready.push_back((tag, body.clone()));
        }
        Ok(())
    }

    async fn consume(&self, max: usize) -> Result<Vec<Delivery>, BusError> {
        let mut state = self.state();
        let n = max.min(state.ready.len());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some((tag, body)) = state.ready.pop_front() {
                state.unacked.insert(tag, body.clone());
                out.push(Delivery { tag, body });
            }
        }
        Ok(out)
    }

    async fn ack(&self, tags: &[u64]) -> Result<(), BusError> {
        let mut state = self.state();
        for tag in tags {
            state.unacked.remove(tag);
        }
        Ok(())
    }

    async fn reject(&self, tags: &[u64]) -> Result<(), BusError> {
        let mut state = self.state();
        for tag in tags {
            if let Some(body) = state.unacked.remove(tag) {
                state.rejected.insert(*tag, body);
            }
        }
        Ok(())
    }

    async fn return_unacked(&self) -> Result<u64, BusError> {
        let mut state = self.state();
        let returned = std::mem::take(&mut state.unacked);
        let n = returned.len() as u64;
        // Returned deliveries go ahead of everything still ready, in tag order
        for (tag, body) in returned.into_iter().rev() {
            state.ready.push_front((tag, body));
        }
        Ok(n)
    }

    async fn purge_rejected(&self) -> Result<u64, BusError> {
        let mut state = self.state();
        let n = state.rejected.len() as u64;
        state.rejected.clear();
        Ok(n)
    }

    async fn ready_count(&self) -> Result<u64, BusError> {
        Ok(self.state().ready.len() as u64)
    }
}

/// In-memory broker. Opening the same name twice returns the same queue.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed handle to a queue, for inspection in tests.
    pub fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new(name)))
            .clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_queue(&self, name: &str) -> Result<Arc<dyn Queue>, BusError> {
        Ok(self.queue(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bodies(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn consume_is_fifo_and_tracks_unacked() {
        let q = MemoryQueue::new("ranges");
        q.publish(&bodies(&["a", "b", "c"])).await.unwrap();

        let first = q.consume(2).await.unwrap();
        assert_eq!(first.iter().map(|d| d.body.clone()).collect::<Vec<_>>(), bodies(&["a", "b"]));
        assert_eq!(q.unacked_count(), 2);
        assert_eq!(q.ready_count().await.unwrap(), 1);

        q.ack(&[first[0].tag]).await.unwrap();
        assert_eq!(q.unacked_count(), 1);
    }

    #[tokio::test]
    async fn unacked_deliveries_return_to_the_front() {
        let q = MemoryQueue::new("ops");
        q.publish(&bodies(&["a", "b", "c"])).await.unwrap();
        q.consume(2).await.unwrap();

        assert_eq!(q.return_unacked().await.unwrap(), 2);
        assert_eq!(q.ready_bodies(), bodies(&["a", "b", "c"]));
    }

    #[tokio::test]
    async fn rejected_deliveries_are_dead_lettered_until_purged() {
        let q = MemoryQueue::new("ops");
        q.publish(&bodies(&["poison"])).await.unwrap();
        let d = q.consume(10).await.unwrap();
        q.reject(&[d[0].tag]).await.unwrap();

        assert_eq!(q.rejected_bodies(), bodies(&["poison"]));
        assert_eq!(q.purge_rejected().await.unwrap(), 1);
        assert!(q.rejected_bodies().is_empty());
    }

    #[tokio::test]
    async fn broker_shares_queues_by_name() {
        let broker = MemoryBroker::new();
        let a = broker.open_queue("withdrawals").await.unwrap();
        a.publish(&bodies(&["x"])).await.unwrap();
        let b = broker.open_queue("withdrawals").await.unwrap();
        assert_eq!(b.ready_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn poisoned_queue_keeps_serving() {
        let q = Arc::new(MemoryQueue::new("withdrawals"));
        q.publish(&bodies(&["x"])).await.unwrap();
        let poisoner = q.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.state();
            panic!("handler crashed while holding the queue");
        })
        .join();
        assert!(joined.is_err());

        assert_eq!(q.ready_bodies(), bodies(&["x"]));
        assert_eq!(q.consume(1).await.unwrap().len(), 1);
    }
}

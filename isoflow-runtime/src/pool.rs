//! Shared background pool that runs flow pipelines.

use isoflow_core::Priority;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Spawns flow pipelines onto a tokio runtime, optionally bounded by a
/// [`PriorityGate`].
#[derive(Clone)]
pub struct BackgroundPool {
    handle: Handle,
    gate: Option<Arc<PriorityGate>>,
}

impl BackgroundPool {
    pub fn new(handle: Handle, max_concurrent: Option<usize>) -> Self {
        Self {
            handle,
            gate: max_concurrent.map(|limit| Arc::new(PriorityGate::new(limit))),
        }
    }

    /// Pool on the runtime the caller is running in.
    pub fn current(max_concurrent: Option<usize>) -> anyhow::Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| anyhow::anyhow!("no tokio runtime for the background pool: {e}"))?;
        Ok(Self::new(handle, max_concurrent))
    }

    pub fn spawn<F>(&self, priority: Priority, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let gate = self.gate.clone();
        self.handle.spawn(async move {
            let _permit = match gate {
                Some(gate) => Some(gate.acquire(priority).await),
                None => None,
            };
            fut.await
        })
    }

    pub fn gate(&self) -> Option<&Arc<PriorityGate>> {
        self.gate.as_ref()
    }
}

impl std::fmt::Debug for BackgroundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPool")
            .field("gate", &self.gate)
            .finish()
    }
}

struct Waiter {
    priority: Priority,
    seq: u64,
    sender: oneshot::Sender<GatePermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

/// Admission control: at most `limit` flows run at once, and queued flows
/// are admitted by priority, ties broken by submission order.
///
/// Slots are semaphore permits; the heap only decides who receives the next
/// one.
pub struct PriorityGate {
    limit: usize,
    slots: Arc<Semaphore>,
    queue: Mutex<Queue>,
}

impl PriorityGate {
    /// A limit of zero would never admit anything and is raised to one.
    pub fn new(limit: usize) -> Self {
        if limit == 0 {
            tracing::warn!("priority gate limit of 0 raised to 1");
        }
        let limit = limit.max(1);
        Self {
            limit,
            slots: Arc::new(Semaphore::new(limit)),
            queue: Mutex::new(Queue::default()),
        }
    }

    pub async fn acquire(self: &Arc<Self>, priority: Priority) -> GatePermit {
        let receiver = {
            let mut queue = self.lock();
            queue.waiters.retain(|w| !w.sender.is_closed());
            if queue.waiters.is_empty() {
                if let Ok(permit) = self.slots.clone().try_acquire_owned() {
                    return GatePermit::new(permit, self.clone());
                }
            }
            let (sender, receiver) = oneshot::channel();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.waiters.push(Waiter {
                priority,
                seq,
                sender,
            });
            receiver
        };

        match receiver.await {
            Ok(permit) => permit,
            // the gate never drops a waiter's sender without sending
            Err(_) => GatePermit {
                permit: None,
                gate: None,
            },
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Queued flows still waiting for a slot.
    pub fn waiting(&self) -> usize {
        let mut queue = self.lock();
        queue.waiters.retain(|w| !w.sender.is_closed());
        queue.waiters.len()
    }

    /// Hand free permits to the highest-priority waiters.
    fn admit(self: &Arc<Self>) {
        let mut queue = self.lock();
        while !queue.waiters.is_empty() {
            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                return;
            };
            let Some(waiter) = queue.waiters.pop() else {
                return;
            };
            if let Err(mut unclaimed) = waiter.sender.send(GatePermit::new(permit, self.clone())) {
                // waiter gave up; its permit goes straight back to the semaphore
                unclaimed.gate = None;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for PriorityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityGate")
            .field("limit", &self.limit)
            .field("available", &self.available())
            .field("waiting", &self.waiting())
            .finish()
    }
}

/// Slot held by a running flow; dropping it admits the next waiter.
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    gate: Option<Arc<PriorityGate>>,
}

impl GatePermit {
    fn new(permit: OwnedSemaphorePermit, gate: Arc<PriorityGate>) -> Self {
        Self {
            permit: Some(permit),
            gate: Some(gate),
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        // return the slot before looking for the next waiter
        drop(self.permit.take());
        if let Some(gate) = self.gate.take() {
            gate.admit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_waiters(gate: &PriorityGate, count: usize) {
        for _ in 0..100 {
            if gate.waiting() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {count} waiters, found {}", gate.waiting());
    }

    #[tokio::test]
    async fn test_gate_admits_by_priority() {
        let gate = Arc::new(PriorityGate::new(1));
        let held = gate.acquire(Priority::Normal).await;
        assert_eq!(gate.available(), 0);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for (name, priority) in [
            ("low", Priority::Low),
            ("normal", Priority::Normal),
            ("high", Priority::High),
        ] {
            let task_gate = gate.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = task_gate.acquire(priority).await;
                order.lock().unwrap().push(name);
            }));
            wait_for_waiters(&gate, tasks.len()).await;
        }

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_equal_priority_is_fifo() {
        let gate = Arc::new(PriorityGate::new(1));
        let held = gate.acquire(Priority::High).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for id in 0..3 {
            let task_gate = gate.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = task_gate.acquire(Priority::Normal).await;
                order.lock().unwrap().push(id);
            }));
            wait_for_waiters(&gate, id + 1).await;
        }

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_leak_slot() {
        let gate = Arc::new(PriorityGate::new(1));
        let held = gate.acquire(Priority::Normal).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire(Priority::High).await;
            })
        };
        wait_for_waiters(&gate, 1).await;
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(gate.waiting(), 0);

        drop(held);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_zero_limit_still_admits() {
        let pool = BackgroundPool::current(Some(0)).unwrap();
        let gate = pool.gate().unwrap();
        assert_eq!(gate.limit(), 1);

        let first = pool.spawn(Priority::Normal, async { 1 });
        let second = pool.spawn(Priority::Normal, async { 2 });
        assert_eq!(first.await.unwrap() + second.await.unwrap(), 3);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_released_permit_goes_to_waiter_before_newcomer() {
        let gate = Arc::new(PriorityGate::new(1));
        let held = gate.acquire(Priority::Low).await;

        let queued = {
            let task_gate = gate.clone();
            tokio::spawn(async move { task_gate.acquire(Priority::Low).await })
        };
        wait_for_waiters(&gate, 1).await;
        drop(held);

        let permit = queued.await.unwrap();
        assert_eq!(gate.available(), 0);
        drop(permit);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_pool_spawns_directly() {
        let pool = BackgroundPool::current(None).unwrap();
        assert!(pool.gate().is_none());
        let value = pool.spawn(Priority::Low, async { 5 }).await.unwrap();
        assert_eq!(value, 5);
    }
}

//! In-process fan-out of job progress events.
//!
//! Every subscriber owns a bounded queue. `publish` never waits: a subscriber
//! whose queue is full or whose receiver is gone is dropped on the spot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::models::event::ProgressEvent;

const DEFAULT_CAPACITY: usize = 256;

pub type SubscriptionId = u64;

struct Subscriber {
    job_id: Option<Uuid>,
    tx: mpsc::Sender<ProgressEvent>,
}

/// A live subscription. Events arrive in publish order.
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<ProgressEvent>,
}

#[derive(Clone)]
pub struct ProgressBroadcaster {
    subscribers: Arc<RwLock<HashMap<SubscriptionId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to one job's events, or to all jobs with `None`.
    pub async fn subscribe(&self, job_id: Option<Uuid>) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.insert(id, Subscriber { job_id, tx });
        Subscription { id, receiver }
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().await.remove(&id).is_some()
    }

    pub async fn publish(&self, event: ProgressEvent) {
        let job_id = event.job_id();
        let mut dead = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                if subscriber.job_id.is_some_and(|wanted| wanted != job_id) {
                    continue;
                }
                if let Err(e) = subscriber.tx.try_send(event.clone()) {
                    debug!(subscription = id, error = %e, "Dropping progress subscriber");
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

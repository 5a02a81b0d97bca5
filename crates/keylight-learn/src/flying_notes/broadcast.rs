//! Subscriber hub for serialized display messages
//!
//! Each subscriber gets a small bounded queue. Delivery uses `try_send`, so a
//! slow client misses frames instead of stalling the frame loop; a client
//! whose receiver was dropped is removed on the next broadcast.

use flume::{Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Frames buffered per subscriber before frames are skipped
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 16;

pub type SubscriberId = u64;

#[derive(Debug, Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, Sender<String>>>,
}

/// Cloneable handle; clones share the subscriber set
#[derive(Debug, Clone, Default)]
pub struct SubscriberHub {
    inner: Arc<HubInner>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return its message queue
    pub fn add_subscriber(&self) -> (SubscriberId, Receiver<String>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        match self.inner.subscribers.write() {
            Ok(mut subscribers) => {
                subscribers.insert(id, tx);
                log::info!("[FlyingNotes] Subscriber {} added ({} total)", id, subscribers.len());
            }
            Err(_) => log::error!("[FlyingNotes] Subscriber table poisoned, {} not added", id),
        }
        (id, rx)
    }

    /// Returns false if `id` was not subscribed
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let removed = self
            .inner
            .subscribers
            .write()
            .map(|mut subscribers| subscribers.remove(&id).is_some())
            .unwrap_or(false);
        if removed {
            log::info!("[FlyingNotes] Subscriber {} removed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Send `message` to every subscriber; returns how many accepted it
    pub fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        let mut disconnected = Vec::new();

        if let Ok(subscribers) = self.inner.subscribers.read() {
            for (id, tx) in subscribers.iter() {
                match tx.try_send(message.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        log::warn!("[FlyingNotes] Subscriber {} is lagging, frame skipped", id);
                    }
                    Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
                }
            }
        }

        if !disconnected.is_empty() {
            if let Ok(mut subscribers) = self.inner.subscribers.write() {
                for id in disconnected {
                    subscribers.remove(&id);
                    log::info!("[FlyingNotes] Subscriber {} disconnected", id);
                }
            }
        }
        delivered
    }
}

// src/services/sink.rs

//! Delivery of normalized listings.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Config, Listing};
use crate::services::{BackendClient, QueuePublisher, Submission};

/// Acknowledgment of a delivered listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// Id assigned (or matched) by the backend
    pub backend_id: Option<String>,
    /// The backend already held a near-identical listing
    pub duplicate: bool,
    pub published: bool,
}

/// Destination for normalized listings.
///
/// Errors are classified: `TransientDelivery` is retried, anything else
/// non-fatal is a permanent rejection.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, listing: &Listing) -> Result<Ack>;
}

/// Listings the backend accepted whose publish is still outstanding.
const MAX_PENDING_PUBLISH: usize = 10_000;

/// Backend acks waiting for the queue, oldest first.
#[derive(Debug, Default)]
struct PendingPublish {
    acks: HashMap<String, Ack>,
    order: VecDeque<String>,
}

impl PendingPublish {
    fn remember(&mut self, key: String, ack: Ack) {
        if self.acks.insert(key.clone(), ack).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > MAX_PENDING_PUBLISH {
            if let Some(oldest) = self.order.pop_front() {
                self.acks.remove(&oldest);
            }
        }
    }

    fn forget(&mut self, key: &str) {
        if self.acks.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// Delivers to the backend API and, when enabled, publishes to the queue.
///
/// Every enabled target has to acknowledge for the delivery to succeed. When
/// the backend accepted a listing but the queue failed transiently, the
/// backend ack is kept so the retry only publishes.
pub struct ApiSink {
    backend: Option<BackendClient>,
    queue: Option<QueuePublisher>,
    pending: Mutex<PendingPublish>,
}

impl ApiSink {
    pub fn new(backend: Option<BackendClient>, queue: Option<QueuePublisher>) -> Result<Self> {
        if backend.is_none() && queue.is_none() {
            return Err(AppError::config(
                "no delivery target enabled (backend and queue are both off)",
            ));
        }
        Ok(Self {
            backend,
            queue,
            pending: Mutex::new(PendingPublish::default()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = if config.backend.enabled {
            Some(BackendClient::new(&config.backend, &config.http)?)
        } else {
            None
        };
        let queue = if config.queue.enabled {
            Some(QueuePublisher::new(&config.queue, &config.http)?)
        } else {
            None
        };
        Self::new(backend, queue)
    }

    fn pending_ack(&self, key: &str) -> Option<Ack> {
        self.pending.lock().ok()?.acks.get(key).cloned()
    }

    fn remember(&self, key: &str, ack: &Ack) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remember(key.to_string(), ack.clone());
        }
    }

    fn forget(&self, key: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.forget(key);
        }
    }

    async fn submit(&self, backend: &BackendClient, listing: &Listing) -> Result<Ack> {
        let mut ack = Ack::default();
        match backend.submit(listing).await? {
            Submission::Created(id) => ack.backend_id = Some(id),
            Submission::Duplicate(id) => {
                ack.backend_id = id;
                ack.duplicate = true;
            }
        }
        Ok(ack)
    }
}

fn pending_key(listing: &Listing) -> String {
    format!("{}:{}", listing.source, listing.offer_id)
}

#[async_trait]
impl Sink for ApiSink {
    async fn deliver(&self, listing: &Listing) -> Result<Ack> {
        let key = pending_key(listing);

        let mut ack = match (&self.backend, self.pending_ack(&key)) {
            (_, Some(ack)) => {
                log::debug!("{} already on the backend, publishing only", listing.offer_id);
                ack
            }
            (Some(backend), None) => self.submit(backend, listing).await?,
            (None, None) => Ack::default(),
        };

        if let Some(queue) = &self.queue {
            match queue.publish(listing).await {
                Ok(()) => {
                    self.forget(&key);
                    ack.published = true;
                }
                Err(e) => {
                    if e.is_transient() && self.backend.is_some() {
                        self.remember(&key, &ack);
                    } else {
                        self.forget(&key);
                    }
                    return Err(e);
                }
            }
        }

        Ok(ack)
    }
}

//! Scripted collaborators for orchestrator tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{CandidateItem, Listing, Scope, Source};
use crate::pipeline::{Sleeper, StopSignal};
use crate::services::{Ack, DiscoveredPage, Extractor, Sink};

enum PageScript {
    Items(Vec<CandidateItem>),
    Error(Option<AppError>),
}

#[derive(Default, Clone)]
struct DetailScript {
    age_days: Option<i64>,
    transient_failures: u32,
    malformed: bool,
}

/// Extractor serving scripted listing pages and detail pages.
pub struct ScriptedExtractor {
    source: Source,
    pages: Mutex<Vec<PageScript>>,
    details: Mutex<HashMap<String, DetailScript>>,
    pages_requested: Mutex<Vec<u32>>,
    fetches: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            pages: Mutex::new(Vec::new()),
            details: Mutex::new(HashMap::new()),
            pages_requested: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Append a listing page with the given offer ids.
    pub fn with_page(self, ids: &[&str]) -> Self {
        {
            let mut pages = self.pages.lock().unwrap();
            let page = pages.len() as u32 + 1;
            pages.push(PageScript::Items(
                ids.iter()
                    .map(|id| CandidateItem::new(*id, format!("https://example.com/oferta/{id}"), page))
                    .collect(),
            ));
        }
        self
    }

    /// Append a listing page that fails once requested.
    pub fn with_page_error(self, error: AppError) -> Self {
        self.pages
            .lock()
            .unwrap()
            .push(PageScript::Error(Some(error)));
        self
    }

    /// The listing was last updated `days` ago.
    pub fn with_age(self, id: &str, days: i64) -> Self {
        self.details
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .age_days = Some(days);
        self
    }

    /// The first `n` detail fetches of `id` time out.
    pub fn with_fetch_failures(self, id: &str, n: u32) -> Self {
        self.details
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .transient_failures = n;
        self
    }

    /// The detail page of `id` has no usable data.
    pub fn with_malformed(self, id: &str) -> Self {
        self.details
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .malformed = true;
        self
    }

    pub fn pages_requested(&self) -> Vec<u32> {
        self.pages_requested.lock().unwrap().clone()
    }

    /// Detail fetch attempts in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetched_ids(&self) -> HashSet<String> {
        self.fetches().into_iter().collect()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn source(&self) -> Source {
        self.source
    }

    async fn discover_page(&self, _scope: &Scope, page: u32) -> Result<DiscoveredPage> {
        self.pages_requested.lock().unwrap().push(page);
        let mut pages = self.pages.lock().unwrap();
        let total = pages.len();

        match pages.get_mut(page as usize - 1) {
            Some(PageScript::Items(items)) => Ok(DiscoveredPage {
                items: items.clone(),
                has_more: (page as usize) < total,
            }),
            Some(PageScript::Error(error)) => Err(error
                .take()
                .unwrap_or_else(|| AppError::transient_fetch("page", "scripted failure"))),
            None => Ok(DiscoveredPage::default()),
        }
    }

    async fn fetch_detail(&self, item: &CandidateItem) -> Result<Listing> {
        self.fetches.lock().unwrap().push(item.id.clone());

        let script = {
            let mut details = self.details.lock().unwrap();
            let script = details.entry(item.id.clone()).or_default();
            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                return Err(AppError::transient_fetch(&item.url, "timed out"));
            }
            script.clone()
        };

        if script.malformed {
            return Err(AppError::parse(&item.url, "no structured listing data"));
        }

        let mut listing = Listing::new(self.source, &item.id, &item.url);
        listing.price_amount = Some(500_000.0);
        listing.price_currency = Some("PLN".into());
        listing.lat = Some(54.35);
        listing.lon = Some(18.65);
        if let Some(days) = script.age_days {
            listing.updated_at = Some(Utc::now() - chrono::Duration::days(days));
        }
        Ok(listing)
    }
}

/// Sink acknowledging everything except scripted failures.
#[derive(Default)]
pub struct ScriptedSink {
    delivered: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    transient: Mutex<HashMap<String, u32>>,
    rejected: HashSet<String>,
    stop_after: Option<(usize, StopSignal)>,
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` deliveries of `id` fail transiently.
    pub fn with_transient_failures(self, id: &str, n: u32) -> Self {
        self.transient.lock().unwrap().insert(id.to_string(), n);
        self
    }

    /// Every delivery of `id` is rejected.
    pub fn with_rejection(mut self, id: &str) -> Self {
        self.rejected.insert(id.to_string());
        self
    }

    /// Raise the stop signal once `n` listings were delivered.
    pub fn stop_after(mut self, n: usize, stop: StopSignal) -> Self {
        self.stop_after = Some((n, stop));
        self
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.attempts.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    async fn deliver(&self, listing: &Listing) -> Result<Ack> {
        let id = listing.offer_id.clone();
        *self.attempts.lock().unwrap().entry(id.clone()).or_insert(0) += 1;

        if self.rejected.contains(&id) {
            return Err(AppError::rejected(&id, "HTTP 422"));
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(left) = transient.get_mut(&id).filter(|left| **left > 0) {
                *left -= 1;
                return Err(AppError::transient_delivery(&id, "HTTP 503"));
            }
        }

        let count = {
            let mut delivered = self.delivered.lock().unwrap();
            delivered.push(id.clone());
            delivered.len()
        };
        if let Some((n, stop)) = &self.stop_after {
            if count >= *n {
                stop.stop();
            }
        }
        Ok(Ack {
            backend_id: Some(format!("db-{id}")),
            ..Ack::default()
        })
    }
}

/// Sleeper that records requested waits and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().unwrap().push(duration);
    }
}

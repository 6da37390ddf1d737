//! Service layer for the harvester.
//!
//! This module contains the collaborators the orchestrator drives:
//! - Listing discovery and detail extraction (`Extractor`, `SiteExtractor`)
//! - Backend ingestion API (`BackendClient`)
//! - Queue publishing through the tunnel (`QueuePublisher`)
//! - Delivery to both targets (`Sink`, `ApiSink`)

mod backend;
mod extractor;
mod queue;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::models::{CandidateItem, Listing, Scope, Source};

pub use backend::{BackendClient, Submission};
pub use extractor::{SiteExtractor, SiteProfile, parse_detail};
pub use queue::QueuePublisher;
pub use sink::{Ack, ApiSink, Sink};

/// One listing page of a scope.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredPage {
    pub items: Vec<CandidateItem>,
    /// Whether another page should be requested
    pub has_more: bool,
}

/// Per-source discovery and detail extraction.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch one listing page (1-based) of a scope.
    async fn discover_page(&self, scope: &Scope, page: u32) -> Result<DiscoveredPage>;

    /// Fetch and normalize one listing.
    async fn fetch_detail(&self, item: &CandidateItem) -> Result<Listing>;
}

/// Lazily paginate a scope.
///
/// Pages are requested only as the stream is consumed. Pagination ends when
/// the extractor reports no more pages, a page comes back empty, `max_pages`
/// is reached, or a page fails; the failure is yielded as the last element.
pub fn discover<'a>(
    extractor: &'a dyn Extractor,
    scope: &'a Scope,
    max_pages: Option<u32>,
) -> BoxStream<'a, Result<CandidateItem>> {
    stream::unfold(Some(1u32), move |next_page| async move {
        let page = next_page?;
        if max_pages.is_some_and(|max| page > max) {
            return None;
        }

        match extractor.discover_page(scope, page).await {
            Ok(found) => {
                log::info!("{} page {}: {} offers", scope, page, found.items.len());
                let next = (found.has_more && !found.items.is_empty()).then_some(page + 1);
                let items = stream::iter(found.items.into_iter().map(Ok));
                Some((items.left_stream(), next))
            }
            Err(e) => {
                log::warn!("{} page {} failed: {}", scope, page, e);
                Some((stream::iter(vec![Err(e)]).right_stream(), None))
            }
        }
    })
    .flatten()
    .boxed()
}

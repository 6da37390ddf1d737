//! Candidate references and normalized listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Source;

/// A listing reference found while paginating a scope, not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Stable per-source identifier; the checkpoint key
    pub id: String,
    /// Normalized offer URL
    pub url: String,
    /// Listing page the reference was found on
    pub page: u32,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>, url: impl Into<String>, page: u32) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            page,
        }
    }
}

/// A normalized listing ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub source: Source,
    pub offer_id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
    pub price_per_m2: Option<f64>,
    pub property_type: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub street: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub area_m2: Option<f64>,
    pub rooms: Option<u32>,
    pub floor: Option<i32>,
    #[serde(default)]
    pub description: String,
    /// Photo URLs in page order
    #[serde(default)]
    pub photos: Vec<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// When this process fetched the detail page
    pub fetched_at: DateTime<Utc>,
}

impl Listing {
    /// Empty listing for the given source and offer, filled in by extractors.
    pub fn new(source: Source, offer_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source,
            offer_id: offer_id.into(),
            url: url.into(),
            title: String::new(),
            price_amount: None,
            price_currency: None,
            price_per_m2: None,
            property_type: None,
            city: None,
            district: None,
            street: None,
            lat: None,
            lon: None,
            area_m2: None,
            rooms: None,
            floor: None,
            description: String::new(),
            photos: Vec::new(),
            posted_at: None,
            updated_at: None,
            fetched_at: Utc::now(),
        }
    }

    /// Timestamp the recency window is measured against.
    ///
    /// The portal's last modification wins over the posting date; a listing
    /// carrying neither is treated as observed at fetch time.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.updated_at.or(self.posted_at).unwrap_or(self.fetched_at)
    }

    /// Check schema constraints; violations are permanent parse failures.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| Err(AppError::parse(&self.url, message));

        if self.offer_id.chars().count() < 3 {
            return fail("offer_id shorter than 3 characters");
        }
        if url::Url::parse(&self.url).is_err() {
            return fail("url is not absolute");
        }
        if self.price_amount.is_some_and(|p| p < 0.0) {
            return fail("negative price");
        }
        if let Some(currency) = &self.price_currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                return fail("currency must be a 3-letter ISO code");
            }
        }
        if self.lat.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
            return fail("latitude out of range");
        }
        if self.lon.is_some_and(|lon| !(-180.0..=180.0).contains(&lon)) {
            return fail("longitude out of range");
        }
        if self.area_m2.is_some_and(|a| a < 0.0) {
            return fail("negative area");
        }
        if self.rooms.is_some_and(|r| r > 20) {
            return fail("more than 20 rooms");
        }
        if self.floor.is_some_and(|f| !(-2..=200).contains(&f)) {
            return fail("floor out of range");
        }
        Ok(())
    }
}

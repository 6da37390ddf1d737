// src/services/backend.rs

//! Backend ingestion API client.
//!
//! A listing goes through up to three calls: an optional near-duplicate
//! lookup, the create call, and one call per photo link.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{BackendConfig, HttpConfig, Listing};
use crate::utils::http::{StatusClass, classify_status};

/// Search radius of the duplicate lookup, in meters.
const DUPLICATE_RADIUS_M: u32 = 50;
/// Price tolerance of the duplicate lookup, in listing currency.
const DUPLICATE_PRICE_DELTA: f64 = 100.0;
/// Footage tolerance of the duplicate lookup, in square meters.
const DUPLICATE_FOOTAGE_DELTA: f64 = 1.0;
/// Longest description the backend accepts, in characters.
const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Created(String),
    /// A near-identical listing exists; nothing was created
    Duplicate(Option<String>),
}

#[derive(Debug, Serialize)]
struct GeoPoint {
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DuplicateQuery {
    center: GeoPoint,
    radius_m: u32,
    price_min: f64,
    price_max: f64,
    footage_min: f64,
    footage_max: f64,
    limit: u32,
}

/// Body of `POST /apartments`.
#[derive(Debug, Serialize)]
pub(crate) struct ApartmentPayload<'a> {
    source_website: &'a str,
    source_id: &'a str,
    source_url: &'a str,
    price: f64,
    currency: &'a str,
    room_num: u32,
    footage: Option<f64>,
    price_per_m2: Option<f64>,
    city: &'a str,
    geolocation: GeoPoint,
    description: String,
    photo_attractiveness: u8,
    student_attractiveness: u8,
    family_attractiveness: u8,
    single_attractiveness: u8,
    dog_owner_attractiveness: u8,
    universal_attractiveness: u8,
    poi_desc: Option<String>,
    price_desc: Option<String>,
    size_desc: Option<String>,
}

impl<'a> ApartmentPayload<'a> {
    /// Build the create payload; listings without a positive price are rejected.
    pub(crate) fn from_listing(listing: &'a Listing) -> Result<Self> {
        let price = listing
            .price_amount
            .filter(|p| *p > 0.0)
            .ok_or_else(|| AppError::rejected(&listing.offer_id, "missing or zero price"))?;

        Ok(Self {
            source_website: listing.source.as_str(),
            source_id: &listing.offer_id,
            source_url: &listing.url,
            price,
            currency: listing.price_currency.as_deref().unwrap_or("PLN"),
            room_num: listing.rooms.unwrap_or(1),
            footage: listing.area_m2,
            price_per_m2: listing.price_per_m2,
            city: listing.city.as_deref().unwrap_or("Nieznane"),
            geolocation: GeoPoint {
                lat: listing.lat,
                lng: listing.lon,
            },
            description: listing
                .description
                .chars()
                .take(MAX_DESCRIPTION_CHARS)
                .collect(),
            photo_attractiveness: 0,
            student_attractiveness: 0,
            family_attractiveness: 0,
            single_attractiveness: 0,
            dog_owner_attractiveness: 0,
            universal_attractiveness: 0,
            poi_desc: None,
            price_desc: None,
            size_desc: None,
        })
    }
}

#[derive(Debug, Serialize)]
struct PhotoPayload<'a> {
    apartment_id: &'a Value,
    link: &'a str,
    style: &'static str,
}

/// Client for the backend ingestion API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    api_url: String,
    check_duplicates: bool,
    upload_photos: bool,
    max_photos: Option<usize>,
}

impl BackendClient {
    pub fn new(config: &BackendConfig, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&http.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            check_duplicates: config.check_duplicates,
            upload_photos: config.upload_photos,
            max_photos: config.max_photos,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Create the listing unless the backend already holds a near-identical one.
    pub async fn submit(&self, listing: &Listing) -> Result<Submission> {
        let payload = ApartmentPayload::from_listing(listing)?;

        if self.check_duplicates {
            if let Some(existing) = self.find_duplicate(listing).await? {
                log::info!(
                    "{} matches existing listing {:?}, not creating",
                    listing.offer_id,
                    existing
                );
                return Ok(Submission::Duplicate(existing));
            }
        }

        let id = self.create(&listing.offer_id, &payload).await?;

        if self.upload_photos && !listing.photos.is_empty() {
            let limit = self.max_photos.unwrap_or(usize::MAX);
            let sent = self
                .send_photos(&id, listing.photos.iter().take(limit))
                .await;
            log::debug!("{}: sent {} photo links", listing.offer_id, sent);
        }

        Ok(Submission::Created(id_to_string(&id)))
    }

    /// Look for a listing within 50 m, ±100 price and ±1 m² footage.
    ///
    /// Returns `Ok(None)` without a request when coordinates, price or
    /// footage are missing. `Some(None)` means a match without a usable id.
    async fn find_duplicate(&self, listing: &Listing) -> Result<Option<Option<String>>> {
        let (Some(lat), Some(lon), Some(price), Some(footage)) =
            (listing.lat, listing.lon, listing.price_amount, listing.area_m2)
        else {
            return Ok(None);
        };

        let query = DuplicateQuery {
            center: GeoPoint {
                lat: Some(lat),
                lng: Some(lon),
            },
            radius_m: DUPLICATE_RADIUS_M,
            price_min: price - DUPLICATE_PRICE_DELTA,
            price_max: price + DUPLICATE_PRICE_DELTA,
            footage_min: footage - DUPLICATE_FOOTAGE_DELTA,
            footage_max: footage + DUPLICATE_FOOTAGE_DELTA,
            limit: 1,
        };

        let context = format!("duplicate check for {}", listing.offer_id);
        let response = self
            .client
            .post(self.endpoint("/apartments/duplicates/check"))
            .json(&query)
            .send()
            .await
            .map_err(|e| AppError::transient_delivery(&context, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(delivery_error(&context, status, &response.text().await.unwrap_or_default()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::transient_delivery(&context, e))?;
        Ok(parse_duplicate_matches(&body))
    }

    async fn create(&self, offer_id: &str, payload: &ApartmentPayload<'_>) -> Result<Value> {
        let context = format!("create {offer_id}");
        let response = self
            .client
            .post(self.endpoint("/apartments"))
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::transient_delivery(&context, e))?;

        let status = response.status();
        if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            let body = response.text().await.unwrap_or_default();
            return Err(delivery_error(&context, status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::transient_delivery(&context, e))?;
        body.get("id")
            .filter(|id| !id.is_null())
            .cloned()
            .ok_or_else(|| AppError::rejected(&context, "response carries no id"))
    }

    /// Send photo links one by one; failures are logged and skipped.
    async fn send_photos<'p>(
        &self,
        apartment_id: &Value,
        photos: impl Iterator<Item = &'p String>,
    ) -> usize {
        let mut sent = 0;
        for link in photos {
            let payload = PhotoPayload {
                apartment_id,
                link,
                style: "other",
            };
            match self
                .client
                .post(self.endpoint("/photos"))
                .json(&payload)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => sent += 1,
                Ok(response) => {
                    log::warn!("Photo link rejected ({}): {}", response.status(), link)
                }
                Err(e) => log::warn!("Photo link failed: {}: {}", link, e),
            }
        }
        sent
    }
}

/// Map a non-success backend response to the delivery taxonomy.
fn delivery_error(context: &str, status: StatusCode, body: &str) -> AppError {
    let message = format!("HTTP {}: {}", status, truncate(body, 300));
    match classify_status(status) {
        StatusClass::Transient => AppError::transient_delivery(context, message),
        StatusClass::Success | StatusClass::Permanent => AppError::rejected(context, message),
    }
}

/// Accepts `{"matches": [...]}`, `{"has_matches": bool}` or a bare array.
fn parse_duplicate_matches(body: &Value) -> Option<Option<String>> {
    let first_id = |matches: &Vec<Value>| matches.first().map(|m| m.get("id").map(id_to_string));

    match body {
        Value::Array(matches) => first_id(matches),
        Value::Object(map) => {
            if let Some(Value::Array(matches)) = map.get("matches") {
                if let Some(found) = first_id(matches) {
                    return Some(found);
                }
            }
            map.get("has_matches")
                .and_then(Value::as_bool)
                .filter(|has| *has)
                .map(|_| None)
        }
        _ => None,
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// src/services/extractor.rs

//! Generic portal extractor.
//!
//! Every supported portal is described by a [`SiteProfile`]: how to build a
//! listing-page URL, which links are offers and where the offer id sits in
//! the URL. Detail pages are read from their `application/ld+json` blocks,
//! with the Next.js page state as a second source where the portal has one.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{COUNTRY_KEY, CandidateItem, Listing, Scope, ScopeKind, Source};
use crate::services::{DiscoveredPage, Extractor};
use crate::utils::http::HttpFetcher;
use crate::utils::normalize_url;

/// Optional scheme and host in front of an offer path found in raw HTML.
const ABSOLUTE_PREFIX: &str = r#"(?:https?://[^/\s"'<>]+)?"#;

/// URL and link conventions of one portal.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    source: Source,
    base: Url,
    offer_link: Regex,
    offer_id: Regex,
}

impl SiteProfile {
    pub fn for_source(source: Source) -> Result<Self> {
        let (base, link, id) = match source {
            Source::Otodom => (
                "https://www.otodom.pl",
                r#"/pl/oferta/[^\s"'#?<>]+"#,
                r"(?:-ID|[?&]unique_id=)([A-Za-z0-9]{4,})",
            ),
            Source::Morizon => (
                "https://www.morizon.pl",
                r#"/oferta/[^\s"'#?<>]*mzn\d+"#,
                r"(mzn\d{6,})",
            ),
            Source::Gratka => (
                "https://gratka.pl",
                r#"(?:/[^\s"'#?<>/]+)*/ob/\d+"#,
                r"/ob/(\d+)",
            ),
            Source::Trojmiasto => (
                "https://ogloszenia.trojmiasto.pl",
                r#"/nieruchomosci-[^\s"'#?<>]*ogl\d+[^\s"'#?<>]*"#,
                r"(ogl\d{6,})",
            ),
        };

        Ok(Self {
            source,
            base: Url::parse(base)?,
            offer_link: compile(&format!("{ABSOLUTE_PREFIX}{link}"))?,
            offer_id: compile(id)?,
        })
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Offer id embedded in an offer URL.
    pub fn offer_id(&self, url: &str) -> Option<String> {
        self.offer_id
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// URL of one listing page of a scope.
    pub fn listing_url(&self, scope: &Scope, deal: &str, kind: &str, page: u32) -> Result<String> {
        let base = self.base.as_str().trim_end_matches('/');
        let location = match scope.kind {
            ScopeKind::Country => None,
            ScopeKind::Region | ScopeKind::City => Some(scope.key.as_str()),
        };

        let url = match self.source {
            Source::Otodom => format!(
                "{base}/pl/oferty/{}/{}/{}?page={page}",
                if is_rent(deal) { "wynajem" } else { "sprzedaz" },
                singular_kind(kind),
                location.unwrap_or(COUNTRY_KEY)
            ),
            Source::Morizon => {
                let mut path = String::new();
                if is_rent(deal) {
                    path.push_str("do-wynajecia/");
                }
                path.push_str(plural_kind(kind));
                if let Some(location) = location {
                    path.push('/');
                    path.push_str(location);
                }
                format!("{base}/{path}/?page={page}")
            }
            Source::Gratka => format!(
                "{base}/nieruchomosci/{}/{}?page={page}",
                plural_kind(kind),
                scope.key
            ),
            Source::Trojmiasto => {
                let kind_label = match singular_kind(kind) {
                    "dom" => "Dom",
                    "dzialka" => "Działka",
                    "lokal" => "Lokal",
                    _ => "Mieszkanie",
                };
                let deal_label = if is_rent(deal) { "wynajem" } else { "sprzedaż" };

                let mut url = self.base.clone();
                url.path_segments_mut()
                    .map_err(|_| AppError::config("trojmiasto base URL cannot be a base"))?
                    .clear()
                    .push("nieruchomosci")
                    .push(&format!("s,{kind_label} na {deal_label}.html"));
                if page > 1 {
                    url.set_query(Some(&format!("strona={page}")));
                }
                url.to_string()
            }
        };
        Ok(url)
    }

    /// Offer references on a listing page, deduplicated by offer id.
    pub fn extract_offers(&self, html: &str, page: u32) -> Vec<CandidateItem> {
        let document = Html::parse_document(html);
        let mut hrefs: Vec<String> = Vec::new();

        if let Ok(anchor) = Selector::parse("a[href]") {
            hrefs.extend(
                document
                    .select(&anchor)
                    .filter_map(|a| a.value().attr("href"))
                    .filter(|href| self.offer_link.is_match(href))
                    .map(str::to_string),
            );
        }
        // Links rendered by scripts only show up in the raw markup.
        hrefs.extend(
            self.offer_link
                .find_iter(html)
                .map(|m| m.as_str().to_string()),
        );

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for href in hrefs {
            let Ok(absolute) = self.base.join(&href) else {
                continue;
            };
            let url = normalize_url(absolute.as_str());
            let Some(id) = self.offer_id(&url) else {
                continue;
            };
            if seen.insert(id.clone()) {
                items.push(CandidateItem::new(id, url, page));
            }
        }
        items
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::config(format!("invalid pattern {pattern}: {e}")))
}

fn is_rent(deal: &str) -> bool {
    deal.to_lowercase().contains("naj")
}

fn singular_kind(kind: &str) -> &'static str {
    let kind = kind.to_lowercase();
    if kind.starts_with("dom") {
        "dom"
    } else if kind.starts_with("dzia") {
        "dzialka"
    } else if kind.starts_with("lokal") {
        "lokal"
    } else {
        "mieszkanie"
    }
}

fn plural_kind(kind: &str) -> &'static str {
    match singular_kind(kind) {
        "dom" => "domy",
        "dzialka" => "dzialki",
        "lokal" => "lokale",
        _ => "mieszkania",
    }
}

/// Live extractor for one portal.
pub struct SiteExtractor {
    profile: SiteProfile,
    fetcher: Arc<HttpFetcher>,
    deal: String,
    kind: String,
}

impl SiteExtractor {
    pub fn new(source: Source, fetcher: Arc<HttpFetcher>, deal: &str, kind: &str) -> Result<Self> {
        Ok(Self {
            profile: SiteProfile::for_source(source)?,
            fetcher,
            deal: deal.to_string(),
            kind: kind.to_string(),
        })
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }
}

#[async_trait]
impl Extractor for SiteExtractor {
    fn source(&self) -> Source {
        self.profile.source
    }

    async fn discover_page(&self, scope: &Scope, page: u32) -> Result<DiscoveredPage> {
        let url = self
            .profile
            .listing_url(scope, &self.deal, &self.kind, page)?;
        let html = self.fetcher.get_text(&url).await?;
        let items = self.profile.extract_offers(&html, page);

        Ok(DiscoveredPage {
            has_more: !items.is_empty(),
            items,
        })
    }

    async fn fetch_detail(&self, item: &CandidateItem) -> Result<Listing> {
        let html = self.fetcher.get_text(&item.url).await?;
        parse_detail(self.profile.source, item, &html)
    }
}

/// Parse a detail page into a listing.
///
/// Fails with a permanent parse error when the page carries no structured
/// listing data at all.
pub fn parse_detail(source: Source, item: &CandidateItem, html: &str) -> Result<Listing> {
    let document = Html::parse_document(html);
    let mut listing = Listing::new(source, &item.id, &item.url);

    let mut found = false;
    for object in ld_json_objects(&document) {
        found |= apply_ld_object(&mut listing, &object);
    }
    if let Some(ad) = next_data_ad(&document) {
        found |= apply_next_data(&mut listing, &ad);
    }
    if !found {
        return Err(AppError::parse(&item.url, "no structured listing data"));
    }

    if listing.title.is_empty() {
        listing.title = fallback_title(&document).unwrap_or_default();
    }
    if listing.price_amount.is_some() && listing.price_currency.is_none() {
        listing.price_currency = Some("PLN".to_string());
    }

    let mut seen = HashSet::new();
    listing.photos.retain(|p| seen.insert(p.clone()));

    Ok(listing)
}

/// Every JSON object found in ld+json blocks, with arrays and `@graph` flattened.
fn ld_json_objects(document: &Html) -> Vec<Value> {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut pending: Vec<Value> = document
        .select(&selector)
        .filter_map(|script| serde_json::from_str(&script.text().collect::<String>()).ok())
        .collect();

    let mut objects = Vec::new();
    while let Some(value) = pending.pop() {
        match value {
            Value::Array(items) => pending.extend(items.into_iter().rev()),
            Value::Object(mut map) => {
                if let Some(graph) = map.remove("@graph") {
                    pending.push(graph);
                }
                objects.push(Value::Object(map));
            }
            _ => {}
        }
    }
    objects
}

/// Fill listing fields from one ld+json object. Returns whether it contributed.
fn apply_ld_object(listing: &mut Listing, object: &Value) -> bool {
    let kind = object.get("@type").map(type_name).unwrap_or_default();
    if matches!(
        kind.as_str(),
        "BreadcrumbList" | "Organization" | "WebSite" | "WebPage" | "SearchAction"
    ) {
        return false;
    }

    let mut used = false;
    let mut set_f64 = |slot: &mut Option<f64>, value: Option<f64>| {
        if slot.is_none() && value.is_some() {
            *slot = value;
            used = true;
        }
    };

    if let Some(offers) = object.get("offers").map(first) {
        let spec = offers.get("priceSpecification");
        set_f64(
            &mut listing.price_amount,
            offers
                .get("price")
                .or_else(|| spec.and_then(|s| s.get("price")))
                .and_then(number),
        );
        if listing.price_currency.is_none() {
            listing.price_currency = offers
                .get("priceCurrency")
                .or_else(|| spec.and_then(|s| s.get("priceCurrency")))
                .and_then(Value::as_str)
                .map(str::to_uppercase);
        }
    }
    set_f64(&mut listing.price_amount, object.get("price").and_then(number));
    if listing.price_currency.is_none() {
        listing.price_currency = object
            .get("priceCurrency")
            .and_then(Value::as_str)
            .map(str::to_uppercase);
    }

    if let Some(geo) = object.get("geo") {
        set_f64(&mut listing.lat, geo.get("latitude").and_then(number));
        set_f64(&mut listing.lon, geo.get("longitude").and_then(number));
    }
    if let Some(area) = object.get("floorSize").or_else(|| object.get("area")) {
        let value = area.get("value").unwrap_or(area);
        set_f64(&mut listing.area_m2, number(value));
    }

    if listing.rooms.is_none() {
        listing.rooms = object
            .get("numberOfRooms")
            .map(first)
            .and_then(number)
            .map(|r| r as u32);
        used |= listing.rooms.is_some();
    }
    if listing.floor.is_none() {
        listing.floor = object
            .get("floorLevel")
            .map(first)
            .and_then(number)
            .map(|f| f as i32);
    }
    if listing.property_type.is_none() {
        listing.property_type = object
            .get("category")
            .and_then(Value::as_str)
            .map(str::to_lowercase);
    }

    if listing.title.is_empty() {
        if let Some(name) = object.get("name").and_then(Value::as_str) {
            listing.title = name.trim().to_string();
            used = true;
        }
    }
    if listing.description.is_empty() {
        if let Some(description) = object.get("description").and_then(Value::as_str) {
            listing.description = description.trim().to_string();
        }
    }

    if let Some(address) = object.get("address").filter(|a| a.is_object()) {
        if listing.city.is_none() {
            listing.city = address
                .get("addressLocality")
                .or_else(|| address.get("addressRegion"))
                .and_then(Value::as_str)
                .map(str::to_string);
            used |= listing.city.is_some();
        }
        if listing.street.is_none() {
            listing.street = address
                .get("streetAddress")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }

    if listing.posted_at.is_none() {
        listing.posted_at = object
            .get("datePosted")
            .or_else(|| object.get("datePublished"))
            .and_then(Value::as_str)
            .and_then(parse_date);
    }
    if listing.updated_at.is_none() {
        listing.updated_at = object
            .get("dateModified")
            .and_then(Value::as_str)
            .and_then(parse_date);
    }

    if let Some(images) = object.get("image").or_else(|| object.get("photos")) {
        listing.photos.extend(image_urls(images));
    }

    used
}

/// `props.pageProps.ad` (or `.classified`) from the Next.js page state.
fn next_data_ad(document: &Html) -> Option<Value> {
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = document.select(&selector).next()?;
    let state: Value = serde_json::from_str(&script.text().collect::<String>()).ok()?;
    let page_props = state.get("props")?.get("pageProps")?;
    page_props
        .get("ad")
        .or_else(|| page_props.get("classified"))
        .filter(|ad| ad.is_object())
        .cloned()
}

/// Fill gaps from the Next.js ad object. Returns whether it contributed.
fn apply_next_data(listing: &mut Listing, ad: &Value) -> bool {
    let mut used = false;
    let text = |key: &str| ad.get(key).and_then(Value::as_str).map(str::to_string);

    if listing.title.is_empty() {
        if let Some(title) = text("title").or_else(|| text("name")) {
            listing.title = title;
            used = true;
        }
    }
    if listing.description.is_empty() {
        listing.description = text("description").unwrap_or_default();
    }

    if listing.price_amount.is_none() {
        let price = ad
            .get("topInformation")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|info| info.get("label").and_then(Value::as_str) == Some("price"))
            .and_then(|info| info.get("values"))
            .map(first)
            .and_then(number);
        if price.is_some() {
            listing.price_amount = price;
            used = true;
        }
    }

    let location = ad.get("location");
    let address = location.and_then(|l| l.get("address"));
    let named = |key: &str| {
        address
            .and_then(|a| a.get(key))
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    if listing.city.is_none() {
        listing.city = named("city");
        used |= listing.city.is_some();
    }
    if listing.district.is_none() {
        listing.district = named("district");
    }
    if listing.street.is_none() {
        listing.street = named("street");
    }

    if let Some(coordinates) = location.and_then(|l| l.get("coordinates")) {
        if listing.lat.is_none() {
            listing.lat = coordinates.get("latitude").and_then(number);
        }
        if listing.lon.is_none() {
            listing.lon = coordinates.get("longitude").and_then(number);
        }
    }

    if listing.area_m2.is_none() {
        listing.area_m2 = ["area", "usableArea", "totalArea"]
            .iter()
            .find_map(|key| ad.get(*key).and_then(number));
    }
    if listing.rooms.is_none() {
        listing.rooms = ["rooms", "roomsNumber", "numberOfRooms"]
            .iter()
            .find_map(|key| ad.get(*key).and_then(number))
            .map(|r| r as u32);
    }
    if listing.floor.is_none() {
        listing.floor = ad.get("floor").and_then(number).map(|f| f as i32);
    }
    if listing.property_type.is_none() {
        listing.property_type = text("estateType").map(|t| t.to_lowercase());
    }

    if listing.posted_at.is_none() {
        listing.posted_at = text("createdAt")
            .or_else(|| text("publicationDate"))
            .and_then(|d| parse_date(&d));
    }
    if listing.updated_at.is_none() {
        listing.updated_at = text("updatedAt")
            .or_else(|| text("modificationDate"))
            .and_then(|d| parse_date(&d));
    }

    used
}

fn fallback_title(document: &Html) -> Option<String> {
    let og = Selector::parse(r#"meta[property="og:title"]"#).ok()?;
    if let Some(content) = document
        .select(&og)
        .next()
        .and_then(|m| m.value().attr("content"))
    {
        return Some(content.trim().to_string());
    }

    let title = Selector::parse("h1, title").ok()?;
    document
        .select(&title)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}

fn type_name(value: &Value) -> String {
    first(value).as_str().unwrap_or_default().to_string()
}

fn first(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

/// Numbers given as JSON numbers or as Polish-formatted strings ("1 250,5 zł").
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| if c == ',' { '.' } else { c })
                .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

fn image_urls(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|image| match image {
            Value::String(url) => Some(url.clone()),
            Value::Object(map) => map
                .get("url")
                .or_else(|| map.get("contentUrl"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .filter(|url| url.starts_with("http"))
        .collect()
}

/// RFC 3339 timestamps, naive timestamps (taken as UTC) or plain dates.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

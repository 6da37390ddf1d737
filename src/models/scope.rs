//! Sources, scope breadth and crawl scopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::utils::slug;

/// Scope key used for whole-country crawls.
pub const COUNTRY_KEY: &str = "cala-polska";

/// A listing portal the harvester can crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Otodom,
    Morizon,
    Gratka,
    Trojmiasto,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Otodom,
        Source::Morizon,
        Source::Gratka,
        Source::Trojmiasto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Otodom => "otodom",
            Source::Morizon => "morizon",
            Source::Gratka => "gratka",
            Source::Trojmiasto => "trojmiasto",
        }
    }

    /// Whether a single scope of the given breadth can be crawled.
    ///
    /// Every source handles one city; only the national portals expose
    /// region-wide and country-wide listings.
    pub fn supports(self, breadth: ScopeKind) -> bool {
        match breadth {
            ScopeKind::City => true,
            ScopeKind::Country | ScopeKind::Region => self.supports_iteration(),
        }
    }

    /// Whether multi-scope iteration (`live-all`, `live-all-cities`) is available.
    pub fn supports_iteration(self) -> bool {
        matches!(self, Source::Otodom | Source::Morizon)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::config(format!("unknown source '{s}'")))
    }
}

/// Geographic breadth of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Country,
    Region,
    City,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::Country => "country",
            ScopeKind::Region => "region",
            ScopeKind::City => "city",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "country" => Ok(ScopeKind::Country),
            "region" | "voivodeship" => Ok(ScopeKind::Region),
            "city" => Ok(ScopeKind::City),
            other => Err(AppError::config(format!("unknown scope breadth '{other}'"))),
        }
    }
}

/// One crawl unit: a source, a geographic scope and a recency window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub source: Source,
    pub kind: ScopeKind,
    /// ASCII slug identifying the place
    pub key: String,
    /// Display name of the place
    pub name: String,
    /// Region slug of a city scope, when known
    #[serde(default)]
    pub region: Option<String>,
    /// Days of recency to accept; 0 disables the filter
    pub recency_window_days: u32,
}

impl Scope {
    pub fn country(source: Source, recency_window_days: u32) -> Self {
        Self {
            source,
            kind: ScopeKind::Country,
            key: COUNTRY_KEY.to_string(),
            name: "Polska".to_string(),
            region: None,
            recency_window_days,
        }
    }

    pub fn region(source: Source, name: &str, recency_window_days: u32) -> Self {
        Self {
            source,
            kind: ScopeKind::Region,
            key: slug(name),
            name: name.to_string(),
            region: None,
            recency_window_days,
        }
    }

    pub fn city(
        source: Source,
        name: &str,
        region: Option<&str>,
        recency_window_days: u32,
    ) -> Self {
        Self {
            source,
            kind: ScopeKind::City,
            key: slug(name),
            name: name.to_string(),
            region: region.map(slug),
            recency_window_days,
        }
    }

    /// `full` when the recency filter is disabled, `last{N}d` otherwise.
    pub fn recency_bucket(&self) -> String {
        recency_bucket(self.recency_window_days)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} ({})",
            self.source,
            self.kind,
            self.key,
            self.recency_bucket()
        )
    }
}

/// Checkpoint bucket name for a recency window.
pub fn recency_bucket(recency_window_days: u32) -> String {
    if recency_window_days == 0 {
        "full".to_string()
    } else {
        format!("last{recency_window_days}d")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_str() {
        assert_eq!("otodom".parse::<Source>().unwrap(), Source::Otodom);
        assert_eq!("Morizon".parse::<Source>().unwrap(), Source::Morizon);
        assert!("olx".parse::<Source>().is_err());
    }

    #[test]
    fn test_breadth_support() {
        assert!(Source::Otodom.supports(ScopeKind::Region));
        assert!(Source::Morizon.supports(ScopeKind::Country));
        assert!(Source::Gratka.supports(ScopeKind::City));
        assert!(!Source::Gratka.supports(ScopeKind::Region));
        assert!(!Source::Trojmiasto.supports(ScopeKind::Country));
        assert!(!Source::Trojmiasto.supports_iteration());
    }

    #[test]
    fn test_recency_bucket() {
        assert_eq!(recency_bucket(0), "full");
        assert_eq!(recency_bucket(30), "last30d");
    }

    #[test]
    fn test_city_scope_uses_slug_key() {
        let scope = Scope::city(Source::Otodom, "Gdańsk", Some("Pomorskie"), 7);
        assert_eq!(scope.key, "gdansk");
        assert_eq!(scope.region.as_deref(), Some("pomorskie"));
        assert_eq!(scope.to_string(), "otodom:city:gdansk (last7d)");
    }
}

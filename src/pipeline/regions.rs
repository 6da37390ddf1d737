//! Deterministic scope sequences for multi-scope runs.
//!
//! The iterator carries no persisted position. An interrupted run restarts
//! from the first scope and skips finished work through the checkpoint
//! done-sets, so the fixed order of the voivodeship table is what makes a
//! resumed run reproducible.

use crate::error::{AppError, Result};
use crate::models::regions::VOIVODESHIPS;
use crate::models::{Scope, ScopeKind, Source};

#[derive(Debug, Clone)]
enum Plan {
    Single(Scope),
    Country,
    Regions,
    Cities,
}

/// Lazy, finite, restartable sequence of scopes.
#[derive(Debug, Clone)]
pub struct RegionIterator {
    source: Source,
    recency_window_days: u32,
    plan: Plan,
    region_idx: usize,
    city_idx: usize,
}

impl RegionIterator {
    /// Iterate every scope of the given breadth for a source.
    ///
    /// Only sources with region-aware listing URLs can be iterated.
    pub fn new(source: Source, breadth: ScopeKind, recency_window_days: u32) -> Result<Self> {
        if !source.supports_iteration() {
            return Err(AppError::config(format!(
                "source '{source}' does not support {breadth} iteration; use `live` with a single city"
            )));
        }

        let plan = match breadth {
            ScopeKind::Country => Plan::Country,
            ScopeKind::Region => Plan::Regions,
            ScopeKind::City => Plan::Cities,
        };
        Ok(Self::with_plan(source, recency_window_days, plan))
    }

    /// A sequence of exactly one scope, for single-scope live mode.
    pub fn single(scope: Scope) -> Result<Self> {
        if !scope.source.supports(scope.kind) {
            return Err(AppError::config(format!(
                "source '{}' does not support {} scopes",
                scope.source, scope.kind
            )));
        }
        Ok(Self::with_plan(
            scope.source,
            scope.recency_window_days,
            Plan::Single(scope),
        ))
    }

    fn with_plan(source: Source, recency_window_days: u32, plan: Plan) -> Self {
        Self {
            source,
            recency_window_days,
            plan,
            region_idx: 0,
            city_idx: 0,
        }
    }

    /// Rewind to the first scope.
    pub fn reset(&mut self) {
        self.region_idx = 0;
        self.city_idx = 0;
    }

    /// Total number of scopes in one full pass.
    pub fn total(&self) -> usize {
        match self.plan {
            Plan::Single(_) | Plan::Country => 1,
            Plan::Regions => VOIVODESHIPS.len(),
            Plan::Cities => VOIVODESHIPS.iter().map(|v| v.cities.len()).sum(),
        }
    }
}

impl Iterator for RegionIterator {
    type Item = Scope;

    fn next(&mut self) -> Option<Scope> {
        match &self.plan {
            Plan::Single(scope) => {
                if self.region_idx > 0 {
                    return None;
                }
                self.region_idx = 1;
                Some(scope.clone())
            }
            Plan::Country => {
                if self.region_idx > 0 {
                    return None;
                }
                self.region_idx = 1;
                Some(Scope::country(self.source, self.recency_window_days))
            }
            Plan::Regions => {
                let voivodeship = VOIVODESHIPS.get(self.region_idx)?;
                self.region_idx += 1;
                Some(Scope::region(
                    self.source,
                    voivodeship.name,
                    self.recency_window_days,
                ))
            }
            Plan::Cities => loop {
                let voivodeship = VOIVODESHIPS.get(self.region_idx)?;
                if let Some(city) = voivodeship.cities.get(self.city_idx) {
                    self.city_idx += 1;
                    return Some(Scope::city(
                        self.source,
                        city,
                        Some(voivodeship.name),
                        self.recency_window_days,
                    ));
                }
                self.region_idx += 1;
                self.city_idx = 0;
            },
        }
    }
}

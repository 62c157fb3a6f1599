//! Priority model: maps a query kind plus activity flags to a numeric
//! priority. Lower value = served first.
//!
//! Centralized here so UI call sites never compute priorities themselves;
//! activity changes replay as plain `reprioritize` calls on the heaps.

use std::collections::HashMap;

use querydeck_core::{QueryKind, SchedulerConfig};

/// Fallback for kinds missing from a caller-supplied registry.
pub const DEFAULT_BASE_PRIORITY: i32 = 50;

/// Application-supplied table of base priorities per query kind.
///
/// Swapping in a different table requires no scheduler changes. The default
/// table ranks interactive kinds (row previews, cardinalities) ahead of
/// deep statistical profiling.
#[derive(Debug, Clone)]
pub struct QueryKindRegistry {
    base: HashMap<QueryKind, i32>,
}

impl Default for QueryKindRegistry {
    fn default() -> Self {
        let mut base = HashMap::new();
        base.insert(QueryKind::Rows, 10);
        base.insert(QueryKind::TableCardinality, 10);
        base.insert(QueryKind::ColumnCardinality, 15);
        base.insert(QueryKind::NullCount, 20);
        base.insert(QueryKind::TopK, 25);
        base.insert(QueryKind::TimeRange, 25);
        base.insert(QueryKind::Histogram, 30);
        base.insert(QueryKind::Statistics, 40);
        Self { base }
    }
}

impl QueryKindRegistry {
    pub fn new(base: HashMap<QueryKind, i32>) -> Self {
        Self { base }
    }

    pub fn base_priority(&self, kind: QueryKind) -> i32 {
        self.base.get(&kind).copied().unwrap_or(DEFAULT_BASE_PRIORITY)
    }

    pub fn set(&mut self, kind: QueryKind, base: i32) {
        self.base.insert(kind, base);
    }
}

/// Pure mapping from `(kind, activity)` to dispatch priority.
#[derive(Debug, Clone)]
pub struct PriorityModel {
    registry: QueryKindRegistry,
    active_boost: i32,
    field_boost: i32,
}

impl PriorityModel {
    pub fn new(registry: QueryKindRegistry, config: &SchedulerConfig) -> Self {
        Self {
            registry,
            active_boost: config.active_boost,
            field_boost: config.field_boost,
        }
    }

    /// Compute the priority for a query. Deterministic and side-effect free.
    ///
    /// `subject_active` subtracts the active boost (the user is looking at
    /// this subject right now); `field_active` subtracts the smaller column
    /// boost on top of it.
    pub fn priority(&self, kind: QueryKind, subject_active: bool, field_active: bool) -> i32 {
        let mut priority = self.registry.base_priority(kind);
        if subject_active {
            priority -= self.active_boost;
        }
        if field_active {
            priority -= self.field_boost;
        }
        priority
    }
}

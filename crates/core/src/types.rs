//! Core identifiers shared across the scheduler crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the dataset, model, or view a query belongs to.
pub type SubjectKey = String;

/// Category of analytical request issued against the engine.
///
/// Interactive kinds (row previews, cardinalities) carry lower base
/// priorities than deep profiling; see the query kind registry in the
/// scheduler crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    Rows,
    TableCardinality,
    ColumnCardinality,
    NullCount,
    TopK,
    TimeRange,
    Histogram,
    Statistics,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Rows => write!(f, "Rows"),
            QueryKind::TableCardinality => write!(f, "TableCardinality"),
            QueryKind::ColumnCardinality => write!(f, "ColumnCardinality"),
            QueryKind::NullCount => write!(f, "NullCount"),
            QueryKind::TopK => write!(f, "TopK"),
            QueryKind::TimeRange => write!(f, "TimeRange"),
            QueryKind::Histogram => write!(f, "Histogram"),
            QueryKind::Statistics => write!(f, "Statistics"),
        }
    }
}

/// Identity used to coalesce duplicate requests.
///
/// Two asks with the same key are answered by a single transport call; the
/// optional fingerprint distinguishes otherwise identical requests (e.g. the
/// column a null-count targets).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupeKey {
    pub subject: SubjectKey,
    pub kind: QueryKind,
    pub fingerprint: Option<String>,
}

impl DedupeKey {
    /// Key for a subject-level query (no column argument).
    pub fn new(subject: impl Into<SubjectKey>, kind: QueryKind) -> Self {
        Self {
            subject: subject.into(),
            kind,
            fingerprint: None,
        }
    }

    /// Key for a column- or argument-scoped query.
    pub fn with_fingerprint(
        subject: impl Into<SubjectKey>,
        kind: QueryKind,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            kind,
            fingerprint: Some(fingerprint.into()),
        }
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fingerprint {
            Some(fp) => write!(f, "{}/{}/{}", self.subject, self.kind, fp),
            None => write!(f, "{}/{}", self.subject, self.kind),
        }
    }
}

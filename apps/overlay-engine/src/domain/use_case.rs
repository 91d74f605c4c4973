//! Use cases: the identity of a calculation sandbox.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The logical measure that auto-rollup rules target.
pub const PRIMARY_MEASURE: &str = "daily";

/// Lifecycle status of a use case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UseCaseStatus {
    /// Being set up; not yet calculable by schedulers.
    Draft,
    /// Live.
    Active,
    /// Retired; kept for historical runs.
    Archived,
}

impl std::fmt::Display for UseCaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "DRAFT"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Archived => write!(f, "ARCHIVED"),
        }
    }
}

/// Per-use-case map of logical measure name → physical fact column.
///
/// The logical key set is the frozen shape of every measure vector in a run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasureMapping {
    entries: BTreeMap<String, String>,
}

impl MeasureMapping {
    /// Build a mapping from `(logical, physical)` pairs.
    #[must_use]
    pub fn new<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Physical column for a logical measure.
    #[must_use]
    pub fn physical(&self, logical: &str) -> Option<&str> {
        self.entries.get(logical).map(String::as_str)
    }

    /// Whether a logical measure is mapped.
    #[must_use]
    pub fn contains(&self, logical: &str) -> bool {
        self.entries.contains_key(logical)
    }

    /// The logical measure names, in stable order.
    pub fn logical_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate `(logical, physical)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of mapped measures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no measures are mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identity for a calculation sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseCase {
    /// Opaque identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning analyst or team.
    pub owner: String,
    /// Which hierarchy tree applies. Immutable once created.
    pub structure_id: String,
    /// Dedicated fact table, when the use case does not read the canonical
    /// ledger.
    pub input_table_name: Option<String>,
    /// Logical → physical measure columns.
    pub measure_mapping: MeasureMapping,
    /// Lifecycle status.
    pub status: UseCaseStatus,
}

impl UseCase {
    /// Whether this use case reads a dedicated fact table rather than the
    /// canonical ledger.
    #[must_use]
    pub fn has_dedicated_table(&self) -> bool {
        self.input_table_name.is_some()
    }
}

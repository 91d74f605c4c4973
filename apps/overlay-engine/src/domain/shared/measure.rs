//! Measure vectors: per-node financial values keyed by logical measure name.
//!
//! A vector's key set is frozen when it is created (from the use case's
//! measure mapping) and every arithmetic operation preserves it. Values are
//! exact decimals; serialization encodes them as strings so nothing is lost
//! crossing the persistence boundary.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A fixed-shape record of measure name → decimal value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasureVector {
    values: BTreeMap<String, Decimal>,
}

impl MeasureVector {
    /// Create a vector with every measure set to zero.
    #[must_use]
    pub fn zeroed<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: keys
                .into_iter()
                .map(|k| (k.into(), Decimal::ZERO))
                .collect(),
        }
    }

    /// Create a vector from explicit pairs.
    #[must_use]
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Value for a measure; zero if the key is absent.
    #[must_use]
    pub fn get(&self, measure: &str) -> Decimal {
        self.values.get(measure).copied().unwrap_or(Decimal::ZERO)
    }

    /// Set a measure's value. Keys outside the frozen set are ignored.
    pub fn set(&mut self, measure: &str, value: Decimal) {
        if let Some(slot) = self.values.get_mut(measure) {
            *slot = value;
        }
    }

    /// Whether the vector carries this measure key.
    #[must_use]
    pub fn contains(&self, measure: &str) -> bool {
        self.values.contains_key(measure)
    }

    /// The measure keys, in stable (sorted) order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Iterate over `(measure, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of measures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the vector has no measures.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Component-wise sum over this vector's key set.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        self.map(|k, v| v + other.get(k))
    }

    /// Component-wise difference over this vector's key set.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        self.map(|k, v| v - other.get(k))
    }

    /// Add another vector into this one in place.
    pub fn add_assign(&mut self, other: &Self) {
        for (key, slot) in &mut self.values {
            *slot += other.get(key);
        }
    }

    /// Component-wise clamp at zero.
    #[must_use]
    pub fn clamp_non_negative(&self) -> Self {
        self.map(|_, v| v.max(Decimal::ZERO))
    }

    /// Round every component to `scale` decimal places.
    #[must_use]
    pub fn round_dp(&self, scale: u32) -> Self {
        self.map(|_, v| v.round_dp(scale))
    }

    /// True if every component's magnitude is within `tolerance`.
    #[must_use]
    pub fn within(&self, tolerance: Decimal) -> bool {
        self.values.values().all(|v| v.abs() <= tolerance)
    }

    /// True if every component is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.values.values().all(|v| v.is_zero())
    }

    fn map(&self, f: impl Fn(&str, Decimal) -> Decimal) -> Self {
        Self {
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), f(k, *v)))
                .collect(),
        }
    }
}

impl fmt::Display for MeasureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

impl Serialize for MeasureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, &value.to_string())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MeasureVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut values = BTreeMap::new();
        for (key, text) in raw {
            let value = Decimal::from_str_exact(&text)
                .map_err(|e| DeError::custom(format!("measure '{key}': {e}")))?;
            values.insert(key, value);
        }
        Ok(Self { values })
    }
}

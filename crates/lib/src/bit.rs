use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::discriminant;

use serde::{Deserialize, Serialize};

use crate::schema::FieldType;

/// A single time-series record: a timestamp in epoch milliseconds, a numeric
/// value and a set of string-keyed dimensions.
///
/// Bits are immutable once created. Their identity is the full
/// `(timestamp, value, dimensions)` triple; replicas of the same bit written
/// to more than one shard compare equal, which is what read-side
/// deduplication keys on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bit {
    pub timestamp: i64,
    pub value: BitValue,
    pub dimensions: BTreeMap<String, BitValue>,
}

impl Bit {
    pub fn new(timestamp: i64, value: impl Into<BitValue>) -> Self {
        Bit {
            timestamp,
            value: value.into(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<BitValue>) -> Self {
        self.dimensions.insert(name.into(), value.into());
        self
    }

    /// Well-formedness of a record at the write boundary: non-negative
    /// timestamp, numeric value.
    pub fn check(&self) -> Result<(), String> {
        if self.timestamp < 0 {
            return Err(format!("timestamp {} is negative", self.timestamp));
        }
        if matches!(self.value, BitValue::String(_)) {
            return Err("record value must be an integer or a float".to_owned());
        }
        Ok(())
    }
}

/// A dynamically-typed scalar: the value of a record or of one dimension.
///
/// `Eq` and `Hash` are total; `Double` compares and hashes by bit pattern so
/// that a [`Bit`] can serve as a deduplication key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BitValue {
    Long(i64),
    Double(f64),
    String(String),
}

impl BitValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            BitValue::Long(_) => FieldType::Long,
            BitValue::Double(_) => FieldType::Double,
            BitValue::String(_) => FieldType::String,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BitValue::Long(v) => Some(*v as f64),
            BitValue::Double(v) => Some(*v),
            BitValue::String(_) => None,
        }
    }
}

impl PartialEq for BitValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BitValue::Long(a), BitValue::Long(b)) => a == b,
            (BitValue::Double(a), BitValue::Double(b)) => a.to_bits() == b.to_bits(),
            (BitValue::String(a), BitValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for BitValue {}

impl Hash for BitValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        discriminant(self).hash(state);
        match self {
            BitValue::Long(v) => v.hash(state),
            BitValue::Double(v) => v.to_bits().hash(state),
            BitValue::String(v) => v.hash(state),
        }
    }
}

impl PartialOrd for BitValue {
    /// Ordering across the numeric variants compares numerically; strings
    /// compare lexicographically; a string never compares with a number.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (BitValue::Long(a), BitValue::Long(b)) => a.partial_cmp(b),
            (BitValue::String(a), BitValue::String(b)) => a.partial_cmp(b),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

impl From<i64> for BitValue {
    fn from(v: i64) -> Self {
        BitValue::Long(v)
    }
}

impl From<f64> for BitValue {
    fn from(v: f64) -> Self {
        BitValue::Double(v)
    }
}

impl From<&str> for BitValue {
    fn from(v: &str) -> Self {
        BitValue::String(v.to_owned())
    }
}

impl From<String> for BitValue {
    fn from(v: String) -> Self {
        BitValue::String(v)
    }
}

impl fmt::Display for BitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitValue::Long(v) => write!(f, "{v}"),
            BitValue::Double(v) => write!(f, "{v:?}"),
            BitValue::String(v) => write!(f, "{v}"),
        }
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bit::Bit;

/// Name of the distinguished value field every schema carries.
pub const VALUE_FIELD: &str = "value";
/// Name of the distinguished timestamp field every schema carries.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// The type a schema pins a field to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Long,
    Double,
    String,
}

/// Per-metric mapping from field name to [`FieldType`].
///
/// A schema is created from the first record written to a metric and from
/// then on evolves only by widening: new fields may be added, existing fields
/// never change type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, FieldType>,
}

impl Schema {
    /// The candidate schema a single record induces: its dimensions, plus the
    /// distinguished `value` and `timestamp` fields.
    pub fn of_record(bit: &Bit) -> Schema {
        let mut fields: BTreeMap<String, FieldType> = bit
            .dimensions
            .iter()
            .map(|(name, value)| (name.clone(), value.field_type()))
            .collect();
        fields.insert(TIMESTAMP_FIELD.to_owned(), FieldType::Long);
        fields.insert(VALUE_FIELD.to_owned(), bit.value.field_type());
        Schema { fields }
    }

    pub fn field(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// Widening union with `incoming`: fields present in both must agree on
    /// type, fields only in `incoming` are added, fields only in `self` are
    /// retained. On disagreement the offending field names are returned and
    /// `self` is left untouched.
    pub fn union(&self, incoming: &Schema) -> Result<Schema, Vec<String>> {
        let mut merged = self.fields.clone();
        let mut conflicts = Vec::new();
        for (name, ty) in &incoming.fields {
            match merged.get(name) {
                Some(prior) if prior != ty => conflicts.push(name.clone()),
                _ => {
                    merged.insert(name.clone(), *ty);
                }
            }
        }
        if conflicts.is_empty() {
            Ok(Schema { fields: merged })
        } else {
            Err(conflicts)
        }
    }
}

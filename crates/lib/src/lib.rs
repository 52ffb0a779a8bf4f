//! Shared data model for NSDb.
//!
//! Everything that crosses an actor boundary is built out of these types:
//! time-series records ([`Bit`]), per-metric field typings ([`Schema`]),
//! time-shard assignments ([`Location`], [`MetricInfo`]) and the name grammar
//! for metrics and namespaces.

mod bit;
mod location;
mod name;
mod schema;

pub use bit::{Bit, BitValue};
pub use location::{Location, MetricInfo};
pub use name::{validate_name, InvalidName};
pub use schema::{FieldType, Schema, TIMESTAMP_FIELD, VALUE_FIELD};

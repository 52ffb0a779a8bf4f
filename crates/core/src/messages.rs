//! Reply events of the coordination protocol.
//!
//! These are the success payloads actors answer with; failures travel as the
//! error enums in [`crate::error`].

use nsdb_lib::{Bit, Schema};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputMapped {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub record: Bit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordAdded {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub record: Bit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordDeleted {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub record: Bit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteStatementExecuted {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub deleted: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountGot {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaGot {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub schema: Option<Schema>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaUpdated {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub schema: Schema,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectStatementExecuted {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub records: Vec<Bit>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricDropped {
    pub db: String,
    pub namespace: String,
    pub metric: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceDeleted {
    pub db: String,
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespacesGot {
    pub db: String,
    pub namespaces: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricsGot {
    pub db: String,
    pub namespace: String,
    pub metrics: Vec<String>,
}

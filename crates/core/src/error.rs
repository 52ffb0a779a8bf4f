use std::path::PathBuf;

use nsdb_cluster::MetadataError;
use nsdb_lib::InvalidName;
use thiserror::Error;

use crate::statement::StatementError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("shard store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("shard log encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt shard log `{path}`: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum SchemaError {
    /// A write tried to change the type of the named fields.
    #[error("schema update failed on fields {fields:?}")]
    Conflict { fields: Vec<String> },
    #[error("schema storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("schema request timed out")]
    TimedOut,
    #[error("schema actor unavailable")]
    Closed,
}

#[derive(Error, Debug)]
pub enum WriteError {
    /// The record was not (fully) written; the reasons carry per-node detail
    /// on partial replica failure. Successfully written replicas stay.
    #[error("record rejected: {}", reasons.join("; "))]
    RecordRejected { reasons: Vec<String> },
    #[error("No schema found for metric {metric}")]
    MissingSchema { metric: String },
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error(transparent)]
    Statement(#[from] StatementError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("write request timed out")]
    TimedOut,
    #[error("write target unavailable")]
    Closed,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("No schema found for metric {metric}")]
    MissingSchema { metric: String },
    #[error(transparent)]
    Statement(#[from] StatementError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("read request timed out")]
    TimedOut,
    #[error("read target unavailable")]
    Closed,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WriteError {
    /// Write-path policy for schema failures: a type conflict rejects the
    /// record before any location is allocated or shard written.
    pub(crate) fn from_schema(error: SchemaError) -> WriteError {
        match error {
            SchemaError::Conflict { fields } => WriteError::RecordRejected {
                reasons: fields
                    .into_iter()
                    .map(|field| format!("type conflict on field `{field}`"))
                    .collect(),
            },
            SchemaError::Storage(error) => WriteError::Other(error),
            SchemaError::TimedOut => WriteError::TimedOut,
            SchemaError::Closed => WriteError::Closed,
        }
    }

    pub(crate) fn from_metadata(error: MetadataError) -> WriteError {
        match error {
            MetadataError::DuplicateMetricInfo { metric } => WriteError::RecordRejected {
                reasons: vec![format!("a metric info already exists for metric `{metric}`")],
            },
            MetadataError::TimedOut => WriteError::TimedOut,
            MetadataError::Closed => WriteError::Closed,
        }
    }
}

impl ReadError {
    pub(crate) fn from_schema(error: SchemaError) -> ReadError {
        match error {
            SchemaError::TimedOut => ReadError::TimedOut,
            SchemaError::Closed => ReadError::Closed,
            SchemaError::Conflict { .. } => ReadError::Closed,
            SchemaError::Storage(error) => ReadError::Other(error),
        }
    }

    pub(crate) fn from_metadata(error: MetadataError) -> ReadError {
        match error {
            MetadataError::TimedOut => ReadError::TimedOut,
            _ => ReadError::Closed,
        }
    }
}

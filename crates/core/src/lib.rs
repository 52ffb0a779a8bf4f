//! The NSDb core engine.
//!
//! Statements parsed by `nsdb-sql-parser` are routed through the two
//! coordinators: writes go schema update → location assignment → record
//! insertion into the per-namespace data actor, reads go schema lookup →
//! fan-out over the metric's shard locations → merge. Cluster metadata
//! (which time shard of which metric lives on which node) is owned by
//! `nsdb-cluster`.
//!
//! [`node::NsdbNode`] wires one node's actors together and is the seam the
//! network front-ends sit on.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod messages;
pub mod namespace;
pub mod node;
pub mod schema;
pub mod statement;
pub mod store;

pub use config::NsdbConfig;
pub use node::{ExecutionError, NsdbNode, StatementResult};

//! Cluster metadata for NSDb.
//!
//! The [`MetadataCoordinator`] owns the assignment of writes to time-shard
//! [`Location`](nsdb_lib::Location)s and is the single writer per metric; the
//! [`MetadataCache`] is the in-memory store it consults; the [`ClusterBus`]
//! is the best-effort broadcast the coordinator announces state changes on.
//! Cluster membership itself is out of scope: node identity is a string and
//! node selection is injected as a [`NodeSelector`].

mod cache;
mod coordinator;
mod error;
mod node;
mod pubsub;

pub use cache::{
    CacheDropped, LocationCached, LocationsCached, MetadataCache, MetricInfoCached, MetricKey,
};
pub use coordinator::{
    LocationsAdded, LocationsGot, MetadataCoordinator, MetadataOptions, MetricInfoGot,
    MetricInfoPut, MetricMetadata,
};
pub use error::{CacheError, MetadataError};
pub use node::{static_node, NodeSelector};
pub use pubsub::{ClusterBus, ClusterEvent};

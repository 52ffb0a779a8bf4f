//! The read/write coordination protocol.
//!
//! Both coordinators are actors in front of the schema actor, the metadata
//! coordinator and the per-node data actors; data actors register under
//! their node id via `subscribe_node`.

pub mod read;
pub mod write;

pub use read::ReadCoordinator;
pub use write::WriteCoordinator;

//! Single-node bootstrap: wires the actors together and routes raw SQL.

use std::time::{SystemTime, UNIX_EPOCH};

use nsdb_cluster::{
    static_node, ClusterBus, MetadataCache, MetadataCoordinator, MetadataOptions,
};
use nsdb_lib::Bit;
use nsdb_sql_parser::{parse_statement, ParseError, Statement};
use thiserror::Error;

use crate::config::NsdbConfig;
use crate::coordinator::{ReadCoordinator, WriteCoordinator};
use crate::error::{ReadError, WriteError};
use crate::messages::{
    DeleteStatementExecuted, InputMapped, MetricDropped, SelectStatementExecuted,
};
use crate::namespace::NamespaceDataActor;
use crate::schema::SchemaActor;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// What one routed statement produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatementResult {
    Records(SelectStatementExecuted),
    Inserted(InputMapped),
    Deleted(DeleteStatementExecuted),
    Dropped(MetricDropped),
}

/// One node's running core: the cluster bus, the metadata pair, the schema
/// actor, the local data actor and the two coordinators, wired together.
///
/// This is the seam the network front-ends sit on; [`NsdbNode::execute_sql`]
/// is the raw-statement entry point they call.
pub struct NsdbNode {
    pub node_id: String,
    pub bus: ClusterBus,
    pub cache: MetadataCache,
    pub metadata: MetadataCoordinator,
    pub schema: SchemaActor,
    pub data: NamespaceDataActor,
    pub write: WriteCoordinator,
    pub read: ReadCoordinator,
}

impl NsdbNode {
    /// Spawns the node's actors, warms the metadata coordinator with an
    /// empty seed and registers the local data actor with both coordinators.
    pub async fn start(config: &NsdbConfig, node_id: impl Into<String>) -> anyhow::Result<NsdbNode> {
        let node_id = node_id.into();
        let bus = ClusterBus::default();
        let cache = MetadataCache::spawn();
        let metadata = MetadataCoordinator::spawn(
            node_id.clone(),
            cache.clone(),
            bus.clone(),
            static_node(node_id.clone()),
            MetadataOptions {
                default_shard_interval_ms: config.shard_interval_ms(),
                accept_duplicate_locations: config.cluster.accept_duplicate_locations,
                ask_timeout: config.http_endpoint.timeout,
            },
        );
        metadata.warm_up(Vec::new()).await?;

        let schema = SchemaActor::spawn(
            config.storage.base_path.clone(),
            config.http_endpoint.timeout,
        );
        let data = NamespaceDataActor::spawn(
            config.storage.base_path.clone(),
            config.write.scheduler.interval,
        );

        let write = WriteCoordinator::spawn(
            schema.clone(),
            metadata.clone(),
            config.http_endpoint.timeout,
        );
        write.subscribe_node(node_id.clone(), data.clone()).await?;
        let read = ReadCoordinator::spawn(
            schema.clone(),
            metadata.clone(),
            config.read_coordinator.timeout,
        );
        read.subscribe_node(node_id.clone(), data.clone()).await?;

        log::info!("nsdb node {node_id} started");
        Ok(NsdbNode {
            node_id,
            bus,
            cache,
            metadata,
            schema,
            data,
            write,
            read,
        })
    }

    /// Parses `raw` against `namespace` and routes it: SELECT to the read
    /// coordinator, INSERT/DELETE/DROP to the write coordinator.
    pub async fn execute_sql(
        &self,
        db: &str,
        namespace: &str,
        raw: &str,
    ) -> Result<StatementResult, ExecutionError> {
        match parse_statement(namespace, raw)? {
            Statement::Select(select) => Ok(StatementResult::Records(
                self.read.execute_statement(db, select).await?,
            )),
            Statement::Insert(insert) => {
                let record = Bit {
                    timestamp: insert.timestamp.unwrap_or_else(wall_clock_ms),
                    value: insert.value,
                    dimensions: insert.dimensions,
                };
                Ok(StatementResult::Inserted(
                    self.write
                        .map_input(db, insert.namespace, insert.metric, record)
                        .await?,
                ))
            }
            Statement::Delete(delete) => Ok(StatementResult::Deleted(
                self.write.execute_delete(db, delete).await?,
            )),
            Statement::Drop(drop) => Ok(StatementResult::Dropped(
                self.write.drop_metric(db, drop.namespace, drop.metric).await?,
            )),
        }
    }
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use nsdb_cluster::MetadataCoordinator;
use nsdb_lib::{validate_name, Bit};
use nsdb_sql_parser::DeleteStatement;
use tokio::sync::{mpsc, oneshot};

use crate::error::WriteError;
use crate::messages::{
    DeleteStatementExecuted, InputMapped, MetricDropped, NamespaceDeleted,
};
use crate::namespace::NamespaceDataActor;
use crate::schema::SchemaActor;

enum WriteCommand {
    MapInput {
        db: String,
        namespace: String,
        metric: String,
        record: Bit,
        respond_to: oneshot::Sender<Result<InputMapped, WriteError>>,
    },
    ExecuteDeleteStatement {
        db: String,
        statement: DeleteStatement,
        respond_to: oneshot::Sender<Result<DeleteStatementExecuted, WriteError>>,
    },
    DropMetric {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<MetricDropped, WriteError>>,
    },
    DeleteNamespace {
        db: String,
        namespace: String,
        respond_to: oneshot::Sender<Result<NamespaceDeleted, WriteError>>,
    },
    SubscribeNode {
        node: String,
        actor: NamespaceDataActor,
        respond_to: oneshot::Sender<()>,
    },
}

/// Orchestrates writes: schema update, location assignment, then record
/// insertion on every node of the returned locations.
#[derive(Clone)]
pub struct WriteCoordinator {
    tx: mpsc::UnboundedSender<WriteCommand>,
    timeout: Duration,
}

impl WriteCoordinator {
    pub fn spawn(
        schema: SchemaActor,
        metadata: MetadataCoordinator,
        timeout: Duration,
    ) -> WriteCoordinator {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Actor {
                schema,
                metadata,
                nodes: HashMap::new(),
            }
            .run(rx),
        );
        WriteCoordinator { tx, timeout }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, WriteError>>) -> WriteCommand,
    ) -> Result<T, WriteError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| WriteError::Closed)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WriteError::Closed),
            Err(_) => Err(WriteError::TimedOut),
        }
    }

    /// Registers the data actor owning `node`'s shards.
    pub async fn subscribe_node(
        &self,
        node: impl Into<String>,
        actor: NamespaceDataActor,
    ) -> Result<(), WriteError> {
        let node = node.into();
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::SubscribeNode {
                node,
                actor,
                respond_to: tx,
            })
            .map_err(|_| WriteError::Closed)?;
        rx.await.map_err(|_| WriteError::Closed)
    }

    /// Maps one record into the cluster. Replicas written before a partial
    /// failure are kept; the read side deduplicates.
    pub async fn map_input(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        record: Bit,
    ) -> Result<InputMapped, WriteError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| WriteCommand::MapInput {
            db,
            namespace,
            metric,
            record,
            respond_to,
        })
        .await
    }

    pub async fn execute_delete(
        &self,
        db: impl Into<String>,
        statement: DeleteStatement,
    ) -> Result<DeleteStatementExecuted, WriteError> {
        let db = db.into();
        self.call(|respond_to| WriteCommand::ExecuteDeleteStatement {
            db,
            statement,
            respond_to,
        })
        .await
    }

    pub async fn drop_metric(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<MetricDropped, WriteError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| WriteCommand::DropMetric {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await
    }

    pub async fn delete_namespace(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<NamespaceDeleted, WriteError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| WriteCommand::DeleteNamespace {
            db,
            namespace,
            respond_to,
        })
        .await
    }
}

struct Actor {
    schema: SchemaActor,
    metadata: MetadataCoordinator,
    nodes: HashMap<String, NamespaceDataActor>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriteCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                WriteCommand::MapInput {
                    db,
                    namespace,
                    metric,
                    record,
                    respond_to,
                } => {
                    let result = self.map_input(&db, &namespace, &metric, record).await;
                    let _ = respond_to.send(result);
                }
                WriteCommand::ExecuteDeleteStatement {
                    db,
                    statement,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.execute_delete(&db, statement).await);
                }
                WriteCommand::DropMetric {
                    db,
                    namespace,
                    metric,
                    respond_to,
                } => {
                    let result = self.drop_metric(&db, &namespace, &metric).await;
                    let _ = respond_to.send(result.map(|()| MetricDropped {
                        db,
                        namespace,
                        metric,
                    }));
                }
                WriteCommand::DeleteNamespace {
                    db,
                    namespace,
                    respond_to,
                } => {
                    let result = self.delete_namespace(&db, &namespace).await;
                    let _ =
                        respond_to.send(result.map(|()| NamespaceDeleted { db, namespace }));
                }
                WriteCommand::SubscribeNode {
                    node,
                    actor,
                    respond_to,
                } => {
                    log::info!("namespace data actor subscribed for node {node}");
                    self.nodes.insert(node, actor);
                    let _ = respond_to.send(());
                }
            }
        }
    }

    async fn map_input(
        &self,
        db: &str,
        namespace: &str,
        metric: &str,
        record: Bit,
    ) -> Result<InputMapped, WriteError> {
        validate_name(namespace)?;
        validate_name(metric)?;
        record
            .check()
            .map_err(|reason| WriteError::RecordRejected {
                reasons: vec![reason],
            })?;

        self.schema
            .update_from_record(db, namespace, metric, record.clone())
            .await
            .map_err(WriteError::from_schema)?;

        let locations = self
            .metadata
            .get_write_locations(db, namespace, metric, record.timestamp)
            .await
            .map_err(WriteError::from_metadata)?
            .locations;
        if locations.is_empty() {
            return Err(WriteError::RecordRejected {
                reasons: vec![format!(
                    "no location for metric `{metric}` at {}",
                    record.timestamp
                )],
            });
        }

        let mut failures = Vec::new();
        let mut writes = FuturesUnordered::new();
        let unique_nodes = locations
            .iter()
            .map(|location| location.node.clone())
            .unique()
            .collect::<Vec<_>>();
        for node in &unique_nodes {
            match self.nodes.get(node) {
                Some(actor) => {
                    let actor = actor.clone();
                    let (db, namespace, metric, record, node) = (
                        db.to_owned(),
                        namespace.to_owned(),
                        metric.to_owned(),
                        record.clone(),
                        node.clone(),
                    );
                    writes.push(async move {
                        (node, actor.add_record(db, namespace, metric, record).await)
                    });
                }
                None => failures.push(format!("no data actor subscribed for node `{node}`")),
            }
        }
        while let Some((node, written)) = writes.next().await {
            if let Err(error) = written {
                failures.push(format!("node `{node}`: {error}"));
            }
        }

        if failures.is_empty() {
            Ok(InputMapped {
                db: db.to_owned(),
                namespace: namespace.to_owned(),
                metric: metric.to_owned(),
                record,
            })
        } else {
            // Replicas that made it stay; the shard dedups on read.
            Err(WriteError::RecordRejected { reasons: failures })
        }
    }

    async fn execute_delete(
        &self,
        db: &str,
        statement: DeleteStatement,
    ) -> Result<DeleteStatementExecuted, WriteError> {
        let namespace = statement.namespace.clone();
        let metric = statement.metric.clone();

        let got = self
            .schema
            .get_schema(db, &namespace, &metric)
            .await
            .map_err(WriteError::from_schema)?;
        let Some(schema) = got.schema else {
            return Err(WriteError::MissingSchema { metric });
        };

        let locations = self
            .metadata
            .get_locations(db, &namespace, &metric)
            .await
            .map_err(WriteError::from_metadata)?
            .locations;

        let mut deleted = 0;
        let mut failures = Vec::new();
        let unique_nodes = locations
            .iter()
            .map(|location| location.node.clone())
            .unique()
            .collect::<Vec<_>>();
        for node in &unique_nodes {
            let Some(actor) = self.nodes.get(node) else {
                failures.push(format!("no data actor subscribed for node `{node}`"));
                continue;
            };
            match actor
                .execute_delete(
                    db,
                    &namespace,
                    &metric,
                    statement.condition.clone(),
                    schema.clone(),
                )
                .await
            {
                Ok(removed) => deleted += removed,
                Err(error) => failures.push(format!("node `{node}`: {error}")),
            }
        }
        if !failures.is_empty() {
            return Err(WriteError::Other(anyhow!(
                "delete statement failed: {}",
                failures.join("; ")
            )));
        }
        Ok(DeleteStatementExecuted {
            db: db.to_owned(),
            namespace,
            metric,
            deleted,
        })
    }

    /// Erases the schema, the cached metadata and every node's shard.
    async fn drop_metric(
        &self,
        db: &str,
        namespace: &str,
        metric: &str,
    ) -> Result<(), WriteError> {
        self.schema
            .delete_schema(db, namespace, metric)
            .await
            .map_err(WriteError::from_schema)?;
        self.metadata
            .drop_metric(db, namespace, metric)
            .await
            .map_err(WriteError::from_metadata)?;
        for (node, actor) in &self.nodes {
            actor
                .drop_metric(db, namespace, metric)
                .await
                .map_err(|error| {
                    WriteError::Other(anyhow!("drop on node `{node}` failed: {error}"))
                })?;
        }
        Ok(())
    }

    async fn delete_namespace(&self, db: &str, namespace: &str) -> Result<(), WriteError> {
        self.schema
            .delete_namespace(db, namespace)
            .await
            .map_err(WriteError::from_schema)?;
        self.metadata
            .drop_namespace(db, namespace)
            .await
            .map_err(WriteError::from_metadata)?;
        for (node, actor) in &self.nodes {
            actor.delete_namespace(db, namespace).await.map_err(|error| {
                WriteError::Other(anyhow!(
                    "namespace delete on node `{node}` failed: {error}"
                ))
            })?;
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use nsdb_cluster::MetadataCoordinator;
use nsdb_sql_parser::SelectStatement;
use tokio::sync::{mpsc, oneshot};

use crate::error::ReadError;
use crate::messages::{MetricsGot, NamespacesGot, SchemaGot, SelectStatementExecuted};
use crate::namespace::NamespaceDataActor;
use crate::schema::SchemaActor;
use crate::statement;

enum ReadCommand {
    ExecuteStatement {
        db: String,
        statement: SelectStatement,
        respond_to: oneshot::Sender<Result<SelectStatementExecuted, ReadError>>,
    },
    GetSchema {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<SchemaGot, ReadError>>,
    },
    GetNamespaces {
        db: String,
        respond_to: oneshot::Sender<Result<NamespacesGot, ReadError>>,
    },
    GetMetrics {
        db: String,
        namespace: String,
        respond_to: oneshot::Sender<Result<MetricsGot, ReadError>>,
    },
    SubscribeNode {
        node: String,
        actor: NamespaceDataActor,
        respond_to: oneshot::Sender<()>,
    },
}

/// Fans a select over the shards of the metric's locations; requires a
/// schema for the metric. Schema-less metadata queries are forwarded as-is.
#[derive(Clone)]
pub struct ReadCoordinator {
    tx: mpsc::UnboundedSender<ReadCommand>,
    timeout: Duration,
}

impl ReadCoordinator {
    pub fn spawn(
        schema: SchemaActor,
        metadata: MetadataCoordinator,
        timeout: Duration,
    ) -> ReadCoordinator {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Actor {
                schema,
                metadata,
                nodes: HashMap::new(),
            }
            .run(rx),
        );
        ReadCoordinator { tx, timeout }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ReadError>>) -> ReadCommand,
    ) -> Result<T, ReadError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| ReadError::Closed)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReadError::Closed),
            Err(_) => Err(ReadError::TimedOut),
        }
    }

    pub async fn subscribe_node(
        &self,
        node: impl Into<String>,
        actor: NamespaceDataActor,
    ) -> Result<(), ReadError> {
        let node = node.into();
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(ReadCommand::SubscribeNode {
                node,
                actor,
                respond_to: tx,
            })
            .map_err(|_| ReadError::Closed)?;
        rx.await.map_err(|_| ReadError::Closed)
    }

    pub async fn execute_statement(
        &self,
        db: impl Into<String>,
        statement: SelectStatement,
    ) -> Result<SelectStatementExecuted, ReadError> {
        let db = db.into();
        self.call(|respond_to| ReadCommand::ExecuteStatement {
            db,
            statement,
            respond_to,
        })
        .await
    }

    pub async fn get_schema(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<SchemaGot, ReadError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| ReadCommand::GetSchema {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await
    }

    pub async fn get_namespaces(&self, db: impl Into<String>) -> Result<NamespacesGot, ReadError> {
        let db = db.into();
        self.call(|respond_to| ReadCommand::GetNamespaces { db, respond_to })
            .await
    }

    pub async fn get_metrics(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<MetricsGot, ReadError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| ReadCommand::GetMetrics {
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
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ReadCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                ReadCommand::ExecuteStatement {
                    db,
                    statement,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.execute_statement(&db, statement).await);
                }
                ReadCommand::GetSchema {
                    db,
                    namespace,
                    metric,
                    respond_to,
                } => {
                    let result = self
                        .schema
                        .get_schema(db, namespace, metric)
                        .await
                        .map_err(ReadError::from_schema);
                    let _ = respond_to.send(result);
                }
                ReadCommand::GetNamespaces { db, respond_to } => {
                    let _ = respond_to.send(self.get_namespaces(db).await);
                }
                ReadCommand::GetMetrics {
                    db,
                    namespace,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.get_metrics(db, namespace).await);
                }
                ReadCommand::SubscribeNode {
                    node,
                    actor,
                    respond_to,
                } => {
                    self.nodes.insert(node, actor);
                    let _ = respond_to.send(());
                }
            }
        }
    }

    async fn execute_statement(
        &self,
        db: &str,
        statement: SelectStatement,
    ) -> Result<SelectStatementExecuted, ReadError> {
        let namespace = statement.namespace.clone();
        let metric = statement.metric.clone();

        let got = self
            .schema
            .get_schema(db, &namespace, &metric)
            .await
            .map_err(ReadError::from_schema)?;
        let Some(schema) = got.schema else {
            return Err(ReadError::MissingSchema { metric });
        };
        // Fail malformed statements at the coordinator, before any fan-out.
        statement::check_select(&statement, &schema)?;

        let locations = self
            .metadata
            .get_locations(db, &namespace, &metric)
            .await
            .map_err(ReadError::from_metadata)?
            .locations;

        let mut shards = FuturesUnordered::new();
        for node in locations.iter().map(|location| &location.node).unique() {
            let Some(actor) = self.nodes.get(node) else {
                log::warn!("no data actor subscribed for node `{node}`, skipping its shards");
                continue;
            };
            let actor = actor.clone();
            let (db, statement, schema) = (db.to_owned(), statement.clone(), schema.clone());
            shards.push(async move { actor.execute_select(db, statement, schema).await });
        }

        let mut merged = Vec::new();
        while let Some(shard) = shards.next().await {
            merged.extend(shard?);
        }
        // Replicas of the same record collapse before post-processing.
        let merged = statement::dedup_records(merged);
        let records = statement::apply_select(&statement, merged)?;
        Ok(SelectStatementExecuted {
            db: db.to_owned(),
            namespace,
            metric,
            records,
        })
    }

    async fn get_namespaces(&self, db: String) -> Result<NamespacesGot, ReadError> {
        let mut namespaces = Vec::new();
        for actor in self.nodes.values() {
            namespaces.extend(actor.get_namespaces(&db).await?.namespaces);
        }
        Ok(NamespacesGot {
            db,
            namespaces: namespaces.into_iter().sorted().dedup().collect(),
        })
    }

    async fn get_metrics(
        &self,
        db: String,
        namespace: String,
    ) -> Result<MetricsGot, ReadError> {
        let mut metrics = Vec::new();
        for actor in self.nodes.values() {
            metrics.extend(actor.get_metrics(&db, &namespace).await?.metrics);
        }
        Ok(MetricsGot {
            db,
            namespace,
            metrics: metrics.into_iter().sorted().dedup().collect(),
        })
    }
}

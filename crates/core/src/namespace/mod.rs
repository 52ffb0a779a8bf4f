//! The per-namespace data actor.
//!
//! Owns one lazily-created [`IndexerActor`](indexer::IndexerActor) per
//! `(db, namespace, metric)`, each rooted at `basePath/db/ns/metric`, and
//! forwards record-level commands to them. Deleting a namespace stops its
//! children and erases the directory.

mod indexer;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use itertools::Itertools;
use nsdb_lib::{Bit, Schema};
use nsdb_sql_parser::{Expression, SelectStatement};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ReadError, WriteError};
use crate::messages::{
    CountGot, MetricDropped, MetricsGot, NamespaceDeleted, NamespacesGot, RecordAdded,
    RecordDeleted,
};
use crate::store::ShardStore;
use indexer::{IndexerActor, IndexerCommand};

enum NamespaceCommand {
    AddRecord {
        db: String,
        namespace: String,
        metric: String,
        record: Bit,
        respond_to: oneshot::Sender<Result<RecordAdded, WriteError>>,
    },
    DeleteRecord {
        db: String,
        namespace: String,
        metric: String,
        record: Bit,
        respond_to: oneshot::Sender<Result<RecordDeleted, WriteError>>,
    },
    GetCount {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<CountGot, ReadError>>,
    },
    ExecuteSelect {
        db: String,
        statement: SelectStatement,
        schema: Schema,
        respond_to: oneshot::Sender<Result<Vec<Bit>, ReadError>>,
    },
    ExecuteDelete {
        db: String,
        namespace: String,
        metric: String,
        condition: Expression,
        schema: Schema,
        respond_to: oneshot::Sender<Result<usize, WriteError>>,
    },
    Flush {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<usize, WriteError>>,
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
    GetNamespaces {
        db: String,
        respond_to: oneshot::Sender<NamespacesGot>,
    },
    GetMetrics {
        db: String,
        namespace: String,
        respond_to: oneshot::Sender<MetricsGot>,
    },
    LiveIndexers {
        db: String,
        namespace: String,
        respond_to: oneshot::Sender<usize>,
    },
}

#[derive(Clone)]
pub struct NamespaceDataActor {
    tx: mpsc::UnboundedSender<NamespaceCommand>,
}

impl NamespaceDataActor {
    pub fn spawn(base_path: impl Into<PathBuf>, flush_interval: Duration) -> NamespaceDataActor {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Actor {
                base_path: base_path.into(),
                flush_interval,
                children: HashMap::new(),
            }
            .run(rx),
        );
        NamespaceDataActor { tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NamespaceCommand,
    ) -> Result<T, WriteError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| WriteError::Closed)?;
        rx.await.map_err(|_| WriteError::Closed)
    }

    pub async fn add_record(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        record: Bit,
    ) -> Result<RecordAdded, WriteError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| NamespaceCommand::AddRecord {
            db,
            namespace,
            metric,
            record,
            respond_to,
        })
        .await?
    }

    pub async fn delete_record(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        record: Bit,
    ) -> Result<RecordDeleted, WriteError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| NamespaceCommand::DeleteRecord {
            db,
            namespace,
            metric,
            record,
            respond_to,
        })
        .await?
    }

    /// Indexed record count; buffered appends become countable after a flush.
    pub async fn get_count(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<CountGot, ReadError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| NamespaceCommand::GetCount {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await
        .map_err(|_| ReadError::Closed)?
    }

    /// Runs the statement's `WHERE` pushdown over the metric's shard and
    /// returns the matching records, unprocessed.
    pub async fn execute_select(
        &self,
        db: impl Into<String>,
        statement: SelectStatement,
        schema: Schema,
    ) -> Result<Vec<Bit>, ReadError> {
        let db = db.into();
        self.call(|respond_to| NamespaceCommand::ExecuteSelect {
            db,
            statement,
            schema,
            respond_to,
        })
        .await
        .map_err(|_| ReadError::Closed)?
    }

    pub async fn execute_delete(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        condition: Expression,
        schema: Schema,
    ) -> Result<usize, WriteError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| NamespaceCommand::ExecuteDelete {
            db,
            namespace,
            metric,
            condition,
            schema,
            respond_to,
        })
        .await?
    }

    /// Forces the metric's batched writes to disk; what tests use instead of
    /// waiting out the scheduler interval.
    pub async fn flush(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<usize, WriteError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| NamespaceCommand::Flush {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await?
    }

    pub async fn drop_metric(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<MetricDropped, WriteError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| NamespaceCommand::DropMetric {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await?
    }

    pub async fn delete_namespace(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<NamespaceDeleted, WriteError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| NamespaceCommand::DeleteNamespace {
            db,
            namespace,
            respond_to,
        })
        .await?
    }

    pub async fn get_namespaces(&self, db: impl Into<String>) -> Result<NamespacesGot, ReadError> {
        let db = db.into();
        self.call(|respond_to| NamespaceCommand::GetNamespaces { db, respond_to })
            .await
            .map_err(|_| ReadError::Closed)
    }

    pub async fn get_metrics(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<MetricsGot, ReadError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| NamespaceCommand::GetMetrics {
            db,
            namespace,
            respond_to,
        })
        .await
        .map_err(|_| ReadError::Closed)
    }

    /// Number of live indexer children for the namespace.
    pub async fn live_indexers(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<usize, ReadError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| NamespaceCommand::LiveIndexers {
            db,
            namespace,
            respond_to,
        })
        .await
        .map_err(|_| ReadError::Closed)
    }
}

struct Actor {
    base_path: PathBuf,
    flush_interval: Duration,
    children: HashMap<(String, String, String), IndexerActor>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<NamespaceCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
    }

    fn shard_path(&self, db: &str, namespace: &str, metric: &str) -> PathBuf {
        self.base_path.join(db).join(namespace).join(metric)
    }

    fn indexer(
        &mut self,
        db: &str,
        namespace: &str,
        metric: &str,
    ) -> Result<IndexerActor, WriteError> {
        let key = (db.to_owned(), namespace.to_owned(), metric.to_owned());
        if let Some(child) = self.children.get(&key) {
            return Ok(child.clone());
        }
        let store = ShardStore::open(self.shard_path(db, namespace, metric))?;
        log::debug!("started indexer for {db}.{namespace}.{metric}");
        let child = IndexerActor::spawn(db, namespace, metric, store, self.flush_interval);
        self.children.insert(key, child.clone());
        Ok(child)
    }

    async fn handle(&mut self, command: NamespaceCommand) {
        match command {
            NamespaceCommand::AddRecord {
                db,
                namespace,
                metric,
                record,
                respond_to,
            } => match self.indexer(&db, &namespace, &metric) {
                Ok(child) => child.forward(IndexerCommand::AddRecord { record, respond_to }),
                Err(error) => {
                    let _ = respond_to.send(Err(error));
                }
            },
            NamespaceCommand::DeleteRecord {
                db,
                namespace,
                metric,
                record,
                respond_to,
            } => match self.indexer(&db, &namespace, &metric) {
                Ok(child) => child.forward(IndexerCommand::DeleteRecord { record, respond_to }),
                Err(error) => {
                    let _ = respond_to.send(Err(error));
                }
            },
            NamespaceCommand::GetCount {
                db,
                namespace,
                metric,
                respond_to,
            } => match self.indexer(&db, &namespace, &metric) {
                Ok(child) => child.forward(IndexerCommand::GetCount { respond_to }),
                Err(error) => {
                    let _ = respond_to.send(Err(read_error(error)));
                }
            },
            NamespaceCommand::ExecuteSelect {
                db,
                statement,
                schema,
                respond_to,
            } => {
                let (namespace, metric) = (statement.namespace.clone(), statement.metric.clone());
                match self.indexer(&db, &namespace, &metric) {
                    Ok(child) => child.forward(IndexerCommand::ExecuteSelect {
                        statement,
                        schema,
                        respond_to,
                    }),
                    Err(error) => {
                        let _ = respond_to.send(Err(read_error(error)));
                    }
                }
            }
            NamespaceCommand::ExecuteDelete {
                db,
                namespace,
                metric,
                condition,
                schema,
                respond_to,
            } => match self.indexer(&db, &namespace, &metric) {
                Ok(child) => child.forward(IndexerCommand::ExecuteDelete {
                    condition,
                    schema,
                    respond_to,
                }),
                Err(error) => {
                    let _ = respond_to.send(Err(error));
                }
            },
            NamespaceCommand::Flush {
                db,
                namespace,
                metric,
                respond_to,
            } => match self.indexer(&db, &namespace, &metric) {
                Ok(child) => child.forward(IndexerCommand::Flush { respond_to }),
                Err(error) => {
                    let _ = respond_to.send(Err(error));
                }
            },
            NamespaceCommand::DropMetric {
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
            NamespaceCommand::DeleteNamespace {
                db,
                namespace,
                respond_to,
            } => {
                let result = self.delete_namespace(&db, &namespace).await;
                let _ = respond_to.send(result.map(|()| NamespaceDeleted { db, namespace }));
            }
            NamespaceCommand::GetNamespaces { db, respond_to } => {
                let mut namespaces: Vec<String> = self
                    .children
                    .keys()
                    .filter(|(child_db, _, _)| child_db == &db)
                    .map(|(_, namespace, _)| namespace.clone())
                    .collect();
                namespaces.extend(list_dirs(&self.base_path.join(&db)));
                let namespaces = namespaces.into_iter().sorted().dedup().collect();
                let _ = respond_to.send(NamespacesGot { db, namespaces });
            }
            NamespaceCommand::GetMetrics {
                db,
                namespace,
                respond_to,
            } => {
                let mut metrics: Vec<String> = self
                    .children
                    .keys()
                    .filter(|(child_db, child_ns, _)| child_db == &db && child_ns == &namespace)
                    .map(|(_, _, metric)| metric.clone())
                    .collect();
                metrics.extend(list_dirs(&self.base_path.join(&db).join(&namespace)));
                let metrics = metrics.into_iter().sorted().dedup().collect();
                let _ = respond_to.send(MetricsGot {
                    db,
                    namespace,
                    metrics,
                });
            }
            NamespaceCommand::LiveIndexers {
                db,
                namespace,
                respond_to,
            } => {
                let count = self
                    .children
                    .keys()
                    .filter(|(child_db, child_ns, _)| child_db == &db && child_ns == &namespace)
                    .count();
                let _ = respond_to.send(count);
            }
        }
    }

    async fn drop_metric(
        &mut self,
        db: &str,
        namespace: &str,
        metric: &str,
    ) -> Result<(), WriteError> {
        let key = (db.to_owned(), namespace.to_owned(), metric.to_owned());
        if let Some(child) = self.children.remove(&key) {
            child.stop(true).await?;
        } else {
            remove_dir_if_present(&self.shard_path(db, namespace, metric))?;
        }
        Ok(())
    }

    /// Stops every child of the namespace, then erases its directory. The
    /// child map for the namespace is empty afterwards; a later command for
    /// one of its metrics starts over from an empty shard.
    async fn delete_namespace(&mut self, db: &str, namespace: &str) -> Result<(), WriteError> {
        let keys: Vec<_> = self
            .children
            .keys()
            .filter(|(child_db, child_ns, _)| child_db == db && child_ns == namespace)
            .cloned()
            .collect();
        for key in keys {
            if let Some(child) = self.children.remove(&key) {
                // The directory goes away as a whole below.
                child.stop(false).await?;
            }
        }
        remove_dir_if_present(&self.base_path.join(db).join(namespace))?;
        Ok(())
    }
}

fn read_error(error: WriteError) -> ReadError {
    match error {
        WriteError::Storage(store) => ReadError::Storage(store),
        WriteError::TimedOut => ReadError::TimedOut,
        _ => ReadError::Closed,
    }
}

fn remove_dir_if_present(path: &Path) -> Result<(), WriteError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(WriteError::Storage(error.into())),
    }
}

fn list_dirs(path: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(timestamp: i64) -> Bit {
        Bit::new(timestamp, 0.5).with_dimension("content", "c")
    }

    fn actor(dir: &TempDir) -> NamespaceDataActor {
        // A long scheduler interval: tests flush explicitly.
        NamespaceDataActor::spawn(dir.path(), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn added_records_are_counted_after_a_flush() {
        let dir = TempDir::new().unwrap();
        let data = actor(&dir);

        data.add_record("db", "registry", "x", record(1)).await.unwrap();
        assert_eq!(data.get_count("db", "registry", "x").await.unwrap().count, 0);

        data.flush("db", "registry", "x").await.unwrap();
        let count = data.get_count("db", "registry", "x").await.unwrap();
        assert_eq!(count.count, 1);
        assert_eq!(count.metric, "x");
    }

    #[tokio::test]
    async fn the_scheduler_flushes_on_its_own() {
        let dir = TempDir::new().unwrap();
        let data = NamespaceDataActor::spawn(dir.path(), Duration::from_millis(50));

        data.add_record("db", "registry", "x", record(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(data.get_count("db", "registry", "x").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn deleting_a_record_decrements_the_count() {
        let dir = TempDir::new().unwrap();
        let data = actor(&dir);

        data.add_record("db", "registry", "x", record(1)).await.unwrap();
        data.add_record("db", "registry", "x", record(2)).await.unwrap();
        data.flush("db", "registry", "x").await.unwrap();

        data.delete_record("db", "registry", "x", record(1)).await.unwrap();
        assert_eq!(data.get_count("db", "registry", "x").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn delete_namespace_stops_children_and_resets_counts() {
        let dir = TempDir::new().unwrap();
        let data = actor(&dir);

        data.add_record("db", "registry", "x", record(1)).await.unwrap();
        data.add_record("db", "registry", "y", record(2)).await.unwrap();
        data.flush("db", "registry", "x").await.unwrap();
        data.flush("db", "registry", "y").await.unwrap();
        assert_eq!(data.live_indexers("db", "registry").await.unwrap(), 2);

        data.delete_namespace("db", "registry").await.unwrap();
        assert_eq!(data.live_indexers("db", "registry").await.unwrap(), 0);
        assert_eq!(data.get_count("db", "registry", "x").await.unwrap().count, 0);
        assert!(!dir.path().join("db/registry").join("x").exists());
    }

    #[tokio::test]
    async fn drop_metric_erases_only_that_shard() {
        let dir = TempDir::new().unwrap();
        let data = actor(&dir);

        data.add_record("db", "registry", "x", record(1)).await.unwrap();
        data.add_record("db", "registry", "y", record(2)).await.unwrap();
        data.flush("db", "registry", "x").await.unwrap();
        data.flush("db", "registry", "y").await.unwrap();

        data.drop_metric("db", "registry", "x").await.unwrap();
        assert!(!dir.path().join("db/registry/x").exists());
        assert_eq!(data.get_count("db", "registry", "y").await.unwrap().count, 1);
        let metrics = data.get_metrics("db", "registry").await.unwrap();
        assert_eq!(metrics.metrics, vec!["y".to_owned()]);
    }

    #[tokio::test]
    async fn namespaces_and_metrics_are_discovered_from_disk_too() {
        let dir = TempDir::new().unwrap();
        {
            let data = actor(&dir);
            data.add_record("db", "registry", "x", record(1)).await.unwrap();
            data.flush("db", "registry", "x").await.unwrap();
        }
        // A fresh actor with no live children still sees the layout.
        let data = actor(&dir);
        let namespaces = data.get_namespaces("db").await.unwrap();
        assert_eq!(namespaces.namespaces, vec!["registry".to_owned()]);
        let metrics = data.get_metrics("db", "registry").await.unwrap();
        assert_eq!(metrics.metrics, vec!["x".to_owned()]);
    }
}

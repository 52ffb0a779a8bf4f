//! The schema actor: sole authority for per-metric schemas.
//!
//! Schemas live in memory keyed by `(db, namespace)` and are written through
//! to `schemas.json` under the namespace directory, so a restarted node keeps
//! validating against what it accepted before.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use nsdb_lib::{Bit, Schema};
use tokio::sync::{mpsc, oneshot};

use crate::error::SchemaError;
use crate::messages::{SchemaGot, SchemaUpdated};

const SCHEMAS_FILE: &str = "schemas.json";

enum SchemaCommand {
    GetSchema {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<SchemaGot, SchemaError>>,
    },
    UpdateFromRecord {
        db: String,
        namespace: String,
        metric: String,
        record: Bit,
        respond_to: oneshot::Sender<Result<SchemaUpdated, SchemaError>>,
    },
    DeleteSchema {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<(), SchemaError>>,
    },
    DeleteNamespace {
        db: String,
        namespace: String,
        respond_to: oneshot::Sender<Result<(), SchemaError>>,
    },
}

#[derive(Clone)]
pub struct SchemaActor {
    tx: mpsc::UnboundedSender<SchemaCommand>,
    timeout: Duration,
}

impl SchemaActor {
    pub fn spawn(base_path: impl Into<PathBuf>, timeout: Duration) -> SchemaActor {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Actor {
                base_path: base_path.into(),
                namespaces: HashMap::new(),
            }
            .run(rx),
        );
        SchemaActor { tx, timeout }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, SchemaError>>) -> SchemaCommand,
    ) -> Result<T, SchemaError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| SchemaError::Closed)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SchemaError::Closed),
            Err(_) => Err(SchemaError::TimedOut),
        }
    }

    pub async fn get_schema(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<SchemaGot, SchemaError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| SchemaCommand::GetSchema {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await
    }

    /// Derives the record's candidate schema and merges it with the stored
    /// one. A type conflict fails with the offending field names and leaves
    /// the stored schema untouched.
    pub async fn update_from_record(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        record: Bit,
    ) -> Result<SchemaUpdated, SchemaError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| SchemaCommand::UpdateFromRecord {
            db,
            namespace,
            metric,
            record,
            respond_to,
        })
        .await
    }

    pub async fn delete_schema(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<(), SchemaError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| SchemaCommand::DeleteSchema {
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
    ) -> Result<(), SchemaError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| SchemaCommand::DeleteNamespace {
            db,
            namespace,
            respond_to,
        })
        .await
    }
}

struct Actor {
    base_path: PathBuf,
    namespaces: HashMap<(String, String), HashMap<String, Schema>>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SchemaCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
    }

    fn handle(&mut self, command: SchemaCommand) {
        match command {
            SchemaCommand::GetSchema {
                db,
                namespace,
                metric,
                respond_to,
            } => {
                let result = self.ensure_loaded(&db, &namespace).map(|schemas| SchemaGot {
                    schema: schemas.get(&metric).cloned(),
                    db,
                    namespace,
                    metric,
                });
                let _ = respond_to.send(result);
            }
            SchemaCommand::UpdateFromRecord {
                db,
                namespace,
                metric,
                record,
                respond_to,
            } => {
                let result = self.update(&db, &namespace, &metric, &record).map(|schema| {
                    SchemaUpdated {
                        db,
                        namespace,
                        metric,
                        schema,
                    }
                });
                let _ = respond_to.send(result);
            }
            SchemaCommand::DeleteSchema {
                db,
                namespace,
                metric,
                respond_to,
            } => {
                let result = self.ensure_loaded(&db, &namespace).map(|schemas| {
                    schemas.remove(&metric).is_some()
                });
                let result = match result {
                    Ok(true) => self.persist(&db, &namespace),
                    Ok(false) => Ok(()),
                    Err(error) => Err(error),
                };
                let _ = respond_to.send(result);
            }
            SchemaCommand::DeleteNamespace {
                db,
                namespace,
                respond_to,
            } => {
                self.namespaces.remove(&(db.clone(), namespace.clone()));
                let file = self.namespace_file(&db, &namespace);
                let result = match fs::remove_file(&file) {
                    Ok(()) => Ok(()),
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(error) => Err(SchemaError::Storage(anyhow::Error::new(error).context(
                        format!("could not remove schema file {}", file.display()),
                    ))),
                };
                let _ = respond_to.send(result);
            }
        }
    }

    fn namespace_file(&self, db: &str, namespace: &str) -> PathBuf {
        self.base_path.join(db).join(namespace).join(SCHEMAS_FILE)
    }

    fn ensure_loaded(
        &mut self,
        db: &str,
        namespace: &str,
    ) -> Result<&mut HashMap<String, Schema>, SchemaError> {
        let key = (db.to_owned(), namespace.to_owned());
        if !self.namespaces.contains_key(&key) {
            let file = self.namespace_file(db, namespace);
            let schemas = if file.exists() {
                let raw = fs::read(&file)
                    .with_context(|| format!("could not read schema file {}", file.display()))?;
                serde_json::from_slice(&raw)
                    .with_context(|| format!("could not decode schema file {}", file.display()))?
            } else {
                HashMap::new()
            };
            self.namespaces.insert(key.clone(), schemas);
        }
        Ok(self.namespaces.get_mut(&key).expect("just inserted"))
    }

    fn update(
        &mut self,
        db: &str,
        namespace: &str,
        metric: &str,
        record: &Bit,
    ) -> Result<Schema, SchemaError> {
        let candidate = Schema::of_record(record);
        let schemas = self.ensure_loaded(db, namespace)?;
        let merged = match schemas.get(metric) {
            None => candidate,
            Some(prior) => prior
                .union(&candidate)
                .map_err(|fields| SchemaError::Conflict { fields })?,
        };
        if schemas.get(metric) != Some(&merged) {
            schemas.insert(metric.to_owned(), merged.clone());
            self.persist(db, namespace)?;
        }
        Ok(merged)
    }

    fn persist(&self, db: &str, namespace: &str) -> Result<(), SchemaError> {
        let file = self.namespace_file(db, namespace);
        let parent = file.parent().expect("schema file has a namespace directory");
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create namespace directory {}", parent.display()))?;
        let schemas = self
            .namespaces
            .get(&(db.to_owned(), namespace.to_owned()))
            .expect("persist follows a load");
        let raw = serde_json::to_vec_pretty(schemas).context("could not encode schemas")?;
        fs::write(&file, raw)
            .with_context(|| format!("could not write schema file {}", file.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsdb_lib::FieldType;
    use tempfile::TempDir;

    fn actor(dir: &TempDir) -> SchemaActor {
        SchemaActor::spawn(dir.path(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn first_record_creates_the_schema() {
        let dir = TempDir::new().unwrap();
        let schema = actor(&dir);

        let record = Bit::new(1, 0.5).with_dimension("host", "eu-1");
        let updated = schema
            .update_from_record("db", "registry", "m", record)
            .await
            .unwrap();
        assert_eq!(updated.schema.field("host"), Some(FieldType::String));
        assert_eq!(updated.schema.field("value"), Some(FieldType::Double));

        let got = schema.get_schema("db", "registry", "m").await.unwrap();
        assert_eq!(got.schema, Some(updated.schema));
        let absent = schema.get_schema("db", "registry", "other").await.unwrap();
        assert_eq!(absent.schema, None);
    }

    #[tokio::test]
    async fn conflicting_types_are_rejected_with_the_fields() {
        let dir = TempDir::new().unwrap();
        let schema = actor(&dir);

        schema
            .update_from_record("db", "registry", "m", Bit::new(1, 1i64).with_dimension("host", "a"))
            .await
            .unwrap();
        let error = schema
            .update_from_record("db", "registry", "m", Bit::new(2, 1i64).with_dimension("host", 7i64))
            .await
            .unwrap_err();
        match error {
            SchemaError::Conflict { fields } => assert_eq!(fields, vec!["host".to_owned()]),
            other => panic!("expected a conflict, got {other:?}"),
        }

        // The stored schema is untouched.
        let got = schema.get_schema("db", "registry", "m").await.unwrap();
        assert_eq!(got.schema.unwrap().field("host"), Some(FieldType::String));
    }

    #[tokio::test]
    async fn new_fields_widen_the_schema() {
        let dir = TempDir::new().unwrap();
        let schema = actor(&dir);

        schema
            .update_from_record("db", "registry", "m", Bit::new(1, 1i64).with_dimension("host", "a"))
            .await
            .unwrap();
        let updated = schema
            .update_from_record("db", "registry", "m", Bit::new(2, 2i64).with_dimension("region", "eu"))
            .await
            .unwrap();
        assert!(updated.schema.contains("host"));
        assert!(updated.schema.contains("region"));
    }

    #[tokio::test]
    async fn schemas_survive_a_restart() {
        let dir = TempDir::new().unwrap();
        {
            let schema = actor(&dir);
            schema
                .update_from_record("db", "registry", "m", Bit::new(1, 0.5))
                .await
                .unwrap();
        }
        let schema = actor(&dir);
        let got = schema.get_schema("db", "registry", "m").await.unwrap();
        assert!(got.schema.is_some());
    }

    #[tokio::test]
    async fn delete_namespace_erases_all_schemas() {
        let dir = TempDir::new().unwrap();
        let schema = actor(&dir);

        schema
            .update_from_record("db", "registry", "m", Bit::new(1, 0.5))
            .await
            .unwrap();
        schema.delete_namespace("db", "registry").await.unwrap();

        let got = schema.get_schema("db", "registry", "m").await.unwrap();
        assert_eq!(got.schema, None);
        assert!(!dir.path().join("db/registry").join(SCHEMAS_FILE).exists());
    }
}

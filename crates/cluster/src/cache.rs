use std::collections::HashMap;

use nsdb_lib::{Location, MetricInfo};
use tokio::sync::{mpsc, oneshot};

use crate::error::CacheError;

/// Key of both cache keyspaces.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub db: String,
    pub namespace: String,
    pub metric: String,
}

impl MetricKey {
    pub fn new(db: impl Into<String>, namespace: impl Into<String>, metric: impl Into<String>) -> Self {
        MetricKey {
            db: db.into(),
            namespace: namespace.into(),
            metric: metric.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationCached {
    pub key: MetricKey,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationsCached {
    pub key: MetricKey,
    pub locations: Vec<Location>,
}

/// Reply to a metric-info put. The stored info is first-writer-wins;
/// `previous` is filled when the put lost to an earlier one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricInfoCached {
    pub key: MetricKey,
    pub info: MetricInfo,
    pub previous: Option<MetricInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheDropped {
    pub evicted: usize,
}

enum CacheCommand {
    PutLocation {
        key: MetricKey,
        location: Location,
        respond_to: oneshot::Sender<LocationCached>,
    },
    GetLocations {
        key: MetricKey,
        respond_to: oneshot::Sender<LocationsCached>,
    },
    DeleteLocation {
        key: MetricKey,
        location: Location,
        respond_to: oneshot::Sender<LocationsCached>,
    },
    PutMetricInfo {
        key: MetricKey,
        info: MetricInfo,
        respond_to: oneshot::Sender<MetricInfoCached>,
    },
    GetMetricInfo {
        key: MetricKey,
        respond_to: oneshot::Sender<Option<MetricInfo>>,
    },
    DropMetric {
        key: MetricKey,
        respond_to: oneshot::Sender<CacheDropped>,
    },
    DropNamespace {
        db: String,
        namespace: String,
        respond_to: oneshot::Sender<CacheDropped>,
    },
}

/// In-memory keyed store over two keyspaces: locations (a list per metric)
/// and metric infos (one per metric). A single task owns the maps, so
/// mutations are serialized per key by construction.
#[derive(Clone, Debug)]
pub struct MetadataCache {
    tx: mpsc::UnboundedSender<CacheCommand>,
}

impl MetadataCache {
    pub fn spawn() -> MetadataCache {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            Actor {
                locations: HashMap::new(),
                infos: HashMap::new(),
            }
            .run(rx),
        );
        MetadataCache { tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CacheCommand,
    ) -> Result<T, CacheError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| CacheError::Closed)?;
        rx.await.map_err(|_| CacheError::Closed)
    }

    /// Appends unconditionally; replica dedup is the coordinator's policy.
    pub async fn put_location(
        &self,
        key: MetricKey,
        location: Location,
    ) -> Result<LocationCached, CacheError> {
        self.call(|respond_to| CacheCommand::PutLocation {
            key,
            location,
            respond_to,
        })
        .await
    }

    pub async fn get_locations(&self, key: MetricKey) -> Result<LocationsCached, CacheError> {
        self.call(|respond_to| CacheCommand::GetLocations { key, respond_to })
            .await
    }

    pub async fn delete_location(
        &self,
        key: MetricKey,
        location: Location,
    ) -> Result<LocationsCached, CacheError> {
        self.call(|respond_to| CacheCommand::DeleteLocation {
            key,
            location,
            respond_to,
        })
        .await
    }

    pub async fn put_metric_info(
        &self,
        key: MetricKey,
        info: MetricInfo,
    ) -> Result<MetricInfoCached, CacheError> {
        self.call(|respond_to| CacheCommand::PutMetricInfo {
            key,
            info,
            respond_to,
        })
        .await
    }

    pub async fn get_metric_info(&self, key: MetricKey) -> Result<Option<MetricInfo>, CacheError> {
        self.call(|respond_to| CacheCommand::GetMetricInfo { key, respond_to })
            .await
    }

    /// Evicts both keyspaces for one metric.
    pub async fn drop_metric(&self, key: MetricKey) -> Result<CacheDropped, CacheError> {
        self.call(|respond_to| CacheCommand::DropMetric { key, respond_to })
            .await
    }

    /// Evicts both keyspaces for every metric of a namespace.
    pub async fn drop_namespace(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<CacheDropped, CacheError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| CacheCommand::DropNamespace {
            db,
            namespace,
            respond_to,
        })
        .await
    }
}

struct Actor {
    locations: HashMap<MetricKey, Vec<Location>>,
    infos: HashMap<MetricKey, MetricInfo>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CacheCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
    }

    fn handle(&mut self, command: CacheCommand) {
        match command {
            CacheCommand::PutLocation {
                key,
                location,
                respond_to,
            } => {
                self.locations
                    .entry(key.clone())
                    .or_default()
                    .push(location.clone());
                let _ = respond_to.send(LocationCached { key, location });
            }
            CacheCommand::GetLocations { key, respond_to } => {
                let locations = self.locations.get(&key).cloned().unwrap_or_default();
                let _ = respond_to.send(LocationsCached { key, locations });
            }
            CacheCommand::DeleteLocation {
                key,
                location,
                respond_to,
            } => {
                if let Some(cached) = self.locations.get_mut(&key) {
                    cached.retain(|candidate| candidate != &location);
                }
                let locations = self.locations.get(&key).cloned().unwrap_or_default();
                let _ = respond_to.send(LocationsCached { key, locations });
            }
            CacheCommand::PutMetricInfo {
                key,
                info,
                respond_to,
            } => {
                let previous = self.infos.get(&key).cloned();
                let stored = match &previous {
                    Some(winner) => winner.clone(),
                    None => {
                        self.infos.insert(key.clone(), info.clone());
                        info
                    }
                };
                let _ = respond_to.send(MetricInfoCached {
                    key,
                    info: stored,
                    previous,
                });
            }
            CacheCommand::GetMetricInfo { key, respond_to } => {
                let _ = respond_to.send(self.infos.get(&key).cloned());
            }
            CacheCommand::DropMetric { key, respond_to } => {
                let locations = self.locations.remove(&key).map_or(0, |l| l.len());
                let infos = self.infos.remove(&key).map_or(0, |_| 1);
                let _ = respond_to.send(CacheDropped {
                    evicted: locations + infos,
                });
            }
            CacheCommand::DropNamespace {
                db,
                namespace,
                respond_to,
            } => {
                let in_namespace =
                    |key: &MetricKey| key.db == db && key.namespace == namespace;
                let mut evicted = 0;
                self.locations.retain(|key, cached| {
                    if in_namespace(key) {
                        evicted += cached.len();
                        false
                    } else {
                        true
                    }
                });
                self.infos.retain(|key, _| {
                    if in_namespace(key) {
                        evicted += 1;
                        false
                    } else {
                        true
                    }
                });
                let _ = respond_to.send(CacheDropped { evicted });
            }
        }
    }
}

use std::time::Duration;

use nsdb_lib::{Location, MetricInfo};
use tokio::sync::{mpsc, oneshot};

use crate::cache::{MetadataCache, MetricKey};
use crate::error::MetadataError;
use crate::node::NodeSelector;
use crate::pubsub::{ClusterBus, ClusterEvent};

/// One metric's seed for the warm-up replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricMetadata {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub locations: Vec<Location>,
    pub info: Option<MetricInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationsGot {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub locations: Vec<Location>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationsAdded {
    pub db: String,
    pub namespace: String,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricInfoGot {
    pub db: String,
    pub namespace: String,
    pub metric: String,
    pub info: Option<MetricInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricInfoPut {
    pub db: String,
    pub namespace: String,
    pub info: MetricInfo,
}

#[derive(Clone, Debug)]
pub struct MetadataOptions {
    /// Shard interval used when a metric has no [`MetricInfo`] override.
    pub default_shard_interval_ms: i64,
    /// Whether `AddLocation` keeps exact `(metric, node, from, to)` replica
    /// duplicates. `true` reproduces the historical behavior; `false` drops
    /// the duplicate while still acknowledging the add.
    pub accept_duplicate_locations: bool,
    pub ask_timeout: Duration,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        MetadataOptions {
            default_shard_interval_ms: 60_000,
            accept_duplicate_locations: true,
            ask_timeout: Duration::from_secs(10),
        }
    }
}

enum MetadataCommand {
    WarmUp {
        seed: Vec<MetricMetadata>,
        respond_to: oneshot::Sender<Result<(), MetadataError>>,
    },
    GetLocations {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<LocationsGot, MetadataError>>,
    },
    AddLocation {
        db: String,
        namespace: String,
        location: Location,
        respond_to: oneshot::Sender<Result<LocationsAdded, MetadataError>>,
    },
    GetWriteLocations {
        db: String,
        namespace: String,
        metric: String,
        timestamp: i64,
        respond_to: oneshot::Sender<Result<LocationsGot, MetadataError>>,
    },
    GetMetricInfo {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<MetricInfoGot, MetadataError>>,
    },
    PutMetricInfo {
        db: String,
        namespace: String,
        info: MetricInfo,
        respond_to: oneshot::Sender<Result<MetricInfoPut, MetadataError>>,
    },
    DropMetric {
        db: String,
        namespace: String,
        metric: String,
        respond_to: oneshot::Sender<Result<(), MetadataError>>,
    },
    DropNamespace {
        db: String,
        namespace: String,
        respond_to: oneshot::Sender<Result<(), MetadataError>>,
    },
}

/// Handle to the metadata coordinator actor.
///
/// The coordinator starts in warm-up: every command received before
/// [`warm_up`](MetadataCoordinator::warm_up) is parked and drained, in
/// arrival order, once the seed has been replayed and readiness announced on
/// the cluster bus.
#[derive(Clone)]
pub struct MetadataCoordinator {
    tx: mpsc::UnboundedSender<MetadataCommand>,
    timeout: Duration,
}

impl MetadataCoordinator {
    pub fn spawn(
        node: impl Into<String>,
        cache: MetadataCache,
        bus: ClusterBus,
        selector: NodeSelector,
        options: MetadataOptions,
    ) -> MetadataCoordinator {
        let (tx, rx) = mpsc::unbounded_channel();
        let timeout = options.ask_timeout;
        tokio::spawn(
            Actor {
                node: node.into(),
                cache,
                bus,
                selector,
                options,
                ready: false,
                parked: Vec::new(),
            }
            .run(rx),
        );
        MetadataCoordinator { tx, timeout }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, MetadataError>>) -> MetadataCommand,
    ) -> Result<T, MetadataError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| MetadataError::Closed)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MetadataError::Closed),
            Err(_) => Err(MetadataError::TimedOut),
        }
    }

    /// Replays the seed and transitions the coordinator to ready.
    pub async fn warm_up(&self, seed: Vec<MetricMetadata>) -> Result<(), MetadataError> {
        self.call(|respond_to| MetadataCommand::WarmUp { seed, respond_to })
            .await
    }

    pub async fn get_locations(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<LocationsGot, MetadataError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| MetadataCommand::GetLocations {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await
    }

    pub async fn add_location(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        location: Location,
    ) -> Result<LocationsAdded, MetadataError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| MetadataCommand::AddLocation {
            db,
            namespace,
            location,
            respond_to,
        })
        .await
    }

    /// The locations (one per replica node) a write at `timestamp` targets,
    /// allocating the time shard when it does not exist yet.
    pub async fn get_write_locations(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        timestamp: i64,
    ) -> Result<LocationsGot, MetadataError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| MetadataCommand::GetWriteLocations {
            db,
            namespace,
            metric,
            timestamp,
            respond_to,
        })
        .await
    }

    pub async fn get_metric_info(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<MetricInfoGot, MetadataError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| MetadataCommand::GetMetricInfo {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await
    }

    /// Fails with [`MetadataError::DuplicateMetricInfo`] when an info already
    /// exists for the metric; the first interval stays in force.
    pub async fn put_metric_info(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        info: MetricInfo,
    ) -> Result<MetricInfoPut, MetadataError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| MetadataCommand::PutMetricInfo {
            db,
            namespace,
            info,
            respond_to,
        })
        .await
    }

    pub async fn drop_metric(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
    ) -> Result<(), MetadataError> {
        let (db, namespace, metric) = (db.into(), namespace.into(), metric.into());
        self.call(|respond_to| MetadataCommand::DropMetric {
            db,
            namespace,
            metric,
            respond_to,
        })
        .await
    }

    pub async fn drop_namespace(
        &self,
        db: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<(), MetadataError> {
        let (db, namespace) = (db.into(), namespace.into());
        self.call(|respond_to| MetadataCommand::DropNamespace {
            db,
            namespace,
            respond_to,
        })
        .await
    }
}

struct Actor {
    node: String,
    cache: MetadataCache,
    bus: ClusterBus,
    selector: NodeSelector,
    options: MetadataOptions,
    ready: bool,
    parked: Vec<MetadataCommand>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MetadataCommand>) {
        while let Some(command) = rx.recv().await {
            if self.ready {
                self.handle(command).await;
                continue;
            }
            match command {
                MetadataCommand::WarmUp { seed, respond_to } => {
                    let replayed = self.apply_seed(seed).await;
                    if replayed.is_ok() {
                        self.ready = true;
                        log::info!("metadata coordinator ready on node {}", self.node);
                        self.bus.publish(ClusterEvent::MetadataReady {
                            node: self.node.clone(),
                        });
                    }
                    let _ = respond_to.send(replayed);
                    for parked in std::mem::take(&mut self.parked) {
                        self.handle(parked).await;
                    }
                }
                other => self.parked.push(other),
            }
        }
    }

    async fn apply_seed(&self, seed: Vec<MetricMetadata>) -> Result<(), MetadataError> {
        for entry in seed {
            let key = MetricKey::new(&entry.db, &entry.namespace, &entry.metric);
            for location in entry.locations {
                self.cache.put_location(key.clone(), location).await?;
            }
            if let Some(info) = entry.info {
                // First writer wins, so replaying a seed twice is harmless.
                self.cache.put_metric_info(key.clone(), info).await?;
            }
        }
        Ok(())
    }

    async fn handle(&mut self, command: MetadataCommand) {
        match command {
            MetadataCommand::WarmUp { seed, respond_to } => {
                // A seed received after readiness is replayed without a
                // second announcement.
                let _ = respond_to.send(self.apply_seed(seed).await);
            }
            MetadataCommand::GetLocations {
                db,
                namespace,
                metric,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_locations(db, namespace, metric).await);
            }
            MetadataCommand::AddLocation {
                db,
                namespace,
                location,
                respond_to,
            } => {
                let result = self.add_location(&db, &namespace, location.clone()).await;
                let _ = respond_to.send(result.map(|location| LocationsAdded {
                    db,
                    namespace,
                    location,
                }));
            }
            MetadataCommand::GetWriteLocations {
                db,
                namespace,
                metric,
                timestamp,
                respond_to,
            } => {
                let _ = respond_to.send(
                    self.get_write_locations(db, namespace, metric, timestamp)
                        .await,
                );
            }
            MetadataCommand::GetMetricInfo {
                db,
                namespace,
                metric,
                respond_to,
            } => {
                let key = MetricKey::new(&db, &namespace, &metric);
                let result = self.cache.get_metric_info(key).await;
                let _ = respond_to.send(result.map_err(Into::into).map(|info| MetricInfoGot {
                    db,
                    namespace,
                    metric,
                    info,
                }));
            }
            MetadataCommand::PutMetricInfo {
                db,
                namespace,
                info,
                respond_to,
            } => {
                let _ = respond_to.send(self.put_metric_info(db, namespace, info).await);
            }
            MetadataCommand::DropMetric {
                db,
                namespace,
                metric,
                respond_to,
            } => {
                let key = MetricKey::new(db, namespace, metric);
                let result = self.cache.drop_metric(key).await;
                let _ = respond_to.send(result.map(|_| ()).map_err(Into::into));
            }
            MetadataCommand::DropNamespace {
                db,
                namespace,
                respond_to,
            } => {
                let result = self.cache.drop_namespace(db, namespace).await;
                let _ = respond_to.send(result.map(|_| ()).map_err(Into::into));
            }
        }
    }

    async fn get_locations(
        &self,
        db: String,
        namespace: String,
        metric: String,
    ) -> Result<LocationsGot, MetadataError> {
        let key = MetricKey::new(&db, &namespace, &metric);
        let cached = self.cache.get_locations(key).await?;
        Ok(LocationsGot {
            db,
            namespace,
            metric,
            locations: cached.locations,
        })
    }

    async fn add_location(
        &self,
        db: &str,
        namespace: &str,
        location: Location,
    ) -> Result<Location, MetadataError> {
        let key = MetricKey::new(db, namespace, &location.metric);
        if !self.options.accept_duplicate_locations {
            let cached = self.cache.get_locations(key.clone()).await?;
            if cached.locations.contains(&location) {
                log::warn!(
                    "dropping duplicate location {location:?} for {db}.{namespace}"
                );
                return Ok(location);
            }
        }
        self.cache.put_location(key, location.clone()).await?;
        self.bus.publish(ClusterEvent::LocationAdded {
            db: db.to_owned(),
            namespace: namespace.to_owned(),
            location: location.clone(),
        });
        Ok(location)
    }

    async fn get_write_locations(
        &self,
        db: String,
        namespace: String,
        metric: String,
        timestamp: i64,
    ) -> Result<LocationsGot, MetadataError> {
        let key = MetricKey::new(&db, &namespace, &metric);
        let interval = match self.cache.get_metric_info(key.clone()).await? {
            Some(info) => info.shard_interval_ms,
            None => self.options.default_shard_interval_ms,
        };
        let covering: Vec<Location> = self
            .cache
            .get_locations(key)
            .await?
            .locations
            .into_iter()
            .filter(|location| location.contains(timestamp))
            .collect();
        if !covering.is_empty() {
            return Ok(LocationsGot {
                db,
                namespace,
                metric,
                locations: covering,
            });
        }

        let bucket = timestamp.div_euclid(interval);
        let from = bucket * interval;
        let node = (self.selector)(&metric, bucket);
        let location = Location::new(&metric, node, from, from + interval);
        log::debug!("allocated shard {location:?} for {db}.{namespace}.{metric}");
        let location = self.add_location(&db, &namespace, location).await?;
        Ok(LocationsGot {
            db,
            namespace,
            metric,
            locations: vec![location],
        })
    }

    async fn put_metric_info(
        &self,
        db: String,
        namespace: String,
        info: MetricInfo,
    ) -> Result<MetricInfoPut, MetadataError> {
        let key = MetricKey::new(&db, &namespace, &info.metric);
        let cached = self.cache.put_metric_info(key, info).await?;
        if cached.previous.is_some() {
            return Err(MetadataError::DuplicateMetricInfo {
                metric: cached.key.metric,
            });
        }
        self.bus.publish(ClusterEvent::MetricInfoPut {
            db: db.clone(),
            namespace: namespace.clone(),
            info: cached.info.clone(),
        });
        Ok(MetricInfoPut {
            db,
            namespace,
            info: cached.info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::static_node;
    use pretty_assertions::assert_eq;

    fn coordinator(options: MetadataOptions) -> (MetadataCoordinator, ClusterBus) {
        let bus = ClusterBus::default();
        let coordinator = MetadataCoordinator::spawn(
            "node-1",
            MetadataCache::spawn(),
            bus.clone(),
            static_node("node-1"),
            options,
        );
        (coordinator, bus)
    }

    async fn ready_coordinator() -> MetadataCoordinator {
        let (coordinator, _) = coordinator(MetadataOptions::default());
        coordinator.warm_up(Vec::new()).await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn write_locations_are_aligned_to_the_default_interval() {
        let coordinator = ready_coordinator().await;

        let got = coordinator
            .get_write_locations("db", "registry", "m", 1)
            .await
            .unwrap();
        assert_eq!(got.locations, vec![Location::new("m", "node-1", 0, 60_000)]);

        let got = coordinator
            .get_write_locations("db", "registry", "m", 60_001)
            .await
            .unwrap();
        assert_eq!(
            got.locations,
            vec![Location::new("m", "node-1", 60_000, 120_000)]
        );
    }

    #[tokio::test]
    async fn same_bucket_reuses_the_cached_location() {
        let coordinator = ready_coordinator().await;

        let first = coordinator
            .get_write_locations("db", "registry", "m", 10)
            .await
            .unwrap();
        let second = coordinator
            .get_write_locations("db", "registry", "m", 59_999)
            .await
            .unwrap();
        assert_eq!(first.locations, second.locations);

        let all = coordinator
            .get_locations("db", "registry", "m")
            .await
            .unwrap();
        assert_eq!(all.locations.len(), 1);
    }

    #[tokio::test]
    async fn metric_info_overrides_the_shard_interval() {
        let coordinator = ready_coordinator().await;
        coordinator
            .put_metric_info("db", "registry", MetricInfo::new("m", 100))
            .await
            .unwrap();

        let got = coordinator
            .get_write_locations("db", "registry", "m", 101)
            .await
            .unwrap();
        assert_eq!(got.locations, vec![Location::new("m", "node-1", 100, 200)]);
    }

    #[tokio::test]
    async fn second_metric_info_put_fails_and_keeps_the_first() {
        let coordinator = ready_coordinator().await;
        coordinator
            .put_metric_info("db", "registry", MetricInfo::new("m", 100))
            .await
            .unwrap();

        let error = coordinator
            .put_metric_info("db", "registry", MetricInfo::new("m", 500))
            .await
            .unwrap_err();
        assert_eq!(
            error,
            MetadataError::DuplicateMetricInfo {
                metric: "m".to_owned()
            }
        );

        let got = coordinator
            .get_metric_info("db", "registry", "m")
            .await
            .unwrap();
        assert_eq!(got.info, Some(MetricInfo::new("m", 100)));
    }

    #[tokio::test]
    async fn add_location_keeps_replicas_per_node() {
        let coordinator = ready_coordinator().await;
        coordinator
            .add_location("db", "registry", Location::new("m", "node-1", 0, 100))
            .await
            .unwrap();
        coordinator
            .add_location("db", "registry", Location::new("m", "node-2", 0, 100))
            .await
            .unwrap();

        let got = coordinator
            .get_locations("db", "registry", "m")
            .await
            .unwrap();
        assert_eq!(got.locations.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_handling_is_a_configuration_choice() {
        let location = Location::new("m", "node-1", 0, 100);

        let (accepting, _) = coordinator(MetadataOptions::default());
        accepting.warm_up(Vec::new()).await.unwrap();
        accepting
            .add_location("db", "registry", location.clone())
            .await
            .unwrap();
        accepting
            .add_location("db", "registry", location.clone())
            .await
            .unwrap();
        let got = accepting.get_locations("db", "registry", "m").await.unwrap();
        assert_eq!(got.locations.len(), 2);

        let (deduping, _) = coordinator(MetadataOptions {
            accept_duplicate_locations: false,
            ..MetadataOptions::default()
        });
        deduping.warm_up(Vec::new()).await.unwrap();
        deduping
            .add_location("db", "registry", location.clone())
            .await
            .unwrap();
        deduping
            .add_location("db", "registry", location)
            .await
            .unwrap();
        let got = deduping.get_locations("db", "registry", "m").await.unwrap();
        assert_eq!(got.locations.len(), 1);
    }

    #[tokio::test]
    async fn commands_sent_during_warm_up_are_parked_until_ready() {
        let (coordinator, _) = coordinator(MetadataOptions::default());

        let early = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.get_locations("db", "registry", "m").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seeded = Location::new("m", "node-9", 0, 60_000);
        coordinator
            .warm_up(vec![MetricMetadata {
                db: "db".to_owned(),
                namespace: "registry".to_owned(),
                metric: "m".to_owned(),
                locations: vec![seeded.clone()],
                info: None,
            }])
            .await
            .unwrap();

        let got = early.await.unwrap().unwrap();
        assert_eq!(got.locations, vec![seeded]);
    }

    #[tokio::test]
    async fn announces_readiness_and_allocations_on_the_bus() {
        let (coordinator, bus) = coordinator(MetadataOptions::default());
        let mut events = bus.subscribe();

        coordinator.warm_up(Vec::new()).await.unwrap();
        coordinator
            .get_write_locations("db", "registry", "m", 5)
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::MetadataReady {
                node: "node-1".to_owned()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::LocationAdded {
                db: "db".to_owned(),
                namespace: "registry".to_owned(),
                location: Location::new("m", "node-1", 0, 60_000),
            }
        );
    }
}

use nsdb_lib::{Location, MetricInfo};
use tokio::sync::broadcast;

/// State changes announced by the metadata coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterEvent {
    /// The coordinator finished replaying its warm-up seed.
    MetadataReady { node: String },
    LocationAdded {
        db: String,
        namespace: String,
        location: Location,
    },
    MetricInfoPut {
        db: String,
        namespace: String,
        info: MetricInfo,
    },
}

/// Best-effort broadcast sink. Subscribers must tolerate reordering and
/// loss; publishing never fails the publisher.
#[derive(Clone, Debug)]
pub struct ClusterBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl ClusterBus {
    pub fn new(capacity: usize) -> ClusterBus {
        let (tx, _) = broadcast::channel(capacity);
        ClusterBus { tx }
    }

    pub fn publish(&self, event: ClusterEvent) {
        // A send with no live subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }
}

impl Default for ClusterBus {
    fn default() -> Self {
        ClusterBus::new(64)
    }
}

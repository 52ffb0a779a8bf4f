use serde::{Deserialize, Serialize};

/// A half-open time range `[from, to)` on a specific node, to which one
/// metric's writes for that range are directed.
///
/// For a given `(db, namespace, metric, node)` the cached locations partition
/// the timeline: contiguous, non-overlapping, aligned to the metric's shard
/// interval.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub metric: String,
    pub node: String,
    pub from: i64,
    pub to: i64,
}

impl Location {
    pub fn new(metric: impl Into<String>, node: impl Into<String>, from: i64, to: i64) -> Self {
        Location {
            metric: metric.into(),
            node: node.into(),
            from,
            to,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.from <= timestamp && timestamp < self.to
    }

    pub fn same_range(&self, other: &Location) -> bool {
        self.from == other.from && self.to == other.to
    }

    pub fn overlaps(&self, other: &Location) -> bool {
        self.from < other.to && other.from < self.to
    }
}

/// Per-metric shard interval override. Immutable once set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricInfo {
    pub metric: String,
    pub shard_interval_ms: i64,
}

impl MetricInfo {
    pub fn new(metric: impl Into<String>, shard_interval_ms: i64) -> Self {
        MetricInfo {
            metric: metric.into(),
            shard_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_half_open() {
        let loc = Location::new("m", "node-1", 0, 60_000);
        assert!(loc.contains(0));
        assert!(loc.contains(59_999));
        assert!(!loc.contains(60_000));
        assert!(!loc.contains(-1));
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let a = Location::new("m", "node-1", 0, 100);
        let b = Location::new("m", "node-1", 100, 200);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&Location::new("m", "node-2", 99, 101)));
    }
}

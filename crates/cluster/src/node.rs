use std::sync::Arc;

/// Injected node-selection policy: `(metric, bucket index) -> node id`.
///
/// The core does not implement cluster membership; the embedding layer
/// decides which node owns a freshly allocated time shard.
pub type NodeSelector = Arc<dyn Fn(&str, i64) -> String + Send + Sync>;

/// Pins every shard of every metric to one node: the single-node deployment
/// and the test default.
pub fn static_node(node: impl Into<String>) -> NodeSelector {
    let node = node.into();
    Arc::new(move |_metric, _bucket| node.clone())
}

//! Cross-actor coordination: raw SQL in, through both coordinators, down to
//! the shards and back.

use std::time::Duration;

use nsdb::error::ReadError;
use nsdb::error::WriteError;
use nsdb::node::{ExecutionError, NsdbNode, StatementResult};
use nsdb::NsdbConfig;
use nsdb_lib::{Bit, Location, MetricInfo};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> NsdbConfig {
    let mut config = NsdbConfig::default();
    config.storage.base_path = dir.path().to_path_buf();
    // Tests flush explicitly instead of waiting out the scheduler.
    config.write.scheduler.interval = Duration::from_secs(3600);
    config
}

async fn node(dir: &TempDir) -> NsdbNode {
    NsdbNode::start(&test_config(dir), "node-1").await.unwrap()
}

fn records(result: StatementResult) -> Vec<Bit> {
    match result {
        StatementResult::Records(executed) => executed.records,
        other => panic!("expected select records, got {other:?}"),
    }
}

#[tokio::test]
async fn insert_flush_select_round_trip() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    node.execute_sql("db", "registry", "INSERT INTO x TS = 5 DIM (content = 'c') VAL = 0.5")
        .await
        .unwrap();
    node.data.flush("db", "registry", "x").await.unwrap();

    let count = node.data.get_count("db", "registry", "x").await.unwrap();
    assert_eq!(count.count, 1);
    assert_eq!(count.metric, "x");

    let result = node
        .execute_sql("db", "registry", "SELECT * FROM x")
        .await
        .unwrap();
    assert_eq!(
        records(result),
        vec![Bit::new(5, 0.5).with_dimension("content", "c")]
    );
}

#[tokio::test]
async fn writes_allocate_aligned_locations() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    node.execute_sql("db", "registry", "INSERT INTO m TS = 1 VAL = 1")
        .await
        .unwrap();
    let got = node.metadata.get_locations("db", "registry", "m").await.unwrap();
    assert_eq!(got.locations, vec![Location::new("m", "node-1", 0, 60_000)]);

    node.execute_sql("db", "registry", "INSERT INTO m TS = 60001 VAL = 2")
        .await
        .unwrap();
    let got = node.metadata.get_locations("db", "registry", "m").await.unwrap();
    assert_eq!(
        got.locations,
        vec![
            Location::new("m", "node-1", 0, 60_000),
            Location::new("m", "node-1", 60_000, 120_000),
        ]
    );
}

#[tokio::test]
async fn metric_info_overrides_the_write_bucket() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    node.metadata
        .put_metric_info("db", "registry", MetricInfo::new("m", 100))
        .await
        .unwrap();
    node.execute_sql("db", "registry", "INSERT INTO m TS = 101 VAL = 1")
        .await
        .unwrap();

    let got = node.metadata.get_locations("db", "registry", "m").await.unwrap();
    assert_eq!(got.locations, vec![Location::new("m", "node-1", 100, 200)]);
}

#[tokio::test]
async fn schema_conflicts_reject_the_write() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    node.execute_sql("db", "registry", "INSERT INTO m DIM (cores = 4) VAL = 1")
        .await
        .unwrap();
    let error = node
        .execute_sql("db", "registry", "INSERT INTO m DIM (cores = 'four') VAL = 1")
        .await
        .unwrap_err();
    match error {
        ExecutionError::Write(WriteError::RecordRejected { reasons }) => {
            assert!(reasons.iter().any(|reason| reason.contains("cores")), "{reasons:?}");
        }
        other => panic!("expected a rejected record, got {other:?}"),
    }

    // The conflicting write left nothing behind.
    node.data.flush("db", "registry", "m").await.unwrap();
    assert_eq!(node.data.get_count("db", "registry", "m").await.unwrap().count, 1);
}

#[tokio::test]
async fn selects_require_a_schema() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    let error = node
        .execute_sql("db", "registry", "SELECT * FROM nope")
        .await
        .unwrap_err();
    match &error {
        ExecutionError::Read(ReadError::MissingSchema { metric }) => assert_eq!(metric, "nope"),
        other => panic!("expected a missing schema, got {other:?}"),
    }
    assert_eq!(error.to_string(), "No schema found for metric nope");
}

#[tokio::test]
async fn delete_statements_remove_matching_records() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    for timestamp in [10, 20, 30] {
        node.execute_sql(
            "db",
            "registry",
            &format!("INSERT INTO m TS = {timestamp} VAL = 1"),
        )
        .await
        .unwrap();
    }
    node.data.flush("db", "registry", "m").await.unwrap();

    let result = node
        .execute_sql("db", "registry", "DELETE FROM m WHERE timestamp < 25")
        .await
        .unwrap();
    match result {
        StatementResult::Deleted(executed) => assert_eq!(executed.deleted, 2),
        other => panic!("expected a delete result, got {other:?}"),
    }

    let left = records(
        node.execute_sql("db", "registry", "SELECT * FROM m")
            .await
            .unwrap(),
    );
    assert_eq!(left, vec![Bit::new(30, 1i64)]);
}

#[tokio::test]
async fn drop_erases_schema_shards_and_metadata() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    node.execute_sql("db", "registry", "INSERT INTO m TS = 1 VAL = 1")
        .await
        .unwrap();
    node.data.flush("db", "registry", "m").await.unwrap();

    let result = node.execute_sql("db", "registry", "DROP m").await.unwrap();
    assert!(matches!(result, StatementResult::Dropped(_)));

    let error = node
        .execute_sql("db", "registry", "SELECT * FROM m")
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ExecutionError::Read(ReadError::MissingSchema { .. })
    ));
    let got = node.metadata.get_locations("db", "registry", "m").await.unwrap();
    assert!(got.locations.is_empty());
    let metrics = node.read.get_metrics("db", "registry").await.unwrap();
    assert!(metrics.metrics.is_empty());
}

#[tokio::test]
async fn deleting_a_namespace_resets_everything() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    node.execute_sql("db", "registry", "INSERT INTO m TS = 1 VAL = 1")
        .await
        .unwrap();
    node.data.flush("db", "registry", "m").await.unwrap();

    node.write.delete_namespace("db", "registry").await.unwrap();

    assert_eq!(node.data.live_indexers("db", "registry").await.unwrap(), 0);
    let namespaces = node.read.get_namespaces("db").await.unwrap();
    assert!(namespaces.namespaces.is_empty());
    // Asking for the count afterwards starts over from an empty shard.
    assert_eq!(node.data.get_count("db", "registry", "m").await.unwrap().count, 0);
}

#[tokio::test]
async fn replicated_writes_collapse_on_read() {
    let dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    // A second node's data actor joins both coordinators, and the bucket is
    // replicated to it by hand.
    let replica = nsdb::namespace::NamespaceDataActor::spawn(
        replica_dir.path(),
        Duration::from_secs(3600),
    );
    node.write.subscribe_node("node-2", replica.clone()).await.unwrap();
    node.read.subscribe_node("node-2", replica.clone()).await.unwrap();
    node.metadata
        .add_location("db", "registry", Location::new("m", "node-1", 0, 60_000))
        .await
        .unwrap();
    node.metadata
        .add_location("db", "registry", Location::new("m", "node-2", 0, 60_000))
        .await
        .unwrap();

    node.execute_sql("db", "registry", "INSERT INTO m TS = 1 DIM (host = 'a') VAL = 1")
        .await
        .unwrap();
    node.data.flush("db", "registry", "m").await.unwrap();
    replica.flush("db", "registry", "m").await.unwrap();

    // Each replica holds a copy...
    assert_eq!(node.data.get_count("db", "registry", "m").await.unwrap().count, 1);
    assert_eq!(replica.get_count("db", "registry", "m").await.unwrap().count, 1);

    // ...and the read side reports the record once.
    let result = node
        .execute_sql("db", "registry", "SELECT * FROM m")
        .await
        .unwrap();
    assert_eq!(
        records(result),
        vec![Bit::new(1, 1i64).with_dimension("host", "a")]
    );
}

#[tokio::test]
async fn aggregations_run_over_the_merged_shards() {
    let dir = TempDir::new().unwrap();
    let node = node(&dir).await;

    let rows = [
        (1, "a", 1i64),
        (2, "a", 2i64),
        (60_001, "b", 10i64),
    ];
    for (timestamp, host, value) in rows {
        node.execute_sql(
            "db",
            "registry",
            &format!("INSERT INTO m TS = {timestamp} DIM (host = '{host}') VAL = {value}"),
        )
        .await
        .unwrap();
    }
    node.data.flush("db", "registry", "m").await.unwrap();

    let result = node
        .execute_sql("db", "registry", "SELECT SUM(value) FROM m GROUP BY host")
        .await
        .unwrap();
    assert_eq!(
        records(result),
        vec![
            Bit::new(2, 3i64).with_dimension("host", "a"),
            Bit::new(60_001, 10i64).with_dimension("host", "b"),
        ]
    );

    let result = node
        .execute_sql(
            "db",
            "registry",
            "SELECT COUNT(value) FROM m WHERE ts IN (0, 60000)",
        )
        .await
        .unwrap();
    assert_eq!(records(result), vec![Bit::new(2, 2i64)]);
}

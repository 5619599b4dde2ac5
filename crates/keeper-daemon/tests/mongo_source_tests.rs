//! Tests against a live MongoDB
//!
//! Skipped unless `MONGODB_URI` is set, e.g.
//! `MONGODB_URI=mongodb://localhost:27017 cargo test --test mongo_source_tests`
#![allow(clippy::unwrap_used)]

use futures::TryStreamExt;
use keeper_daemon::{
    config::SourceConfig,
    dump::ShardDumper,
    source::{DataSource, MongoSource},
    BackupError,
};
use mongodb::{
    bson::{doc, Document},
    Client,
};

fn live_config(database: &str, collections: Vec<String>) -> Option<SourceConfig> {
    let uri = std::env::var("MONGODB_URI").ok()?;
    Some(SourceConfig {
        uri,
        database: database.to_string(),
        collections,
        connect_timeout_secs: 5,
    })
}

async fn seed(config: &SourceConfig) {
    let client = Client::with_uri_str(&config.uri).await.unwrap();
    let db = client.database(&config.database);
    db.drop().await.unwrap();
    db.collection::<Document>("orders")
        .insert_many((0..25).map(|i| doc! { "n": i, "at": mongodb::bson::DateTime::now() }))
        .await
        .unwrap();
    db.collection::<Document>("users")
        .insert_one(doc! { "name": "ada" })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lists_and_dumps_collections() {
    let Some(config) = live_config("backup_keeper_it", Vec::new()) else {
        eprintln!("Skipping: MONGODB_URI not set");
        return;
    };
    seed(&config).await;

    let source = MongoSource::connect(&config).await.unwrap();
    assert_eq!(source.list_data_sets().await.unwrap(), vec!["orders", "users"]);

    let records: Vec<serde_json::Value> = source
        .open_cursor("users")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], "ada");
    assert!(records[0]["_id"]["$oid"].is_string());

    let dir = tempfile::tempdir().unwrap();
    let shards = ShardDumper::new(dir.path(), 10)
        .dump(&source, "orders")
        .await
        .unwrap();
    let sizes: Vec<usize> = shards.iter().map(|s| s.record_count).collect();
    assert_eq!(sizes, vec![10, 10, 5]);

    source.close().await;
}

#[tokio::test]
async fn test_allow_list_limits_collections() {
    let Some(config) = live_config("backup_keeper_it_allow", vec!["users".to_string()]) else {
        eprintln!("Skipping: MONGODB_URI not set");
        return;
    };
    seed(&config).await;

    let source = MongoSource::connect(&config).await.unwrap();
    assert_eq!(source.list_data_sets().await.unwrap(), vec!["users"]);
    source.close().await;
}

#[tokio::test]
async fn test_unreachable_server_is_connectivity_error() {
    if std::env::var("MONGODB_URI").is_err() {
        eprintln!("Skipping: MONGODB_URI not set");
        return;
    }
    let config = SourceConfig {
        uri: "mongodb://127.0.0.1:1/?directConnection=true".to_string(),
        database: "nowhere".to_string(),
        collections: Vec::new(),
        connect_timeout_secs: 1,
    };

    let result = MongoSource::connect(&config).await;
    assert!(matches!(result, Err(BackupError::Connectivity(_))));
}

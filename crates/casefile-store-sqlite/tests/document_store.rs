//! SqliteDocumentStore behaves like the in-memory store

use casefile_core::{Clock, DocumentStore, Error, Filter, ManualClock, Query, Sort, Update};
use casefile_store_sqlite::SqliteDocumentStore;
use casefile_usage::{CostModel, RateLimitConfig, RateLimiter, UsageEvent, UsageLedger};
use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn store() -> (SqliteDocumentStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteDocumentStore::open(temp_dir.path().join("casefile.db"))
        .await
        .unwrap();
    (store, temp_dir)
}

fn at(hour: u32) -> String {
    Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap().to_rfc3339()
}

#[tokio::test]
async fn test_insert_is_append_only() {
    let (store, _dir) = store().await;

    store.insert("cases", json!({"id": "c1"})).await.unwrap();
    let err = store.insert("cases", json!({"id": "c1"})).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    // Same id in another collection is fine
    store.insert("token_usage", json!({"id": "c1"})).await.unwrap();

    let err = store.insert("cases", json!({"title": "no id"})).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn test_filters_sorting_and_limits() {
    let (store, _dir) = store().await;
    for (id, session, hour) in [("r1", "a", 9), ("r2", "b", 11), ("r3", "a", 10), ("r4", "a", 12)] {
        store
            .insert(
                "token_usage",
                json!({"id": id, "session_id": session, "timestamp": at(hour), "cost": 0.01}),
            )
            .await
            .unwrap();
    }

    let session_a = Filter::new().eq("session_id", "a");
    assert_eq!(store.count("token_usage", &session_a).await.unwrap(), 3);
    assert_eq!(store.count("token_usage", &Filter::new()).await.unwrap(), 4);
    assert_eq!(store.count("cases", &Filter::new()).await.unwrap(), 0);

    let since_ten = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    let recent = session_a.clone().since("timestamp", since_ten);
    assert_eq!(store.count("token_usage", &recent).await.unwrap(), 2);

    let newest = store
        .find(
            "token_usage",
            &Query::new(session_a.clone()).sort(Sort::newest_first("timestamp")).limit(2),
        )
        .await
        .unwrap();
    let ids: Vec<&str> = newest.iter().map(|d| d["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["r4", "r3"]);

    let oldest = store
        .find("token_usage", &Query::all().sort(Sort::oldest_first("timestamp")))
        .await
        .unwrap();
    assert_eq!(oldest[0]["id"], "r1");
    assert_eq!(oldest[3]["id"], "r4");

    // Numbers never equal strings
    let numeric = Filter::new().eq("cost", "0.01");
    assert_eq!(store.count("token_usage", &numeric).await.unwrap(), 0);
}

#[tokio::test]
async fn test_timestamps_with_offsets_compare_as_instants() {
    let (store, _dir) = store().await;
    store
        .insert("token_usage", json!({"id": "utc", "timestamp": "2025-06-01T10:30:00Z"}))
        .await
        .unwrap();
    store
        .insert("token_usage", json!({"id": "offset", "timestamp": "2025-06-01T12:00:00+02:00"}))
        .await
        .unwrap();

    let since = Utc.with_ymd_and_hms(2025, 6, 1, 10, 15, 0).unwrap();
    let found = store
        .find("token_usage", &Query::new(Filter::new().since("timestamp", since)))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], "utc");
}

#[tokio::test]
async fn test_update_set_and_push() {
    let (store, _dir) = store().await;
    store
        .insert("cases", json!({"id": "c1", "title": "Blackwood", "characters": []}))
        .await
        .unwrap();

    let update = Update::new()
        .set("crime_scene_image_url", "https://img.example/c1.png")
        .push("characters", json!({"name": "Tom Reed"}))
        .push("visual_scenes", json!({"title": "Scene: Testimony"}));
    assert!(store.update("cases", "c1", &update).await.unwrap());
    assert!(!store.update("cases", "missing", &update).await.unwrap());

    let doc = store.find_by_id("cases", "c1").await.unwrap().unwrap();
    assert_eq!(doc["crime_scene_image_url"], "https://img.example/c1.png");
    assert_eq!(doc["characters"][0]["name"], "Tom Reed");
    assert_eq!(doc["visual_scenes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_update_is_rolled_back() {
    let (store, _dir) = store().await;
    store
        .insert("cases", json!({"id": "c1", "title": "Blackwood"}))
        .await
        .unwrap();

    let update = Update::new().set("difficulty", "hard").push("title", "oops");
    assert!(store.update("cases", "c1", &update).await.is_err());

    let doc = store.find_by_id("cases", "c1").await.unwrap().unwrap();
    assert!(doc.get("difficulty").is_none());
    assert_eq!(doc["title"], "Blackwood");
}

#[tokio::test]
async fn test_rejects_unsafe_field_names() {
    let (store, _dir) = store().await;
    let filter = Filter::new().eq("id') OR 1=1 --", "x");
    assert!(matches!(
        store.count("cases", &filter).await,
        Err(Error::InvalidRequest(_))
    ));
    let query = Query::all().sort(Sort::newest_first("timestamp; DROP TABLE documents"));
    assert!(store.find("cases", &query).await.is_err());
}

#[tokio::test]
async fn test_ledger_and_rate_limits_on_sqlite() {
    let (store, _dir) = store().await;
    let store: Arc<dyn DocumentStore> = Arc::new(store);
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let ledger = Arc::new(UsageLedger::new(store, dyn_clock, CostModel::new()));
    let limiter = RateLimiter::new(
        ledger.clone(),
        RateLimitConfig {
            max_operations_per_hour: 2,
            ..Default::default()
        },
    );

    for _ in 0..3 {
        ledger
            .record(
                UsageEvent::new("s1", casefile_core::ServiceKind::Logic, "evidence_analysis")
                    .prompt("Who had access to the study?")
                    .response("Only the doctor held a key."),
            )
            .await;
        clock.advance(TimeDelta::minutes(1));
    }

    let status = limiter.check("s1").await.unwrap();
    assert_eq!(status.recent_operations, 3);
    assert!(status.operations_limit_exceeded);

    clock.advance(TimeDelta::hours(2));
    let status = limiter.check("s1").await.unwrap();
    assert_eq!(status.recent_operations, 0);
    assert!(status.within_limits);

    let summary = ledger.session_summary("s1").await.unwrap();
    assert_eq!(summary.operation_count, 3);
    assert!(summary.total_cost > 0.0);
    assert_eq!(ledger.list_records(Some("s1"), 2).await.unwrap().len(), 2);
}

//! Storage layer tests for the hub.

#![allow(clippy::unwrap_used)]

use rigfleet_core::telemetry::{GpuStats, StatsReport};
use rigfleet_core::{RigStatus, TelemetrySnapshot};

use super::db::HubDatabase;
use super::DatabaseError;

async fn test_db() -> HubDatabase {
    HubDatabase::open_in_memory().await.unwrap()
}

#[tokio::test]
async fn create_and_get_rig() {
    let db = test_db().await;
    let rig = db.create_rig("r1", "garage-1", "hash-1").await.unwrap();

    assert_eq!(rig.id, "r1");
    assert_eq!(rig.name, "garage-1");
    assert_eq!(rig.status(), RigStatus::Offline);
    assert!(rig.last_seen.is_none());
    assert!(rig.telemetry.is_none());
}

#[tokio::test]
async fn get_missing_rig_is_not_found() {
    let db = test_db().await;
    let err = db.get_rig("nope").await.unwrap_err();
    assert!(matches!(err, DatabaseError::RigNotFound(ref id) if id == "nope"));
}

#[tokio::test]
async fn token_hash_is_unique() {
    let db = test_db().await;
    db.create_rig("r1", "garage-1", "same").await.unwrap();
    assert!(db.create_rig("r2", "garage-2", "same").await.is_err());
}

#[tokio::test]
async fn find_rig_by_token_hash() {
    let db = test_db().await;
    db.create_rig("r1", "garage-1", "hash-1").await.unwrap();

    let found = db.get_rig_by_token_hash("hash-1").await.unwrap();
    assert_eq!(found.unwrap().id, "r1");
    assert!(db.get_rig_by_token_hash("hash-2").await.unwrap().is_none());
}

#[tokio::test]
async fn list_rigs_ordered_by_name() {
    let db = test_db().await;
    db.create_rig("r2", "shed", "h2").await.unwrap();
    db.create_rig("r1", "garage", "h1").await.unwrap();

    let names: Vec<String> = db
        .list_rigs()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["garage", "shed"]);
}

#[tokio::test]
async fn update_status() {
    let db = test_db().await;
    db.create_rig("r1", "garage-1", "h1").await.unwrap();

    assert!(db.update_rig_status("r1", RigStatus::Online).await.unwrap());
    assert_eq!(db.get_rig("r1").await.unwrap().status(), RigStatus::Online);
    assert!(!db.update_rig_status("r9", RigStatus::Online).await.unwrap());
}

#[tokio::test]
async fn telemetry_round_trips_through_snapshot() {
    let db = test_db().await;
    db.create_rig("r1", "garage-1", "h1").await.unwrap();

    let mut snap = TelemetrySnapshot::offline("r1", "garage-1");
    snap.status = RigStatus::Warning;
    snap.merge_stats(
        StatsReport {
            gpus: vec![GpuStats {
                index: 0,
                name: "RX 580".into(),
                temperature: Some(88.0),
                ..Default::default()
            }],
            ..Default::default()
        },
        1_700_000_000,
    );
    assert!(db.update_rig_telemetry(&snap).await.unwrap());

    let rig = db.get_rig("r1").await.unwrap();
    assert_eq!(rig.last_seen, Some(1_700_000_000));
    assert_eq!(rig.snapshot(), snap);
}

#[tokio::test]
async fn mark_all_offline_resets_status() {
    let db = test_db().await;
    db.create_rig("r1", "a", "h1").await.unwrap();
    db.create_rig("r2", "b", "h2").await.unwrap();
    db.update_rig_status("r1", RigStatus::Online).await.unwrap();
    db.update_rig_status("r2", RigStatus::Rebooting).await.unwrap();

    assert_eq!(db.mark_all_rigs_offline().await.unwrap(), 2);
    for rig in db.list_rigs().await.unwrap() {
        assert_eq!(rig.status(), RigStatus::Offline);
    }
}

#[test]
fn corrupt_telemetry_falls_back_to_identity() {
    let rig = super::Rig {
        id: "r1".into(),
        name: "garage-1".into(),
        token_hash: "h".into(),
        status: "ONLINE".into(),
        last_seen: Some(5),
        telemetry: Some("{not json".into()),
        created_at: 0,
        updated_at: 0,
    };
    let snap = rig.snapshot();
    assert_eq!(snap.rig_name, "garage-1");
    assert_eq!(snap.status, RigStatus::Online);
    assert_eq!(snap.last_seen, Some(5));
    assert!(snap.gpus.is_empty());
}

#[tokio::test]
async fn rigs_survive_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.db");

    {
        let db = HubDatabase::open(&path).await.unwrap();
        db.create_rig("r1", "garage-1", "hash-1").await.unwrap();
        db.update_rig_status("r1", RigStatus::Online).await.unwrap();
    }

    let db = HubDatabase::open(&path).await.unwrap();
    let rig = db.get_rig_by_token_hash("hash-1").await.unwrap().unwrap();
    assert_eq!(rig.id, "r1");
    assert_eq!(rig.status(), RigStatus::Online);
}

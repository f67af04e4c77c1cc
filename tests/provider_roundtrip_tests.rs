//! Integration tests for the file-backed storage providers.

use chrono::Utc;
use saveback::{
    JsonSaveProvider, MsgpackSaveProvider, SaveDescriptor, SaveEnvelope, SaveProvider,
    StagedSave, StaticSaveTypeRegistry,
};
use tempfile::TempDir;

fn staged(descriptor: &SaveDescriptor, id: i64, data: serde_json::Value) -> StagedSave {
    StagedSave {
        descriptor: descriptor.clone(),
        id,
        envelope: SaveEnvelope {
            id,
            migration_id: 3,
            just_created: false,
            written_at: Utc::now(),
            data,
        },
    }
}

fn initialized<P: SaveProvider>(provider: P) -> P {
    provider.initialize(&StaticSaveTypeRegistry::new()).unwrap();
    provider
}

#[test]
fn test_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let provider = initialized(JsonSaveProvider::new(dir.path()));
    let descriptor = SaveDescriptor::new("player");

    let data = serde_json::json!({ "nickname": "Bob", "level": 4 });
    provider
        .stage(vec![staged(&descriptor, 1, data.clone())])
        .unwrap();
    provider.write_staged().unwrap();

    assert!(dir.path().join("player1.save").exists());
    let envelope = provider.read(&descriptor, 1).unwrap().unwrap();
    assert_eq!(envelope.id, 1);
    assert_eq!(envelope.migration_id, 3);
    assert_eq!(envelope.data, data);
}

#[test]
fn test_msgpack_round_trip() {
    let dir = TempDir::new().unwrap();
    let provider = initialized(MsgpackSaveProvider::new(dir.path()));
    let descriptor = SaveDescriptor::new("world").with_extension(".bin");

    let data = serde_json::json!({ "seed": 1234567, "biomes": ["ice", "lava"] });
    provider
        .stage(vec![staged(&descriptor, 0, data.clone())])
        .unwrap();
    provider.write_staged().unwrap();

    let envelope = provider.read(&descriptor, 0).unwrap().unwrap();
    assert_eq!(envelope.data, data);
}

#[test]
fn test_pending_units_merge_by_key() {
    let dir = TempDir::new().unwrap();
    let provider = initialized(JsonSaveProvider::new(dir.path()));
    let descriptor = SaveDescriptor::new("player");

    provider
        .stage(vec![staged(&descriptor, 1, serde_json::json!({ "level": 1 }))])
        .unwrap();
    provider
        .stage(vec![staged(&descriptor, 1, serde_json::json!({ "level": 2 }))])
        .unwrap();
    provider.write_staged().unwrap();

    let envelope = provider.read(&descriptor, 1).unwrap().unwrap();
    assert_eq!(envelope.data, serde_json::json!({ "level": 2 }));
}

#[test]
fn test_read_miss_is_none() {
    let dir = TempDir::new().unwrap();
    let provider = initialized(JsonSaveProvider::new(dir.path()));
    let descriptor = SaveDescriptor::new("player");
    assert!(provider.read(&descriptor, 42).unwrap().is_none());
}

#[test]
fn test_read_all_scans_only_matching_files() {
    let dir = TempDir::new().unwrap();
    let provider = initialized(JsonSaveProvider::new(dir.path()));
    let descriptor = SaveDescriptor::new("player");

    provider
        .stage(vec![
            staged(&descriptor, 2, serde_json::json!({ "level": 2 })),
            staged(&descriptor, 1, serde_json::json!({ "level": 1 })),
        ])
        .unwrap();
    provider.write_staged().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not a save").unwrap();

    let envelopes = provider.read_all(&descriptor).unwrap();
    let ids: Vec<i64> = envelopes.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn test_notification_flag_tracks_pending_buffer() {
    let dir = TempDir::new().unwrap();
    let provider = initialized(JsonSaveProvider::new(dir.path()));
    let loud = SaveDescriptor::new("player");
    let quiet = SaveDescriptor::new("audio").notify_user(false);

    provider
        .stage(vec![staged(&quiet, 0, serde_json::json!({ "volume": 1 }))])
        .unwrap();
    assert!(!provider.any_staged_requires_notification());

    provider
        .stage(vec![staged(&loud, 0, serde_json::json!({ "level": 1 }))])
        .unwrap();
    assert!(provider.any_staged_requires_notification());

    provider.write_staged().unwrap();
    assert!(!provider.any_staged_requires_notification());
}

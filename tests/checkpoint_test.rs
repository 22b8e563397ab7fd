mod common;

use cdc_bridge::checkpoint::{Checkpoint, CheckpointManager};
use cdc_bridge::engine::{ReplayEngine, RunnerState, SourceOffset};
use cdc_bridge::StreamSupplier;
use common::{get_test_config, payload_name};
use futures::StreamExt;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn write_change_log(path: &Path, names: &[&str]) {
    let mut file = File::create(path).unwrap();
    for (i, name) in names.iter().enumerate() {
        let id = i + 1;
        let record = json!({
            "topic": "dbserver1.inventory.customers",
            "key": id,
            "value": {
                "before": null,
                "after": {"id": id, "name": name},
                "op": "c",
            },
            "op": "c",
        });
        writeln!(file, "{}", record).unwrap();
    }
}

async fn replay(log: &PathBuf, offsets: &PathBuf) -> Vec<String> {
    let mut config = get_test_config();
    config.engine.batch_size = 2;
    let engine = ReplayEngine::new(log, config.engine.batch_size)
        .with_checkpoints(CheckpointManager::new(offsets));

    let stream = StreamSupplier::new(engine, config).unwrap().get();
    let runner = std::sync::Arc::clone(stream.runner());

    let names = tokio::time::timeout(
        Duration::from_secs(5),
        stream
            .map(|item| payload_name(item.unwrap().body()))
            .collect::<Vec<_>>(),
    )
    .await
    .unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        runner.wait_for_state(RunnerState::Stopped),
    )
    .await
    .unwrap();
    names
}

#[test]
fn test_checkpoint_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("test_checkpoint.json");

    let manager = CheckpointManager::new(&checkpoint_path);

    let checkpoint = Checkpoint::new(SourceOffset::new().with("lsn", 24023128), 1000);
    manager.save(&checkpoint).unwrap();

    let loaded = manager.load().unwrap().expect("Checkpoint should exist");
    assert_eq!(loaded.offset.get("lsn"), Some(&json!(24023128)));
    assert_eq!(loaded.record_count, 1000);

    let checkpoint2 = Checkpoint::new(
        SourceOffset::new().with("lsn", 24023200).with("txId", 556),
        2000,
    );
    manager.save(&checkpoint2).unwrap();

    let loaded2 = manager.load().unwrap().expect("Checkpoint should exist");
    assert_eq!(loaded2.offset, checkpoint2.offset);
    assert_eq!(loaded2.record_count, 2000);
}

#[test]
fn test_checkpoint_recovery_simulation() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("recovery_checkpoint.json");

    {
        let manager = CheckpointManager::new(&checkpoint_path);
        assert!(manager.load().unwrap().is_none());

        let checkpoint = Checkpoint::new(SourceOffset::new().with("line", 500), 500);
        manager.save(&checkpoint).unwrap();
    }

    // Restart
    {
        let manager = CheckpointManager::new(&checkpoint_path);
        let loaded = manager.load().unwrap().expect("Should recover checkpoint");
        assert_eq!(loaded.offset.get("line"), Some(&json!(500)));

        let next = Checkpoint::new(
            SourceOffset::new().with("line", 800),
            loaded.record_count + 300,
        );
        manager.save(&next).unwrap();
    }

    {
        let manager = CheckpointManager::new(&checkpoint_path);
        let final_checkpoint = manager.load().unwrap().expect("Should have final checkpoint");
        assert_eq!(final_checkpoint.offset.get("line"), Some(&json!(800)));
        assert_eq!(final_checkpoint.record_count, 800);
    }
}

#[test]
fn test_rapid_checkpoint_writes() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("rapid_checkpoint.json");

    let manager = CheckpointManager::new(&checkpoint_path);
    for i in 0..10u64 {
        let checkpoint = Checkpoint::new(SourceOffset::new().with("lsn", i * 1000), i * 100);
        manager.save(&checkpoint).unwrap();
    }

    let final_checkpoint = manager.load().unwrap().expect("Should have checkpoint");
    assert_eq!(final_checkpoint.offset.get("lsn"), Some(&json!(9000)));
    assert_eq!(final_checkpoint.record_count, 900);
}

#[tokio::test]
async fn test_replay_resumes_after_last_committed_batch() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("changes.jsonl");
    let offsets = temp_dir.path().join("offsets.json");

    write_change_log(&log, &["A", "B", "C"]);
    assert_eq!(replay(&log, &offsets).await, vec!["A", "B", "C"]);

    let checkpoint = CheckpointManager::new(&offsets)
        .load()
        .unwrap()
        .expect("replay should leave a checkpoint");
    assert_eq!(checkpoint.offset.get("line"), Some(&json!(3)));
    assert_eq!(checkpoint.record_count, 3);

    // New changes appended while the bridge was down.
    write_change_log(&log, &["A", "B", "C", "D", "E"]);
    assert_eq!(replay(&log, &offsets).await, vec!["D", "E"]);

    // Nothing new: the stream completes empty.
    assert!(replay(&log, &offsets).await.is_empty());
}

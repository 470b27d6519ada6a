//! Tests for durable index directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use finrag::document::{Chunk, IndexEntry};
use finrag::vectorstore::{IndexManifest, VectorIndex};
use finrag::{ErrorKind, IndexStore};
use tempfile::TempDir;

fn manifest() -> IndexManifest {
    IndexManifest::new("test-model", 3)
}

fn stored_manifest(dir: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(dir.join("manifest.json")).unwrap()).unwrap()
}

/// The entries file the current manifest points at.
fn current_entries(dir: &Path) -> PathBuf {
    let manifest = stored_manifest(dir);
    dir.join(manifest["entries_file"].as_str().unwrap())
}

fn entries_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|item| item.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.starts_with("entries") && name.ends_with(".json"))
        .collect();
    names.sort();
    names
}

fn entry(document_id: &str, ordinal: usize, embedding: Vec<f32>) -> IndexEntry {
    IndexEntry {
        chunk: Chunk {
            document_id: document_id.to_string(),
            ordinal,
            text: format!("{document_id} chunk {ordinal}"),
            start: ordinal * 10,
            end: ordinal * 10 + 10,
            overlap: 0,
            metadata: HashMap::from([("chunk_index".to_string(), ordinal.to_string())]),
        },
        embedding,
    }
}

#[tokio::test]
async fn index_survives_close_and_reopen() {
    let dir = TempDir::new().unwrap();

    let handle = IndexStore::open(dir.path(), manifest()).await.unwrap();
    handle
        .index()
        .upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0]), entry("b", 0, vec![0.0, 1.0, 0.0])])
        .await
        .unwrap();
    let before = handle.index().search(&[1.0, 0.2, 0.0], 2).await.unwrap();
    handle.close().await.unwrap();

    assert!(dir.path().join("manifest.json").exists());
    assert!(current_entries(dir.path()).exists());

    let handle = IndexStore::open(dir.path(), manifest()).await.unwrap();
    let after = handle.index().search(&[1.0, 0.2, 0.0], 2).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(handle.index().stats().await.document_count, 2);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn with_index_flushes_even_when_the_closure_fails() {
    let dir = TempDir::new().unwrap();

    let result: finrag::Result<()> = IndexStore::with_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0])]).await?;
        Err(finrag::RagError::ConfigError("caller gave up".into()))
    })
    .await;
    assert!(matches!(result, Err(finrag::RagError::ConfigError(_))));

    let count = IndexStore::with_index(dir.path(), manifest(), |index| async move {
        Ok(index.len().await)
    })
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn dropped_handle_flushes_pending_changes() {
    let dir = TempDir::new().unwrap();
    {
        let handle = IndexStore::open(dir.path(), manifest()).await.unwrap();
        handle.index().upsert(vec![entry("a", 0, vec![0.0, 0.0, 1.0])]).await.unwrap();
    }
    let index = IndexStore::load(dir.path(), manifest()).await.unwrap();
    assert_eq!(index.len().await, 1);
    IndexStore::open(dir.path(), manifest()).await.unwrap().close().await.unwrap();
}

#[tokio::test]
async fn a_locked_directory_cannot_be_opened_twice() {
    let dir = TempDir::new().unwrap();
    let first = IndexStore::open(dir.path(), manifest()).await.unwrap();
    let err = IndexStore::open(dir.path(), manifest()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VectorStoreError);
    first.close().await.unwrap();
    IndexStore::open(dir.path(), manifest()).await.unwrap().close().await.unwrap();
}

#[tokio::test]
async fn opening_with_another_model_is_corruption() {
    let dir = TempDir::new().unwrap();
    IndexStore::with_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0])]).await
    })
    .await
    .unwrap();

    let err = IndexStore::open(dir.path(), IndexManifest::new("other-model", 3)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexCorruption);
    let err = IndexStore::open(dir.path(), IndexManifest::new("test-model", 4)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexCorruption);

    // A failed open releases the lock.
    IndexStore::open(dir.path(), manifest()).await.unwrap().close().await.unwrap();
}

#[tokio::test]
async fn damaged_files_are_corruption() {
    let dir = TempDir::new().unwrap();
    IndexStore::with_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0])]).await
    })
    .await
    .unwrap();

    let entries = current_entries(dir.path());
    std::fs::write(&entries, b"[{\"chunk\": ").unwrap();
    let err = IndexStore::load(dir.path(), manifest()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexCorruption);

    std::fs::write(&entries, b"[]").unwrap();
    let err = IndexStore::load(dir.path(), manifest()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexCorruption);
}

#[tokio::test]
async fn fresh_directory_starts_empty_and_writes_a_manifest() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("nested").join("index");
    let handle = IndexStore::open(&target, manifest()).await.unwrap();
    assert!(handle.index().is_empty().await);
    handle.close().await.unwrap();

    let stored = stored_manifest(&target);
    assert_eq!(stored["model_id"], "test-model");
    assert_eq!(stored["dimensions"], 3);
    assert_eq!(stored["entry_count"], 0);
}

#[tokio::test]
async fn lock_file_left_by_a_killed_process_does_not_block_reopening() {
    let dir = TempDir::new().unwrap();
    IndexStore::with_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0])]).await
    })
    .await
    .unwrap();

    // A process that dies mid-command leaves the lock file behind but holds no OS lock.
    std::fs::write(dir.path().join(".lock"), b"").unwrap();

    let handle = IndexStore::open(dir.path(), manifest()).await.unwrap();
    assert_eq!(handle.index().len().await, 1);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn readers_share_the_directory_but_exclude_writers() {
    let dir = TempDir::new().unwrap();
    IndexStore::with_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0])]).await
    })
    .await
    .unwrap();

    let first = IndexStore::open_shared(dir.path(), manifest()).await.unwrap();
    let second = IndexStore::open_shared(dir.path(), manifest()).await.unwrap();
    assert!(first.is_shared());
    assert_eq!(second.index().len().await, 1);

    let err = IndexStore::open(dir.path(), manifest()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VectorStoreError);

    first.close().await.unwrap();
    second.close().await.unwrap();

    let writer = IndexStore::open(dir.path(), manifest()).await.unwrap();
    let err = IndexStore::open_shared(dir.path(), manifest()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VectorStoreError);
    writer.close().await.unwrap();
}

#[tokio::test]
async fn shared_handles_never_write() {
    let dir = TempDir::new().unwrap();

    // An untouched shared handle on a fresh directory closes cleanly.
    IndexStore::open_shared(dir.path(), manifest()).await.unwrap().close().await.unwrap();
    assert!(!dir.path().join("manifest.json").exists());

    let result = IndexStore::with_shared_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0])]).await
    })
    .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::VectorStoreError);
    assert!(!dir.path().join("manifest.json").exists());
}

#[tokio::test]
async fn interrupted_flush_keeps_the_previous_generation_readable() {
    let dir = TempDir::new().unwrap();
    IndexStore::with_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("a", 0, vec![1.0, 0.0, 0.0])]).await
    })
    .await
    .unwrap();
    let first_manifest = std::fs::read(dir.path().join("manifest.json")).unwrap();

    IndexStore::with_index(dir.path(), manifest(), |index| async move {
        index.upsert(vec![entry("b", 0, vec![0.0, 1.0, 0.0])]).await
    })
    .await
    .unwrap();

    // A crash after the new entries were written but before the manifest
    // was replaced leaves the old manifest in place.
    std::fs::write(dir.path().join("manifest.json"), &first_manifest).unwrap();
    let index = IndexStore::load(dir.path(), manifest()).await.unwrap();
    assert_eq!(index.len().await, 1);

    // An orphaned newer generation is ignored and replaced by the next flush.
    std::fs::write(dir.path().join("entries-99.json"), b"[{\"chunk\": ").unwrap();
    let handle = IndexStore::open(dir.path(), manifest()).await.unwrap();
    assert_eq!(handle.index().len().await, 1);
    handle.index().upsert(vec![entry("c", 0, vec![0.0, 0.0, 1.0])]).await.unwrap();
    handle.close().await.unwrap();

    assert_eq!(IndexStore::load(dir.path(), manifest()).await.unwrap().len().await, 2);
    assert!(!dir.path().join("entries-99.json").exists());
}

#[tokio::test]
async fn only_the_current_and_previous_generations_are_kept() {
    let dir = TempDir::new().unwrap();
    for (ordinal, document) in ["a", "b", "c", "d"].into_iter().enumerate() {
        IndexStore::with_index(dir.path(), manifest(), |index| async move {
            index.upsert(vec![entry(document, ordinal, vec![1.0, 0.0, 0.0])]).await
        })
        .await
        .unwrap();
    }
    assert_eq!(entries_files(dir.path()), vec!["entries-3.json", "entries-4.json"]);
    assert_eq!(stored_manifest(dir.path())["generation"], 4);
}

#[tokio::test]
async fn manifests_without_a_generation_read_the_legacy_entries_file() {
    let dir = TempDir::new().unwrap();
    let entries = vec![entry("a", 0, vec![1.0, 0.0, 0.0])];
    std::fs::write(dir.path().join("entries.json"), serde_json::to_vec(&entries).unwrap()).unwrap();
    std::fs::write(
        dir.path().join("manifest.json"),
        serde_json::to_vec(&serde_json::json!({
            "format_version": finrag::INDEX_FORMAT_VERSION,
            "model_id": "test-model",
            "dimensions": 3,
            "entry_count": 1,
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap(),
    )
    .unwrap();

    let handle = IndexStore::open(dir.path(), manifest()).await.unwrap();
    assert_eq!(handle.index().len().await, 1);
    handle.index().upsert(vec![entry("b", 0, vec![0.0, 1.0, 0.0])]).await.unwrap();
    handle.close().await.unwrap();
    assert_eq!(entries_files(dir.path()), vec!["entries-1.json", "entries.json"]);
}

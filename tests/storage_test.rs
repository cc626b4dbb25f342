use quarry::error::{QuarryError, Result};
use quarry::shard::{ShardRouter, shard_of};
use quarry::storage::{KvStore, StorageKind};
use tempfile::TempDir;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_backends_share_semantics() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();

    for kind in [StorageKind::Log, StorageKind::Snapshot] {
        let path = temp_dir.path().join(format!("{kind}.db"));
        {
            let store = kind.open(&path)?;
            assert_eq!(store.kind(), kind);
            assert_eq!(store.get("absent")?, None);

            store.set("b", b"2")?;
            store.batch(&strings(&["a", "c"]), &[b"1".to_vec(), b"3".to_vec()])?;
            store.delete("c")?;
            store.delete("never-there")?;

            // Values come back in key order.
            assert_eq!(store.list()?, vec![b"1".to_vec(), b"2".to_vec()]);
            assert_eq!(store.count()?, 2);

            assert!(matches!(
                store.batch(&strings(&["x"]), &[]),
                Err(QuarryError::KeyValueMismatch { keys: 1, values: 0 })
            ));
            assert!(matches!(store.set("", b"v"), Err(QuarryError::EmptyKey)));
            store.close()?;
            assert!(matches!(store.get("a"), Err(QuarryError::StorageClosed)));
        }

        let store = kind.open(&path)?;
        assert_eq!(store.get("a")?, Some(b"1".to_vec()));
        assert_eq!(store.get("c")?, None);

        store.delete_all()?;
        assert_eq!(store.count()?, 0);
        store.close()?;
    }
    Ok(())
}

#[test]
fn test_shard_assignment_is_stable() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let keys: Vec<String> = (0..100).map(|i| format!("document-{i}")).collect();

    let first: Vec<usize> = keys.iter().map(|k| shard_of(k.as_bytes(), 7)).collect();
    let second: Vec<usize> = keys.iter().map(|k| shard_of(k.as_bytes(), 7)).collect();
    assert_eq!(first, second);

    // Routers opened twice over the same files agree with the pure function.
    {
        let router = ShardRouter::open(temp_dir.path(), "docs", StorageKind::Log, 7)?;
        let values = vec![b"x".to_vec(); keys.len()];
        router.batch(&keys, &values)?;
        router.close()?;
    }
    let router = ShardRouter::open(temp_dir.path(), "docs", StorageKind::Log, 7)?;
    for (key, shard) in keys.iter().zip(&first) {
        assert_eq!(router.shard_for(key), *shard);
        assert!(router.shard(*shard)?.get(key)?.is_some());
    }
    assert_eq!(router.count()?, 100);
    Ok(())
}

#[test]
fn test_router_clone_is_deep() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let source = ShardRouter::open(temp_dir.path().join("a"), "inverted", StorageKind::Snapshot, 3)?;
    source.set("k1", b"v1")?;
    source.set("k2", b"v2")?;

    source.clone_to(&temp_dir.path().join("b"))?;
    source.set("k1", b"changed")?;

    let clone = ShardRouter::open(temp_dir.path().join("b"), "inverted", StorageKind::Snapshot, 3)?;
    assert_eq!(clone.get("k1")?, Some(b"v1".to_vec()));
    assert_eq!(clone.get("k2")?, Some(b"v2".to_vec()));
    Ok(())
}

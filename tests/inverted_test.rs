use std::sync::Arc;
use std::thread;

use quarry::config::InvertedConfig;
use quarry::error::Result;
use quarry::inverted::{InvertedIndex, InvertedMode};
use quarry::shard::ShardRouter;
use quarry::storage::StorageKind;
use tempfile::TempDir;

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn open(temp_dir: &TempDir, mode: InvertedMode) -> Result<Box<dyn InvertedIndex>> {
    let router = ShardRouter::open(temp_dir.path(), "inverted", StorageKind::Log, 4)?;
    let config = InvertedConfig {
        mode,
        queue_capacity: 8,
        cache_ttl_secs: 30,
    };
    mode.open(router, &config)
}

#[test]
fn test_unmap_reverses_map_in_both_modes() -> Result<()> {
    for mode in [InvertedMode::Sync, InvertedMode::Async] {
        let temp_dir = TempDir::new().unwrap();
        let index = open(&temp_dir, mode)?;
        assert_eq!(index.mode(), mode);

        index.map_keywords(&keywords(&["other"]), "keep")?;
        index.map_keywords(&keywords(&["rust", "search", "engine"]), "doc")?;
        index.flush()?;
        assert_eq!(index.get_ids("rust")?, vec!["doc"]);

        index.unmap_keywords(&keywords(&["rust", "search", "engine"]), "doc")?;
        index.flush()?;
        for keyword in ["rust", "search", "engine"] {
            assert!(index.get_ids(keyword)?.is_empty(), "{mode}: {keyword}");
        }
        assert_eq!(index.get_ids("other")?, vec!["keep"], "{mode}");
        index.close()?;
    }
    Ok(())
}

#[test]
fn test_concurrent_mappers_lose_nothing() -> Result<()> {
    for mode in [InvertedMode::Sync, InvertedMode::Async] {
        let temp_dir = TempDir::new().unwrap();
        let index: Arc<dyn InvertedIndex> = Arc::from(open(&temp_dir, mode)?);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || -> Result<()> {
                    for i in 0..50 {
                        index.map_keywords(&keywords(&["hot", "warm"]), &format!("{t}-{i}"))?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap()?;
        }

        index.flush()?;
        assert_eq!(index.get_ids("hot")?.len(), 200, "{mode}");
        assert_eq!(index.get_ids("warm")?.len(), 200, "{mode}");
        index.close()?;
    }
    Ok(())
}

#[test]
fn test_async_close_persists_queued_work() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    {
        let index = open(&temp_dir, InvertedMode::Async)?;
        for i in 0..100 {
            index.map_keywords(&keywords(&["queued"]), &i.to_string())?;
        }
        index.close()?;
    }

    let index = open(&temp_dir, InvertedMode::Sync)?;
    assert_eq!(index.get_ids("queued")?.len(), 100);
    Ok(())
}

#[test]
fn test_clone_to_copies_lists() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let index = open(&temp_dir, InvertedMode::Async)?;
    index.map_keywords(&keywords(&["alpha", "beta"]), "1")?;
    index.map_keywords(&keywords(&["alpha"]), "2")?;

    let target = temp_dir.path().join("copy");
    index.clone_to(&target)?;
    index.close()?;

    let router = ShardRouter::open(&target, "inverted", StorageKind::Log, 4)?;
    let copy = InvertedMode::Sync.open(router, &InvertedConfig::default())?;
    assert_eq!(copy.get_ids("alpha")?, vec!["1", "2"]);
    assert_eq!(copy.get_ids("beta")?, vec!["1"]);
    Ok(())
}

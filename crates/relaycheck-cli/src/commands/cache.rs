use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use relaycheck_core::config::DEFAULT_CACHE_TTL_MS;
use relaycheck_state::CacheStore;

fn open(path: &Path) -> anyhow::Result<CacheStore> {
    anyhow::ensure!(path.exists(), "no cache database at {}", path.display());
    CacheStore::open(path, Duration::from_millis(DEFAULT_CACHE_TTL_MS))
        .with_context(|| format!("opening cache {}", path.display()))
}

pub fn prune(path: &Path, max_age_ms: u64) -> anyhow::Result<()> {
    let store = open(path)?;
    let removed = store.prune(Duration::from_millis(max_age_ms))?;
    println!("✓ Removed {removed} entries older than {max_age_ms}ms ({} left)", store.len()?);
    Ok(())
}

pub fn clear(path: &Path) -> anyhow::Result<()> {
    let removed = open(path)?.clear()?;
    println!("✓ Removed {removed} entries");
    Ok(())
}

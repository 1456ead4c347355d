//! Tag cache maintenance commands.

use std::path::PathBuf;
use tokio::runtime::Runtime;

use super::CacheAction;
use crate::config::Config;
use crate::tag_cache::TagCache;

/// Run a cache maintenance action.
///
/// The database is the `--cache-db` flag if given, else the configured
/// location. A disabled cache still resolves to its location here so it can
/// be cleared.
pub fn cmd_cache(
    rt: &Runtime,
    config: &Config,
    action: &CacheAction,
    cache_db: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let db_path = cache_db
        .cloned()
        .or_else(|| config.cache.path.clone())
        .or_else(crate::config::default_cache_path)
        .ok_or_else(|| anyhow::anyhow!("Could not determine tag cache location"))?;

    rt.block_on(async {
        let cache = TagCache::open(&db_path).await?;
        let outcome = run_action(&cache, action).await;
        cache.close().await;
        let message = outcome?;
        println!("{message}");
        Ok::<_, anyhow::Error>(())
    })
}

async fn run_action(cache: &TagCache, action: &CacheAction) -> crate::error::Result<String> {
    Ok(match action {
        CacheAction::Clear => {
            let removed = cache.clear().await?;
            format!("Removed {removed} cached entries")
        }
        CacheAction::Invalidate { paths } => {
            let removed = cache.invalidate_many(paths).await?;
            format!("Invalidated {removed} of {} paths", paths.len())
        }
        CacheAction::Stats => {
            let count = cache.len().await?;
            format!("{count} files cached")
        }
    })
}

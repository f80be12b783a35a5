//! Environment/runtime helpers
//!
//! Sanity checks to ensure expected directories exist at startup.

use std::path::Path;

use tracing::{info, warn};

/// Ensure the model repository root exists, creating it when missing.
pub async fn ensure_env(repository_root: &str) -> anyhow::Result<()> {
    if tokio::fs::metadata(repository_root).await.is_err() {
        info!(%repository_root, "creating model repository root");
    }
    tokio::fs::create_dir_all(repository_root)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {repository_root}: {e}"))?;
    Ok(())
}

/// Warn when a service repository is missing. Backends own the repository
/// contents, so a missing directory is not fatal here.
pub async fn check_repository(repository: &Path) -> bool {
    match tokio::fs::metadata(repository).await {
        Ok(meta) if meta.is_dir() => true,
        Ok(_) => {
            warn!(repository = %repository.display(), "model repository is not a directory");
            false
        }
        Err(_) => {
            warn!(repository = %repository.display(), "model repository not found; backend may fail to load data");
            false
        }
    }
}

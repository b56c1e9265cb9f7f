//! Configuration loading

use std::path::Path;

use anyhow::{Context, Result};
use rowguard_common::config::Config;

/// Load configuration from file, then apply `ROWGUARD_*` overrides
pub async fn load(path: &str) -> Result<Config> {
    let path = Path::new(path);

    let mut config = Config::load(path)
        .await
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("applying environment overrides")?;

    Ok(config)
}

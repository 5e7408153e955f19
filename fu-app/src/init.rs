//! Configuration scaffolding for `followupd init`.
//!
//! Writes the config template under `~/.followup/` without overwriting
//! existing local files.

use anyhow::Result;
use std::path::{Path, PathBuf};

pub const CONFIG_TEMPLATE: &str = include_str!("../../config-templates/config.toml");

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

pub async fn initialize_default() -> Result<InitReport> {
    initialize_config(&crate::config::default_config_path()).await
}

pub async fn initialize_config(config_path: &Path) -> Result<InitReport> {
    let root = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", config_path.display()))?
        .to_path_buf();
    tokio::fs::create_dir_all(&root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root,
        created: Vec::new(),
        skipped: Vec::new(),
    };

    match tokio::fs::metadata(config_path).await {
        Ok(_) => report.skipped.push(config_path.to_path_buf()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::write(config_path, CONFIG_TEMPLATE)
                .await
                .map_err(|e| {
                    anyhow::anyhow!("write config template {}: {e}", config_path.display())
                })?;
            report.created.push(config_path.to_path_buf());
        }
        Err(err) => {
            return Err(anyhow::anyhow!(
                "inspect config path {}: {err}",
                config_path.display()
            ));
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{CONFIG_TEMPLATE, initialize_config};

    #[tokio::test]
    async fn init_creates_template_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let report = initialize_config(&path).await.expect("init succeeds");

        assert_eq!(report.created, vec![path.clone()]);
        assert!(report.skipped.is_empty());
        let written = std::fs::read_to_string(&path).expect("read template");
        assert_eq!(written, CONFIG_TEMPLATE);
    }

    #[tokio::test]
    async fn init_is_idempotent_and_never_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nbind_addr = \"0.0.0.0:9000\"\n").expect("seed");

        let report = initialize_config(&path).await.expect("init succeeds");
        assert!(report.created.is_empty(), "existing config must be kept");
        assert_eq!(report.skipped, vec![path.clone()]);
        let kept = std::fs::read_to_string(&path).expect("read");
        assert!(kept.contains("0.0.0.0:9000"));
    }
}

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Wiping the resident version list is reversible only by background
    /// OS processes; keep the confirmation unless the user opts out.
    #[serde(default = "default_true")]
    pub confirm_wipe: bool,
    #[serde(default = "default_wait_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            confirm_wipe: true,
            wait_timeout_secs: default_wait_secs(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let dir = config_dir()?;
        fs::create_dir_all(&dir).context("create config dir")?;
        let path = dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse config")?;
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = config_dir()?;
        fs::create_dir_all(&dir).context("create config dir")?;
        let raw = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(dir.join("config.json"), raw).context("write config")?;
        Ok(())
    }
}

fn config_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("patchdeck"))
}

fn default_true() -> bool {
    true
}

fn default_wait_secs() -> u64 {
    120
}

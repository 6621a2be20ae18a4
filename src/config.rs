use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::matcher::THRESHOLD;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "facegate")
}

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEGATE_CONFIG_PATH") {
    Some(p) => PathBuf::from(p),
    None => project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/facegate/config.toml")),
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEGATE_DATA_DIR") {
    Some(p) => PathBuf::from(p),
    None => project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/usr/local/var/facegate")),
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest cosine distance accepted as a match.
    pub threshold: f32,
    pub store_path: PathBuf,
    pub events_path: PathBuf,
    /// Directory holding the YuNet and SFace ONNX files.
    pub model_dir: PathBuf,
    pub detection_score: f32,
    pub nms_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: THRESHOLD,
            store_path: DATA_DIR.join("faces.bin"),
            events_path: DATA_DIR.join("events.jsonl"),
            model_dir: DATA_DIR.join("models"),
            detection_score: 0.6,
            nms_threshold: 0.3,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 2.0) {
            anyhow::bail!("threshold must be in (0, 2], got {}", self.threshold);
        }
        if !(0.0..=1.0).contains(&self.detection_score) {
            anyhow::bail!("detection_score must be in [0, 1], got {}", self.detection_score);
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            anyhow::bail!("nms_threshold must be in [0, 1], got {}", self.nms_threshold);
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

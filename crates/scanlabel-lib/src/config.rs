use crate::store::StorePaths;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_HZ: usize = 720;
pub const DEFAULT_FPS: u32 = 60;
pub const DEFAULT_MOUSE_AREA: f64 = 0.05;
pub const CONFIG_FILE: &str = "scanlabel.toml";

/// Persisted state of a labeling session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub raw_data: PathBuf,
    pub raw_cache: PathBuf,
    pub feature_export: PathBuf,
    pub label_export: PathBuf,
    #[serde(default = "default_hz")]
    pub hz: usize,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_mouse_area")]
    pub mouse_area: f64,
    #[serde(default)]
    pub last_saved_frame: Option<usize>,
    #[serde(default)]
    pub written_max_frame: Option<usize>,
    #[serde(default)]
    pub frames_written: usize,
    pub store: StorePaths,
}

fn default_hz() -> usize {
    DEFAULT_HZ
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

fn default_mouse_area() -> f64 {
    DEFAULT_MOUSE_AREA
}

impl SessionConfig {
    /// Defaults with every file placed under `root`.
    pub fn default_in(root: &Path) -> Self {
        Self {
            raw_data: root.join("raw_data.txt"),
            raw_cache: root.join("raw_data_bin"),
            feature_export: root.join("feature_data.txt"),
            label_export: root.join("label_data.txt"),
            hz: DEFAULT_HZ,
            fps: DEFAULT_FPS,
            mouse_area: DEFAULT_MOUSE_AREA,
            last_saved_frame: None,
            written_max_frame: None,
            frames_written: 0,
            store: StorePaths::in_dir(root),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: SessionConfig =
            toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Read `path`, or write a default config rooted at `root` when the file
    /// is missing or empty.
    pub fn load_or_create(path: &Path, root: &Path) -> Result<Self> {
        let missing = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        if !missing {
            return Self::load(path);
        }
        fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
        let config = Self::default_in(root);
        config.save(path)?;
        info!("wrote default config to {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, text).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    pub fn store_paths(&self) -> &StorePaths {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_default_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = SessionConfig::load_or_create(&path, dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(config.hz, DEFAULT_HZ);
        assert_eq!(config.store.label_sizes, dir.path().join("label_num_bin"));
        assert_eq!(config.last_saved_frame, None);
    }

    #[test]
    fn counters_survive_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = SessionConfig::default_in(dir.path());
        config.hz = 360;
        config.last_saved_frame = Some(4);
        config.written_max_frame = Some(9);
        config.frames_written = 3;
        config.save(&path).unwrap();

        let loaded = SessionConfig::load_or_create(&path, Path::new("/unused")).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_tuning_fields_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let text = r#"
raw_data = "a.txt"
raw_cache = "a.bin"
feature_export = "f.txt"
label_export = "l.txt"

[store]
feature_data = "fb"
feature_sizes = "fn"
label_data = "lb"
label_sizes = "ln"
"#;
        fs::write(&path, text).unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.fps, DEFAULT_FPS);
        assert_eq!(config.mouse_area, DEFAULT_MOUSE_AREA);
        assert_eq!(config.frames_written, 0);
        assert_eq!(config.store.label_data, PathBuf::from("lb"));
    }

    #[test]
    fn malformed_config_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "hz = [").unwrap();
        let err = SessionConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
    }
}

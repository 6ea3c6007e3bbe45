//! Runtime configuration for a BigHeads node, persisted as `config.json`
//! under the storage root (spec §6).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::helpers::{node_id_from_seed, random_id_128};

fn default_node_id() -> String {
    node_id_from_seed(&random_id_128())
}

fn default_ttl() -> u32 {
    12
}

fn default_scan_interval_sec() -> f64 {
    7.0
}

fn default_scan_window_sec() -> f64 {
    4.0
}

fn default_max_connections() -> usize {
    8
}

fn default_packet_size_limit() -> usize {
    380
}

fn default_seen_lru_limit() -> usize {
    50_000
}

fn default_group_passphrase() -> String {
    "change-me".to_string()
}

fn default_true() -> bool {
    true
}

fn default_theme_mode() -> String {
    "system".to_string()
}

fn default_autosave_sec() -> u64 {
    30
}

fn default_max_inline_file_bytes() -> usize {
    2 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_ttl")]
    pub ttl_default: u32,
    #[serde(default = "default_scan_interval_sec")]
    pub scan_interval_sec: f64,
    #[serde(default = "default_scan_window_sec")]
    pub scan_window_sec: f64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_packet_size_limit")]
    pub packet_size_limit: usize,
    #[serde(default = "default_seen_lru_limit")]
    pub seen_lru_limit: usize,
    #[serde(default = "default_group_passphrase")]
    pub group_passphrase: String,
    #[serde(default = "default_true")]
    pub auto_theme: bool,
    #[serde(default = "default_theme_mode")]
    pub theme_mode: String,
    #[serde(default = "default_autosave_sec")]
    pub autosave_sec: u64,
    #[serde(default = "default_max_inline_file_bytes")]
    pub max_inline_file_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            ttl_default: default_ttl(),
            scan_interval_sec: default_scan_interval_sec(),
            scan_window_sec: default_scan_window_sec(),
            max_connections: default_max_connections(),
            packet_size_limit: default_packet_size_limit(),
            seen_lru_limit: default_seen_lru_limit(),
            group_passphrase: default_group_passphrase(),
            auto_theme: default_true(),
            theme_mode: default_theme_mode(),
            autosave_sec: default_autosave_sec(),
            max_inline_file_bytes: default_max_inline_file_bytes(),
        }
    }
}

impl Config {
    /// Load from `path`, writing out a freshly-generated default config if
    /// the file does not exist or fails to parse.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Ok(cfg) = serde_json::from_str::<Config>(&raw) {
                return Ok(cfg);
            }
        }
        let cfg = Config::default();
        cfg.save(path)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self).expect("Config always serializes");
        std::fs::write(path, payload)
    }
}

/// A node's storage root: a per-user directory holding `bigheads.db`,
/// `config.json`, and `exports/` (spec §6).
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("bigheads.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.ttl_default, 12);
        assert_eq!(cfg.packet_size_limit, 380);
    }

    #[test]
    fn load_roundtrips_saved_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = Config::default();
        cfg.group_passphrase = "super-secret".to_string();
        cfg.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.group_passphrase, "super-secret");
    }

    #[test]
    fn storage_root_paths() {
        let root = StorageRoot::new("/home/user/.bigheads");
        assert_eq!(root.db_path(), Path::new("/home/user/.bigheads/bigheads.db"));
        assert_eq!(root.config_path(), Path::new("/home/user/.bigheads/config.json"));
        assert_eq!(root.exports_dir(), Path::new("/home/user/.bigheads/exports"));
    }
}

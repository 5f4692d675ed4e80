//! Application configuration
//!
//! Handles loading the partition mounts, remote mounts and install options
//! from config.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::fs::Partition;

/// Global application config
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application config
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get_or_init(AppConfig::load)
}

/// Root application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub partitions: PartitionMounts,
    #[serde(default)]
    pub remote_mounts: Vec<RemoteMount>,
    #[serde(default)]
    pub ticket: TicketConfig,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub nacp: NacpConfig,
}

/// Host directory emulating a partition
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Directory holding the partition contents
    pub root: PathBuf,
    /// Total capacity in bytes
    pub capacity: u64,
}

impl MountConfig {
    fn new(root: &str, capacity: u64) -> Self {
        Self {
            root: PathBuf::from(root),
            capacity,
        }
    }
}

/// Mounts of every partition
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PartitionMounts {
    #[serde(default = "default_sd_card")]
    pub sd_card: MountConfig,
    #[serde(default = "default_nand_user")]
    pub nand_user: MountConfig,
    #[serde(default = "default_nand_system")]
    pub nand_system: MountConfig,
    #[serde(default = "default_nand_safe")]
    pub nand_safe: MountConfig,
    #[serde(default = "default_prodinfof")]
    pub prodinfof: MountConfig,
}

const GIB: u64 = 1024 * 1024 * 1024;

fn default_sd_card() -> MountConfig {
    MountConfig::new("nxroot/sdmc", 64 * GIB)
}

fn default_nand_user() -> MountConfig {
    MountConfig::new("nxroot/user", 26 * GIB)
}

fn default_nand_system() -> MountConfig {
    MountConfig::new("nxroot/system", 2560 * 1024 * 1024)
}

fn default_nand_safe() -> MountConfig {
    MountConfig::new("nxroot/safe", 64 * 1024 * 1024)
}

fn default_prodinfof() -> MountConfig {
    MountConfig::new("nxroot/prodinfof", 4 * 1024 * 1024)
}

impl Default for PartitionMounts {
    fn default() -> Self {
        Self {
            sd_card: default_sd_card(),
            nand_user: default_nand_user(),
            nand_system: default_nand_system(),
            nand_safe: default_nand_safe(),
            prodinfof: default_prodinfof(),
        }
    }
}

impl PartitionMounts {
    /// Mount of a partition
    pub fn get(&self, partition: Partition) -> &MountConfig {
        match partition {
            Partition::SdCard => &self.sd_card,
            Partition::NANDUser => &self.nand_user,
            Partition::NANDSystem => &self.nand_system,
            Partition::NANDSafe => &self.nand_safe,
            Partition::PRODINFOF => &self.prodinfof,
        }
    }
}

/// Remote host drive served from a host directory
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RemoteMount {
    /// Drive name (e.g. `C:`)
    pub name: String,
    pub root: PathBuf,
}

/// Ticket import configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TicketConfig {
    /// Certificate chain blob used for standalone ticket imports
    #[serde(default)]
    pub certificate_chain: Option<PathBuf>,
}

/// Package installation options
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstallConfig {
    /// Check content archive names against their SHA-256
    #[serde(default = "default_verify_content_hashes")]
    pub verify_content_hashes: bool,
    /// Block size used when streaming content
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_verify_content_hashes() -> bool {
    true
}

fn default_block_size() -> usize {
    0x100000
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            verify_content_hashes: default_verify_content_hashes(),
            block_size: default_block_size(),
        }
    }
}

/// Application control data viewer options
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NacpConfig {
    /// Preferred language slot
    #[serde(default = "default_language")]
    pub language: usize,
}

fn default_language() -> usize {
    // American English
    0
}

impl Default for NacpConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config.json
    pub fn load() -> Self {
        // Try to load from current directory first
        if let Ok(config) = Self::load_from_path("config.json") {
            log::info!("Loaded config from ./config.json");
            return config;
        }

        // Try to load from executable directory
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join("config.json");
                if let Ok(config) = Self::load_from_path(&config_path) {
                    log::info!("Loaded config from {}", config_path.display());
                    return config;
                }
            }
        }

        log::info!("No config.json found, using defaults");
        Self::default()
    }

    /// Load configuration from an explicit file
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Find a remote mount by name, ignoring a trailing colon
    pub fn remote_mount(&self, name: &str) -> Option<&RemoteMount> {
        let wanted = name.trim_end_matches(['/', ':']);
        self.remote_mounts
            .iter()
            .find(|mount| mount.name.trim_end_matches(['/', ':']).eq_ignore_ascii_case(wanted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.partitions.get(Partition::SdCard).root, PathBuf::from("nxroot/sdmc"));
        assert!(config.install.verify_content_hashes);
        assert_eq!(config.install.block_size, 0x100000);
        assert!(config.ticket.certificate_chain.is_none());
        assert!(config.remote_mounts.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "partitions": { "sd_card": { "root": "/media/sd", "capacity": 1000 } },
                "remote_mounts": [ { "name": "C:", "root": "/home/user" } ],
                "install": { "verify_content_hashes": false }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.partitions.sd_card.capacity, 1000);
        assert_eq!(config.partitions.nand_user, default_nand_user());
        assert!(!config.install.verify_content_hashes);
        assert_eq!(config.install.block_size, 0x100000);
        assert_eq!(config.remote_mount("c").map(|m| m.root.clone()), Some(PathBuf::from("/home/user")));
        assert!(config.remote_mount("D:").is_none());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load_from_path(&path).is_err());
    }
}

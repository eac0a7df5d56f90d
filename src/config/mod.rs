//! # Configuration Management
//!
//! Twilight BBS loads a single TOML file at startup. Sections map to the
//! subsystems they configure:
//!
//! - [`ServerConfig`] - network listener ports
//! - [`BbsIdentityConfig`] - BBS name, sysop, node capacity
//! - [`PathsConfig`] - asset and data directories
//! - [`DoorsGlobalConfig`] - dosemu integration paths
//! - [`DoorConfig`] - one entry per installed door (`[[doors]]`)
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ```toml
//! [bbs]
//! name = "Twilight BBS"
//! sysop = "sysop"
//! max_nodes = 8
//!
//! [server]
//! telnet_port = 2323
//! ssh_port = 2222
//! health_port = 2223
//!
//! [[doors]]
//! name = "DARKNESS"
//! command = "C:\\DOORS\\DARKNESS\\START.BAT {NODE}"
//! drop_file = "DOOR.SYS"
//! min_level = 20
//! multiuser = false
//! ```
//!
//! All values have defaults; `twilightbbs init` writes a commented default
//! file next to the binary.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bbs: BbsIdentityConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub door_engine: DoorsGlobalConfig,
    #[serde(default)]
    pub doors: Vec<DoorConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbsIdentityConfig {
    pub name: String,
    pub sysop: String,
    /// Maximum concurrent nodes (live sessions).
    pub max_nodes: u32,
}

impl Default for BbsIdentityConfig {
    fn default() -> Self {
        Self {
            name: "Twilight BBS".to_string(),
            sysop: "Sysop".to_string(),
            max_nodes: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub telnet_port: u16,
    pub ssh_port: u16,
    pub health_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            telnet_port: 2323,
            ssh_port: 2222,
            health_port: 2223,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory scanned for menu triplets (.ans/.asc/.lua).
    pub menus: String,
    /// Additional directory searched for display files by name.
    pub text: String,
    /// Data directory: sled database, SSH host keys, door temp dirs.
    pub data: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            menus: "./assets/menus".to_string(),
            text: "./assets/text".to_string(),
            data: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorsGlobalConfig {
    pub dosemu_path: String,
    pub drive_c: String,
}

impl Default for DoorsGlobalConfig {
    fn default() -> Self {
        Self {
            dosemu_path: "/usr/bin/dosemu".to_string(),
            drive_c: "./doors/drive_c".to_string(),
        }
    }
}

/// A single installed door. `command` may contain `{NODE}` and `{DROP}`
/// placeholders, substituted at launch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub description: String,
    /// "DOOR.SYS" (default) or "DORINFO1.DEF".
    #[serde(default = "default_drop_file")]
    pub drop_file: String,
    #[serde(default)]
    pub min_level: i64,
    #[serde(default)]
    pub multiuser: bool,
}

fn default_drop_file() -> String {
    "DOOR.SYS".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("twilightbbs.log".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bbs: BbsIdentityConfig::default(),
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            door_engine: DoorsGlobalConfig::default(),
            doors: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Look up a configured door by case-insensitive name.
    pub fn find_door(&self, name: &str) -> Option<&DoorConfig> {
        self.doors
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_classic_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.server.telnet_port, 2323);
        assert_eq!(cfg.server.ssh_port, 2222);
        assert_eq!(cfg.server.health_port, 2223);
        assert_eq!(cfg.bbs.max_nodes, 8);
    }

    #[test]
    fn parses_door_entries() {
        let cfg: Config = toml::from_str(
            r#"
            [[doors]]
            name = "DARKNESS"
            command = "C:\\DOORS\\DARK\\START.BAT {NODE}"
            min_level = 20

            [[doors]]
            name = "TradeWars"
            command = "TW2002 {DROP}"
            drop_file = "DORINFO1.DEF"
            multiuser = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.doors.len(), 2);
        assert_eq!(cfg.doors[0].drop_file, "DOOR.SYS");
        assert!(!cfg.doors[0].multiuser);
        assert!(cfg.doors[1].multiuser);
        assert!(cfg.find_door("darkness").is_some());
        assert!(cfg.find_door("  TRADEWARS ").is_some());
        assert!(cfg.find_door("nope").is_none());
    }
}

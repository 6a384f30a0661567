//! Stored broker configuration.
//!
//! The configuration is a YAML rendering of [`ClientConfig`] kept at
//! ~/.mqttws/config.yaml. Missing fields fall back to the library defaults,
//! so a file holding only `host:` is valid.

use std::path::{Path, PathBuf};

use mqttws::ClientConfig;

/// Default configuration directory name.
pub const DEFAULT_DIR: &str = ".mqttws";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Broker configuration and the file it was loaded from.
#[derive(Debug, Clone)]
pub struct Store {
    pub client: ClientConfig,
    path: PathBuf,
}

impl Store {
    /// Gets the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_DIR).join(DEFAULT_CONFIG_FILE))
    }

    /// Returns the config file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves the configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(&self.client)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Replaces the configuration with defaults and saves it.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.client = ClientConfig::default();
        self.save()
    }
}

/// Loads the configuration, creating a default file on first use.
///
/// A generated client id is persisted with the defaults so later runs keep
/// the same identity.
pub fn load_config(custom_path: Option<&str>) -> anyhow::Result<Store> {
    let path = match custom_path {
        Some(p) => PathBuf::from(p),
        None => Store::default_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path"))?,
    };

    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let client: ClientConfig = if content.trim().is_empty() {
            ClientConfig::default()
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("parse {}: {}", path.display(), e))?
        };
        return Ok(Store { client, path });
    }

    let store = Store {
        client: ClientConfig::default(),
        path,
    };
    store.save()?;
    Ok(store)
}

/// Masks a secret for display.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 4), tail)
    }
}

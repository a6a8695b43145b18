//=============================================
// chainbridge/src/config.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Host configuration values
// Objective: Load TOML data with defaults for every missing key
//=============================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::abi::ABI_VERSION;

//=============================================
// SECTION: Data Model
//=============================================

/// Settings used to connect a host to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capability table version requested from the runtime.
    pub abi_version: u32,
    /// Shared library to load. The in-process runtime is used when unset.
    pub library: Option<PathBuf>,
    /// Search path handed to the script environment.
    pub script_path: String,
    /// Tracing filter directive.
    pub log_filter: String,
    /// Frames the CLI advances before exiting.
    pub ticks: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            abi_version: ABI_VERSION,
            library: None,
            script_path: ".".into(),
            log_filter: "info".into(),
            ticks: 1,
        }
    }
}

//=============================================
// SECTION: IO Helpers
//=============================================

impl BridgeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid bridge configuration")
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("failed to parse {}", path.display()))
    }
}

//=============================================
// SECTION: Tests
//=============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = BridgeConfig::from_toml_str("").expect("parse");
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "abi_version = 0x20200101").expect("write");
        writeln!(file, "script_path = \"scripts\"").expect("write");
        writeln!(file, "ticks = 5").expect("write");
        let config = BridgeConfig::load_from_file(file.path()).expect("load");
        assert_eq!(config.abi_version, ABI_VERSION);
        assert_eq!(config.script_path, "scripts");
        assert_eq!(config.ticks, 5);
        assert_eq!(config.log_filter, "info");
        assert!(config.library.is_none());
    }

    #[test]
    fn bad_types_are_rejected() {
        assert!(BridgeConfig::from_toml_str("ticks = \"many\"").is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = BridgeConfig::load_from_file("/nonexistent/bridge.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bridge.toml"));
    }
}

//! Loading vehicle tables and poller settings from JSON
//!
//! A vehicle file looks like this:
//!
//! ```json
//! {
//!     "profile": { "model": "IONIQ_BEV", "capacity_kwh": 28.0 },
//!     "poll": { "interval_ms": 5000 },
//!     "commands": [
//!         {
//!             "command": "2101", "rx_id": 2028, "tx_id": 2020,
//!             "fields": [
//!                 { "repeat_count": 6 },
//!                 { "name": "SOC_BMS", "scale": 0.5 }
//!             ]
//!         }
//!     ]
//! }
//! ```
//!
//! Every table is validated while loading, so a broken file is rejected before
//! the first poll.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    command::CommandSpec,
    layout::LayoutError,
    poller::{PollConfig, VehicleProfile},
};

/// Serializes request bytes as a hex string (`"22b002"`)
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serializes `bytes` as lower case hex
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    /// Deserializes a hex string. Whitespace between bytes is ignored
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(&compact).map_err(|e| D::Error::custom(format!("invalid hex '{s}': {e}")))
    }
}

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// IO error
        #[source]
        source: std::io::Error,
    },
    /// Malformed JSON
    #[error("Invalid configuration JSON")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),
    /// The vehicle table is inconsistent
    #[error("Invalid vehicle table")]
    Layout(
        #[from]
        #[source]
        LayoutError,
    ),
}

/// Everything needed to poll one vehicle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleFile {
    /// Static vehicle data
    #[serde(default)]
    pub profile: VehicleProfile,
    /// Poll timing
    #[serde(default)]
    pub poll: PollConfig,
    /// Vehicle table
    pub commands: Vec<CommandSpec>,
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_all(commands: &[CommandSpec]) -> Result<(), ConfigError> {
    for c in commands {
        c.validate()?;
    }
    Ok(())
}

/// Parses a vehicle table (JSON array of commands)
pub fn load_tables_from_str(json: &str) -> Result<Vec<CommandSpec>, ConfigError> {
    let commands: Vec<CommandSpec> = serde_json::from_str(json)?;
    validate_all(&commands)?;
    log::debug!("Loaded vehicle table with {} command(s)", commands.len());
    Ok(commands)
}

/// Reads a vehicle table (JSON array of commands) from a file
pub fn load_tables_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<CommandSpec>, ConfigError> {
    load_tables_from_str(&read(path.as_ref())?)
}

/// Parses a complete vehicle file
pub fn load_vehicle_from_str(json: &str) -> Result<VehicleFile, ConfigError> {
    let file: VehicleFile = serde_json::from_str(json)?;
    validate_all(&file.commands)?;
    Ok(file)
}

/// Reads a complete vehicle file
pub fn load_vehicle_from_file<P: AsRef<Path>>(path: P) -> Result<VehicleFile, ConfigError> {
    load_vehicle_from_str(&read(path.as_ref())?)
}

impl PollConfig {
    /// Parses poller settings, missing keys use their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Serializes a vehicle table as pretty printed JSON
pub fn tables_to_string(commands: &[CommandSpec]) -> Result<String, ConfigError> {
    Ok(serde_json::to_string_pretty(commands)?)
}

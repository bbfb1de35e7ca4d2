// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Static agent configuration.
//!
//! Loaded from a YAML file once at startup; there is no reload. The loaded
//! struct is passed by reference into the discovery orchestrator and the
//! port monitor, never stored in a global.

#![deny(clippy::all, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },
}

/// One managed switch: interface name to its device memory path.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SwitchEntry {
    /// Path to the switch's memory-mapped register file.
    pub memory_path: PathBuf,
}

/// The agent's startup configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct AgentConfig {
    /// Managed switches keyed by interface name.
    #[serde(default)]
    pub switches: BTreeMap<String, SwitchEntry>,
    /// Port monitor wake interval.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Override for the PCI device directory. `None` uses the system bus.
    #[serde(default)]
    pub bus_path: Option<PathBuf>,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for AgentConfig {
    fn default() -> AgentConfig {
        AgentConfig {
            switches: BTreeMap::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            bus_path: None,
        }
    }
}

impl AgentConfig {
    /// Reads and deserializes the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<AgentConfig, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig =
            serde_yaml_ng::from_str(&yaml).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            switches = config.switches.len(),
            poll_interval_secs = config.poll_interval_secs,
            "loaded agent configuration"
        );
        Ok(config)
    }

    /// The port monitor wake interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn full_file_round_trips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            concat!(
                "switches:\n",
                "  pcieswitch0:\n",
                "    memory_path: /sys/bus/pci/devices/0000:01:00.1/resource0\n",
                "poll_interval_secs: 5\n",
                "bus_path: /tmp/fake-pci\n",
            )
        )
        .unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.bus_path, Some(PathBuf::from("/tmp/fake-pci")));
        assert_eq!(
            config.switches["pcieswitch0"].memory_path,
            PathBuf::from("/sys/bus/pci/devices/0000:01:00.1/resource0")
        );
    }

    #[test]
    fn omitted_fields_take_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "switches: {{}}").unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn missing_file_and_bad_yaml_are_distinct_errors() {
        assert!(matches!(
            AgentConfig::load("/nonexistent/fabricd.yaml"),
            Err(ConfigError::Read { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "switches: [not, a, map]").unwrap();
        assert!(matches!(
            AgentConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Accelerator configuration, as read from a TOML document.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpuid::{ProfileName, Topology};

/// Capacity of the memory slot table when none is configured.
pub const DEFAULT_SLOTS: usize = 32;
/// Upper bound on the configurable slot table capacity.
pub const MAX_SLOTS: usize = 512;

#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub accel: AccelConfig,
    #[serde(default)]
    pub topology: Topology,
}

#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AccelConfig {
    /// Number of guest memory slots the hypervisor mapping table holds.
    #[serde(default = "default_slots")]
    pub slots: usize,

    #[serde(default)]
    pub cpu_profile: ProfileName,

    /// How long a vCPU yields after a triple fault before returning to the
    /// scheduler.
    #[serde(default = "default_backoff")]
    pub triple_fault_backoff_ms: u64,
}

fn default_slots() -> usize {
    DEFAULT_SLOTS
}

fn default_backoff() -> u64 {
    100
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            cpu_profile: ProfileName::default(),
            triple_fault_backoff_ms: default_backoff(),
        }
    }
}

impl AccelConfig {
    pub fn triple_fault_backoff(&self) -> Duration {
        Duration::from_millis(self.triple_fault_backoff_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),

    #[error("slot table capacity {0} is outside 1..=512")]
    SlotCapacity(usize),

    #[error("topology of {cores} cores x {threads} threads is not supported")]
    Topology { cores: u8, threads: u8 },
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SLOTS).contains(&self.accel.slots) {
            return Err(ConfigError::SlotCapacity(self.accel.slots));
        }
        let Topology { cores, threads } = self.topology;
        let count = self.topology.logical_count();
        if count == 0 || count > u32::from(u8::MAX) {
            return Err(ConfigError::Topology { cores, threads });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.accel.slots, 32);
        assert_eq!(config.accel.cpu_profile, ProfileName::VmX);
        assert_eq!(config.topology.logical_count(), 1);
        assert_eq!(
            config.accel.triple_fault_backoff(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn full_document() {
        let config = Config::from_toml_str(
            r#"
            [accel]
            slots = 64
            cpu_profile = "core2duo"
            triple_fault_backoff_ms = 5

            [topology]
            cores = 4
            threads = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.accel.slots, 64);
        assert_eq!(config.accel.cpu_profile, ProfileName::Core2Duo);
        assert_eq!(config.topology.logical_count(), 8);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_toml_str("[accel]\nslots = 0\n"),
            Err(ConfigError::SlotCapacity(0))
        ));
        assert!(matches!(
            Config::from_toml_str("[topology]\ncores = 0\n"),
            Err(ConfigError::Topology { .. })
        ));
        assert!(matches!(
            Config::from_toml_str("[topology]\ncores = 64\nthreads = 8\n"),
            Err(ConfigError::Topology { .. })
        ));
        assert!(matches!(
            Config::from_toml_str("[accel]\ncpu_profile = \"pentium\"\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[accel]\nbogus = 1\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}

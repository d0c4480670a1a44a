//! Simulation configuration.
//!
//! Everything a run needs is collected in [`SimConfig`], which is built once at startup
//! (from defaults, an optional JSON file and command line overrides) and passed down.

use std::{net::Ipv4Addr, path::Path};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::launch::LaunchConfig;

/// Default number of parties.
pub const DEFAULT_PARTIES: u32 = 5;

/// Valid number of parties.
pub const PARTY_RANGE: std::ops::RangeInclusive<u32> = 2..=29;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Number of parties must be within {min}..={max}, got {got}")]
    PartyCount { got: u32, min: u32, max: u32 },
    #[error("Loss must be a percentage, got {0}")]
    Loss(u8),
    #[error("Bandwidth must be positive and finite, got {0}")]
    Bandwidth(f64),
    #[error("Jitter {0} needs a delay")]
    JitterWithoutDelay(String),
    #[error("Subnet {subnet} has room for {room} hosts, {needed} needed")]
    Subnet {
        subnet: Ipv4Net,
        room: u64,
        needed: u32,
    },
    #[error("Invalid name '{0}'")]
    Name(String),
    #[error("Launch command needs a program")]
    NoProgram,
    #[error("Could not read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Number of parties, always within [`PARTY_RANGE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PartyCount(u32);

impl PartyCount {
    pub fn new(n: u32) -> Result<Self, ConfigError> {
        if PARTY_RANGE.contains(&n) {
            Ok(Self(n))
        } else {
            Err(ConfigError::PartyCount {
                got: n,
                min: *PARTY_RANGE.start(),
                max: *PARTY_RANGE.end(),
            })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for PartyCount {
    fn default() -> Self {
        Self(DEFAULT_PARTIES)
    }
}

impl TryFrom<u32> for PartyCount {
    type Error = ConfigError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<PartyCount> for u32 {
    fn from(n: PartyCount) -> Self {
        n.0
    }
}

/// Shaping applied to every host-switch link.
///
/// Mirrors the usual traffic-control link options: bandwidth in Mbit/s,
/// netem delay/jitter (e.g. `"1.0ms"`), loss in percent and queue length in packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub bandwidth: Option<f64>,
    pub delay: Option<String>,
    pub jitter: Option<String>,
    pub loss: u8,
    pub max_queue_size: Option<u32>,
    pub use_htb: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bandwidth: None,
            delay: Some("1.0ms".to_owned()),
            jitter: None,
            loss: 0,
            max_queue_size: None,
            use_htb: true,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loss > 100 {
            return Err(ConfigError::Loss(self.loss));
        }
        if let (None, Some(jitter)) = (&self.delay, &self.jitter) {
            return Err(ConfigError::JitterWithoutDelay(jitter.clone()));
        }
        match self.bandwidth {
            Some(bw) if !bw.is_finite() || bw <= 0.0 => Err(ConfigError::Bandwidth(bw)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub parties: PartyCount,
    pub link: LinkConfig,
    pub subnet: Ipv4Net,
    pub switch: String,
    pub launch: LaunchConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            parties: PartyCount::default(),
            link: LinkConfig::default(),
            subnet: Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8).expect("prefix is at most 32"),
            switch: "s1".to_owned(),
            launch: LaunchConfig::default(),
        }
    }
}

impl SimConfig {
    /// Read a configuration from a JSON file, missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()?;

        let needed = self.parties.get();
        let room = host_room(&self.subnet);
        if room < needed as u64 {
            return Err(ConfigError::Subnet {
                subnet: self.subnet,
                room,
                needed,
            });
        }

        // Interface names are `<switch>-eth<N>`, which must fit into IFNAMSIZ.
        let valid_name = |name: &str| {
            !name.is_empty()
                && name.len() <= 8
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !valid_name(&self.switch) {
            return Err(ConfigError::Name(self.switch.clone()));
        }

        self.launch.validate()
    }
}

/// Usable host addresses in a subnet.
fn host_room(subnet: &Ipv4Net) -> u64 {
    let size = 1u64 << (32 - subnet.prefix_len());
    match subnet.prefix_len() {
        32 => 1,
        31 => 2,
        _ => size - 2,
    }
}

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod emulator;
pub mod launch;
pub mod party;
pub mod simulation;
pub mod topology;

#[cfg(test)]
mod testing;

pub use config::SimConfig;
pub use emulator::{netns::NetnsEmulator, Emulator};
pub use party::{build_config, PartyId, PeerConfig, PeerList};
pub use simulation::{Simulation, SimulationError};

//! Network emulation backends.
//!
//! An [`Emulator`] turns a [`SingleSwitchTopo`] into something parties can run in,
//! and runs them. Implementations keep track of every process they spawn,
//! so that [`Emulator::stop`] can kill exactly those before tearing the network down.

use std::error::Error;

use serde::{Deserialize, Serialize};

use crate::topology::{Host, SingleSwitchTopo};

pub mod netns;

/// Result of pinging every host from every other host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReport {
    pub sent: usize,
    pub received: usize,
}

impl PingReport {
    /// Percentage of pings that were dropped.
    pub fn dropped(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        100.0 * (self.sent - self.received) as f64 / self.sent as f64
    }
}

#[allow(async_fn_in_trait)]
pub trait Emulator {
    type Error: Error + Send + Sync + 'static;

    /// Prepare the topology, returning its hosts in order.
    async fn create_topology(&mut self, topo: &SingleSwitchTopo) -> Result<Vec<Host>, Self::Error>;

    /// Bring the prepared network up.
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Start `argv` inside `host`, returning the process id if there is one.
    ///
    /// Does not wait for the process to become ready.
    async fn spawn_process(&mut self, host: &Host, argv: &[String]) -> Result<Option<u32>, Self::Error>;

    /// Kill every spawned process and tear the network down.
    ///
    /// Best-effort: keeps going after a failure and reports the first one.
    async fn stop(&mut self) -> Result<(), Self::Error>;

    /// Check connectivity between all hosts, `None` if the backend cannot.
    async fn ping_all(&mut self) -> Result<Option<PingReport>, Self::Error> {
        Ok(None)
    }
}

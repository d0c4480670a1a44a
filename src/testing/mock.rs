use thiserror::Error;

use crate::{
    emulator::{Emulator, PingReport},
    topology::{Host, SingleSwitchTopo},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateTopology(usize),
    Start,
    Spawn { host: String, argv: Vec<String> },
    Stop,
    PingAll,
}

#[derive(Error, Debug)]
#[error("Mock failure: {0}")]
pub struct MockError(pub &'static str);

/// Emulator recording every call, optionally failing on request.
#[derive(Debug, Default)]
pub struct MockEmulator {
    pub calls: Vec<Call>,
    pub fail_start: bool,
    pub fail_stop: bool,
    /// Fail when spawning the party with this id.
    pub fail_spawn: Option<u32>,
}

impl MockEmulator {
    pub fn spawned(&self) -> Vec<(String, Vec<String>)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Spawn { host, argv } => Some((host.clone(), argv.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Emulator for MockEmulator {
    type Error = MockError;

    async fn create_topology(&mut self, topo: &SingleSwitchTopo) -> Result<Vec<Host>, MockError> {
        self.calls.push(Call::CreateTopology(topo.hosts.len()));
        Ok(topo.hosts.clone())
    }

    async fn start(&mut self) -> Result<(), MockError> {
        self.calls.push(Call::Start);
        if self.fail_start {
            return Err(MockError("start"));
        }
        Ok(())
    }

    async fn spawn_process(&mut self, host: &Host, argv: &[String]) -> Result<Option<u32>, MockError> {
        if self.fail_spawn == Some(host.id.0) {
            return Err(MockError("spawn"));
        }
        self.calls.push(Call::Spawn {
            host: host.name.clone(),
            argv: argv.to_vec(),
        });
        Ok(Some(1000 + host.id.0))
    }

    async fn stop(&mut self) -> Result<(), MockError> {
        self.calls.push(Call::Stop);
        if self.fail_stop {
            return Err(MockError("stop"));
        }
        Ok(())
    }

    async fn ping_all(&mut self) -> Result<Option<PingReport>, MockError> {
        self.calls.push(Call::PingAll);
        let n = self
            .calls
            .iter()
            .find_map(|c| match c {
                Call::CreateTopology(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0);
        let sent = n * n.saturating_sub(1);
        Ok(Some(PingReport {
            sent,
            received: sent,
        }))
    }
}

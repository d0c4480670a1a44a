//! Running a full simulation: bring the network up, start one party per host,
//! wait for the signal to stop and tear everything down again.

use std::future::Future;

use itertools::Itertools;
use thiserror::Error;

use crate::{
    config::{ConfigError, SimConfig},
    emulator::Emulator,
    launch::render,
    party::{PartyId, PeerError, PeerList},
    topology::{Host, SingleSwitchTopo},
};

#[derive(Error, Debug)]
pub enum SimulationError<E: std::error::Error + 'static> {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Could not build peer list: {0}")]
    Peers(#[from] PeerError),
    #[error("Failed to set up the emulated network: {0}")]
    Topology(#[source] E),
    #[error("Failed to spawn party {party}: {source}")]
    Spawn { party: PartyId, source: E },
    #[error("Failed to tear down the emulated network: {0}")]
    Teardown(#[source] E),
}

/// A spawned party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: PartyId,
    pub host: String,
    pub pid: Option<u32>,
}

pub struct Simulation<E: Emulator> {
    config: SimConfig,
    emulator: E,
    ping_all: bool,
}

impl<E: Emulator> Simulation<E> {
    pub fn new(config: SimConfig, emulator: E) -> Self {
        Self {
            config,
            emulator,
            ping_all: false,
        }
    }

    /// Check connectivity between all hosts before starting any party.
    pub fn ping_all(mut self, ping_all: bool) -> Self {
        self.ping_all = ping_all;
        self
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    pub fn into_emulator(self) -> E {
        self.emulator
    }

    /// Run the simulation until `stop` resolves.
    ///
    /// The network is torn down even if starting a party fails.
    pub async fn run(
        &mut self,
        stop: impl Future<Output = ()>,
    ) -> Result<Vec<Party>, SimulationError<E::Error>> {
        self.config.validate()?;
        let hosts = self.setup().await?;

        let parties = match self.launch(&hosts).await {
            Ok(parties) => parties,
            Err(e) => {
                self.cleanup().await;
                return Err(e);
            }
        };

        tracing::info!("Started {} parties, waiting for stop signal", parties.len());
        stop.await;

        tracing::info!("Stopping all parties");
        self.emulator
            .stop()
            .await
            .map_err(SimulationError::Teardown)?;
        Ok(parties)
    }

    #[tracing::instrument(skip_all)]
    async fn setup(&mut self) -> Result<Vec<Host>, SimulationError<E::Error>> {
        let topo = SingleSwitchTopo::new(&self.config);
        tracing::info!(
            "Creating network with switch {} and {} hosts",
            topo.switch,
            topo.hosts.len()
        );
        let hosts = match self.emulator.create_topology(&topo).await {
            Ok(hosts) => hosts,
            Err(e) => {
                self.cleanup().await;
                return Err(SimulationError::Topology(e));
            }
        };
        if let Err(e) = self.emulator.start().await {
            self.cleanup().await;
            return Err(SimulationError::Topology(e));
        }
        tracing::info!("Hosts: {}", hosts.iter().map(|h| &h.name).join(" "));

        if self.ping_all {
            match self.emulator.ping_all().await {
                Ok(Some(report)) => tracing::info!(
                    "Ping: {}% dropped ({}/{} received)",
                    report.dropped(),
                    report.received,
                    report.sent
                ),
                Ok(None) => tracing::info!("Ping not supported by this emulator, skipping"),
                Err(e) => tracing::warn!("Ping failed: {e}"),
            }
        }
        Ok(hosts)
    }

    #[tracing::instrument(skip_all)]
    async fn launch(&mut self, hosts: &[Host]) -> Result<Vec<Party>, SimulationError<E::Error>> {
        let peers = PeerList::from_addrs(hosts.iter().map(|h| h.addr))?;

        tracing::info!("Starting parties");
        let mut parties = Vec::with_capacity(hosts.len());
        for (host, peer) in hosts.iter().zip(&peers) {
            let argv = self.config.launch.argv(peer.id, &peers)?;
            tracing::debug!("{}: {}", host.name, render(&argv));
            let pid = self
                .emulator
                .spawn_process(host, &argv)
                .await
                .map_err(|source| SimulationError::Spawn {
                    party: peer.id,
                    source,
                })?;
            parties.push(Party {
                id: peer.id,
                host: host.name.clone(),
                pid,
            });
        }
        Ok(parties)
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.emulator.stop().await {
            tracing::warn!("Cleanup failed: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        config::PartyCount,
        testing::mock::{Call, MockEmulator},
    };

    use super::*;

    fn config(n: u32) -> SimConfig {
        SimConfig {
            parties: PartyCount::new(n).unwrap(),
            ..Default::default()
        }
    }

    #[test_log::test(tokio::test)]
    async fn lifecycle() {
        let mut sim = Simulation::new(config(3), MockEmulator::default());
        let parties = sim.run(async {}).await.unwrap();
        assert_eq!(parties.len(), 3);
        assert_eq!(parties[2].host, "h3");

        let calls = &sim.emulator().calls;
        assert_eq!(calls.first(), Some(&Call::CreateTopology(3)));
        assert_eq!(calls[1], Call::Start);
        assert_eq!(calls.last(), Some(&Call::Stop));
        let spawned = sim.emulator().spawned();
        assert_eq!(spawned.len(), 3);
        assert_eq!(spawned[0].0, "h1");
        assert!(spawned[1].1.contains(&"-i2".to_owned()));
        assert!(spawned[1].1.contains(&"-p3:10.0.0.3:9001".to_owned()));
    }

    #[tokio::test]
    async fn spawn_failure_tears_down() {
        let emulator = MockEmulator {
            fail_spawn: Some(2),
            ..Default::default()
        };
        let mut sim = Simulation::new(config(4), emulator);
        let err = sim.run(async {}).await.unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Spawn {
                party: PartyId(2),
                ..
            }
        ));
        assert_eq!(sim.emulator().spawned().len(), 1);
        assert_eq!(sim.emulator().calls.last(), Some(&Call::Stop));
    }

    #[tokio::test]
    async fn start_failure() {
        let emulator = MockEmulator {
            fail_start: true,
            ..Default::default()
        };
        let mut sim = Simulation::new(config(2), emulator);
        let err = sim.run(async {}).await.unwrap_err();
        assert!(matches!(err, SimulationError::Topology(_)));
        assert!(sim.emulator().spawned().is_empty());
    }

    #[tokio::test]
    async fn teardown_failure() {
        let emulator = MockEmulator {
            fail_stop: true,
            ..Default::default()
        };
        let mut sim = Simulation::new(config(2), emulator);
        let err = sim.run(async {}).await.unwrap_err();
        assert!(matches!(err, SimulationError::Teardown(_)));
    }

    #[tokio::test]
    async fn invalid_config() {
        let mut config = config(2);
        config.link.loss = 200;
        let mut sim = Simulation::new(config, MockEmulator::default());
        let err = sim.run(async {}).await.unwrap_err();
        assert!(matches!(err, SimulationError::InvalidConfig(_)));
        assert!(sim.emulator().calls.is_empty());
    }

    #[tokio::test]
    async fn pings_when_asked() {
        let mut sim = Simulation::new(config(2), MockEmulator::default()).ping_all(true);
        sim.run(async {}).await.unwrap();
        assert!(sim.emulator().calls.contains(&Call::PingAll));
    }
}

//! Emulation with plain Linux network namespaces.
//!
//! The switch is a bridge in the root namespace, every host is a namespace connected
//! to it through a veth pair. Links are shaped with `tc` on both ends.
//! Everything is driven through the `ip` and `tc` tools, so this needs root.

use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};

use crate::{
    emulator::{Emulator, PingReport},
    launch::render,
    topology::{Host, SingleSwitchTopo},
};

#[derive(Error, Debug)]
pub enum NetnsError {
    #[error("No topology has been created")]
    NoTopology,
    #[error("Empty command")]
    EmptyCommand,
    #[error("Failed to run '{command}': {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
    #[error("'{command}' failed with {status}: {stderr}")]
    Command {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("Failed to kill process {pid:?} on {host}: {source}")]
    Kill {
        host: String,
        pid: Option<u32>,
        source: std::io::Error,
    },
}

/// Something `start` created and `stop` has to remove again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Bridge(String),
    Namespace(String),
    /// A veth pair, named by its end in the root namespace.
    Veth(String),
}

/// A setup command and what it creates once it succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub cmd: Vec<String>,
    pub creates: Option<Resource>,
}

impl Step {
    fn new(cmd: Vec<String>) -> Self {
        Self { cmd, creates: None }
    }

    fn creating(cmd: Vec<String>, resource: Resource) -> Self {
        Self {
            cmd,
            creates: Some(resource),
        }
    }
}

struct Spawned {
    host: String,
    child: Child,
}

pub struct NetnsEmulator {
    dry_run: bool,
    topo: Option<SingleSwitchTopo>,
    created: Vec<Resource>,
    children: Vec<Spawned>,
}

impl NetnsEmulator {
    pub fn new() -> Self {
        Self {
            dry_run: false,
            topo: None,
            created: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Log every command instead of running it.
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::new()
        }
    }

    /// Number of processes currently tracked.
    pub fn spawned(&self) -> usize {
        self.children.len()
    }

    /// Resources created so far, in order of creation.
    pub fn created(&self) -> &[Resource] {
        &self.created
    }

    async fn exec(&self, cmd: &[String]) -> Result<(), NetnsError> {
        let command = render(cmd);
        if self.dry_run {
            tracing::info!("{command}");
            return Ok(());
        }
        tracing::debug!("{command}");
        let output = Self::command(cmd)?
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| NetnsError::Io {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(NetnsError::Command {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }

    fn command(cmd: &[String]) -> Result<Command, NetnsError> {
        let (program, args) = cmd.split_first().ok_or(NetnsError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(args);
        Ok(command)
    }

    async fn kill_all(&mut self) -> Result<(), NetnsError> {
        let mut first_error = None;
        for Spawned { host, mut child } in self.children.drain(..) {
            let pid = child.id();
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Process {pid:?} on {host} already exited with {status}");
                    continue;
                }
                Ok(None) => {}
                Err(source) => {
                    first_error.get_or_insert(NetnsError::Kill { host, pid, source });
                    continue;
                }
            }
            tracing::debug!("Killing process {pid:?} on {host}");
            if let Err(source) = child.kill().await {
                tracing::warn!("Could not kill process {pid:?} on {host}: {source}");
                first_error.get_or_insert(NetnsError::Kill { host, pid, source });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for NetnsEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator for NetnsEmulator {
    type Error = NetnsError;

    async fn create_topology(&mut self, topo: &SingleSwitchTopo) -> Result<Vec<Host>, Self::Error> {
        self.topo = Some(topo.clone());
        Ok(topo.hosts.clone())
    }

    #[tracing::instrument(skip_all)]
    async fn start(&mut self) -> Result<(), Self::Error> {
        let topo = self.topo.as_ref().ok_or(NetnsError::NoTopology)?;
        for step in setup_steps(topo) {
            self.exec(&step.cmd).await?;
            self.created.extend(step.creates);
        }
        Ok(())
    }

    async fn spawn_process(&mut self, host: &Host, argv: &[String]) -> Result<Option<u32>, Self::Error> {
        let cmd = spawn_command(host, argv);
        let command = render(&cmd);
        if self.dry_run {
            tracing::info!("{command}");
            return Ok(None);
        }
        let child = Self::command(&cmd)?
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| NetnsError::Io { command, source })?;
        let pid = child.id();
        self.children.push(Spawned {
            host: host.name.clone(),
            child,
        });
        Ok(pid)
    }

    #[tracing::instrument(skip_all)]
    async fn stop(&mut self) -> Result<(), Self::Error> {
        let mut first_error = self.kill_all().await.err();
        for cmd in teardown_commands(&self.created) {
            if let Err(e) = self.exec(&cmd).await {
                tracing::warn!("{e}");
                first_error.get_or_insert(e);
            }
        }
        self.created.clear();
        first_error.map_or(Ok(()), Err)
    }

    #[tracing::instrument(skip_all)]
    async fn ping_all(&mut self) -> Result<Option<PingReport>, Self::Error> {
        if self.dry_run {
            return Ok(None);
        }
        let topo = self.topo.as_ref().ok_or(NetnsError::NoTopology)?;
        let mut report = PingReport {
            sent: 0,
            received: 0,
        };
        for from in &topo.hosts {
            for to in topo.hosts.iter().filter(|h| h.id != from.id) {
                let cmd = ping_command(from, to);
                report.sent += 1;
                match self.exec(&cmd).await {
                    Ok(()) => report.received += 1,
                    Err(NetnsError::Command { .. }) => {
                        tracing::debug!("{} -> {}: no reply", from.name, to.name)
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(Some(report))
    }
}

fn cmd<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.map(str::to_owned).to_vec()
}

fn netns_exec(host: &str, argv: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut cmd = cmd(["ip", "netns", "exec", host]);
    cmd.extend(argv);
    cmd
}

/// Commands bringing the topology up, in order.
pub fn setup_steps(topo: &SingleSwitchTopo) -> Vec<Step> {
    let sw = topo.switch.as_str();
    let mut steps = vec![
        Step::creating(
            cmd(["ip", "link", "add", "name", sw, "type", "bridge"]),
            Resource::Bridge(sw.to_owned()),
        ),
        Step::new(cmd(["ip", "link", "set", sw, "up"])),
    ];
    for (host, link) in topo.hosts.iter().zip(&topo.links) {
        let ns = host.name.as_str();
        let (hi, si) = (link.host_intf.as_str(), link.switch_intf.as_str());
        let addr = format!("{}/{}", host.addr, topo.prefix_len());
        steps.extend([
            Step::creating(
                cmd(["ip", "netns", "add", ns]),
                Resource::Namespace(ns.to_owned()),
            ),
            Step::creating(
                cmd(["ip", "link", "add", hi, "type", "veth", "peer", "name", si]),
                Resource::Veth(si.to_owned()),
            ),
        ]);
        steps.extend(
            [
                cmd(["ip", "link", "set", hi, "netns", ns]),
                cmd(["ip", "link", "set", si, "master", sw]),
                cmd(["ip", "link", "set", si, "up"]),
                cmd(["ip", "-n", ns, "addr", "add", addr.as_str(), "dev", hi]),
                cmd(["ip", "-n", ns, "link", "set", "lo", "up"]),
                cmd(["ip", "-n", ns, "link", "set", hi, "up"]),
            ]
            .into_iter()
            .chain(
                topo.link_config
                    .tc_commands(hi)
                    .into_iter()
                    .map(|tc| netns_exec(ns, tc)),
            )
            .chain(topo.link_config.tc_commands(si))
            .map(Step::new),
        );
    }
    steps
}

pub fn setup_commands(topo: &SingleSwitchTopo) -> Vec<Vec<String>> {
    setup_steps(topo).into_iter().map(|s| s.cmd).collect()
}

/// Commands removing `created`, newest first.
///
/// A veth pair is deleted through its root namespace end, which removes it
/// whether or not the other end was moved into a namespace.
pub fn teardown_commands(created: &[Resource]) -> Vec<Vec<String>> {
    created
        .iter()
        .rev()
        .map(|r| match r {
            Resource::Bridge(name) | Resource::Veth(name) => cmd(["ip", "link", "del", name.as_str()]),
            Resource::Namespace(name) => cmd(["ip", "netns", "del", name.as_str()]),
        })
        .collect()
}

pub fn spawn_command(host: &Host, argv: &[String]) -> Vec<String> {
    netns_exec(&host.name, argv.iter().cloned())
}

pub fn ping_command(from: &Host, to: &Host) -> Vec<String> {
    netns_exec(
        &from.name,
        cmd(["ping", "-c1", "-W1", to.addr.to_string().as_str()]),
    )
}

#[cfg(test)]
mod test {
    use crate::{
        config::{PartyCount, SimConfig},
        party::PartyId,
    };

    use super::*;

    fn topo(n: u32) -> SingleSwitchTopo {
        let config = SimConfig {
            parties: PartyCount::new(n).unwrap(),
            ..Default::default()
        };
        SingleSwitchTopo::new(&config)
    }

    fn lines(cmds: &[Vec<String>]) -> Vec<String> {
        cmds.iter().map(|c| c.join(" ")).collect()
    }

    #[test]
    fn setup_for_two() {
        let cmds = lines(&setup_commands(&topo(2)));
        assert_eq!(cmds[0], "ip link add name s1 type bridge");
        assert_eq!(cmds[1], "ip link set s1 up");
        assert!(cmds.contains(&"ip netns add h2".to_owned()));
        assert!(cmds.contains(&"ip link add h1-eth0 type veth peer name s1-eth1".to_owned()));
        assert!(cmds.contains(&"ip -n h2 addr add 10.0.0.2/8 dev h2-eth0".to_owned()));
        assert!(cmds.contains(
            &"ip netns exec h1 tc qdisc add dev h1-eth0 root handle 10: netem delay 1.0ms"
                .to_owned()
        ));
        assert!(cmds.contains(&"tc qdisc add dev s1-eth2 root handle 10: netem delay 1.0ms".to_owned()));
        // the namespace exists before anything is moved into it
        let add = cmds.iter().position(|c| c == "ip netns add h1").unwrap();
        let mv = cmds
            .iter()
            .position(|c| c == "ip link set h1-eth0 netns h1")
            .unwrap();
        assert!(add < mv);
    }

    #[test]
    fn teardown_for_three() {
        let created: Vec<_> = setup_steps(&topo(3))
            .into_iter()
            .filter_map(|s| s.creates)
            .collect();
        let cmds = lines(&teardown_commands(&created));
        assert_eq!(
            cmds,
            [
                "ip link del s1-eth3",
                "ip netns del h3",
                "ip link del s1-eth2",
                "ip netns del h2",
                "ip link del s1-eth1",
                "ip netns del h1",
                "ip link del s1"
            ]
        );
    }

    #[test]
    fn teardown_of_nothing() {
        assert!(teardown_commands(&[]).is_empty());
        let partial = [
            Resource::Bridge("s1".to_owned()),
            Resource::Namespace("h1".to_owned()),
        ];
        assert_eq!(
            lines(&teardown_commands(&partial)),
            ["ip netns del h1", "ip link del s1"]
        );
    }

    #[test]
    fn spawn_and_ping() {
        let topo = topo(2);
        let argv = cmd(["java", "-i1"]);
        assert_eq!(
            spawn_command(&topo.hosts[0], &argv).join(" "),
            "ip netns exec h1 java -i1"
        );
        assert_eq!(
            ping_command(&topo.hosts[0], &topo.hosts[1]).join(" "),
            "ip netns exec h1 ping -c1 -W1 10.0.0.2"
        );
    }

    #[tokio::test]
    async fn dry_run_lifecycle() {
        let mut emulator = NetnsEmulator::dry_run();
        let hosts = emulator.create_topology(&topo(4)).await.unwrap();
        assert_eq!(hosts.len(), 4);
        assert_eq!(hosts[3].id, PartyId(4));
        emulator.start().await.unwrap();
        assert_eq!(emulator.created().len(), 1 + 2 * 4);
        assert_eq!(emulator.created()[0], Resource::Bridge("s1".to_owned()));
        let pid = emulator
            .spawn_process(&hosts[0], &cmd(["true"]))
            .await
            .unwrap();
        assert_eq!(pid, None);
        assert_eq!(emulator.spawned(), 0);
        assert_eq!(emulator.ping_all().await.unwrap(), None);
        emulator.stop().await.unwrap();
        assert!(emulator.created().is_empty());
    }

    #[tokio::test]
    async fn start_without_topology() {
        let mut emulator = NetnsEmulator::dry_run();
        assert!(matches!(
            emulator.start().await,
            Err(NetnsError::NoTopology)
        ));
        // nothing was started, so there is nothing to tear down
        emulator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_setup_removes_nothing() {
        // `ip` rejects the bridge name (or is missing), so the very first step fails.
        let mut topo = topo(3);
        topo.switch = "netcare-switch-name-too-long".to_owned();
        let mut emulator = NetnsEmulator::new();
        emulator.create_topology(&topo).await.unwrap();
        assert!(emulator.start().await.is_err());
        assert!(emulator.created().is_empty());
        // Deleting `h1..h3` or the switch would fail here, so any teardown shows up as an error.
        emulator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failing_command() {
        let emulator = NetnsEmulator::new();
        let err = emulator.exec(&cmd(["false"])).await.unwrap_err();
        assert!(matches!(err, NetnsError::Command { .. }));
        let err = emulator
            .exec(&cmd(["/nonexistent/netcare-tool"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NetnsError::Io { .. }));
        assert!(matches!(
            emulator.exec(&[]).await,
            Err(NetnsError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn kills_only_tracked_children() {
        let mut emulator = NetnsEmulator::new();
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        emulator.children.push(Spawned {
            host: "h1".to_owned(),
            child,
        });
        let exited = Command::new("true").spawn().unwrap();
        emulator.children.push(Spawned {
            host: "h2".to_owned(),
            child: exited,
        });
        emulator.stop().await.unwrap();
        assert_eq!(emulator.spawned(), 0);
    }
}

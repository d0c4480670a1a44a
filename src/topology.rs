//! Declarative description of the emulated network: one switch with every host attached.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::{
    config::{LinkConfig, SimConfig},
    party::PartyId,
};

/// An emulated host, running one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: PartyId,
    pub name: String,
    pub addr: Ipv4Addr,
}

impl Host {
    /// Interface inside the host.
    pub fn intf(&self) -> String {
        format!("{}-eth0", self.name)
    }
}

/// Host-switch link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub host: String,
    pub host_intf: String,
    pub switch_intf: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleSwitchTopo {
    pub switch: String,
    pub subnet: Ipv4Net,
    pub hosts: Vec<Host>,
    pub links: Vec<Link>,
    pub link_config: LinkConfig,
}

impl SingleSwitchTopo {
    /// Hosts `h1..hN`, host `hK` gets the K-th address of the subnet.
    ///
    /// The configuration is expected to be validated, so the subnet has room for every host.
    pub fn new(config: &SimConfig) -> Self {
        let n = config.parties.get() as usize;
        let switch = config.switch.clone();
        let hosts: Vec<Host> = config
            .subnet
            .hosts()
            .take(n)
            .enumerate()
            .map(|(i, addr)| Host {
                id: PartyId(i as u32 + 1),
                name: format!("h{}", i + 1),
                addr,
            })
            .collect();
        let links = hosts
            .iter()
            .map(|h| Link {
                host: h.name.clone(),
                host_intf: h.intf(),
                switch_intf: format!("{switch}-eth{}", h.id),
            })
            .collect();
        Self {
            switch,
            subnet: config.subnet,
            hosts,
            links,
            link_config: config.link.clone(),
        }
    }

    /// Prefix length used on every host interface.
    pub fn prefix_len(&self) -> u8 {
        self.subnet.prefix_len()
    }
}

impl LinkConfig {
    /// Traffic control commands shaping `dev`.
    ///
    /// With a bandwidth limit (and htb) a rate-limited htb class is installed
    /// with netem beneath it; otherwise netem sits at the root.
    pub fn tc_commands(&self, dev: &str) -> Vec<Vec<String>> {
        let mut cmds = Vec::new();
        let mut netem_parent = vec!["root".to_owned()];

        if let Some(bw) = self.bandwidth {
            if self.use_htb {
                cmds.push(args(&format!(
                    "tc qdisc add dev {dev} root handle 5:0 htb default 1"
                )));
                cmds.push(args(&format!(
                    "tc class add dev {dev} parent 5:0 classid 5:1 htb rate {bw}Mbit burst 15k"
                )));
                netem_parent = args("parent 5:1");
            } else {
                cmds.push(args(&format!(
                    "tc qdisc add dev {dev} root handle 5: tbf rate {bw}Mbit burst 15000 latency 50ms"
                )));
                netem_parent = args("parent 5:1");
            }
        }

        let mut netem = Vec::new();
        if let Some(delay) = &self.delay {
            netem.extend(["delay".to_owned(), delay.clone()]);
            if let Some(jitter) = &self.jitter {
                netem.push(jitter.clone());
            }
        }
        if self.loss > 0 {
            netem.extend(["loss".to_owned(), format!("{}%", self.loss)]);
        }
        if let Some(limit) = self.max_queue_size {
            netem.extend(["limit".to_owned(), limit.to_string()]);
        }

        if !netem.is_empty() {
            let mut cmd = args(&format!("tc qdisc add dev {dev}"));
            cmd.extend(netem_parent);
            cmd.extend(args("handle 10: netem"));
            cmd.extend(netem);
            cmds.push(cmd);
        }
        cmds
    }
}

fn args(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_owned).collect()
}

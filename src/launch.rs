//! Command line for a single MPC party.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigError,
    party::{config_args, PartyId, PeerError, PeerList},
};

/// How the party evaluates its protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Evaluator {
    Sequential,
    SequentialBatched,
    #[default]
    Parallel,
    ParallelBatched,
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Evaluator::Sequential => "SEQUENTIAL",
            Evaluator::SequentialBatched => "SEQUENTIAL_BATCHED",
            Evaluator::Parallel => "PARALLEL",
            Evaluator::ParallelBatched => "PARALLEL_BATCHED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Terminal to wrap every party in, `None` runs headless.
    pub terminal: Option<Vec<String>>,
    pub program: String,
    pub classpath: String,
    pub main_class: String,
    /// Protocol suite, e.g. `bgw`.
    pub suite: String,
    pub evaluator: Evaluator,
    /// Session tag, passed as `-tid`.
    pub tag: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            // -hold keeps the window around after the party exits
            terminal: Some(
                ["xterm", "-hold", "-geometry", "130x40+0+900", "-e"]
                    .map(String::from)
                    .to_vec(),
            ),
            program: "java".to_owned(),
            classpath: "target/fresco-0.2-SNAPSHOT-jar-with-dependencies.jar".to_owned(),
            main_class: "dk.alexandra.fresco.demo.DistSum".to_owned(),
            suite: "bgw".to_owned(),
            evaluator: Evaluator::default(),
            tag: "virt_eP_l1ms".to_owned(),
        }
    }
}

impl LaunchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::NoProgram);
        }
        Ok(())
    }

    /// Full argument vector for party `me`, the program is the first element.
    pub fn argv(&self, me: PartyId, peers: &PeerList) -> Result<Vec<String>, PeerError> {
        let mut argv = self.terminal.clone().unwrap_or_default();
        argv.extend([
            self.program.clone(),
            "-cp".to_owned(),
            self.classpath.clone(),
            self.main_class.clone(),
            format!("-s{}", self.suite),
            format!("-e{}", self.evaluator),
        ]);
        argv.extend(config_args(me, peers)?);
        argv.extend(["-tid".to_owned(), self.tag.clone()]);
        Ok(argv)
    }
}

/// Render an argument vector for display, quoting where a shell would need it.
pub fn render(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            let plain = !arg.is_empty()
                && arg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_.:/+=@%,".contains(c));
            if plain {
                arg.clone()
            } else {
                format!("'{}'", arg.replace('\'', r"'\''"))
            }
        })
        .join(" ")
}

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ipnet::Ipv4Net;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use netcare::{
    config::PartyCount, launch::Evaluator, NetnsEmulator, SimConfig, Simulation,
};

/// Runs multiple virtual MPC parties on an emulated network.
#[derive(Parser, Debug)]
#[command(name = "netcare", version)]
struct Args {
    /// Number of parties [default: 5]
    #[arg(short = 'N', value_parser = clap::value_parser!(u32).range(2..30))]
    parties: Option<u32>,

    /// JSON file with the simulation configuration.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Link delay, e.g. "1.0ms".
    #[arg(long)]
    delay: Option<String>,

    /// Link loss in percent.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    loss: Option<u8>,

    /// Link bandwidth in Mbit/s.
    #[arg(long)]
    bw: Option<f64>,

    /// Subnet the host addresses are taken from.
    #[arg(long)]
    subnet: Option<Ipv4Net>,

    /// Protocol evaluation strategy.
    #[arg(long, value_enum)]
    evaluator: Option<Evaluator>,

    /// Session tag handed to every party.
    #[arg(long)]
    tag: Option<String>,

    /// Run parties without a terminal window.
    #[arg(long)]
    headless: bool,

    /// Ping between all hosts before starting the parties.
    #[arg(long)]
    ping_all: bool,

    /// Only print what would be done.
    #[arg(long)]
    dry_run: bool,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    dump_config: bool,
}

impl Args {
    fn sim_config(&self) -> anyhow::Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SimConfig::default(),
        };
        if let Some(n) = self.parties {
            config.parties = PartyCount::new(n)?;
        }
        if let Some(delay) = &self.delay {
            config.link.delay = Some(delay.clone());
        }
        if let Some(loss) = self.loss {
            config.link.loss = loss;
        }
        if let Some(bw) = self.bw {
            config.link.bandwidth = Some(bw);
        }
        if let Some(subnet) = self.subnet {
            config.subnet = subnet;
        }
        if let Some(evaluator) = self.evaluator {
            config.launch.evaluator = evaluator;
        }
        if let Some(tag) = &self.tag {
            config.launch.tag = tag.clone();
        }
        if self.headless {
            config.launch.terminal = None;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Wait for enter on stdin or Ctrl-C.
async fn stop_signal() {
    println!("Press enter to stop all nodes.");
    let enter = async {
        let mut line = String::new();
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(n) if n > 0 => {}
            // No terminal attached, only Ctrl-C can stop us.
            _ => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = enter => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!("Could not listen for Ctrl-C: {e}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.sim_config()?;

    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let emulator = if args.dry_run {
        NetnsEmulator::dry_run()
    } else {
        NetnsEmulator::new()
    };
    let mut sim = Simulation::new(config, emulator).ping_all(args.ping_all);
    let parties = if args.dry_run {
        sim.run(async {}).await?
    } else {
        sim.run(stop_signal()).await?
    };
    tracing::info!("Stopped {} parties", parties.len());
    Ok(())
}

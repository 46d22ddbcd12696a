// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

//! Host wrapper: load the topology, bring the forwarding plane up on the
//! selected driver, apply the initial generation, forward until SIGINT.
//!
//! Exit codes: 0 on a normal stop, non-zero on any initialization
//! failure (arena creation, driver bring-up, invalid configuration).

use clap::Parser;
use config::TopologyConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use yanet_dataplane::control::GenSpec;
use yanet_dataplane::driver::LoopbackDriver;
use yanet_dataplane::runtime::Dataplane;

#[derive(Debug, Parser)]
#[command(name = "yanet-dataplane", about = "user-space packet forwarding plane")]
struct CmdArgs {
    /// Topology configuration file.
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Initial generation spec (modules, pipelines, device bindings).
    #[arg(long, short = 'g')]
    generation: Option<PathBuf>,

    /// Packet driver to run on. `loopback` serves virtual topologies;
    /// NIC drivers are provided out of tree.
    #[arg(long, default_value = "loopback")]
    driver: String,
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(EnvFilter::new(level))
        .init();
}

fn run(args: &CmdArgs) -> Result<(), String> {
    let topology =
        TopologyConfig::load(&args.config).map_err(|e| format!("topology: {e}"))?;
    init_logging(topology.loglevel.as_str());
    info!(config = %args.config.display(), "starting dataplane process");

    if args.driver != "loopback" {
        return Err(format!("unknown driver '{}'", args.driver));
    }
    let driver = Arc::new(LoopbackDriver::new());
    let mut plane =
        Dataplane::new(&topology, driver).map_err(|e| format!("setup: {e}"))?;
    let agent = plane.control_agent();

    if let Some(path) = &args.generation {
        let raw = std::fs::read_to_string(path).map_err(|e| format!("generation: {e}"))?;
        let spec = GenSpec::from_yaml(&raw).map_err(|e| format!("generation: {e}"))?;
        agent.apply(&spec).map_err(|e| format!("generation: {e}"))?;
    }

    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| format!("signal handler: {e}"))?;

    plane.start().map_err(|e| format!("start: {e}"))?;
    if args.generation.is_some()
        && !agent.await_adoption(agent.generation(), Duration::from_secs(5))
    {
        // workers run regardless; the operator sees the lag
        error!("workers did not adopt the boot generation");
    }

    stop_rx
        .recv()
        .map_err(|e| format!("stop signal: {e}"))?;
    info!("shutting down dataplane");
    plane.stop();
    Ok(())
}

fn main() -> ExitCode {
    let args = CmdArgs::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            // logging may not be initialized yet; write the diagnostic
            // line directly
            eprintln!("yanet-dataplane: {message}");
            ExitCode::FAILURE
        }
    }
}

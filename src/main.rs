//! Proxyfleet CLI - stand up and tear down proxy container fleets

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use proxyfleet::cli::{Args, SubCommand, TorAction, VpnAction};
use proxyfleet::{ContainerRuntime, DockerCli, FleetKind, Orchestrator, RuntimeErrorKind, Settings};

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings =
        Settings::load(args.config.as_deref()).context("failed to load settings")?;
    if let Some(threads) = args.threads {
        settings.threads = threads;
    }
    if let Some(base_port) = args.base_port {
        settings.base_port = base_port;
    }
    match &args.command {
        SubCommand::Vpn { dir: Some(dir), .. } => settings.vpn.dir = dir.clone(),
        SubCommand::Tor { nodes: Some(nodes), .. } => settings.tor.nodes = *nodes,
        _ => {}
    }
    settings.validate()?;
    Ok(settings)
}

fn run(args: Args) -> anyhow::Result<i32> {
    let settings = load_settings(&args)?;

    let runtime = DockerCli::new();
    if let Err(e) = runtime.ping() {
        if e.kind == RuntimeErrorKind::Unavailable {
            eprintln!("Unable to contact local Docker daemon. Is it running?");
            return Ok(1);
        }
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(Arc::new(runtime), settings);
    match args.command {
        SubCommand::Vpn { action, .. } => {
            let profile = orchestrator.profile(FleetKind::Vpn);
            match action {
                VpnAction::Up => {
                    orchestrator.up(&profile)?;
                }
                VpnAction::Down => orchestrator.down(&profile.image, false)?,
                VpnAction::Clean => orchestrator.clean(&profile.image)?,
                VpnAction::Build => orchestrator.build(&profile.image, &profile.build_context)?,
                VpnAction::Single => {
                    orchestrator.single(&profile)?;
                }
                VpnAction::Interactive => return Ok(orchestrator.interactive(&profile)?),
            }
        }
        SubCommand::Tor { action, .. } => {
            let profile = orchestrator.profile(FleetKind::Tor);
            match action {
                TorAction::Up => {
                    orchestrator.up(&profile)?;
                }
                TorAction::Down => orchestrator.down(&profile.image, false)?,
                TorAction::Clean => orchestrator.clean(&profile.image)?,
                TorAction::Build => orchestrator.build(&profile.image, &profile.build_context)?,
                TorAction::Single => {
                    orchestrator.single(&profile)?;
                }
            }
        }
        SubCommand::Nuke => orchestrator.nuke()?,
    }
    Ok(0)
}

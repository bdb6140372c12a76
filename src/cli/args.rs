//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "proxyfleet")]
#[command(author, version, about = "Run a fleet of VPN/Tor proxy containers behind one SOCKS endpoint", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubCommand,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "PROXYFLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// First host port handed to fleet containers
    #[arg(long, global = true)]
    pub base_port: Option<u16>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Manage the VPN fleet (one container per credential file)
    Vpn {
        #[arg(value_enum)]
        action: VpnAction,

        /// Directory to search for VPN config files
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Manage the Tor fleet
    Tor {
        #[arg(value_enum)]
        action: TorAction,

        /// Number of Tor nodes to rotate through
        #[arg(long)]
        nodes: Option<usize>,
    },

    /// Delete all VPN, Tor and rotator containers and images
    Nuke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VpnAction {
    /// Bring up one container per VPN file
    Up,
    /// Bring down all VPN containers
    Down,
    /// Delete all VPN containers, stopped ones included
    Clean,
    /// Start the rotator on a single port (e.g. for Burp Suite)
    Single,
    /// Start a shell routed through proxychains (needs proxychains v4+)
    Interactive,
    /// Build the VPN image
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TorAction {
    /// Bring up one container per node
    Up,
    /// Bring down all Tor containers
    Down,
    /// Delete all Tor containers, stopped ones included
    Clean,
    /// Start the rotator on a single port
    Single,
    /// Build the Tor image
    Build,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_vpn_up_with_dir() {
        let args = Args::try_parse_from(["proxyfleet", "vpn", "up", "--dir", "creds"]).unwrap();
        match args.command {
            SubCommand::Vpn { action, dir } => {
                assert_eq!(action, VpnAction::Up);
                assert_eq!(dir, Some(PathBuf::from("creds")));
            }
            _ => panic!("expected vpn"),
        }
    }

    #[test]
    fn test_parse_tor_with_globals() {
        let args =
            Args::try_parse_from(["proxyfleet", "tor", "single", "--nodes", "5", "--threads", "2"])
                .unwrap();
        assert_eq!(args.threads, Some(2));
        assert!(matches!(
            args.command,
            SubCommand::Tor { action: TorAction::Single, nodes: Some(5) }
        ));
    }

    #[test]
    fn test_tor_has_no_interactive() {
        assert!(Args::try_parse_from(["proxyfleet", "tor", "interactive"]).is_err());
    }
}

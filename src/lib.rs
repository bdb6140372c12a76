//! Proxyfleet - a load-balanced fleet of egress proxy containers
//!
//! Proxyfleet starts one container per VPN credential file (or per Tor
//! node), publishes each on its own loopback port, and renders an HAProxy
//! config and a proxychains config that front the whole fleet.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use proxyfleet::{DockerCli, FleetKind, Orchestrator, Settings};
//!
//! let settings = Settings::load(None).unwrap();
//! let orchestrator = Orchestrator::new(Arc::new(DockerCli::new()), settings);
//! let profile = orchestrator.profile(FleetKind::Vpn);
//! let assignments = orchestrator.up(&profile).unwrap();
//! println!("{} proxies requested", assignments.len());
//! ```

pub mod cli;
pub mod error;
pub mod fleet;
pub mod inventory;
pub mod network;
pub mod orchestrator;
pub mod pool;
pub mod render;
pub mod runtime;
pub mod settings;

pub use error::{FleetError, Result, RuntimeError, RuntimeErrorKind};
pub use fleet::{PortAssignment, ProxySource, SourceKind, SourceSpec};
pub use inventory::ContainerInventory;
pub use network::NetworkEnsurer;
pub use orchestrator::{FleetKind, FleetProfile, Orchestrator, RotateOutcome};
pub use pool::{Task, WorkerPool};
pub use render::{BackendAddressing, ConfigKind, ConfigWriter};
pub use runtime::{ContainerRecord, ContainerRuntime, DockerCli, InMemoryRuntime};
pub use settings::Settings;

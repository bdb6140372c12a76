//! Container runtime client
//!
//! Everything the orchestrator does to containers, images and networks goes
//! through the [`ContainerRuntime`] trait. Calls are blocking from the
//! caller's point of view and implementations must be safe to share across
//! worker threads.

mod docker;
mod memory;

pub use docker::DockerCli;
pub use memory::InMemoryRuntime;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeResult;

/// Port every proxy container serves SOCKS on
pub const CONTAINER_SOCKS_PORT: u16 = 1080;

/// A host port published to a container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
}

impl PortBinding {
    /// Publish `container_port` on the host loopback interface
    pub fn loopback(host_port: u16, container_port: u16) -> Self {
        Self {
            host_ip: Some("127.0.0.1".to_string()),
            host_port,
            container_port,
        }
    }

    /// Publish `container_port` on every host interface
    pub fn any(host_port: u16, container_port: u16) -> Self {
        Self {
            host_ip: None,
            host_port,
            container_port,
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host_ip {
            Some(ip) => write!(f, "{}:{}:{}/tcp", ip, self.host_port, self.container_port),
            None => write!(f, "{}:{}/tcp", self.host_port, self.container_port),
        }
    }
}

/// Everything needed to create and start one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortBinding>,
    pub network: Option<String>,
    pub dns: Vec<String>,
    pub privileged: bool,
    pub auto_remove: bool,
    pub detach: bool,
}

impl RunSpec {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            env: Vec::new(),
            ports: Vec::new(),
            network: None,
            dns: Vec::new(),
            privileged: false,
            auto_remove: true,
            detach: true,
        }
    }
}

/// Parameters for creating a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
    pub attachable: bool,
}

impl NetworkSpec {
    /// An attachable bridge network
    pub fn bridge(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: "bridge".to_string(),
            attachable: true,
        }
    }
}

/// Container state as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Other(String),
}

impl From<&str> for ContainerState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            other => ContainerState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => f.write_str("created"),
            ContainerState::Running => f.write_str("running"),
            ContainerState::Paused => f.write_str("paused"),
            ContainerState::Restarting => f.write_str("restarting"),
            ContainerState::Exited => f.write_str("exited"),
            ContainerState::Dead => f.write_str("dead"),
            ContainerState::Other(s) => f.write_str(s),
        }
    }
}

/// A container observed through the runtime. Not owned by proxyfleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    /// Image the container was created from
    pub image: String,
    pub state: ContainerState,
}

/// Blocking container runtime operations
pub trait ContainerRuntime: Send + Sync {
    /// Check that the daemon answers
    fn ping(&self) -> RuntimeResult<()>;

    fn build_image(&self, context: &Path, tag: &str) -> RuntimeResult<()>;

    fn image_exists(&self, tag: &str) -> RuntimeResult<bool>;

    fn remove_image(&self, tag: &str) -> RuntimeResult<()>;

    /// Create and start a container, returning its id
    fn run_container(&self, spec: &RunSpec) -> RuntimeResult<String>;

    /// List containers, stopped ones included when `all` is set
    fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerRecord>>;

    fn kill_container(&self, name: &str, signal: &str) -> RuntimeResult<()>;

    fn remove_container(&self, name: &str, force: bool) -> RuntimeResult<()>;

    /// Block until the container stops, returning its exit code
    fn wait_container(&self, name: &str) -> RuntimeResult<i64>;

    fn network_exists(&self, name: &str) -> RuntimeResult<bool>;

    fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<()>;

    fn remove_network(&self, name: &str) -> RuntimeResult<()>;
}

//! Shared bridge network
//!
//! Every fleet member and the rotator join one attachable bridge network so
//! they can address each other by container name.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeErrorKind};
use crate::runtime::{ContainerRuntime, NetworkSpec};

pub struct NetworkEnsurer {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NetworkEnsurer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Create the network unless it already exists
    ///
    /// Losing a create race against another process surfaces as a conflict,
    /// which counts as success.
    pub fn ensure(&self, name: &str) -> Result<()> {
        if self.runtime.network_exists(name)? {
            debug!(network = name, "network already present");
            return Ok(());
        }
        match self.runtime.create_network(&NetworkSpec::bridge(name)) {
            Ok(()) => {
                info!(network = name, "created network");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                warn!(network = name, error = %e, "network created concurrently, reusing it");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the network if nothing uses it any more
    ///
    /// Best effort: an absent network or one that still has endpoints is left
    /// alone, and any other failure is logged and skipped.
    pub fn release(&self, name: &str) {
        match self.runtime.remove_network(name) {
            Ok(()) => info!(network = name, "removed network"),
            Err(e) if e.kind == RuntimeErrorKind::NotFound => {
                debug!(network = name, "network already gone")
            }
            Err(e) if e.kind == RuntimeErrorKind::InUse => {
                info!(network = name, "network still in use, leaving it")
            }
            Err(e) => warn!(network = name, error = %e, "could not remove network"),
        }
    }
}

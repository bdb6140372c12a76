//! Single-endpoint rotator
//!
//! One HAProxy container round-robins client connections across the fleet
//! on the fixed listen port. It runs in the foreground; Ctrl+C stops the
//! rotator and leaves the fleet running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use super::{FleetProfile, Orchestrator};
use crate::error::{FleetError, Result};
use crate::fleet::PortAssignment;
use crate::render::ConfigKind;
use crate::runtime::{PortBinding, RunSpec};

/// Upper bound on waiting for the Ctrl+C teardown once the rotator is gone
const STOP_GRACE: Duration = Duration::from_secs(30);

/// How a foreground rotator session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotateOutcome {
    /// Stopped by Ctrl+C
    pub interrupted: bool,
    /// Exit code, if the runtime reported one
    pub exit_code: Option<i64>,
}

/// Container name of the rotator: last path segment of its image
pub fn rotator_name(image: &str) -> &str {
    let name = image.rsplit('/').next().unwrap_or(image);
    name.split(':').next().unwrap_or(name)
}

impl Orchestrator {
    fn rotator_spec(&self) -> RunSpec {
        let settings = self.settings();
        let image = &settings.rotator.image;
        let mut spec = RunSpec::new(image.as_str(), rotator_name(image));
        spec.auto_remove = true;
        spec.detach = true;
        if settings.host_networking {
            spec.network = Some("host".to_string());
        } else {
            spec.network = Some(settings.network.clone());
            spec.ports = vec![PortBinding::any(settings.listen_port, settings.listen_port)];
        }
        spec
    }

    /// Render the load-balancer config, rebuild the rotator image and start it
    ///
    /// Returns the rotator's container name.
    pub fn start_rotator(&self, assignments: &[PortAssignment]) -> Result<String> {
        let settings = self.settings();
        self.config_writer()
            .write(ConfigKind::LoadBalancer, assignments)?;
        // The image bakes in the config just written, so always rebuild
        self.build(&settings.rotator.image, &settings.rotator.build_context)?;
        if !settings.host_networking {
            self.network().ensure(&settings.network)?;
        }

        let spec = self.rotator_spec();
        info!("starting single-port mode");
        self.runtime.run_container(&spec)?;
        info!(
            port = settings.listen_port,
            backends = assignments.len(),
            "proxy rotator listening, Ctrl+C to quit"
        );
        Ok(spec.name)
    }

    /// Stop the rotator without touching the fleet
    pub fn stop_rotator(&self, quiet: bool) -> Result<()> {
        let image = self.settings().rotator.image.clone();
        self.down(&image, quiet)
    }

    /// Block until the rotator exits
    ///
    /// Once `interrupted` is set, a failed wait is part of the shutdown and
    /// still yields an interrupted outcome.
    pub fn wait_rotator(&self, name: &str, interrupted: &AtomicBool) -> Result<RotateOutcome> {
        let exit_code = match self.runtime.wait_container(name) {
            Ok(code) => Some(code),
            // Auto-removed before the wait attached
            Err(e) if e.is_not_found() => None,
            Err(e) if interrupted.load(Ordering::SeqCst) => {
                debug!(rotator = name, error = %e, "wait ended by interrupt");
                None
            }
            Err(e) => return Err(e.into()),
        };
        let interrupted = interrupted.load(Ordering::SeqCst);
        if interrupted {
            info!(rotator = name, "rotator was issued a stop command");
            info!("your proxies are still running");
        } else {
            warn!(rotator = name, ?exit_code, "rotator exited");
        }
        Ok(RotateOutcome {
            interrupted,
            exit_code,
        })
    }

    /// Ctrl+C action: flag the interrupt, stop the rotator, report completion on `stopped`
    fn interrupt_handler(
        &self,
        interrupted: Arc<AtomicBool>,
        stopped: Sender<()>,
    ) -> impl FnMut() + Send + 'static {
        let orchestrator = self.clone();
        move || {
            interrupted.store(true, Ordering::SeqCst);
            if let Err(e) = orchestrator.stop_rotator(true) {
                warn!(error = %e, "failed to stop rotator");
            }
            // Full only on a repeated Ctrl+C
            let _ = stopped.try_send(());
        }
    }

    /// Wait for the rotator, then for the interrupt teardown when there was one
    fn await_rotator(
        &self,
        name: &str,
        interrupted: &AtomicBool,
        stopped: &Receiver<()>,
    ) -> Result<RotateOutcome> {
        let outcome = self.wait_rotator(name, interrupted)?;
        if outcome.interrupted && stopped.recv_timeout(STOP_GRACE).is_err() {
            warn!(rotator = name, "rotator teardown did not finish in time");
        }
        Ok(outcome)
    }

    /// Run the rotator in the foreground until it exits or Ctrl+C
    pub fn rotate(&self, assignments: &[PortAssignment]) -> Result<RotateOutcome> {
        let name = self.start_rotator(assignments)?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let (stopped_tx, stopped_rx) = channel::bounded(1);
        ctrlc::set_handler(self.interrupt_handler(interrupted.clone(), stopped_tx))
            .map_err(|e| FleetError::Signal(format!("Failed to set Ctrl+C handler: {}", e)))?;

        self.await_rotator(&name, &interrupted, &stopped_rx)
    }

    /// Rotate across `profile`'s fleet, bringing it up first when needed
    pub fn single(&self, profile: &FleetProfile) -> Result<RotateOutcome> {
        let assignments = if profile.starts_on_demand()
            && !self.inventory().is_running(&profile.image)?
        {
            self.up(profile)?
        } else {
            self.plan(profile)?
        };
        self.rotate(&assignments)
    }
}

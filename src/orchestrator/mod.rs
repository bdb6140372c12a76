//! Fleet life-cycle operations
//!
//! The orchestrator composes source planning, the shared network, config
//! rendering and the worker pool into the top-level commands. It holds no
//! fleet state of its own: every call recomputes sources from disk and reads
//! containers back from the runtime.

mod profile;
mod rotator;
mod session;

pub use profile::{FleetKind, FleetProfile};
pub use rotator::{rotator_name, RotateOutcome};
pub use session::launch_session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::fleet::{PortAssignment, SourceKind};
use crate::inventory::ContainerInventory;
use crate::network::NetworkEnsurer;
use crate::pool::{StartOptions, Task, WorkerPool};
use crate::render::{ConfigKind, ConfigWriter};
use crate::runtime::ContainerRuntime;
use crate::settings::Settings;

#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    settings: Arc<Settings>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: Settings) -> Self {
        Self {
            runtime,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    fn pool(&self, quiet: bool) -> Result<WorkerPool> {
        Ok(WorkerPool::new(self.runtime.clone(), self.settings.threads)?.quiet(quiet))
    }

    fn inventory(&self) -> ContainerInventory {
        ContainerInventory::new(self.runtime.clone())
    }

    fn network(&self) -> NetworkEnsurer {
        NetworkEnsurer::new(self.runtime.clone())
    }

    fn config_writer(&self) -> ConfigWriter {
        self.settings.config_writer()
    }

    pub fn profile(&self, kind: FleetKind) -> FleetProfile {
        FleetProfile::for_kind(kind, &self.settings)
    }

    /// Build `image` from `context`
    pub fn build(&self, image: &str, context: &Path) -> Result<()> {
        info!(image, context = %context.display(), "building image");
        self.runtime.build_image(context, image)?;
        info!(image, "image built");
        Ok(())
    }

    /// Build the fleet image unless the runtime already has it
    pub fn ensure_image(&self, profile: &FleetProfile) -> Result<()> {
        if self.runtime.image_exists(&profile.image)? {
            return Ok(());
        }
        self.build(&profile.image, &profile.build_context)
    }

    /// Sources of `profile` paired with their ports
    pub fn plan(&self, profile: &FleetProfile) -> Result<Vec<PortAssignment>> {
        profile.sources.plan(self.settings.base_port)
    }

    /// Bring up one container per source and render both configs
    ///
    /// Configs are rendered from the planned assignments, before any start
    /// has been confirmed.
    pub fn up(&self, profile: &FleetProfile) -> Result<Vec<PortAssignment>> {
        self.ensure_image(profile)?;
        self.network().ensure(&self.settings.network)?;

        let assignments = self.plan(profile)?;
        info!(fleet = %profile.kind, count = assignments.len(), "planned sources");
        for assignment in &assignments {
            match &assignment.source.kind {
                SourceKind::File(path) => {
                    info!(source = %path.display(), port = assignment.port, "source")
                }
                SourceKind::Synthetic => {
                    info!(source = assignment.name(), port = assignment.port, "source")
                }
            }
        }

        self.config_writer().write_all(&assignments)?;

        let options = StartOptions {
            network: Some(self.settings.network.clone()),
            dns: self.settings.dns.clone(),
        };
        let tasks = assignments
            .iter()
            .map(|a| Task::start(a, &profile.image, &options))
            .collect();
        self.pool(false)?.run(tasks);
        info!(fleet = %profile.kind, "all containers have been issued a start command");
        Ok(assignments)
    }

    /// Kill every running container of `image`, then release the network if unused
    pub fn down(&self, image: &str, quiet: bool) -> Result<()> {
        let running = self.inventory().list(image, false)?;
        self.pool(quiet)?
            .run(running.into_iter().map(Task::Stop).collect());
        if !quiet {
            info!(image, "all containers have been issued a kill command");
        }
        self.network().release(&self.settings.network);
        Ok(())
    }

    /// Force-remove every container of `image`, stopped ones included
    pub fn clean(&self, image: &str) -> Result<()> {
        let all = self.inventory().list(image, true)?;
        self.pool(false)?
            .run(all.into_iter().map(Task::Remove).collect());
        info!(image, "deleted all containers based on image");
        Ok(())
    }

    /// Clean every fleet and rotator image, then delete the images
    pub fn nuke(&self) -> Result<()> {
        let images = [
            self.settings.vpn.image.clone(),
            self.settings.tor.image.clone(),
            self.settings.rotator.image.clone(),
        ];
        for image in &images {
            self.clean(image)?;
            match self.runtime.remove_image(image) {
                Ok(()) => info!(image = %image, "image deleted"),
                Err(e) => warn!(image = %image, error = %e, "could not delete image"),
            }
        }
        Ok(())
    }

    /// Make sure the fleet is up and the client-proxy config matches it
    ///
    /// Returns the path of the client-proxy config.
    pub fn prepare_interactive(&self, profile: &FleetProfile) -> Result<PathBuf> {
        let writer = self.config_writer();
        if !self.inventory().is_running(&profile.image)? {
            self.up(profile)?;
        } else {
            let assignments = self.plan(profile)?;
            writer.write(ConfigKind::ClientProxy, &assignments)?;
        }
        Ok(writer.client_proxy_path)
    }

    /// Prepare the fleet and hand the terminal to a proxied shell
    pub fn interactive(&self, profile: &FleetProfile) -> Result<i32> {
        let config = self.prepare_interactive(profile)?;
        launch_session(&self.settings, &config)
    }
}

//! Proxied shell session for interactive mode

use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::error::{FleetError, Result};
use crate::settings::Settings;

fn session_command(settings: &Settings, config: &Path) -> Command {
    let mut cmd = Command::new(&settings.proxychains_bin);
    cmd.arg("-f").arg(config).arg(&settings.shell);
    cmd
}

/// Run the configured shell under proxychains and wait for it to exit
pub fn launch_session(settings: &Settings, config: &Path) -> Result<i32> {
    info!(
        shell = %settings.shell,
        config = %config.display(),
        "starting proxied shell"
    );
    let status = session_command(settings, config).status().map_err(|e| {
        FleetError::Session(format!(
            "failed to start {} (is proxychains v4+ installed?): {}",
            settings.proxychains_bin, e
        ))
    })?;
    Ok(status.code().unwrap_or(1))
}

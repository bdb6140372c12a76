//! Settings for proxyfleet
//!
//! Loaded from an optional TOML file, then overridden by `PROXYFLEET_*`
//! environment variables, then by command line flags.

mod host;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FleetError, Result};
use crate::pool::DEFAULT_CONCURRENCY;
use crate::render::{BackendAddressing, ConfigWriter};

pub use host::{detect_docker_vm, HostKind};

/// Settings file picked up from the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "proxyfleet.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// First host port handed to fleet containers
    pub base_port: u16,
    /// Port the rotator listens on
    pub listen_port: u16,
    /// Worker pool width
    pub threads: usize,
    /// Shared bridge network
    pub network: String,
    /// Rotator joins the host network and reaches backends via loopback
    pub host_networking: bool,
    /// Host used for loopback backend addresses
    pub loopback_host: String,
    pub dns: Vec<String>,
    pub haproxy_config: PathBuf,
    pub proxychains_config: PathBuf,
    pub vpn: VpnSettings,
    pub tor: TorSettings,
    pub rotator: ImageSettings,
    /// Shell started by `vpn interactive`
    pub shell: String,
    pub proxychains_bin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnSettings {
    pub image: String,
    pub build_context: PathBuf,
    /// Directory searched for credential files
    pub dir: PathBuf,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorSettings {
    pub image: String,
    pub build_context: PathBuf,
    pub nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub image: String,
    pub build_context: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let host = HostKind::detect();
        Self {
            base_port: 9000,
            listen_port: 1337,
            threads: DEFAULT_CONCURRENCY,
            network: "proxyfleet".to_string(),
            host_networking: host == HostKind::Native,
            loopback_host: host.loopback_host().to_string(),
            dns: vec!["1.1.1.1".to_string()],
            haproxy_config: PathBuf::from("./haproxy/haproxy.cfg"),
            proxychains_config: PathBuf::from("./proxychains.conf"),
            vpn: VpnSettings::default(),
            tor: TorSettings::default(),
            rotator: ImageSettings::default(),
            shell: "zsh".to_string(),
            proxychains_bin: "proxychains4".to_string(),
        }
    }
}

impl Default for VpnSettings {
    fn default() -> Self {
        Self {
            image: "audibleblink/doxycannon".to_string(),
            build_context: PathBuf::from("."),
            dir: PathBuf::from("VPN"),
            extension: "ovpn".to_string(),
        }
    }
}

impl Default for TorSettings {
    fn default() -> Self {
        Self {
            image: "audibleblink/tor".to_string(),
            build_context: PathBuf::from("./tor"),
            nodes: 3,
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            image: "audibleblink/doxyproxy".to_string(),
            build_context: PathBuf::from("./haproxy"),
        }
    }
}

impl Settings {
    /// Load from `path`, or from `./proxyfleet.toml` if present, then apply env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) if !p.exists() => {
                return Err(FleetError::Settings(format!(
                    "settings file not found: {}",
                    p.display()
                )))
            }
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_SETTINGS_FILE)).filter(|p| p.exists()),
        };

        let mut settings = match file {
            Some(file) => {
                debug!(path = %file.display(), "loading settings");
                Self::from_toml(&fs::read_to_string(&file)?)?
            }
            None => {
                debug!("no settings file, using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PROXYFLEET_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Invalid {} value: {}", key, value);
                    None
                }
            }
        }

        if let Some(port) = parsed("PROXYFLEET_BASE_PORT", lookup("PROXYFLEET_BASE_PORT")) {
            self.base_port = port;
        }
        if let Some(port) = parsed("PROXYFLEET_LISTEN_PORT", lookup("PROXYFLEET_LISTEN_PORT")) {
            self.listen_port = port;
        }
        if let Some(threads) = parsed("PROXYFLEET_THREADS", lookup("PROXYFLEET_THREADS")) {
            self.threads = threads;
        }
        if let Some(network) = lookup("PROXYFLEET_NETWORK") {
            self.network = network;
        }
        if let Some(host) = parsed(
            "PROXYFLEET_HOST_NETWORKING",
            lookup("PROXYFLEET_HOST_NETWORKING"),
        ) {
            self.host_networking = host;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(FleetError::Settings("threads must be at least 1".to_string()));
        }
        if self.network.trim().is_empty() {
            return Err(FleetError::Settings("network name is empty".to_string()));
        }
        if self.base_port == 0 {
            return Err(FleetError::Settings("base_port must be non-zero".to_string()));
        }
        if self.base_port as usize + self.tor.nodes > u16::MAX as usize + 1 {
            return Err(FleetError::Settings(format!(
                "{} tor nodes from base_port {} run past port {}",
                self.tor.nodes,
                self.base_port,
                u16::MAX
            )));
        }
        Ok(())
    }

    /// How the rotator addresses fleet members
    pub fn backend_addressing(&self) -> BackendAddressing {
        if self.host_networking {
            BackendAddressing::Loopback(self.loopback_host.clone())
        } else {
            BackendAddressing::Bridge
        }
    }

    pub fn config_writer(&self) -> ConfigWriter {
        ConfigWriter {
            load_balancer_path: self.haproxy_config.clone(),
            client_proxy_path: self.proxychains_config.clone(),
            listen_port: self.listen_port,
            addressing: self.backend_addressing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.base_port, 9000);
        assert_eq!(s.listen_port, 1337);
        assert_eq!(s.threads, 10);
        assert_eq!(s.tor.nodes, 3);
        assert_eq!(s.vpn.extension, "ovpn");
        assert_eq!(s.rotator.image, "audibleblink/doxyproxy");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let s = Settings::from_toml(
            r#"
base_port = 10000
threads = 4

[tor]
nodes = 8
"#,
        )
        .unwrap();
        assert_eq!(s.base_port, 10000);
        assert_eq!(s.threads, 4);
        assert_eq!(s.tor.nodes, 8);
        assert_eq!(s.tor.image, "audibleblink/tor");
        assert_eq!(s.listen_port, 1337);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            Settings::from_toml("base_port = \"nine\""),
            Err(FleetError::TomlParse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PROXYFLEET_BASE_PORT", "12000"),
            ("PROXYFLEET_THREADS", "not-a-number"),
            ("PROXYFLEET_NETWORK", "egress"),
            ("PROXYFLEET_HOST_NETWORKING", "false"),
        ]
        .into_iter()
        .collect();

        let mut s = Settings::default();
        s.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(s.base_port, 12000);
        assert_eq!(s.threads, 10);
        assert_eq!(s.network, "egress");
        assert!(!s.host_networking);
        assert_eq!(s.backend_addressing(), BackendAddressing::Bridge);
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let s = Settings {
            threads: 0,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(FleetError::Settings(_))));
    }

    #[test]
    fn test_validate_rejects_port_overflow() {
        let mut s = Settings {
            base_port: 65530,
            ..Settings::default()
        };
        s.tor.nodes = 6;
        assert!(s.validate().is_ok());

        s.tor.nodes = 7;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("past port 65535"));
    }

    #[test]
    fn test_load_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fleet.toml");
        fs::write(&path, "listen_port = 8080\n").unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.listen_port, 8080);

        let missing = Settings::load(Some(&tmp.path().join("missing.toml")));
        assert!(matches!(missing, Err(FleetError::Settings(_))));
    }
}

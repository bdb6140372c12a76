//! Load-balancer and client-proxy config rendering
//!
//! Both files are regenerated wholesale from the current assignment list.
//! The same assignments always produce the same bytes.

mod templates;

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{FleetError, Result};
use crate::fleet::PortAssignment;
use crate::runtime::CONTAINER_SOCKS_PORT;

pub use templates::{haproxy_header, PROXYCHAINS_HEADER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// HAProxy config for the rotator
    LoadBalancer,
    /// proxychains config for local clients
    ClientProxy,
}

/// How the rotator reaches each backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAddressing {
    /// By container name on the shared network, at the container's SOCKS port
    Bridge,
    /// Through the published host port on the given host
    Loopback(String),
}

impl BackendAddressing {
    fn address(&self, assignment: &PortAssignment) -> String {
        match self {
            BackendAddressing::Bridge => {
                format!("{}:{}", assignment.name(), CONTAINER_SOCKS_PORT)
            }
            BackendAddressing::Loopback(host) => format!("{}:{}", host, assignment.port),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigWriter {
    pub load_balancer_path: PathBuf,
    pub client_proxy_path: PathBuf,
    pub listen_port: u16,
    pub addressing: BackendAddressing,
}

impl ConfigWriter {
    pub fn path(&self, kind: ConfigKind) -> &Path {
        match kind {
            ConfigKind::LoadBalancer => &self.load_balancer_path,
            ConfigKind::ClientProxy => &self.client_proxy_path,
        }
    }

    /// Full document text for `kind`
    pub fn render(&self, kind: ConfigKind, assignments: &[PortAssignment]) -> String {
        let mut doc = match kind {
            ConfigKind::LoadBalancer => haproxy_header(self.listen_port),
            ConfigKind::ClientProxy => PROXYCHAINS_HEADER.to_string(),
        };
        for assignment in assignments {
            // Writing to a String cannot fail
            let _ = match kind {
                ConfigKind::LoadBalancer => writeln!(
                    doc,
                    "\tserver {} {} check",
                    assignment.name(),
                    self.addressing.address(assignment)
                ),
                ConfigKind::ClientProxy => {
                    writeln!(doc, "socks5 127.0.0.1 {}", assignment.port)
                }
            };
        }
        doc
    }

    /// Render `kind` and replace the file on disk
    pub fn write(&self, kind: ConfigKind, assignments: &[PortAssignment]) -> Result<PathBuf> {
        let path = self.path(kind).to_path_buf();
        match kind {
            ConfigKind::LoadBalancer => info!(path = %path.display(), "writing HAProxy configuration"),
            ConfigKind::ClientProxy => info!(path = %path.display(), "writing proxychains configuration"),
        }
        let doc = self.render(kind, assignments);
        replace_file(&path, doc.as_bytes()).map_err(|source| FleetError::ConfigWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Write both documents
    pub fn write_all(&self, assignments: &[PortAssignment]) -> Result<()> {
        self.write(ConfigKind::LoadBalancer, assignments)?;
        self.write(ConfigKind::ClientProxy, assignments)?;
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over the target
fn replace_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{assign, ProxySource};
    use tempfile::TempDir;

    fn assignments() -> Vec<PortAssignment> {
        let sources = ["a", "b", "c"]
            .iter()
            .map(|n| ProxySource::synthetic(*n, "VPN"))
            .collect();
        assign(sources, 9000).unwrap()
    }

    fn writer(dir: &Path, addressing: BackendAddressing) -> ConfigWriter {
        ConfigWriter {
            load_balancer_path: dir.join("haproxy").join("haproxy.cfg"),
            client_proxy_path: dir.join("proxychains.conf"),
            listen_port: 1337,
            addressing,
        }
    }

    #[test]
    fn test_client_proxy_lines() {
        let tmp = TempDir::new().unwrap();
        let w = writer(tmp.path(), BackendAddressing::Bridge);
        let doc = w.render(ConfigKind::ClientProxy, &assignments());

        assert!(doc.starts_with(PROXYCHAINS_HEADER));
        let lines: Vec<&str> = doc.lines().filter(|l| l.starts_with("socks5")).collect();
        assert_eq!(
            lines,
            vec![
                "socks5 127.0.0.1 9000",
                "socks5 127.0.0.1 9001",
                "socks5 127.0.0.1 9002",
            ]
        );
    }

    #[test]
    fn test_load_balancer_bridge_lines() {
        let tmp = TempDir::new().unwrap();
        let w = writer(tmp.path(), BackendAddressing::Bridge);
        let doc = w.render(ConfigKind::LoadBalancer, &assignments());

        assert!(doc.contains("bind *:1337"));
        let servers: Vec<&str> = doc
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("server"))
            .collect();
        assert_eq!(
            servers,
            vec![
                "server a a:1080 check",
                "server b b:1080 check",
                "server c c:1080 check",
            ]
        );
    }

    #[test]
    fn test_load_balancer_loopback_lines() {
        let tmp = TempDir::new().unwrap();
        let w = writer(
            tmp.path(),
            BackendAddressing::Loopback("127.0.0.1".to_string()),
        );
        let doc = w.render(ConfigKind::LoadBalancer, &assignments());
        assert!(doc.contains("\tserver a 127.0.0.1:9000 check\n"));
        assert!(doc.contains("\tserver c 127.0.0.1:9002 check\n"));
    }

    #[test]
    fn test_write_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let w = writer(tmp.path(), BackendAddressing::Bridge);

        w.write_all(&assignments()).unwrap();
        let first_lb = fs::read(&w.load_balancer_path).unwrap();
        let first_cp = fs::read(&w.client_proxy_path).unwrap();

        w.write_all(&assignments()).unwrap();
        assert_eq!(fs::read(&w.load_balancer_path).unwrap(), first_lb);
        assert_eq!(fs::read(&w.client_proxy_path).unwrap(), first_cp);
    }

    #[test]
    fn test_write_overwrites_whole_file() {
        let tmp = TempDir::new().unwrap();
        let w = writer(tmp.path(), BackendAddressing::Bridge);
        w.write(ConfigKind::ClientProxy, &assignments()).unwrap();
        w.write(ConfigKind::ClientProxy, &assignments()[..1]).unwrap();

        let doc = fs::read_to_string(&w.client_proxy_path).unwrap();
        assert_eq!(doc.lines().filter(|l| l.starts_with("socks5")).count(), 1);
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "file, not a dir").unwrap();

        let w = ConfigWriter {
            load_balancer_path: blocker.join("haproxy.cfg"),
            client_proxy_path: tmp.path().join("proxychains.conf"),
            listen_port: 1337,
            addressing: BackendAddressing::Bridge,
        };
        let result = w.write(ConfigKind::LoadBalancer, &assignments());
        assert!(matches!(result, Err(FleetError::ConfigWrite { .. })));
    }
}

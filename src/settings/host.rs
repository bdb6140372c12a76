//! Host detection
//!
//! Docker Desktop (macOS, Windows, WSL) runs the daemon inside a VM, where
//! host networking does not reach the user's loopback interface.

use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// Daemon shares the kernel with this process
    Native,
    /// Daemon runs inside a VM
    DockerVm,
}

impl HostKind {
    pub fn detect() -> Self {
        let kernel = fs::read_to_string("/proc/sys/kernel/osrelease")
            .or_else(|_| fs::read_to_string("/proc/version"))
            .unwrap_or_default();
        if detect_docker_vm(std::env::consts::OS, &kernel) {
            HostKind::DockerVm
        } else {
            HostKind::Native
        }
    }

    pub fn loopback_host(self) -> &'static str {
        match self {
            HostKind::Native => "127.0.0.1",
            HostKind::DockerVm => "host.docker.internal",
        }
    }
}

pub fn detect_docker_vm(os: &str, kernel_release: &str) -> bool {
    let kernel = kernel_release.to_lowercase();
    matches!(os, "macos" | "windows") || kernel.contains("microsoft") || kernel.contains("darwin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_docker_vm() {
        assert!(detect_docker_vm("macos", ""));
        assert!(detect_docker_vm("linux", "5.15.90.1-microsoft-standard-WSL2"));
        assert!(!detect_docker_vm("linux", "6.1.0-18-amd64"));
    }

    #[test]
    fn test_loopback_host() {
        assert_eq!(HostKind::Native.loopback_host(), "127.0.0.1");
        assert_eq!(HostKind::DockerVm.loopback_host(), "host.docker.internal");
    }
}

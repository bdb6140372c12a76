//! Runtime backed by the `docker` command line client

use std::path::Path;
use std::process::{Command, Output};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{ContainerRecord, ContainerRuntime, ContainerState, NetworkSpec, RunSpec};
use crate::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};

/// Talks to the local daemon by shelling out to `docker`
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a different client binary (e.g. `podman`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd
    }

    fn exec(&self, mut cmd: Command) -> RuntimeResult<Output> {
        debug!(command = ?cmd, "docker call");
        cmd.output().map_err(|e| {
            RuntimeError::unavailable(format!("failed to run {}: {}", self.binary, e))
        })
    }

    /// Trimmed stdout of a successful command, or its classified failure
    fn finish(&self, output: Output) -> RuntimeResult<String> {
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(self.failure(&output))
        }
    }

    fn failure(&self, output: &Output) -> RuntimeError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            RuntimeError::new(
                RuntimeErrorKind::Other,
                format!("{} {}", self.binary, output.status),
            )
        } else {
            classify(&stderr)
        }
    }

    /// Run a command and return its trimmed stdout, classifying failures
    fn call<I, S>(&self, args: I) -> RuntimeResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = self.exec(self.command(args))?;
        self.finish(output)
    }

    /// Inspect containers by id, skipping ones removed since they were listed
    fn inspect(&self, ids: &[&str]) -> RuntimeResult<Vec<ContainerRecord>> {
        let mut args = vec!["container", "inspect", "--format", INSPECT_FORMAT];
        args.extend_from_slice(ids);
        let output = self.exec(self.command(args))?;
        if !output.status.success() {
            let err = self.failure(&output);
            if !err.is_not_found() {
                return Err(err);
            }
            debug!(error = %err, "container vanished before inspect");
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let records = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<InspectLine>(line)
                    .map(ContainerRecord::from)
                    .map_err(|e| {
                        RuntimeError::new(
                            RuntimeErrorKind::Other,
                            format!("unexpected docker inspect output: {}", e),
                        )
                    })
            })
            .collect();
        records
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-container line printed by `docker container inspect`
///
/// `Config.Image` is the reference the container was created from. The
/// `Image` column of `docker ps` degrades to an image id once the tag moves
/// to a rebuilt image, so it cannot be used to find fleet members.
const INSPECT_FORMAT: &str = r#"{"ID":{{json .Id}},"Name":{{json .Name}},"Image":{{json .Config.Image}},"State":{{json .State.Status}}}"#;

#[derive(Debug, Deserialize)]
struct InspectLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
}

impl From<InspectLine> for ContainerRecord {
    fn from(line: InspectLine) -> Self {
        ContainerRecord {
            id: line.id,
            name: line.name.trim_start_matches('/').to_string(),
            image: line.image,
            state: ContainerState::from(line.state.as_str()),
        }
    }
}

fn patterns() -> &'static [(RuntimeErrorKind, Regex); 4] {
    static PATTERNS: OnceLock<[(RuntimeErrorKind, Regex); 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |s: &str| Regex::new(s).expect("static pattern");
        [
            (
                RuntimeErrorKind::Unavailable,
                re(r"(?i)cannot connect to the docker daemon|error during connect|is the docker daemon running"),
            ),
            (
                RuntimeErrorKind::InUse,
                re(r"(?i)has active endpoints|is being used by|image is in use"),
            ),
            (
                RuntimeErrorKind::Conflict,
                re(r"(?i)conflict|already in use|already exists|port is already allocated|address already in use"),
            ),
            (RuntimeErrorKind::NotFound, re(r"(?i)no such|not found")),
        ]
    })
}

/// Map client stderr onto a runtime error kind
pub(crate) fn classify(stderr: &str) -> RuntimeError {
    let kind = patterns()
        .iter()
        .find(|(_, re)| re.is_match(stderr))
        .map(|(kind, _)| *kind)
        .unwrap_or(RuntimeErrorKind::Other);
    RuntimeError::new(kind, stderr)
}

fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec!["run".to_string()];
    if spec.detach {
        args.push("--detach".to_string());
    }
    if spec.auto_remove {
        args.push("--rm".to_string());
    }
    if spec.privileged {
        args.push("--privileged".to_string());
    }
    args.push("--name".to_string());
    args.push(spec.name.clone());
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }
    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(port.to_string());
    }
    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    for dns in &spec.dns {
        args.push("--dns".to_string());
        args.push(dns.clone());
    }
    args.push(spec.image.clone());
    args
}

impl ContainerRuntime for DockerCli {
    fn ping(&self) -> RuntimeResult<()> {
        self.call(["version", "--format", "{{.Server.Version}}"])
            .map(|version| debug!(%version, "docker daemon reachable"))
            .map_err(|e| RuntimeError::unavailable(e.message))
    }

    fn build_image(&self, context: &Path, tag: &str) -> RuntimeResult<()> {
        let context = context.to_string_lossy();
        self.call(["build", "--tag", tag, &*context]).map(|_| ())
    }

    fn image_exists(&self, tag: &str) -> RuntimeResult<bool> {
        self.call(["images", "--quiet", tag]).map(|out| !out.is_empty())
    }

    fn remove_image(&self, tag: &str) -> RuntimeResult<()> {
        self.call(["rmi", tag]).map(|_| ())
    }

    fn run_container(&self, spec: &RunSpec) -> RuntimeResult<String> {
        self.call(run_args(spec))
    }

    fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerRecord>> {
        let mut args = vec!["ps", "--quiet", "--no-trunc"];
        if all {
            args.push("--all");
        }
        let out = self.call(args)?;
        let ids: Vec<&str> = out
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.inspect(&ids)
    }

    fn kill_container(&self, name: &str, signal: &str) -> RuntimeResult<()> {
        self.call(["kill", "--signal", signal, name]).map(|_| ())
    }

    fn remove_container(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("--force");
        }
        args.push(name);
        self.call(args).map(|_| ())
    }

    fn wait_container(&self, name: &str) -> RuntimeResult<i64> {
        let mut cmd = self.command(["wait", name]);
        // Keep a terminal Ctrl+C aimed at us from killing the client
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        let out = self.finish(self.exec(cmd)?)?;
        out.lines()
            .last()
            .and_then(|code| code.trim().parse().ok())
            .ok_or_else(|| {
                RuntimeError::new(
                    RuntimeErrorKind::Other,
                    format!("unexpected docker wait output: {}", out),
                )
            })
    }

    fn network_exists(&self, name: &str) -> RuntimeResult<bool> {
        match self.call(["network", "inspect", "--format", "{{.Name}}", name]) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<()> {
        let mut args = vec!["network", "create", "--driver", spec.driver.as_str()];
        if spec.attachable {
            args.push("--attachable");
        }
        args.push(spec.name.as_str());
        self.call(args).map(|_| ())
    }

    fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.call(["network", "rm", name]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::PortBinding;

    #[test]
    fn test_classify_conflict() {
        let err = classify(
            "docker: Error response from daemon: Conflict. The container name \"/a\" is already in use",
        );
        assert_eq!(err.kind, RuntimeErrorKind::Conflict);

        let err = classify("Bind for 127.0.0.1:9000 failed: port is already allocated");
        assert_eq!(err.kind, RuntimeErrorKind::Conflict);
    }

    #[test]
    fn test_classify_other_kinds() {
        assert_eq!(
            classify("Error: No such container: tor_9000").kind,
            RuntimeErrorKind::NotFound
        );
        assert_eq!(
            classify("error while removing network: network proxyfleet id abc has active endpoints").kind,
            RuntimeErrorKind::InUse
        );
        assert_eq!(
            classify("Cannot connect to the Docker daemon at unix:///var/run/docker.sock.").kind,
            RuntimeErrorKind::Unavailable
        );
        assert_eq!(classify("something odd").kind, RuntimeErrorKind::Other);
    }

    #[test]
    fn test_run_args() {
        let mut spec = RunSpec::new("audibleblink/doxycannon", "us-east");
        spec.privileged = true;
        spec.env = vec![("VPN".to_string(), "us-east".to_string())];
        spec.ports = vec![PortBinding::loopback(9000, 1080)];
        spec.network = Some("proxyfleet".to_string());
        spec.dns = vec!["1.1.1.1".to_string()];

        let args = run_args(&spec);
        assert_eq!(
            args,
            vec![
                "run", "--detach", "--rm", "--privileged", "--name", "us-east", "--env",
                "VPN=us-east", "--publish", "127.0.0.1:9000:1080/tcp", "--network",
                "proxyfleet", "--dns", "1.1.1.1", "audibleblink/doxycannon",
            ]
        );
    }

    #[test]
    fn test_inspect_line_parse() {
        let line = r#"{"ID":"abc123","Name":"/tor_9000","Image":"audibleblink/tor","State":"running"}"#;
        let record: ContainerRecord = serde_json::from_str::<InspectLine>(line).unwrap().into();
        assert_eq!(record.name, "tor_9000");
        assert_eq!(record.image, "audibleblink/tor");
        assert_eq!(record.state, ContainerState::Running);
    }

    /// Client stand-in script; `body` is the shell run for every invocation
    #[cfg(unix)]
    fn fake_client(dir: &Path, body: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::with_binary(path.to_string_lossy())
    }

    #[cfg(unix)]
    #[test]
    fn test_signalled_client_reports_status() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docker = fake_client(tmp.path(), "kill -KILL $$");

        let err = docker.wait_container("doxyproxy").unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::Other);
        assert!(err.message.contains("signal"), "{}", err.message);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_uses_creation_image() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docker = fake_client(
            tmp.path(),
            r#"case "$1" in
  ps) printf 'abc\ndef\n' ;;
  container)
    echo '{"ID":"abc","Name":"/a","Image":"audibleblink/doxycannon","State":"running"}'
    echo 'Error: No such container: def' >&2
    exit 1 ;;
esac"#,
        );

        let records = docker.list_containers(false).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "a");
        assert_eq!(records[0].image, "audibleblink/doxycannon");
    }
}

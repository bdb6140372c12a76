//! In-process runtime
//!
//! Keeps containers, images and networks in memory and counts every call.
//! Used by the test suite and by embedders who want to drive the
//! orchestrator without a daemon.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::{ContainerRecord, ContainerRuntime, ContainerState, NetworkSpec, RunSpec};
use crate::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};

#[derive(Debug, Clone)]
struct Entry {
    record: ContainerRecord,
    spec: RunSpec,
    exit_code: i64,
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, Entry>,
    images: BTreeSet<String>,
    networks: BTreeMap<String, NetworkSpec>,
    failing: HashSet<String>,
    wait_error: Option<RuntimeError>,
    next_id: u64,
}

/// Counters for each kind of runtime call
#[derive(Debug, Default)]
pub struct CallCounts {
    pub run: AtomicUsize,
    pub kill: AtomicUsize,
    pub remove: AtomicUsize,
    pub list: AtomicUsize,
    pub build: AtomicUsize,
    pub network_create: AtomicUsize,
    pub network_remove: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
    changed: Condvar,
    calls: CallCounts,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Option<Duration>,
}

/// Tracks concurrent container calls for the duration of one call
struct InFlight<'a>(&'a InMemoryRuntime);

impl<'a> InFlight<'a> {
    fn enter(rt: &'a InMemoryRuntime) -> Self {
        let now = rt.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        rt.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = rt.latency {
            std::thread::sleep(latency);
        }
        Self(rt)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every container call, so concurrent calls overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `run_container` reject this container name with a conflict
    pub fn fail_container(&self, name: &str) {
        self.lock().failing.insert(name.to_string());
    }

    /// Make every `wait_container` call fail with `err`
    pub fn fail_wait(&self, err: RuntimeError) {
        self.lock().wait_error = Some(err);
    }

    /// Register an image as already built
    pub fn add_image(&self, tag: &str) {
        self.lock().images.insert(tag.to_string());
    }

    /// Add a container directly, bypassing `run_container`
    pub fn insert_container(&self, name: &str, image: &str, state: ContainerState) {
        let mut st = self.lock();
        st.next_id += 1;
        let id = format!("{:012x}", st.next_id);
        let mut spec = RunSpec::new(image, name);
        spec.auto_remove = false;
        st.containers.insert(
            name.to_string(),
            Entry {
                record: ContainerRecord {
                    id,
                    name: name.to_string(),
                    image: image.to_string(),
                    state,
                },
                spec,
                exit_code: 0,
            },
        );
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Highest number of container calls observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    /// The spec a container was started with
    pub fn run_spec(&self, name: &str) -> Option<RunSpec> {
        self.lock().containers.get(name).map(|e| e.spec.clone())
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.lock().networks.contains_key(name)
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.lock().images.contains(tag)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ContainerRuntime for InMemoryRuntime {
    fn ping(&self) -> RuntimeResult<()> {
        Ok(())
    }

    fn build_image(&self, _context: &Path, tag: &str) -> RuntimeResult<()> {
        self.calls.build.fetch_add(1, Ordering::SeqCst);
        self.lock().images.insert(tag.to_string());
        Ok(())
    }

    fn image_exists(&self, tag: &str) -> RuntimeResult<bool> {
        Ok(self.lock().images.contains(tag))
    }

    fn remove_image(&self, tag: &str) -> RuntimeResult<()> {
        let mut st = self.lock();
        if st.containers.values().any(|e| e.record.image == tag) {
            return Err(RuntimeError::new(
                RuntimeErrorKind::InUse,
                format!("image {} is in use by a container", tag),
            ));
        }
        if st.images.remove(tag) {
            Ok(())
        } else {
            Err(RuntimeError::not_found(format!("No such image: {}", tag)))
        }
    }

    fn run_container(&self, spec: &RunSpec) -> RuntimeResult<String> {
        let _guard = InFlight::enter(self);
        self.calls.run.fetch_add(1, Ordering::SeqCst);

        let mut st = self.lock();
        if st.failing.contains(&spec.name) || st.containers.contains_key(&spec.name) {
            return Err(RuntimeError::conflict(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let bound = st
            .containers
            .values()
            .filter(|e| e.record.state == ContainerState::Running)
            .flat_map(|e| e.spec.ports.iter().map(|p| p.host_port))
            .collect::<HashSet<_>>();
        if let Some(port) = spec.ports.iter().find(|p| bound.contains(&p.host_port)) {
            return Err(RuntimeError::conflict(format!(
                "Bind for {} failed: port is already allocated",
                port
            )));
        }
        if let Some(network) = &spec.network {
            if network != "host" && !st.networks.contains_key(network) {
                return Err(RuntimeError::not_found(format!(
                    "network {} not found",
                    network
                )));
            }
        }

        st.next_id += 1;
        let id = format!("{:012x}", st.next_id);
        st.containers.insert(
            spec.name.clone(),
            Entry {
                record: ContainerRecord {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    state: ContainerState::Running,
                },
                spec: spec.clone(),
                exit_code: 0,
            },
        );
        Ok(id)
    }

    fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerRecord>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .containers
            .values()
            .filter(|e| all || e.record.state == ContainerState::Running)
            .map(|e| e.record.clone())
            .collect())
    }

    fn kill_container(&self, name: &str, _signal: &str) -> RuntimeResult<()> {
        let _guard = InFlight::enter(self);
        self.calls.kill.fetch_add(1, Ordering::SeqCst);

        let mut st = self.lock();
        let entry = match st.containers.get_mut(name) {
            Some(entry) if entry.record.state == ContainerState::Running => entry,
            Some(_) => {
                return Err(RuntimeError::conflict(format!(
                    "Container {} is not running",
                    name
                )))
            }
            None => return Err(RuntimeError::not_found(format!("No such container: {}", name))),
        };
        entry.record.state = ContainerState::Exited;
        entry.exit_code = 137;
        if entry.spec.auto_remove {
            st.containers.remove(name);
        }
        drop(st);
        self.changed.notify_all();
        Ok(())
    }

    fn remove_container(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let _guard = InFlight::enter(self);
        self.calls.remove.fetch_add(1, Ordering::SeqCst);

        let mut st = self.lock();
        match st.containers.get(name) {
            None => return Err(RuntimeError::not_found(format!("No such container: {}", name))),
            Some(e) if e.record.state == ContainerState::Running && !force => {
                return Err(RuntimeError::conflict(format!(
                    "You cannot remove a running container {}",
                    name
                )))
            }
            Some(_) => {}
        }
        st.containers.remove(name);
        drop(st);
        self.changed.notify_all();
        Ok(())
    }

    fn wait_container(&self, name: &str) -> RuntimeResult<i64> {
        let mut st = self.lock();
        if let Some(err) = &st.wait_error {
            return Err(err.clone());
        }
        if !st.containers.contains_key(name) {
            return Err(RuntimeError::not_found(format!("No such container: {}", name)));
        }
        loop {
            match st.containers.get(name) {
                Some(e) if e.record.state == ContainerState::Running => {}
                Some(e) => return Ok(e.exit_code),
                None => return Ok(137),
            }
            st = self
                .changed
                .wait(st)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn network_exists(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.lock().networks.contains_key(name))
    }

    fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<()> {
        self.calls.network_create.fetch_add(1, Ordering::SeqCst);
        let mut st = self.lock();
        if st.networks.contains_key(&spec.name) {
            return Err(RuntimeError::conflict(format!(
                "network with name {} already exists",
                spec.name
            )));
        }
        st.networks.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.calls.network_remove.fetch_add(1, Ordering::SeqCst);
        let mut st = self.lock();
        if !st.networks.contains_key(name) {
            return Err(RuntimeError::not_found(format!("network {} not found", name)));
        }
        let attached = st
            .containers
            .values()
            .any(|e| e.spec.network.as_deref() == Some(name));
        if attached {
            return Err(RuntimeError::new(
                RuntimeErrorKind::InUse,
                format!("error while removing network: network {} has active endpoints", name),
            ));
        }
        st.networks.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::PortBinding;

    fn spec(name: &str, port: u16) -> RunSpec {
        let mut spec = RunSpec::new("img", name);
        spec.ports = vec![PortBinding::loopback(port, 1080)];
        spec
    }

    #[test]
    fn test_run_and_kill_auto_removes() {
        let rt = InMemoryRuntime::new();
        rt.run_container(&spec("a", 9000)).unwrap();
        assert_eq!(rt.list_containers(false).unwrap().len(), 1);

        rt.kill_container("a", "SIGKILL").unwrap();
        assert!(rt.list_containers(true).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_name_and_port_conflict() {
        let rt = InMemoryRuntime::new();
        rt.run_container(&spec("a", 9000)).unwrap();

        let err = rt.run_container(&spec("a", 9001)).unwrap_err();
        assert!(err.is_conflict());

        let err = rt.run_container(&spec("b", 9000)).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.message.contains("port is already allocated"));
    }

    #[test]
    fn test_network_lifecycle() {
        let rt = InMemoryRuntime::new();
        rt.create_network(&NetworkSpec::bridge("net")).unwrap();
        assert!(rt.create_network(&NetworkSpec::bridge("net")).unwrap_err().is_conflict());

        let mut s = spec("a", 9000);
        s.network = Some("net".to_string());
        rt.run_container(&s).unwrap();
        assert_eq!(
            rt.remove_network("net").unwrap_err().kind,
            RuntimeErrorKind::InUse
        );

        rt.kill_container("a", "SIGKILL").unwrap();
        rt.remove_network("net").unwrap();
        assert!(!rt.has_network("net"));
    }

    #[test]
    fn test_wait_returns_after_kill() {
        let rt = std::sync::Arc::new(InMemoryRuntime::new());
        rt.run_container(&spec("a", 9000)).unwrap();

        let waiter = {
            let rt = rt.clone();
            std::thread::spawn(move || rt.wait_container("a"))
        };
        std::thread::sleep(Duration::from_millis(20));
        rt.kill_container("a", "SIGKILL").unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), 137);
    }
}

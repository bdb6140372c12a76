//! Bounded worker pool for container lifecycle tasks
//!
//! Tasks are immutable values carrying everything their runtime call needs.
//! They are queued on a channel before any worker starts; a fixed number of
//! workers drain it, and [`WorkerPool::run`] returns once every task has been
//! marked done. A failed task is logged and counted, never propagated: the
//! rest of the batch carries on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::channel;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result, RuntimeErrorKind, RuntimeResult};
use crate::fleet::PortAssignment;
use crate::runtime::{
    ContainerRecord, ContainerRuntime, PortBinding, RunSpec, CONTAINER_SOCKS_PORT,
};

/// Default number of workers
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Signal sent by stop tasks
pub const STOP_SIGNAL: &str = "SIGKILL";

/// One unit of lifecycle work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Start(RunSpec),
    Stop(ContainerRecord),
    Remove(ContainerRecord),
}

/// Fleet-wide options applied to every start task
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub network: Option<String>,
    pub dns: Vec<String>,
}

impl Task {
    /// Start task for one proxy container
    pub fn start(assignment: &PortAssignment, image: &str, options: &StartOptions) -> Self {
        let mut spec = RunSpec::new(image, assignment.name());
        spec.env = assignment.source.container_env();
        spec.ports = vec![PortBinding::loopback(assignment.port, CONTAINER_SOCKS_PORT)];
        spec.network = options.network.clone();
        spec.dns = options.dns.clone();
        spec.privileged = true;
        spec.auto_remove = true;
        spec.detach = true;
        Task::Start(spec)
    }

    pub fn container_name(&self) -> &str {
        match self {
            Task::Start(spec) => &spec.name,
            Task::Stop(record) | Task::Remove(record) => &record.name,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Task::Start(_) => "start",
            Task::Stop(_) => "stop",
            Task::Remove(_) => "remove",
        }
    }

    fn execute(&self, runtime: &dyn ContainerRuntime) -> RuntimeResult<()> {
        match self {
            Task::Start(spec) => runtime.run_container(spec).map(|_| ()),
            Task::Stop(record) => runtime.kill_container(&record.name, STOP_SIGNAL),
            Task::Remove(record) => runtime.remove_container(&record.name, true),
        }
    }

    fn announce(&self, quiet: bool) {
        let name = self.container_name();
        match self {
            Task::Start(spec) => {
                let port = spec.ports.first().map(|p| p.host_port);
                let path = spec
                    .env
                    .iter()
                    .find(|(k, _)| k == "VPNPATH")
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("");
                if quiet {
                    debug!(container = name, ?port, path, "starting");
                } else {
                    info!(container = name, ?port, path, "starting");
                }
            }
            Task::Stop(_) if quiet => debug!(container = name, "stopping"),
            Task::Stop(_) => info!(container = name, "stopping"),
            Task::Remove(_) if quiet => debug!(container = name, "deleting"),
            Task::Remove(_) => info!(container = name, "deleting"),
        }
    }
}

/// Fixed-width pool of blocking workers sharing one runtime handle
pub struct WorkerPool {
    runtime: Arc<dyn ContainerRuntime>,
    concurrency: usize,
    quiet: bool,
}

impl WorkerPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(FleetError::InvalidConcurrency);
        }
        Ok(Self {
            runtime,
            concurrency,
            quiet: false,
        })
    }

    /// Demote per-task progress to debug level
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every task, blocking until all of them are done
    pub fn run(&self, tasks: Vec<Task>) {
        let total = tasks.len();
        if total == 0 {
            debug!("no tasks queued");
            return;
        }

        let (tx, rx) = channel::unbounded::<Task>();
        for task in tasks {
            // The receiver is alive until the scope below ends
            let _ = tx.send(task);
        }
        drop(tx);

        let done = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let started = Instant::now();

        thread::scope(|s| {
            for worker in 0..self.concurrency {
                let rx = rx.clone();
                let done = &done;
                let failed = &failed;
                s.spawn(move || {
                    while let Ok(task) = rx.recv() {
                        if !self.perform(worker, &task) {
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        let done = done.into_inner();
        let failed = failed.into_inner();
        debug_assert_eq!(done, total);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if failed > 0 {
            warn!(total = done, failed, elapsed_ms, "batch finished with failures");
        } else if self.quiet {
            debug!(total = done, elapsed_ms, "batch finished");
        } else {
            info!(total = done, elapsed_ms, "batch finished");
        }
    }

    /// Execute one task, returning whether it succeeded
    fn perform(&self, worker: usize, task: &Task) -> bool {
        task.announce(self.quiet);
        match task.execute(self.runtime.as_ref()) {
            Ok(()) => true,
            Err(e) if e.kind == RuntimeErrorKind::NotFound && !matches!(task, Task::Start(_)) => {
                debug!(worker, container = task.container_name(), "container already gone");
                true
            }
            Err(e) => {
                warn!(
                    worker,
                    container = task.container_name(),
                    action = task.verb(),
                    error = %e,
                    "task failed"
                );
                if e.is_conflict() && matches!(task, Task::Start(_)) {
                    warn!("run `clean` to delete conflicting containers");
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{assign, ProxySource};
    use crate::runtime::{ContainerState, InMemoryRuntime};
    use std::time::Duration;

    fn start_tasks(n: usize) -> Vec<Task> {
        let sources = (0..n)
            .map(|i| ProxySource::synthetic(format!("node{}", i), "VPN"))
            .collect();
        assign(sources, 9000)
            .unwrap()
            .iter()
            .map(|a| Task::start(a, "img", &StartOptions::default()))
            .collect()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let rt = Arc::new(InMemoryRuntime::new());
        assert!(matches!(
            WorkerPool::new(rt, 0),
            Err(FleetError::InvalidConcurrency)
        ));
    }

    #[test]
    fn test_empty_batch_returns_immediately() {
        let rt = Arc::new(InMemoryRuntime::new());
        let pool = WorkerPool::new(rt.clone(), 10).unwrap();
        pool.run(Vec::new());
        assert_eq!(rt.calls().run.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_all_tasks_done_for_any_width() {
        for width in [1, 3, 10, 25] {
            let rt = Arc::new(InMemoryRuntime::new().with_latency(Duration::from_millis(2)));
            let pool = WorkerPool::new(rt.clone(), width).unwrap();
            pool.run(start_tasks(12));

            assert_eq!(rt.calls().run.load(Ordering::SeqCst), 12, "width {}", width);
            assert_eq!(rt.container_names().len(), 12, "width {}", width);
            assert!(rt.peak_concurrency() <= width, "width {}", width);
        }
    }

    #[test]
    fn test_sequential_pool_never_overlaps() {
        let rt = Arc::new(InMemoryRuntime::new().with_latency(Duration::from_millis(5)));
        let pool = WorkerPool::new(rt.clone(), 1).unwrap();
        pool.run(start_tasks(5));
        assert_eq!(rt.peak_concurrency(), 1);
    }

    #[test]
    fn test_failed_start_does_not_block_siblings() {
        let rt = Arc::new(InMemoryRuntime::new());
        rt.fail_container("node1");
        let pool = WorkerPool::new(rt.clone(), 4).unwrap();
        pool.run(start_tasks(4));

        assert_eq!(rt.calls().run.load(Ordering::SeqCst), 4);
        assert_eq!(rt.container_names(), vec!["node0", "node2", "node3"]);
    }

    #[test]
    fn test_stop_and_remove_tasks() {
        let rt = Arc::new(InMemoryRuntime::new());
        let pool = WorkerPool::new(rt.clone(), 2).unwrap();
        pool.run(start_tasks(3));

        let running = rt.list_containers(false).unwrap();
        pool.run(running.into_iter().map(Task::Stop).collect());
        assert!(rt.list_containers(true).unwrap().is_empty());
        assert_eq!(rt.calls().kill.load(Ordering::SeqCst), 3);

        rt.insert_container("old", "img", ContainerState::Exited);
        let stopped = rt.list_containers(true).unwrap();
        pool.run(stopped.into_iter().map(Task::Remove).collect());
        assert!(rt.container_names().is_empty());
    }

    #[test]
    fn test_start_task_spec() {
        let assignment = assign(vec![ProxySource::synthetic("tor_9000", "tor")], 9000)
            .unwrap()
            .remove(0);
        let options = StartOptions {
            network: Some("proxyfleet".to_string()),
            dns: vec!["1.1.1.1".to_string()],
        };
        let Task::Start(spec) = Task::start(&assignment, "audibleblink/tor", &options) else {
            panic!("expected a start task");
        };
        assert_eq!(spec.name, "tor_9000");
        assert_eq!(spec.ports, vec![PortBinding::loopback(9000, 1080)]);
        assert_eq!(spec.network.as_deref(), Some("proxyfleet"));
        assert!(spec.privileged && spec.auto_remove && spec.detach);
        assert!(spec.env.contains(&("VPNPATH".to_string(), "/tor".to_string())));
    }
}

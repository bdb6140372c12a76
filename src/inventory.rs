//! Lookup of fleet containers by source image

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::runtime::{ContainerRecord, ContainerRuntime};

pub struct ContainerInventory {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerInventory {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Containers whose image contains `image`, stopped ones included on request
    pub fn list(&self, image: &str, include_stopped: bool) -> Result<Vec<ContainerRecord>> {
        let records: Vec<ContainerRecord> = self
            .runtime
            .list_containers(include_stopped)?
            .into_iter()
            .filter(|record| record.image.contains(image))
            .collect();
        debug!(image, include_stopped, count = records.len(), "inventory");
        Ok(records)
    }

    /// Whether any container of `image` is running
    pub fn is_running(&self, image: &str) -> Result<bool> {
        Ok(!self.list(image, false)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerState, InMemoryRuntime};

    fn runtime() -> Arc<InMemoryRuntime> {
        let rt = Arc::new(InMemoryRuntime::new());
        rt.insert_container("a", "audibleblink/doxycannon", ContainerState::Running);
        rt.insert_container("b", "audibleblink/doxycannon:latest", ContainerState::Exited);
        rt.insert_container("tor_9000", "audibleblink/tor", ContainerState::Running);
        rt
    }

    #[test]
    fn test_list_running_only() {
        let inventory = ContainerInventory::new(runtime());
        let names: Vec<String> = inventory
            .list("doxycannon", false)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_list_includes_stopped() {
        let inventory = ContainerInventory::new(runtime());
        assert_eq!(inventory.list("audibleblink/doxycannon", true).unwrap().len(), 2);
        assert_eq!(inventory.list("audibleblink", true).unwrap().len(), 3);
    }

    #[test]
    fn test_is_running() {
        let inventory = ContainerInventory::new(runtime());
        assert!(inventory.is_running("tor").unwrap());
        assert!(!inventory.is_running("doxyproxy").unwrap());
    }
}

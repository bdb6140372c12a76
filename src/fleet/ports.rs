//! Deterministic port allocation

use serde::Serialize;

use super::sources::ProxySource;
use crate::error::{FleetError, Result};

/// One source paired with the host port its container publishes on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortAssignment {
    pub source: ProxySource,
    pub port: u16,
}

impl PortAssignment {
    pub fn name(&self) -> &str {
        &self.source.name
    }
}

/// Contiguous ports `[base, base + n)`
pub fn allocate(n: usize, base: u16) -> Result<Vec<u16>> {
    let end = base as usize + n;
    if end > u16::MAX as usize + 1 {
        return Err(FleetError::PortRange { base, count: n });
    }
    Ok((base as usize..end).map(|p| p as u16).collect())
}

/// Pair the i-th source with the i-th allocated port
pub fn assign(sources: Vec<ProxySource>, base: u16) -> Result<Vec<PortAssignment>> {
    let ports = allocate(sources.len(), base)?;
    Ok(sources
        .into_iter()
        .zip(ports)
        .map(|(source, port)| PortAssignment { source, port })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_allocate_range() {
        assert_eq!(allocate(3, 9000).unwrap(), vec![9000, 9001, 9002]);
        assert!(allocate(0, 9000).unwrap().is_empty());
    }

    #[test]
    fn test_allocate_upper_bound() {
        assert_eq!(allocate(1, u16::MAX).unwrap(), vec![u16::MAX]);
        assert!(matches!(
            allocate(2, u16::MAX),
            Err(FleetError::PortRange { count: 2, .. })
        ));
    }

    #[test]
    fn test_assign_is_positional_and_bijective() {
        let sources: Vec<ProxySource> = ["c", "a", "b", "d", "e"]
            .iter()
            .map(|n| ProxySource::synthetic(*n, "tor"))
            .collect();
        let assignments = assign(sources, 9100).unwrap();

        let names: Vec<&str> = assignments.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["c", "a", "b", "d", "e"]);

        let ports: BTreeSet<u16> = assignments.iter().map(|a| a.port).collect();
        assert_eq!(ports, (9100..9105).collect::<BTreeSet<u16>>());
        assert_eq!(assignments[0].port, 9100);
        assert_eq!(assignments[4].port, 9104);
    }
}

//! Fleet planning: which sources exist and which port each one gets

pub mod ports;
pub mod sources;

pub use ports::{allocate, assign, PortAssignment};
pub use sources::{enumerate_counted, enumerate_dir, ProxySource, SourceKind, SourceSpec};

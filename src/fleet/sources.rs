//! Proxy source discovery
//!
//! A source is one credential file under a directory root, or one synthetic
//! node identifier for a counted fleet. Enumeration order is deterministic
//! because ports are handed out positionally.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::ports::{self, PortAssignment};
use crate::error::{FleetError, Result};

/// Where a source came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    /// A credential file on disk
    File(PathBuf),
    /// A generated identifier with no backing file
    Synthetic,
}

/// One unit of egress, driving one fleet container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxySource {
    pub kind: SourceKind,
    /// Container name and backend label
    pub name: String,
    /// Logical subtree handed to the container as `VPNPATH`
    pub group: String,
}

impl ProxySource {
    pub fn synthetic(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Synthetic,
            name: name.into(),
            group: group.into(),
        }
    }

    pub fn file(path: PathBuf, name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::File(path),
            name: name.into(),
            group: group.into(),
        }
    }

    /// Environment handed to the proxy container
    pub fn container_env(&self) -> Vec<(String, String)> {
        vec![
            ("VPN".to_string(), self.name.clone()),
            ("VPNPATH".to_string(), format!("/{}", self.group)),
        ]
    }
}

/// How to discover the sources of one fleet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Every `*.<extension>` file below `root`
    Directory { root: PathBuf, extension: String },
    /// `count` synthetic nodes named `<prefix>_<port>`
    Counted { prefix: String, count: usize },
}

impl SourceSpec {
    /// Enumerate the sources and pair them with ports starting at `base`
    pub fn plan(&self, base: u16) -> Result<Vec<PortAssignment>> {
        match self {
            SourceSpec::Directory { root, extension } => {
                ports::assign(enumerate_dir(root, extension)?, base)
            }
            SourceSpec::Counted { prefix, count } => {
                let ports = ports::allocate(*count, base)?;
                let sources = enumerate_counted(prefix, &ports);
                Ok(sources
                    .into_iter()
                    .zip(ports)
                    .map(|(source, port)| PortAssignment { source, port })
                    .collect())
            }
        }
    }
}

/// Synthetic sources for already-allocated ports, named after their port
pub fn enumerate_counted(prefix: &str, ports: &[u16]) -> Vec<ProxySource> {
    ports
        .iter()
        .map(|port| ProxySource::synthetic(format!("{}_{}", prefix, port), prefix))
        .collect()
}

/// Recursively find credential files under `root`, sorted by path
pub fn enumerate_dir(root: &Path, extension: &str) -> Result<Vec<ProxySource>> {
    if !root.is_dir() {
        return Err(FleetError::SourceDir(root.to_path_buf()));
    }

    let mut files = Vec::new();
    collect_files(root, extension, &mut files)?;
    files.sort();

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(files.len());
    for path in files {
        let Some(name) = source_name(&path) else {
            warn!(path = %path.display(), "skipping credential file with unusable name");
            continue;
        };
        if !seen.insert(name.clone()) {
            warn!(path = %path.display(), %name, "skipping credential file with duplicate name");
            continue;
        }
        let group = source_group(root, &path);
        debug!(path = %path.display(), %name, %group, "found source");
        sources.push(ProxySource::file(path, name, group));
    }
    Ok(sources)
}

fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, extension, out)?;
        } else if path.is_file() && path.extension().is_some_and(|e| e == extension) {
            out.push(path);
        }
    }
    Ok(())
}

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("static pattern"))
}

/// File stem reduced to the container-name alphabet
fn source_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy();
    let name = invalid_chars().replace_all(&stem, "_");
    let name = name.trim_start_matches(['_', '.', '-']);
    (!name.is_empty()).then(|| name.to_string())
}

/// Parent directory of `path`, starting from the root directory's own name
fn source_group(root: &Path, path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(root_name) = root.file_name() {
        parts.push(root_name.to_string_lossy().into_owned());
    }
    if let Some(parent) = path.parent().and_then(|p| p.strip_prefix(root).ok()) {
        parts.extend(parent.components().filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        }));
    }
    parts.join("/")
}

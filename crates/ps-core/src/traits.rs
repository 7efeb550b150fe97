//! Collaborator traits for PSelector
//!
//! Topology extraction and artifact serialization live outside this
//! workspace. These traits are the seams where they plug in, so the
//! generator does not depend on any concrete file format.

use std::path::PathBuf;

use crate::{Result, Topology};

/// Source of a reaction topology.
pub trait TopologySource {
    /// Load the topology.
    fn load(&self) -> Result<Topology>;

    /// Human-readable description of the source (used in logs).
    fn describe(&self) -> String;
}

/// Topology stored as JSON on disk.
#[derive(Debug, Clone)]
pub struct TopologyFile {
    path: PathBuf,
}

impl TopologyFile {
    /// Create a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TopologySource for TopologyFile {
    fn load(&self) -> Result<Topology> {
        let json = std::fs::read_to_string(&self.path)?;
        Topology::from_json(&json)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl TopologySource for Topology {
    fn load(&self) -> Result<Topology> {
        self.validate()?;
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        self.tree_name.clone().unwrap_or_else(|| "<in-memory topology>".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn in_memory_topology_is_its_own_source() {
        let topo = Topology::default().with_tree_name("x_Tree");
        assert_eq!(topo.describe(), "x_Tree");
        assert_eq!(topo.load().unwrap(), topo);
    }

    #[test]
    fn missing_file_is_io_error() {
        let src = TopologyFile::new("/nonexistent/topology.json");
        assert!(matches!(src.load(), Err(Error::Io(_))));
    }
}

//! # ps-core
//!
//! Core types for PSelector: the error taxonomy, the reaction topology model
//! and the traits through which external collaborators plug in.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{TopologyFile, TopologySource};
pub use types::{ParticleRole, ReactionStep, RoleKind, SpeciesTag, Topology};

//! # ps-selector
//!
//! Per-event selector generation for PSelector.
//!
//! Turns an analysis config and a reaction topology into the structure of a
//! per-event analysis pass:
//! - histogram declarations, with inherited and double-filled parameters
//! - uniqueness (dedup) groups over combinatorial candidates
//! - nested boost frames over the shared vector list
//! - the ordered per-candidate cut/weight/hook/fill procedure
//!
//! Text emission is left to a [`SelectorEmitter`].

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod boost;
pub mod config;
pub mod expr;
pub mod generate;
pub mod pipeline;
pub mod registry;
pub mod resolve;
pub mod unique;

pub use config::{AnalysisConfig, parse_json, parse_yaml, read_config};
pub use generate::{GeneratedSelector, JsonEmitter, SelectorBuilder, SelectorEmitter};
pub use pipeline::{CandidateHook, CandidateInputs, EventProcedure, EventRecord, accumulate_weight};
pub use registry::DescriptorRegistry;
pub use resolve::ParameterResolver;

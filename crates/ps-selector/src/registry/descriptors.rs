//! Typed descriptors built from the analysis config.

use serde::Serialize;

use crate::config::{AccidentalMode, GatePolicy, ValueType};

/// Default fill weight.
pub const DEFAULT_WEIGHT: &str = "locWeight";

// ── Histograms ─────────────────────────────────────────────────

/// Histogram axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Axis {
    X,
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Axis::X => "x",
            Axis::Y => "y",
        })
    }
}

/// Fields of one axis as written in the config. Unset fields may be filled
/// from `source` (always that histogram's x axis).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AxisSpec {
    pub expression: Option<String>,
    pub range: Option<(f64, f64)>,
    pub bins: Option<u32>,
    pub label: Option<String>,
    pub source: Option<String>,
}

/// How a histogram obtains its storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HistogramKind {
    /// Declares its own storage from its own fields.
    Direct,
    /// Declares its own storage, inheriting unset axis fields.
    Inherited,
    /// Fills the storage of `target`; declares none.
    Destination { target: String },
}

/// Histogram dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dimension {
    One,
    Two,
}

/// One histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramDescriptor {
    pub name: String,
    pub title: String,
    /// Fill weight expression.
    pub weight: String,
    pub dimension: Dimension,
    pub x: AxisSpec,
    pub y: AxisSpec,
    pub kind: HistogramKind,
}

impl HistogramDescriptor {
    /// Axis spec for `axis`.
    pub fn axis(&self, axis: Axis) -> &AxisSpec {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    /// Whether this histogram declares storage of its own.
    pub fn declares_storage(&self) -> bool {
        !matches!(self.kind, HistogramKind::Destination { .. })
    }
}

// ── Uniqueness groups ──────────────────────────────────────────

/// Particles a uniqueness group tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TrackedParticles {
    /// No dedup: every surviving candidate fills.
    None,
    /// Every trackable role plus the beam.
    All,
    /// The listed roles.
    Explicit(Vec<String>),
}

/// One uniqueness group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniquenessGroup {
    pub name: String,
    pub tracked: TrackedParticles,
    /// Histograms filled by this group, in fill order.
    pub histograms: Vec<String>,
    /// Gating cut names; `None` means the candidate's survival gates the fill.
    pub gating_cuts: Option<Vec<String>>,
    pub gate_policy: GatePolicy,
    pub folder: String,
    /// Injected to catch histograms no declared group fills.
    pub injected: bool,
}

// ── Boosts, cuts, weights ──────────────────────────────────────

/// A boost frame and its nested frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoostFrame {
    pub name: String,
    /// Boost four-vector expression, written in the parent frame.
    pub boost_vector: String,
    pub children: Vec<BoostFrame>,
}

/// A rejection condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutRule {
    pub name: String,
    pub enabled: bool,
    pub condition: String,
}

/// A multiplicative weight factor applied under a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightRule {
    pub name: String,
    pub enabled: bool,
    pub condition: String,
    pub weight: String,
    /// Setup lines emitted before the condition.
    pub setup: Vec<String>,
}

// ── Output branches and auxiliary code ─────────────────────────

/// Scalar or array-valued branch payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BranchShape {
    Scalar { value: String },
    Array { array_name: String, values: Vec<String> },
}

/// One flat output branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputBranch {
    /// Config key.
    pub name: String,
    /// Branch name in the output tree.
    pub branch: String,
    pub value_type: ValueType,
    pub shape: BranchShape,
}

impl OutputBranch {
    /// Declared branch name: `branch` for scalars, `branch_arrayname` for arrays.
    pub fn declared_name(&self) -> String {
        match &self.shape {
            BranchShape::Scalar { .. } => self.branch.clone(),
            BranchShape::Array { array_name, .. } => format!("{}_{array_name}", self.branch),
        }
    }

    /// Count branch of an array branch.
    pub fn count_branch(&self) -> Option<String> {
        match &self.shape {
            BranchShape::Scalar { .. } => None,
            BranchShape::Array { array_name, .. } => Some(format!("Num{array_name}")),
        }
    }
}

/// An extra four-vector defined by an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuxVector {
    pub name: String,
    pub expression: String,
}

/// A named block of auxiliary code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuxCode {
    pub name: String,
    pub lines: Vec<String>,
}

/// Accidental handling after resolving defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Accidentals {
    pub mode: AccidentalMode,
    /// Configured bunch count; the topology tree name is consulted when unset.
    pub out_of_time_bunches: Option<u32>,
}

//! Analysis configuration schema types.
//!
//! Every keyed section keeps declaration order (`IndexMap`): cuts and weight
//! rules run in the order they are written, and groups, frames and histograms
//! are declared in that order too.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Top-level analysis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Histogram definitions.
    pub histograms: IndexMap<String, HistogramEntry>,
    /// Uniqueness (dedup) groups.
    pub uniqueness: IndexMap<String, UniquenessEntry>,
    /// Root boost frames (children nest under each entry).
    pub boosts: IndexMap<String, BoostEntry>,
    /// Candidate cuts.
    pub cuts: IndexMap<String, CutEntry>,
    /// Candidate weight rules.
    pub weights: IndexMap<String, WeightEntry>,
    /// Flat output-tree branches.
    pub output: IndexMap<String, OutputEntry>,
    /// Extra four-vectors appended to the shared vector list.
    pub vectors: IndexMap<String, String>,
    /// Named auxiliary code blocks.
    pub variables: IndexMap<String, CodeLines>,
    /// Free auxiliary code lines.
    pub code: Vec<String>,
    /// Accidental-coincidence handling.
    pub accidentals: AccidentalsEntry,
}

/// One histogram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramEntry {
    pub x: Option<String>,
    pub xrange: Option<[f64; 2]>,
    pub xbins: Option<u32>,
    pub xlabel: Option<String>,
    pub y: Option<String>,
    pub yrange: Option<[f64; 2]>,
    pub ybins: Option<u32>,
    pub ylabel: Option<String>,
    pub title: Option<String>,
    pub weight: Option<String>,
    /// Inherit unset x-axis fields from this histogram.
    pub xhist: Option<String>,
    /// Inherit unset y-axis fields from this histogram's x axis.
    pub yhist: Option<String>,
    /// Fill this histogram's storage instead of declaring one.
    pub destination: Option<String>,
}

/// One uniqueness group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniquenessEntry {
    /// `all`, `none`, a single role name, or a list of role names.
    pub particles: StringOrArray,
    /// `all`, a single histogram name, or a list of histogram names.
    #[serde(default)]
    pub histograms: StringOrArray,
    /// Gating cuts (a single cut name or a list).
    #[serde(default)]
    pub cuts: Option<StringOrArray>,
    /// Output folder; defaults to the group name.
    #[serde(default)]
    pub folder: Option<String>,
    /// How gating cut conditions are combined.
    #[serde(default)]
    pub gate: GatePolicy,
}

/// Combination rule for a group's gating cuts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatePolicy {
    /// Fill when at least one listed condition is true.
    #[default]
    #[serde(rename = "any")]
    AnyTrue,
    /// Fill when no listed condition is true.
    #[serde(rename = "none")]
    NoneTrue,
}

/// One boost frame and its children.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoostEntry {
    /// Four-vector expression defining the frame, evaluated in the parent frame.
    pub boostvector: String,
    /// Nested frames, boosted from this one.
    #[serde(default)]
    pub boosts: IndexMap<String, BoostEntry>,
}

/// One cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CutEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Rejection condition: true marks the candidate cut.
    pub condition: String,
}

/// One weight rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub condition: String,
    pub weight: String,
    /// Setup lines emitted before the condition.
    #[serde(default)]
    pub code: Option<CodeLines>,
}

/// One flat output branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputEntry {
    /// Branch name; defaults to the entry key.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Scalar value expression.
    #[serde(default)]
    pub value: Option<String>,
    /// Array-valued branch.
    #[serde(default)]
    pub array: Option<ArrayEntry>,
}

/// Array payload of an output branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrayEntry {
    pub name: String,
    pub values: Vec<String>,
}

/// Fundamental branch value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "Bool_t")]
    Bool,
    #[serde(rename = "Int_t")]
    Int,
    #[serde(rename = "UInt_t")]
    UInt,
    #[serde(rename = "Long64_t")]
    Long64,
    #[serde(rename = "Float_t")]
    Float,
    #[serde(rename = "Double_t")]
    Double,
}

/// Accidental-coincidence handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccidentalsEntry {
    #[serde(default)]
    pub mode: AccidentalMode,
    /// Out-of-time bunches per side; falls back to the tree name.
    #[serde(default)]
    pub out_of_time_bunches: Option<u32>,
}

/// How out-of-time beam candidates are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccidentalMode {
    /// Weight out-of-time candidates negatively.
    #[default]
    Subtract,
    /// Cut out-of-time candidates.
    Cut,
}

/// Code given either as one block of text or as a list of lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeLines {
    Block(String),
    Lines(Vec<String>),
}

impl CodeLines {
    /// Split into individual lines.
    pub fn to_lines(&self) -> Vec<String> {
        match self {
            CodeLines::Block(s) => s.lines().map(str::to_string).collect(),
            CodeLines::Lines(v) => v.clone(),
        }
    }
}

/// A field that can be a single string or an array of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    Single(String),
    Array(Vec<String>),
}

impl Default for StringOrArray {
    fn default() -> Self {
        StringOrArray::Array(Vec::new())
    }
}

impl StringOrArray {
    /// Convert to a list of strings.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrArray::Single(s) => vec![s.clone()],
            StringOrArray::Array(v) => v.clone(),
        }
    }

    /// Whether this is the single keyword `kw` (case-insensitive).
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, StringOrArray::Single(s) if s.eq_ignore_ascii_case(kw))
    }
}

fn default_true() -> bool {
    true
}

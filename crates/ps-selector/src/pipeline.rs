//! Pipeline assembly.
//!
//! Produces the two artifacts handed to an emitter: the ordered declaration
//! list and the per-candidate [`EventProcedure`]. The procedure fixes the
//! order of every per-candidate operation:
//!
//! 1. skip candidates already cut upstream
//! 2. preamble (identity tokens, vectors, boosts, accidental weight seed, code)
//! 3. enabled cuts in declared order
//! 4. enabled weight rules in declared order
//! 5. the external hook
//! 6. dispatch to every uniqueness group
//! 7. output-branch fills
//!
//! After the loop an output row is written only if some candidate survived.
//!
//! [`EventProcedure::replay`] walks a procedure over pre-evaluated candidate
//! inputs. It evaluates no expressions; it checks the ordering contract.

use std::collections::{HashMap, HashSet};

use ps_core::{Error, Result, Topology};
use serde::Serialize;

use crate::boost::FrameTransform;
use crate::config::{AccidentalMode, ValueType};
use crate::registry::{
    ACCIDENTAL_CUT, AuxCode, AuxVector, Axis, BranchShape, DescriptorRegistry, Dimension,
    HistogramDescriptor,
};
use crate::resolve::{AxisBinning, ParameterResolver};
use crate::unique::{EventContext, Gate, IdentityToken, KeyShape, KeyStrategy, UniquenessPlan};

/// Out-of-time bunch count used when neither config nor tree name sets one.
pub const DEFAULT_OUT_OF_TIME_BUNCHES: u32 = 4;

/// Half-width of the in-time RF window in ns (half the 4.008 ns bunch spacing).
pub const RF_HALF_WINDOW: f64 = 0.5 * 4.008;

/// Sign-preserving weight accumulation.
///
/// Two negative factors never cancel into a positive weight: when both the
/// running weight and `factor` are negative, the running weight is scaled by
/// `-factor` instead.
pub fn accumulate_weight(running: f64, factor: f64) -> f64 {
    if running < 0.0 && factor < 0.0 { running * -factor } else { running * factor }
}

// ── Declarations ───────────────────────────────────────────────

/// One histogram storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramDeclaration {
    /// Storage name: histogram name plus group tag.
    pub storage: String,
    pub histogram: String,
    pub group: String,
    pub folder: String,
    pub title: String,
    pub x: AxisBinning,
    pub y: Option<AxisBinning>,
}

/// Role of an output branch declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BranchRole {
    Scalar,
    /// Element count of an array branch.
    Count,
    Array { count_branch: String },
}

/// One output branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchDeclaration {
    pub branch: String,
    pub value_type: ValueType,
    pub role: BranchRole,
}

/// One declaration entry, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Declaration {
    Folder { group: String, folder: String },
    Histogram(HistogramDeclaration),
    DedupState { group: String, shape: KeyShape },
    Branch(BranchDeclaration),
}

// ── Procedure ──────────────────────────────────────────────────

/// Binding of a role's identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBinding {
    pub role: String,
    pub token: String,
}

/// Initial value of the running weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum WeightSeed {
    Unit,
    /// `factor` outside the in-time window, 1 inside.
    AccidentalSubtraction { out_of_time_bunches: u32, factor: f64, half_window: f64 },
}

/// A rejection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutStep {
    pub name: String,
    pub condition: String,
}

/// A conditional weight factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightStep {
    pub name: String,
    pub setup: Vec<String>,
    pub condition: String,
    pub factor: String,
}

/// One histogram fill of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FillAction {
    /// Histogram whose expressions and weight are used.
    pub histogram: String,
    /// Storage receiving the fill.
    pub storage: String,
    pub x: String,
    pub y: Option<String>,
    pub weight: String,
}

/// Dispatch of one candidate to one uniqueness group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDispatch {
    /// Index of the group's dedup state in the event context.
    pub index: usize,
    pub group: String,
    pub key: KeyStrategy,
    pub gate: Gate,
    pub fills: Vec<FillAction>,
}

/// Values written to one output branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BranchValues {
    Scalar(String),
    Array { count_branch: String, values: Vec<String> },
}

/// Fill of one output branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchFill {
    pub branch: String,
    pub value_type: ValueType,
    pub values: BranchValues,
}

/// One step of the per-candidate procedure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CandidateStep {
    SkipPreCut,
    BindTokens(Vec<TokenBinding>),
    BindVectors(Vec<String>),
    DefineVectors(Vec<AuxVector>),
    Boost(FrameTransform),
    SeedWeight(WeightSeed),
    Code(AuxCode),
    Cut(CutStep),
    Weight(WeightStep),
    Hook,
    Dispatch(GroupDispatch),
    FillBranches(Vec<BranchFill>),
}

/// Per-event procedure.
///
/// Events are processed strictly sequentially against one set of histogram
/// storages. Every event gets its own [`EventContext`], so running events in
/// parallel only needs per-worker storages merged afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventProcedure {
    /// Groups with dedup state, reset at event start; indices match
    /// [`GroupDispatch::index`].
    pub groups: Vec<String>,
    pub candidate_steps: Vec<CandidateStep>,
}

// ── Assembly ───────────────────────────────────────────────────

/// Assembles declarations and the event procedure from planned parts.
pub struct PipelineAssembler<'a> {
    registry: &'a DescriptorRegistry,
    topology: &'a Topology,
    resolver: ParameterResolver<'a>,
}

impl<'a> PipelineAssembler<'a> {
    /// Create an assembler over `registry` and `topology`.
    pub fn new(registry: &'a DescriptorRegistry, topology: &'a Topology) -> Self {
        Self { registry, topology, resolver: ParameterResolver::new(&registry.histograms) }
    }

    /// Build the declarations.
    pub fn declarations(&mut self, plans: &[UniquenessPlan]) -> Result<Vec<Declaration>> {
        let mut out = Vec::new();

        for plan in plans {
            out.push(Declaration::Folder { group: plan.group.clone(), folder: plan.folder.clone() });
        }

        let mut storages: HashSet<String> = HashSet::new();
        for plan in plans {
            for name in &plan.histograms {
                let desc = self.descriptor(name)?;
                if !desc.declares_storage() {
                    let target = self.resolver.check_destination(name)?;
                    if !plan.histograms.contains(&target) {
                        return Err(Error::validation(format!(
                            "histogram '{name}' fills '{target}', which group '{}' does not declare",
                            plan.group
                        )));
                    }
                    continue;
                }
                let storage = format!("{name}{}", plan.tag);
                if !storages.insert(storage.clone()) {
                    return Err(Error::DuplicateDefinition {
                        name: storage,
                        first: "histogram storage",
                        second: "histogram storage",
                    });
                }
                let x = self.resolver.binning(name, Axis::X)?;
                let y = match desc.dimension {
                    Dimension::One => None,
                    Dimension::Two => Some(self.resolver.binning(name, Axis::Y)?),
                };
                out.push(Declaration::Histogram(HistogramDeclaration {
                    storage,
                    histogram: name.clone(),
                    group: plan.group.clone(),
                    folder: plan.folder.clone(),
                    title: desc.title.clone(),
                    x,
                    y,
                }));
            }
        }

        for plan in plans {
            if let Some(shape) = plan.key.shape() {
                out.push(Declaration::DedupState { group: plan.group.clone(), shape });
            }
        }

        for branch in &self.registry.outputs {
            match branch.count_branch() {
                None => out.push(Declaration::Branch(BranchDeclaration {
                    branch: branch.declared_name(),
                    value_type: branch.value_type,
                    role: BranchRole::Scalar,
                })),
                Some(count_branch) => {
                    out.push(Declaration::Branch(BranchDeclaration {
                        branch: count_branch.clone(),
                        value_type: ValueType::Int,
                        role: BranchRole::Count,
                    }));
                    out.push(Declaration::Branch(BranchDeclaration {
                        branch: branch.declared_name(),
                        value_type: branch.value_type,
                        role: BranchRole::Array { count_branch },
                    }));
                }
            }
        }

        Ok(out)
    }

    /// Build the per-candidate procedure.
    pub fn procedure(
        &mut self,
        frames: &[FrameTransform],
        plans: &[UniquenessPlan],
    ) -> Result<EventProcedure> {
        let registry = self.registry;
        let mut steps = vec![CandidateStep::SkipPreCut];

        let mut tokens: Vec<TokenBinding> = Vec::new();
        for role in self.topology.roles() {
            if let Some(token) = role.identity_token() {
                tokens.push(TokenBinding { role: role.name.clone(), token });
            }
        }
        steps.push(CandidateStep::BindTokens(tokens));
        steps.push(CandidateStep::BindVectors(self.topology.vector_names()));
        if !registry.vectors.is_empty() {
            steps.push(CandidateStep::DefineVectors(registry.vectors.clone()));
        }
        steps.extend(frames.iter().cloned().map(CandidateStep::Boost));
        steps.push(CandidateStep::SeedWeight(self.weight_seed()));
        steps.extend(registry.variables.iter().cloned().map(CandidateStep::Code));
        if !registry.code.is_empty() {
            steps.push(CandidateStep::Code(AuxCode {
                name: String::new(),
                lines: registry.code.clone(),
            }));
        }

        if registry.accidentals.mode == AccidentalMode::Cut {
            steps.push(CandidateStep::Cut(CutStep {
                name: ACCIDENTAL_CUT.to_string(),
                condition: format!("fabs(locDeltaT_RF) > {RF_HALF_WINDOW}"),
            }));
        }
        for cut in registry.cuts.iter().filter(|c| c.enabled) {
            steps.push(CandidateStep::Cut(CutStep {
                name: cut.name.clone(),
                condition: cut.condition.clone(),
            }));
        }
        for rule in registry.weights.iter().filter(|w| w.enabled) {
            steps.push(CandidateStep::Weight(WeightStep {
                name: rule.name.clone(),
                setup: rule.setup.clone(),
                condition: rule.condition.clone(),
                factor: rule.weight.clone(),
            }));
        }

        steps.push(CandidateStep::Hook);

        let mut groups = Vec::new();
        for plan in plans {
            let fills = plan
                .histograms
                .iter()
                .map(|name| self.fill_action(name, &plan.tag))
                .collect::<Result<Vec<_>>>()?;
            steps.push(CandidateStep::Dispatch(GroupDispatch {
                index: groups.len(),
                group: plan.group.clone(),
                key: plan.key.clone(),
                gate: plan.gate.clone(),
                fills,
            }));
            groups.push(plan.group.clone());
        }

        if !registry.outputs.is_empty() {
            let fills = registry
                .outputs
                .iter()
                .map(|b| BranchFill {
                    branch: b.declared_name(),
                    value_type: b.value_type,
                    values: match &b.shape {
                        BranchShape::Scalar { value } => BranchValues::Scalar(value.clone()),
                        BranchShape::Array { values, .. } => BranchValues::Array {
                            count_branch: b.count_branch().unwrap_or_default(),
                            values: values.clone(),
                        },
                    },
                })
                .collect();
            steps.push(CandidateStep::FillBranches(fills));
        }

        Ok(EventProcedure { groups, candidate_steps: steps })
    }

    fn descriptor(&self, name: &str) -> Result<&'a HistogramDescriptor> {
        let registry = self.registry;
        registry.histograms.get(name).ok_or_else(|| Error::UnresolvedReference {
            kind: "pipeline",
            from: "fill dispatch".to_string(),
            target_kind: "histogram",
            target: name.to_string(),
        })
    }

    fn fill_action(&mut self, name: &str, tag: &str) -> Result<FillAction> {
        let desc = self.descriptor(name)?;
        let target = self.resolver.storage_target(name)?;
        let x = self.resolver.expression(name, Axis::X)?;
        let y = match desc.dimension {
            Dimension::One => None,
            Dimension::Two => Some(self.resolver.expression(name, Axis::Y)?),
        };
        Ok(FillAction {
            histogram: name.to_string(),
            storage: format!("{target}{tag}"),
            x,
            y,
            weight: desc.weight.clone(),
        })
    }

    fn weight_seed(&self) -> WeightSeed {
        if self.registry.accidentals.mode == AccidentalMode::Cut {
            return WeightSeed::Unit;
        }
        let bunches = self
            .registry
            .accidentals
            .out_of_time_bunches
            .or_else(|| self.topology.out_of_time_bunches())
            .unwrap_or_else(|| {
                tracing::warn!(
                    bunches = DEFAULT_OUT_OF_TIME_BUNCHES,
                    "out-of-time bunch count unknown; using default"
                );
                DEFAULT_OUT_OF_TIME_BUNCHES
            });
        WeightSeed::AccidentalSubtraction {
            out_of_time_bunches: bunches,
            factor: -1.0 / (2.0 * f64::from(bunches)),
            half_window: RF_HALF_WINDOW,
        }
    }
}

// ── Replay ─────────────────────────────────────────────────────

/// External per-candidate hook. Returning `false` cuts the candidate.
pub trait CandidateHook {
    /// Run the hook for candidate `index`.
    fn execute(&mut self, index: usize) -> bool;
}

impl<F: FnMut(usize) -> bool> CandidateHook for F {
    fn execute(&mut self, index: usize) -> bool {
        self(index)
    }
}

/// Pre-evaluated inputs of one candidate.
///
/// Conditions and factors are keyed by cut or weight-rule name. A missing
/// condition counts as false.
#[derive(Debug, Clone)]
pub struct CandidateInputs {
    pub pre_cut: bool,
    /// Identity tokens by role name.
    pub tokens: HashMap<String, IdentityToken>,
    pub conditions: HashMap<String, bool>,
    pub factors: HashMap<String, f64>,
    /// Running weight after the seed step.
    pub seed_weight: f64,
}

impl Default for CandidateInputs {
    fn default() -> Self {
        Self {
            pre_cut: false,
            tokens: HashMap::new(),
            conditions: HashMap::new(),
            factors: HashMap::new(),
            seed_weight: 1.0,
        }
    }
}

impl CandidateInputs {
    /// Empty inputs with a unit seed weight.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(mut self, role: impl Into<String>, token: IdentityToken) -> Self {
        self.tokens.insert(role.into(), token);
        self
    }

    pub fn condition(mut self, name: impl Into<String>, value: bool) -> Self {
        self.conditions.insert(name.into(), value);
        self
    }

    pub fn factor(mut self, name: impl Into<String>, value: f64) -> Self {
        self.factors.insert(name.into(), value);
        self
    }

    pub fn seed_weight(mut self, w: f64) -> Self {
        self.seed_weight = w;
        self
    }

    pub fn pre_cut(mut self) -> Self {
        self.pre_cut = true;
        self
    }

    fn holds(&self, name: &str) -> bool {
        self.conditions.get(name).copied().unwrap_or(false)
    }
}

/// A fill recorded during replay.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFill {
    pub candidate: usize,
    pub group: String,
    pub histogram: String,
    pub storage: String,
    /// Running candidate weight when the fill happened. The histogram's own
    /// weight expression is not evaluated; see `weight_expression`.
    pub weight: f64,
    /// Weight expression the emitted fill uses.
    pub weight_expression: String,
}

/// Outcome of replaying one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    pub fills: Vec<RecordedFill>,
    /// Cut flag per candidate.
    pub cut: Vec<bool>,
    /// Final running weight per candidate (the seed for cut candidates).
    pub weights: Vec<f64>,
    /// Output-branch fills, one entry per filling candidate.
    pub branch_fills: Vec<usize>,
    /// Whether the event writes an output row.
    pub output_row: bool,
}

impl EventRecord {
    /// Fills recorded for `group`.
    pub fn fills_for(&self, group: &str) -> usize {
        self.fills.iter().filter(|f| f.group == group).count()
    }

    /// Fills recorded into `storage`.
    pub fn fills_into(&self, storage: &str) -> usize {
        self.fills.iter().filter(|f| f.storage == storage).count()
    }
}

impl EventProcedure {
    /// Replay one event over `candidates`.
    pub fn replay(
        &self,
        candidates: &[CandidateInputs],
        hook: &mut dyn CandidateHook,
    ) -> Result<EventRecord> {
        let mut ctx = EventContext::new(self.groups.len());
        let mut record = EventRecord::default();

        for (index, inputs) in candidates.iter().enumerate() {
            let mut weight = inputs.seed_weight;
            let mut cut = false;

            for step in &self.candidate_steps {
                match step {
                    CandidateStep::SkipPreCut => {
                        if inputs.pre_cut {
                            cut = true;
                            break;
                        }
                    }
                    CandidateStep::Cut(c) => {
                        if inputs.holds(&c.name) {
                            cut = true;
                            break;
                        }
                    }
                    CandidateStep::Weight(w) => {
                        if inputs.holds(&w.name) {
                            let factor = inputs.factors.get(&w.name).copied().ok_or_else(|| {
                                Error::validation(format!(
                                    "candidate {index} has no factor for weight rule '{}'",
                                    w.name
                                ))
                            })?;
                            weight = accumulate_weight(weight, factor);
                        }
                    }
                    CandidateStep::Hook => {
                        if !hook.execute(index) {
                            cut = true;
                            break;
                        }
                    }
                    CandidateStep::Dispatch(d) => {
                        if !d.gate.passes(&inputs.conditions) {
                            continue;
                        }
                        let key = d.key.key(&inputs.tokens)?;
                        if ctx.claim(d.index, key) {
                            record.fills.extend(d.fills.iter().map(|f| RecordedFill {
                                candidate: index,
                                group: d.group.clone(),
                                histogram: f.histogram.clone(),
                                storage: f.storage.clone(),
                                weight,
                                weight_expression: f.weight.clone(),
                            }));
                        }
                    }
                    CandidateStep::FillBranches(_) => record.branch_fills.push(index),
                    CandidateStep::BindTokens(_)
                    | CandidateStep::BindVectors(_)
                    | CandidateStep::DefineVectors(_)
                    | CandidateStep::Boost(_)
                    | CandidateStep::SeedWeight(_)
                    | CandidateStep::Code(_) => {}
                }
            }

            record.cut.push(cut);
            record.weights.push(weight);
        }

        record.output_row = record.cut.iter().any(|c| !c);
        Ok(record)
    }
}

//! SelectorBuilder: orchestrates registry construction, inheritance
//! resolution, boost expansion, dedup planning and pipeline assembly.

use std::io::Write;

use ps_core::{Error, Result, RoleKind, Topology, TopologySource};
use serde::Serialize;

use crate::boost::{FrameTransform, expand_frames};
use crate::config::AnalysisConfig;
use crate::expr::{ExprSymbols, looks_like_particle_slot, role_accessor};
use crate::pipeline::{Declaration, EventProcedure, HistogramDeclaration, PipelineAssembler};
use crate::registry::{BoostFrame, BranchShape, DescriptorRegistry};
use crate::resolve::ParameterResolver;
use crate::unique::UniquenessPlan;

/// Basename used when neither the caller nor the topology provides one.
pub const DEFAULT_BASENAME: &str = "default";

/// Builder for a [`GeneratedSelector`].
///
/// # Example
///
/// ```no_run
/// use ps_core::{TopologyFile, TopologySource};
/// use ps_selector::{SelectorBuilder, config::read_config};
///
/// let topology = TopologyFile::new("pipi_topology.json").load().unwrap();
/// let selector = SelectorBuilder::new(topology)
///     .config(read_config("analysis.yaml").unwrap())
///     .basename("pipi")
///     .build()
///     .unwrap();
/// println!("{}", selector.to_json().unwrap());
/// ```
pub struct SelectorBuilder {
    topology: Topology,
    config: AnalysisConfig,
    basename: Option<String>,
}

impl SelectorBuilder {
    /// Create a builder for `topology` with an empty config.
    pub fn new(topology: Topology) -> Self {
        Self { topology, config: AnalysisConfig::default(), basename: None }
    }

    /// Create a builder from a topology source.
    pub fn from_source(source: &dyn TopologySource) -> Result<Self> {
        let topology = source.load()?;
        tracing::debug!(source = %source.describe(), roles = topology.roles().count(), "topology loaded");
        Ok(Self::new(topology))
    }

    /// Set the analysis config.
    pub fn config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the basename of the generated selector and its output files.
    pub fn basename(mut self, name: impl Into<String>) -> Self {
        self.basename = Some(name.into());
        self
    }

    fn resolved_basename(&self) -> String {
        if let Some(name) = &self.basename {
            return name.clone();
        }
        match &self.topology.tree_name {
            Some(tree) => tree.replace("_Tree", ""),
            None => DEFAULT_BASENAME.to_string(),
        }
    }

    /// Run every stage and assemble the selector. The first error aborts.
    pub fn build(&self) -> Result<GeneratedSelector> {
        let topology = &self.topology;
        topology.validate()?;

        let registry = DescriptorRegistry::from_config(&self.config)?;
        tracing::info!(
            histograms = registry.histograms.len(),
            groups = registry.groups.len(),
            "descriptor registry ready"
        );

        ParameterResolver::new(&registry.histograms).check_sources()?;

        let mut vectors = topology.vector_names();
        vectors.extend(registry.vectors.iter().map(|v| v.name.clone()));
        let frames = expand_frames(&registry.frames, &vectors)?;

        check_topology(&registry, topology, &frames, &vectors)?;

        let plans = registry
            .groups
            .iter()
            .map(|g| UniquenessPlan::new(g, topology, &registry.cuts))
            .collect::<Result<Vec<_>>>()?;

        let mut assembler = PipelineAssembler::new(&registry, topology);
        let declarations = assembler.declarations(&plans)?;
        let procedure = assembler.procedure(&frames, &plans)?;

        let basename = self.resolved_basename();
        tracing::info!(
            basename = %basename,
            declarations = declarations.len(),
            steps = procedure.candidate_steps.len(),
            "selector generated"
        );

        Ok(GeneratedSelector {
            selector_class: format!("DSelector_{basename}"),
            source_file: format!("DSelector_{basename}.C"),
            header_file: format!("DSelector_{basename}.h"),
            histogram_file: format!("hist_{basename}.root"),
            tree_file: format!("tree_{basename}.root"),
            basename,
            tree_name: topology.tree_name.clone(),
            groups: plans,
            declarations,
            procedure,
        })
    }
}

// ── Output ─────────────────────────────────────────────────────

/// Generated selector structure, ready for text emission.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSelector {
    pub basename: String,
    pub selector_class: String,
    pub source_file: String,
    pub header_file: String,
    pub histogram_file: String,
    pub tree_file: String,
    pub tree_name: Option<String>,
    pub groups: Vec<UniquenessPlan>,
    pub declarations: Vec<Declaration>,
    pub procedure: EventProcedure,
}

impl GeneratedSelector {
    /// Histogram storages, in declaration order.
    pub fn histogram_declarations(&self) -> impl Iterator<Item = &HistogramDeclaration> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Histogram(h) => Some(h),
            _ => None,
        })
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Receives a generated selector for final serialization.
pub trait SelectorEmitter {
    /// Emit `selector`.
    fn emit(&mut self, selector: &GeneratedSelector) -> Result<()>;
}

/// Writes the selector structure as pretty JSON.
pub struct JsonEmitter<W: Write> {
    writer: W,
}

impl<W: Write> JsonEmitter<W> {
    /// Emit into `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SelectorEmitter for JsonEmitter<W> {
    fn emit(&mut self, selector: &GeneratedSelector) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, selector)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

// ── Topology cross-check ───────────────────────────────────────

fn frame_names(frames: &[BoostFrame], out: &mut Vec<String>) {
    for f in frames {
        out.push(f.name.clone());
        frame_names(&f.children, out);
    }
}

/// Every expression of the registry with the context it appears in.
fn expressions(registry: &DescriptorRegistry) -> Vec<(String, &str)> {
    let mut out: Vec<(String, &str)> = Vec::new();
    for h in registry.histograms.values() {
        let ctx = format!("histogram '{}'", h.name);
        for e in [&h.x.expression, &h.y.expression].into_iter().flatten() {
            out.push((ctx.clone(), e.as_str()));
        }
        out.push((ctx, h.weight.as_str()));
    }
    for c in &registry.cuts {
        out.push((format!("cut '{}'", c.name), c.condition.as_str()));
    }
    for w in &registry.weights {
        let ctx = format!("weight '{}'", w.name);
        out.push((ctx.clone(), w.condition.as_str()));
        out.push((ctx.clone(), w.weight.as_str()));
        out.extend(w.setup.iter().map(|l| (ctx.clone(), l.as_str())));
    }
    for v in &registry.vectors {
        out.push((format!("vector '{}'", v.name), v.expression.as_str()));
    }
    for code in &registry.variables {
        let ctx = format!("variable '{}'", code.name);
        out.extend(code.lines.iter().map(|l| (ctx.clone(), l.as_str())));
    }
    out.extend(registry.code.iter().map(|l| ("auxiliary code".to_string(), l.as_str())));
    let mut stack: Vec<&BoostFrame> = registry.frames.iter().collect();
    while let Some(f) = stack.pop() {
        out.push((format!("boost frame '{}'", f.name), f.boost_vector.as_str()));
        stack.extend(f.children.iter());
    }
    for b in &registry.outputs {
        let ctx = format!("output branch '{}'", b.name);
        match &b.shape {
            BranchShape::Scalar { value } => out.push((ctx, value.as_str())),
            BranchShape::Array { values, .. } => {
                out.extend(values.iter().map(|v| (ctx.clone(), v.as_str())));
            }
        }
    }
    out
}

/// Reject role accessors naming roles the topology does not have, or
/// identity accessors that do not match the role's kind.
fn check_topology(
    registry: &DescriptorRegistry,
    topology: &Topology,
    frames: &[FrameTransform],
    vectors: &[String],
) -> Result<()> {
    let mut names = Vec::new();
    frame_names(&registry.frames, &mut names);

    let is_known_vector = |id: &str| {
        vectors.iter().any(|v| v == id)
            || frames.iter().any(|f| f.boost_symbol == id || f.copies.iter().any(|c| c.target == id))
    };

    for (context, expr) in expressions(registry) {
        let symbols = ExprSymbols::scan(expr)?;
        for id in &symbols.identifiers {
            if is_known_vector(id.as_str()) {
                continue;
            }
            let Some(acc) = role_accessor(id, &names) else {
                continue;
            };
            match topology.role_by_stem(acc.stem) {
                Some(role) => {
                    let mismatched = match acc.accessor {
                        "TrackID" => role.kind != RoleKind::FinalCharged,
                        "NeutralID" => role.kind != RoleKind::FinalNeutral,
                        _ => false,
                    };
                    if mismatched {
                        return Err(Error::TopologyMismatch {
                            role: role.name.clone(),
                            context: format!(
                                "{context} ({} accessor on a {:?} role)",
                                acc.accessor, role.kind
                            ),
                        });
                    }
                }
                None if looks_like_particle_slot(acc.stem) => {
                    return Err(Error::TopologyMismatch { role: acc.stem.to_string(), context });
                }
                None => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_yaml;
    use ps_core::{ParticleRole, ReactionStep};

    fn topology() -> Topology {
        Topology::new(vec![ReactionStep::new(vec![
            ParticleRole::new("ComboBeam", RoleKind::Beam, 22, 0, -1),
            ParticleRole::new("PiPlus1", RoleKind::FinalCharged, 211, 0, 1),
            ParticleRole::new("PiMinus1", RoleKind::FinalCharged, -211, 0, 2),
            ParticleRole::new("Photon1", RoleKind::FinalNeutral, 22, 0, 3),
        ])])
        .with_tree_name("pipig__B4_Tree")
    }

    fn build(yaml: &str) -> Result<GeneratedSelector> {
        SelectorBuilder::new(topology()).config(parse_yaml(yaml).unwrap()).build()
    }

    #[test]
    fn basename_from_tree_name() {
        let sel = build("{}").unwrap();
        assert_eq!(sel.basename, "pipig__B4");
        assert_eq!(sel.selector_class, "DSelector_pipig__B4");
        assert_eq!(sel.histogram_file, "hist_pipig__B4.root");
        assert_eq!(sel.tree_file, "tree_pipig__B4.root");

        let named = SelectorBuilder::new(Topology::default()).basename("x").build().unwrap();
        assert_eq!(named.source_file, "DSelector_x.C");
        let fallback = SelectorBuilder::new(Topology::default()).build().unwrap();
        assert_eq!(fallback.basename, DEFAULT_BASENAME);
    }

    #[test]
    fn unknown_role_in_cut_is_mismatch() {
        let yaml = r#"
cuts:
  kaon:
    condition: locKPlus1P4.P() < 0.4
"#;
        match build(yaml) {
            Err(Error::TopologyMismatch { role, context }) => {
                assert_eq!(role, "KPlus1");
                assert_eq!(context, "cut 'kaon'");
            }
            other => panic!("expected TopologyMismatch, got {other:?}"),
        }
    }

    #[test]
    fn frame_suffixed_accessors_are_checked() {
        let yaml = r#"
boosts:
  COM:
    boostvector: locBeamP4 + locPiPlus1P4
histograms:
  cosTheta:
    x: locPiMinus2P4_COM.CosTheta()
    xrange: [-1, 1]
    xbins: 20
"#;
        assert!(matches!(build(yaml), Err(Error::TopologyMismatch { .. })));

        let ok = yaml.replace("locPiMinus2P4_COM", "locPiMinus1P4_COM");
        assert!(build(&ok).is_ok());
    }

    #[test]
    fn identity_accessor_must_match_role_kind() {
        let yaml = r#"
output:
  id:
    type: Int_t
    value: locPhoton1TrackID
"#;
        match build(yaml) {
            Err(Error::TopologyMismatch { role, .. }) => assert_eq!(role, "Photon1"),
            other => panic!("expected TopologyMismatch, got {other:?}"),
        }
    }

    #[test]
    fn user_locals_are_not_roles() {
        let yaml = r#"
variables:
  mass:
    - double locPiPlusPiMinusP4 = 0.0;
code:
  - double locT = 1.0;
"#;
        assert!(build(yaml).is_ok());
    }

    #[test]
    fn stale_source_on_complete_histogram_aborts() {
        let yaml = r#"
histograms:
  a:
    x: locT
    xrange: [0, 1]
    xbins: 10
    xhist: b
  b:
    x: locU
    xrange: [0, 1]
    xbins: 10
    xhist: a
"#;
        assert!(matches!(build(yaml), Err(Error::Cycle { .. })));

        let dangling = yaml.replace("xhist: a", "xhist: ghost");
        match build(&dangling) {
            Err(Error::UnresolvedReference { from, target, .. }) => {
                assert_eq!(from, "b");
                assert_eq!(target, "ghost");
            }
            other => panic!("expected UnresolvedReference, got {other:?}"),
        }
    }

    #[test]
    fn json_emitter_writes_selector() {
        let sel = build("{}").unwrap();
        let mut emitter = JsonEmitter::new(Vec::new());
        emitter.emit(&sel).unwrap();
        let text = String::from_utf8(emitter.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["basename"], "pipig__B4");
    }
}

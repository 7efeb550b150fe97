//! Descriptor registry.
//!
//! Converts a parsed [`AnalysisConfig`] into typed descriptors, applying
//! defaults and checking what can be checked without a topology: field
//! presence, numeric ranges, name uniqueness across every descriptor kind and
//! group references. Inheritance chains are left to
//! [`ParameterResolver`](crate::resolve::ParameterResolver).

pub mod descriptors;

pub use descriptors::*;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use ps_core::{Error, Result};

use crate::config::{
    AccidentalMode, AnalysisConfig, BoostEntry, HistogramEntry, OutputEntry, StringOrArray,
    UniquenessEntry,
};

/// Name of the injected catch-all group.
pub const DEFAULT_GROUP: &str = "default";

/// Name of the cut added by accidental `cut` mode.
pub const ACCIDENTAL_CUT: &str = "accidentals";

/// All descriptors of one analysis.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    pub histograms: IndexMap<String, HistogramDescriptor>,
    pub groups: Vec<UniquenessGroup>,
    /// Root boost frames.
    pub frames: Vec<BoostFrame>,
    pub cuts: Vec<CutRule>,
    pub weights: Vec<WeightRule>,
    pub outputs: Vec<OutputBranch>,
    pub vectors: Vec<AuxVector>,
    pub variables: Vec<AuxCode>,
    pub code: Vec<String>,
    pub accidentals: Accidentals,
}

/// Tracks which descriptor kind owns each name.
#[derive(Debug, Default)]
struct NameLedger {
    owners: HashMap<String, &'static str>,
}

impl NameLedger {
    fn claim(&mut self, name: &str, kind: &'static str) -> Result<()> {
        if let Some(&first) = self.owners.get(name) {
            return Err(Error::DuplicateDefinition { name: name.to_string(), first, second: kind });
        }
        self.owners.insert(name.to_string(), kind);
        Ok(())
    }
}

impl DescriptorRegistry {
    /// Build the registry from a parsed config.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let mut ledger = NameLedger::default();
        let mut registry = DescriptorRegistry {
            accidentals: Accidentals {
                mode: config.accidentals.mode,
                out_of_time_bunches: config.accidentals.out_of_time_bunches,
            },
            code: config.code.clone(),
            ..Default::default()
        };

        for (name, entry) in &config.histograms {
            ledger.claim(name, "histogram")?;
            registry.histograms.insert(name.clone(), histogram_descriptor(name, entry)?);
        }

        if registry.accidentals.mode == AccidentalMode::Cut {
            ledger.claim(ACCIDENTAL_CUT, "accidental cut")?;
        }
        for (name, entry) in &config.cuts {
            ledger.claim(name, "cut")?;
            non_empty(&entry.condition, "cut", name, "condition")?;
            registry.cuts.push(CutRule {
                name: name.clone(),
                enabled: entry.enabled,
                condition: entry.condition.clone(),
            });
        }

        for (name, entry) in &config.weights {
            ledger.claim(name, "weight")?;
            non_empty(&entry.condition, "weight", name, "condition")?;
            non_empty(&entry.weight, "weight", name, "weight")?;
            registry.weights.push(WeightRule {
                name: name.clone(),
                enabled: entry.enabled,
                condition: entry.condition.clone(),
                weight: entry.weight.clone(),
                setup: entry.code.as_ref().map(|c| c.to_lines()).unwrap_or_default(),
            });
        }

        for (name, entry) in &config.output {
            ledger.claim(name, "output branch")?;
            registry.outputs.push(output_branch(name, entry)?);
        }

        for (name, expression) in &config.vectors {
            ledger.claim(name, "vector")?;
            non_empty(expression, "vector", name, "expression")?;
            registry.vectors.push(AuxVector { name: name.clone(), expression: expression.clone() });
        }

        for (name, code) in &config.variables {
            ledger.claim(name, "variable")?;
            registry.variables.push(AuxCode { name: name.clone(), lines: code.to_lines() });
        }

        for (name, entry) in &config.boosts {
            registry.frames.push(boost_frame(name, entry, &mut ledger)?);
        }

        let cut_names: HashSet<&str> = registry.cuts.iter().map(|c| c.name.as_str()).collect();
        for (name, entry) in &config.uniqueness {
            ledger.claim(name, "uniqueness group")?;
            let group = uniqueness_group(name, entry, &registry.histograms, &cut_names)?;
            registry.groups.push(group);
        }
        registry.inject_default_group(&mut ledger)?;

        tracing::debug!(
            histograms = registry.histograms.len(),
            groups = registry.groups.len(),
            frames = registry.frames.len(),
            cuts = registry.cuts.len(),
            weights = registry.weights.len(),
            outputs = registry.outputs.len(),
            "descriptor registry built"
        );
        Ok(registry)
    }

    /// Route histograms no declared group fills to the `default` ALL group.
    ///
    /// A user-declared `default` group receives them instead of a new one.
    fn inject_default_group(&mut self, ledger: &mut NameLedger) -> Result<()> {
        let claimed: HashSet<&str> = self
            .groups
            .iter()
            .filter(|g| g.name != DEFAULT_GROUP)
            .flat_map(|g| g.histograms.iter().map(String::as_str))
            .collect();
        let mut unclaimed: Vec<String> = self
            .histograms
            .keys()
            .filter(|h| !claimed.contains(h.as_str()))
            .cloned()
            .collect();

        if let Some(group) = self.groups.iter_mut().find(|g| g.name == DEFAULT_GROUP) {
            unclaimed.retain(|h| !group.histograms.contains(h));
            group.histograms.extend(unclaimed);
            return Ok(());
        }
        if unclaimed.is_empty() {
            return Ok(());
        }

        ledger.claim(DEFAULT_GROUP, "uniqueness group")?;
        tracing::debug!(histograms = unclaimed.len(), "injecting default uniqueness group");
        self.groups.push(UniquenessGroup {
            name: DEFAULT_GROUP.to_string(),
            tracked: TrackedParticles::All,
            histograms: unclaimed,
            gating_cuts: None,
            gate_policy: Default::default(),
            folder: DEFAULT_GROUP.to_string(),
            injected: true,
        });
        Ok(())
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Option<&UniquenessGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

// ── Conversion ─────────────────────────────────────────────────

fn non_empty(value: &str, kind: &str, name: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{kind} '{name}' has an empty {field}")));
    }
    Ok(())
}

fn check_range(name: &str, axis: Axis, range: Option<[f64; 2]>) -> Result<Option<(f64, f64)>> {
    let Some([lo, hi]) = range else {
        return Ok(None);
    };
    if !(lo < hi) {
        return Err(Error::validation(format!(
            "histogram '{name}' has {axis} range [{lo}, {hi}] with lo >= hi"
        )));
    }
    Ok(Some((lo, hi)))
}

fn check_bins(name: &str, axis: Axis, bins: Option<u32>) -> Result<Option<u32>> {
    if bins == Some(0) {
        return Err(Error::validation(format!("histogram '{name}' has zero {axis} bins")));
    }
    Ok(bins)
}

fn histogram_descriptor(name: &str, entry: &HistogramEntry) -> Result<HistogramDescriptor> {
    let destination = entry.destination.clone();
    let is_destination = destination.is_some();

    if entry.x.is_none() && entry.xhist.is_none() {
        return Err(Error::validation(format!("histogram '{name}' has no x expression")));
    }
    let two_d = entry.y.is_some() || entry.yhist.is_some();

    // Destinations fill another histogram's storage and need no binning.
    if !is_destination {
        if entry.xhist.is_none() && (entry.xrange.is_none() || entry.xbins.is_none()) {
            return Err(Error::validation(format!(
                "histogram '{name}' needs xrange and xbins (or xhist)"
            )));
        }
        if two_d && entry.yhist.is_none() && (entry.yrange.is_none() || entry.ybins.is_none()) {
            return Err(Error::validation(format!(
                "histogram '{name}' needs yrange and ybins (or yhist)"
            )));
        }
    }
    if !two_d && (entry.yrange.is_some() || entry.ybins.is_some() || entry.ylabel.is_some()) {
        tracing::warn!(histogram = name, "y-axis fields given without y or yhist; ignored");
    }

    let x = AxisSpec {
        expression: entry.x.clone(),
        range: check_range(name, Axis::X, entry.xrange)?,
        bins: check_bins(name, Axis::X, entry.xbins)?,
        label: entry.xlabel.clone(),
        source: entry.xhist.clone(),
    };
    let y = if two_d {
        AxisSpec {
            expression: entry.y.clone(),
            range: check_range(name, Axis::Y, entry.yrange)?,
            bins: check_bins(name, Axis::Y, entry.ybins)?,
            label: entry.ylabel.clone(),
            source: entry.yhist.clone(),
        }
    } else {
        AxisSpec::default()
    };

    let kind = match destination {
        Some(target) => HistogramKind::Destination { target },
        None if x.source.is_some() || y.source.is_some() => HistogramKind::Inherited,
        None => HistogramKind::Direct,
    };

    Ok(HistogramDescriptor {
        name: name.to_string(),
        title: entry.title.clone().unwrap_or_default(),
        weight: entry.weight.clone().unwrap_or_else(|| DEFAULT_WEIGHT.to_string()),
        dimension: if two_d { Dimension::Two } else { Dimension::One },
        x,
        y,
        kind,
    })
}

fn output_branch(name: &str, entry: &OutputEntry) -> Result<OutputBranch> {
    let shape = match (&entry.value, &entry.array) {
        (Some(value), None) => {
            non_empty(value, "output branch", name, "value")?;
            BranchShape::Scalar { value: value.clone() }
        }
        (None, Some(array)) => {
            if array.values.is_empty() {
                return Err(Error::validation(format!(
                    "output branch '{name}' has an empty array"
                )));
            }
            BranchShape::Array { array_name: array.name.clone(), values: array.values.clone() }
        }
        _ => {
            return Err(Error::validation(format!(
                "output branch '{name}' needs exactly one of value or array"
            )));
        }
    };
    Ok(OutputBranch {
        name: name.to_string(),
        branch: entry.name.clone().unwrap_or_else(|| name.to_string()),
        value_type: entry.value_type,
        shape,
    })
}

fn boost_frame(name: &str, entry: &BoostEntry, ledger: &mut NameLedger) -> Result<BoostFrame> {
    ledger.claim(name, "boost frame")?;
    non_empty(&entry.boostvector, "boost frame", name, "boostvector")?;
    let children = entry
        .boosts
        .iter()
        .map(|(child, child_entry)| boost_frame(child, child_entry, ledger))
        .collect::<Result<Vec<_>>>()?;
    Ok(BoostFrame { name: name.to_string(), boost_vector: entry.boostvector.clone(), children })
}

fn tracked_particles(name: &str, particles: &StringOrArray) -> Result<TrackedParticles> {
    if particles.is_keyword("all") {
        return Ok(TrackedParticles::All);
    }
    if particles.is_keyword("none") {
        return Ok(TrackedParticles::None);
    }
    let roles = particles.to_vec();
    if roles.is_empty() {
        return Err(Error::validation(format!("uniqueness group '{name}' tracks no particles")));
    }
    let mut seen = HashSet::new();
    for role in &roles {
        if !seen.insert(role.as_str()) {
            return Err(Error::validation(format!(
                "uniqueness group '{name}' lists particle '{role}' more than once"
            )));
        }
    }
    Ok(TrackedParticles::Explicit(roles))
}

fn uniqueness_group(
    name: &str,
    entry: &UniquenessEntry,
    histograms: &IndexMap<String, HistogramDescriptor>,
    cuts: &HashSet<&str>,
) -> Result<UniquenessGroup> {
    let tracked = tracked_particles(name, &entry.particles)?;

    let selected = if entry.histograms.is_keyword("all") {
        histograms.keys().cloned().collect()
    } else {
        entry.histograms.to_vec()
    };
    let mut seen = HashSet::new();
    for h in &selected {
        if !histograms.contains_key(h) {
            return Err(Error::UnresolvedReference {
                kind: "uniqueness group",
                from: name.to_string(),
                target_kind: "histogram",
                target: h.clone(),
            });
        }
        if !seen.insert(h.as_str()) {
            return Err(Error::validation(format!(
                "uniqueness group '{name}' lists histogram '{h}' more than once"
            )));
        }
    }

    let gating_cuts = match &entry.cuts {
        Some(list) => {
            let list = list.to_vec();
            if list.is_empty() {
                return Err(Error::validation(format!(
                    "uniqueness group '{name}' has an empty cut list"
                )));
            }
            if let Some(missing) = list.iter().find(|c| !cuts.contains(c.as_str())) {
                return Err(Error::UnresolvedReference {
                    kind: "uniqueness group",
                    from: name.to_string(),
                    target_kind: "cut",
                    target: missing.clone(),
                });
            }
            Some(list)
        }
        None => None,
    };

    Ok(UniquenessGroup {
        name: name.to_string(),
        tracked,
        histograms: selected,
        gating_cuts,
        gate_policy: entry.gate,
        folder: entry.folder.clone().unwrap_or_else(|| name.to_string()),
        injected: false,
    })
}

//! Histogram parameter inheritance.
//!
//! A histogram axis may leave fields unset and name a source histogram
//! (`xhist` / `yhist`); the unset fields are then taken from the source's x
//! axis, recursively. Destination histograms are followed the same way to
//! find the storage they fill. Every chain is walked with an explicit
//! active-resolution stack so a cycle is reported instead of looping, and
//! resolved fields are memoized.

use std::collections::HashMap;

use indexmap::IndexMap;
use ps_core::{Error, Result};
use serde::Serialize;

use crate::registry::{Axis, Dimension, HistogramDescriptor, HistogramKind};

/// A resolvable axis field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisField {
    Expression,
    Range,
    Bins,
    Label,
}

impl std::fmt::Display for AxisField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AxisField::Expression => "expression",
            AxisField::Range => "range",
            AxisField::Bins => "bins",
            AxisField::Label => "label",
        })
    }
}

/// A resolved field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Expression(String),
    Range(f64, f64),
    Bins(u32),
    Label(String),
}

/// Fully resolved binning of one axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisBinning {
    pub bins: u32,
    pub lo: f64,
    pub hi: f64,
    pub label: String,
}

/// Resolves inherited histogram fields and destination chains.
pub struct ParameterResolver<'a> {
    histograms: &'a IndexMap<String, HistogramDescriptor>,
    memo: HashMap<(String, Axis, AxisField), FieldValue>,
}

impl<'a> ParameterResolver<'a> {
    /// Create a resolver over `histograms`.
    pub fn new(histograms: &'a IndexMap<String, HistogramDescriptor>) -> Self {
        Self { histograms, memo: HashMap::new() }
    }

    fn descriptor(&self, name: &str) -> Result<&'a HistogramDescriptor> {
        self.histograms.get(name).ok_or_else(|| Error::UnresolvedReference {
            kind: "lookup",
            from: name.to_string(),
            target_kind: "histogram",
            target: name.to_string(),
        })
    }

    /// Walk every `xhist`/`yhist` chain up front.
    ///
    /// Field resolution only follows a source when a field is unset, so a
    /// dangling or cyclic source on an otherwise complete histogram would go
    /// unnoticed. Each chain must end at a histogram without a source.
    pub fn check_sources(&self) -> Result<()> {
        for desc in self.histograms.values() {
            for axis in [Axis::X, Axis::Y] {
                let mut stack = vec![desc.name.clone()];
                let mut from = desc.name.as_str();
                let mut source = desc.axis(axis).source.as_deref();
                while let Some(next) = source {
                    let Some(target) = self.histograms.get(next) else {
                        return Err(Error::UnresolvedReference {
                            kind: "histogram",
                            from: from.to_string(),
                            target_kind: "histogram",
                            target: next.to_string(),
                        });
                    };
                    let revisit = stack.iter().any(|n| n == next);
                    stack.push(next.to_string());
                    if revisit {
                        return Err(Error::Cycle { path: stack });
                    }
                    from = &target.name;
                    source = target.x.source.as_deref();
                }
            }
        }
        Ok(())
    }

    /// Resolve one field of one axis of `name`.
    ///
    /// Set fields win; otherwise the axis source's x axis is consulted. A
    /// missing label resolves to the empty string, any other missing field is
    /// a [`Error::ConfigValidation`].
    pub fn resolve(&mut self, name: &str, axis: Axis, field: AxisField) -> Result<FieldValue> {
        self.descriptor(name)?;
        let mut stack = Vec::new();
        self.resolve_inner(name, axis, field, &mut stack)
    }

    fn resolve_inner(
        &mut self,
        name: &str,
        axis: Axis,
        field: AxisField,
        stack: &mut Vec<String>,
    ) -> Result<FieldValue> {
        let key = (name.to_string(), axis, field);
        if let Some(value) = self.memo.get(&key) {
            return Ok(value.clone());
        }
        if stack.iter().any(|n| n == name) {
            let mut path = stack.clone();
            path.push(name.to_string());
            return Err(Error::Cycle { path });
        }

        let desc = self.descriptor(name)?;
        let spec = desc.axis(axis);
        let own = match field {
            AxisField::Expression => spec.expression.clone().map(FieldValue::Expression),
            AxisField::Range => spec.range.map(|(lo, hi)| FieldValue::Range(lo, hi)),
            AxisField::Bins => spec.bins.map(FieldValue::Bins),
            AxisField::Label => spec.label.clone().map(FieldValue::Label),
        };

        let value = match (own, &spec.source) {
            (Some(value), _) => value,
            (None, Some(source)) => {
                if !self.histograms.contains_key(source) {
                    return Err(Error::UnresolvedReference {
                        kind: "histogram",
                        from: name.to_string(),
                        target_kind: "histogram",
                        target: source.clone(),
                    });
                }
                stack.push(name.to_string());
                let inherited = self.resolve_inner(source, Axis::X, field, stack);
                stack.pop();
                inherited?
            }
            (None, None) if field == AxisField::Label => FieldValue::Label(String::new()),
            (None, None) => {
                return Err(Error::validation(format!(
                    "histogram '{name}' has no {axis} {field} and no {axis}hist to inherit from"
                )));
            }
        };

        self.memo.insert(key, value.clone());
        Ok(value)
    }

    /// Resolve the fill expression of `axis`.
    pub fn expression(&mut self, name: &str, axis: Axis) -> Result<String> {
        match self.resolve(name, axis, AxisField::Expression)? {
            FieldValue::Expression(e) => Ok(e),
            other => Err(unexpected(name, other)),
        }
    }

    /// Resolve range, bins and label of `axis`.
    pub fn binning(&mut self, name: &str, axis: Axis) -> Result<AxisBinning> {
        let (lo, hi) = match self.resolve(name, axis, AxisField::Range)? {
            FieldValue::Range(lo, hi) => (lo, hi),
            other => return Err(unexpected(name, other)),
        };
        let bins = match self.resolve(name, axis, AxisField::Bins)? {
            FieldValue::Bins(b) => b,
            other => return Err(unexpected(name, other)),
        };
        let label = match self.resolve(name, axis, AxisField::Label)? {
            FieldValue::Label(l) => l,
            other => return Err(unexpected(name, other)),
        };
        Ok(AxisBinning { bins, lo, hi, label })
    }

    /// Histogram whose storage `name` fills, following destination chains.
    pub fn storage_target(&self, name: &str) -> Result<String> {
        let mut stack: Vec<String> = Vec::new();
        let mut current = self.descriptor(name)?;
        while let HistogramKind::Destination { target } = &current.kind {
            stack.push(current.name.clone());
            if stack.iter().any(|n| n == target) {
                stack.push(target.clone());
                return Err(Error::Cycle { path: stack });
            }
            current = self.histograms.get(target).ok_or_else(|| Error::UnresolvedReference {
                kind: "histogram",
                from: current.name.clone(),
                target_kind: "destination histogram",
                target: target.clone(),
            })?;
        }
        Ok(current.name.clone())
    }

    /// Check that a destination histogram can fill its target storage.
    ///
    /// The target must declare storage of the same dimension.
    pub fn check_destination(&self, name: &str) -> Result<String> {
        let target = self.storage_target(name)?;
        let source = self.descriptor(name)?;
        let storage = self.descriptor(&target)?;
        if source.dimension != storage.dimension {
            return Err(Error::validation(format!(
                "histogram '{name}' is {} but its destination '{target}' is {}",
                dimension_label(source.dimension),
                dimension_label(storage.dimension)
            )));
        }
        Ok(target)
    }
}

fn dimension_label(d: Dimension) -> &'static str {
    match d {
        Dimension::One => "1-D",
        Dimension::Two => "2-D",
    }
}

fn unexpected(name: &str, value: FieldValue) -> Error {
    Error::validation(format!("histogram '{name}' resolved to unexpected value {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_yaml;
    use crate::registry::DescriptorRegistry;

    fn histograms(yaml: &str) -> IndexMap<String, HistogramDescriptor> {
        DescriptorRegistry::from_config(&parse_yaml(yaml).unwrap()).unwrap().histograms
    }

    const CHAIN: &str = r#"
histograms:
  base:
    x: locMPiPi
    xrange: [0.2, 1.6]
    xbins: 140
    xlabel: "M [GeV]"
  t:
    x: locT
    xrange: [0, 2]
    xbins: 50
  middle:
    xhist: base
    xbins: 70
  leaf:
    xhist: middle
    x: locMPiPiSwap
  twod:
    xhist: leaf
    yhist: t
"#;

    #[test]
    fn set_fields_win_over_inheritance() {
        let h = histograms(CHAIN);
        let mut r = ParameterResolver::new(&h);
        assert_eq!(r.expression("leaf", Axis::X).unwrap(), "locMPiPiSwap");
        let b = r.binning("leaf", Axis::X).unwrap();
        assert_eq!(b, AxisBinning { bins: 70, lo: 0.2, hi: 1.6, label: "M [GeV]".into() });
    }

    #[test]
    fn y_axis_inherits_from_source_x_axis() {
        let h = histograms(CHAIN);
        let mut r = ParameterResolver::new(&h);
        assert_eq!(r.expression("twod", Axis::Y).unwrap(), "locT");
        let y = r.binning("twod", Axis::Y).unwrap();
        assert_eq!((y.bins, y.lo, y.hi), (50, 0.0, 2.0));
        assert_eq!(y.label, "");
        assert_eq!(r.expression("twod", Axis::X).unwrap(), "locMPiPiSwap");
    }

    #[test]
    fn memoized_values_are_stable() {
        let h = histograms(CHAIN);
        let mut r = ParameterResolver::new(&h);
        let first = r.resolve("twod", Axis::X, AxisField::Bins).unwrap();
        let second = r.resolve("twod", Axis::X, AxisField::Bins).unwrap();
        assert_eq!(first, FieldValue::Bins(70));
        assert_eq!(first, second);
    }

    #[test]
    fn inheritance_cycle_detected() {
        let yaml = r#"
histograms:
  a:
    xhist: b
  b:
    xhist: c
  c:
    xhist: a
"#;
        let h = histograms(yaml);
        let mut r = ParameterResolver::new(&h);
        match r.resolve("a", Axis::X, AxisField::Range) {
            Err(Error::Cycle { path }) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_inheritance_is_a_cycle() {
        let yaml = r#"
histograms:
  a:
    xhist: a
"#;
        let h = histograms(yaml);
        let mut r = ParameterResolver::new(&h);
        assert!(matches!(r.expression("a", Axis::X), Err(Error::Cycle { .. })));
    }

    #[test]
    fn unknown_source_is_unresolved() {
        let yaml = r#"
histograms:
  a:
    xhist: ghost
"#;
        let h = histograms(yaml);
        let mut r = ParameterResolver::new(&h);
        match r.expression("a", Axis::X) {
            Err(Error::UnresolvedReference { from, target, .. }) => {
                assert_eq!(from, "a");
                assert_eq!(target, "ghost");
            }
            other => panic!("expected UnresolvedReference, got {other:?}"),
        }
    }

    #[test]
    fn missing_field_without_source_fails() {
        let yaml = r#"
histograms:
  d:
    x: locT
    destination: d2
  d2:
    x: locT
    xrange: [0, 1]
    xbins: 10
"#;
        let h = histograms(yaml);
        let mut r = ParameterResolver::new(&h);
        assert!(matches!(r.binning("d", Axis::X), Err(Error::ConfigValidation(_))));
    }

    const COMPLETE: &str = "    x: locT\n    xrange: [0, 1]\n    xbins: 10\n    xlabel: t\n";

    #[test]
    fn complete_histogram_with_dangling_source() {
        let yaml = format!("histograms:\n  h:\n{COMPLETE}    xhist: ghost\n");
        let h = histograms(&yaml);
        let mut r = ParameterResolver::new(&h);
        // Every field is set locally, so field resolution never looks at the source.
        assert!(r.binning("h", Axis::X).is_ok());
        match r.check_sources() {
            Err(Error::UnresolvedReference { from, target, .. }) => {
                assert_eq!(from, "h");
                assert_eq!(target, "ghost");
            }
            other => panic!("expected UnresolvedReference, got {other:?}"),
        }
    }

    #[test]
    fn complete_histograms_with_cyclic_sources() {
        let yaml = format!(
            "histograms:\n  a:\n{COMPLETE}    xhist: b\n  b:\n{COMPLETE}    xhist: a\n"
        );
        let h = histograms(&yaml);
        let r = ParameterResolver::new(&h);
        match r.check_sources() {
            Err(Error::Cycle { path }) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn dangling_y_source_behind_x_chain() {
        let yaml = format!(
            "histograms:\n  base:\n{COMPLETE}  twod:\n    xhist: base\n    y: locU\n    yhist: mid\n    yrange: [0, 1]\n    ybins: 5\n  mid:\n{COMPLETE}    xhist: gone\n"
        );
        let h = histograms(&yaml);
        let r = ParameterResolver::new(&h);
        match r.check_sources() {
            Err(Error::UnresolvedReference { from, target, .. }) => {
                assert_eq!(from, "mid");
                assert_eq!(target, "gone");
            }
            other => panic!("expected UnresolvedReference, got {other:?}"),
        }
    }

    #[test]
    fn well_formed_chains_pass() {
        let h = histograms(CHAIN);
        assert!(ParameterResolver::new(&h).check_sources().is_ok());
    }

    #[test]
    fn destination_chains_resolve_to_storage() {
        let yaml = r#"
histograms:
  store:
    x: locT
    xrange: [0, 1]
    xbins: 10
  hop:
    x: locT2
    destination: store
  hop2:
    x: locT3
    destination: hop
  flat2d:
    x: locT
    y: locU
    destination: store
"#;
        let h = histograms(yaml);
        let r = ParameterResolver::new(&h);
        assert_eq!(r.storage_target("hop2").unwrap(), "store");
        assert_eq!(r.storage_target("store").unwrap(), "store");
        assert_eq!(r.check_destination("hop").unwrap(), "store");
        assert!(matches!(r.check_destination("flat2d"), Err(Error::ConfigValidation(_))));
    }

    #[test]
    fn destination_cycle_detected() {
        let yaml = r#"
histograms:
  a:
    x: locT
    destination: b
  b:
    x: locT
    destination: a
"#;
        let h = histograms(yaml);
        let r = ParameterResolver::new(&h);
        match r.storage_target("a") {
            Err(Error::Cycle { path }) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
    }
}

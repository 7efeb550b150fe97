//! Per-event semantics of generated selectors, checked by replaying the
//! assembled procedure over hand-built candidates.

use std::collections::HashSet;

use approx::assert_relative_eq;
use ps_core::{Error, ParticleRole, ReactionStep, RoleKind, Topology};
use ps_selector::config::parse_yaml;
use ps_selector::unique::all_slots;
use ps_selector::{CandidateInputs, EventRecord, GeneratedSelector, SelectorBuilder};

/// Beam, two same-species tracks and a missing proton.
fn swap_topology() -> Topology {
    Topology::new(vec![ReactionStep::new(vec![
        ParticleRole::new("ComboBeam", RoleKind::Beam, 22, 0, -1),
        ParticleRole::new("PiPlus1", RoleKind::FinalCharged, 211, 0, 1),
        ParticleRole::new("PiPlus2", RoleKind::FinalCharged, 211, 0, 2),
        ParticleRole::new("MissingProton", RoleKind::Missing, 2212, 0, 3),
    ])])
    .with_tree_name("pippipmissp__B4_Tree")
}

fn build(yaml: &str) -> GeneratedSelector {
    SelectorBuilder::new(swap_topology()).config(parse_yaml(yaml).unwrap()).build().unwrap()
}

fn combo(beam: i64, a: i64, b: i64) -> CandidateInputs {
    CandidateInputs::new().token("ComboBeam", beam).token("PiPlus1", a).token("PiPlus2", b)
}

fn replay(sel: &GeneratedSelector, candidates: &[CandidateInputs]) -> EventRecord {
    sel.procedure.replay(candidates, &mut |_: usize| true).unwrap()
}

fn filling_candidates(record: &EventRecord, group: &str) -> Vec<usize> {
    let mut seen: Vec<usize> = record
        .fills
        .iter()
        .filter(|f| f.group == group)
        .map(|f| f.candidate)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    seen.sort_unstable();
    seen
}

const SWAP_CONFIG: &str = r#"
histograms:
  MPiPi:
    x: (locPiPlus1P4 + locPiPlus2P4).M()
    xrange: [0.0, 2.0]
    xbins: 100
  MMiss:
    x: locMissingProtonP4.M()
    xrange: [0.5, 1.5]
    xbins: 100
uniqueness:
  all:
    particles: all
    histograms: [MPiPi, MMiss]
"#;

#[test]
fn swapped_tracks_fill_once() {
    let sel = build(SWAP_CONFIG);

    let record = replay(&sel, &[combo(1, 10, 11), combo(1, 11, 10)]);
    assert_eq!(filling_candidates(&record, "all"), vec![0]);
    assert_eq!(record.fills_for("all"), 2);

    let record = replay(&sel, &[combo(1, 10, 11), combo(1, 11, 10), combo(1, 10, 12)]);
    assert_eq!(filling_candidates(&record, "all"), vec![0, 2]);
    assert_eq!(record.fills_for("all"), 4);
}

#[test]
fn dedup_state_does_not_leak_between_events() {
    let sel = build(SWAP_CONFIG);
    let first = replay(&sel, &[combo(1, 10, 11)]);
    let second = replay(&sel, &[combo(1, 10, 11)]);
    assert_eq!(first.fills_for("all"), 2);
    assert_eq!(second.fills_for("all"), 2);
}

#[test]
fn explicit_multi_particle_group_keys_by_species() {
    let yaml = r#"
histograms:
  MPiPi:
    x: (locPiPlus1P4 + locPiPlus2P4).M()
    xrange: [0.0, 2.0]
    xbins: 100
uniqueness:
  pions:
    particles: [PiPlus1, PiPlus2]
    histograms: [MPiPi]
"#;
    let sel = build(yaml);
    // Beam differs, pions identical as a set: still one fill.
    let record = replay(&sel, &[combo(1, 10, 11), combo(2, 11, 10), combo(3, 10, 14)]);
    assert_eq!(filling_candidates(&record, "pions"), vec![0, 2]);
}

#[test]
fn none_group_fills_every_surviving_candidate() {
    let yaml = r#"
histograms:
  MPiPi:
    x: (locPiPlus1P4 + locPiPlus2P4).M()
    xrange: [0.0, 2.0]
    xbins: 100
uniqueness:
  combos:
    particles: none
    histograms: [MPiPi]
cuts:
  chi2:
    condition: locChiSq > 50
"#;
    let sel = build(yaml);
    let record = replay(
        &sel,
        &[
            combo(1, 10, 11),
            combo(1, 10, 11),
            combo(1, 10, 11).condition("chi2", true),
            combo(1, 10, 11).pre_cut(),
            combo(1, 11, 10),
        ],
    );
    assert_eq!(filling_candidates(&record, "combos"), vec![0, 1, 4]);
    assert_eq!(record.fills_into("MPiPi_allcombos"), 3);
}

#[test]
fn negative_weights_never_cancel() {
    let yaml = r#"
weights:
  sideband:
    condition: locIsSideband
    weight: "-3.0"
"#;
    let sel = build(yaml);
    let record = replay(
        &sel,
        &[
            combo(1, 10, 11).seed_weight(-2.0).condition("sideband", true).factor("sideband", -3.0),
            combo(1, 10, 12).seed_weight(-2.0).factor("sideband", -3.0),
        ],
    );
    assert_relative_eq!(record.weights[0], -6.0);
    assert_relative_eq!(record.weights[1], -2.0);
}

#[test]
fn gate_policies_select_candidates() {
    let yaml = r#"
histograms:
  h:
    x: locT
    xrange: [0, 1]
    xbins: 10
  g:
    x: locT
    xrange: [0, 1]
    xbins: 10
cuts:
  peak:
    enabled: false
    condition: locInPeak
uniqueness:
  in_peak:
    particles: none
    histograms: [h]
    cuts: peak
  off_peak:
    particles: none
    histograms: [g]
    cuts: [peak]
    gate: none
"#;
    let sel = build(yaml);
    let record = replay(&sel, &[combo(1, 10, 11).condition("peak", true), combo(1, 10, 12)]);
    assert_eq!(filling_candidates(&record, "in_peak"), vec![0]);
    assert_eq!(filling_candidates(&record, "off_peak"), vec![1]);
}

#[test]
fn output_gate_needs_a_survivor() {
    let yaml = r#"
cuts:
  everything:
    condition: "true"
"#;
    let sel = build(yaml);
    let all_cut = replay(&sel, &[combo(1, 10, 11).condition("everything", true)]);
    assert!(!all_cut.output_row);
    let one_left = replay(
        &sel,
        &[combo(1, 10, 11).condition("everything", true), combo(1, 10, 12)],
    );
    assert!(one_left.output_row);
    assert!(!replay(&sel, &[]).output_row);
}

#[test]
fn hook_runs_after_cuts_and_weights() {
    let yaml = r#"
histograms:
  h:
    x: locT
    xrange: [0, 1]
    xbins: 10
cuts:
  chi2:
    condition: locChiSq > 50
uniqueness:
  combos:
    particles: none
    histograms: [h]
"#;
    let sel = build(yaml);
    let mut seen = Vec::new();
    let record = sel
        .procedure
        .replay(
            &[combo(1, 10, 11).condition("chi2", true), combo(1, 10, 12), combo(1, 10, 13)],
            &mut |i: usize| {
                seen.push(i);
                i != 2
            },
        )
        .unwrap();
    assert_eq!(seen, vec![1, 2]);
    assert_eq!(record.cut, vec![true, false, true]);
    assert_eq!(filling_candidates(&record, "combos"), vec![1]);
}

#[test]
fn destination_is_never_declared() {
    let yaml = r#"
histograms:
  MPiPi:
    x: (locPiPlus1P4 + locPiPlus2P4).M()
    xrange: [0.0, 2.0]
    xbins: 100
  MPiPi_acc:
    x: (locPiPlus1P4 + locPiPlus2P4).M()
    weight: locWeight * 0.5
    destination: MPiPi
"#;
    let sel = build(yaml);
    let storages: Vec<&str> = sel.histogram_declarations().map(|h| h.storage.as_str()).collect();
    assert_eq!(storages, vec!["MPiPi_default"]);

    let record = replay(&sel, &[combo(1, 10, 11)]);
    assert_eq!(record.fills_into("MPiPi_default"), 2);
    assert!(record.fills.iter().all(|f| !f.storage.starts_with("MPiPi_acc")));

    let acc = record.fills.iter().find(|f| f.histogram == "MPiPi_acc").unwrap();
    assert_eq!(acc.weight_expression, "locWeight * 0.5");
    assert_relative_eq!(acc.weight, 1.0);
    let own = record.fills.iter().find(|f| f.histogram == "MPiPi").unwrap();
    assert_eq!(own.weight_expression, "locWeight");
}

#[test]
fn destination_outside_group_rejected() {
    let yaml = r#"
histograms:
  MPiPi:
    x: (locPiPlus1P4 + locPiPlus2P4).M()
    xrange: [0.0, 2.0]
    xbins: 100
  MPiPi_acc:
    x: (locPiPlus1P4 + locPiPlus2P4).M()
    destination: MPiPi
uniqueness:
  a:
    particles: all
    histograms: [MPiPi]
  b:
    particles: none
    histograms: [MPiPi_acc]
"#;
    let result = SelectorBuilder::new(swap_topology()).config(parse_yaml(yaml).unwrap()).build();
    assert!(matches!(result, Err(Error::ConfigValidation(_))));
}

#[test]
fn all_expansion_skips_untracked_roles() {
    let topo = Topology::new(vec![
        ReactionStep::new(vec![
            ParticleRole::new("ComboBeam", RoleKind::Beam, 22, 0, -1),
            ParticleRole::new("Target", RoleKind::Target, 2212, 0, 0),
            ParticleRole::new("DecayingPi0", RoleKind::Decaying, 111, 0, 1),
            ParticleRole::new("PiPlus1", RoleKind::FinalCharged, 211, 0, 2),
            ParticleRole::new("MissingProton", RoleKind::Missing, 2212, 0, 3),
        ]),
        ReactionStep::new(vec![
            ParticleRole::new("DecayingPi0", RoleKind::Decaying, 111, 1, -1),
            ParticleRole::new("Photon1", RoleKind::FinalNeutral, 22, 1, 0),
            ParticleRole::new("Photon2", RoleKind::FinalNeutral, 22, 1, 1),
        ]),
    ]);
    let roles: Vec<String> = all_slots(&topo).into_iter().map(|s| s.role).collect();
    assert_eq!(roles, vec!["ComboBeam", "PiPlus1", "Photon1", "Photon2"]);
}

#[test]
fn inheritance_cycle_aborts_generation() {
    let yaml = r#"
histograms:
  a:
    xhist: b
  b:
    xhist: a
"#;
    let result = SelectorBuilder::new(swap_topology()).config(parse_yaml(yaml).unwrap()).build();
    assert!(matches!(result, Err(Error::Cycle { .. })));
}

#[test]
fn storage_name_collision_rejected() {
    let yaml = r#"
histograms:
  h:
    x: locT
    xrange: [0, 1]
    xbins: 10
uniqueness:
  first:
    particles: none
    histograms: [h]
  second:
    particles: none
    histograms: [h]
"#;
    let result = SelectorBuilder::new(swap_topology()).config(parse_yaml(yaml).unwrap()).build();
    assert!(matches!(result, Err(Error::DuplicateDefinition { .. })));
}

//! Uniqueness tracking.
//!
//! A uniqueness group fills its histograms at most once per distinct
//! combination of tracked identity tokens within an event. Groups tracking no
//! particles fill once per surviving candidate. Explicit lists and ALL key on
//! a map from species to the set of tokens of that species, so candidates
//! differing only by a permutation of same-species particles share a key.
//! A single tracked particle keys on its bare token.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use ps_core::{Error, Result, RoleKind, SpeciesTag, Topology};
use serde::Serialize;

use crate::config::GatePolicy;
use crate::registry::{CutRule, TrackedParticles, UniquenessGroup};

/// Per-candidate identity token value.
pub type IdentityToken = i64;

/// Name of the beam slot when the topology has no beam role.
pub const BEAM_SLOT: &str = "Beam";

/// Storage suffix of a group.
///
/// A group named `all` tracking ALL keeps bare names, groups tracking nothing
/// share `_allcombos`, anything else uses `_<name>`.
pub fn group_tag(name: &str, tracked: &TrackedParticles) -> String {
    match tracked {
        TrackedParticles::All if name == "all" => String::new(),
        TrackedParticles::None => "_allcombos".to_string(),
        _ => format!("_{name}"),
    }
}

// ── Keys ───────────────────────────────────────────────────────

/// One tracked particle slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedSlot {
    /// Role name (or [`BEAM_SLOT`] for a synthetic beam).
    pub role: String,
    pub species: SpeciesTag,
    /// Local holding the identity token.
    pub token: String,
}

/// Dedup key of one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Unkeyed,
    Token(IdentityToken),
    Species(BTreeMap<SpeciesTag, BTreeSet<IdentityToken>>),
}

/// Shape of a group's per-event dedup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyShape {
    /// Set of bare tokens.
    TokenSet,
    /// Set of species-to-token-set maps.
    SpeciesMapSet,
}

/// How a group derives keys from a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KeyStrategy {
    Unkeyed,
    Single(TrackedSlot),
    SpeciesMap(Vec<TrackedSlot>),
}

impl KeyStrategy {
    /// Plan key derivation for `group` against `topology`.
    pub fn plan(group: &UniquenessGroup, topology: &Topology) -> Result<Self> {
        match &group.tracked {
            TrackedParticles::None => Ok(KeyStrategy::Unkeyed),
            TrackedParticles::All => Ok(KeyStrategy::SpeciesMap(all_slots(topology))),
            TrackedParticles::Explicit(roles) => {
                let slots = roles
                    .iter()
                    .map(|role| explicit_slot(role, topology, &group.name))
                    .collect::<Result<Vec<_>>>()?;
                Ok(match <[TrackedSlot; 1]>::try_from(slots) {
                    Ok([slot]) => KeyStrategy::Single(slot),
                    Err(slots) => KeyStrategy::SpeciesMap(slots),
                })
            }
        }
    }

    /// Dedup state shape, `None` for unkeyed groups.
    pub fn shape(&self) -> Option<KeyShape> {
        match self {
            KeyStrategy::Unkeyed => None,
            KeyStrategy::Single(_) => Some(KeyShape::TokenSet),
            KeyStrategy::SpeciesMap(_) => Some(KeyShape::SpeciesMapSet),
        }
    }

    /// Key of a candidate whose tokens are given by role name.
    pub fn key(&self, tokens: &HashMap<String, IdentityToken>) -> Result<DedupKey> {
        let token = |slot: &TrackedSlot| {
            tokens.get(&slot.role).copied().ok_or_else(|| {
                Error::validation(format!("candidate has no identity token for '{}'", slot.role))
            })
        };
        match self {
            KeyStrategy::Unkeyed => Ok(DedupKey::Unkeyed),
            KeyStrategy::Single(slot) => Ok(DedupKey::Token(token(slot)?)),
            KeyStrategy::SpeciesMap(slots) => {
                let mut map: BTreeMap<SpeciesTag, BTreeSet<IdentityToken>> = BTreeMap::new();
                for slot in slots {
                    map.entry(slot.species).or_default().insert(token(slot)?);
                }
                Ok(DedupKey::Species(map))
            }
        }
    }
}

fn beam_slot(topology: &Topology) -> TrackedSlot {
    TrackedSlot {
        role: topology.beam().map(|b| b.name.clone()).unwrap_or_else(|| BEAM_SLOT.to_string()),
        species: SpeciesTag::Unknown,
        token: "locBeamID".to_string(),
    }
}

/// Expansion of ALL: the beam plus every trackable non-beam role, in
/// topology order.
pub fn all_slots(topology: &Topology) -> Vec<TrackedSlot> {
    let mut slots = vec![beam_slot(topology)];
    for role in topology.roles().filter(|r| r.kind != RoleKind::Beam) {
        if let Some(token) = role.identity_token() {
            slots.push(TrackedSlot { role: role.name.clone(), species: role.species(), token });
        }
    }
    slots
}

fn explicit_slot(role: &str, topology: &Topology, group: &str) -> Result<TrackedSlot> {
    if role == BEAM_SLOT && topology.role(role).is_none() {
        return Ok(beam_slot(topology));
    }
    let Some(r) = topology.role(role) else {
        return Err(Error::TopologyMismatch {
            role: role.to_string(),
            context: format!("uniqueness group '{group}'"),
        });
    };
    let Some(token) = r.identity_token() else {
        return Err(Error::validation(format!(
            "uniqueness group '{group}' tracks '{role}', which has no identity token"
        )));
    };
    Ok(TrackedSlot { role: r.name.clone(), species: r.species(), token })
}

// ── Gates ──────────────────────────────────────────────────────

/// Named condition a gate consults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateCut {
    pub name: String,
    pub condition: String,
}

/// Fill gate of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Gate {
    /// Fill every candidate that reaches dispatch.
    Survivors,
    /// Fill according to the listed cut conditions.
    Cuts { policy: GatePolicy, cuts: Vec<GateCut> },
}

impl Gate {
    /// Build the gate of `group`.
    pub fn plan(group: &UniquenessGroup, cuts: &[CutRule]) -> Result<Self> {
        let Some(names) = &group.gating_cuts else {
            return Ok(Gate::Survivors);
        };
        let cuts = names
            .iter()
            .map(|n| {
                cuts.iter()
                    .find(|c| &c.name == n)
                    .map(|c| GateCut { name: c.name.clone(), condition: c.condition.clone() })
                    .ok_or_else(|| Error::UnresolvedReference {
                        kind: "uniqueness group",
                        from: group.name.clone(),
                        target_kind: "cut",
                        target: n.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Gate::Cuts { policy: group.gate_policy, cuts })
    }

    /// Evaluate against per-candidate condition outcomes. A condition with
    /// no outcome counts as false.
    pub fn passes(&self, outcomes: &HashMap<String, bool>) -> bool {
        match self {
            Gate::Survivors => true,
            Gate::Cuts { policy, cuts } => {
                let any = cuts.iter().any(|c| outcomes.get(&c.name).copied().unwrap_or(false));
                match policy {
                    GatePolicy::AnyTrue => any,
                    GatePolicy::NoneTrue => !any,
                }
            }
        }
    }
}

// ── Group plan and event state ─────────────────────────────────

/// A uniqueness group ready for emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniquenessPlan {
    pub group: String,
    pub tag: String,
    pub folder: String,
    pub key: KeyStrategy,
    pub gate: Gate,
    pub histograms: Vec<String>,
}

impl UniquenessPlan {
    /// Plan `group` against `topology`.
    pub fn new(group: &UniquenessGroup, topology: &Topology, cuts: &[CutRule]) -> Result<Self> {
        Ok(Self {
            group: group.name.clone(),
            tag: group_tag(&group.name, &group.tracked),
            folder: group.folder.clone(),
            key: KeyStrategy::plan(group, topology)?,
            gate: Gate::plan(group, cuts)?,
            histograms: group.histograms.clone(),
        })
    }
}

/// Per-event dedup state, one key set per group. Recreated for every event.
///
/// Owned by the event loop. Workers processing events in parallel each need
/// their own histogram storages, merged once all events are done.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    seen: Vec<HashSet<DedupKey>>,
}

impl EventContext {
    /// Fresh state for `groups` groups.
    pub fn new(groups: usize) -> Self {
        Self { seen: vec![HashSet::new(); groups] }
    }

    /// Record `key` for `group`. Returns `true` when the group should fill:
    /// the key was new, or the group is unkeyed.
    pub fn claim(&mut self, group: usize, key: DedupKey) -> bool {
        if key == DedupKey::Unkeyed {
            return true;
        }
        match self.seen.get_mut(group) {
            Some(set) => set.insert(key),
            None => false,
        }
    }

    /// Number of keys recorded for `group`.
    pub fn seen(&self, group: usize) -> usize {
        self.seen.get(group).map_or(0, HashSet::len)
    }
}

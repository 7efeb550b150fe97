//! Reaction topology model
//!
//! The topology is supplied by an external collaborator (normally extracted
//! from the user info of an analysis tree). It is an ordered list of reaction
//! steps, each holding the particle roles of that step ordered by slot.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Role a particle plays in the reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Incoming beam particle.
    Beam,
    /// Fixed target.
    Target,
    /// Intermediate decaying particle.
    Decaying,
    /// Particle inferred from missing momentum.
    Missing,
    /// Detected charged final-state particle (track).
    FinalCharged,
    /// Detected neutral final-state particle (calorimeter cluster).
    FinalNeutral,
}

/// Species tag used to group identity tokens in multi-particle dedup keys.
///
/// The beam is always tagged `Unknown`; every other tracked role carries its
/// PDG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpeciesTag {
    /// Beam photons (no species distinction).
    Unknown,
    /// PDG Monte Carlo particle code.
    Pdg(i32),
}

/// One particle role of a reaction step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleRole {
    /// Role name as used in generated locals (e.g. `PiPlus1`).
    pub name: String,
    /// Role tag.
    pub kind: RoleKind,
    /// PDG code of the particle species.
    pub pdg: i32,
    /// Index of the reaction step holding this role.
    pub step: usize,
    /// Slot within the step. Negative for the initial particle of a step.
    pub slot: i32,
}

impl ParticleRole {
    /// Create a new role.
    pub fn new(name: impl Into<String>, kind: RoleKind, pdg: i32, step: usize, slot: i32) -> Self {
        Self { name: name.into(), kind, pdg, step, slot }
    }

    /// Name of the per-candidate identity-token local, if this role has one.
    ///
    /// Charged tracks resolve to their track id, neutrals to their cluster id
    /// and the beam to the beam-particle id.
    pub fn identity_token(&self) -> Option<String> {
        match self.kind {
            RoleKind::Beam => Some("locBeamID".into()),
            RoleKind::FinalCharged => Some(format!("loc{}TrackID", self.name)),
            RoleKind::FinalNeutral => Some(format!("loc{}NeutralID", self.name)),
            RoleKind::Target | RoleKind::Decaying | RoleKind::Missing => None,
        }
    }

    /// Whether this role carries an identity token and can be tracked.
    pub fn is_trackable(&self) -> bool {
        self.identity_token().is_some()
    }

    /// Species tag used in multi-particle dedup keys.
    pub fn species(&self) -> SpeciesTag {
        match self.kind {
            RoleKind::Beam => SpeciesTag::Unknown,
            _ => SpeciesTag::Pdg(self.pdg),
        }
    }

    /// Four-vector locals this role contributes to the shared vector list.
    pub fn vector_names(&self) -> Vec<String> {
        match self.kind {
            RoleKind::Beam => vec!["locBeamP4".into(), "locBeamP4_Measured".into()],
            RoleKind::Target => Vec::new(),
            RoleKind::Decaying if self.slot < 0 => vec![format!("loc{}P4", self.name)],
            RoleKind::Decaying => Vec::new(),
            RoleKind::Missing => vec![format!("loc{}P4", self.name)],
            RoleKind::FinalCharged | RoleKind::FinalNeutral => {
                vec![format!("loc{}P4", self.name), format!("loc{}P4_Measured", self.name)]
            }
        }
    }

    /// Name used for this role inside generated accessors (`loc<stem>P4`).
    pub fn accessor_stem(&self) -> &str {
        match self.kind {
            RoleKind::Beam => "Beam",
            _ => &self.name,
        }
    }
}

/// One step of the reaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReactionStep {
    /// Roles of this step, ordered by slot.
    pub roles: Vec<ParticleRole>,
}

impl ReactionStep {
    /// Create a step, ordering roles by slot.
    pub fn new(mut roles: Vec<ParticleRole>) -> Self {
        roles.sort_by_key(|r| r.slot);
        Self { roles }
    }
}

/// Full reaction topology.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Name of the source tree, when known.
    #[serde(default)]
    pub tree_name: Option<String>,
    /// Ordered reaction steps.
    pub steps: Vec<ReactionStep>,
}

impl Topology {
    /// Create a topology from ordered steps.
    pub fn new(steps: Vec<ReactionStep>) -> Self {
        Self { tree_name: None, steps }
    }

    /// Set the source tree name.
    pub fn with_tree_name(mut self, name: impl Into<String>) -> Self {
        self.tree_name = Some(name.into());
        self
    }

    /// Parse a topology from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut topo: Topology = serde_json::from_str(json)?;
        for step in &mut topo.steps {
            step.roles.sort_by_key(|r| r.slot);
        }
        topo.validate()?;
        Ok(topo)
    }

    /// Check role-name uniqueness and that at most one beam is present.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut beams = 0usize;
        for role in self.roles() {
            if !seen.insert(role.name.as_str()) {
                return Err(Error::validation(format!(
                    "topology declares role '{}' more than once",
                    role.name
                )));
            }
            if role.kind == RoleKind::Beam {
                beams += 1;
            }
        }
        if beams > 1 {
            return Err(Error::validation(format!("topology declares {beams} beam roles")));
        }
        Ok(())
    }

    /// All roles in topology order (step by step, slot by slot).
    pub fn roles(&self) -> impl Iterator<Item = &ParticleRole> {
        self.steps.iter().flat_map(|s| s.roles.iter())
    }

    /// Look up a role by name.
    pub fn role(&self, name: &str) -> Option<&ParticleRole> {
        self.roles().find(|r| r.name == name)
    }

    /// The beam role, if the topology has one.
    pub fn beam(&self) -> Option<&ParticleRole> {
        self.roles().find(|r| r.kind == RoleKind::Beam)
    }

    /// Role read by accessors with `stem` (`Beam` or a role name).
    pub fn role_by_stem(&self, stem: &str) -> Option<&ParticleRole> {
        self.roles().find(|r| r.accessor_stem() == stem || r.name == stem)
    }

    /// Topology four-vectors in topology order.
    pub fn vector_names(&self) -> Vec<String> {
        self.roles().flat_map(|r| r.vector_names()).collect()
    }

    /// Out-of-time beam bunch count encoded in the tree name as `_B<n>`.
    pub fn out_of_time_bunches(&self) -> Option<u32> {
        let name = self.tree_name.as_deref()?;
        name.match_indices("_B").find_map(|(idx, _)| {
            let digits: String =
                name[idx + 2..].chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
    }
}

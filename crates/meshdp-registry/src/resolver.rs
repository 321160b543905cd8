//! Collision resolution.
//!
//! Every normalized fingerprint claim is grouped by fingerprint. A fingerprint
//! claimed by more than one profile goes to the best-ranked claimant; the rank
//! is [`rank`] over `(category specificity, declaration order)`.

use crate::error::{Conflict, RegistryError, Result};
use meshdp_core::{Fingerprint, ProfileId, Specificity, TieBreak};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// One profile's claim on a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub fingerprint: Fingerprint,
    pub profile: ProfileId,
    pub specificity: Specificity,
    /// Declaration index of the claiming profile.
    pub declaration: u32,
    /// Claim came from a repaired declaration.
    pub repaired: bool,
}

/// Ranking key: higher specificity first, then earlier declaration.
pub fn rank(specificity: Specificity, declaration: u32) -> (Specificity, Reverse<u32>) {
    (specificity, Reverse(declaration))
}

fn claim_rank(claim: &Claim) -> (Specificity, Reverse<u32>) {
    rank(claim.specificity, claim.declaration)
}

/// Why a collision went to its winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CollisionReason {
    /// The winner's category is strictly more specific than the runner-up's.
    Specificity {
        chosen: Specificity,
        runner_up: Specificity,
    },
    /// Same specificity; the earlier declaration won.
    DeclarationOrder { specificity: Specificity },
}

impl fmt::Display for CollisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specificity { chosen, runner_up } => {
                write!(f, "{} category beats {}", chosen, runner_up)
            }
            Self::DeclarationOrder { specificity } => {
                write!(f, "equal {} categories, earliest declaration wins", specificity)
            }
        }
    }
}

/// Build-time record of one resolved collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionRecord {
    pub fingerprint: Fingerprint,
    /// Claimants, best-ranked first.
    pub candidate_profiles: Vec<ProfileId>,
    pub chosen_profile: ProfileId,
    pub reason: CollisionReason,
}

/// Output of resolution: every fingerprint owned by exactly one profile.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub table: BTreeMap<Fingerprint, ProfileId>,
    pub collisions: Vec<CollisionRecord>,
}

impl Resolution {
    /// Fingerprints a profile kept after resolution.
    pub fn claims_of<'a>(&'a self, profile: &'a str) -> impl Iterator<Item = &'a Fingerprint> + 'a {
        self.table
            .iter()
            .filter(move |(_, owner)| owner.as_str() == profile)
            .map(|(fp, _)| fp)
    }
}

/// Deterministic resolver over all claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollisionResolver {
    tie_break: TieBreak,
    strict_repairs: bool,
}

impl CollisionResolver {
    pub fn new(tie_break: TieBreak, strict_repairs: bool) -> Self {
        Self {
            tie_break,
            strict_repairs,
        }
    }

    /// Assign every fingerprint to one profile.
    ///
    /// All conflicts are collected before failing so a build reports every
    /// problem at once.
    pub fn resolve(&self, claims: Vec<Claim>) -> Result<Resolution> {
        let mut multimap: BTreeMap<Fingerprint, Vec<Claim>> = BTreeMap::new();
        for claim in claims {
            let entry = multimap.entry(claim.fingerprint.clone()).or_default();
            match entry.iter_mut().find(|c| c.profile == claim.profile) {
                // Same profile declaring one fingerprint twice (e.g. by case).
                // A clean declaration outweighs a repaired one.
                Some(existing) => existing.repaired &= claim.repaired,
                None => entry.push(claim),
            }
        }

        let mut resolution = Resolution::default();
        let mut conflicts = Vec::new();

        for (fingerprint, mut claimants) in multimap {
            if claimants.len() == 1 {
                let only = claimants.remove(0);
                resolution.table.insert(fingerprint, only.profile);
                continue;
            }

            claimants.sort_by(|a, b| claim_rank(b).cmp(&claim_rank(a)));
            let profiles: Vec<ProfileId> = claimants.iter().map(|c| c.profile.clone()).collect();

            if self.strict_repairs && claimants.iter().any(|c| c.repaired) {
                let repaired_by = claimants
                    .iter()
                    .filter(|c| c.repaired)
                    .map(|c| c.profile.clone())
                    .collect();
                conflicts.push(Conflict::AmbiguousRepair {
                    fingerprint,
                    repaired_by,
                    profiles,
                });
                continue;
            }

            let best = &claimants[0];
            let runner_up = &claimants[1];
            let reason = match best.specificity.cmp(&runner_up.specificity) {
                Ordering::Greater => CollisionReason::Specificity {
                    chosen: best.specificity,
                    runner_up: runner_up.specificity,
                },
                _ if self.tie_break == TieBreak::DeclarationOrder => {
                    CollisionReason::DeclarationOrder {
                        specificity: best.specificity,
                    }
                }
                _ => {
                    let tied = claimants
                        .iter()
                        .take_while(|c| c.specificity == best.specificity)
                        .map(|c| c.profile.clone())
                        .collect();
                    conflicts.push(Conflict::EqualPriority {
                        fingerprint,
                        profiles: tied,
                    });
                    continue;
                }
            };

            debug!(
                fingerprint = %fingerprint,
                chosen = %best.profile,
                candidates = profiles.len(),
                reason = %reason,
                "Resolved fingerprint collision"
            );
            resolution.table.insert(fingerprint.clone(), best.profile.clone());
            resolution.collisions.push(CollisionRecord {
                fingerprint,
                chosen_profile: best.profile.clone(),
                candidate_profiles: profiles,
                reason,
            });
        }

        if conflicts.is_empty() {
            Ok(resolution)
        } else {
            for conflict in &conflicts {
                warn!(conflict = %conflict, "Unresolved fingerprint collision");
            }
            Err(RegistryError::Unresolved(conflicts))
        }
    }
}

//! Entity reconciliation between provider records and internal fleet assets.
//!
//! Auto-matching proposes internal vehicles/drivers for unmatched entity
//! mappings using an exact secondary identifier (VIN, license number) or
//! bigram similarity on normalized names. Ambiguous candidates are left
//! unmatched for an operator to resolve; a wrong guess here would bind HOS
//! and fault data to the wrong asset.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use sea_orm::DatabaseConnection;

use crate::repositories::{EntityMappingRepository, FleetRepository, MatchSource};
use crate::types::EntityType;

/// Minimum name similarity for an auto-match.
const MATCH_THRESHOLD: f64 = 0.85;

/// Counts from one auto-match pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct MatchSummary {
    /// Unmatched mappings examined
    pub examined: usize,
    /// Mappings matched this pass
    pub matched: usize,
    /// Mappings skipped because two candidates tied for best score
    pub ambiguous: usize,
    /// Previously matched mappings whose internal record is gone
    pub orphaned: usize,
}

/// Internal candidate for matching, shared between vehicles and drivers.
struct Candidate {
    internal_id: Uuid,
    normalized_name: String,
    /// Exact secondary identifier (VIN or license number), normalized
    secondary: Option<String>,
}

/// Reconciler over one tenant's fleet and one connection's mappings.
#[derive(Debug, Clone)]
pub struct Reconciler {
    mappings: EntityMappingRepository,
    fleet: FleetRepository,
}

impl Reconciler {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            mappings: EntityMappingRepository::new(db.clone()),
            fleet: FleetRepository::new(db),
        }
    }

    /// Auto-match unmatched vehicle mappings against the tenant's vehicles.
    #[instrument(skip(self))]
    pub async fn auto_match_vehicles(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<MatchSummary> {
        let candidates = self
            .fleet
            .list_vehicles(tenant_id)
            .await?
            .into_iter()
            .map(|vehicle| Candidate {
                internal_id: vehicle.id,
                normalized_name: normalize(&vehicle.name),
                secondary: vehicle.vin.as_deref().map(normalize),
            })
            .collect();
        self.run_pass(tenant_id, connection_id, EntityType::Vehicle, candidates)
            .await
    }

    /// Auto-match unmatched driver mappings against the tenant's drivers.
    #[instrument(skip(self))]
    pub async fn auto_match_drivers(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<MatchSummary> {
        let candidates = self
            .fleet
            .list_drivers(tenant_id)
            .await?
            .into_iter()
            .map(|driver| Candidate {
                internal_id: driver.id,
                normalized_name: normalize(&driver.name),
                secondary: driver.license_number.as_deref().map(normalize),
            })
            .collect();
        self.run_pass(tenant_id, connection_id, EntityType::Driver, candidates)
            .await
    }

    async fn run_pass(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
        entity_type: EntityType,
        candidates: Vec<Candidate>,
    ) -> Result<MatchSummary> {
        let mut summary = MatchSummary::default();

        // Internal records already claimed by a live mapping on this
        // connection are off the table, and so is anything matched earlier
        // in this pass.
        let mut claimed: HashSet<Uuid> = HashSet::new();
        for mapping in self
            .mappings
            .list_by_connection(connection_id, entity_type)
            .await?
        {
            if let Some(internal_id) = mapping.internal_id {
                if mapping.orphaned {
                    continue;
                }
                let exists = match entity_type {
                    EntityType::Vehicle => self.fleet.vehicle_exists(tenant_id, internal_id).await?,
                    EntityType::Driver => self.fleet.driver_exists(tenant_id, internal_id).await?,
                };
                if exists {
                    claimed.insert(internal_id);
                } else {
                    self.mappings.mark_orphaned(mapping).await?;
                    summary.orphaned += 1;
                }
            }
        }

        let unmatched = self.mappings.unmatched(connection_id, entity_type).await?;
        for mapping in unmatched {
            summary.examined += 1;

            let external_name = normalize(mapping.external_name.as_deref().unwrap_or_default());
            let external_ref = mapping.external_ref.as_deref().map(normalize);

            let available = candidates
                .iter()
                .filter(|candidate| !claimed.contains(&candidate.internal_id));

            match pick_best(available, &external_name, external_ref.as_deref()) {
                Pick::Match { internal_id, score } => {
                    debug!(
                        mapping_id = %mapping.id,
                        %internal_id,
                        score,
                        "Auto-matched external entity"
                    );
                    self.mappings
                        .set_match(mapping, internal_id, MatchSource::Auto)
                        .await?;
                    claimed.insert(internal_id);
                    summary.matched += 1;
                }
                Pick::Ambiguous => {
                    debug!(mapping_id = %mapping.id, "Ambiguous match left for manual review");
                    summary.ambiguous += 1;
                }
                Pick::None => {}
            }
        }

        info!(
            %connection_id,
            entity_type = %entity_type,
            matched = summary.matched,
            ambiguous = summary.ambiguous,
            orphaned = summary.orphaned,
            "Auto-match pass finished"
        );
        Ok(summary)
    }
}

enum Pick {
    Match { internal_id: Uuid, score: f64 },
    Ambiguous,
    None,
}

/// Score every candidate and pick a unique best above threshold.
///
/// An exact secondary-identifier hit scores 1.0 and beats any name score.
/// Two candidates tied for best leave the mapping unmatched.
fn pick_best<'a>(
    candidates: impl Iterator<Item = &'a Candidate>,
    external_name: &str,
    external_ref: Option<&str>,
) -> Pick {
    let mut best: Option<(Uuid, f64)> = None;
    let mut tied = false;

    for candidate in candidates {
        let secondary_hit = match (external_ref, candidate.secondary.as_deref()) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        };
        let score = if secondary_hit {
            1.0
        } else if external_name.is_empty() {
            0.0
        } else {
            dice_coefficient(external_name, &candidate.normalized_name)
        };

        if score < MATCH_THRESHOLD {
            continue;
        }
        match best {
            Some((_, best_score)) if score > best_score => {
                best = Some((candidate.internal_id, score));
                tied = false;
            }
            Some((_, best_score)) if score == best_score => {
                tied = true;
            }
            Some(_) => {}
            None => {
                best = Some((candidate.internal_id, score));
            }
        }
    }

    match best {
        Some(_) if tied => Pick::Ambiguous,
        Some((internal_id, score)) => Pick::Match { internal_id, score },
        None => Pick::None,
    }
}

/// Lowercase and strip everything but alphanumerics, so "Truck #101" and
/// "truck-101" compare equal.
fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Dice coefficient over character bigrams of two normalized strings.
fn dice_coefficient(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_bigrams = bigrams(a);
    let b_bigrams = bigrams(b);
    if a_bigrams.is_empty() || b_bigrams.is_empty() {
        return 0.0;
    }

    let mut b_pool: Vec<Option<[char; 2]>> = b_bigrams.iter().copied().map(Some).collect();
    let mut overlap = 0usize;
    for bigram in &a_bigrams {
        if let Some(slot) = b_pool.iter_mut().find(|slot| **slot == Some(*bigram)) {
            *slot = None;
            overlap += 1;
        }
    }

    (2.0 * overlap as f64) / (a_bigrams.len() + b_bigrams.len()) as f64
}

fn bigrams(value: &str) -> Vec<[char; 2]> {
    let chars: Vec<char> = value.chars().collect();
    chars.windows(2).map(|pair| [pair[0], pair[1]]).collect()
}

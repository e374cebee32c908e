use crate::claim::{ClaimRecord, ClaimType, OwnerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted ledger row: one owner's usage and limit for one claim type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub owner: OwnerId,
    pub claim_type: ClaimType,
    pub usage: u32,
    pub limit: u32,
}

/// Configured per-type limits applied to owners the ledger has not seen
/// yet. Sourced from configuration at startup.
#[derive(Debug, Clone)]
pub struct QuotaDefaults {
    pub player: u32,
    pub always_on: u32,
    pub admin: u32,
}

impl QuotaDefaults {
    pub fn limit_for(&self, claim_type: ClaimType) -> u32 {
        match claim_type {
            ClaimType::Player => self.player,
            ClaimType::AlwaysOn => self.always_on,
            ClaimType::Admin => self.admin,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct OwnerQuota {
    usage: BTreeMap<ClaimType, u32>,
    limit: BTreeMap<ClaimType, u32>,
}

/// Per-owner quota counters, cached for O(1) checks.
///
/// Derived state: recomputable from the claim set via `rebuild_usage`, and
/// mutated only by the balancing engine. Limits absent from the map fall
/// back to the configured defaults.
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    defaults: QuotaDefaults,
    owners: BTreeMap<OwnerId, OwnerQuota>,
}

impl QuotaLedger {
    pub fn new(defaults: QuotaDefaults) -> Self {
        Self {
            defaults,
            owners: BTreeMap::new(),
        }
    }

    pub fn usage(&self, owner: &OwnerId, claim_type: ClaimType) -> u32 {
        self.owners
            .get(owner)
            .and_then(|quota| quota.usage.get(&claim_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn limit(&self, owner: &OwnerId, claim_type: ClaimType) -> u32 {
        self.owners
            .get(owner)
            .and_then(|quota| quota.limit.get(&claim_type))
            .copied()
            .unwrap_or_else(|| self.defaults.limit_for(claim_type))
    }

    pub fn charge(&mut self, owner: &OwnerId, claim_type: ClaimType) {
        let quota = self.owners.entry(owner.clone()).or_default();
        *quota.usage.entry(claim_type).or_insert(0) += 1;
    }

    pub fn release(&mut self, owner: &OwnerId, claim_type: ClaimType) {
        if let Some(quota) = self.owners.get_mut(owner) {
            if let Some(usage) = quota.usage.get_mut(&claim_type) {
                *usage = usage.saturating_sub(1);
            }
        }
    }

    pub fn set_limit(&mut self, owner: &OwnerId, claim_type: ClaimType, limit: u32) {
        let quota = self.owners.entry(owner.clone()).or_default();
        quota.limit.insert(claim_type, limit);
    }

    pub fn clear_owner_usage(&mut self, owner: &OwnerId) {
        if let Some(quota) = self.owners.get_mut(owner) {
            quota.usage.clear();
        }
    }

    /// Materializes the rows worth persisting: every (owner, type) pair
    /// with recorded usage or an explicitly set limit.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries = Vec::new();
        for (owner, quota) in &self.owners {
            for claim_type in ClaimType::ALL {
                if quota.usage.contains_key(&claim_type) || quota.limit.contains_key(&claim_type) {
                    entries.push(LedgerEntry {
                        owner: owner.clone(),
                        claim_type,
                        usage: self.usage(owner, claim_type),
                        limit: self.limit(owner, claim_type),
                    });
                }
            }
        }
        entries
    }

    pub fn apply_entries(&mut self, entries: &[LedgerEntry]) {
        for entry in entries {
            let quota = self.owners.entry(entry.owner.clone()).or_default();
            quota.usage.insert(entry.claim_type, entry.usage);
            quota.limit.insert(entry.claim_type, entry.limit);
        }
    }

    /// Replaces all usage counters with counts derived from the actual
    /// claim set. Returns true if any counter changed, i.e. the previous
    /// ledger state was stale.
    pub fn rebuild_usage(&mut self, claims: &[ClaimRecord]) -> bool {
        let mut derived: BTreeMap<OwnerId, BTreeMap<ClaimType, u32>> = BTreeMap::new();
        for claim in claims {
            *derived
                .entry(claim.owner.clone())
                .or_default()
                .entry(claim.claim_type)
                .or_insert(0) += 1;
        }

        let mut changed = false;
        for (owner, quota) in &mut self.owners {
            let fresh = derived.remove(owner).unwrap_or_default();
            if !usage_maps_equal(&quota.usage, &fresh) {
                changed = true;
            }
            quota.usage = fresh;
        }
        for (owner, usage) in derived {
            changed = true;
            self.owners.entry(owner).or_default().usage = usage;
        }
        changed
    }
}

/// Compares usage maps treating absent keys as zero.
fn usage_maps_equal(a: &BTreeMap<ClaimType, u32>, b: &BTreeMap<ClaimType, u32>) -> bool {
    ClaimType::ALL.iter().all(|claim_type| {
        a.get(claim_type).copied().unwrap_or(0) == b.get(claim_type).copied().unwrap_or(0)
    })
}

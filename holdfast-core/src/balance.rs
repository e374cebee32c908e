use crate::claim::{ChunkPos, ClaimRecord, ClaimType, OwnerId};
use crate::error::{HoldError, Result};
use crate::ledger::{LedgerEntry, QuotaDefaults, QuotaLedger};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use ulid::Ulid;

/// Administrative adjustment to an owner's limit for one claim type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    Add(u32),
    Set(u32),
    Remove(u32),
}

/// One owner's standing for one claim type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStanding {
    pub claim_type: ClaimType,
    pub usage: u32,
    pub limit: u32,
}

/// Store-wide counters backing the info command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub total_claims: usize,
    pub loadable_claims: usize,
    pub owners: usize,
    pub per_type: BTreeMap<ClaimType, usize>,
}

/// Enforces quota invariants and keeps the ledger consistent with the
/// claim set.
///
/// The engine exclusively owns both structures; nothing else mutates them.
/// Claims are kept in creation order, which is what makes the
/// demote-newest / restore-oldest policy deterministic across repeated
/// balance commands.
pub struct BalancingEngine {
    claims: Vec<ClaimRecord>,
    ledger: QuotaLedger,
}

impl BalancingEngine {
    pub fn new(defaults: QuotaDefaults) -> Self {
        Self {
            claims: Vec::new(),
            ledger: QuotaLedger::new(defaults),
        }
    }

    /// Builds an engine around state loaded from storage. The caller is
    /// responsible for having reconciled the ledger against the claims.
    pub fn from_snapshot(claims: Vec<ClaimRecord>, ledger: QuotaLedger) -> Self {
        Self { claims, ledger }
    }

    pub fn claims(&self) -> &[ClaimRecord] {
        &self.claims
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.ledger.entries()
    }

    /// Creates a claim, charging the owner's quota for its type.
    pub fn create_claim(
        &mut self,
        owner: OwnerId,
        server_name: impl Into<String>,
        world_id: impl Into<String>,
        position: ChunkPos,
        claim_type: ClaimType,
    ) -> Result<ClaimRecord> {
        let world_id = world_id.into();

        let duplicate = self.claims.iter().any(|claim| {
            claim.owner == owner
                && claim.world_id == world_id
                && claim.position == position
                && claim.claim_type == claim_type
        });
        if duplicate {
            return Err(HoldError::DuplicateClaim {
                owner: owner.to_string(),
                world_id,
                position: position.to_string(),
                claim_type: claim_type.to_string(),
            });
        }

        let usage = self.ledger.usage(&owner, claim_type);
        let limit = self.ledger.limit(&owner, claim_type);
        if usage >= limit {
            return Err(HoldError::QuotaExceeded {
                owner: owner.to_string(),
                claim_type: claim_type.to_string(),
                usage,
                limit,
            });
        }

        let record = ClaimRecord {
            id: Ulid::new().to_string(),
            owner: owner.clone(),
            server_name: server_name.into(),
            world_id,
            position,
            claim_type,
            loadable: true,
            created_at: Utc::now(),
        };
        self.claims.push(record.clone());
        self.ledger.charge(&owner, claim_type);

        tracing::debug!(
            "Created {} claim {} for {} at {} {}",
            claim_type,
            record.id,
            owner,
            record.world_id,
            record.position
        );
        Ok(record)
    }

    /// Removes one claim by id, releasing its quota slot. A freed slot may
    /// restore a previously demoted claim of the same owner and type.
    pub fn remove_claim(&mut self, id: &str) -> Result<ClaimRecord> {
        let index = self
            .claims
            .iter()
            .position(|claim| claim.id == id)
            .ok_or_else(|| HoldError::ClaimNotFound(id.to_string()))?;

        let record = self.claims.remove(index);
        self.ledger.release(&record.owner, record.claim_type);
        self.reconcile_loadable(&record.owner, record.claim_type);
        Ok(record)
    }

    /// Removes every claim of one owner and zeroes their usage. Applies
    /// fully or not at all; the in-memory mutation cannot partially fail.
    pub fn remove_all_claims_for_owner(&mut self, owner: &OwnerId) -> Vec<ClaimRecord> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .claims
            .drain(..)
            .partition(|claim| &claim.owner == owner);
        self.claims = kept;
        self.ledger.clear_owner_usage(owner);

        if !removed.is_empty() {
            tracing::info!("Removed all {} claims owned by {}", removed.len(), owner);
        }
        removed
    }

    /// Adjusts an owner's limit for one claim type. Lowering a limit below
    /// current usage never deletes claims; the excess claims are demoted
    /// most-recently-created first and stay reactivable.
    pub fn change_balance(
        &mut self,
        owner: &OwnerId,
        claim_type: ClaimType,
        change: BalanceChange,
    ) -> QuotaStanding {
        let current = self.ledger.limit(owner, claim_type);
        let limit = match change {
            BalanceChange::Add(amount) => current.saturating_add(amount),
            BalanceChange::Set(amount) => amount,
            BalanceChange::Remove(amount) => current.saturating_sub(amount),
        };
        self.ledger.set_limit(owner, claim_type, limit);
        self.reconcile_loadable(owner, claim_type);

        QuotaStanding {
            claim_type,
            usage: self.ledger.usage(owner, claim_type),
            limit,
        }
    }

    /// Read-only per-type report for one owner.
    pub fn summarize(&self, owner: &OwnerId) -> Vec<QuotaStanding> {
        ClaimType::ALL
            .iter()
            .map(|&claim_type| QuotaStanding {
                claim_type,
                usage: self.ledger.usage(owner, claim_type),
                limit: self.ledger.limit(owner, claim_type),
            })
            .collect()
    }

    /// Removes every claim whose world no longer exists and returns the
    /// count removed. Surviving claims are left untouched, including their
    /// `loadable` flags.
    pub fn purge(&mut self, existing_worlds: &HashSet<String>) -> usize {
        let (dead, kept): (Vec<_>, Vec<_>) = self
            .claims
            .drain(..)
            .partition(|claim| !existing_worlds.contains(&claim.world_id));
        self.claims = kept;

        for claim in &dead {
            self.ledger.release(&claim.owner, claim.claim_type);
            tracing::info!(
                "Purged claim {} in missing world {} (owner {})",
                claim.id,
                claim.world_id,
                claim.owner
            );
        }
        dead.len()
    }

    pub fn stats(&self) -> EngineStats {
        let mut per_type = BTreeMap::new();
        let mut owners = HashSet::new();
        let mut loadable_claims = 0;
        for claim in &self.claims {
            *per_type.entry(claim.claim_type).or_insert(0) += 1;
            owners.insert(&claim.owner);
            if claim.loadable {
                loadable_claims += 1;
            }
        }
        EngineStats {
            total_claims: self.claims.len(),
            loadable_claims,
            owners: owners.len(),
            per_type,
        }
    }

    /// Re-aligns `loadable` flags with the owner's limit for one type:
    /// demotes the newest claims while too many are loadable, restores the
    /// oldest demoted claims while there is room. The LIFO pairing means a
    /// lower-then-restore cycle re-enables exactly the claims it demoted,
    /// in reverse order.
    fn reconcile_loadable(&mut self, owner: &OwnerId, claim_type: ClaimType) {
        let limit = self.ledger.limit(owner, claim_type) as usize;
        let indices: Vec<usize> = self
            .claims
            .iter()
            .enumerate()
            .filter(|(_, claim)| &claim.owner == owner && claim.claim_type == claim_type)
            .map(|(index, _)| index)
            .collect();

        let mut loadable = indices
            .iter()
            .filter(|&&index| self.claims[index].loadable)
            .count();

        for &index in indices.iter().rev() {
            if loadable <= limit {
                break;
            }
            if self.claims[index].loadable {
                self.claims[index].loadable = false;
                loadable -= 1;
                tracing::debug!(
                    "Demoted claim {} for {}: {} usage above limit {}",
                    self.claims[index].id,
                    owner,
                    claim_type,
                    limit
                );
            }
        }

        for &index in &indices {
            if loadable >= limit {
                break;
            }
            if !self.claims[index].loadable {
                self.claims[index].loadable = true;
                loadable += 1;
                tracing::debug!(
                    "Restored claim {} for {} within {} limit {}",
                    self.claims[index].id,
                    owner,
                    claim_type,
                    limit
                );
            }
        }
    }
}

//! Storage backends for Holdfast
//!
//! Pluggable persistence providers behind one contract: load everything,
//! persist everything, all-or-nothing.

pub mod flatfile;
pub mod registry;
pub mod sqlite;

pub use flatfile::FlatFileBackend;
pub use registry::{BackendConstructor, StorageRegistry};
pub use sqlite::SqliteBackend;

use crate::claim::ClaimRecord;
use crate::error::{HoldError, Result};
use crate::ledger::LedgerEntry;
use async_trait::async_trait;
use std::collections::HashSet;

/// Everything a backend holds: the full claim set plus the quota ledger
/// rows, in persisted order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageSnapshot {
    pub claims: Vec<ClaimRecord>,
    pub ledger: Vec<LedgerEntry>,
}

/// Persistence provider contract.
///
/// Backends swap freely: equivalent input must produce equivalent `load()`
/// results regardless of which variant wrote it.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Registry key identifying this backend.
    fn name(&self) -> &'static str;

    /// Reads all persisted state. Pure read on the backing medium, safe to
    /// repeat.
    async fn load(&self) -> Result<StorageSnapshot>;

    /// Replaces the persisted state. A `load()` after an interrupted
    /// persist must observe either the old snapshot or the new one, never
    /// a partially-written mix.
    async fn persist(&self, claims: &[ClaimRecord], ledger: &[LedgerEntry]) -> Result<()>;
}

/// Rejects snapshots violating the id uniqueness invariant.
pub(crate) fn check_unique_ids(claims: &[ClaimRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(claims.len());
    for claim in claims {
        if !seen.insert(claim.id.as_str()) {
            return Err(HoldError::StorageCorrupt(format!(
                "duplicate claim id: {}",
                claim.id
            )));
        }
    }
    Ok(())
}

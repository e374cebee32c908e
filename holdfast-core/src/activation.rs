use crate::claim::ClaimRecord;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Host-owned forced-activation subsystem, injected into the
/// reconciliation controller so tests can substitute a fake.
///
/// Both calls are idempotent on the host side: adding an already-active
/// claim or removing an inactive one is a no-op, not an error.
#[async_trait]
pub trait ChunkActivator: Send + Sync {
    async fn add_claim(&self, claim: &ClaimRecord) -> Result<()>;
    async fn remove_claim(&self, claim: &ClaimRecord) -> Result<()>;
}

/// Supplies the set of worlds that currently exist. Consulted only by the
/// purge operation.
#[async_trait]
pub trait WorldCatalog: Send + Sync {
    async fn existing_world_ids(&self) -> Result<HashSet<String>>;
}

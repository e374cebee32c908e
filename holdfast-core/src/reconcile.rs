use crate::activation::ChunkActivator;
use crate::balance::BalancingEngine;
use crate::claim::ClaimRecord;
use crate::error::{HoldError, Result};
use crate::ledger::{QuotaDefaults, QuotaLedger};
use crate::storage::StorageBackend;
use std::sync::Arc;

/// Startup/shutdown progression. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Activated,
    Deactivated,
}

/// Drives the startup load/activation handoff and the shutdown
/// deactivation/persistence sequence against the host's activation
/// subsystem.
///
/// Between `activate` and `shutdown` all mutations stay in memory; the
/// shutdown persist is the sole post-startup write to storage. Mutations
/// after the last successful persist are lost on an unclean termination.
pub struct ReconcileController {
    backend: Arc<dyn StorageBackend>,
    activator: Arc<dyn ChunkActivator>,
    server_name: String,
    defaults: QuotaDefaults,
    state: LifecycleState,
    engine: Option<BalancingEngine>,
    activated_ids: Vec<String>,
}

impl ReconcileController {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        activator: Arc<dyn ChunkActivator>,
        server_name: impl Into<String>,
        defaults: QuotaDefaults,
    ) -> Self {
        Self {
            backend,
            activator,
            server_name: server_name.into(),
            defaults,
            state: LifecycleState::Unloaded,
            engine: None,
            activated_ids: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn engine(&self) -> Result<&BalancingEngine> {
        self.engine
            .as_ref()
            .ok_or_else(|| HoldError::Lifecycle("claims are not loaded yet".to_string()))
    }

    pub fn engine_mut(&mut self) -> Result<&mut BalancingEngine> {
        self.engine
            .as_mut()
            .ok_or_else(|| HoldError::Lifecycle("claims are not loaded yet".to_string()))
    }

    /// Loads all persisted state and rebuilds the quota ledger. Loaded
    /// claim counts are authoritative: a persisted ledger whose usage
    /// disagrees is re-derived in place. Storage failures propagate and
    /// the caller must treat them as fatal to startup.
    pub async fn load(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::Unloaded, "load")?;

        let snapshot = self.backend.load().await?;

        let mut ledger = QuotaLedger::new(self.defaults.clone());
        ledger.apply_entries(&snapshot.ledger);
        let corrected = ledger.rebuild_usage(&snapshot.claims);
        if corrected && !snapshot.ledger.is_empty() {
            tracing::warn!(
                "Persisted ledger disagreed with loaded claims; usage re-derived from claim counts"
            );
        }

        tracing::info!(
            "Loaded {} claims and {} ledger entries from {} storage",
            snapshot.claims.len(),
            snapshot.ledger.len(),
            self.backend.name()
        );

        self.engine = Some(BalancingEngine::from_snapshot(snapshot.claims, ledger));
        self.state = LifecycleState::Loaded;
        Ok(())
    }

    /// Hands every loadable claim belonging to this server instance to the
    /// activation subsystem. Claims of other instances, and claims demoted
    /// below quota, stay dormant. One claim failing to activate never
    /// blocks the rest; it is skipped and logged. Returns the number
    /// activated.
    pub async fn activate(&mut self) -> Result<usize> {
        self.expect_state(LifecycleState::Loaded, "activate")?;

        let eligible: Vec<ClaimRecord> = self
            .engine()?
            .claims()
            .iter()
            .filter(|claim| claim.loadable && claim.server_name == self.server_name)
            .cloned()
            .collect();
        let total = self.engine()?.claims().len();

        let mut activated = 0;
        for claim in eligible {
            match self.activator.add_claim(&claim).await {
                Ok(()) => {
                    self.activated_ids.push(claim.id.clone());
                    activated += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        "Skipping claim {} at {} {}: {}",
                        claim.id,
                        claim.world_id,
                        claim.position,
                        error
                    );
                }
            }
        }

        tracing::info!(
            "Activated {} of {} claims for server '{}'",
            activated,
            total,
            self.server_name
        );
        self.state = LifecycleState::Activated;
        Ok(activated)
    }

    /// Withdraws every activated claim from the activation subsystem,
    /// then persists the in-memory claim set and ledger in bulk.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::Activated, "shutdown")?;

        let engine = self.engine()?;
        for id in &self.activated_ids {
            // claims removed mid-session are already gone from the engine;
            // removal on the host side is idempotent either way
            let Some(claim) = engine.claims().iter().find(|claim| &claim.id == id) else {
                continue;
            };
            if let Err(error) = self.activator.remove_claim(claim).await {
                tracing::warn!("Failed to deactivate claim {}: {}", id, error);
            }
        }

        let engine = self.engine()?;
        self.backend
            .persist(engine.claims(), &engine.ledger_entries())
            .await?;

        self.activated_ids.clear();
        self.state = LifecycleState::Deactivated;
        tracing::info!("Shutdown reconciliation complete; state persisted");
        Ok(())
    }

    fn expect_state(&self, expected: LifecycleState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(HoldError::Lifecycle(format!(
                "cannot {} from {:?} state",
                operation, self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceChange;
    use crate::claim::{ChunkPos, ClaimType, OwnerId};
    use crate::storage::FlatFileBackend;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records activation traffic; claims listed in `reject` fail to add.
    #[derive(Default)]
    struct FakeActivator {
        added: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
        reject: HashSet<String>,
    }

    #[async_trait]
    impl ChunkActivator for FakeActivator {
        async fn add_claim(&self, claim: &ClaimRecord) -> Result<()> {
            if self.reject.contains(&claim.id) {
                return Err(HoldError::Activation("host refused claim".to_string()));
            }
            self.added.lock().unwrap().push(claim.id.clone());
            Ok(())
        }

        async fn remove_claim(&self, claim: &ClaimRecord) -> Result<()> {
            self.removed.lock().unwrap().push(claim.id.clone());
            Ok(())
        }
    }

    fn defaults() -> QuotaDefaults {
        QuotaDefaults {
            player: 4,
            always_on: 4,
            admin: 8,
        }
    }

    fn controller_with(
        backend: Arc<dyn StorageBackend>,
        activator: Arc<FakeActivator>,
    ) -> ReconcileController {
        ReconcileController::new(backend, activator, "main", defaults())
    }

    async fn seed_store(path: &std::path::Path) -> Vec<String> {
        let backend = Arc::new(FlatFileBackend::new(path));
        let activator = Arc::new(FakeActivator::default());
        let mut controller = controller_with(backend.clone(), activator);
        controller.load().await.unwrap();

        let engine = controller.engine_mut().unwrap();
        let ours = engine
            .create_claim(
                OwnerId::new("p1"),
                "main",
                "overworld",
                ChunkPos { x: 0, z: 0 },
                ClaimType::AlwaysOn,
            )
            .unwrap();
        let foreign = engine
            .create_claim(
                OwnerId::new("p1"),
                "other-server",
                "overworld",
                ChunkPos { x: 1, z: 0 },
                ClaimType::AlwaysOn,
            )
            .unwrap();
        let dormant = engine
            .create_claim(
                OwnerId::new("p2"),
                "main",
                "overworld",
                ChunkPos { x: 2, z: 0 },
                ClaimType::AlwaysOn,
            )
            .unwrap();
        engine.change_balance(&OwnerId::new("p2"), ClaimType::AlwaysOn, BalanceChange::Set(0));

        controller.activate().await.unwrap();
        controller.shutdown().await.unwrap();
        vec![ours.id, foreign.id, dormant.id]
    }

    #[tokio::test]
    async fn test_activation_respects_partition_and_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");
        let ids = seed_store(&path).await;

        let activator = Arc::new(FakeActivator::default());
        let mut controller =
            controller_with(Arc::new(FlatFileBackend::new(&path)), activator.clone());
        controller.load().await.unwrap();
        let activated = controller.activate().await.unwrap();

        assert_eq!(activated, 1);
        assert_eq!(*activator.added.lock().unwrap(), vec![ids[0].clone()]);
    }

    #[tokio::test]
    async fn test_one_bad_claim_does_not_block_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");

        let backend = Arc::new(FlatFileBackend::new(&path));
        let seed = Arc::new(FakeActivator::default());
        let mut controller = controller_with(backend, seed);
        controller.load().await.unwrap();
        let engine = controller.engine_mut().unwrap();
        let bad = engine
            .create_claim(
                OwnerId::new("p1"),
                "main",
                "overworld",
                ChunkPos { x: 0, z: 0 },
                ClaimType::AlwaysOn,
            )
            .unwrap();
        let good = engine
            .create_claim(
                OwnerId::new("p1"),
                "main",
                "overworld",
                ChunkPos { x: 1, z: 0 },
                ClaimType::AlwaysOn,
            )
            .unwrap();
        controller.activate().await.unwrap();
        controller.shutdown().await.unwrap();

        let activator = Arc::new(FakeActivator {
            reject: HashSet::from([bad.id.clone()]),
            ..Default::default()
        });
        let mut controller =
            controller_with(Arc::new(FlatFileBackend::new(&path)), activator.clone());
        controller.load().await.unwrap();
        let activated = controller.activate().await.unwrap();

        assert_eq!(activated, 1);
        assert_eq!(*activator.added.lock().unwrap(), vec![good.id]);
    }

    #[tokio::test]
    async fn test_shutdown_deactivates_and_persists_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");

        let activator = Arc::new(FakeActivator::default());
        let mut controller =
            controller_with(Arc::new(FlatFileBackend::new(&path)), activator.clone());
        controller.load().await.unwrap();

        let claim = controller
            .engine_mut()
            .unwrap()
            .create_claim(
                OwnerId::new("p1"),
                "main",
                "overworld",
                ChunkPos { x: 0, z: 0 },
                ClaimType::Player,
            )
            .unwrap();

        controller.activate().await.unwrap();
        controller.shutdown().await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Deactivated);
        assert_eq!(*activator.removed.lock().unwrap(), vec![claim.id.clone()]);

        // a fresh process sees the mutation
        let mut next = controller_with(
            Arc::new(FlatFileBackend::new(&path)),
            Arc::new(FakeActivator::default()),
        );
        next.load().await.unwrap();
        assert_eq!(next.engine().unwrap().claims().to_vec(), vec![claim]);
    }

    #[tokio::test]
    async fn test_stale_persisted_ledger_is_rederived() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");
        seed_store(&path).await;

        // sabotage the persisted usage counters out-of-band
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut document: serde_json::Value = serde_json::from_str(&raw).unwrap();
        document["ledger"][0]["usage"] = serde_json::json!(40);
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        let mut controller = controller_with(
            Arc::new(FlatFileBackend::new(&path)),
            Arc::new(FakeActivator::default()),
        );
        controller.load().await.unwrap();

        let engine = controller.engine().unwrap();
        let standings = engine.summarize(&OwnerId::new("p1"));
        let always_on = standings
            .iter()
            .find(|entry| entry.claim_type == ClaimType::AlwaysOn)
            .unwrap();
        assert_eq!(always_on.usage, 2);
    }

    #[tokio::test]
    async fn test_transitions_enforce_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller_with(
            Arc::new(FlatFileBackend::new(dir.path().join("claims.json"))),
            Arc::new(FakeActivator::default()),
        );

        assert!(matches!(
            controller.activate().await.unwrap_err(),
            HoldError::Lifecycle(_)
        ));
        assert!(matches!(
            controller.shutdown().await.unwrap_err(),
            HoldError::Lifecycle(_)
        ));

        controller.load().await.unwrap();
        assert!(matches!(
            controller.load().await.unwrap_err(),
            HoldError::Lifecycle(_)
        ));
    }
}

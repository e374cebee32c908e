use super::{StorageBackend, StorageSnapshot, check_unique_ids};
use crate::claim::ClaimRecord;
use crate::error::{HoldError, Result};
use crate::ledger::LedgerEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const GENERATION_UNLOADED: u64 = u64::MAX;

/// Snapshot document as written to disk. The generation counter detects
/// concurrent external writers between our load and persist.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    generation: u64,
    claims: Vec<ClaimRecord>,
    ledger: Vec<LedgerEntry>,
}

/// Default backend: the whole store in one JSON snapshot file, no external
/// dependency.
#[derive(Debug)]
pub struct FlatFileBackend {
    path: PathBuf,
    loaded_generation: AtomicU64,
}

impl FlatFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded_generation: AtomicU64::new(GENERATION_UNLOADED),
        }
    }

    async fn read_document(&self) -> Result<Option<SnapshotDocument>> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let document = serde_json::from_slice(&bytes).map_err(|error| {
                    HoldError::StorageCorrupt(format!(
                        "invalid snapshot at {}: {}",
                        self.path.display(),
                        error
                    ))
                })?;
                Ok(Some(document))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(HoldError::StorageUnavailable(format!(
                "failed to read {}: {}",
                self.path.display(),
                error
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for FlatFileBackend {
    fn name(&self) -> &'static str {
        "flatfile"
    }

    async fn load(&self) -> Result<StorageSnapshot> {
        let Some(document) = self.read_document().await? else {
            self.loaded_generation.store(0, Ordering::SeqCst);
            return Ok(StorageSnapshot::default());
        };

        check_unique_ids(&document.claims)?;
        self.loaded_generation
            .store(document.generation, Ordering::SeqCst);

        Ok(StorageSnapshot {
            claims: document.claims,
            ledger: document.ledger,
        })
    }

    async fn persist(&self, claims: &[ClaimRecord], ledger: &[LedgerEntry]) -> Result<()> {
        let current = self
            .read_document()
            .await?
            .map(|document| document.generation)
            .unwrap_or(0);

        // Conflict detection only has a baseline once this instance loaded.
        let expected = self.loaded_generation.load(Ordering::SeqCst);
        if expected != GENERATION_UNLOADED && current != expected {
            return Err(HoldError::StorageWriteConflict(format!(
                "snapshot generation moved from {} to {} since load",
                expected, current
            )));
        }

        let document = SnapshotDocument {
            generation: current + 1,
            claims: claims.to_vec(),
            ledger: ledger.to_vec(),
        };
        let payload = serde_json::to_vec_pretty(&document)
            .map_err(|error| HoldError::Internal(format!("failed to encode snapshot: {}", error)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|error| {
                HoldError::StorageUnavailable(format!(
                    "failed to create {}: {}",
                    parent.display(),
                    error
                ))
            })?;
        }

        // Write to temporary file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        let unavailable = |error: std::io::Error| {
            HoldError::StorageUnavailable(format!(
                "failed to write {}: {}",
                self.path.display(),
                error
            ))
        };
        let mut file = fs::File::create(&temp_path).await.map_err(unavailable)?;
        file.write_all(&payload).await.map_err(unavailable)?;
        file.sync_all().await.map_err(unavailable)?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(unavailable)?;

        self.loaded_generation
            .store(document.generation, Ordering::SeqCst);
        tracing::debug!(
            "Persisted {} claims and {} ledger entries to {}",
            claims.len(),
            ledger.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{ChunkPos, ClaimType, OwnerId};
    use chrono::Utc;

    fn sample_claim(id: &str, world_id: &str) -> ClaimRecord {
        ClaimRecord {
            id: id.to_string(),
            owner: OwnerId::new("p1"),
            server_name: "main".to_string(),
            world_id: world_id.to_string(),
            position: ChunkPos { x: 3, z: -7 },
            claim_type: ClaimType::AlwaysOn,
            loadable: true,
            created_at: Utc::now(),
        }
    }

    fn sample_ledger() -> Vec<LedgerEntry> {
        vec![LedgerEntry {
            owner: OwnerId::new("p1"),
            claim_type: ClaimType::AlwaysOn,
            usage: 2,
            limit: 2,
        }]
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FlatFileBackend::new(dir.path().join("claims.json"));

        let snapshot = backend.load().await.unwrap();
        assert!(snapshot.claims.is_empty());
        assert!(snapshot.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");
        let backend = FlatFileBackend::new(&path);

        let claims = vec![sample_claim("a", "overworld"), sample_claim("b", "nether")];
        let ledger = sample_ledger();

        backend.load().await.unwrap();
        backend.persist(&claims, &ledger).await.unwrap();

        let reloaded = FlatFileBackend::new(&path).load().await.unwrap();
        assert_eq!(reloaded.claims, claims);
        assert_eq!(reloaded.ledger, ledger);
    }

    #[tokio::test]
    async fn test_duplicate_ids_surface_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");

        let document = SnapshotDocument {
            generation: 1,
            claims: vec![sample_claim("dup", "overworld"), sample_claim("dup", "nether")],
            ledger: Vec::new(),
        };
        std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

        let error = FlatFileBackend::new(&path).load().await.unwrap_err();
        assert!(matches!(error, HoldError::StorageCorrupt(_)));
    }

    #[tokio::test]
    async fn test_garbage_file_surfaces_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");
        std::fs::write(&path, b"not json").unwrap();

        let error = FlatFileBackend::new(&path).load().await.unwrap_err();
        assert!(matches!(error, HoldError::StorageCorrupt(_)));
    }

    #[tokio::test]
    async fn test_concurrent_writer_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");

        let ours = FlatFileBackend::new(&path);
        let theirs = FlatFileBackend::new(&path);
        ours.load().await.unwrap();
        theirs.load().await.unwrap();

        theirs.persist(&[sample_claim("a", "overworld")], &[]).await.unwrap();

        let error = ours
            .persist(&[sample_claim("b", "overworld")], &[])
            .await
            .unwrap_err();
        assert!(matches!(error, HoldError::StorageWriteConflict(_)));
    }
}

use super::{StorageBackend, StorageSnapshot, check_unique_ids};
use crate::claim::{ChunkPos, ClaimRecord, ClaimType, OwnerId};
use crate::error::{HoldError, Result};
use crate::ledger::LedgerEntry;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const GENERATION_UNLOADED: u64 = u64::MAX;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Relational backend on SQLite. Claims and ledger rows live in their own
/// tables; a generation counter in `store_meta` detects concurrent
/// external writers.
#[derive(Debug)]
pub struct SqliteBackend {
    db_path: PathBuf,
    busy_timeout: Duration,
    loaded_generation: AtomicU64,
}

impl SqliteBackend {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            loaded_generation: AtomicU64::new(GENERATION_UNLOADED),
        }
    }

    /// Bounds how long a locked database may stall us before the call
    /// fails with `StorageUnavailable`.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    fn open_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(|error| {
            HoldError::StorageUnavailable(format!(
                "failed to open {}: {}",
                self.db_path.display(),
                error
            ))
        })?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|error| HoldError::StorageUnavailable(error.to_string()))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS claims (
                seq INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                owner TEXT NOT NULL,
                server_name TEXT NOT NULL,
                world_id TEXT NOT NULL,
                pos_x INTEGER NOT NULL,
                pos_z INTEGER NOT NULL,
                claim_type TEXT NOT NULL,
                loadable INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (owner, world_id, pos_x, pos_z, claim_type)
            )",
            [],
        )
        .map_err(sql_unavailable)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger (
                owner TEXT NOT NULL,
                claim_type TEXT NOT NULL,
                usage INTEGER NOT NULL,
                quota_limit INTEGER NOT NULL,
                PRIMARY KEY (owner, claim_type)
            )",
            [],
        )
        .map_err(sql_unavailable)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(sql_unavailable)?;

        Ok(())
    }

    fn schema_present(conn: &Connection) -> Result<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'claims'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_unavailable)?;
        Ok(found.is_some())
    }

    fn read_generation(conn: &Connection) -> Result<u64> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'generation'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_unavailable)?;

        match value {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                HoldError::StorageCorrupt(format!("invalid generation counter: {}", raw))
            }),
            None => Ok(0),
        }
    }

    fn load_claims(conn: &Connection) -> Result<Vec<ClaimRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, owner, server_name, world_id, pos_x, pos_z, claim_type, loadable,
                        created_at
                 FROM claims ORDER BY seq",
            )
            .map_err(sql_unavailable)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .map_err(sql_unavailable)?;

        let mut claims = Vec::new();
        for row in rows {
            let (id, owner, server_name, world_id, pos_x, pos_z, claim_type, loadable, created_at) =
                row.map_err(sql_unavailable)?;

            let claim_type = claim_type.parse::<ClaimType>().map_err(|error| {
                HoldError::StorageCorrupt(format!("claim {}: {}", id, error))
            })?;
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                .map_err(|error| {
                    HoldError::StorageCorrupt(format!("claim {}: invalid created_at: {}", id, error))
                })?
                .with_timezone(&Utc);

            claims.push(ClaimRecord {
                id,
                owner: OwnerId::new(owner),
                server_name,
                world_id,
                position: ChunkPos {
                    x: pos_x as i32,
                    z: pos_z as i32,
                },
                claim_type,
                loadable: loadable != 0,
                created_at,
            });
        }
        Ok(claims)
    }

    fn load_ledger(conn: &Connection) -> Result<Vec<LedgerEntry>> {
        let mut stmt = conn
            .prepare("SELECT owner, claim_type, usage, quota_limit FROM ledger ORDER BY owner, claim_type")
            .map_err(sql_unavailable)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(sql_unavailable)?;

        let mut entries = Vec::new();
        for row in rows {
            let (owner, claim_type, usage, limit) = row.map_err(sql_unavailable)?;
            let claim_type = claim_type.parse::<ClaimType>().map_err(|error| {
                HoldError::StorageCorrupt(format!("ledger row for {}: {}", owner, error))
            })?;
            entries.push(LedgerEntry {
                owner: OwnerId::new(owner),
                claim_type,
                usage: usage as u32,
                limit: limit as u32,
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self) -> Result<StorageSnapshot> {
        // A store nobody has written yet loads as empty without touching
        // the medium.
        if !self.db_path.exists() {
            self.loaded_generation.store(0, Ordering::SeqCst);
            return Ok(StorageSnapshot::default());
        }

        let conn = self.open_conn()?;
        if !Self::schema_present(&conn)? {
            self.loaded_generation.store(0, Ordering::SeqCst);
            return Ok(StorageSnapshot::default());
        }

        let generation = Self::read_generation(&conn)?;
        let claims = Self::load_claims(&conn)?;
        let ledger = Self::load_ledger(&conn)?;
        check_unique_ids(&claims)?;

        self.loaded_generation.store(generation, Ordering::SeqCst);
        Ok(StorageSnapshot { claims, ledger })
    }

    async fn persist(&self, claims: &[ClaimRecord], ledger: &[LedgerEntry]) -> Result<()> {
        let mut conn = self.open_conn()?;
        Self::init_schema(&conn)?;

        let tx = conn.transaction().map_err(sql_unavailable)?;

        let current = Self::read_generation(&tx)?;
        let expected = self.loaded_generation.load(Ordering::SeqCst);
        if expected != GENERATION_UNLOADED && current != expected {
            return Err(HoldError::StorageWriteConflict(format!(
                "store generation moved from {} to {} since load",
                expected, current
            )));
        }
        let next = current + 1;

        tx.execute("DELETE FROM claims", []).map_err(sql_unavailable)?;
        tx.execute("DELETE FROM ledger", []).map_err(sql_unavailable)?;

        for (seq, claim) in claims.iter().enumerate() {
            tx.execute(
                "INSERT INTO claims (
                    seq, id, owner, server_name, world_id, pos_x, pos_z, claim_type, loadable,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    seq as i64,
                    claim.id,
                    claim.owner.as_str(),
                    claim.server_name,
                    claim.world_id,
                    claim.position.x as i64,
                    claim.position.z as i64,
                    claim.claim_type.as_str(),
                    claim.loadable as i64,
                    claim.created_at.to_rfc3339(),
                ],
            )
            .map_err(sql_unavailable)?;
        }

        for entry in ledger {
            tx.execute(
                "INSERT INTO ledger (owner, claim_type, usage, quota_limit)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.owner.as_str(),
                    entry.claim_type.as_str(),
                    entry.usage as i64,
                    entry.limit as i64,
                ],
            )
            .map_err(sql_unavailable)?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO store_meta (key, value) VALUES ('generation', ?1)",
            params![next.to_string()],
        )
        .map_err(sql_unavailable)?;

        tx.commit().map_err(sql_unavailable)?;
        self.loaded_generation.store(next, Ordering::SeqCst);

        tracing::debug!(
            "Persisted {} claims and {} ledger entries to {}",
            claims.len(),
            ledger.len(),
            self.db_path.display()
        );
        Ok(())
    }
}

fn sql_unavailable(error: rusqlite::Error) -> HoldError {
    HoldError::StorageUnavailable(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FlatFileBackend;
    use chrono::{DateTime, Utc};

    fn sample_claim(id: &str, owner: &str, x: i32) -> ClaimRecord {
        ClaimRecord {
            id: id.to_string(),
            owner: OwnerId::new(owner),
            server_name: "main".to_string(),
            world_id: "overworld".to_string(),
            position: ChunkPos { x, z: 12 },
            claim_type: ClaimType::Player,
            loadable: true,
            created_at: "2026-08-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        }
    }

    fn sample_ledger() -> Vec<LedgerEntry> {
        vec![LedgerEntry {
            owner: OwnerId::new("p1"),
            claim_type: ClaimType::Player,
            usage: 2,
            limit: 4,
        }]
    }

    #[tokio::test]
    async fn test_missing_database_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("claims.db"));

        let snapshot = backend.load().await.unwrap();
        assert_eq!(snapshot, StorageSnapshot::default());
    }

    #[tokio::test]
    async fn test_persist_then_load_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");
        let backend = SqliteBackend::new(&path);

        let claims = vec![
            sample_claim("b", "p1", 0),
            sample_claim("a", "p1", 1),
            sample_claim("c", "p2", 2),
        ];
        let ledger = sample_ledger();

        backend.load().await.unwrap();
        backend.persist(&claims, &ledger).await.unwrap();

        let reloaded = SqliteBackend::new(&path).load().await.unwrap();
        assert_eq!(reloaded.claims, claims);
        assert_eq!(reloaded.ledger, ledger);
    }

    #[tokio::test]
    async fn test_concurrent_writer_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");

        let ours = SqliteBackend::new(&path);
        let theirs = SqliteBackend::new(&path);
        ours.load().await.unwrap();
        theirs.load().await.unwrap();

        theirs.persist(&[sample_claim("a", "p1", 0)], &[]).await.unwrap();

        let error = ours
            .persist(&[sample_claim("b", "p1", 1)], &[])
            .await
            .unwrap_err();
        assert!(matches!(error, HoldError::StorageWriteConflict(_)));
    }

    #[tokio::test]
    async fn test_backends_load_equivalent_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let claims = vec![sample_claim("a", "p1", 0), sample_claim("b", "p2", 1)];
        let ledger = sample_ledger();

        let sqlite = SqliteBackend::new(dir.path().join("claims.db"));
        sqlite.load().await.unwrap();
        sqlite.persist(&claims, &ledger).await.unwrap();

        let flatfile = FlatFileBackend::new(dir.path().join("claims.json"));
        flatfile.load().await.unwrap();
        flatfile.persist(&claims, &ledger).await.unwrap();

        assert_eq!(
            sqlite.load().await.unwrap(),
            flatfile.load().await.unwrap()
        );
    }
}

//! Persistence boundary for the ERNE engine.
//!
//! The engine hands opaque blobs to a [`PersistenceGateway`] keyed by a
//! caller-chosen slot name, and (optionally) writes every stored experience
//! through to an append-only log. Blobs must round-trip byte-for-byte; the
//! gateway never interprets them.
//!
//! Two backends ship with the crate:
//! - [`SqliteSlotStore`]: one SQLite file, WAL mode, CRC-32 checksums and
//!   online backup.
//! - [`MemorySlotStore`]: a `HashMap`, for tests and hosts that persist
//!   elsewhere.
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS save_slots (
//!     slot       TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! CREATE TABLE IF NOT EXISTS experience_log (
//!     id         TEXT PRIMARY KEY,
//!     created_at TEXT NOT NULL,
//!     data       BLOB NOT NULL
//! );
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attention::Attention;
use crate::config::{PersistenceConfig, SnapshotFormat};
use crate::curiosity::CuriosityState;
use crate::error::{ErneError, Result};
use crate::exploration::ExplorationTarget;
use crate::memory::{Experience, SemanticMemory};
use crate::novelty::NoveltyEntry;
use crate::types::{EngineStats, ExperienceId, Timestamp};

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

/// Storage behind the engine's save/load operations.
///
/// Implementations must be callable from any thread. Failures are reported
/// as errors; the engine logs them and carries on.
pub trait PersistenceGateway: Send + Sync + Debug {
    /// Store `blob` under `slot`, replacing any previous value.
    ///
    /// # Errors
    /// Backend-specific write failure.
    fn save_slot(&self, slot: &str, blob: &[u8]) -> Result<()>;

    /// Blob stored under `slot`, or `None` if the slot is unknown.
    ///
    /// # Errors
    /// Backend-specific read failure.
    fn load_slot(&self, slot: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a slot. Returns whether it existed.
    ///
    /// # Errors
    /// Backend-specific write failure.
    fn delete_slot(&self, slot: &str) -> Result<bool>;

    /// Names of all stored slots, sorted.
    ///
    /// # Errors
    /// Backend-specific read failure.
    fn list_slots(&self) -> Result<Vec<String>>;

    /// Append (or overwrite) one experience in the write-through log.
    ///
    /// # Errors
    /// Backend-specific write failure.
    fn append_experience(&self, experience: &Experience) -> Result<()>;

    /// Drop experiences from the log. Returns how many were removed.
    ///
    /// # Errors
    /// Backend-specific write failure.
    fn remove_experiences(&self, ids: &[ExperienceId]) -> Result<usize>;

    /// Every logged experience, oldest first.
    ///
    /// # Errors
    /// Backend-specific read failure.
    fn load_experience_log(&self) -> Result<Vec<Experience>>;
}

// ---------------------------------------------------------------------------
// Snapshot payload
// ---------------------------------------------------------------------------

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything a save slot holds.
///
/// When the snapshot is not `full` only `statistics` (and the bookkeeping
/// fields) are populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Layout version.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: Timestamp,
    /// Whether the state lists below are populated.
    pub full: bool,
    /// Engine statistics at save time.
    pub statistics: EngineStats,
    /// Stored experiences, oldest first.
    pub experiences: Vec<Experience>,
    /// Semantic memories.
    pub semantic: Vec<SemanticMemory>,
    /// Novelty buckets, least recently encountered first.
    pub novelty: Vec<NoveltyEntry>,
    /// Exploration targets.
    pub exploration: Vec<ExplorationTarget>,
    /// Curiosity estimator state.
    pub curiosity: CuriosityState,
    /// Rolling attention history.
    pub attention_history: Vec<Attention>,
    /// Last decay pass.
    pub last_decay: Option<Timestamp>,
    /// Last consolidation pass.
    pub last_consolidation: Option<Timestamp>,
}

/// Encode a snapshot in `format`.
///
/// # Errors
/// Returns `ErneError::Serialization` if encoding fails.
pub fn encode_snapshot(snapshot: &EngineSnapshot, format: SnapshotFormat) -> Result<Vec<u8>> {
    let ser = |e: &dyn std::fmt::Display| ErneError::Serialization(e.to_string());
    match format {
        SnapshotFormat::Json => serde_json::to_vec(snapshot).map_err(|e| ser(&e)),
        SnapshotFormat::Bincode => bincode::serialize(snapshot).map_err(|e| ser(&e)),
        SnapshotFormat::Msgpack => rmp_serde::to_vec_named(snapshot).map_err(|e| ser(&e)),
    }
}

/// Decode a snapshot written with `format`.
///
/// # Errors
/// Returns `ErneError::Serialization` if the blob is not a valid snapshot.
pub fn decode_snapshot(blob: &[u8], format: SnapshotFormat) -> Result<EngineSnapshot> {
    let ser = |e: &dyn std::fmt::Display| ErneError::Serialization(e.to_string());
    let snapshot: EngineSnapshot = match format {
        SnapshotFormat::Json => serde_json::from_slice(blob).map_err(|e| ser(&e))?,
        SnapshotFormat::Bincode => bincode::deserialize(blob).map_err(|e| ser(&e))?,
        SnapshotFormat::Msgpack => rmp_serde::from_slice(blob).map_err(|e| ser(&e))?,
    };
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(ErneError::Serialization(format!(
            "snapshot version {} is newer than supported version {SNAPSHOT_VERSION}",
            snapshot.version
        )));
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309 / ITU-T V.42) of `data` as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// SqliteSlotStore
// ---------------------------------------------------------------------------

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS save_slots (
        slot       TEXT PRIMARY KEY,
        data       BLOB NOT NULL,
        updated_at TEXT NOT NULL,
        checksum   TEXT
    );
    CREATE TABLE IF NOT EXISTS experience_log (
        id         TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        data       BLOB NOT NULL
    );";

/// SQLite-backed gateway.
///
/// ```no_run
/// # use erne_core::persistence::{PersistenceGateway, SqliteSlotStore};
/// # use erne_core::config::PersistenceConfig;
/// let store = SqliteSlotStore::open("agent.db", &PersistenceConfig::default())?;
/// store.save_slot("autosave", b"...")?;
/// assert!(store.load_slot("autosave")?.is_some());
/// # Ok::<(), erne_core::error::ErneError>(())
/// ```
pub struct SqliteSlotStore {
    conn: Mutex<Connection>,
    checksum_enabled: bool,
    db_path: PathBuf,
}

impl Debug for SqliteSlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSlotStore")
            .field("db_path", &self.db_path)
            .field("checksum_enabled", &self.checksum_enabled)
            .finish_non_exhaustive()
    }
}

impl SqliteSlotStore {
    /// Open (or create) a database at `path` and ensure the schema exists.
    ///
    /// # Errors
    /// Returns [`ErneError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "ERNE slot store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            checksum_enabled: config.checksum_enabled,
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns [`ErneError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            checksum_enabled: config.checksum_enabled,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    /// Returns [`ErneError::Persistence`] if `dest_path` is this store's own
    /// file, or [`ErneError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        if dest_path.as_ref() == self.db_path {
            return Err(ErneError::Persistence(format!(
                "backup target {} is the live database",
                self.db_path.display()
            )));
        }
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let conn = self.conn.lock();
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Slot store backup completed"
        );
        Ok(())
    }

    /// `PRAGMA integrity_check` passed.
    ///
    /// # Errors
    /// Returns [`ErneError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Path of the database file (`:memory:` for in-memory stores).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl PersistenceGateway for SqliteSlotStore {
    fn save_slot(&self, slot: &str, blob: &[u8]) -> Result<()> {
        let start = Instant::now();
        let checksum = self.checksum_enabled.then(|| crc32_hex(blob));
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO save_slots (slot, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(slot) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![slot, blob, now, checksum],
        )?;
        debug!(
            slot,
            bytes = blob.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved slot"
        );
        Ok(())
    }

    fn load_slot(&self, slot: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT data, checksum FROM save_slots WHERE slot = ?1")?;
        let row: Option<(Vec<u8>, Option<String>)> = stmt
            .query_row(params![slot], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((data, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    warn!(
                        slot,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch, possible save corruption"
                    );
                }
            }
        }
        debug!(slot, bytes = data.len(), "Loaded slot");
        Ok(Some(data))
    }

    fn delete_slot(&self, slot: &str) -> Result<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM save_slots WHERE slot = ?1", params![slot])?;
        Ok(deleted > 0)
    }

    fn list_slots(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT slot FROM save_slots ORDER BY slot")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut slots = Vec::new();
        for row in rows {
            slots.push(row?);
        }
        Ok(slots)
    }

    fn append_experience(&self, experience: &Experience) -> Result<()> {
        let json =
            serde_json::to_vec(experience).map_err(|e| ErneError::Serialization(e.to_string()))?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO experience_log (id, created_at, data) VALUES (?1, ?2, ?3)",
            params![
                experience.id.to_string(),
                experience.timestamp.to_rfc3339(),
                json
            ],
        )?;
        Ok(())
    }

    fn remove_experiences(&self, ids: &[ExperienceId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM experience_log WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn load_experience_log(&self) -> Result<Vec<Experience>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id, data FROM experience_log ORDER BY created_at, rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut experiences = Vec::new();
        for row in rows {
            let (id, data) = row?;
            match serde_json::from_slice::<Experience>(&data) {
                Ok(experience) => experiences.push(experience),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable log entry"),
            }
        }
        Ok(experiences)
    }
}

/// Extension trait that adds an `.optional()` combinator to `rusqlite::Result`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySlotStore
// ---------------------------------------------------------------------------

/// In-process gateway backed by hash maps.
#[derive(Debug, Default)]
pub struct MemorySlotStore {
    slots: Mutex<HashMap<String, Vec<u8>>>,
    log: Mutex<Vec<Experience>>,
}

impl MemorySlotStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceGateway for MemorySlotStore {
    fn save_slot(&self, slot: &str, blob: &[u8]) -> Result<()> {
        self.slots.lock().insert(slot.to_string(), blob.to_vec());
        Ok(())
    }

    fn load_slot(&self, slot: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.slots.lock().get(slot).cloned())
    }

    fn delete_slot(&self, slot: &str) -> Result<bool> {
        Ok(self.slots.lock().remove(slot).is_some())
    }

    fn list_slots(&self) -> Result<Vec<String>> {
        let mut slots: Vec<String> = self.slots.lock().keys().cloned().collect();
        slots.sort();
        Ok(slots)
    }

    fn append_experience(&self, experience: &Experience) -> Result<()> {
        let mut log = self.log.lock();
        match log.iter_mut().find(|e| e.id == experience.id) {
            Some(existing) => *existing = experience.clone(),
            None => log.push(experience.clone()),
        }
        Ok(())
    }

    fn remove_experiences(&self, ids: &[ExperienceId]) -> Result<usize> {
        let mut log = self.log.lock();
        let before = log.len();
        log.retain(|e| !ids.contains(&e.id));
        Ok(before - log.len())
    }

    fn load_experience_log(&self) -> Result<Vec<Experience>> {
        let mut log = self.log.lock().clone();
        log.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(log)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ExperienceInput, NeuralOutput, SensoryInput};
    use crate::types::Emotion;

    fn experience() -> Experience {
        Experience::from_input(
            ExperienceInput::new(
                SensoryInput {
                    visual: vec![0.1, 0.9],
                    auditory: vec![0.4],
                    ..SensoryInput::default()
                },
                NeuralOutput::with_error(0.3),
                Emotion::new(0.2, 0.6),
                0.4,
            ),
            Utc::now(),
        )
    }

    fn snapshot() -> EngineSnapshot {
        let e = experience();
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            full: true,
            statistics: EngineStats {
                episodic_count: 1,
                ..EngineStats::default()
            },
            experiences: vec![e],
            semantic: Vec::new(),
            novelty: Vec::new(),
            exploration: Vec::new(),
            curiosity: CuriosityState {
                level: 0.3,
                history: vec![0.1, 0.2],
            },
            attention_history: Vec::new(),
            last_decay: None,
            last_consolidation: Some(Utc::now()),
        }
    }

    fn sqlite() -> SqliteSlotStore {
        SqliteSlotStore::open_in_memory(&PersistenceConfig::default()).expect("open")
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(crc32_hex(b"123456789"), "cbf43926");
    }

    #[test]
    fn slot_roundtrip_is_byte_exact() {
        let store = sqlite();
        let blob: Vec<u8> = (0..=255).collect();
        store.save_slot("a", &blob).expect("save");
        assert_eq!(store.load_slot("a").expect("load"), Some(blob));
        assert_eq!(store.load_slot("missing").expect("load"), None);
    }

    #[test]
    fn slot_overwrite_list_delete() {
        let store = sqlite();
        store.save_slot("b", b"one").expect("save");
        store.save_slot("a", b"two").expect("save");
        store.save_slot("b", b"three").expect("save");
        assert_eq!(store.list_slots().expect("list"), vec!["a", "b"]);
        assert_eq!(store.load_slot("b").expect("load").as_deref(), Some(&b"three"[..]));
        assert!(store.delete_slot("b").expect("delete"));
        assert!(!store.delete_slot("b").expect("delete"));
    }

    #[test]
    fn experience_log_append_and_remove() {
        let store = sqlite();
        let a = experience();
        let b = experience();
        store.append_experience(&a).expect("append");
        store.append_experience(&b).expect("append");
        store.append_experience(&a).expect("re-append is an upsert");
        assert_eq!(store.load_experience_log().expect("log").len(), 2);
        assert_eq!(store.remove_experiences(&[a.id]).expect("remove"), 1);
        let log = store.load_experience_log().expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], b);
    }

    #[test]
    fn file_store_survives_reopen_and_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("erne.db");
        let config = PersistenceConfig::default();
        {
            let store = SqliteSlotStore::open(&path, &config).expect("open");
            store.save_slot("autosave", b"state").expect("save");
            assert!(store.integrity_check().expect("check"));
            store.backup(dir.path().join("erne.bak")).expect("backup");
            assert!(matches!(store.backup(&path), Err(ErneError::Persistence(_))));
        }
        let reopened = SqliteSlotStore::open(&path, &config).expect("reopen");
        assert_eq!(
            reopened.load_slot("autosave").expect("load").as_deref(),
            Some(&b"state"[..])
        );
        let backup = SqliteSlotStore::open(dir.path().join("erne.bak"), &config).expect("open backup");
        assert_eq!(backup.list_slots().expect("list"), vec!["autosave"]);
    }

    #[test]
    fn memory_store_matches_contract() {
        let store = MemorySlotStore::new();
        store.save_slot("x", b"1").expect("save");
        assert_eq!(store.load_slot("x").expect("load"), Some(b"1".to_vec()));
        let e = experience();
        store.append_experience(&e).expect("append");
        assert_eq!(store.remove_experiences(&[e.id]).expect("remove"), 1);
        assert!(store.load_experience_log().expect("log").is_empty());
    }

    #[test]
    fn snapshot_formats_roundtrip() {
        let snap = snapshot();
        for format in [SnapshotFormat::Json, SnapshotFormat::Bincode, SnapshotFormat::Msgpack] {
            let blob = encode_snapshot(&snap, format).expect("encode");
            let back = decode_snapshot(&blob, format).expect("decode");
            assert_eq!(back, snap, "{format:?}");
        }
    }

    #[test]
    fn garbage_blob_is_a_serialization_error() {
        assert!(matches!(
            decode_snapshot(b"not a snapshot", SnapshotFormat::Json),
            Err(ErneError::Serialization(_))
        ));
    }
}

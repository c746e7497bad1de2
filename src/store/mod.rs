//! Runner record and blob persistence.
//!
//! The remote store is specified only at its interface boundary: an
//! existence check per bib and an idempotent-safe-to-retry insert. Writes
//! are not deduplicated server-side, so cross-process duplicates remain
//! possible; in-process dedup is the gate's job.

#[cfg(feature = "remote-http")]
pub mod http;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::frame::now_s;
use crate::normalize::BibNumber;

/// One persisted sighting of a confirmed bib.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerRecord {
    pub bib_number: String,
    /// Checkpoint capture time, seconds since the Unix epoch.
    pub cp3_time_s: u64,
    /// Gun time, filled in by downstream timing tooling; always absent at
    /// capture.
    pub guntime_s: Option<u64>,
    /// Reference to the uploaded image (URL or filesystem path).
    pub image_ref: String,
    pub detection_confidence: f32,
    /// SHA-256 of the uploaded JPEG, hex encoded.
    pub image_sha256: String,
    /// Store-side insertion time, seconds since the Unix epoch. Set by the
    /// store on insert; zero in records that have not been persisted.
    #[serde(default)]
    pub recorded_at_s: u64,
}

/// Durable store of runner records.
pub trait RunnerStore: Send {
    /// True when any record for this bib already exists.
    fn exists(&mut self, bib: &BibNumber) -> Result<bool>;

    /// Append a record. Safe to retry; not deduplicated by bib.
    fn insert(&mut self, record: &RunnerRecord) -> Result<()>;
}

/// Blob storage for image artifacts.
pub trait BlobStore: Send {
    /// Upload a local artifact under `key`, returning a public reference.
    fn upload(&mut self, local_path: &Path, key: &str) -> Result<String>;
}

/// Shared-store convenience: lets the pipeline and tests keep a handle on a
/// store that was moved into the worker thread.
impl<S: RunnerStore> RunnerStore for std::sync::Arc<std::sync::Mutex<S>> {
    fn exists(&mut self, bib: &BibNumber) -> Result<bool> {
        self.lock()
            .map_err(|_| anyhow!("runner store lock poisoned"))?
            .exists(bib)
    }

    fn insert(&mut self, record: &RunnerRecord) -> Result<()> {
        self.lock()
            .map_err(|_| anyhow!("runner store lock poisoned"))?
            .insert(record)
    }
}

impl<B: BlobStore> BlobStore for std::sync::Arc<std::sync::Mutex<B>> {
    fn upload(&mut self, local_path: &Path, key: &str) -> Result<String> {
        self.lock()
            .map_err(|_| anyhow!("blob store lock poisoned"))?
            .upload(local_path, key)
    }
}

impl RunnerStore for Box<dyn RunnerStore> {
    fn exists(&mut self, bib: &BibNumber) -> Result<bool> {
        self.as_mut().exists(bib)
    }

    fn insert(&mut self, record: &RunnerRecord) -> Result<()> {
        self.as_mut().insert(record)
    }
}

impl BlobStore for Box<dyn BlobStore> {
    fn upload(&mut self, local_path: &Path, key: &str) -> Result<String> {
        self.as_mut().upload(local_path, key)
    }
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteRunnerStore {
    conn: Connection,
}

impl SqliteRunnerStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open runner store {}", db_path))?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS runners (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              bib_number TEXT NOT NULL,
              cp3_time INTEGER NOT NULL,
              guntime INTEGER,
              image_ref TEXT NOT NULL,
              detection_confidence REAL NOT NULL,
              image_sha256 TEXT NOT NULL,
              recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runners_bib ON runners(bib_number);
            "#,
        )?;
        Ok(())
    }
}

impl RunnerStore for SqliteRunnerStore {
    fn exists(&mut self, bib: &BibNumber) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM runners WHERE bib_number = ?1 LIMIT 1")?;
        let found = stmt.exists(params![bib.to_string()])?;
        Ok(found)
    }

    fn insert(&mut self, record: &RunnerRecord) -> Result<()> {
        let recorded_at = i64::try_from(now_s()?)
            .map_err(|_| anyhow!("recorded_at exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO runners(bib_number, cp3_time, guntime, image_ref,
                                detection_confidence, image_sha256, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.bib_number,
                record.cp3_time_s as i64,
                record.guntime_s.map(|g| g as i64),
                record.image_ref,
                record.detection_confidence as f64,
                record.image_sha256,
                recorded_at,
            ],
        )?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory store (tests)
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryRunnerStore {
    records: HashMap<String, Vec<RunnerRecord>>,
    /// When set, `exists` fails with this message. Lets tests exercise the
    /// gate's behavior under a flaky remote.
    fail_exists: Option<String>,
}

impl InMemoryRunnerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a bib as already recorded (cross-run duplicate).
    pub fn seed(&mut self, bib: &BibNumber) {
        self.records.entry(bib.to_string()).or_default();
    }

    pub fn fail_exists_with(&mut self, message: &str) {
        self.fail_exists = Some(message.to_string());
    }

    pub fn records_for(&self, bib: &BibNumber) -> &[RunnerRecord] {
        self.records
            .get(&bib.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_records(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

impl RunnerStore for InMemoryRunnerStore {
    fn exists(&mut self, bib: &BibNumber) -> Result<bool> {
        if let Some(message) = &self.fail_exists {
            return Err(anyhow!("{}", message));
        }
        Ok(self.records.contains_key(&bib.to_string()))
    }

    fn insert(&mut self, record: &RunnerRecord) -> Result<()> {
        let mut record = record.clone();
        record.recorded_at_s = now_s()?;
        self.records
            .entry(record.bib_number.clone())
            .or_default()
            .push(record);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Filesystem blob store
// ----------------------------------------------------------------------------

/// Stores artifacts under a local archive directory. Useful for offline
/// deployments and tests; the returned reference is the destination path.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create blob archive {}", root.display()))?;
        Ok(Self { root })
    }
}

impl BlobStore for FilesystemBlobStore {
    fn upload(&mut self, local_path: &Path, key: &str) -> Result<String> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create blob directory {}", parent.display()))?;
        }
        std::fs::copy(local_path, &dest).with_context(|| {
            format!(
                "archive artifact {} as {}",
                local_path.display(),
                dest.display()
            )
        })?;
        Ok(dest.display().to_string())
    }
}

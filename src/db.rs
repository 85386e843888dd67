//! # Persistence
//!
//! The engine saves a full [`EngineState`] snapshot after every rating and
//! appends each rating to a log. It only sees the [`StateStore`] contract:
//!
//! - [`SqliteStore`] keeps both in one `SQLite` file. Every write runs in a
//!   transaction, so a concurrent reader never sees a half-written snapshot.
//!   A snapshot that no longer parses is moved to `state_backup` and the
//!   store reports "no state".
//! - [`MemoryStore`] keeps everything in memory, for tests and throwaway runs.
//! - [`BackgroundWriter`] wraps another store and applies writes on a single
//!   worker thread, in submission order.

use crate::config::PersistenceMode;
use crate::engine::EngineState;
use crate::rating::{Rating, RatingEvent};
use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use log::trace;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

/// Load/save contract of the persistence collaborator.
pub trait StateStore: Send + Sync {
    /// Last saved snapshot; `None` when nothing (readable) was saved yet.
    fn load_state(&self) -> Result<Option<EngineState>>;

    fn save_state(&self, state: &EngineState) -> Result<()>;

    /// Log a rating, replacing any earlier rating of the same track.
    fn save_rating(&self, track_id: &str, rating: Rating, event: &RatingEvent) -> Result<()>;

    /// Drop the logged rating of a track.
    fn retract_rating(&self, track_id: &str) -> Result<()>;

    /// Latest logged rating per track.
    fn load_ratings(&self) -> Result<BTreeMap<String, RatingEvent>>;

    /// Forget the snapshot and the rating log.
    fn clear(&self) -> Result<()>;

    /// Block until every accepted write is applied.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Open the store configured for `path`.
pub fn open_store(path: &Path, mode: PersistenceMode) -> Result<Arc<dyn StateStore>> {
    let sqlite: Arc<dyn StateStore> = Arc::new(SqliteStore::open(path)?);
    Ok(match mode {
        PersistenceMode::Immediate => sqlite,
        PersistenceMode::Background => Arc::new(BackgroundWriter::spawn(sqlite)?),
    })
}

/// `SQLite`-backed store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Rusqlite DB connection refused. DB location: {}", path.display()))?;
        Self::init(conn)
    }

    /// Throwaway database that lives as long as the store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS state (
                id       INTEGER PRIMARY KEY CHECK (id = 1),
                snapshot TEXT    NOT NULL,
                saved_at TEXT    NOT NULL
            );
            CREATE TABLE IF NOT EXISTS state_backup (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot TEXT    NOT NULL,
                saved_at TEXT    NOT NULL,
                moved_at TEXT    NOT NULL,
                reason   TEXT    NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ratings (
                track_id   TEXT    PRIMARY KEY,
                rating     INTEGER NOT NULL,
                rated_at   TEXT    NOT NULL,
                session_id TEXT    NOT NULL,
                event      TEXT    NOT NULL
            );",
        )
        .context("Invalid SQL command when CREATEing tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshots moved aside because they could not be read.
    pub fn backup_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM state_backup", [], |row| row.get(0))
            .context("Could not count snapshot backups")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Overwrite the raw snapshot text. Lets tests plant a damaged snapshot.
    pub fn write_raw_snapshot(&self, snapshot: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO state (id, snapshot, saved_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot, saved_at = excluded.saved_at",
                (snapshot, now()),
            )
            .context("Invalid SQL statement when writing raw snapshot")?;
        Ok(())
    }

    fn quarantine(conn: &mut Connection, snapshot: &str, saved_at: &str, reason: &str) -> Result<()> {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO state_backup (snapshot, saved_at, moved_at, reason) VALUES (?1, ?2, ?3, ?4)",
            (snapshot, saved_at, now(), reason),
        )
        .context("Failed to back up corrupt snapshot")?;
        tx.execute("DELETE FROM state WHERE id = 1", ())
            .context("Failed to remove corrupt snapshot")?;
        tx.commit().context("Committing SQL transaction failed")?;
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl StateStore for SqliteStore {
    fn load_state(&self) -> Result<Option<EngineState>> {
        let mut conn = self.conn();
        let row: Option<(String, String)> = conn
            .query_row("SELECT snapshot, saved_at FROM state WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .context("Failed to query state snapshot")?;

        let Some((snapshot, saved_at)) = row else {
            return Ok(None);
        };

        match serde_json::from_str::<EngineState>(&snapshot) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                log::warn!("State snapshot saved at {saved_at} is corrupt ({err}); moving it to state_backup");
                Self::quarantine(&mut conn, &snapshot, &saved_at, &err.to_string())?;
                Ok(None)
            }
        }
    }

    fn save_state(&self, state: &EngineState) -> Result<()> {
        let snapshot = serde_json::to_string(state).context("Failed to serialize engine state")?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO state (id, snapshot, saved_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot, saved_at = excluded.saved_at",
            (&snapshot, now()),
        )
        .context("Invalid SQL statement when saving state snapshot")?;
        tx.commit().context("Committing SQL transaction failed")?;
        trace!("Saved {} byte state snapshot", snapshot.len());
        Ok(())
    }

    fn save_rating(&self, track_id: &str, rating: Rating, event: &RatingEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("Failed to serialize rating event")?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO ratings (track_id, rating, rated_at, session_id, event) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(track_id) DO UPDATE SET
                rating = excluded.rating, rated_at = excluded.rated_at,
                session_id = excluded.session_id, event = excluded.event",
            (
                track_id,
                rating.value(),
                event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                &event.session_id,
                &payload,
            ),
        )
        .with_context(|| format!("Invalid SQL statement when saving rating for {track_id}"))?;
        tx.commit().context("Committing SQL transaction failed")?;
        Ok(())
    }

    fn retract_rating(&self, track_id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM ratings WHERE track_id = ?1", [track_id])
            .with_context(|| format!("Invalid SQL statement when retracting rating for {track_id}"))?;
        Ok(())
    }

    fn load_ratings(&self) -> Result<BTreeMap<String, RatingEvent>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT track_id, event FROM ratings")
            .context("Invalid SQL statement when SELECTing ratings")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("Cannot query ratings")?;

        let mut ratings = BTreeMap::new();
        for row in rows {
            let (track_id, payload) = row.context("Queried rating row unreadable")?;
            match serde_json::from_str::<RatingEvent>(&payload) {
                Ok(event) => {
                    ratings.insert(track_id, event);
                }
                Err(err) => log::warn!("Skipping unreadable rating for {track_id}: {err}"),
            }
        }
        Ok(ratings)
    }

    fn clear(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM state", ()).context("Failed to clear state")?;
        tx.execute("DELETE FROM ratings", ()).context("Failed to clear ratings")?;
        tx.commit().context("Committing SQL transaction failed")?;
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<EngineState>>,
    ratings: Mutex<BTreeMap<String, RatingEvent>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_state(&self) -> Result<Option<EngineState>> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_state(&self, state: &EngineState) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }

    fn save_rating(&self, track_id: &str, _rating: Rating, event: &RatingEvent) -> Result<()> {
        self.ratings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(track_id.to_string(), event.clone());
        Ok(())
    }

    fn retract_rating(&self, track_id: &str) -> Result<()> {
        self.ratings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(track_id);
        Ok(())
    }

    fn load_ratings(&self) -> Result<BTreeMap<String, RatingEvent>> {
        Ok(self.ratings.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn clear(&self) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.ratings.lock().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }
}

enum WriteOp {
    State(Box<EngineState>),
    Rating {
        track_id: String,
        rating: Rating,
        event: Box<RatingEvent>,
    },
    Retract(String),
    Clear,
    Flush(mpsc::Sender<()>),
}

/// Applies writes to an inner store on one worker thread.
///
/// Writes are queued on a single channel, so two writes for the same track
/// land in the order they were submitted. Reads flush first.
pub struct BackgroundWriter {
    inner: Arc<dyn StateStore>,
    tx: Mutex<Option<mpsc::Sender<WriteOp>>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for BackgroundWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWriter").finish_non_exhaustive()
    }
}

impl BackgroundWriter {
    pub fn spawn(inner: Arc<dyn StateStore>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteOp>();
        let store = Arc::clone(&inner);

        let handle = thread::Builder::new()
            .name("attune-writer".to_string())
            .spawn(move || {
                for op in rx {
                    let result = match op {
                        WriteOp::State(state) => store.save_state(&state),
                        WriteOp::Rating { track_id, rating, event } => {
                            store.save_rating(&track_id, rating, &event)
                        }
                        WriteOp::Retract(track_id) => store.retract_rating(&track_id),
                        WriteOp::Clear => store.clear(),
                        WriteOp::Flush(done) => {
                            let _ = done.send(());
                            Ok(())
                        }
                    };
                    if let Err(err) = result {
                        log::error!("Background write failed: {err:#}");
                    }
                }
                trace!("Background writer stopped");
            })
            .context("Failed to spawn background writer thread")?;

        Ok(Self {
            inner,
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, op: WriteOp) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or_else(|| anyhow!("Background writer is shut down"))?;
        tx.send(op).map_err(|_| anyhow!("Background writer thread has exited"))
    }
}

impl StateStore for BackgroundWriter {
    fn load_state(&self) -> Result<Option<EngineState>> {
        self.flush()?;
        self.inner.load_state()
    }

    fn save_state(&self, state: &EngineState) -> Result<()> {
        self.send(WriteOp::State(Box::new(state.clone())))
    }

    fn save_rating(&self, track_id: &str, rating: Rating, event: &RatingEvent) -> Result<()> {
        self.send(WriteOp::Rating {
            track_id: track_id.to_string(),
            rating,
            event: Box::new(event.clone()),
        })
    }

    fn retract_rating(&self, track_id: &str) -> Result<()> {
        self.send(WriteOp::Retract(track_id.to_string()))
    }

    fn load_ratings(&self) -> Result<BTreeMap<String, RatingEvent>> {
        self.flush()?;
        self.inner.load_ratings()
    }

    fn clear(&self) -> Result<()> {
        self.send(WriteOp::Clear)
    }

    fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(WriteOp::Flush(done_tx))?;
        done_rx
            .recv()
            .map_err(|_| anyhow!("Background writer exited before flushing"))
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if handle.join().is_err() {
                log::error!("Background writer thread panicked");
            }
        }
    }
}

//! Snapshot store trait and SQLite implementation
//!
//! Schema lives in `/sql/*.sql` and is applied by `run_schema_migrations`.
//! Every record is a plain INSERT: snapshots are append-only history.

use super::types::{
    BuildSnapshot, ExposureSnapshot, PnLSnapshot, SnapshotRecord, TransferSnapshot,
};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Where snapshots go
///
/// Implementations must either persist the whole record or return an error;
/// the scheduler relies on that to decide whether a cycle counts.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append one record to its collection (`record.collection()`)
    async fn create(&self, record: SnapshotRecord) -> Result<(), StoreError>;

    /// Short backend name for logs
    fn backend_type(&self) -> &'static str;
}

/// Run schema migrations from SQL files
///
/// Reads every `.sql` file in `schema_dir` in file-name order and executes
/// it. Files must use `IF NOT EXISTS` so reruns are harmless.
///
/// Arguments:
/// - `conn`: SQLite connection
/// - `schema_dir`: Directory containing the `.sql` files
pub fn run_schema_migrations(conn: &Connection, schema_dir: &Path) -> Result<(), StoreError> {
    if !schema_dir.is_dir() {
        return Err(StoreError::Database(format!(
            "Schema directory not found: {}",
            schema_dir.display()
        )));
    }

    let mut sql_files: Vec<_> = fs::read_dir(schema_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    sql_files.sort();

    log::info!("🔧 Running schema migrations from: {}", schema_dir.display());

    for path in sql_files {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("   ├─ Executing: {}", filename);

        conn.execute_batch(&fs::read_to_string(&path)?)?;
    }

    log::info!("   └─ ✅ Schema ready");
    Ok(())
}

/// SQLite-backed snapshot store
///
/// One connection behind a mutex; both the scheduler and the build watcher
/// write through the same store.
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database and bring the schema up to date
    ///
    /// Arguments:
    /// - `db_path`: Database file; parent directories are created
    /// - `schema_dir`: Directory holding the `/sql/*.sql` migrations
    pub fn open(db_path: &str, schema_dir: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn, schema_dir)?;

        log::info!("📊 SQLite snapshot store ready: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn insert(conn: &Connection, record: &SnapshotRecord) -> rusqlite::Result<usize> {
        match record {
            SnapshotRecord::Exposure(s) => insert_exposure(conn, s),
            SnapshotRecord::PnL(s) => insert_pnl(conn, s),
            SnapshotRecord::Transfer(s) => insert_transfer(conn, s),
            SnapshotRecord::Build(s) => insert_build(conn, s),
        }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn create(&self, record: SnapshotRecord) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))?;

        Self::insert(&conn, &record)?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}

fn insert_exposure(conn: &Connection, s: &ExposureSnapshot) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO exposure_snapshots (
            market, timestamp, bucket_0_10, bucket_10_20, bucket_20_100,
            bucket_100_500, bucket_500_1000
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        rusqlite::params![
            s.market,
            s.timestamp,
            s.counts[0],
            s.counts[1],
            s.counts[2],
            s.counts[3],
            s.counts[4],
        ],
    )
}

fn insert_pnl(conn: &Connection, s: &PnLSnapshot) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO pnl_snapshots (
            market, timestamp, total_unrealized_profit, total_unrealized_loss
        ) VALUES (?, ?, ?, ?)
        "#,
        rusqlite::params![
            s.market,
            s.timestamp,
            s.total_unrealized_profit,
            s.total_unrealized_loss,
        ],
    )
}

fn insert_transfer(conn: &Connection, s: &TransferSnapshot) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO transfer_snapshots (
            market, timestamp, total_minted, total_burnt
        ) VALUES (?, ?, ?, ?)
        "#,
        rusqlite::params![s.market, s.timestamp, s.total_minted, s.total_burnt],
    )
}

fn insert_build(conn: &Connection, s: &BuildSnapshot) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO build_snapshots (
            market, timestamp, sender, cap_oi, user_oi, collateral,
            percentage_of_cap_oi_bought
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        rusqlite::params![
            s.market,
            s.timestamp,
            s.sender,
            s.cap_oi,
            s.user_oi,
            s.collateral,
            s.percentage_of_cap_oi_bought,
        ],
    )
}

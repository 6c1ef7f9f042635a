//! Shared SQLite tuning applied to every snapshot database connection

use rusqlite::Connection;

/// WAL auto-checkpoint threshold in pages
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// Apply the PRAGMAs used for all snapshot writers
///
/// - `journal_mode = WAL` so readers never block the writer
/// - `synchronous = NORMAL` (safe with WAL)
/// - `temp_store = MEMORY`
/// - 64 MiB mmap, ~16 MiB page cache
/// - checkpoint every 1000 pages
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 64 * 1024 * 1024_i64)?;
    conn.pragma_update(None, "cache_size", -16_000_i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES)?;
    Ok(())
}

//! JSONL snapshot store - one append-only `<collection>.jsonl` file per record kind

use super::db::{SnapshotStore, StoreError};
use super::types::SnapshotRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

pub struct JsonlSnapshotStore {
    base_path: PathBuf,
    writers: Mutex<HashMap<&'static str, BufWriter<fs::File>>>,
}

impl JsonlSnapshotStore {
    /// Create the output directory; files are opened on first write
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        log::info!("📝 Writing snapshots to: {}", base_path.display());

        Ok(Self {
            base_path,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    fn append(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        let collection = record.collection();

        let mut writers = self
            .writers
            .lock()
            .map_err(|_| StoreError::Database("writer mutex poisoned".to_string()))?;

        if !writers.contains_key(collection) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.collection_path(collection))?;
            writers.insert(collection, BufWriter::new(file));
        }

        let writer = writers
            .get_mut(collection)
            .ok_or_else(|| StoreError::Database(format!("no writer for {}", collection)))?;

        writeln!(writer, "{}", line)?;
        // A record only counts once it has reached the file
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for JsonlSnapshotStore {
    async fn create(&self, record: SnapshotRecord) -> Result<(), StoreError> {
        self.append(&record)
    }

    fn backend_type(&self) -> &'static str {
        "jsonl"
    }
}

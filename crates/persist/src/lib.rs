//! Streamport persistence: document sinks and the per-collection bulk writer.
//! One bulk insert per collection per loop iteration, best effort.

#![forbid(unsafe_code)]

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use metrics::histogram;
use streamport_core::Collection;

mod memory;
mod writer;

pub use memory::MemorySink;
pub use writer::{BatchWriter, FlushReport};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serializing document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write to {collection} rejected: {reason}")]
    Rejected { collection: Collection, reason: String },
}

/// Destination store. `insert_many` is all-or-nothing from the caller's view:
/// on error none of the batch is assumed written.
pub trait DocumentSink: Send {
    fn insert_many(&self, collection: Collection, docs: &[serde_json::Value]) -> Result<usize, SinkError>;
}

/// SQLite-backed sink, one table per collection. Simple and synchronous.
pub struct SqliteSink {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteSink {
    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        for c in Collection::ALL {
            db.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{}\" (
                        id       INTEGER PRIMARY KEY AUTOINCREMENT,
                        match_id TEXT,
                        doc      TEXT NOT NULL
                    )",
                    c.name()
                ),
                [],
            )
            .with_context(|| format!("creating {} table", c.name()))?;
            db.execute(&format!("CREATE INDEX IF NOT EXISTS \"idx_{0}_match\" ON \"{0}\"(match_id)", c.name()), []).ok();
        }
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self, collection: Collection) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", collection.name()), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Stored documents in insertion order.
    pub fn documents(&self, collection: Collection) -> Result<Vec<serde_json::Value>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!("SELECT doc FROM \"{}\" ORDER BY id", collection.name()))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let doc: String = row.get(0)?;
            out.push(serde_json::from_str(&doc).context("decoding stored document")?);
        }
        Ok(out)
    }
}

impl DocumentSink for SqliteSink {
    fn insert_many(&self, collection: Collection, docs: &[serde_json::Value]) -> Result<usize, SinkError> {
        let started = std::time::Instant::now();
        let mut db = self.conn();
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("INSERT INTO \"{}\"(match_id, doc) VALUES (?1, ?2)", collection.name()))?;
            for d in docs {
                let match_id = d.get("matchId").and_then(|v| v.as_str());
                stmt.execute((match_id, d.to_string()))?;
            }
        }
        tx.commit()?;
        histogram!("persist_insert_ms", started.elapsed().as_secs_f64() * 1000.0, "collection" => collection.name());
        Ok(docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("streamport-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    #[test]
    fn insert_and_read_back() {
        let s = SqliteSink::open(&temp_db()).unwrap();
        let docs = vec![
            serde_json::json!({ "matchId": "M1", "ts": 1 }),
            serde_json::json!({ "matchId": "M1", "ts": 2 }),
        ];
        assert_eq!(s.insert_many(Collection::NonatomicEvents, &docs).unwrap(), 2);
        assert_eq!(s.count(Collection::NonatomicEvents).unwrap(), 2);
        assert_eq!(s.count(Collection::Events).unwrap(), 0);
        assert_eq!(s.documents(Collection::NonatomicEvents).unwrap(), docs);
    }

    #[test]
    fn reopen_keeps_documents() {
        let path = temp_db();
        {
            let s = SqliteSink::open(&path).unwrap();
            s.insert_many(Collection::Matches, &[serde_json::json!({ "matchId": "M1" })]).unwrap();
        }
        let s = SqliteSink::open(&path).unwrap();
        assert_eq!(s.count(Collection::Matches).unwrap(), 1);
    }
}

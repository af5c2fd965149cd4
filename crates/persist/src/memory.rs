use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use streamport_core::Collection;

use crate::{DocumentSink, SinkError};

#[derive(Debug, Default)]
struct MemoryState {
    inserts: Vec<(Collection, Vec<serde_json::Value>)>,
    failing: HashSet<Collection>,
}

/// In-memory sink. Clones share state, so a clone kept by the caller sees
/// everything written through the importer's copy.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, MemoryState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Reject every following insert into `collection`.
    pub fn fail_collection(&self, collection: Collection) { self.state().failing.insert(collection); }

    pub fn heal(&self, collection: Collection) { self.state().failing.remove(&collection); }

    /// Documents written to `collection`, in insertion order.
    pub fn documents(&self, collection: Collection) -> Vec<serde_json::Value> {
        self.state()
            .inserts
            .iter()
            .filter(|(c, _)| *c == collection)
            .flat_map(|(_, docs)| docs.iter().cloned())
            .collect()
    }

    /// Successful bulk inserts into `collection`.
    pub fn insert_calls(&self, collection: Collection) -> usize {
        self.state().inserts.iter().filter(|(c, _)| *c == collection).count()
    }
}

impl DocumentSink for MemorySink {
    fn insert_many(&self, collection: Collection, docs: &[serde_json::Value]) -> Result<usize, SinkError> {
        let mut st = self.state();
        if st.failing.contains(&collection) {
            return Err(SinkError::Rejected { collection, reason: "collection marked failing".to_string() });
        }
        st.inserts.push((collection, docs.to_vec()));
        Ok(docs.len())
    }
}

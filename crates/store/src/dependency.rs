use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use streamport_core::{DataElement, DependencyEntry};

/// Reference values per match id. Entries live for the whole process and are
/// replaced, not merged, when metadata is re-sent.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    entries: FxHashMap<String, DependencyEntry>,
}

impl DependencyIndex {
    pub fn new() -> Self { Self::default() }

    /// Returns the replaced entry, if any.
    pub fn register(&mut self, match_id: &str, entry: DependencyEntry) -> Option<DependencyEntry> {
        self.entries.insert(match_id.to_string(), entry)
    }

    pub fn get(&self, match_id: &str) -> Option<DependencyEntry> { self.entries.get(match_id).copied() }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// FIFO of elements waiting for their match metadata. Unbounded.
#[derive(Debug, Default)]
pub struct WaitList {
    queue: VecDeque<DataElement>,
}

impl WaitList {
    pub fn new() -> Self { Self::default() }

    pub fn push_back(&mut self, el: DataElement) { self.queue.push_back(el); }

    pub fn pop_front(&mut self) -> Option<DataElement> { self.queue.pop_front() }

    pub fn len(&self) -> usize { self.queue.len() }

    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &DataElement> { self.queue.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamport_core::StreamCategory;

    fn el(key: &str, ts: i64) -> DataElement {
        DataElement {
            stream_name: "s".into(),
            category: StreamCategory::State,
            atomic: true,
            key: key.into(),
            generation_timestamp: ts,
            object_ids: vec![],
            group_ids: Default::default(),
            positions: Default::default(),
            payload: Default::default(),
            event_id: None,
            phase: None,
            seq_no: None,
        }
    }

    #[test]
    fn last_registration_wins() {
        let mut idx = DependencyIndex::new();
        let a = DependencyEntry { generation_timestamp_first_element: 1, match_start_video_offset: 2 };
        let b = DependencyEntry { generation_timestamp_first_element: 3, match_start_video_offset: 4 };
        assert_eq!(idx.register("M1", a), None);
        assert_eq!(idx.register("M1", b), Some(a));
        assert_eq!(idx.get("M1"), Some(b));
        assert_eq!(idx.get("M2"), None);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn wait_list_is_fifo() {
        let mut wl = WaitList::new();
        wl.push_back(el("M1", 1));
        wl.push_back(el("M2", 2));
        wl.push_back(el("M1", 3));
        let order: Vec<_> = wl.iter().map(|e| e.generation_timestamp).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(wl.pop_front().map(|e| e.generation_timestamp), Some(1));
        assert_eq!(wl.len(), 2);
    }
}

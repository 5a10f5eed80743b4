use std::cmp::Ordering;

use strata_types::{BlobId, HistoryState, ResourcePath, BLOB_ID_LEN};

use crate::bucket::EntryAction;
use crate::codec::{BucketCodec, ByteReader};
use crate::error::IndexResult;

/// Current on-disk version of history buckets.
pub const HISTORY_VERSION: u8 = 2;

/// One stored state of a path: which blob, recorded when.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateRecord {
    pub blob_id: BlobId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl StateRecord {
    pub fn new(blob_id: BlobId, timestamp: i64) -> Self {
        Self { blob_id, timestamp }
    }

    /// Attach the record to a path.
    pub fn to_state(&self, path: &ResourcePath) -> HistoryState {
        HistoryState::new(path.clone(), self.blob_id, self.timestamp)
    }

    /// Newest-first order: timestamp descending, then blob id descending.
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.blob_id.cmp(&a.blob_id))
    }
}

/// All recorded states of one path, newest first, without duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    states: Vec<StateRecord>,
}

impl HistoryEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an entry from records in any order.
    pub fn from_states(mut states: Vec<StateRecord>) -> Self {
        states.sort_by(StateRecord::newest_first);
        states.dedup();
        Self { states }
    }

    pub fn states(&self) -> &[StateRecord] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn newest(&self) -> Option<&StateRecord> {
        self.states.first()
    }

    pub fn contains_blob(&self, id: &BlobId) -> bool {
        self.states.iter().any(|s| s.blob_id == *id)
    }

    /// Insert one record at its sorted position.
    ///
    /// Returns `false` if the exact record is already present. Entries are
    /// short, so this is a linear scan.
    pub fn insert(&mut self, record: StateRecord) -> bool {
        let mut at = self.states.len();
        for (i, existing) in self.states.iter().enumerate() {
            match StateRecord::newest_first(&record, existing) {
                Ordering::Equal => return false,
                Ordering::Less => {
                    at = i;
                    break;
                }
                Ordering::Greater => {}
            }
        }
        self.states.insert(at, record);
        true
    }

    /// Merge `other`'s records into this entry.
    pub fn merge_from(&mut self, other: &HistoryEntry) {
        self.states = merge(&self.states, &other.states);
    }

    /// Start a deletion pass over the records.
    pub fn editor(&self) -> StateEditor {
        StateEditor {
            slots: self.states.iter().copied().map(Some).collect(),
            changed: false,
        }
    }
}

/// Linear merge of two newest-first arrays, dropping exact duplicates.
pub fn merge(base: &[StateRecord], additions: &[StateRecord]) -> Vec<StateRecord> {
    let mut out = Vec::with_capacity(base.len() + additions.len());
    let (mut i, mut j) = (0, 0);
    while i < base.len() && j < additions.len() {
        match StateRecord::newest_first(&base[i], &additions[j]) {
            Ordering::Less => {
                out.push(base[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(additions[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(base[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&base[i..]);
    out.extend_from_slice(&additions[j..]);
    out
}

/// Marks individual records of an entry for deletion.
///
/// Deleted slots become tombstones; [`StateEditor::finish`] compacts them
/// away and tells the bucket what to do with the entry.
#[derive(Debug)]
pub struct StateEditor {
    slots: Vec<Option<StateRecord>>,
    changed: bool,
}

impl StateEditor {
    /// Live records with their slot positions, newest first.
    pub fn live(&self) -> impl Iterator<Item = (usize, &StateRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|s| (i, s)))
    }

    /// Tombstone slot `index`, returning the record that was there.
    pub fn delete(&mut self, index: usize) -> Option<StateRecord> {
        let removed = self.slots.get_mut(index)?.take();
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Compact the tombstones away.
    pub fn finish(self) -> EntryAction<HistoryEntry> {
        if !self.changed {
            return EntryAction::Keep;
        }
        let states: Vec<StateRecord> = self.slots.into_iter().flatten().collect();
        if states.is_empty() {
            EntryAction::Delete
        } else {
            EntryAction::Mutate(HistoryEntry { states })
        }
    }
}

/// History bucket value format.
///
/// ```text
/// [state count u16] ([blob id: 16 bytes][timestamp i64])*
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct HistoryCodec;

impl BucketCodec for HistoryCodec {
    type Value = HistoryEntry;
    const VERSION: u8 = HISTORY_VERSION;
    const FILE_NAME: &'static str = "history.index";

    fn read_value(&self, reader: &mut ByteReader<'_>) -> IndexResult<HistoryEntry> {
        let count = reader.read_u16()? as usize;
        let mut states = Vec::with_capacity(count);
        for _ in 0..count {
            let blob_id = BlobId::from_bytes(reader.read_array::<BLOB_ID_LEN>()?);
            let timestamp = reader.read_i64()?;
            states.push(StateRecord::new(blob_id, timestamp));
        }
        Ok(HistoryEntry::from_states(states))
    }

    fn write_value(&self, value: &HistoryEntry, out: &mut Vec<u8>) {
        // The count field caps an entry at u16::MAX states; the oldest go.
        let states = &value.states[..value.states.len().min(u16::MAX as usize)];
        out.extend_from_slice(&(states.len() as u16).to_be_bytes());
        for state in states {
            out.extend_from_slice(state.blob_id.as_bytes());
            out.extend_from_slice(&state.timestamp.to_be_bytes());
        }
    }

    fn compact(&self, value: HistoryEntry) -> Option<HistoryEntry> {
        (!value.is_empty()).then_some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Path;

    fn record(id: u8, ts: i64) -> StateRecord {
        StateRecord::new(BlobId::from_bytes([id; 16]), ts)
    }

    fn sorted(states: &[StateRecord]) -> bool {
        states
            .windows(2)
            .all(|w| StateRecord::newest_first(&w[0], &w[1]) == Ordering::Less)
    }

    #[test]
    fn insert_keeps_newest_first() {
        let mut entry = HistoryEntry::new();
        assert!(entry.insert(record(1, 100)));
        assert!(entry.insert(record(2, 300)));
        assert!(entry.insert(record(3, 200)));
        let ts: Vec<i64> = entry.states().iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![300, 200, 100]);
        assert_eq!(entry.newest(), Some(&record(2, 300)));
    }

    #[test]
    fn timestamp_ties_break_on_blob_id() {
        let mut entry = HistoryEntry::new();
        entry.insert(record(0x10, 50));
        entry.insert(record(0xf0, 50));
        entry.insert(record(0x80, 50));
        let ids: Vec<u8> = entry.states().iter().map(|s| s.blob_id.as_bytes()[0]).collect();
        assert_eq!(ids, vec![0xf0, 0x80, 0x10]);
    }

    #[test]
    fn insert_rejects_exact_duplicate() {
        let mut entry = HistoryEntry::new();
        assert!(entry.insert(record(1, 100)));
        assert!(!entry.insert(record(1, 100)));
        assert_eq!(entry.len(), 1);
    }

    #[test]
    fn merge_disjoint_and_overlapping() {
        let base = vec![record(5, 500), record(3, 300), record(1, 100)];
        let additions = vec![record(4, 400), record(2, 200)];
        let merged = merge(&base, &additions);
        assert_eq!(merged.len(), 5);
        assert!(sorted(&merged));

        assert_eq!(merge(&base, &base), base);
        assert_eq!(merge(&[], &additions), additions);
    }

    #[test]
    fn editor_compacts_tombstones() {
        let entry = HistoryEntry::from_states(vec![record(1, 1), record(2, 2), record(3, 3)]);
        let mut editor = entry.editor();
        assert_eq!(editor.delete(1), Some(record(2, 2)));
        assert_eq!(editor.delete(1), None);
        let live: Vec<usize> = editor.live().map(|(i, _)| i).collect();
        assert_eq!(live, vec![0, 2]);
        assert_eq!(
            editor.finish(),
            EntryAction::Mutate(HistoryEntry::from_states(vec![record(3, 3), record(1, 1)]))
        );
    }

    #[test]
    fn editor_reports_keep_and_delete() {
        let entry = HistoryEntry::from_states(vec![record(1, 1)]);
        assert_eq!(entry.editor().finish(), EntryAction::Keep);

        let mut editor = entry.editor();
        editor.delete(0);
        assert_eq!(editor.finish(), EntryAction::Delete);
    }

    #[test]
    fn codec_layout() {
        let entry = HistoryEntry::from_states(vec![record(0xab, 0x0102)]);
        let mut out = Vec::new();
        HistoryCodec.write_value(&entry, &mut out);
        assert_eq!(out.len(), 2 + 16 + 8);
        assert_eq!(&out[..2], &[0, 1]);
        assert_eq!(&out[2..18], &[0xab; 16]);
        assert_eq!(&out[18..], &0x0102i64.to_be_bytes());

        let mut reader = ByteReader::new(&out, Path::new("history.index"));
        assert_eq!(HistoryCodec.read_value(&mut reader).unwrap(), entry);
    }

    fn arb_records() -> impl Strategy<Value = Vec<StateRecord>> {
        prop::collection::vec((0u8..8, -5i64..20), 0..24)
            .prop_map(|raw| raw.into_iter().map(|(id, ts)| record(id, ts)).collect())
    }

    proptest! {
        #[test]
        fn inserts_always_sorted(records in arb_records()) {
            let mut entry = HistoryEntry::new();
            for r in &records {
                entry.insert(*r);
            }
            prop_assert!(sorted(entry.states()));
            prop_assert_eq!(entry, HistoryEntry::from_states(records));
        }

        #[test]
        fn merge_matches_union(a in arb_records(), b in arb_records()) {
            let a = HistoryEntry::from_states(a);
            let b = HistoryEntry::from_states(b);
            let merged = merge(a.states(), b.states());
            prop_assert!(sorted(&merged));

            let mut union: Vec<StateRecord> = a.states().to_vec();
            union.extend_from_slice(b.states());
            prop_assert_eq!(merged, HistoryEntry::from_states(union).states().to_vec());
        }
    }
}

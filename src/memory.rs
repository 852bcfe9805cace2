//! Keyed shared memory for a run.
//!
//! Memory maps string keys to JSON-representable values. Every write is
//! attributed to the node that made it (or to the run input), which is what
//! makes the "no orphaned writes" guarantee checkable: any key present at
//! the end of a run was either seeded from the input or written through a
//! node's declared output keys.
//!
//! Parallel branches run on a [`fork`](Memory::fork) of the parent memory
//! and report their writes back at the join; the merge applies branches in
//! declared order and treats a same-key write from two branches as a fault
//! ([`CoreError::BranchMergeConflict`]) rather than picking a winner.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Writer attribution used for keys seeded from the run input.
pub const INPUT_WRITER: &str = "input";

/// A single attributed memory cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: Value,
    /// Node id that wrote this key, or [`INPUT_WRITER`].
    pub written_by: String,
    /// Run-level step counter at write time.
    pub at_step: u64,
}

/// The run's shared key/value state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Memory {
    entries: FxHashMap<String, MemoryEntry>,
    version: u64,
    /// Keys written since the last fork; drives branch merges. Not persisted.
    #[serde(skip)]
    dirty: Vec<String>,
}

// The write journal is transient bookkeeping; two memories are equal when
// their entries and versions agree.
impl PartialEq for Memory {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.version == other.version
    }
}

impl Memory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed memory from the run input.
    ///
    /// Object inputs are spread key-by-key so nodes can declare them as
    /// `input_keys`; any other shape is stored whole under `"input"`.
    pub fn seed_input(&mut self, input: &Value) {
        match input {
            Value::Object(map) => {
                for (k, v) in map {
                    self.write(k.clone(), v.clone(), INPUT_WRITER, 0);
                }
            }
            other => self.write("input".to_string(), other.clone(), INPUT_WRITER, 0),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Write one key, attributing it to `writer`. Overwrites are allowed.
    pub fn write(&mut self, key: String, value: Value, writer: &str, step: u64) {
        self.version += 1;
        self.dirty.push(key.clone());
        self.entries.insert(
            key,
            MemoryEntry {
                value,
                written_by: writer.to_string(),
                at_step: step,
            },
        );
    }

    /// Write a node's output map in one attributed batch.
    pub fn write_outputs(&mut self, node_id: &str, outputs: FxHashMap<String, Value>, step: u64) {
        for (k, v) in outputs {
            self.write(k, v, node_id, step);
        }
    }

    /// Point-in-time clone of values only (attribution stripped).
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Gather the values of the given keys, preserving request order.
    /// Missing keys are simply absent from the result.
    #[must_use]
    pub fn collect_keys(&self, keys: &[String]) -> FxHashMap<String, Value> {
        keys.iter()
            .filter_map(|k| self.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Create a branch-local copy with a clean write journal.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            version: self.version,
            dirty: Vec::new(),
        }
    }

    /// Drain the entries written since the last fork, in write order
    /// (deduplicated to the latest write per key).
    #[must_use]
    pub fn take_branch_writes(&mut self) -> Vec<(String, MemoryEntry)> {
        let mut out: Vec<(String, MemoryEntry)> = Vec::new();
        for key in std::mem::take(&mut self.dirty) {
            if let Some(entry) = self.entries.get(&key) {
                if let Some(existing) = out.iter_mut().find(|(k, _)| *k == key) {
                    existing.1 = entry.clone();
                } else {
                    out.push((key, entry.clone()));
                }
            }
        }
        out
    }

    /// Merge branch write-sets back into shared memory in declared branch
    /// order. A key written by two branches is a run-level fault.
    pub fn merge_branches(
        &mut self,
        branch_writes: Vec<Vec<(String, MemoryEntry)>>,
    ) -> Result<(), CoreError> {
        let mut claimed: FxHashMap<&str, usize> = FxHashMap::default();
        for (branch_idx, writes) in branch_writes.iter().enumerate() {
            for (key, _) in writes {
                if let Some(prev) = claimed.insert(key.as_str(), branch_idx) {
                    if prev != branch_idx {
                        return Err(CoreError::BranchMergeConflict { key: key.clone() });
                    }
                }
            }
        }
        for writes in branch_writes {
            for (key, entry) in writes {
                self.version += 1;
                self.dirty.push(key.clone());
                self.entries.insert(key, entry);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_input_spreads_keys() {
        let mut mem = Memory::new();
        mem.seed_input(&json!({"ticket": "T-1", "body": "help"}));
        assert_eq!(mem.get("ticket"), Some(&json!("T-1")));
        assert_eq!(mem.entry("ticket").unwrap().written_by, INPUT_WRITER);
    }

    #[test]
    fn scalar_input_stored_whole() {
        let mut mem = Memory::new();
        mem.seed_input(&json!("just text"));
        assert_eq!(mem.get("input"), Some(&json!("just text")));
    }

    #[test]
    fn writes_are_attributed_and_versioned() {
        let mut mem = Memory::new();
        let v0 = mem.version();
        mem.write("summary".into(), json!("ok"), "intake", 3);
        assert!(mem.version() > v0);
        let entry = mem.entry("summary").unwrap();
        assert_eq!(entry.written_by, "intake");
        assert_eq!(entry.at_step, 3);
    }

    #[test]
    fn branch_merge_applies_in_declared_order() {
        let mut base = Memory::new();
        base.write("seed".into(), json!(1), INPUT_WRITER, 0);

        let mut a = base.fork();
        a.write("alpha".into(), json!("a"), "node_a", 1);
        let mut b = base.fork();
        b.write("beta".into(), json!("b"), "node_b", 1);

        base.merge_branches(vec![a.take_branch_writes(), b.take_branch_writes()])
            .unwrap();
        assert_eq!(base.get("alpha"), Some(&json!("a")));
        assert_eq!(base.get("beta"), Some(&json!("b")));
    }

    #[test]
    fn branch_merge_conflict_is_a_fault() {
        let base = Memory::new();
        let mut a = base.fork();
        a.write("shared".into(), json!("a"), "node_a", 1);
        let mut b = base.fork();
        b.write("shared".into(), json!("b"), "node_b", 1);

        let mut merged = base.clone();
        let err = merged
            .merge_branches(vec![a.take_branch_writes(), b.take_branch_writes()])
            .unwrap_err();
        assert!(matches!(err, CoreError::BranchMergeConflict { key } if key == "shared"));
    }

    #[test]
    fn take_branch_writes_dedupes_to_latest() {
        let base = Memory::new();
        let mut branch = base.fork();
        branch.write("k".into(), json!(1), "n", 1);
        branch.write("k".into(), json!(2), "n", 2);
        let writes = branch.take_branch_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.value, json!(2));
    }
}

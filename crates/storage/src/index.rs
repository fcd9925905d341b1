//! In-memory ordered indexes over one column of a table.
//!
//! An index maps each key to the record ids holding it, in insertion order.
//! Its page count is modelled as if the entries were packed into B+tree
//! leaves of one page each, plus a root once there is more than one leaf.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use relq_types::{DataType, RecordId, Value, PAGE_SIZE};

/// A [`Value`] with a total order, usable as a map key.
#[derive(Debug, Clone)]
pub struct IndexKey(Value);

impl IndexKey {
    pub fn new(value: Value) -> Self {
        match value {
            Value::Float(v) if v == 0.0 => IndexKey(Value::Float(0.0)),
            other => IndexKey(other),
        }
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    fn rank(&self) -> u8 {
        match self.0 {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::String(_) => 3,
        }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

#[derive(Debug, Clone)]
pub struct SortedIndex {
    key_type: DataType,
    entries: BTreeMap<IndexKey, Vec<RecordId>>,
    len: usize,
}

impl SortedIndex {
    pub fn new(key_type: DataType) -> Self {
        Self {
            key_type,
            entries: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn key_type(&self) -> DataType {
        self.key_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, key: Value, rid: RecordId) {
        self.entries.entry(IndexKey::new(key)).or_default().push(rid);
        self.len += 1;
    }

    /// Record ids whose key equals `key`.
    pub fn lookup(&self, key: &Value) -> Vec<RecordId> {
        self.entries
            .get(&IndexKey::new(key.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// All record ids in ascending key order.
    pub fn scan_all(&self) -> Vec<RecordId> {
        self.entries.values().flatten().copied().collect()
    }

    /// Record ids whose key is at least `start`, in ascending key order.
    pub fn scan_from(&self, start: &Value) -> Vec<RecordId> {
        self.entries
            .range(IndexKey::new(start.clone())..)
            .flat_map(|(_, rids)| rids.iter().copied())
            .collect()
    }

    /// Leaf pages needed at one page per leaf, plus a root above them.
    pub fn num_pages(&self) -> usize {
        let per_leaf = (PAGE_SIZE / (self.key_type.size() + RecordId::SIZE)).max(1);
        let leaves = self.len.div_ceil(per_leaf).max(1);
        if leaves > 1 {
            leaves + 1
        } else {
            leaves
        }
    }
}

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use relq_stats::TableStats;
use relq_storage::{IndexKey, Storage};
use relq_types::{Row, Schema, Tuple, Value};
use tracing::debug;

use super::{concat, JoinCore, JoinType, TempTable};
use crate::scan::read_table;
use crate::{ExecResult, ExecutorError, Operator, OperatorKind};

/// Partitioning passes after the first before a pair is joined in memory
/// regardless of its size.
const MAX_DEPTH: u32 = 4;

/// Grace hash join.
///
/// Both inputs are hashed into `B - 1` temporary partitions. A pair of
/// partitions whose combined size still exceeds the buffer budget is
/// partitioned again with a different hash; otherwise the smaller side is
/// loaded into memory and probed with the other.
pub struct GraceHashJoin {
    core: JoinCore,
    partitions: usize,
    state: Option<HashState>,
}

struct PartitionPair {
    left: TempTable,
    right: TempTable,
    depth: u32,
}

#[derive(Default)]
struct HashState {
    pending: VecDeque<PartitionPair>,
    output: VecDeque<Row>,
}

fn partition_of(value: &Value, depth: u32, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    depth.hash(&mut hasher);
    match value {
        Value::Bool(b) => b.hash(&mut hasher),
        Value::Int(i) => i.hash(&mut hasher),
        Value::Float(f) => {
            let f = if *f == 0.0 { 0.0f32 } else { *f };
            f.to_bits().hash(&mut hasher)
        }
        Value::String(s) => s.hash(&mut hasher),
    }
    (hasher.finish() % partitions as u64) as usize
}

impl GraceHashJoin {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        left_column: &str,
        right_column: &str,
        storage: Rc<dyn Storage>,
    ) -> ExecResult<Self> {
        let partitions = storage.buffer_pages().saturating_sub(1).max(2);
        let core = JoinCore::new(left, right, left_column, right_column, storage)?;
        Ok(Self {
            core,
            partitions,
            state: None,
        })
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    fn create_partitions(&self, schema: &Schema, side: &str) -> ExecResult<Vec<TempTable>> {
        (0..self.partitions)
            .map(|_| TempTable::create(&self.core.storage, schema, side))
            .collect()
    }

    /// Pair up partitions, dropping pairs where either side is empty.
    fn enqueue(
        &self,
        state: &mut HashState,
        left: Vec<TempTable>,
        right: Vec<TempTable>,
        depth: u32,
    ) -> ExecResult<()> {
        for (left, right) in left.into_iter().zip(right) {
            if left.num_records()? == 0 || right.num_records()? == 0 {
                left.release()?;
                right.release()?;
                continue;
            }
            state.pending.push_back(PartitionPair { left, right, depth });
        }
        Ok(())
    }

    fn partition_inputs(&mut self) -> ExecResult<HashState> {
        let left = self.create_partitions(self.core.left.schema(), "hashleft")?;
        let right = self.create_partitions(self.core.right.schema(), "hashright")?;
        for (source, index, targets) in [
            (&mut self.core.left, self.core.left_index, &left),
            (&mut self.core.right, self.core.right_index, &right),
        ] {
            source.open()?;
            while let Some(tuple) = source.next()? {
                if let Tuple::Row(row) = tuple {
                    targets[partition_of(&row[index], 0, self.partitions)].add(row)?;
                }
            }
            source.close()?;
        }
        let mut state = HashState::default();
        self.enqueue(&mut state, left, right, 0)?;
        Ok(state)
    }

    fn repartition(&self, state: &mut HashState, pair: PartitionPair) -> ExecResult<()> {
        let depth = pair.depth + 1;
        let storage = self.core.storage.as_ref();
        let left = self.create_partitions(self.core.left.schema(), "hashleft")?;
        let right = self.create_partitions(self.core.right.schema(), "hashright")?;
        for row in read_table(storage, pair.left.name(), self.core.left.schema())? {
            left[partition_of(&row[self.core.left_index], depth, self.partitions)].add(row)?;
        }
        for row in read_table(storage, pair.right.name(), self.core.right.schema())? {
            right[partition_of(&row[self.core.right_index], depth, self.partitions)].add(row)?;
        }
        pair.left.release()?;
        pair.right.release()?;
        self.enqueue(state, left, right, depth)
    }

    /// Build a hash table on the smaller side of the pair and probe it with
    /// the other, appending matches to the output.
    fn build_and_probe(&self, state: &mut HashState, pair: PartitionPair) -> ExecResult<()> {
        let storage = self.core.storage.as_ref();
        let left_rows = read_table(storage, pair.left.name(), self.core.left.schema())?;
        let right_rows = read_table(storage, pair.right.name(), self.core.right.schema())?;
        pair.left.release()?;
        pair.right.release()?;

        let build_left = left_rows.len() <= right_rows.len();
        let (build, build_index, probe, probe_index) = if build_left {
            (left_rows, self.core.left_index, right_rows, self.core.right_index)
        } else {
            (right_rows, self.core.right_index, left_rows, self.core.left_index)
        };
        let mut table: BTreeMap<IndexKey, Vec<Row>> = BTreeMap::new();
        for row in build {
            table.entry(IndexKey::new(row[build_index].clone())).or_default().push(row);
        }
        for row in probe {
            let Some(matches) = table.get(&IndexKey::new(row[probe_index].clone())) else {
                continue;
            };
            for other in matches {
                let (left, right) = if build_left { (other, &row) } else { (&row, other) };
                if self.core.matches(left, right)? {
                    state.output.push_back(concat(left, right));
                }
            }
        }
        Ok(())
    }

    /// Process pending partition pairs until output is available or none
    /// remain.
    fn fill(&self, state: &mut HashState) -> ExecResult<bool> {
        while state.output.is_empty() {
            let Some(pair) = state.pending.pop_front() else {
                return Ok(false);
            };
            let pages = pair.left.num_pages()? + pair.right.num_pages()?;
            if pages > self.core.storage.buffer_pages() && pair.depth < MAX_DEPTH {
                debug!(pages, depth = pair.depth, "repartitioning oversized partition pair");
                self.repartition(state, pair)?;
            } else {
                self.build_and_probe(state, pair)?;
            }
        }
        Ok(true)
    }
}

impl Operator for GraceHashJoin {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Join(JoinType::GraceHash)
    }

    fn schema(&self) -> &Schema {
        &self.core.schema
    }

    fn stats(&self) -> &TableStats {
        &self.core.stats
    }

    fn io_cost(&self) -> u64 {
        3 * (self.core.left_pages() + self.core.right_pages())
    }

    fn sources(&self) -> Vec<&dyn Operator> {
        self.core.sources()
    }

    fn describe(&self) -> String {
        self.core.describe()
    }

    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(Self {
            core: self.core.boxed_clone(),
            partitions: self.partitions,
            state: None,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        self.state = None;
        let state = self.partition_inputs()?;
        debug!(
            partitions = self.partitions,
            pairs = state.pending.len(),
            "partitioned grace hash join inputs"
        );
        self.state = Some(state);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        let mut state = self.state.take().ok_or(ExecutorError::NotOpen)?;
        let result = self.fill(&mut state);
        let row = state.output.pop_front();
        self.state = Some(state);
        result?;
        Ok(row.map(Tuple::Row))
    }

    fn close(&mut self) -> ExecResult<()> {
        if let Some(state) = self.state.take() {
            for pair in state.pending {
                pair.left.release()?;
                pair.right.release()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::{execute, SeqScan};

    fn scan(catalog: &Rc<relq_storage::Catalog>, table: &str) -> Box<dyn Operator> {
        Box::new(SeqScan::new(storage(catalog), table).unwrap())
    }

    fn temp_files(catalog: &relq_storage::Catalog) -> usize {
        std::fs::read_dir(catalog.dir())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with("hash"))
            .count()
    }

    #[test]
    fn partition_count_follows_the_buffer_budget() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "a", (0..10).map(row));
        let join = GraceHashJoin::new(scan(&catalog, "a"), scan(&catalog, "a"), "int", "int", storage(&catalog)).unwrap();
        assert_eq!(join.partitions(), 4);
    }

    #[test]
    fn partitioning_is_stable_and_depth_dependent() {
        let values: Vec<Value> = (0..64).map(Value::Int).collect();
        let first: Vec<usize> = values.iter().map(|v| partition_of(v, 0, 4)).collect();
        let again: Vec<usize> = values.iter().map(|v| partition_of(v, 0, 4)).collect();
        let deeper: Vec<usize> = values.iter().map(|v| partition_of(v, 1, 4)).collect();
        assert_eq!(first, again);
        assert_ne!(first, deeper);
        assert!(first.iter().all(|&p| p < 4));
        assert_eq!(partition_of(&Value::Float(0.0), 0, 4), partition_of(&Value::Float(-0.0), 0, 4));
    }

    #[test]
    fn large_inputs_are_repartitioned() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "a", (0..3000).map(row));
        table_with(&catalog, "b", (0..3000).rev().map(row));
        let mut join = GraceHashJoin::new(scan(&catalog, "a"), scan(&catalog, "b"), "int", "int", storage(&catalog)).unwrap();
        let mut keys: Vec<i32> = execute(&mut join)
            .unwrap()
            .into_iter()
            .filter_map(Tuple::into_row)
            .map(|r| {
                assert_eq!(r[1], r[5]);
                r[1].as_int().unwrap()
            })
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..3000).collect::<Vec<_>>());
        assert_eq!(temp_files(&catalog), 0);
    }

    #[test]
    fn skewed_keys_stop_repartitioning() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "a", (0..1200).map(|_| row(1)));
        table_with(&catalog, "b", [row(1), row(2)]);
        let mut join = GraceHashJoin::new(scan(&catalog, "a"), scan(&catalog, "b"), "int", "int", storage(&catalog)).unwrap();
        let out = execute(&mut join).unwrap();
        assert_eq!(out.len(), 1200);
        assert_eq!(temp_files(&catalog), 0);
    }

    #[test]
    fn output_keeps_left_columns_first_when_building_on_the_right() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "a", (0..50).map(row));
        table_with(&catalog, "b", [row(7)]);
        let mut join = GraceHashJoin::new(scan(&catalog, "a"), scan(&catalog, "b"), "int", "int", storage(&catalog)).unwrap();
        let out = execute(&mut join).unwrap();
        assert_eq!(out, vec![Tuple::Row(concat(&row(7), &row(7)))]);
        assert_eq!(join.schema().name(0), Some("a.bool"));
    }

    #[test]
    fn closing_early_releases_partitions() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "a", (0..100).map(row));
        let mut join = GraceHashJoin::new(scan(&catalog, "a"), scan(&catalog, "a"), "a.int", "a.int", storage(&catalog)).unwrap();
        join.open().unwrap();
        assert!(join.next().unwrap().is_some());
        assert!(temp_files(&catalog) > 0);
        join.close().unwrap();
        assert_eq!(temp_files(&catalog), 0);
    }
}

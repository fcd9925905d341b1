//! Equi-join operators.
//!
//! All joins emit the left row's values followed by the right row's, and
//! ignore group markers coming from their inputs. Output order is specific
//! to each algorithm.

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use relq_stats::TableStats;
use relq_storage::Storage;
use relq_types::{Row, Schema};
use tracing::warn;

use crate::{resolve_column, ExecResult, ExecutorError, Operator};

mod block;
mod grace_hash;
mod nested_loop;

pub use block::BlockJoin;
pub use grace_hash::GraceHashJoin;
pub use nested_loop::NestedLoopJoin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Snlj,
    Pnlj,
    Bnlj,
    GraceHash,
}

impl JoinType {
    /// Every algorithm, in the order the planner tries them.
    pub const ALL: [JoinType; 4] = [
        JoinType::Snlj,
        JoinType::Pnlj,
        JoinType::Bnlj,
        JoinType::GraceHash,
    ];
}

impl Display for JoinType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JoinType::Snlj => "SNLJ",
            JoinType::Pnlj => "PNLJ",
            JoinType::Bnlj => "BNLJ",
            JoinType::GraceHash => "GRACEHASH",
        })
    }
}

/// Build a join of the given algorithm.
pub fn build_join(
    join_type: JoinType,
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    left_column: &str,
    right_column: &str,
    storage: Rc<dyn Storage>,
) -> ExecResult<Box<dyn Operator>> {
    Ok(match join_type {
        JoinType::Snlj => Box::new(NestedLoopJoin::new(left, right, left_column, right_column, storage)?),
        JoinType::Pnlj => Box::new(BlockJoin::page_nested(left, right, left_column, right_column, storage)?),
        JoinType::Bnlj => Box::new(BlockJoin::block_nested(left, right, left_column, right_column, storage)?),
        JoinType::GraceHash => Box::new(GraceHashJoin::new(left, right, left_column, right_column, storage)?),
    })
}

/// Inputs, join columns, and derived plan properties shared by every join.
pub(crate) struct JoinCore {
    pub(crate) left: Box<dyn Operator>,
    pub(crate) right: Box<dyn Operator>,
    pub(crate) left_index: usize,
    pub(crate) right_index: usize,
    pub(crate) schema: Schema,
    pub(crate) stats: TableStats,
    pub(crate) storage: Rc<dyn Storage>,
}

impl JoinCore {
    pub(crate) fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        left_column: &str,
        right_column: &str,
        storage: Rc<dyn Storage>,
    ) -> ExecResult<Self> {
        let left_index = resolve_column(left.schema(), left_column)?;
        let right_index = resolve_column(right.schema(), right_column)?;
        let left_type = left.schema().fields()[left_index].data_type;
        let right_type = right.schema().fields()[right_index].data_type;
        if !left_type.same_kind(&right_type) {
            return Err(ExecutorError::planning(format!(
                "Mismatched types of columns {left_column} and {right_column}: {left_type} and {right_type}"
            )));
        }
        let schema = left.schema().concat(right.schema());
        let stats = left.stats().copy_with_join(left_index, right.stats(), right_index);
        Ok(Self {
            left,
            right,
            left_index,
            right_index,
            schema,
            stats,
            storage,
        })
    }

    pub(crate) fn left_pages(&self) -> u64 {
        self.left.stats().num_pages() as u64
    }

    pub(crate) fn right_pages(&self) -> u64 {
        self.right.stats().num_pages() as u64
    }

    pub(crate) fn left_records(&self) -> u64 {
        self.left.stats().num_records() as u64
    }

    pub(crate) fn sources(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "leftColumn: {}\nrightColumn: {}",
            self.left.schema().name(self.left_index).unwrap_or_default(),
            self.right.schema().name(self.right_index).unwrap_or_default()
        )
    }

    pub(crate) fn matches(&self, left: &Row, right: &Row) -> ExecResult<bool> {
        Ok(left[self.left_index]
            .compare(&right[self.right_index])?
            .is_eq())
    }

    pub(crate) fn boxed_clone(&self) -> Self {
        Self {
            left: self.left.boxed_clone(),
            right: self.right.boxed_clone(),
            left_index: self.left_index,
            right_index: self.right_index,
            schema: self.schema.clone(),
            stats: self.stats.clone(),
            storage: Rc::clone(&self.storage),
        }
    }
}

pub(crate) fn concat(left: &Row, right: &Row) -> Row {
    let mut out = Vec::with_capacity(left.len() + right.len());
    out.extend_from_slice(left);
    out.extend_from_slice(right);
    out
}

/// A temporary table dropped from storage when the guard goes away.
pub(crate) struct TempTable {
    storage: Rc<dyn Storage>,
    name: String,
    released: bool,
}

impl TempTable {
    pub(crate) fn create(storage: &Rc<dyn Storage>, schema: &Schema, prefix: &str) -> ExecResult<Self> {
        let name = storage.create_temp_table(schema, prefix)?;
        Ok(Self {
            storage: Rc::clone(storage),
            name,
            released: false,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn add(&self, row: Row) -> ExecResult<()> {
        self.storage.add_record(&self.name, row)?;
        Ok(())
    }

    pub(crate) fn num_pages(&self) -> ExecResult<usize> {
        Ok(self.storage.num_pages(&self.name)?)
    }

    pub(crate) fn num_records(&self) -> ExecResult<usize> {
        Ok(self.storage.num_records(&self.name)?)
    }

    pub(crate) fn release(mut self) -> ExecResult<()> {
        self.released = true;
        self.storage.drop_temp_table(&self.name)?;
        Ok(())
    }
}

impl Drop for TempTable {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.storage.drop_temp_table(&self.name) {
            warn!(table = %self.name, error = %err, "failed to release temporary table");
        }
    }
}

/// A join input readable page by page: either the table under a sequential
/// scan, or a temporary copy of any other operator's output.
pub(crate) enum PagedInput {
    Table(String),
    Temp(TempTable),
}

impl PagedInput {
    pub(crate) fn materialize(source: &mut dyn Operator, storage: &Rc<dyn Storage>) -> ExecResult<Self> {
        if let Some(table) = source.scanned_table() {
            return Ok(PagedInput::Table(table.to_string()));
        }
        let temp = TempTable::create(storage, source.schema(), "materialized")?;
        source.open()?;
        while let Some(tuple) = source.next()? {
            if let Some(row) = tuple.into_row() {
                temp.add(row)?;
            }
        }
        source.close()?;
        Ok(PagedInput::Temp(temp))
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            PagedInput::Table(name) => name,
            PagedInput::Temp(temp) => temp.name(),
        }
    }
}

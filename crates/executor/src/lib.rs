//! Query executor: physical operators over the storage layer.
//!
//! Operators follow the Volcano iterator model. A parent opens its children,
//! pulls [`Tuple`]s from them one at a time, and closes them when done.
//! Every operator computes its output schema, estimated [`TableStats`], and
//! estimated I/O cost once, at construction, and fails construction with a
//! planning error when a column cannot be resolved.
//!
//! Operators share one [`Storage`] handle through an `Rc`; a plan runs on a
//! single thread.

use std::fmt::{Display, Formatter};

use relq_stats::TableStats;
use relq_storage::StorageError;
use relq_types::{Row, Schema, Tuple, TypeError};
use thiserror::Error;

pub mod filter;
pub mod group_by;
pub mod join;
pub mod scan;
pub mod select;

pub use filter::Where;
pub use group_by::GroupBy;
pub use join::{build_join, BlockJoin, GraceHashJoin, JoinType, NestedLoopJoin};
pub use scan::{IndexScan, SeqScan};
pub use select::{Aggregates, Select};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("unknown column {0}")]
    UnknownColumn(String),

    #[error("ambiguous column {0}")]
    AmbiguousColumn(String),

    #[error("{0}")]
    Planning(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("operator is not open")]
    NotOpen,
}

impl ExecutorError {
    pub fn planning(message: impl Into<String>) -> Self {
        Self::Planning(message.into())
    }

    /// Storage failures met while a plan is being built are reported as
    /// planning errors.
    pub fn while_planning(err: StorageError) -> Self {
        Self::Planning(err.to_string())
    }

    /// True for errors raised while building a plan rather than running it.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Self::UnknownColumn(_) | Self::AmbiguousColumn(_) | Self::Planning(_)
        )
    }
}

pub type ExecResult<T> = Result<T, ExecutorError>;

/// Resolve `column` against `schema`, reporting misses as planning errors.
pub fn resolve_column(schema: &Schema, column: &str) -> ExecResult<usize> {
    schema.column_index(column).map_err(|err| match err {
        TypeError::ColumnNotFound(name) => ExecutorError::UnknownColumn(name),
        TypeError::AmbiguousColumn(name) => ExecutorError::AmbiguousColumn(name),
        other => ExecutorError::Type(other),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Join(JoinType),
    Select,
    Where,
    GroupBy,
    SeqScan,
    IndexScan,
}

impl Display for OperatorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorKind::Join(join_type) => write!(f, "{join_type}"),
            OperatorKind::Select => f.write_str("SELECT"),
            OperatorKind::Where => f.write_str("WHERE"),
            OperatorKind::GroupBy => f.write_str("GROUPBY"),
            OperatorKind::SeqScan => f.write_str("SEQSCAN"),
            OperatorKind::IndexScan => f.write_str("INDEXSCAN"),
        }
    }
}

pub trait Operator {
    fn kind(&self) -> OperatorKind;

    fn schema(&self) -> &Schema;

    /// Estimated statistics of the output.
    fn stats(&self) -> &TableStats;

    /// Estimated page I/Os to produce the whole output.
    fn io_cost(&self) -> u64;

    /// Child operators, left before right.
    fn sources(&self) -> Vec<&dyn Operator>;

    /// Operator-specific lines of the plan rendering, without the type line.
    fn describe(&self) -> String;

    /// The table read page by page when this is a sequential scan.
    fn scanned_table(&self) -> Option<&str> {
        None
    }

    /// An unopened copy of this subtree.
    fn boxed_clone(&self) -> Box<dyn Operator>;

    fn open(&mut self) -> ExecResult<()>;
    fn next(&mut self) -> ExecResult<Option<Tuple>>;
    fn close(&mut self) -> ExecResult<()>;
}

impl Clone for Box<dyn Operator> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Run an operator to completion and collect its output.
pub fn execute(op: &mut dyn Operator) -> ExecResult<Vec<Tuple>> {
    op.open()?;
    let mut out = Vec::new();
    loop {
        match op.next() {
            Ok(Some(tuple)) => out.push(tuple),
            Ok(None) => break,
            Err(err) => {
                let _ = op.close();
                return Err(err);
            }
        }
    }
    op.close()?;
    Ok(out)
}

/// Lazy, owning iteration over an operator tree.
///
/// The root is opened on the first pull and closed once it is exhausted,
/// fails, or the iterator is dropped.
pub struct Rows {
    root: Box<dyn Operator>,
    opened: bool,
    finished: bool,
}

pub fn iterate(root: Box<dyn Operator>) -> Rows {
    Rows {
        root,
        opened: false,
        finished: false,
    }
}

impl Rows {
    pub fn root(&self) -> &dyn Operator {
        self.root.as_ref()
    }

    /// Drain the remaining output, dropping group markers.
    pub fn into_rows(self) -> ExecResult<Vec<Row>> {
        let mut rows = Vec::new();
        for tuple in self {
            if let Some(row) = tuple?.into_row() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn finish(&mut self) -> ExecResult<()> {
        self.finished = true;
        if self.opened {
            self.opened = false;
            self.root.close()?;
        }
        Ok(())
    }
}

impl Iterator for Rows {
    type Item = ExecResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if !self.opened {
            if let Err(err) = self.root.open() {
                self.finished = true;
                return Some(Err(err));
            }
            self.opened = true;
        }
        match self.root.next() {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => self.finish().err().map(Err),
            Err(err) => {
                let _ = self.finish();
                Some(Err(err))
            }
        }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if self.opened {
            let _ = self.root.close();
        }
    }
}

/// Nested text form of a plan.
///
/// Each operator contributes a `type:` line and its own description. A
/// single child follows, indented by one tab. A join lists `(left)` and
/// `(right)` subtrees separated by a blank line.
pub fn render(op: &dyn Operator) -> String {
    let mut out = format!("type: {}", op.kind());
    let description = op.describe();
    if !description.is_empty() {
        out.push('\n');
        out.push_str(&description);
    }
    match op.sources().as_slice() {
        [] => {}
        [left, right] => {
            out.push('\n');
            out.push_str(&indent(&format!("(left)\n{}", render(*left))));
            out.push_str("\n\n");
            out.push_str(&indent(&format!("(right)\n{}", render(*right))));
        }
        children => {
            for child in children {
                out.push('\n');
                out.push_str(&indent(&render(*child)));
            }
        }
    }
    out
}

fn indent(text: &str) -> String {
    text.split('\n')
        .map(|line| format!("\t{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

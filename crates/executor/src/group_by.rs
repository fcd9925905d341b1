use std::cmp::Ordering;
use std::collections::VecDeque;

use relq_stats::TableStats;
use relq_types::{Row, Schema, Tuple};

use crate::{resolve_column, ExecResult, ExecutorError, Operator, OperatorKind};

/// Sort-based grouping on one column.
///
/// The source is drained and stably sorted on open, so rows sharing a value
/// are contiguous and keep their source order. Every group, the last one
/// included, is followed by exactly one [`Tuple::Marker`].
pub struct GroupBy {
    source: Box<dyn Operator>,
    column_index: usize,
    output: Option<VecDeque<Tuple>>,
}

impl GroupBy {
    pub fn new(source: Box<dyn Operator>, column: &str) -> ExecResult<Self> {
        let column_index = resolve_column(source.schema(), column)?;
        Ok(Self {
            source,
            column_index,
            output: None,
        })
    }

    fn drain_source(&mut self) -> ExecResult<Vec<Row>> {
        self.source.open()?;
        let mut rows = Vec::new();
        while let Some(tuple) = self.source.next()? {
            if let Tuple::Row(row) = tuple {
                rows.push(row);
            }
        }
        self.source.close()?;
        Ok(rows)
    }
}

impl Operator for GroupBy {
    fn kind(&self) -> OperatorKind {
        OperatorKind::GroupBy
    }

    fn schema(&self) -> &Schema {
        self.source.schema()
    }

    fn stats(&self) -> &TableStats {
        self.source.stats()
    }

    fn io_cost(&self) -> u64 {
        self.source.io_cost()
    }

    fn sources(&self) -> Vec<&dyn Operator> {
        vec![self.source.as_ref()]
    }

    fn describe(&self) -> String {
        format!(
            "column: {}",
            self.source.schema().name(self.column_index).unwrap_or_default()
        )
    }

    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(Self {
            source: self.source.boxed_clone(),
            column_index: self.column_index,
            output: None,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        let mut rows = self.drain_source()?;
        let idx = self.column_index;
        // Values of one column share a kind, so the comparison cannot fail.
        rows.sort_by(|a, b| a[idx].compare(&b[idx]).unwrap_or(Ordering::Equal));

        let mut output = VecDeque::with_capacity(rows.len() * 2);
        let mut rows = rows.into_iter().peekable();
        while let Some(row) = rows.next() {
            let ends_group = match rows.peek() {
                Some(next) => !row[idx].compare(&next[idx])?.is_eq(),
                None => true,
            };
            output.push_back(Tuple::Row(row));
            if ends_group {
                output.push_back(Tuple::Marker);
            }
        }
        self.output = Some(output);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        let output = self.output.as_mut().ok_or(ExecutorError::NotOpen)?;
        Ok(output.pop_front())
    }

    fn close(&mut self) -> ExecResult<()> {
        self.output = None;
        Ok(())
    }
}

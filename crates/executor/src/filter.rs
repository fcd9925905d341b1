use relq_stats::TableStats;
use relq_types::{PredicateOperator, Schema, Tuple, Value};

use crate::{resolve_column, ExecResult, ExecutorError, Operator, OperatorKind};

/// Keeps the rows of its source satisfying `column <op> value`.
///
/// Group markers pass through untouched. Filtering adds no I/O, so the cost
/// is the source's.
pub struct Where {
    source: Box<dyn Operator>,
    column_index: usize,
    op: PredicateOperator,
    value: Value,
    stats: TableStats,
    open: bool,
}

impl Where {
    pub fn new(
        source: Box<dyn Operator>,
        column: &str,
        op: PredicateOperator,
        value: Value,
    ) -> ExecResult<Self> {
        let column_index = resolve_column(source.schema(), column)?;
        let column_type = source.schema().fields()[column_index].data_type;
        if !value.data_type().same_kind(&column_type) {
            return Err(ExecutorError::planning(format!(
                "cannot compare column {column} of type {column_type} with {}",
                value.data_type()
            )));
        }
        let value = value.conform_to(&column_type);
        let stats = source.stats().copy_with_predicate(column_index, op, &value)?;
        Ok(Self {
            source,
            column_index,
            op,
            value,
            stats,
            open: false,
        })
    }

    fn column_name(&self) -> &str {
        self.source.schema().name(self.column_index).unwrap_or_default()
    }
}

impl Operator for Where {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Where
    }

    fn schema(&self) -> &Schema {
        self.source.schema()
    }

    fn stats(&self) -> &TableStats {
        &self.stats
    }

    fn io_cost(&self) -> u64 {
        self.source.io_cost()
    }

    fn sources(&self) -> Vec<&dyn Operator> {
        vec![self.source.as_ref()]
    }

    fn describe(&self) -> String {
        format!(
            "column: {}\npredicate: {}\nvalue: {}",
            self.column_name(),
            self.op,
            self.value
        )
    }

    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(Self {
            source: self.source.boxed_clone(),
            column_index: self.column_index,
            op: self.op,
            value: self.value.clone(),
            stats: self.stats.clone(),
            open: false,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        self.source.open()?;
        self.open = true;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        if !self.open {
            return Err(ExecutorError::NotOpen);
        }
        while let Some(tuple) = self.source.next()? {
            let keep = match &tuple {
                Tuple::Marker => true,
                Tuple::Row(row) => self.op.accepts(row[self.column_index].compare(&self.value)?),
            };
            if keep {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> ExecResult<()> {
        if self.open {
            self.open = false;
            self.source.close()?;
        }
        Ok(())
    }
}

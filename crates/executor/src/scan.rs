//! Leaf operators reading a stored table.

use std::collections::VecDeque;
use std::rc::Rc;

use relq_stats::TableStats;
use relq_storage::{HeapPage, PageNum, Storage};
use relq_types::{PredicateOperator, RecordId, Row, Schema, Tuple, Value};

use crate::{resolve_column, ExecResult, ExecutorError, Operator, OperatorKind};

/// Decode every live slot of a page image.
pub(crate) fn decode_page(schema: &Schema, page: &HeapPage) -> ExecResult<Vec<Row>> {
    page.live_slots()
        .filter_map(|slot| page.entry(slot))
        .map(|bytes| schema.decode(bytes).map_err(ExecutorError::from))
        .collect()
}

/// Read every row of a stored table in page order.
pub(crate) fn read_table(storage: &dyn Storage, table: &str, schema: &Schema) -> ExecResult<Vec<Row>> {
    let mut rows = Vec::new();
    for page_num in storage.page_nums(table)? {
        rows.extend(decode_page(schema, &storage.read_page(table, page_num)?)?);
    }
    Ok(rows)
}

struct ScanCursor {
    pages: VecDeque<PageNum>,
    buffered: VecDeque<Row>,
}

/// Streams every row of a table in physical order, one page at a time.
pub struct SeqScan {
    storage: Rc<dyn Storage>,
    table: String,
    schema: Schema,
    stats: TableStats,
    cost: u64,
    cursor: Option<ScanCursor>,
}

impl SeqScan {
    pub fn new(storage: Rc<dyn Storage>, table: &str) -> ExecResult<Self> {
        let schema = storage.schema(table).map_err(ExecutorError::while_planning)?;
        let stats = storage.stats(table).map_err(ExecutorError::while_planning)?;
        let cost = storage.num_pages(table).map_err(ExecutorError::while_planning)? as u64;
        Ok(Self {
            storage,
            table: table.to_string(),
            schema,
            stats,
            cost,
            cursor: None,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Operator for SeqScan {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SeqScan
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn stats(&self) -> &TableStats {
        &self.stats
    }

    fn io_cost(&self) -> u64 {
        self.cost
    }

    fn sources(&self) -> Vec<&dyn Operator> {
        Vec::new()
    }

    fn describe(&self) -> String {
        format!("table: {}", self.table)
    }

    fn scanned_table(&self) -> Option<&str> {
        Some(&self.table)
    }

    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(Self {
            storage: Rc::clone(&self.storage),
            table: self.table.clone(),
            schema: self.schema.clone(),
            stats: self.stats.clone(),
            cost: self.cost,
            cursor: None,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        self.cursor = Some(ScanCursor {
            pages: self.storage.page_nums(&self.table)?.into(),
            buffered: VecDeque::new(),
        });
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        let cursor = self.cursor.as_mut().ok_or(ExecutorError::NotOpen)?;
        loop {
            if let Some(row) = cursor.buffered.pop_front() {
                return Ok(Some(Tuple::Row(row)));
            }
            let Some(page_num) = cursor.pages.pop_front() else {
                return Ok(None);
            };
            let page = self.storage.read_page(&self.table, page_num)?;
            cursor.buffered = decode_page(&self.schema, &page)?.into();
        }
    }

    fn close(&mut self) -> ExecResult<()> {
        self.cursor = None;
        Ok(())
    }
}

struct IndexCursor {
    rids: VecDeque<RecordId>,
    exhausted: bool,
}

/// Reads the rows matching `column <op> value` through an index on `column`.
pub struct IndexScan {
    storage: Rc<dyn Storage>,
    table: String,
    column: String,
    column_index: usize,
    op: PredicateOperator,
    value: Value,
    schema: Schema,
    stats: TableStats,
    cost: u64,
    cursor: Option<IndexCursor>,
}

impl IndexScan {
    pub fn new(
        storage: Rc<dyn Storage>,
        table: &str,
        column: &str,
        op: PredicateOperator,
        value: Value,
    ) -> ExecResult<Self> {
        let schema = storage.schema(table).map_err(ExecutorError::while_planning)?;
        let column_index = resolve_column(&schema, column)?;
        if !storage.index_exists(table, column) {
            return Err(ExecutorError::planning(format!(
                "no index on {table}.{column}"
            )));
        }
        if op == PredicateOperator::NotEquals {
            return Err(ExecutorError::planning(
                "index scans do not support NOT_EQUALS",
            ));
        }
        let column_type = schema.fields()[column_index].data_type;
        if !value.data_type().same_kind(&column_type) {
            return Err(ExecutorError::planning(format!(
                "cannot compare column {column} of type {column_type} with {}",
                value.data_type()
            )));
        }
        let value = value.conform_to(&column_type);

        let table_stats = storage.stats(table).map_err(ExecutorError::while_planning)?;
        let reduction = table_stats.reduction_factor(column_index, op, &value)?;
        let stats = table_stats.copy_with_predicate(column_index, op, &value)?;
        let records = storage.num_records(table).map_err(ExecutorError::while_planning)?;
        let index_pages = storage
            .num_index_pages(table, column)
            .map_err(ExecutorError::while_planning)?;
        let cost = ((records + index_pages) as f64 * reduction).ceil() as u64;

        Ok(Self {
            storage,
            table: table.to_string(),
            column: column.to_string(),
            column_index,
            op,
            value,
            schema,
            stats,
            cost,
            cursor: None,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn predicate(&self) -> PredicateOperator {
        self.op
    }
}

impl Operator for IndexScan {
    fn kind(&self) -> OperatorKind {
        OperatorKind::IndexScan
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn stats(&self) -> &TableStats {
        &self.stats
    }

    fn io_cost(&self) -> u64 {
        self.cost
    }

    fn sources(&self) -> Vec<&dyn Operator> {
        Vec::new()
    }

    fn describe(&self) -> String {
        format!(
            "table: {}\ncolumn: {}\noperator: {}\nvalue: {}",
            self.table, self.column, self.op, self.value
        )
    }

    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(Self {
            storage: Rc::clone(&self.storage),
            table: self.table.clone(),
            column: self.column.clone(),
            column_index: self.column_index,
            op: self.op,
            value: self.value.clone(),
            schema: self.schema.clone(),
            stats: self.stats.clone(),
            cost: self.cost,
            cursor: None,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        let storage = &self.storage;
        let rids = match self.op {
            PredicateOperator::Equals => storage.lookup_key(&self.table, &self.column, &self.value)?,
            PredicateOperator::LessThan | PredicateOperator::LessThanEquals => {
                storage.sorted_scan(&self.table, &self.column)?
            }
            PredicateOperator::GreaterThan | PredicateOperator::GreaterThanEquals => {
                storage.sorted_scan_from(&self.table, &self.column, &self.value)?
            }
            PredicateOperator::NotEquals => {
                return Err(ExecutorError::planning(
                    "index scans do not support NOT_EQUALS",
                ))
            }
        };
        self.cursor = Some(IndexCursor {
            rids: rids.into(),
            exhausted: false,
        });
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        let cursor = self.cursor.as_mut().ok_or(ExecutorError::NotOpen)?;
        while !cursor.exhausted {
            let Some(rid) = cursor.rids.pop_front() else {
                cursor.exhausted = true;
                break;
            };
            let row = self.storage.fetch(&self.table, rid)?;
            let ordering = row[self.column_index].compare(&self.value)?;
            match self.op {
                PredicateOperator::LessThan | PredicateOperator::LessThanEquals => {
                    if !self.op.accepts(ordering) {
                        // Ascending scan: nothing after this can satisfy the bound.
                        cursor.exhausted = true;
                        break;
                    }
                }
                PredicateOperator::GreaterThan if ordering.is_eq() => continue,
                _ => {}
            }
            return Ok(Some(Tuple::Row(row)));
        }
        Ok(None)
    }

    fn close(&mut self) -> ExecResult<()> {
        self.cursor = None;
        Ok(())
    }
}

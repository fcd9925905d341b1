//! Projection and streaming aggregation.
//!
//! Without aggregates, `Select` projects each row onto the requested columns
//! and forwards group markers. With aggregates, it folds each run of rows
//! between markers into one output row: the projected values of the run's
//! first row followed by COUNT, SUM and AVG, in that order, for whichever are
//! requested.

use relq_stats::TableStats;
use relq_types::{DataType, Row, Schema, Tuple, Value};

use crate::{resolve_column, ExecResult, ExecutorError, Operator, OperatorKind};

pub const COUNT_COLUMN: &str = "countAgg";
pub const SUM_COLUMN: &str = "sumAgg";
pub const AVERAGE_COLUMN: &str = "averageAgg";

/// Aggregates requested alongside a projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub count: bool,
    pub sum: Option<String>,
    pub average: Option<String>,
}

impl Aggregates {
    pub fn is_empty(&self) -> bool {
        !self.count && self.sum.is_none() && self.average.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SumKind {
    Int,
    Float,
}

#[derive(Debug, Default)]
struct Accumulator {
    leading: Option<Row>,
    count: i64,
    int_sum: i64,
    float_sum: f64,
    avg_sum: f64,
    avg_count: u64,
}

#[derive(Debug, Default)]
struct RunState {
    acc: Accumulator,
    /// Rows folded since the last emitted aggregate row.
    pending: bool,
    seen_row: bool,
    seen_marker: bool,
    finished: bool,
}

pub struct Select {
    source: Box<dyn Operator>,
    /// The source emits group markers, so empty input means no groups.
    grouped: bool,
    indices: Vec<usize>,
    aggregates: Aggregates,
    sum: Option<(usize, SumKind)>,
    average: Option<usize>,
    schema: Schema,
    state: Option<RunState>,
}

impl Select {
    pub fn new(source: Box<dyn Operator>, columns: Vec<String>, aggregates: Aggregates) -> ExecResult<Self> {
        if columns.is_empty() && aggregates.is_empty() {
            return Err(ExecutorError::planning("Cannot select no columns"));
        }
        let input = source.schema();
        let mut fields = Vec::with_capacity(columns.len() + 3);
        let mut indices = Vec::with_capacity(columns.len());
        for column in &columns {
            let idx = resolve_column(input, column)?;
            indices.push(idx);
            fields.push((column.clone(), input.fields()[idx].data_type));
        }

        if aggregates.count {
            fields.push((COUNT_COLUMN.to_string(), DataType::Int));
        }
        let sum = match &aggregates.sum {
            Some(column) => {
                let idx = resolve_column(input, column)?;
                let kind = match input.fields()[idx].data_type {
                    DataType::Int => SumKind::Int,
                    DataType::Float => SumKind::Float,
                    other => {
                        return Err(ExecutorError::planning(format!(
                            "Cannot compute sum over column {column} of type {other}"
                        )))
                    }
                };
                let output_type = match kind {
                    SumKind::Int => DataType::Int,
                    SumKind::Float => DataType::Float,
                };
                fields.push((SUM_COLUMN.to_string(), output_type));
                Some((idx, kind))
            }
            None => None,
        };
        let average = match &aggregates.average {
            Some(column) => {
                let idx = resolve_column(input, column)?;
                let data_type = input.fields()[idx].data_type;
                if !data_type.is_numeric() {
                    return Err(ExecutorError::planning(format!(
                        "Cannot compute average over column {column} of type {data_type}"
                    )));
                }
                fields.push((AVERAGE_COLUMN.to_string(), DataType::Float));
                Some(idx)
            }
            None => None,
        };

        Ok(Self {
            grouped: emits_markers(source.as_ref()),
            source,
            indices,
            aggregates,
            sum,
            average,
            schema: Schema::from_fields(fields),
            state: None,
        })
    }

    fn aggregating(&self) -> bool {
        !self.aggregates.is_empty()
    }

    fn project(&self, row: &Row) -> Row {
        self.indices.iter().map(|&idx| row[idx].clone()).collect()
    }

    fn fold(&self, acc: &mut Accumulator, row: &Row) -> ExecResult<()> {
        if acc.leading.is_none() {
            acc.leading = Some(self.project(row));
        }
        acc.count += 1;
        if let Some((idx, kind)) = self.sum {
            match (kind, &row[idx]) {
                (SumKind::Int, Value::Int(v)) => acc.int_sum += i64::from(*v),
                (_, value) => acc.float_sum += numeric(value)?,
            }
        }
        if let Some(idx) = self.average {
            acc.avg_sum += numeric(&row[idx])?;
            acc.avg_count += 1;
        }
        Ok(())
    }

    /// The output row for a finished run. Leading values fall back to zero
    /// values when the run saw no rows.
    fn emit(&self, acc: Accumulator) -> Row {
        let mut out = match acc.leading {
            Some(values) => values,
            None => self
                .schema
                .fields()
                .iter()
                .take(self.indices.len())
                .map(|f| zero_value(&f.data_type))
                .collect(),
        };
        if self.aggregates.count {
            out.push(Value::Int(saturate(acc.count)));
        }
        if let Some((_, kind)) = self.sum {
            out.push(match kind {
                SumKind::Int => Value::Int(saturate(acc.int_sum)),
                SumKind::Float => Value::Float(acc.float_sum as f32),
            });
        }
        if self.average.is_some() {
            let average = if acc.avg_count == 0 {
                0.0
            } else {
                acc.avg_sum / acc.avg_count as f64
            };
            out.push(Value::Float(average as f32));
        }
        out
    }
}

/// Whether group markers can reach the output of `op`. Joins drop markers,
/// so a grouping below a join does not count.
fn emits_markers(op: &dyn Operator) -> bool {
    match op.kind() {
        OperatorKind::GroupBy => true,
        OperatorKind::Join(_) => false,
        _ => op.sources().into_iter().any(emits_markers),
    }
}

fn numeric(value: &Value) -> ExecResult<f64> {
    value.as_f64().ok_or_else(|| {
        ExecutorError::planning(format!("cannot aggregate non-numeric value {value}"))
    })
}

fn saturate(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn zero_value(data_type: &DataType) -> Value {
    match data_type {
        DataType::Bool => Value::Bool(false),
        DataType::Int => Value::Int(0),
        DataType::Float => Value::Float(0.0),
        DataType::String(len) => Value::string("", *len),
    }
}

impl Operator for Select {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Select
    }

    fn schema(&self) -> &Schema {
        &self.schema
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
        let names: Vec<&str> = self.schema.fields().iter().map(|f| f.name.as_str()).collect();
        format!("columns: [{}]", names.join(", "))
    }

    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(Self {
            source: self.source.boxed_clone(),
            grouped: self.grouped,
            indices: self.indices.clone(),
            aggregates: self.aggregates.clone(),
            sum: self.sum,
            average: self.average,
            schema: self.schema.clone(),
            state: None,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        self.source.open()?;
        self.state = Some(RunState::default());
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        let mut state = self.state.take().ok_or(ExecutorError::NotOpen)?;
        let result = self.advance(&mut state);
        self.state = Some(state);
        result
    }

    fn close(&mut self) -> ExecResult<()> {
        if self.state.take().is_some() {
            self.source.close()?;
        }
        Ok(())
    }
}

impl Select {
    fn advance(&mut self, state: &mut RunState) -> ExecResult<Option<Tuple>> {
        if !self.aggregating() {
            return Ok(match self.source.next()? {
                Some(Tuple::Row(row)) => Some(Tuple::Row(self.project(&row))),
                other => other,
            });
        }
        while !state.finished {
            match self.source.next()? {
                Some(Tuple::Row(row)) => {
                    self.fold(&mut state.acc, &row)?;
                    state.pending = true;
                    state.seen_row = true;
                }
                Some(Tuple::Marker) => {
                    state.seen_marker = true;
                    if state.pending {
                        state.pending = false;
                        let acc = std::mem::take(&mut state.acc);
                        return Ok(Some(Tuple::Row(self.emit(acc))));
                    }
                }
                None => {
                    state.finished = true;
                    let ungrouped_empty = !self.grouped && !state.seen_row && !state.seen_marker;
                    if state.pending || ungrouped_empty {
                        state.pending = false;
                        let acc = std::mem::take(&mut state.acc);
                        return Ok(Some(Tuple::Row(self.emit(acc))));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::{execute, GroupBy, SeqScan, Where};
    use relq_types::PredicateOperator;

    fn scan(catalog: &std::rc::Rc<relq_storage::Catalog>) -> Box<dyn Operator> {
        Box::new(SeqScan::new(storage(catalog), "t").unwrap())
    }

    fn rows(op: &mut dyn Operator) -> Vec<Row> {
        execute(op)
            .unwrap()
            .into_iter()
            .map(|t| t.into_row().unwrap())
            .collect()
    }

    fn all() -> Aggregates {
        Aggregates {
            count: true,
            sum: Some("int".into()),
            average: Some("int".into()),
        }
    }

    #[test]
    fn projects_in_requested_order() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", (0..5).map(row));
        let mut select = Select::new(scan(&catalog), vec!["float".into(), "int".into()], Aggregates::default()).unwrap();
        let out = rows(&mut select);
        assert_eq!(out[2], vec![Value::Float(2.0), Value::Int(2)]);
        assert_eq!(select.schema().name(0), Some("float"));
        assert_eq!(crate::render(&select), "type: SELECT\ncolumns: [float, int]\n\ttype: SEQSCAN\n\ttable: t");
    }

    #[test]
    fn ungrouped_aggregates_fold_everything() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", (0..10).map(row));
        let mut select = Select::new(scan(&catalog), Vec::new(), all()).unwrap();
        let out = rows(&mut select);
        assert_eq!(out, vec![vec![Value::Int(10), Value::Int(45), Value::Float(4.5)]]);
        assert_eq!(select.describe(), "columns: [countAgg, sumAgg, averageAgg]");
    }

    #[test]
    fn grouped_aggregates_emit_once_per_group() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", (0..30).map(|i| row(i % 3)));
        let grouped = GroupBy::new(scan(&catalog), "int").unwrap();
        let mut select = Select::new(Box::new(grouped), vec!["int".into()], all()).unwrap();
        let out = rows(&mut select);
        assert_eq!(out.len(), 3);
        for (g, row) in out.iter().enumerate() {
            let g = g as i32;
            assert_eq!(row[0], Value::Int(g));
            assert_eq!(row[1], Value::Int(10));
            assert_eq!(row[2], Value::Int(10 * g));
            let average = row[3].as_float().unwrap();
            assert!((average - g as f32).abs() < 1e-6);
        }
    }

    #[test]
    fn float_sums_stay_float() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", (0..4).map(row));
        let aggregates = Aggregates {
            sum: Some("float".into()),
            ..Aggregates::default()
        };
        let mut select = Select::new(scan(&catalog), Vec::new(), aggregates).unwrap();
        assert_eq!(select.schema().data_type(0), Some(DataType::Float));
        assert_eq!(rows(&mut select), vec![vec![Value::Float(6.0)]]);
    }

    #[test]
    fn empty_input_yields_one_zero_row_when_ungrouped() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", std::iter::empty());
        let mut select = Select::new(scan(&catalog), vec!["bool".into()], all()).unwrap();
        assert_eq!(
            rows(&mut select),
            vec![vec![Value::Bool(false), Value::Int(0), Value::Int(0), Value::Float(0.0)]]
        );

        let grouped = GroupBy::new(scan(&catalog), "int").unwrap();
        let mut select = Select::new(Box::new(grouped), vec!["int".into()], all()).unwrap();
        assert!(rows(&mut select).is_empty());
    }

    #[test]
    fn filtered_empty_groups_yield_nothing() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", (0..10).map(row));
        let grouped = GroupBy::new(scan(&catalog), "int").unwrap();
        let filtered = Where::new(Box::new(grouped), "int", PredicateOperator::LessThan, Value::Int(0)).unwrap();
        let mut select = Select::new(Box::new(filtered), vec!["int".into()], all()).unwrap();
        assert!(rows(&mut select).is_empty());

        let filtered = Where::new(scan(&catalog), "int", PredicateOperator::LessThan, Value::Int(0)).unwrap();
        let mut select = Select::new(Box::new(filtered), Vec::new(), all()).unwrap();
        assert_eq!(rows(&mut select), vec![vec![Value::Int(0), Value::Int(0), Value::Float(0.0)]]);
    }

    #[test]
    fn projection_forwards_markers() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", (0..4).map(row));
        let grouped = GroupBy::new(scan(&catalog), "bool").unwrap();
        let mut select = Select::new(Box::new(grouped), vec!["int".into()], Aggregates::default()).unwrap();
        let out = execute(&mut select).unwrap();
        assert_eq!(out.iter().filter(|t| t.is_marker()).count(), 2);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn rejects_bad_requests() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "t", (0..4).map(row));
        let none = Select::new(scan(&catalog), Vec::new(), Aggregates::default());
        assert!(matches!(none, Err(ExecutorError::Planning(_))));

        let text_sum = Aggregates {
            sum: Some("string".into()),
            ..Aggregates::default()
        };
        assert!(matches!(Select::new(scan(&catalog), Vec::new(), text_sum), Err(ExecutorError::Planning(_))));

        let bool_avg = Aggregates {
            average: Some("bool".into()),
            ..Aggregates::default()
        };
        assert!(matches!(Select::new(scan(&catalog), Vec::new(), bool_avg), Err(ExecutorError::Planning(_))));

        let unknown = Select::new(scan(&catalog), vec!["nope".into()], Aggregates::default());
        assert!(matches!(unknown, Err(ExecutorError::UnknownColumn(_))));
    }
}

//! Query planner.
//!
//! A [`QueryPlan`] accumulates the parts of a query through builder calls
//! and assembles an operator tree in one of two ways:
//! - naive: fixed order, with a single index scan when the query allows it
//!   and simple nested loop joins in declaration order
//! - cost based: System-R style search over access paths, join orders and
//!   join algorithms

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use relq_executor::{
    build_join, iterate, render, resolve_column, Aggregates, ExecResult, ExecutorError, GroupBy,
    IndexScan, JoinType, NestedLoopJoin, Operator, Rows, Select, SeqScan, Where,
};
use relq_storage::Storage;
use relq_types::{unqualified, PredicateOperator, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    column: String,
    op: PredicateOperator,
    value: Value,
}

#[derive(Debug, Clone, PartialEq)]
struct JoinClause {
    table: String,
    left_column: String,
    right_column: String,
}

/// How a single base table is read.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    TableScan,
    /// Index scan driven by the predicate at this position.
    Index { predicate: usize },
}

type TableSet = BTreeSet<String>;

pub struct QueryPlan {
    storage: Rc<dyn Storage>,
    start_table: String,
    select_columns: Vec<String>,
    predicates: Vec<Predicate>,
    group_by: Option<String>,
    count: bool,
    sum: Option<String>,
    average: Option<String>,
    joins: Vec<JoinClause>,
    final_operator: Option<Box<dyn Operator>>,
}

impl QueryPlan {
    pub fn new(storage: Rc<dyn Storage>, start_table: &str) -> Self {
        Self {
            storage,
            start_table: start_table.to_string(),
            select_columns: Vec::new(),
            predicates: Vec::new(),
            group_by: None,
            count: false,
            sum: None,
            average: None,
            joins: Vec::new(),
            final_operator: None,
        }
    }

    /// Project onto `columns`. May be called at most once.
    pub fn select<S: Into<String>>(&mut self, columns: impl IntoIterator<Item = S>) -> ExecResult<()> {
        if !self.select_columns.is_empty() {
            return Err(ExecutorError::planning(
                "Cannot add more than one select operator to this query.",
            ));
        }
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(ExecutorError::planning("Cannot select no columns."));
        }
        self.select_columns = columns;
        Ok(())
    }

    /// Keep rows where `column <op> value`. Predicates are AND-combined.
    pub fn filter(&mut self, column: &str, op: PredicateOperator, value: Value) {
        self.predicates.push(Predicate {
            column: column.to_string(),
            op,
            value,
        });
    }

    pub fn group_by(&mut self, column: &str) {
        self.group_by = Some(column.to_string());
    }

    pub fn count(&mut self) {
        self.count = true;
    }

    pub fn sum(&mut self, column: &str) {
        self.sum = Some(column.to_string());
    }

    pub fn average(&mut self, column: &str) {
        self.average = Some(column.to_string());
    }

    /// Join `left_column` of the running result with `right_column` of `table`.
    pub fn join(&mut self, table: &str, left_column: &str, right_column: &str) {
        self.joins.push(JoinClause {
            table: table.to_string(),
            left_column: left_column.to_string(),
            right_column: right_column.to_string(),
        });
    }

    /// The root of the most recently assembled plan.
    pub fn final_operator(&self) -> Option<&dyn Operator> {
        self.final_operator.as_deref()
    }

    /// Text rendering of the most recently assembled plan.
    pub fn explain(&self) -> Option<String> {
        self.final_operator().map(render)
    }

    /// Assemble the naive plan and stream its output.
    pub fn execute(&mut self) -> ExecResult<Rows> {
        let root = self.assemble_naive()?;
        Ok(self.install(root))
    }

    /// Assemble the cheapest plan found by the cost-based search and stream
    /// its output.
    pub fn execute_optimal(&mut self) -> ExecResult<Rows> {
        let root = self.assemble_optimal()?;
        Ok(self.install(root))
    }

    fn install(&mut self, root: Box<dyn Operator>) -> Rows {
        debug!(cost = root.io_cost(), plan = %render(root.as_ref()), "assembled query plan");
        let rows = iterate(root.boxed_clone());
        self.final_operator = Some(root);
        rows
    }

    fn assemble_naive(&self) -> ExecResult<Box<dyn Operator>> {
        if let AccessPath::Index { predicate } = self.naive_access_path()? {
            let p = &self.predicates[predicate];
            let scan = self.index_scan(&self.start_table, p)?;
            debug!(table = %self.start_table, column = %p.column, "naive plan uses index scan");
            let filtered = self.push_down(scan, Some(predicate))?;
            return self.add_select(filtered);
        }

        let mut root: Box<dyn Operator> = Box::new(self.seq_scan(&self.start_table)?);
        for join in &self.joins {
            let right = Box::new(self.seq_scan(&join.table)?);
            root = Box::new(NestedLoopJoin::new(
                root,
                right,
                &join.left_column,
                &join.right_column,
                Rc::clone(&self.storage),
            )?);
        }
        let root = self.push_down(root, None)?;
        let root = self.add_group_by(root)?;
        self.add_select(root)
    }

    /// The naive plan uses an index only for a single-table query without
    /// grouping, on the first predicate whose column is indexed.
    fn naive_access_path(&self) -> ExecResult<AccessPath> {
        if !self.joins.is_empty() || self.group_by.is_some() {
            return Ok(AccessPath::TableScan);
        }
        for (i, p) in self.predicates.iter().enumerate() {
            if self.index_column(&self.start_table, p)?.is_some() {
                return Ok(AccessPath::Index { predicate: i });
            }
        }
        Ok(AccessPath::TableScan)
    }

    fn assemble_optimal(&self) -> ExecResult<Box<dyn Operator>> {
        let mut tables = vec![self.start_table.clone()];
        tables.extend(self.joins.iter().map(|j| j.table.clone()));
        let all: TableSet = tables.iter().cloned().collect();

        let mut singles: BTreeMap<TableSet, Box<dyn Operator>> = BTreeMap::new();
        for table in &tables {
            let op = self.min_cost_single_access(table)?;
            singles.insert(TableSet::from([table.clone()]), op);
        }

        let mut current = singles.clone();
        for pass in 2..=tables.len() {
            current = self.min_cost_joins(&current, &singles)?;
            debug!(pass, table_sets = current.len(), "join search pass complete");
        }

        let best = current
            .into_iter()
            .filter(|(set, _)| *set == all)
            .map(|(_, op)| op)
            .reduce(|best, op| if op.io_cost() < best.io_cost() { op } else { best })
            .ok_or_else(|| {
                ExecutorError::planning("join predicates do not connect every table in the query")
            })?;
        let root = self.add_group_by(best)?;
        self.add_select(root)
    }

    /// Cheapest way to read one base table, with every applicable predicate
    /// pushed down onto it.
    fn min_cost_single_access(&self, table: &str) -> ExecResult<Box<dyn Operator>> {
        let mut best: Box<dyn Operator> = Box::new(self.seq_scan(table)?);
        let mut path = AccessPath::TableScan;
        for (i, p) in self.predicates.iter().enumerate() {
            if self.index_column(table, p)?.is_none() {
                continue;
            }
            let scan = self.index_scan(table, p)?;
            if scan.io_cost() < best.io_cost() {
                best = scan;
                path = AccessPath::Index { predicate: i };
            }
        }
        debug!(table, ?path, cost = best.io_cost(), "chose access path");
        let used = match path {
            AccessPath::Index { predicate } => Some(predicate),
            AccessPath::TableScan => None,
        };
        self.push_down(best, used)
    }

    /// Extend every table set of the previous pass by one base table reachable
    /// through a join predicate, keeping the cheapest operator per set.
    fn min_cost_joins(
        &self,
        previous: &BTreeMap<TableSet, Box<dyn Operator>>,
        singles: &BTreeMap<TableSet, Box<dyn Operator>>,
    ) -> ExecResult<BTreeMap<TableSet, Box<dyn Operator>>> {
        let mut next: BTreeMap<TableSet, Box<dyn Operator>> = BTreeMap::new();
        for (tables, op) in previous {
            for join in &self.joins {
                let left_table = self.left_table_of(join);
                let has_left = tables.contains(left_table);
                let has_right = tables.contains(&join.table);
                let (new_table, outer_column, inner_column) = match (has_left, has_right) {
                    (true, false) => (join.table.as_str(), &join.left_column, &join.right_column),
                    (false, true) => (left_table, &join.right_column, &join.left_column),
                    _ => continue,
                };
                let Some(inner) = singles.get(&TableSet::from([new_table.to_string()])) else {
                    continue;
                };
                let candidate = self.min_cost_join_type(op.as_ref(), inner.as_ref(), outer_column, inner_column)?;

                let mut joined = tables.clone();
                joined.insert(new_table.to_string());
                let keep = next
                    .get(&joined)
                    .map_or(true, |existing| candidate.io_cost() < existing.io_cost());
                if keep {
                    next.insert(joined, candidate);
                }
            }
        }
        Ok(next)
    }

    fn min_cost_join_type(
        &self,
        left: &dyn Operator,
        right: &dyn Operator,
        left_column: &str,
        right_column: &str,
    ) -> ExecResult<Box<dyn Operator>> {
        let mut best: Option<Box<dyn Operator>> = None;
        for join_type in JoinType::ALL {
            let op = build_join(
                join_type,
                left.boxed_clone(),
                right.boxed_clone(),
                left_column,
                right_column,
                Rc::clone(&self.storage),
            )?;
            debug!(%join_type, left_column, right_column, cost = op.io_cost(), "costed join");
            if best.as_ref().map_or(true, |b| op.io_cost() < b.io_cost()) {
                best = Some(op);
            }
        }
        best.ok_or_else(|| ExecutorError::planning("no join algorithm available"))
    }

    /// Table named by the qualifier of the join's left column, or the start
    /// table when the column is unqualified.
    fn left_table_of<'a>(&'a self, join: &'a JoinClause) -> &'a str {
        match join.left_column.split_once('.') {
            Some((table, _)) => table,
            None => &self.start_table,
        }
    }

    /// The unqualified column of `table` an index scan for `p` would use,
    /// when that column belongs to the table, is indexed, and the operator
    /// can be answered by an index.
    fn index_column(&self, table: &str, p: &Predicate) -> ExecResult<Option<String>> {
        if p.op == PredicateOperator::NotEquals {
            return Ok(None);
        }
        let schema = self.storage.schema(table).map_err(ExecutorError::while_planning)?;
        let position = match resolve_column(&schema, &p.column) {
            Ok(position) => position,
            Err(ExecutorError::UnknownColumn(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let column = unqualified(schema.name(position).unwrap_or_default()).to_string();
        Ok(self.storage.index_exists(table, &column).then_some(column))
    }

    fn seq_scan(&self, table: &str) -> ExecResult<SeqScan> {
        SeqScan::new(Rc::clone(&self.storage), table)
    }

    fn index_scan(&self, table: &str, p: &Predicate) -> ExecResult<Box<dyn Operator>> {
        let column = self.index_column(table, p)?.ok_or_else(|| {
            ExecutorError::planning(format!("no usable index on {table} for {}", p.column))
        })?;
        Ok(Box::new(IndexScan::new(
            Rc::clone(&self.storage),
            table,
            &column,
            p.op,
            p.value.clone(),
        )?))
    }

    /// Layer every predicate except `skip` onto `source`, in declaration
    /// order, ignoring predicates on columns the source does not have.
    fn push_down(&self, mut source: Box<dyn Operator>, skip: Option<usize>) -> ExecResult<Box<dyn Operator>> {
        for (i, p) in self.predicates.iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            match resolve_column(source.schema(), &p.column) {
                Ok(_) => {}
                Err(ExecutorError::UnknownColumn(_)) => continue,
                Err(err) => return Err(err),
            }
            source = Box::new(Where::new(source, &p.column, p.op, p.value.clone())?);
        }
        Ok(source)
    }

    fn add_group_by(&self, source: Box<dyn Operator>) -> ExecResult<Box<dyn Operator>> {
        let Some(column) = &self.group_by else {
            return Ok(source);
        };
        let covered = match self.select_columns.as_slice() {
            [] | [_, _] => true,
            [only] => resolve_column(source.schema(), only)? == resolve_column(source.schema(), column)?,
            _ => false,
        };
        if !covered {
            return Err(ExecutorError::planning(
                "Can only select columns specified in the GROUP BY clause.",
            ));
        }
        Ok(Box::new(GroupBy::new(source, column)?))
    }

    fn add_select(&self, source: Box<dyn Operator>) -> ExecResult<Box<dyn Operator>> {
        let aggregates = Aggregates {
            count: self.count,
            sum: self.sum.clone(),
            average: self.average.clone(),
        };
        if self.select_columns.is_empty() && aggregates.is_empty() {
            return Ok(source);
        }
        Ok(Box::new(Select::new(source, self.select_columns.clone(), aggregates)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_executor::OperatorKind;
    use relq_storage::Catalog;
    use relq_types::{DataType, Row, Schema};
    use tempfile::TempDir;

    fn all_types() -> Schema {
        Schema::from_fields([
            ("bool", DataType::Bool),
            ("int", DataType::Int),
            ("string", DataType::String(5)),
            ("float", DataType::Float),
        ])
    }

    fn row(i: i32) -> Row {
        vec![
            Value::Bool(i % 2 == 0),
            Value::Int(i),
            Value::string("cs186", 5),
            Value::Float(i as f32),
        ]
    }

    fn setup(tables: &[&str], rows: i32) -> (TempDir, Rc<Catalog>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Rc::new(Catalog::open(dir.path(), 5).unwrap());
        for table in tables {
            catalog.create_table(table, &all_types()).unwrap();
            for i in 0..rows {
                catalog.add_record(table, row(i)).unwrap();
            }
        }
        (dir, catalog)
    }

    fn plan(catalog: &Rc<Catalog>, table: &str) -> QueryPlan {
        let storage: Rc<dyn Storage> = catalog.clone();
        QueryPlan::new(storage, table)
    }

    fn ints(rows: Rows, column: usize) -> Vec<i32> {
        let mut out: Vec<i32> = rows
            .into_rows()
            .unwrap()
            .iter()
            .map(|r| r[column].as_int().unwrap())
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn select_rules() {
        let (_dir, catalog) = setup(&["t"], 1);
        let mut query = plan(&catalog, "t");
        assert!(query.select(Vec::<String>::new()).is_err());
        query.select(["int"]).unwrap();
        let err = query.select(["bool"]).unwrap_err();
        assert!(err.is_planning());
        assert!(err.to_string().contains("more than one select"));
    }

    #[test]
    fn naive_plan_without_index_filters_a_scan() {
        let (_dir, catalog) = setup(&["t"], 100);
        let mut query = plan(&catalog, "t");
        query.filter("int", PredicateOperator::LessThan, Value::Int(10));
        query.select(["int"]).unwrap();
        assert_eq!(ints(query.execute().unwrap(), 0), (0..10).collect::<Vec<_>>());
        assert_eq!(
            query.explain().unwrap(),
            "type: SELECT\ncolumns: [int]\n\ttype: WHERE\n\tcolumn: t.int\n\tpredicate: LESS_THAN\n\tvalue: 10\n\t\ttype: SEQSCAN\n\t\ttable: t"
        );
    }

    #[test]
    fn naive_plan_uses_the_first_indexed_predicate() {
        let (_dir, catalog) = setup(&["t"], 100);
        catalog.create_index("t", "int").unwrap();
        let mut query = plan(&catalog, "t");
        query.filter("float", PredicateOperator::GreaterThan, Value::Float(20.0));
        query.filter("t.int", PredicateOperator::LessThan, Value::Int(30));
        let out = ints(query.execute().unwrap(), 1);
        assert_eq!(out, (21..30).collect::<Vec<_>>());
        let root = query.final_operator().unwrap();
        assert_eq!(root.kind(), OperatorKind::Where);
        assert_eq!(root.sources()[0].kind(), OperatorKind::IndexScan);
    }

    #[test]
    fn naive_plan_ignores_not_equals_for_indexes() {
        let (_dir, catalog) = setup(&["t"], 20);
        catalog.create_index("t", "int").unwrap();
        let mut query = plan(&catalog, "t");
        query.filter("int", PredicateOperator::NotEquals, Value::Int(3));
        assert_eq!(query.execute().unwrap().into_rows().unwrap().len(), 19);
        assert_eq!(
            query.final_operator().unwrap().sources()[0].kind(),
            OperatorKind::SeqScan
        );
    }

    #[test]
    fn naive_joins_are_simple_nested_loops_in_order() {
        let (_dir, catalog) = setup(&["a", "b", "c"], 20);
        let mut query = plan(&catalog, "a");
        query.join("b", "a.int", "b.int");
        query.join("c", "b.int", "c.int");
        query.filter("c.int", PredicateOperator::GreaterThanEquals, Value::Int(15));
        query.filter("missing", PredicateOperator::Equals, Value::Int(1));
        let rows = query.execute().unwrap();
        assert_eq!(ints(rows, 9), (15..20).collect::<Vec<_>>());
        let root = query.final_operator().unwrap();
        assert_eq!(root.kind(), OperatorKind::Where);
        let outer = root.sources()[0];
        assert_eq!(outer.kind(), OperatorKind::Join(JoinType::Snlj));
        assert_eq!(outer.sources()[0].kind(), OperatorKind::Join(JoinType::Snlj));
        assert_eq!(outer.sources()[1].describe(), "table: c");
    }

    #[test]
    fn grouped_aggregates() {
        let (_dir, catalog) = setup(&["t"], 0);
        for i in 0..30 {
            catalog.add_record("t", row(i % 3)).unwrap();
        }
        let mut query = plan(&catalog, "t");
        query.group_by("int");
        query.select(["int"]).unwrap();
        query.count();
        query.sum("int");
        query.average("float");
        let rows = query.execute().unwrap().into_rows().unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(0), Value::Int(10), Value::Int(0), Value::Float(0.0)],
                vec![Value::Int(1), Value::Int(10), Value::Int(10), Value::Float(1.0)],
                vec![Value::Int(2), Value::Int(10), Value::Int(20), Value::Float(2.0)],
            ]
        );
    }

    #[test]
    fn group_by_must_cover_the_selection() {
        let (_dir, catalog) = setup(&["t"], 5);
        let mut query = plan(&catalog, "t");
        query.group_by("int");
        query.select(["float"]).unwrap();
        let err = query.execute().err().unwrap();
        assert!(err.is_planning());

        let mut query = plan(&catalog, "t");
        query.group_by("int");
        query.select(["bool", "int", "float"]).unwrap();
        assert!(query.execute_optimal().err().unwrap().is_planning());
    }

    #[test]
    fn ungrouped_count_over_empty_result() {
        let (_dir, catalog) = setup(&["t"], 10);
        let mut query = plan(&catalog, "t");
        query.filter("int", PredicateOperator::GreaterThan, Value::Int(100));
        query.count();
        assert_eq!(query.execute().unwrap().into_rows().unwrap(), vec![vec![Value::Int(0)]]);
    }

    #[test]
    fn optimal_plan_prefers_index_for_selective_predicates() {
        let (_dir, catalog) = setup(&["t"], 1000);
        catalog.create_index("t", "int").unwrap();

        let mut query = plan(&catalog, "t");
        query.filter("int", PredicateOperator::Equals, Value::Int(500));
        assert_eq!(ints(query.execute_optimal().unwrap(), 1), vec![500]);
        let root = query.final_operator().unwrap();
        assert_eq!(root.kind(), OperatorKind::IndexScan);
        assert_eq!(root.io_cost(), 2);

        let mut query = plan(&catalog, "t");
        query.filter("int", PredicateOperator::GreaterThanEquals, Value::Int(900));
        assert_eq!(ints(query.execute_optimal().unwrap(), 1), (900..1000).collect::<Vec<_>>());
        assert_eq!(
            query.explain().unwrap(),
            "type: WHERE\ncolumn: t.int\npredicate: GREATER_THAN_EQUALS\nvalue: 900\n\ttype: SEQSCAN\n\ttable: t"
        );
    }

    #[test]
    fn optimal_plan_picks_the_cheapest_join() {
        let (_dir, catalog) = setup(&["t1", "t2"], 1000);
        let mut query = plan(&catalog, "t1");
        query.join("t2", "t1.int", "t2.int");
        let rows = query.execute_optimal().unwrap().into_rows().unwrap();
        assert_eq!(rows.len(), 1000);
        assert_eq!(
            query.explain().unwrap(),
            "type: BNLJ\nleftColumn: t1.int\nrightColumn: t2.int\n\t(left)\n\ttype: SEQSCAN\n\ttable: t1\n\n\t(right)\n\ttype: SEQSCAN\n\ttable: t2"
        );
        assert_eq!(query.final_operator().unwrap().io_cost(), 12);
    }

    #[test]
    fn optimal_plan_pushes_predicates_below_joins() {
        let (_dir, catalog) = setup(&["a", "b", "c"], 300);
        let mut query = plan(&catalog, "a");
        query.join("b", "a.int", "b.int");
        query.join("c", "b.int", "c.int");
        query.filter("c.int", PredicateOperator::LessThan, Value::Int(10));
        let rows = query.execute_optimal().unwrap();
        let root = query.final_operator().unwrap();
        assert!(matches!(root.kind(), OperatorKind::Join(_)));
        assert_eq!(root.schema().len(), 12);
        assert_eq!(rows.into_rows().unwrap().len(), 10);
    }

    #[test]
    fn optimal_and_naive_plans_agree() {
        let (_dir, catalog) = setup(&["a", "b"], 200);
        catalog.create_index("b", "int").unwrap();
        let build = || {
            let mut query = plan(&catalog, "a");
            query.join("b", "a.int", "b.int");
            query.filter("b.int", PredicateOperator::LessThanEquals, Value::Int(42));
            query.filter("a.bool", PredicateOperator::Equals, Value::Bool(true));
            query
        };
        let naive = ints(build().execute().unwrap(), 1);
        let optimal = ints(build().execute_optimal().unwrap(), 1);
        assert_eq!(naive, optimal);
        assert_eq!(naive, (0..=42).filter(|i| i % 2 == 0).collect::<Vec<_>>());
    }

    #[test]
    fn disconnected_joins_are_rejected() {
        let (_dir, catalog) = setup(&["a", "b", "c"], 10);
        let mut query = plan(&catalog, "a");
        query.join("b", "a.int", "b.int");
        query.join("c", "x.int", "c.int");
        let err = query.execute_optimal().err().unwrap();
        assert!(matches!(err, ExecutorError::Planning(_)));
    }

    #[test]
    fn unknown_join_column_fails_before_rows() {
        let (_dir, catalog) = setup(&["a", "b"], 10);
        let mut query = plan(&catalog, "a");
        query.join("b", "a.nope", "b.int");
        assert!(query.execute().err().unwrap().is_planning());
        assert!(query.final_operator().is_none());
    }

    #[test]
    fn plans_are_rebuilt_per_execution() {
        let (_dir, catalog) = setup(&["t"], 50);
        let mut query = plan(&catalog, "t");
        query.filter("int", PredicateOperator::LessThan, Value::Int(5));
        let first = query.execute().unwrap();
        let second = query.execute_optimal().unwrap();
        assert_eq!(first.into_rows().unwrap().len(), 5);
        assert_eq!(second.into_rows().unwrap().len(), 5);
    }
}

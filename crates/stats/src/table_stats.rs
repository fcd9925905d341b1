use relq_types::{entries_per_page, PredicateOperator, Schema, TypeError, Value};

use crate::histogram::Histogram;

/// Row count, physical row width, and one histogram per column.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    num_records: usize,
    entry_size: usize,
    histograms: Vec<Histogram>,
}

impl TableStats {
    pub fn new(schema: &Schema) -> Self {
        Self {
            num_records: 0,
            entry_size: schema.entry_size(),
            histograms: schema
                .fields()
                .iter()
                .map(|f| Histogram::for_type(&f.data_type))
                .collect(),
        }
    }

    pub fn add_record(&mut self, row: &[Value]) -> Result<(), TypeError> {
        if row.len() != self.histograms.len() {
            return Err(TypeError::Arity {
                expected: self.histograms.len(),
                found: row.len(),
            });
        }
        for (histogram, value) in self.histograms.iter_mut().zip(row) {
            histogram.add_value(value)?;
        }
        self.num_records += 1;
        Ok(())
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn histograms(&self) -> &[Histogram] {
        &self.histograms
    }

    pub fn histogram(&self, column: usize) -> Option<&Histogram> {
        self.histograms.get(column)
    }

    pub fn records_per_page(&self) -> usize {
        entries_per_page(self.entry_size)
    }

    /// Pages needed to hold `num_records` rows at full occupancy.
    pub fn num_pages(&self) -> usize {
        if self.num_records == 0 {
            return 0;
        }
        self.num_records.div_ceil(self.records_per_page().max(1))
    }

    fn column(&self, column: usize) -> Result<&Histogram, TypeError> {
        self.histograms
            .get(column)
            .ok_or_else(|| TypeError::ColumnNotFound(format!("#{column}")))
    }

    pub fn reduction_factor(
        &self,
        column: usize,
        op: PredicateOperator,
        value: &Value,
    ) -> Result<f64, TypeError> {
        self.column(column)?.reduction_factor(op, value)
    }

    /// Stats of the rows satisfying `column <op> value`. The filtered column
    /// is cut by the predicate; the others shrink by the same factor.
    pub fn copy_with_predicate(
        &self,
        column: usize,
        op: PredicateOperator,
        value: &Value,
    ) -> Result<TableStats, TypeError> {
        let factor = self.reduction_factor(column, op, value)?;
        let mut histograms = Vec::with_capacity(self.histograms.len());
        for (idx, histogram) in self.histograms.iter().enumerate() {
            if idx == column {
                histograms.push(histogram.copy_with_predicate(op, value)?);
            } else {
                histograms.push(histogram.copy_with_reduction(factor));
            }
        }
        Ok(TableStats {
            num_records: (self.num_records as f64 * factor).round() as usize,
            entry_size: self.entry_size,
            histograms,
        })
    }

    /// Stats of the equi-join of `self.left_column` with `right.right_column`.
    ///
    /// Output cardinality is `|L| * |R| / max(distinct(L.a), distinct(R.b))`;
    /// the schema is the left columns followed by the right ones.
    pub fn copy_with_join(
        &self,
        left_column: usize,
        right: &TableStats,
        right_column: usize,
    ) -> TableStats {
        let left_distinct = self.histogram(left_column).map_or(0, Histogram::num_distinct);
        let right_distinct = right.histogram(right_column).map_or(0, Histogram::num_distinct);
        let denominator = left_distinct.max(right_distinct);
        let num_records = if denominator == 0 {
            0
        } else {
            let product = self.num_records as f64 * right.num_records as f64;
            (product / denominator as f64).round() as usize
        };

        let mut histograms = self.scaled_to(num_records);
        histograms.extend(right.scaled_to(num_records));

        TableStats {
            num_records,
            entry_size: self.entry_size + right.entry_size,
            histograms,
        }
    }

    fn scaled_to(&self, num_records: usize) -> Vec<Histogram> {
        let factor = if self.num_records == 0 {
            0.0
        } else {
            num_records as f64 / self.num_records as f64
        };
        self.histograms
            .iter()
            .map(|h| h.copy_with_reduction(factor))
            .collect()
    }
}

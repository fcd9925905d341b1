//! Per-column value distributions.
//!
//! Integers and floats use [`NumericHistogram`]: ten equal-width buckets
//! whose width doubles whenever a value lands outside the covered range.
//! Strings use [`StringHistogram`], one bucket per leading alphanumeric
//! character. Booleans use [`BoolHistogram`] with one bucket per value.
//!
//! Buckets hold fractional counts and distinct estimates so that derived
//! histograms can be scaled without rounding drift.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use relq_types::{DataType, PredicateOperator, TypeError, Value};

/// Bucket count of a numeric histogram.
pub const NUM_BUCKETS: usize = 10;

/// Leading characters that select a string bucket, in bucket order.
pub const ALPHANUMERIC: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    count: f64,
    distinct: f64,
    /// Fingerprints of values added directly; derived buckets leave it empty.
    seen: HashSet<u64>,
}

impl Bucket {
    fn with(count: f64, distinct: f64) -> Self {
        Self {
            count,
            distinct,
            seen: HashSet::new(),
        }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn distinct(&self) -> f64 {
        self.distinct
    }

    fn record(&mut self, fingerprint: u64) {
        self.count += 1.0;
        if self.seen.insert(fingerprint) {
            self.distinct += 1.0;
        }
    }

    fn merge(mut self, other: Bucket) -> Bucket {
        self.count += other.count;
        self.distinct += other.distinct;
        self.seen.extend(other.seen);
        self
    }

    fn scaled(&self, count_factor: f64, distinct_factor: f64) -> Bucket {
        Bucket::with(self.count * count_factor, self.distinct * distinct_factor)
    }

    /// Estimated rows holding any single value of this bucket.
    fn equality_share(&self) -> f64 {
        if self.count <= 0.0 {
            return 0.0;
        }
        (self.count / self.distinct.max(1.0)).min(self.count)
    }

    /// Distinct estimate after keeping `kept` of this bucket's rows.
    fn distinct_after(&self, kept: f64) -> f64 {
        if self.count <= 0.0 || kept <= 0.0 {
            0.0
        } else {
            self.distinct * (kept / self.count).min(1.0)
        }
    }
}

fn fingerprint<T: Hash>(value: T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn rounded(count: f64) -> usize {
    count.max(0.0).round() as usize
}

fn distinct_from(total: f64, distinct: f64) -> usize {
    if total < 0.5 {
        0
    } else {
        rounded(distinct).max(1)
    }
}

/// Rows a predicate keeps, given the split of a bucket around the constant.
fn kept(op: PredicateOperator, below: f64, equal: f64, above: f64) -> f64 {
    match op {
        PredicateOperator::LessThan => below,
        PredicateOperator::LessThanEquals => below + equal,
        PredicateOperator::GreaterThan => above,
        PredicateOperator::GreaterThanEquals => equal + above,
        PredicateOperator::Equals => equal,
        PredicateOperator::NotEquals => below + above,
    }
}

// ─── Numeric ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NumericHistogram {
    integral: bool,
    low: f64,
    width: f64,
    anchored: bool,
    buckets: Vec<Bucket>,
}

impl NumericHistogram {
    pub fn integer() -> Self {
        Self::new(true)
    }

    pub fn float() -> Self {
        Self::new(false)
    }

    fn new(integral: bool) -> Self {
        Self {
            integral,
            low: 0.0,
            width: 1.0,
            anchored: false,
            buckets: vec![Bucket::default(); NUM_BUCKETS],
        }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Lower bound of the covered range.
    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    fn high(&self) -> f64 {
        self.low + self.width * NUM_BUCKETS as f64
    }

    fn bucket_start(&self, idx: usize) -> f64 {
        self.low + self.width * idx as f64
    }

    pub fn add_value(&mut self, value: f64) {
        if value.is_finite() {
            if !self.anchored {
                self.low = value.floor();
                self.anchored = true;
            }
            while value >= self.high() {
                self.widen_up();
            }
            while value < self.low {
                self.widen_down();
            }
        }
        let idx = self.bucket_index(value);
        self.buckets[idx].record(value.to_bits());
    }

    /// Double the width keeping `low`; the old range fills the lower half.
    fn widen_up(&mut self) {
        let mut merged = self.merged_pairs();
        merged.resize(NUM_BUCKETS, Bucket::default());
        self.buckets = merged;
        self.width *= 2.0;
    }

    /// Double the width keeping the old range as the upper half.
    fn widen_down(&mut self) {
        let mut buckets = vec![Bucket::default(); NUM_BUCKETS / 2];
        buckets.extend(self.merged_pairs());
        self.buckets = buckets;
        self.low -= self.width * NUM_BUCKETS as f64;
        self.width *= 2.0;
    }

    fn merged_pairs(&mut self) -> Vec<Bucket> {
        let mut old = std::mem::take(&mut self.buckets).into_iter();
        let mut merged = Vec::with_capacity(NUM_BUCKETS);
        while let (Some(a), Some(b)) = (old.next(), old.next()) {
            merged.push(a.merge(b));
        }
        merged
    }

    fn bucket_index(&self, value: f64) -> usize {
        if value.is_nan() {
            return 0;
        }
        let idx = ((value - self.low) / self.width).floor();
        idx.clamp(0.0, (NUM_BUCKETS - 1) as f64) as usize
    }

    fn bucket_of(&self, value: f64) -> Option<usize> {
        if self.anchored && value >= self.low && value < self.high() {
            Some(self.bucket_index(value))
        } else {
            None
        }
    }

    fn fraction_below(&self, idx: usize, value: f64) -> f64 {
        let start = self.bucket_start(idx);
        let end = start + self.width;
        if value >= end {
            1.0
        } else if value <= start {
            0.0
        } else {
            let span = if self.integral {
                value.ceil() - start
            } else {
                value - start
            };
            (span / self.width).clamp(0.0, 1.0)
        }
    }

    /// Rows of bucket `idx` strictly below, equal to, and above `value`.
    fn split(&self, idx: usize, value: f64) -> (f64, f64, f64) {
        let bucket = &self.buckets[idx];
        let below = bucket.count * self.fraction_below(idx, value);
        let equal = if self.bucket_of(value) == Some(idx) {
            bucket.equality_share().min(bucket.count - below).max(0.0)
        } else {
            0.0
        };
        let above = (bucket.count - below - equal).max(0.0);
        (below, equal, above)
    }

    fn count_below(&self, value: f64) -> f64 {
        (0..NUM_BUCKETS)
            .map(|idx| self.buckets[idx].count * self.fraction_below(idx, value))
            .sum()
    }

    pub fn total(&self) -> f64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Estimated rows with a value in `[start, end]`.
    pub fn entries_in_range(&self, start: f64, end: f64) -> usize {
        let upper = if self.integral {
            self.count_below(end.floor() + 1.0)
        } else {
            let at_end = self.bucket_of(end).map_or(0.0, |idx| self.split(idx, end).1);
            self.count_below(end) + at_end
        };
        rounded(upper - self.count_below(start))
    }

    pub fn num_distinct(&self) -> usize {
        distinct_from(self.total(), self.buckets.iter().map(|b| b.distinct).sum())
    }

    pub fn reduction_factor(&self, op: PredicateOperator, value: f64) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        let kept: f64 = (0..NUM_BUCKETS)
            .map(|idx| {
                let (below, equal, above) = self.split(idx, value);
                kept(op, below, equal, above)
            })
            .sum();
        (kept / total).clamp(0.0, 1.0)
    }

    pub fn copy_with_predicate(&self, op: PredicateOperator, value: f64) -> Self {
        let buckets = (0..NUM_BUCKETS)
            .map(|idx| {
                let bucket = &self.buckets[idx];
                let (below, equal, above) = self.split(idx, value);
                let keep = kept(op, below, equal, above);
                let distinct = match op {
                    PredicateOperator::Equals if keep > 0.0 => 1.0,
                    PredicateOperator::NotEquals if equal > 0.0 => {
                        (bucket.distinct - 1.0).max(0.0)
                    }
                    _ => bucket.distinct_after(keep),
                };
                Bucket::with(keep, distinct)
            })
            .collect();
        Self {
            buckets,
            ..self.frame()
        }
    }

    pub fn copy_with_reduction(&self, factor: f64) -> Self {
        Self {
            buckets: self
                .buckets
                .iter()
                .map(|b| b.scaled(factor, factor.min(1.0)))
                .collect(),
            ..self.frame()
        }
    }

    fn frame(&self) -> Self {
        Self {
            integral: self.integral,
            low: self.low,
            width: self.width,
            anchored: self.anchored,
            buckets: Vec::new(),
        }
    }
}

// ─── String ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StringHistogram {
    buckets: Vec<Bucket>,
}

impl Default for StringHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl StringHistogram {
    pub fn new() -> Self {
        Self {
            buckets: vec![Bucket::default(); ALPHANUMERIC.len()],
        }
    }

    /// Bucket of a string's lower-cased first character; anything outside
    /// [`ALPHANUMERIC`] falls into bucket 0.
    pub fn bucket_index(value: &str) -> usize {
        value
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase())
            .and_then(|c| ALPHANUMERIC.find(c))
            .unwrap_or(0)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn add_value(&mut self, value: &str) {
        let idx = Self::bucket_index(value);
        self.buckets[idx].record(fingerprint(value));
    }

    pub fn total(&self) -> f64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Index of the first non-empty bucket.
    pub fn min_bucket(&self) -> Option<usize> {
        self.buckets.iter().position(|b| b.count > 0.0)
    }

    /// Index of the last non-empty bucket.
    pub fn max_bucket(&self) -> Option<usize> {
        self.buckets.iter().rposition(|b| b.count > 0.0)
    }

    /// Rows whose bucket lies between the buckets of `start` and `end`.
    pub fn entries_in_range(&self, start: &str, end: &str) -> usize {
        let (lo, hi) = (Self::bucket_index(start), Self::bucket_index(end));
        if lo > hi {
            return 0;
        }
        rounded(self.buckets[lo..=hi].iter().map(|b| b.count).sum())
    }

    pub fn num_distinct(&self) -> usize {
        distinct_from(self.total(), self.buckets.iter().map(|b| b.distinct).sum())
    }

    /// Rows of bucket `idx` kept by `op`. Ranges keep or drop whole buckets;
    /// equality keeps one value's share of the constant's bucket.
    fn kept_in(&self, idx: usize, op: PredicateOperator, target: usize) -> f64 {
        let bucket = &self.buckets[idx];
        match op {
            PredicateOperator::LessThan if idx < target => bucket.count,
            PredicateOperator::LessThanEquals if idx <= target => bucket.count,
            PredicateOperator::GreaterThan if idx > target => bucket.count,
            PredicateOperator::GreaterThanEquals if idx >= target => bucket.count,
            PredicateOperator::Equals if idx == target => bucket.equality_share(),
            PredicateOperator::NotEquals if idx == target => {
                bucket.count - bucket.equality_share()
            }
            PredicateOperator::NotEquals => bucket.count,
            _ => 0.0,
        }
    }

    pub fn reduction_factor(&self, op: PredicateOperator, value: &str) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        let target = Self::bucket_index(value);
        let kept: f64 = (0..self.buckets.len())
            .map(|idx| self.kept_in(idx, op, target))
            .sum();
        (kept / total).clamp(0.0, 1.0)
    }

    pub fn copy_with_predicate(&self, op: PredicateOperator, value: &str) -> Self {
        let target = Self::bucket_index(value);
        let buckets = (0..self.buckets.len())
            .map(|idx| {
                let bucket = &self.buckets[idx];
                let keep = self.kept_in(idx, op, target);
                let distinct = match op {
                    PredicateOperator::Equals if keep > 0.0 => 1.0,
                    PredicateOperator::NotEquals if idx == target => {
                        (bucket.distinct - 1.0).max(0.0)
                    }
                    _ => bucket.distinct_after(keep),
                };
                Bucket::with(keep, distinct)
            })
            .collect();
        Self { buckets }
    }

    pub fn copy_with_reduction(&self, factor: f64) -> Self {
        Self {
            buckets: self
                .buckets
                .iter()
                .map(|b| b.scaled(factor, factor.min(1.0)))
                .collect(),
        }
    }
}

// ─── Bool ────────────────────────────────────────────────────────────────────

/// Counts of `false` (index 0) and `true` (index 1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolHistogram {
    counts: [f64; 2],
}

impl BoolHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, value: bool) {
        self.counts[usize::from(value)] += 1.0;
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    pub fn entries_in_range(&self, start: bool, end: bool) -> usize {
        let (lo, hi) = (usize::from(start), usize::from(end));
        if lo > hi {
            return 0;
        }
        rounded(self.counts[lo..=hi].iter().sum())
    }

    /// Number of values still holding at least one (rounded) row.
    pub fn num_distinct(&self) -> usize {
        self.counts.iter().filter(|c| c.round() > 0.0).count()
    }

    fn kept_in(&self, idx: usize, op: PredicateOperator, target: usize) -> f64 {
        let keep = match op {
            PredicateOperator::LessThan => idx < target,
            PredicateOperator::LessThanEquals => idx <= target,
            PredicateOperator::GreaterThan => idx > target,
            PredicateOperator::GreaterThanEquals => idx >= target,
            PredicateOperator::Equals => idx == target,
            PredicateOperator::NotEquals => idx != target,
        };
        if keep {
            self.counts[idx]
        } else {
            0.0
        }
    }

    pub fn reduction_factor(&self, op: PredicateOperator, value: bool) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        let target = usize::from(value);
        let kept: f64 = (0..2).map(|idx| self.kept_in(idx, op, target)).sum();
        (kept / total).clamp(0.0, 1.0)
    }

    pub fn copy_with_predicate(&self, op: PredicateOperator, value: bool) -> Self {
        let target = usize::from(value);
        Self {
            counts: [self.kept_in(0, op, target), self.kept_in(1, op, target)],
        }
    }

    pub fn copy_with_reduction(&self, factor: f64) -> Self {
        Self {
            counts: [self.counts[0] * factor, self.counts[1] * factor],
        }
    }
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// Histogram of one column, matching the column's data type.
#[derive(Debug, Clone, PartialEq)]
pub enum Histogram {
    Bool(BoolHistogram),
    Int(NumericHistogram),
    Float(NumericHistogram),
    String(StringHistogram),
}

impl Histogram {
    pub fn for_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Bool => Histogram::Bool(BoolHistogram::new()),
            DataType::Int => Histogram::Int(NumericHistogram::integer()),
            DataType::Float => Histogram::Float(NumericHistogram::float()),
            DataType::String(_) => Histogram::String(StringHistogram::new()),
        }
    }

    fn kind(&self) -> DataType {
        match self {
            Histogram::Bool(_) => DataType::Bool,
            Histogram::Int(_) => DataType::Int,
            Histogram::Float(_) => DataType::Float,
            Histogram::String(_) => DataType::String(0),
        }
    }

    fn mismatch(&self, value: &Value) -> TypeError {
        TypeError::Incomparable {
            left: self.kind(),
            right: value.data_type(),
        }
    }

    pub fn add_value(&mut self, value: &Value) -> Result<(), TypeError> {
        let mismatch = self.mismatch(value);
        match (self, value) {
            (Histogram::Bool(h), Value::Bool(b)) => h.add_value(*b),
            (Histogram::Int(h), Value::Int(i)) => h.add_value(f64::from(*i)),
            (Histogram::Float(h), Value::Float(v)) => h.add_value(f64::from(*v)),
            (Histogram::String(h), Value::String(s)) => h.add_value(s),
            _ => return Err(mismatch),
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        match self {
            Histogram::Bool(h) => h.total(),
            Histogram::Int(h) | Histogram::Float(h) => h.total(),
            Histogram::String(h) => h.total(),
        }
    }

    pub fn num_distinct(&self) -> usize {
        match self {
            Histogram::Bool(h) => h.num_distinct(),
            Histogram::Int(h) | Histogram::Float(h) => h.num_distinct(),
            Histogram::String(h) => h.num_distinct(),
        }
    }

    /// Estimated fraction of rows satisfying `column <op> value`.
    pub fn reduction_factor(&self, op: PredicateOperator, value: &Value) -> Result<f64, TypeError> {
        match (self, value) {
            (Histogram::Bool(h), Value::Bool(b)) => Ok(h.reduction_factor(op, *b)),
            (Histogram::Int(h), Value::Int(i)) => Ok(h.reduction_factor(op, f64::from(*i))),
            (Histogram::Float(h), Value::Float(v)) => Ok(h.reduction_factor(op, f64::from(*v))),
            (Histogram::String(h), Value::String(s)) => Ok(h.reduction_factor(op, s)),
            _ => Err(self.mismatch(value)),
        }
    }

    pub fn copy_with_predicate(&self, op: PredicateOperator, value: &Value) -> Result<Histogram, TypeError> {
        match (self, value) {
            (Histogram::Bool(h), Value::Bool(b)) => Ok(Histogram::Bool(h.copy_with_predicate(op, *b))),
            (Histogram::Int(h), Value::Int(i)) => {
                Ok(Histogram::Int(h.copy_with_predicate(op, f64::from(*i))))
            }
            (Histogram::Float(h), Value::Float(v)) => {
                Ok(Histogram::Float(h.copy_with_predicate(op, f64::from(*v))))
            }
            (Histogram::String(h), Value::String(s)) => {
                Ok(Histogram::String(h.copy_with_predicate(op, s)))
            }
            _ => Err(self.mismatch(value)),
        }
    }

    pub fn copy_with_reduction(&self, factor: f64) -> Histogram {
        match self {
            Histogram::Bool(h) => Histogram::Bool(h.copy_with_reduction(factor)),
            Histogram::Int(h) => Histogram::Int(h.copy_with_reduction(factor)),
            Histogram::Float(h) => Histogram::Float(h.copy_with_reduction(factor)),
            Histogram::String(h) => Histogram::String(h.copy_with_reduction(factor)),
        }
    }
}

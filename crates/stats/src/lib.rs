//! Selectivity and cardinality estimation.
//!
//! Each table carries a [`TableStats`]: a row count plus one [`Histogram`]
//! per column. Filters and joins derive new stats from their inputs with
//! `copy_with_predicate` / `copy_with_join`; derivations never mutate the
//! receiver, so the same stats can back many candidate plans.

pub mod histogram;
pub mod table_stats;

pub use histogram::{BoolHistogram, Bucket, Histogram, NumericHistogram, StringHistogram};
pub use table_stats::TableStats;

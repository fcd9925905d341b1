//! Value model shared by every layer of the query engine.
//!
//! Modules:
//! - `value`: fixed-size scalar values and their data types
//! - `schema`: ordered, typed field lists with fixed-width row encoding
//! - `record`: rows, the group-boundary marker, and record locators
//! - `predicate`: comparison operators used by filters, indexes and stats

pub mod error;
pub mod predicate;
pub mod record;
pub mod schema;
pub mod value;

pub use error::TypeError;
pub use predicate::PredicateOperator;
pub use record::{RecordId, Row, Tuple};
pub use schema::{unqualified, Field, Schema};
pub use value::{DataType, Value};

/// Size of every page in a heap file.
pub const PAGE_SIZE: usize = 4096;

/// Number of fixed-size entries that fit in one heap page alongside the
/// live-slot bitmap (one bit per entry).
pub fn entries_per_page(entry_size: usize) -> usize {
    if entry_size == 0 {
        return 0;
    }
    (PAGE_SIZE * 8) / (entry_size * 8 + 1)
}

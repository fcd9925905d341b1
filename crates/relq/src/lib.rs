//! relq: a relational query engine over fixed-width heap tables.
//!
//! ```no_run
//! use relq::{Database, DataType, PredicateOperator, Schema, Value};
//!
//! # fn main() -> relq::Result<()> {
//! let db = Database::open("data")?;
//! let schema = Schema::from_fields([("id", DataType::Int), ("score", DataType::Float)]);
//! db.create_table_with_indices(&schema, "scores", &["id"])?;
//!
//! let txn = db.begin_transaction();
//! txn.add_record("scores", vec![Value::Int(1), Value::Float(9.5)])?;
//! let mut query = txn.query("scores")?;
//! query.filter("id", PredicateOperator::Equals, Value::Int(1));
//! let rows = query.execute_optimal()?.into_rows()?;
//! txn.end()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod database;
mod error;
mod transaction;

pub use config::{EngineConfig, DEFAULT_BUFFER_PAGES, MIN_BUFFER_PAGES};
pub use database::Database;
pub use error::{Error, Result};
pub use transaction::Transaction;

pub use relq_executor::{render, JoinType, Operator, OperatorKind, Rows};
pub use relq_planner::QueryPlan;
pub use relq_stats::TableStats;
pub use relq_types::{DataType, PredicateOperator, Row, Schema, Tuple, Value};

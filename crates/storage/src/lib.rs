//! Storage engine: paged heap files, in-memory indexes, and the catalog.
//!
//! This crate provides:
//! - File header management (magic, page size, page and record counts)
//! - Page cache / buffer pool with LRU eviction (pager)
//! - Heap files of fixed-width records addressed by `(page, slot)`
//! - Ordered single-column indexes
//! - A directory catalog implementing the [`Storage`] access trait

pub mod access;
pub mod catalog;
pub mod error;
pub mod header;
pub mod heap;
pub mod index;
pub mod pager;

pub use access::Storage;
pub use catalog::Catalog;
pub use error::{StorageError, StorageResult};
pub use header::FileHeader;
pub use heap::{HeapFile, HeapPage};
pub use index::{IndexKey, SortedIndex};
pub use pager::{PageNum, Pager};

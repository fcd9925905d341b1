//! The access surface query operators run against.

use relq_stats::TableStats;
use relq_types::{RecordId, Row, Schema, Value};

use crate::error::StorageResult;
use crate::heap::HeapPage;
use crate::pager::PageNum;

/// Table-level access used by scans, joins, and the planner.
///
/// Every method takes `&self`: a single handle is shared by all operators
/// of a plan, so implementations use interior mutability for page caches
/// and temporary tables. Index columns are named without a table qualifier.
pub trait Storage {
    fn schema(&self, table: &str) -> StorageResult<Schema>;

    fn stats(&self, table: &str) -> StorageResult<TableStats>;

    fn num_records(&self, table: &str) -> StorageResult<usize>;

    /// Data pages occupied by the table.
    fn num_pages(&self, table: &str) -> StorageResult<usize>;

    fn entry_size(&self, table: &str) -> StorageResult<usize> {
        Ok(self.schema(table)?.entry_size())
    }

    fn entries_per_page(&self, table: &str) -> StorageResult<usize> {
        Ok(relq_types::entries_per_page(self.entry_size(table)?))
    }

    fn page_nums(&self, table: &str) -> StorageResult<Vec<PageNum>>;

    fn read_page(&self, table: &str, page_num: PageNum) -> StorageResult<HeapPage>;

    fn fetch(&self, table: &str, rid: RecordId) -> StorageResult<Row>;

    fn index_exists(&self, table: &str, column: &str) -> bool;

    fn num_index_pages(&self, table: &str, column: &str) -> StorageResult<usize>;

    fn lookup_key(&self, table: &str, column: &str, key: &Value) -> StorageResult<Vec<RecordId>>;

    /// Record ids of the whole table in ascending order of `column`.
    fn sorted_scan(&self, table: &str, column: &str) -> StorageResult<Vec<RecordId>>;

    /// Record ids with `column >= start`, ascending.
    fn sorted_scan_from(&self, table: &str, column: &str, start: &Value) -> StorageResult<Vec<RecordId>>;

    /// Create an empty temporary table with `schema` kept verbatim and
    /// return its generated name, which starts with `prefix`.
    fn create_temp_table(&self, schema: &Schema, prefix: &str) -> StorageResult<String>;

    fn add_record(&self, table: &str, row: Row) -> StorageResult<RecordId>;

    fn drop_temp_table(&self, table: &str) -> StorageResult<()>;

    /// Memory budget `B`, in pages, available to one join.
    fn buffer_pages(&self) -> usize;
}

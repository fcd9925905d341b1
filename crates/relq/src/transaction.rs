use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use relq_planner::QueryPlan;
use relq_stats::TableStats;
use relq_storage::{Catalog, HeapPage, PageNum, Storage, StorageError, StorageResult};
use relq_types::{RecordId, Row, Schema, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A unit of work against a [`Database`](crate::Database).
///
/// Cloning yields another handle to the same transaction. Query plans hold
/// a handle too, so the transaction stays usable while their rows are
/// pulled. Temporary tables created by operators are owned by the
/// transaction until the operator releases them; whatever remains is
/// dropped by [`Transaction::end`], or when the last handle goes away.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TransactionState>,
}

struct TransactionState {
    id: u64,
    catalog: Rc<Catalog>,
    aliases: RefCell<HashMap<String, String>>,
    temp_tables: RefCell<BTreeSet<String>>,
    ended: Cell<bool>,
}

impl Transaction {
    pub(crate) fn begin(id: u64, catalog: Rc<Catalog>) -> Self {
        debug!(transaction = id, "began transaction");
        Self {
            inner: Rc::new(TransactionState {
                id,
                catalog,
                aliases: RefCell::new(HashMap::new()),
                temp_tables: RefCell::new(BTreeSet::new()),
                ended: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.get()
    }

    /// Start a query whose base table is `table` (a table name or alias).
    pub fn query(&self, table: &str) -> Result<QueryPlan> {
        self.check_active()?;
        if !self.inner.catalog.contains(self.inner.resolve(table).as_str()) {
            return Err(StorageError::TableNotFound(table.to_string()).into());
        }
        let storage: Rc<dyn Storage> = self.inner.clone();
        Ok(QueryPlan::new(storage, table))
    }

    /// Make `table` queryable as `alias`. Columns read through the alias
    /// are qualified with it, which is how a table is joined with itself.
    pub fn query_as(&self, table: &str, alias: &str) -> Result<()> {
        self.check_active()?;
        let catalog = &self.inner.catalog;
        if !catalog.contains(table) {
            return Err(StorageError::TableNotFound(table.to_string()).into());
        }
        if catalog.contains(alias) {
            return Err(StorageError::TableExists(alias.to_string()).into());
        }
        self.inner
            .aliases
            .borrow_mut()
            .insert(alias.to_string(), table.to_string());
        Ok(())
    }

    pub fn schema(&self, table: &str) -> Result<Schema> {
        Ok(self.inner.schema(table)?)
    }

    pub fn stats(&self, table: &str) -> Result<TableStats> {
        Ok(self.inner.stats(table)?)
    }

    pub fn num_records(&self, table: &str) -> Result<usize> {
        Ok(self.inner.num_records(table)?)
    }

    pub fn index_exists(&self, table: &str, column: &str) -> bool {
        self.inner.index_exists(table, column)
    }

    /// Verify `values` against the table's schema and append them.
    pub fn add_record(&self, table: &str, values: Vec<Value>) -> Result<RecordId> {
        self.check_active()?;
        let row = self.inner.schema(table)?.verify(values)?;
        Ok(self.inner.add_record(table, row)?)
    }

    /// Temporary tables currently owned by this transaction.
    pub fn temp_tables(&self) -> Vec<String> {
        self.inner.temp_tables.borrow().iter().cloned().collect()
    }

    /// Drop every temporary table still owned and flush the catalog.
    pub fn end(&self) -> Result<()> {
        self.check_active()?;
        self.inner.finish()?;
        Ok(())
    }

    fn check_active(&self) -> Result<()> {
        if self.is_ended() {
            return Err(Error::TransactionEnded);
        }
        Ok(())
    }
}

impl TransactionState {
    fn resolve(&self, table: &str) -> String {
        self.aliases
            .borrow()
            .get(table)
            .cloned()
            .unwrap_or_else(|| table.to_string())
    }

    fn is_alias(&self, table: &str) -> bool {
        self.aliases.borrow().contains_key(table)
    }

    fn finish(&self) -> StorageResult<()> {
        self.ended.set(true);
        let temps = std::mem::take(&mut *self.temp_tables.borrow_mut());
        let dropped = temps.len();
        for table in temps {
            self.catalog.drop_temp_table(&table)?;
        }
        self.catalog.flush()?;
        debug!(transaction = self.id, dropped, "ended transaction");
        Ok(())
    }
}

impl Storage for TransactionState {
    fn schema(&self, table: &str) -> StorageResult<Schema> {
        let schema = self.catalog.schema(&self.resolve(table))?;
        if self.is_alias(table) {
            return Ok(schema.qualified(table));
        }
        Ok(schema)
    }

    fn stats(&self, table: &str) -> StorageResult<TableStats> {
        self.catalog.stats(&self.resolve(table))
    }

    fn num_records(&self, table: &str) -> StorageResult<usize> {
        self.catalog.num_records(&self.resolve(table))
    }

    fn num_pages(&self, table: &str) -> StorageResult<usize> {
        self.catalog.num_pages(&self.resolve(table))
    }

    fn page_nums(&self, table: &str) -> StorageResult<Vec<PageNum>> {
        self.catalog.page_nums(&self.resolve(table))
    }

    fn read_page(&self, table: &str, page_num: PageNum) -> StorageResult<HeapPage> {
        self.catalog.read_page(&self.resolve(table), page_num)
    }

    fn fetch(&self, table: &str, rid: RecordId) -> StorageResult<Row> {
        self.catalog.fetch(&self.resolve(table), rid)
    }

    fn index_exists(&self, table: &str, column: &str) -> bool {
        self.catalog.index_exists(&self.resolve(table), column)
    }

    fn num_index_pages(&self, table: &str, column: &str) -> StorageResult<usize> {
        self.catalog.num_index_pages(&self.resolve(table), column)
    }

    fn lookup_key(&self, table: &str, column: &str, key: &Value) -> StorageResult<Vec<RecordId>> {
        self.catalog.lookup_key(&self.resolve(table), column, key)
    }

    fn sorted_scan(&self, table: &str, column: &str) -> StorageResult<Vec<RecordId>> {
        self.catalog.sorted_scan(&self.resolve(table), column)
    }

    fn sorted_scan_from(&self, table: &str, column: &str, start: &Value) -> StorageResult<Vec<RecordId>> {
        self.catalog.sorted_scan_from(&self.resolve(table), column, start)
    }

    fn create_temp_table(&self, schema: &Schema, prefix: &str) -> StorageResult<String> {
        let name = self.catalog.create_temp_table(schema, prefix)?;
        self.temp_tables.borrow_mut().insert(name.clone());
        Ok(name)
    }

    fn add_record(&self, table: &str, row: Row) -> StorageResult<RecordId> {
        self.catalog.add_record(&self.resolve(table), row)
    }

    fn drop_temp_table(&self, table: &str) -> StorageResult<()> {
        self.catalog.drop_temp_table(table)?;
        self.temp_tables.borrow_mut().remove(table);
        Ok(())
    }

    fn buffer_pages(&self) -> usize {
        self.catalog.buffer_pages()
    }
}

impl Drop for TransactionState {
    fn drop(&mut self) {
        if self.ended.get() {
            return;
        }
        if let Err(err) = self.finish() {
            warn!(transaction = self.id, error = %err, "failed to end transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_types::DataType;

    fn setup() -> (tempfile::TempDir, Rc<Catalog>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Rc::new(Catalog::open(dir.path(), 5).unwrap());
        let schema = Schema::from_fields([("id", DataType::Int), ("name", DataType::String(4))]);
        catalog.create_table("people", &schema).unwrap();
        (dir, catalog)
    }

    #[test]
    fn aliases_requalify_schemas() {
        let (_dir, catalog) = setup();
        let txn = Transaction::begin(1, catalog);
        txn.query_as("people", "p").unwrap();
        let names: Vec<String> = txn.schema("p").unwrap().names().map(str::to_string).collect();
        assert_eq!(names, vec!["p.id", "p.name"]);
        let names: Vec<String> = txn.schema("people").unwrap().names().map(str::to_string).collect();
        assert_eq!(names, vec!["people.id", "people.name"]);
    }

    #[test]
    fn aliases_must_name_new_identifiers() {
        let (_dir, catalog) = setup();
        let txn = Transaction::begin(1, catalog);
        assert!(matches!(
            txn.query_as("nobody", "n"),
            Err(Error::Storage(StorageError::TableNotFound(_)))
        ));
        assert!(matches!(
            txn.query_as("people", "people"),
            Err(Error::Storage(StorageError::TableExists(_)))
        ));
    }

    #[test]
    fn records_are_verified_and_visible_through_aliases() {
        let (_dir, catalog) = setup();
        let txn = Transaction::begin(1, catalog);
        txn.add_record("people", vec![Value::Int(1), Value::string("ada", 4)]).unwrap();
        assert!(txn.add_record("people", vec![Value::Int(1)]).is_err());
        txn.query_as("people", "p").unwrap();
        assert_eq!(txn.num_records("p").unwrap(), 1);
    }

    #[test]
    fn end_drops_owned_temp_tables() {
        let (_dir, catalog) = setup();
        let txn = Transaction::begin(7, Rc::clone(&catalog));
        let schema = txn.schema("people").unwrap();
        let temp = txn.inner.create_temp_table(&schema, "scratch").unwrap();
        assert_eq!(txn.temp_tables(), vec![temp.clone()]);
        txn.end().unwrap();
        assert!(!catalog.contains(&temp));
        assert!(txn.is_ended());
        assert!(matches!(txn.query("people"), Err(Error::TransactionEnded)));
        assert!(matches!(txn.end(), Err(Error::TransactionEnded)));
    }

    #[test]
    fn dropping_the_last_handle_ends_the_transaction() {
        let (_dir, catalog) = setup();
        let txn = Transaction::begin(3, Rc::clone(&catalog));
        let schema = txn.schema("people").unwrap();
        let temp = txn.inner.create_temp_table(&schema, "scratch").unwrap();
        let other = txn.clone();
        drop(txn);
        assert!(catalog.contains(&temp));
        drop(other);
        assert!(!catalog.contains(&temp));
    }
}

//! Directory-backed table catalog.
//!
//! Each table lives in `<dir>/<name>.heap`. The list of base tables, their
//! schemas, and their indexed columns is kept in `<dir>/catalog.json`.
//! Statistics and indexes are held in memory and rebuilt by scanning the
//! heap files when a catalog is reopened.
//!
//! Base table schemas are qualified with the table name (`t.col`).
//! Temporary tables keep the schema they were created with, are never
//! written to the manifest, and have their files removed when dropped.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use relq_stats::TableStats;
use relq_types::{unqualified, RecordId, Row, Schema, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::Storage;
use crate::error::{StorageError, StorageResult};
use crate::heap::{HeapFile, HeapPage};
use crate::index::SortedIndex;
use crate::pager::{PageNum, DEFAULT_POOL_SIZE};

/// Manifest file name inside a catalog directory.
pub const MANIFEST_FILE: &str = "catalog.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    tables: Vec<ManifestTable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestTable {
    name: String,
    schema: Schema,
    #[serde(default)]
    indexes: Vec<String>,
}

struct ColumnIndex {
    position: usize,
    index: SortedIndex,
}

struct TableEntry {
    schema: Schema,
    heap: HeapFile,
    stats: TableStats,
    indexes: BTreeMap<String, ColumnIndex>,
    temporary: bool,
}

impl TableEntry {
    fn insert(&mut self, row: Row) -> StorageResult<RecordId> {
        let row = self.schema.verify(row)?;
        let bytes = self.schema.encode(&row)?;
        let rid = self.heap.add_record(&bytes)?;
        self.stats.add_record(&row)?;
        for column in self.indexes.values_mut() {
            column.index.insert(row[column.position].clone(), rid);
        }
        Ok(rid)
    }

    fn index(&self, table: &str, column: &str) -> StorageResult<&SortedIndex> {
        self.indexes
            .get(unqualified(column))
            .map(|c| &c.index)
            .ok_or_else(|| StorageError::IndexNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Rebuild stats and every index from the rows on disk.
    fn rebuild(&mut self) -> StorageResult<()> {
        let mut stats = TableStats::new(&self.schema);
        for column in self.indexes.values_mut() {
            column.index = SortedIndex::new(column.index.key_type());
        }
        for page_num in self.heap.page_nums() {
            let page = self.heap.read_page(page_num)?;
            for slot in page.live_slots() {
                let Some(bytes) = page.entry(slot) else {
                    continue;
                };
                let row = self.schema.decode(bytes)?;
                stats.add_record(&row)?;
                let rid = RecordId::new(page_num, slot);
                for column in self.indexes.values_mut() {
                    column.index.insert(row[column.position].clone(), rid);
                }
            }
        }
        self.stats = stats;
        Ok(())
    }
}

pub struct Catalog {
    dir: PathBuf,
    buffer_pages: usize,
    pool_pages: usize,
    tables: RefCell<BTreeMap<String, TableEntry>>,
    temp_seq: Cell<u64>,
}

impl Catalog {
    /// Open the catalog in `dir`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P, buffer_pages: usize) -> StorageResult<Self> {
        Self::open_with_pool_size(dir, buffer_pages, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size<P: AsRef<Path>>(
        dir: P,
        buffer_pages: usize,
        pool_pages: usize,
    ) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: Manifest = if manifest_path.exists() {
            serde_json::from_slice(&std::fs::read(&manifest_path)?)?
        } else {
            Manifest::default()
        };

        let mut tables = BTreeMap::new();
        for table in manifest.tables {
            let heap = HeapFile::open(heap_path(&dir, &table.name), pool_pages)?;
            let mut indexes = BTreeMap::new();
            for column in table.indexes {
                let position = table.schema.column_index(&column)?;
                let key_type = table.schema.fields()[position].data_type;
                indexes.insert(
                    column,
                    ColumnIndex {
                        position,
                        index: SortedIndex::new(key_type),
                    },
                );
            }
            let mut entry = TableEntry {
                stats: TableStats::new(&table.schema),
                schema: table.schema,
                heap,
                indexes,
                temporary: false,
            };
            entry.rebuild()?;
            debug!(table = %table.name, records = entry.stats.num_records(), "loaded table");
            tables.insert(table.name, entry);
        }
        info!(dir = %dir.display(), tables = tables.len(), "opened catalog");

        Ok(Self {
            dir,
            buffer_pages,
            pool_pages,
            tables: RefCell::new(tables),
            temp_seq: Cell::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of the base tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .borrow()
            .iter()
            .filter(|(_, entry)| !entry.temporary)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.borrow().contains_key(table)
    }

    /// Create a base table. Field names are qualified with `name`.
    pub fn create_table(&self, name: &str, schema: &Schema) -> StorageResult<()> {
        validate_name(name)?;
        if self.contains(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        let schema = schema.qualified(name);
        self.insert_entry(name, schema, false)?;
        self.save_manifest()?;
        debug!(table = name, "created table");
        Ok(())
    }

    /// Build an index over `column`, covering the rows already stored.
    pub fn create_index(&self, table: &str, column: &str) -> StorageResult<()> {
        let column = unqualified(column).to_string();
        self.with_table(table, |entry| {
            let position = entry.schema.column_index(&column)?;
            let key_type = entry.schema.fields()[position].data_type;
            entry.indexes.insert(
                column.clone(),
                ColumnIndex {
                    position,
                    index: SortedIndex::new(key_type),
                },
            );
            entry.rebuild()
        })?;
        self.save_manifest()?;
        debug!(table, column = %column, "created index");
        Ok(())
    }

    /// Write every dirty page and the manifest to disk.
    pub fn flush(&self) -> StorageResult<()> {
        for entry in self.tables.borrow_mut().values_mut() {
            entry.heap.flush()?;
        }
        self.save_manifest()
    }

    fn insert_entry(&self, name: &str, schema: Schema, temporary: bool) -> StorageResult<()> {
        let heap = HeapFile::create(
            heap_path(&self.dir, name),
            schema.entry_size(),
            self.pool_pages,
        )?;
        let entry = TableEntry {
            stats: TableStats::new(&schema),
            schema,
            heap,
            indexes: BTreeMap::new(),
            temporary,
        };
        self.tables.borrow_mut().insert(name.to_string(), entry);
        Ok(())
    }

    fn save_manifest(&self) -> StorageResult<()> {
        let manifest = Manifest {
            tables: self
                .tables
                .borrow()
                .iter()
                .filter(|(_, entry)| !entry.temporary)
                .map(|(name, entry)| ManifestTable {
                    name: name.clone(),
                    schema: entry.schema.clone(),
                    indexes: entry.indexes.keys().cloned().collect(),
                })
                .collect(),
        };
        std::fs::write(
            self.dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;
        Ok(())
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableEntry) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut tables = self.tables.borrow_mut();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        f(entry)
    }

    fn next_temp_name(&self, prefix: &str) -> String {
        loop {
            let seq = self.temp_seq.get();
            self.temp_seq.set(seq + 1);
            let name = format!("{prefix}{seq}");
            if !self.contains(&name) {
                return name;
            }
        }
    }
}

impl Storage for Catalog {
    fn schema(&self, table: &str) -> StorageResult<Schema> {
        self.with_table(table, |entry| Ok(entry.schema.clone()))
    }

    fn stats(&self, table: &str) -> StorageResult<TableStats> {
        self.with_table(table, |entry| Ok(entry.stats.clone()))
    }

    fn num_records(&self, table: &str) -> StorageResult<usize> {
        self.with_table(table, |entry| Ok(entry.heap.num_records()))
    }

    fn num_pages(&self, table: &str) -> StorageResult<usize> {
        self.with_table(table, |entry| Ok(entry.heap.num_pages()))
    }

    fn page_nums(&self, table: &str) -> StorageResult<Vec<PageNum>> {
        self.with_table(table, |entry| Ok(entry.heap.page_nums().collect()))
    }

    fn read_page(&self, table: &str, page_num: PageNum) -> StorageResult<HeapPage> {
        self.with_table(table, |entry| Ok(entry.heap.read_page(page_num)?))
    }

    fn fetch(&self, table: &str, rid: RecordId) -> StorageResult<Row> {
        self.with_table(table, |entry| match entry.heap.get_record(rid)? {
            Some(bytes) => Ok(entry.schema.decode(&bytes)?),
            None => Err(StorageError::RecordNotFound {
                table: table.to_string(),
                rid,
            }),
        })
    }

    fn index_exists(&self, table: &str, column: &str) -> bool {
        self.tables
            .borrow()
            .get(table)
            .is_some_and(|entry| entry.indexes.contains_key(unqualified(column)))
    }

    fn num_index_pages(&self, table: &str, column: &str) -> StorageResult<usize> {
        self.with_table(table, |entry| Ok(entry.index(table, column)?.num_pages()))
    }

    fn lookup_key(&self, table: &str, column: &str, key: &Value) -> StorageResult<Vec<RecordId>> {
        self.with_table(table, |entry| Ok(entry.index(table, column)?.lookup(key)))
    }

    fn sorted_scan(&self, table: &str, column: &str) -> StorageResult<Vec<RecordId>> {
        self.with_table(table, |entry| Ok(entry.index(table, column)?.scan_all()))
    }

    fn sorted_scan_from(&self, table: &str, column: &str, start: &Value) -> StorageResult<Vec<RecordId>> {
        self.with_table(table, |entry| Ok(entry.index(table, column)?.scan_from(start)))
    }

    fn create_temp_table(&self, schema: &Schema, prefix: &str) -> StorageResult<String> {
        validate_name(prefix)?;
        let name = self.next_temp_name(prefix);
        self.insert_entry(&name, schema.clone(), true)?;
        debug!(table = %name, "created temporary table");
        Ok(name)
    }

    fn add_record(&self, table: &str, row: Row) -> StorageResult<RecordId> {
        self.with_table(table, |entry| entry.insert(row))
    }

    fn drop_temp_table(&self, table: &str) -> StorageResult<()> {
        let mut tables = self.tables.borrow_mut();
        match tables.get(table) {
            None => return Err(StorageError::TableNotFound(table.to_string())),
            Some(entry) if !entry.temporary => {
                return Err(StorageError::NotTemporary(table.to_string()))
            }
            Some(_) => {}
        }
        tables.remove(table);
        drop(tables);
        std::fs::remove_file(heap_path(&self.dir, table))?;
        debug!(table, "dropped temporary table");
        Ok(())
    }

    fn buffer_pages(&self) -> usize {
        self.buffer_pages
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        let tables = std::mem::take(self.tables.get_mut());
        for (name, mut entry) in tables {
            if entry.temporary {
                drop(entry);
                if let Err(e) = std::fs::remove_file(heap_path(&self.dir, &name)) {
                    warn!(table = %name, error = %e, "failed to remove temporary table");
                }
            } else if let Err(e) = entry.heap.flush() {
                warn!(table = %name, error = %e, "failed to flush table");
            }
        }
    }
}

fn heap_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.heap"))
}

fn validate_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_types::DataType;

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

    fn filled(catalog: &Catalog, table: &str, n: i32) {
        catalog.create_table(table, &all_types()).unwrap();
        for i in 0..n {
            catalog.add_record(table, row(i)).unwrap();
        }
    }

    #[test]
    fn base_tables_are_qualified() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), 5).unwrap();
        catalog.create_table("t", &all_types()).unwrap();
        let schema = catalog.schema("t").unwrap();
        assert_eq!(schema.name(1), Some("t.int"));
        assert_eq!(catalog.table_names(), vec!["t".to_string()]);
        assert!(matches!(
            catalog.create_table("t", &all_types()),
            Err(StorageError::TableExists(_))
        ));
        assert!(matches!(
            catalog.create_table("a.b", &all_types()),
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            catalog.schema("missing"),
            Err(StorageError::TableNotFound(_))
        ));
    }

    #[test]
    fn records_update_stats_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), 5).unwrap();
        filled(&catalog, "t", 1000);
        assert_eq!(catalog.num_records("t").unwrap(), 1000);
        assert_eq!(catalog.num_pages("t").unwrap(), 4);
        assert_eq!(catalog.entries_per_page("t").unwrap(), 289);
        assert_eq!(catalog.stats("t").unwrap().num_records(), 1000);
        assert_eq!(catalog.page_nums("t").unwrap(), vec![1, 2, 3, 4]);

        let rid = RecordId::new(2, 5);
        assert_eq!(catalog.fetch("t", rid).unwrap(), row(294));
        assert!(matches!(
            catalog.fetch("t", RecordId::new(4, 288)),
            Err(StorageError::RecordNotFound { .. })
        ));
        assert!(catalog.add_record("t", vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn indexes_cover_existing_and_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), 5).unwrap();
        filled(&catalog, "t", 100);
        catalog.create_index("t", "int").unwrap();
        catalog.add_record("t", row(50)).unwrap();

        assert!(catalog.index_exists("t", "int"));
        assert!(catalog.index_exists("t", "t.int"));
        assert!(!catalog.index_exists("t", "float"));
        assert_eq!(catalog.lookup_key("t", "int", &Value::Int(50)).unwrap().len(), 2);
        assert_eq!(catalog.sorted_scan("t", "int").unwrap().len(), 101);
        assert_eq!(
            catalog
                .sorted_scan_from("t", "int", &Value::Int(95))
                .unwrap()
                .len(),
            5
        );
        assert_eq!(catalog.num_index_pages("t", "int").unwrap(), 1);
        assert!(matches!(
            catalog.lookup_key("t", "float", &Value::Float(1.0)),
            Err(StorageError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn reopen_rebuilds_stats_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path(), 5).unwrap();
            filled(&catalog, "t", 500);
            catalog.create_index("t", "int").unwrap();
            catalog.flush().unwrap();
        }
        let catalog = Catalog::open(dir.path(), 5).unwrap();
        assert_eq!(catalog.num_records("t").unwrap(), 500);
        assert_eq!(catalog.stats("t").unwrap().num_records(), 500);
        assert!(catalog.index_exists("t", "int"));
        let rids = catalog.lookup_key("t", "int", &Value::Int(321)).unwrap();
        assert_eq!(rids.len(), 1);
        assert_eq!(catalog.fetch("t", rids[0]).unwrap(), row(321));
    }

    #[test]
    fn temporary_tables_keep_schema_and_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), 5).unwrap();
        let schema = all_types().qualified("x");
        let first = catalog.create_temp_table(&schema, "tmp").unwrap();
        let second = catalog.create_temp_table(&schema, "tmp").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("tmp"));
        assert_eq!(catalog.schema(&first).unwrap(), schema);
        assert!(catalog.table_names().is_empty());

        catalog.add_record(&first, row(1)).unwrap();
        assert_eq!(catalog.num_records(&first).unwrap(), 1);

        catalog.drop_temp_table(&first).unwrap();
        assert!(!catalog.contains(&first));
        assert!(!heap_path(dir.path(), &first).exists());

        drop(catalog);
        assert!(!heap_path(dir.path(), &second).exists());
    }

    #[test]
    fn base_tables_cannot_be_dropped_as_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), 5).unwrap();
        catalog.create_table("t", &all_types()).unwrap();
        assert!(matches!(
            catalog.drop_temp_table("t"),
            Err(StorageError::NotTemporary(_))
        ));
        assert!(matches!(
            catalog.drop_temp_table("nope"),
            Err(StorageError::TableNotFound(_))
        ));
    }
}

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use relq_storage::Catalog;
use relq_types::Schema;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::transaction::Transaction;

/// A directory of tables plus the engine configuration.
pub struct Database {
    catalog: Rc<Catalog>,
    config: EngineConfig,
    next_transaction: Cell<u64>,
}

impl Database {
    /// Open (or create) the database in `dir` with the default configuration.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_config(dir, EngineConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(dir: P, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Catalog::open_with_pool_size(dir, config.buffer_pages, config.pool_pages)?;
        info!(
            dir = %catalog.dir().display(),
            buffer_pages = config.buffer_pages,
            "opened database"
        );
        Ok(Self {
            catalog: Rc::new(catalog),
            config,
            next_transaction: Cell::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn table_names(&self) -> Vec<String> {
        self.catalog.table_names()
    }

    pub fn create_table(&self, schema: &Schema, name: &str) -> Result<()> {
        self.catalog.create_table(name, schema)?;
        Ok(())
    }

    /// Create a table with an index on each of `columns`.
    pub fn create_table_with_indices(&self, schema: &Schema, name: &str, columns: &[&str]) -> Result<()> {
        self.catalog.create_table(name, schema)?;
        for column in columns {
            self.catalog.create_index(name, column)?;
        }
        Ok(())
    }

    pub fn begin_transaction(&self) -> Transaction {
        let id = self.next_transaction.get();
        self.next_transaction.set(id + 1);
        Transaction::begin(id, Rc::clone(&self.catalog))
    }

    /// Write every table and the catalog manifest to disk.
    pub fn flush(&self) -> Result<()> {
        self.catalog.flush()?;
        Ok(())
    }
}

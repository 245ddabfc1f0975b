//! Top-level handle: owns the table registry, the shared buffer pool, the
//! lock manager, and the monotonic transaction id counter. Persists table
//! metadata to `metadata.json` so a database can be reopened across runs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer_pool::BufferPool;
use crate::config::{Config, DB_METADATA_FILE};
use crate::error::Error;
use crate::lock_manager::LockManager;
use crate::table::Table;
use crate::transaction::Transaction;

#[derive(Serialize, Deserialize)]
struct TableMeta {
    name: String,
    num_columns: usize,
    key_index: usize,
}

#[derive(Serialize, Deserialize, Default)]
struct DbMeta {
    tables: Vec<TableMeta>,
}

/// A database instance: a registry of tables sharing one buffer pool and
/// lock manager, rooted at a directory on disk.
pub struct Database {
    config: Arc<Config>,
    buffer_pool: Arc<BufferPool>,
    lock_manager: Arc<LockManager>,
    tables: Mutex<HashMap<String, Arc<Table>>>,
    base_dir: PathBuf,
    next_txn_id: AtomicU64,
}

impl Database {
    /// Opens (or initializes) a database rooted at `path`. If a metadata
    /// file from a previous run is found, every listed table is recreated
    /// and its in-memory state rebuilt via [`Table::recover`].
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let base_dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("creating database directory {}", base_dir.display()))?;

        let config = Arc::new(Config {
            data_dir: base_dir.to_string_lossy().into_owned(),
            ..Config::default()
        });
        let buffer_pool = Arc::new(BufferPool::new(
            &config.data_dir,
            config.bufferpool_size,
            config.max_records_per_page,
        ));

        let db = Arc::new(Self {
            config,
            buffer_pool,
            lock_manager: Arc::new(LockManager::new()),
            tables: Mutex::new(HashMap::new()),
            base_dir,
            next_txn_id: AtomicU64::new(0),
        });

        let meta_path = db.metadata_path();
        if meta_path.exists() {
            let raw = fs::read_to_string(&meta_path)
                .with_context(|| format!("reading {}", meta_path.display()))?;
            let meta: DbMeta = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", meta_path.display()))?;

            let mut tables = db.tables.lock();
            for t in meta.tables {
                if tables.contains_key(&t.name) {
                    continue;
                }
                let table = Table::new(
                    t.name.clone(),
                    t.num_columns,
                    t.key_index,
                    db.buffer_pool.clone(),
                    db.config.clone(),
                );
                table.recover()?;
                tables.insert(t.name, table);
            }
        }

        Ok(db)
    }

    fn metadata_path(&self) -> PathBuf {
        self.base_dir.join(DB_METADATA_FILE)
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        self.lock_manager.clone()
    }

    /// Allocates a fresh transaction id, unique for the lifetime of this
    /// `Database` instance.
    pub fn new_transaction_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn begin_transaction(&self) -> Transaction {
        Transaction::new(self.new_transaction_id(), self.lock_manager.clone())
    }

    pub fn create_table(&self, name: impl Into<String>, num_columns: usize, key_index: usize) -> Result<Arc<Table>> {
        let name = name.into();
        let mut tables = self.tables.lock();
        if tables.contains_key(&name) {
            bail!(Error::Validation(format!("table {name} already exists")));
        }
        let table = Table::new(name.clone(), num_columns, key_index, self.buffer_pool.clone(), self.config.clone());
        tables.insert(name, table.clone());
        Ok(table)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!(Error::NotFound(format!("table {name}"))))
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!(Error::NotFound(format!("table {name}"))))
    }

    /// Persists table metadata, optionally runs a final synchronous merge
    /// over every table, then flushes all dirty pages.
    pub fn close(&self) -> Result<()> {
        let tables = self.tables.lock();

        let meta = DbMeta {
            tables: tables
                .values()
                .map(|t| TableMeta { name: t.name.clone(), num_columns: t.num_columns, key_index: t.key })
                .collect(),
        };
        let serialized = serde_json::to_string(&meta).context("serializing database metadata")?;
        fs::write(self.metadata_path(), serialized)
            .with_context(|| format!("writing {}", self.metadata_path().display()))?;

        if self.config.enable_background_merge {
            for table in tables.values() {
                table.merge_all()?;
            }
        }

        if self.config.flush_on_close {
            self.buffer_pool.flush_all()?;
        }
        Ok(())
    }
}

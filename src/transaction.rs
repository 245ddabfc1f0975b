//! A transaction is an ordered list of insert/update/delete operations run
//! against one or more tables under no-wait strict 2PL. A `LockConflict` or
//! an operation's own `false` result aborts and rolls back everything done
//! so far; otherwise every operation committing releases all locks held.

use std::sync::Arc;

use anyhow::Result;

use crate::error::Error;
use crate::lock_manager::LockManager;
use crate::table::Table;

enum Op {
    Insert {
        table: Arc<Table>,
        values: Vec<i64>,
    },
    Update {
        table: Arc<Table>,
        primary_key: i64,
        changes: Vec<Option<i64>>,
    },
    Delete {
        table: Arc<Table>,
        primary_key: i64,
    },
}

struct UpdatedEntry {
    table: Arc<Table>,
    rid: u64,
    old_indirection: i64,
    old_values: Vec<i64>,
}

/// One batch of operations executed atomically under no-wait 2PL.
pub struct Transaction {
    txn_id: u64,
    lock_manager: Arc<LockManager>,
    ops: Vec<Op>,
    inserted: Vec<(Arc<Table>, u64)>,
    updated: Vec<UpdatedEntry>,
    deleted: Vec<(Arc<Table>, u64)>,
}

impl Transaction {
    pub fn new(txn_id: u64, lock_manager: Arc<LockManager>) -> Self {
        Self {
            txn_id,
            lock_manager,
            ops: Vec::new(),
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    pub fn add_insert(&mut self, table: Arc<Table>, values: Vec<i64>) {
        self.ops.push(Op::Insert { table, values });
    }

    pub fn add_update(&mut self, table: Arc<Table>, primary_key: i64, changes: Vec<Option<i64>>) {
        self.ops.push(Op::Update { table, primary_key, changes });
    }

    pub fn add_delete(&mut self, table: Arc<Table>, primary_key: i64) {
        self.ops.push(Op::Delete { table, primary_key });
    }

    /// Runs every queued operation in order. Returns `true` on commit,
    /// `false` on abort (all effects rolled back, all locks released).
    pub fn run(&mut self) -> bool {
        let ops = std::mem::take(&mut self.ops);
        for op in &ops {
            match self.execute(op) {
                Ok(true) => continue,
                Ok(false) => return self.abort(),
                Err(_) => return self.abort(),
            }
        }
        self.commit()
    }

    fn execute(&mut self, op: &Op) -> Result<bool> {
        match op {
            Op::Insert { table, values } => {
                let ok = table.insert(values)?;
                if ok {
                    let rid = table.pk_to_rid(values[table.key])?.ok_or_else(|| {
                        Error::Internal("row vanished immediately after insert".into())
                    })?;
                    self.inserted.push((table.clone(), rid));
                }
                Ok(ok)
            }
            Op::Update { table, primary_key, changes } => {
                let rid = match table.pk_to_rid(*primary_key)? {
                    Some(rid) => rid,
                    None => return Ok(false),
                };
                self.lock_manager.acquire_exclusive(self.txn_id, rid)?;
                let (old_indirection, old_values) = table.snapshot_for_rollback(rid)?;
                let ok = table.update(rid, changes)?;
                if ok {
                    self.updated.push(UpdatedEntry {
                        table: table.clone(),
                        rid,
                        old_indirection,
                        old_values,
                    });
                }
                Ok(ok)
            }
            Op::Delete { table, primary_key } => {
                let rid = match table.pk_to_rid(*primary_key)? {
                    Some(rid) => rid,
                    None => return Ok(false),
                };
                self.lock_manager.acquire_exclusive(self.txn_id, rid)?;
                let ok = table.delete(rid)?;
                if ok {
                    self.deleted.push((table.clone(), rid));
                }
                Ok(ok)
            }
        }
    }

    fn abort(&mut self) -> bool {
        for entry in self.updated.drain(..) {
            let _ = entry.table.rollback_update(entry.rid, entry.old_indirection, &entry.old_values);
        }
        for (table, rid) in self.inserted.drain(..) {
            let _ = table.rollback_insert(rid);
        }
        for (table, rid) in self.deleted.drain(..) {
            let _ = table.rollback_delete(rid);
        }
        self.lock_manager.release_all(self.txn_id);
        false
    }

    fn commit(&mut self) -> bool {
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
        self.lock_manager.release_all(self.txn_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::config::Config;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> Arc<Table> {
        let config = Arc::new(Config {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        });
        let bp = Arc::new(BufferPool::new(&config.data_dir, config.bufferpool_size, config.max_records_per_page));
        Table::new("grades", 3, 0, bp, config)
    }

    #[test]
    fn successful_batch_commits() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        let lm = Arc::new(LockManager::new());
        let mut txn = Transaction::new(1, lm);
        txn.add_insert(t.clone(), vec![1, 90, 85]);
        txn.add_update(t.clone(), 1, vec![None, Some(95), None]);
        assert!(txn.run());
        assert_eq!(t.latest_values(0).unwrap(), vec![1, 95, 85]);
    }

    #[test]
    fn failed_update_aborts_and_rolls_back_insert() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        let lm = Arc::new(LockManager::new());
        let mut txn = Transaction::new(1, lm);
        txn.add_insert(t.clone(), vec![1, 90, 85]);
        // Updating a PK that doesn't exist fails and aborts the batch.
        txn.add_update(t.clone(), 999, vec![None, Some(1), None]);
        assert!(!txn.run());
        assert!(t.is_deleted(0));
        assert_eq!(t.pk_to_rid(1).unwrap(), None);
    }

    #[test]
    fn lock_conflict_aborts_transaction() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        t.insert(&[1, 90, 85]).unwrap();
        let lm = Arc::new(LockManager::new());
        lm.acquire_exclusive(99, 0).unwrap(); // simulate a concurrent holder

        let mut txn = Transaction::new(1, lm.clone());
        txn.add_update(t.clone(), 1, vec![None, Some(1), None]);
        assert!(!txn.run());
        assert_eq!(t.latest_values(0).unwrap(), vec![1, 90, 85]);
    }

    #[test]
    fn aborted_delete_is_restored() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        t.insert(&[1, 90, 85]).unwrap();
        let lm = Arc::new(LockManager::new());

        let mut txn = Transaction::new(1, lm.clone());
        txn.add_delete(t.clone(), 1);
        txn.add_update(t.clone(), 999, vec![None, Some(1), None]); // forces abort
        assert!(!txn.run());
        assert!(!t.is_deleted(0));
        assert_eq!(t.pk_to_rid(1).unwrap(), Some(0));
    }
}

//! Runs a batch of transactions on a dedicated thread, retrying aborted
//! transactions with exponential backoff until they commit or exhaust
//! their retry budget.

use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;

use crate::transaction::Transaction;

const MAX_RETRIES: u32 = 100;

pub struct TransactionWorker {
    transactions: Vec<Transaction>,
    handle: Option<JoinHandle<Vec<bool>>>,
}

impl TransactionWorker {
    pub fn new() -> Self {
        Self { transactions: Vec::new(), handle: None }
    }

    pub fn add_transaction(&mut self, txn: Transaction) {
        self.transactions.push(txn);
    }

    /// Runs every queued transaction on a background thread, retrying
    /// each one (with backoff) until it commits or exhausts `MAX_RETRIES`.
    pub fn run(&mut self) {
        let mut transactions = std::mem::take(&mut self.transactions);
        self.handle = Some(
            std::thread::Builder::new()
                .name("transaction-worker".into())
                .spawn(move || {
                    let mut stats = Vec::with_capacity(transactions.len());
                    for txn in transactions.iter_mut() {
                        stats.push(run_with_retry(txn));
                    }
                    stats
                })
                .expect("spawn transaction worker thread"),
        );
    }

    /// Blocks until the worker thread finishes and returns the per-transaction
    /// commit/abort outcomes, in submission order.
    pub fn join(&mut self) -> Vec<bool> {
        match self.handle.take() {
            Some(h) => h.join().expect("transaction worker thread panicked"),
            None => Vec::new(),
        }
    }
}

impl Default for TransactionWorker {
    fn default() -> Self {
        Self::new()
    }
}

fn run_with_retry(txn: &mut Transaction) -> bool {
    for retry in 0..MAX_RETRIES {
        if txn.run() {
            return true;
        }
        let delay_ms = 1u64.saturating_mul((retry as u64 + 1).min(10));
        let jitter_ms = rand::thread_rng().gen_range(0..=delay_ms / 2 + 1);
        std::thread::sleep(Duration::from_millis(delay_ms + jitter_ms));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::config::Config;
    use crate::lock_manager::LockManager;
    use crate::table::Table;
    use std::sync::Arc;
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
    fn runs_all_transactions_and_reports_outcomes() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        let lm = Arc::new(LockManager::new());

        let mut worker = TransactionWorker::new();
        for pk in 0..5 {
            let mut txn = Transaction::new(pk as u64, lm.clone());
            txn.add_insert(t.clone(), vec![pk, pk * 10, pk * 20]);
            worker.add_transaction(txn);
        }
        worker.run();
        let stats = worker.join();
        assert_eq!(stats, vec![true; 5]);
        assert_eq!(t.latest_values(0).unwrap(), vec![0, 0, 0]);
        assert_eq!(t.latest_values(4).unwrap(), vec![4, 40, 80]);
    }

    #[test]
    fn conflicting_insert_eventually_reports_failure() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        let lm = Arc::new(LockManager::new());
        t.insert(&[1, 90, 85]).unwrap();

        let mut worker = TransactionWorker::new();
        let mut txn = Transaction::new(1, lm);
        txn.add_insert(t.clone(), vec![1, 1, 1]); // duplicate PK, always fails
        worker.add_transaction(txn);
        worker.run();
        assert_eq!(worker.join(), vec![false]);
    }

    #[test]
    fn aborted_transaction_succeeds_once_the_holder_releases_its_lock() {
        let dir = TempDir::new().unwrap();
        let t = table(&dir);
        let lm = Arc::new(LockManager::new());
        t.insert(&[1, 90, 85]).unwrap();

        // A concurrent holder (txn 99) holds the row's lock, forcing our
        // transaction's first attempt(s) to abort with a LockConflict. It
        // releases shortly after, so a later retry should go through.
        lm.acquire_exclusive(99, 0).unwrap();
        let lm_releaser = lm.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            lm_releaser.release_all(99);
        });

        let mut worker = TransactionWorker::new();
        let mut txn = Transaction::new(1, lm);
        txn.add_update(t.clone(), 1, vec![None, Some(99), None]);
        worker.add_transaction(txn);
        worker.run();
        assert_eq!(worker.join(), vec![true]);
        assert_eq!(t.latest_values(0).unwrap(), vec![1, 99, 85]);
    }
}

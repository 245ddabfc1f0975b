//! No-wait strict two-phase locking: per-RID shared/exclusive locks behind
//! a single mutex. Conflicts fail immediately rather than block, so callers
//! abort and retry instead of risking deadlock.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::error::Error;

pub type TxnId = u64;

#[derive(Default)]
struct LockEntry {
    shared: HashSet<TxnId>,
    exclusive: Option<TxnId>,
}

impl LockEntry {
    fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }
}

pub struct LockManager {
    locks: Mutex<HashMap<u64, LockEntry>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Multiple transactions may hold a shared lock on the same RID.
    pub fn acquire_shared(&self, txn_id: TxnId, rid: u64) -> Result<()> {
        let mut locks = self.locks.lock();
        let entry = locks.entry(rid).or_default();

        if entry.shared.contains(&txn_id) || entry.exclusive == Some(txn_id) {
            return Ok(());
        }
        if entry.exclusive.is_some() {
            bail!(Error::LockConflict { rid });
        }
        entry.shared.insert(txn_id);
        Ok(())
    }

    /// Only one transaction may hold an exclusive lock. A sole shared
    /// holder may upgrade in place; any other conflict fails immediately.
    pub fn acquire_exclusive(&self, txn_id: TxnId, rid: u64) -> Result<()> {
        let mut locks = self.locks.lock();
        let entry = locks.entry(rid).or_default();

        if entry.exclusive == Some(txn_id) {
            return Ok(());
        }
        if entry.shared.contains(&txn_id) {
            if entry.shared.len() == 1 {
                entry.shared.remove(&txn_id);
                entry.exclusive = Some(txn_id);
                return Ok(());
            }
            bail!(Error::LockConflict { rid });
        }
        if !entry.shared.is_empty() || entry.exclusive.is_some() {
            bail!(Error::LockConflict { rid });
        }
        entry.exclusive = Some(txn_id);
        Ok(())
    }

    /// Releases every lock `txn_id` holds, across all RIDs. Called on
    /// commit and on abort.
    pub fn release_all(&self, txn_id: TxnId) {
        let mut locks = self.locks.lock();
        locks.retain(|_, entry| {
            entry.shared.remove(&txn_id);
            if entry.exclusive == Some(txn_id) {
                entry.exclusive = None;
            }
            !entry.is_empty()
        });
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_shared_holders_allowed() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 10).unwrap();
        lm.acquire_shared(2, 10).unwrap();
    }

    #[test]
    fn exclusive_conflicts_with_existing_shared() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 10).unwrap();
        assert!(lm.acquire_exclusive(2, 10).is_err());
    }

    #[test]
    fn sole_shared_holder_can_upgrade() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 10).unwrap();
        lm.acquire_exclusive(1, 10).unwrap();
    }

    #[test]
    fn upgrade_fails_with_other_shared_holders() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 10).unwrap();
        lm.acquire_shared(2, 10).unwrap();
        assert!(lm.acquire_exclusive(1, 10).is_err());
    }

    #[test]
    fn exclusive_then_shared_by_other_txn_conflicts() {
        let lm = LockManager::new();
        lm.acquire_exclusive(1, 10).unwrap();
        assert!(lm.acquire_shared(2, 10).is_err());
    }

    #[test]
    fn release_all_frees_every_rid_for_that_txn() {
        let lm = LockManager::new();
        lm.acquire_exclusive(1, 10).unwrap();
        lm.acquire_shared(1, 20).unwrap();
        lm.release_all(1);
        lm.acquire_exclusive(2, 10).unwrap();
        lm.acquire_exclusive(2, 20).unwrap();
    }

    #[test]
    fn reacquiring_own_lock_is_a_no_op() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 10).unwrap();
        lm.acquire_shared(1, 10).unwrap();
        lm.acquire_exclusive(1, 20).unwrap();
        lm.acquire_exclusive(1, 20).unwrap();
    }
}

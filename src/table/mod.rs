//! Column-store table: base records plus cumulative tail versions linked
//! through the INDIRECTION chain, backed by the shared buffer pool.

mod merge;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::buffer_pool::BufferPool;
use crate::config::{Config, INDIRECTION_COLUMN, RID_COLUMN, SCHEMA_ENCODING_COLUMN};
use crate::error::Error;
use crate::index::Index;
use crate::page::PageId;
use crate::printdbg;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

type Slot = (PageId, usize);

struct TableState {
    /// RID -> one `(PageId, slot)` per physical column (META + user).
    page_directory: HashMap<u64, Vec<Option<Slot>>>,
    base_record_count: u64,
    tail_record_count: u64,
    deleted: HashSet<u64>,
    index: Index,
    merge_inflight: HashSet<usize>,
    /// range_id -> unconsolidated tail writes observed since the last merge.
    pending_tail_count: HashMap<usize, usize>,
    /// range_id -> wall-clock time of the most recent completed merge.
    tps: HashMap<usize, i64>,
}

/// A single table's base + tail storage, secondary indexes, and an optional
/// background merge worker. Cheap to clone via `Arc` so the same table can
/// be shared across transaction worker threads and the merge thread.
pub struct Table {
    pub name: String,
    /// 0-based user-column index of the primary key.
    pub key: usize,
    /// Number of user columns (excludes the 4 meta columns).
    pub num_columns: usize,
    buffer_pool: Arc<BufferPool>,
    config: Arc<Config>,
    state: Mutex<TableState>,
    merge_tx: Option<Sender<usize>>,
}

impl Table {
    pub fn new(
        name: impl Into<String>,
        num_columns: usize,
        key: usize,
        buffer_pool: Arc<BufferPool>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        let name = name.into();
        let merge_enabled = config.enable_background_merge;
        let (merge_tx, merge_rx) = if merge_enabled {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let table = Arc::new(Self {
            state: Mutex::new(TableState {
                page_directory: HashMap::new(),
                base_record_count: 0,
                tail_record_count: 0,
                deleted: HashSet::new(),
                index: Index::new(num_columns, key),
                merge_inflight: HashSet::new(),
                pending_tail_count: HashMap::new(),
                tps: HashMap::new(),
            }),
            name,
            key,
            num_columns,
            buffer_pool,
            config,
            merge_tx,
        });

        if let Some(rx) = merge_rx {
            let weak: Weak<Table> = Arc::downgrade(&table);
            std::thread::Builder::new()
                .name(format!("merge-worker-{}", table.name))
                .spawn(move || merge::run(weak, rx))
                .expect("spawn merge worker thread");
        }

        table
    }

    fn total_cols(&self) -> usize {
        self.config.meta_columns + self.num_columns
    }

    fn is_base_rid(&self, rid: u64) -> bool {
        rid < self.config.tail_rid_start
    }

    fn page_no_for(&self, ordinal: u64) -> usize {
        (ordinal / self.config.max_records_per_page as u64) as usize
    }

    // ---------- cell access ----------

    fn read_cell(&self, state: &TableState, rid: u64, col: usize) -> Result<i64> {
        let (pid, slot) = state
            .page_directory
            .get(&rid)
            .and_then(|cols| cols.get(col))
            .and_then(|s| s.clone())
            .ok_or_else(|| anyhow!(Error::NotFound(format!("rid {rid} column {col}"))))?;
        self.buffer_pool.get(&pid)?.read(slot)
    }

    fn overwrite_cell(&self, state: &TableState, rid: u64, col: usize, value: i64) -> Result<()> {
        let (pid, slot) = state
            .page_directory
            .get(&rid)
            .and_then(|cols| cols.get(col))
            .and_then(|s| s.clone())
            .ok_or_else(|| anyhow!(Error::NotFound(format!("rid {rid} column {col}"))))?;
        self.buffer_pool.pin(&pid)?;
        let mut page = self.buffer_pool.get(&pid)?;
        page.overwrite(slot, value)?;
        self.buffer_pool.put(&pid, page);
        self.buffer_pool.mark_dirty(&pid);
        self.buffer_pool.unpin(&pid);
        Ok(())
    }

    fn get_latest_rid(&self, state: &TableState, base_rid: u64) -> Result<u64> {
        let indir = self.read_cell(state, base_rid, INDIRECTION_COLUMN)?;
        Ok(if indir == 0 { base_rid } else { indir as u64 })
    }

    fn read_user_values(&self, state: &TableState, rid: u64) -> Result<Vec<i64>> {
        (0..self.num_columns)
            .map(|i| self.read_cell(state, rid, self.config.meta_columns + i))
            .collect()
    }

    fn materialize_latest(&self, state: &TableState, base_rid: u64) -> Result<Vec<i64>> {
        let latest = self.get_latest_rid(state, base_rid)?;
        self.read_user_values(state, latest)
    }

    /// Newest-to-oldest tail RIDs for `base_rid`'s version chain.
    fn collect_tail_chain(&self, state: &TableState, base_rid: u64) -> Result<Vec<u64>> {
        let mut chain = Vec::new();
        let mut cur = self.read_cell(state, base_rid, INDIRECTION_COLUMN)?;
        while cur != 0 {
            let rid = cur as u64;
            chain.push(rid);
            cur = self.read_cell(state, rid, INDIRECTION_COLUMN)?;
        }
        Ok(chain)
    }

    /// `rv_index = 0` is the newest version, `rv_index = k` is `k` versions
    /// older, clamped to the base row once the chain is exhausted. Tails
    /// are cumulative snapshots, so the target version can be read directly
    /// without overlaying deltas.
    fn compose_row_at_version(&self, state: &TableState, base_rid: u64, rv_index: usize) -> Result<Vec<i64>> {
        let chain = self.collect_tail_chain(state, base_rid)?;
        match chain.get(rv_index) {
            Some(&rid) => self.read_user_values(state, rid),
            None => self.read_user_values(state, base_rid),
        }
    }

    fn write_physical_row(&self, state: &mut TableState, rid: u64, page_no: usize, is_base: bool, row: &[i64]) -> Result<()> {
        let total = self.total_cols();
        let slots = state
            .page_directory
            .entry(rid)
            .or_insert_with(|| vec![None; total]);
        if slots.len() < total {
            slots.resize(total, None);
        }

        for col in 0..total {
            let pid = PageId::new(&self.name, col, page_no, is_base);
            self.buffer_pool.pin(&pid)?;
            let mut page = self.buffer_pool.get(&pid)?;
            let slot = page.append(row[col])?;
            self.buffer_pool.put(&pid, page);
            self.buffer_pool.mark_dirty(&pid);
            self.buffer_pool.unpin(&pid);
            slots[col] = Some((pid, slot));
        }
        Ok(())
    }

    // ---------- public API ----------

    pub fn is_indexed(&self, col: usize) -> bool {
        self.state.lock().index.is_indexed(col)
    }

    pub fn locate(&self, col: usize, value: i64) -> Vec<u64> {
        self.state.lock().index.locate(col, value)
    }

    pub fn locate_range(&self, col: usize, lo: i64, hi: i64) -> Vec<u64> {
        self.state.lock().index.locate_range(col, lo, hi)
    }

    pub fn create_index(&self, col: usize) -> Result<()> {
        let mut state = self.state.lock();
        let meta = self.config.meta_columns;
        let mut rows = Vec::new();
        let live: Vec<u64> = state
            .page_directory
            .keys()
            .copied()
            .filter(|&rid| self.is_base_rid(rid) && !state.deleted.contains(&rid))
            .collect();
        for rid in live {
            let latest = self.get_latest_rid(&state, rid)?;
            let value = self.read_cell(&state, latest, meta + col)?;
            rows.push((rid, value));
        }
        state.index.create_index(col, rows)
    }

    pub fn drop_index(&self, col: usize) -> Result<()> {
        self.state.lock().index.drop_index(col)
    }

    /// Resolves a primary key to its live base RID, `None` if absent or
    /// logically deleted.
    pub fn pk_to_rid(&self, pk: i64) -> Result<Option<u64>> {
        let state = self.state.lock();
        if state.index.is_indexed(self.key) {
            if let Some(&rid) = state.index.locate(self.key, pk).first() {
                return Ok((!state.deleted.contains(&rid)).then_some(rid));
            }
            return Ok(None);
        }
        let key_col = self.config.meta_columns + self.key;
        for (&rid, _) in state.page_directory.iter() {
            if !self.is_base_rid(rid) || state.deleted.contains(&rid) {
                continue;
            }
            if self.read_cell(&state, rid, key_col)? == pk {
                return Ok(Some(rid));
            }
        }
        Ok(None)
    }

    pub fn is_deleted(&self, rid: u64) -> bool {
        self.state.lock().deleted.contains(&rid)
    }

    /// Every live (non-deleted) base RID. Used by full-table scans when a
    /// column has no secondary index.
    pub fn live_base_rids(&self) -> Vec<u64> {
        let state = self.state.lock();
        state
            .page_directory
            .keys()
            .copied()
            .filter(|&rid| self.is_base_rid(rid) && !state.deleted.contains(&rid))
            .collect()
    }

    pub fn latest_values(&self, base_rid: u64) -> Result<Vec<i64>> {
        let state = self.state.lock();
        self.materialize_latest(&state, base_rid)
    }

    pub fn values_at_version(&self, base_rid: u64, relative_version: i64) -> Result<Vec<i64>> {
        let state = self.state.lock();
        let rv_index = if relative_version >= 0 { 0 } else { (-relative_version) as usize };
        self.compose_row_at_version(&state, base_rid, rv_index)
    }

    /// Appends a new base record. `false` on a contract violation (wrong
    /// column count, duplicate PK); errors only for storage faults.
    pub fn insert(&self, values: &[i64]) -> Result<bool> {
        if values.len() != self.num_columns {
            return Ok(false);
        }
        let pk_val = values[self.key];

        let mut state = self.state.lock();
        if !state.index.locate(self.key, pk_val).is_empty() {
            return Ok(false);
        }

        let rid = state.base_record_count;
        let page_no = self.page_no_for(rid);

        let mut row = Vec::with_capacity(self.total_cols());
        row.push(0); // INDIRECTION
        row.push(rid as i64); // RID
        row.push(now_ms()); // TIMESTAMP
        row.push(0); // SCHEMA_ENCODING
        row.extend_from_slice(values);

        self.write_physical_row(&mut state, rid, page_no, true, &row)?;
        state.base_record_count += 1;

        for col in 0..self.num_columns {
            if state.index.is_indexed(col) {
                state.index.insert_entry(col, values[col], rid)?;
            }
        }
        Ok(true)
    }

    /// Writes a cumulative tail snapshot for `base_rid`. `columns[i] = None`
    /// means "no change". `false` if the row doesn't exist or is deleted.
    pub fn update(&self, base_rid: u64, columns: &[Option<i64>]) -> Result<bool> {
        if columns.len() != self.num_columns {
            return Ok(false);
        }

        let mut state = self.state.lock();
        if !state.page_directory.contains_key(&base_rid) || state.deleted.contains(&base_rid) {
            return Ok(false);
        }

        let latest_rid = self.get_latest_rid(&state, base_rid)?;
        let current = self.read_user_values(&state, latest_rid)?;

        let mut new_vals = current.clone();
        let mut bitmask: i64 = 0;
        for (i, v) in columns.iter().enumerate() {
            if let Some(val) = v {
                if *val != current[i] {
                    new_vals[i] = *val;
                    bitmask |= 1 << i;
                }
            }
        }
        if bitmask == 0 {
            return Ok(true);
        }

        let new_tail_rid = self.config.tail_rid_start + state.tail_record_count;
        let page_no = self.page_no_for(state.tail_record_count);
        let prev_ptr = if latest_rid != base_rid { latest_rid as i64 } else { 0 };

        let mut row = Vec::with_capacity(self.total_cols());
        row.push(prev_ptr);
        row.push(new_tail_rid as i64);
        row.push(now_ms());
        row.push(bitmask);
        row.extend_from_slice(&new_vals);

        self.write_physical_row(&mut state, new_tail_rid, page_no, false, &row)?;
        state.tail_record_count += 1;

        self.overwrite_cell(&state, base_rid, INDIRECTION_COLUMN, new_tail_rid as i64)?;

        for col in 0..self.num_columns {
            if bitmask & (1 << col) != 0 && state.index.is_indexed(col) {
                state.index.update_entry(col, base_rid, current[col], new_vals[col])?;
            }
        }

        if self.merge_tx.is_some() {
            let range_id = self.page_no_for(base_rid);
            let count = state.pending_tail_count.entry(range_id).or_insert(0);
            *count += 1;
            if *count >= self.config.merge_tail_threshold {
                *count = 0;
                drop(state);
                self.schedule_merge(range_id);
                return Ok(true);
            }
        }
        Ok(true)
    }

    /// Logical delete: the row stays on disk, but is hidden from reads and
    /// its PK index entry is removed.
    pub fn delete(&self, base_rid: u64) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.page_directory.contains_key(&base_rid) || state.deleted.contains(&base_rid) {
            return Ok(false);
        }
        let key_col = self.config.meta_columns + self.key;
        let pk_val = self.read_cell(&state, base_rid, key_col)?;
        state.deleted.insert(base_rid);
        state.index.delete_pk(pk_val);
        Ok(true)
    }

    // ---------- transaction rollback hooks ----------

    pub fn rollback_insert(&self, rid: u64) -> Result<()> {
        let mut state = self.state.lock();
        let key_col = self.config.meta_columns + self.key;
        let pk_val = self.read_cell(&state, rid, key_col)?;
        state.deleted.insert(rid);
        state.index.delete_pk(pk_val);
        Ok(())
    }

    pub fn rollback_delete(&self, rid: u64) -> Result<()> {
        let mut state = self.state.lock();
        let key_col = self.config.meta_columns + self.key;
        let pk_val = self.read_cell(&state, rid, key_col)?;
        state.deleted.remove(&rid);
        state.index.restore_pk(pk_val, rid);
        Ok(())
    }

    /// Restores `base_rid` to `old_values` via a compensating update, then
    /// resets INDIRECTION to `old_indirection`, orphaning the compensating
    /// tail (it stays on disk, just unreachable from the live chain).
    pub fn rollback_update(&self, base_rid: u64, old_indirection: i64, old_values: &[i64]) -> Result<()> {
        let restore: Vec<Option<i64>> = old_values.iter().map(|v| Some(*v)).collect();
        self.update(base_rid, &restore)?;
        let state = self.state.lock();
        self.overwrite_cell(&state, base_rid, INDIRECTION_COLUMN, old_indirection)
    }

    /// `(indirection, latest user values)` snapshot taken before a mutation,
    /// for the transaction's undo log.
    pub fn snapshot_for_rollback(&self, base_rid: u64) -> Result<(i64, Vec<i64>)> {
        let state = self.state.lock();
        let indirection = self.read_cell(&state, base_rid, INDIRECTION_COLUMN)?;
        let latest_rid = self.get_latest_rid(&state, base_rid)?;
        let values = self.read_user_values(&state, latest_rid)?;
        Ok((indirection, values))
    }

    // ---------- merge ----------

    fn schedule_merge(&self, range_id: usize) {
        let tx = match &self.merge_tx {
            Some(tx) => tx,
            None => return,
        };
        let mut state = self.state.lock();
        if state.merge_inflight.insert(range_id) {
            let _ = tx.send(range_id);
        }
    }

    /// History-preserving consolidation: materializes each live base row's
    /// latest version back into its base slots and resets INDIRECTION and
    /// SCHEMA_ENCODING. Superseded tail pages remain on disk, just
    /// unreachable from the live chain.
    fn consolidate_range(&self, range_id: usize) -> Result<()> {
        let state = self.state.lock();
        let meta = self.config.meta_columns;
        let rids: Vec<u64> = state
            .page_directory
            .keys()
            .copied()
            .filter(|&rid| {
                self.is_base_rid(rid) && !state.deleted.contains(&rid) && self.page_no_for(rid) == range_id
            })
            .collect();

        for rid in &rids {
            let latest = self.materialize_latest(&state, *rid)?;
            for (i, v) in latest.iter().enumerate() {
                self.overwrite_cell(&state, *rid, meta + i, *v)?;
            }
            self.overwrite_cell(&state, *rid, INDIRECTION_COLUMN, 0)?;
            self.overwrite_cell(&state, *rid, SCHEMA_ENCODING_COLUMN, 0)?;
        }
        drop(state);
        self.state.lock().tps.insert(range_id, now_ms());
        Ok(())
    }

    /// Synchronous merge of every range; called from `Database::close` when
    /// background merging is disabled but a final consolidation is wanted.
    pub fn merge_all(&self) -> Result<()> {
        let ranges: HashSet<usize> = {
            let state = self.state.lock();
            state
                .page_directory
                .keys()
                .copied()
                .filter(|&rid| self.is_base_rid(rid) && !state.deleted.contains(&rid))
                .map(|rid| self.page_no_for(rid))
                .collect()
        };
        for range_id in ranges {
            self.consolidate_range(range_id)?;
        }
        Ok(())
    }

    /// Flushes every dirty page this table owns to disk.
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    // ---------- recovery ----------

    /// Rebuilds `page_directory` and the record counters from on-disk
    /// pages, by scanning the RID column of each page and binding every
    /// physical column at the same slot. Rebuilds only the PK index; other
    /// secondary indexes must be recreated explicitly after recovery.
    pub fn recover(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.page_directory.clear();
        state.base_record_count = 0;
        state.tail_record_count = 0;
        state.index = Index::new(self.num_columns, self.key);

        let total = self.total_cols();
        let page_ids = self.buffer_pool.list_page_ids(&self.name)?;
        let mut max_tail_seq: i64 = -1;

        for pid in page_ids {
            if pid.col != RID_COLUMN {
                continue;
            }
            let page = self.buffer_pool.get(&pid)?;
            for slot in 0..page.num_records() {
                let rid_val = page.read(slot)? as u64;
                let entry = state
                    .page_directory
                    .entry(rid_val)
                    .or_insert_with(|| vec![None; total]);
                for col in 0..total {
                    let col_pid = PageId::new(&self.name, col, pid.page_no, pid.is_base);
                    entry[col] = Some((col_pid, slot));
                }
                if pid.is_base {
                    state.base_record_count = state.base_record_count.max(rid_val + 1);
                } else if rid_val >= self.config.tail_rid_start {
                    max_tail_seq = max_tail_seq.max((rid_val - self.config.tail_rid_start) as i64);
                }
            }
        }
        state.tail_record_count = if max_tail_seq >= 0 { (max_tail_seq + 1) as u64 } else { 0 };

        let live: Vec<u64> = state
            .page_directory
            .keys()
            .copied()
            .filter(|&rid| self.is_base_rid(rid))
            .collect();
        let key_col = self.config.meta_columns + self.key;
        for rid in live {
            let pk_val = self.read_cell(&state, rid, key_col)?;
            state.index.insert_entry(self.key, pk_val, rid)?;
        }
        printdbg!(
            "table {}: recovered {} base rows, {} tail rows",
            self.name,
            state.base_record_count,
            state.tail_record_count
        );
        Ok(())
    }
}

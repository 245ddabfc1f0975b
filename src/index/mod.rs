//! Secondary indexes: one optional value→[RID] posting list per column,
//! with the primary key column indexed unconditionally.

mod btree;

use std::collections::HashMap;

use anyhow::{bail, Result};

pub use btree::BPlusTree;

use crate::error::Error;

/// Per-column posting list, plus an optional ordered B+ tree mirror used to
/// accelerate `locate_range` (see [`BPlusTree`]).
struct Column {
    posting: HashMap<i64, Vec<u64>>,
    ordered: Option<BPlusTree<i64, Vec<u64>>>,
}

impl Column {
    fn empty() -> Self {
        Self {
            posting: HashMap::new(),
            ordered: None,
        }
    }
}

pub struct Index {
    pk_column: usize,
    columns: Vec<Option<Column>>,
}

impl Index {
    /// Builds an index with `num_columns` slots; the primary key column is
    /// indexed immediately (empty), every other column starts unindexed.
    pub fn new(num_columns: usize, pk_column: usize) -> Self {
        let mut columns: Vec<Option<Column>> = (0..num_columns).map(|_| None).collect();
        columns[pk_column] = Some(Column::empty());
        Self { pk_column, columns }
    }

    pub fn is_indexed(&self, col: usize) -> bool {
        self.columns.get(col).map(|c| c.is_some()).unwrap_or(false)
    }

    pub fn locate(&self, col: usize, value: i64) -> Vec<u64> {
        match self.columns.get(col).and_then(|c| c.as_ref()) {
            Some(column) => column.posting.get(&value).cloned().unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Concatenated posting lists for values in `[lo, hi]`. Ascending order
    /// when the column has an ordered backing, unspecified order otherwise.
    pub fn locate_range(&self, col: usize, lo: i64, hi: i64) -> Vec<u64> {
        let column = match self.columns.get(col).and_then(|c| c.as_ref()) {
            Some(c) => c,
            None => return Vec::new(),
        };

        if let Some(tree) = &column.ordered {
            return tree
                .range(&lo, &hi)
                .into_iter()
                .flat_map(|(_, rids)| rids)
                .collect();
        }

        column
            .posting
            .iter()
            .filter(|(k, _)| **k >= lo && **k <= hi)
            .flat_map(|(_, rids)| rids.iter().copied())
            .collect()
    }

    /// PK uses unique assignment (singleton list); non-PK appends.
    pub fn insert_entry(&mut self, col: usize, value: i64, rid: u64) -> Result<()> {
        let pk_column = self.pk_column;
        let column = match self.columns.get_mut(col).and_then(|c| c.as_mut()) {
            Some(c) => c,
            None => return Ok(()),
        };

        if col == pk_column {
            column.posting.insert(value, vec![rid]);
        } else {
            column.posting.entry(value).or_default().push(rid);
        }
        if let Some(tree) = &mut column.ordered {
            let bucket = column.posting.get(&value).cloned().unwrap_or_default();
            tree.insert(value, bucket);
        }
        Ok(())
    }

    /// No-op for PK; for non-PK moves `rid` from `old`'s bucket to `new`'s.
    pub fn update_entry(&mut self, col: usize, rid: u64, old: i64, new: i64) -> Result<()> {
        if col == self.pk_column {
            return Ok(());
        }
        let column = match self.columns.get_mut(col).and_then(|c| c.as_mut()) {
            Some(c) => c,
            None => return Ok(()),
        };

        if let Some(bucket) = column.posting.get_mut(&old) {
            bucket.retain(|&r| r != rid);
            if bucket.is_empty() {
                column.posting.remove(&old);
            }
        }
        column.posting.entry(new).or_default().push(rid);

        if let Some(tree) = &mut column.ordered {
            match column.posting.get(&old) {
                Some(bucket) => tree.insert(old, bucket.clone()),
                None => {
                    tree.delete(&old);
                }
            }
            let new_bucket = column.posting.get(&new).cloned().unwrap_or_default();
            tree.insert(new, new_bucket);
        }
        Ok(())
    }

    /// Populates `col`'s posting list from `rows` (live base RID, value
    /// pairs for that column's latest materialized value). Fails if `col`
    /// is already indexed.
    pub fn create_index(&mut self, col: usize, rows: impl IntoIterator<Item = (u64, i64)>) -> Result<()> {
        if self.is_indexed(col) {
            bail!(Error::Validation(format!("column {col} is already indexed")));
        }
        let mut column = Column::empty();
        for (rid, value) in rows {
            column.posting.entry(value).or_default().push(rid);
        }
        self.columns[col] = Some(column);
        Ok(())
    }

    /// Clears `col`'s index slot. The primary key column cannot be dropped.
    pub fn drop_index(&mut self, col: usize) -> Result<()> {
        if col == self.pk_column {
            bail!(Error::Validation("cannot drop the primary key index".into()));
        }
        if let Some(slot) = self.columns.get_mut(col) {
            *slot = None;
        }
        Ok(())
    }

    /// Removes the primary key's singleton entry for `value` (used when a
    /// row is logically deleted).
    pub fn delete_pk(&mut self, value: i64) {
        if let Some(column) = self.columns[self.pk_column].as_mut() {
            column.posting.remove(&value);
        }
    }

    /// Restores the primary key's singleton entry for `value` (used when an
    /// abort undoes a delete).
    pub fn restore_pk(&mut self, value: i64, rid: u64) {
        if let Some(column) = self.columns[self.pk_column].as_mut() {
            column.posting.insert(value, vec![rid]);
        }
    }

    /// Builds the ordered B+ tree mirror for an already-indexed column from
    /// its current posting list, so future `locate_range` calls use it.
    pub fn use_ordered_backing(&mut self, col: usize, order: Option<usize>) -> Result<()> {
        let column = match self.columns.get_mut(col).and_then(|c| c.as_mut()) {
            Some(c) => c,
            None => bail!(Error::Validation(format!("column {col} is not indexed"))),
        };
        let mut tree = match order {
            Some(o) => BPlusTree::with_order(o),
            None => BPlusTree::new(),
        };
        for (value, rids) in &column.posting {
            tree.insert(*value, rids.clone());
        }
        column.ordered = Some(tree);
        Ok(())
    }
}

//! Thin per-table operator surface. Mirrors the table's `Result`-returning
//! API but satisfies a boolean/list contract: any internal error collapses
//! to `false` / an empty list rather than propagating.

use std::sync::Arc;

use crate::table::Table;

/// A materialized row with an optional column-level projection applied;
/// unselected columns read back as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub columns: Vec<Option<i64>>,
}

pub struct Query {
    table: Arc<Table>,
}

impl Query {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }

    fn num_user_cols(&self) -> usize {
        self.table.num_columns
    }

    /// Normalizes a projection mask to exactly `num_columns` entries,
    /// defaulting to "select everything" when the mask doesn't fit.
    fn normalize_projection(&self, mask: &[u8]) -> Vec<u8> {
        if mask.len() == self.num_user_cols() {
            mask.to_vec()
        } else {
            vec![1; self.num_user_cols()]
        }
    }

    fn project(&self, row: &[i64], mask: &[u8]) -> Record {
        let columns = row
            .iter()
            .zip(mask.iter())
            .map(|(v, keep)| if *keep != 0 { Some(*v) } else { None })
            .collect();
        Record { columns }
    }

    pub fn insert(&self, columns: &[i64]) -> bool {
        self.table.insert(columns).unwrap_or(false)
    }

    pub fn delete(&self, primary_key: i64) -> bool {
        let rid = match self.table.pk_to_rid(primary_key) {
            Ok(Some(rid)) => rid,
            _ => return false,
        };
        self.table.delete(rid).unwrap_or(false)
    }

    pub fn update(&self, primary_key: i64, columns: &[Option<i64>]) -> bool {
        if columns.len() != self.num_user_cols() {
            return false;
        }
        let rid = match self.table.pk_to_rid(primary_key) {
            Ok(Some(rid)) => rid,
            _ => return false,
        };
        self.table.update(rid, columns).unwrap_or(false)
    }

    pub fn select(&self, search_key: i64, search_key_index: usize, projected_columns_index: &[u8]) -> Vec<Record> {
        let proj = self.normalize_projection(projected_columns_index);

        if search_key_index == self.table.key {
            return match self.table.pk_to_rid(search_key) {
                Ok(Some(rid)) => match self.table.latest_values(rid) {
                    Ok(row) => vec![self.project(&row, &proj)],
                    Err(_) => Vec::new(),
                },
                _ => Vec::new(),
            };
        }

        let rids = if self.table.is_indexed(search_key_index) {
            self.table.locate(search_key_index, search_key)
        } else {
            self.table.live_base_rids()
        };

        let mut rows = Vec::new();
        for rid in rids {
            if self.table.is_deleted(rid) {
                continue;
            }
            let row = match self.table.latest_values(rid) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if self.table.is_indexed(search_key_index) || row.get(search_key_index) == Some(&search_key) {
                rows.push(self.project(&row, &proj));
            }
        }
        rows
    }

    pub fn select_version(
        &self,
        search_key: i64,
        search_key_index: usize,
        projected_columns_index: &[u8],
        relative_version: i64,
    ) -> Vec<Record> {
        if search_key_index != self.table.key {
            return self.select(search_key, search_key_index, projected_columns_index);
        }
        let proj = self.normalize_projection(projected_columns_index);
        let rid = match self.table.pk_to_rid(search_key) {
            Ok(Some(rid)) => rid,
            _ => return Vec::new(),
        };
        match self.table.values_at_version(rid, relative_version) {
            Ok(row) => vec![self.project(&row, &proj)],
            Err(_) => Vec::new(),
        }
    }

    /// Sums `aggregate_column_index` over base rows whose PK falls in
    /// `[start_range, end_range]`. `None` on any internal error.
    pub fn sum(&self, start_range: i64, end_range: i64, aggregate_column_index: usize) -> Option<i64> {
        let rids = if self.table.is_indexed(self.table.key) {
            self.table.locate_range(self.table.key, start_range, end_range)
        } else {
            self.table.live_base_rids()
        };

        let mut total = 0i64;
        for rid in rids {
            if self.table.is_deleted(rid) {
                continue;
            }
            let row = self.table.latest_values(rid).ok()?;
            if row[self.table.key] < start_range || row[self.table.key] > end_range {
                continue;
            }
            total += *row.get(aggregate_column_index)?;
        }
        Some(total)
    }

    pub fn sum_version(
        &self,
        start_range: i64,
        end_range: i64,
        aggregate_column_index: usize,
        relative_version: i64,
    ) -> Option<i64> {
        let rids = if self.table.is_indexed(self.table.key) {
            self.table.locate_range(self.table.key, start_range, end_range)
        } else {
            self.table.live_base_rids()
        };

        let mut total = 0i64;
        for rid in rids {
            if self.table.is_deleted(rid) {
                continue;
            }
            let row = self.table.values_at_version(rid, relative_version).ok()?;
            if row[self.table.key] < start_range || row[self.table.key] > end_range {
                continue;
            }
            total += *row.get(aggregate_column_index)?;
        }
        Some(total)
    }

    /// Convenience: read-modify-write a single column by +1.
    pub fn increment(&self, key: i64, column: usize) -> bool {
        let rid = match self.table.pk_to_rid(key) {
            Ok(Some(rid)) => rid,
            _ => return false,
        };
        let row = match self.table.latest_values(rid) {
            Ok(r) => r,
            Err(_) => return false,
        };
        let new_value = match row.get(column) {
            Some(v) => v + 1,
            None => return false,
        };
        let mut columns = vec![None; self.num_user_cols()];
        columns[column] = Some(new_value);
        self.table.update(rid, &columns).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::config::Config;
    use tempfile::TempDir;

    fn query(dir: &TempDir) -> Query {
        let config = Arc::new(Config {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        });
        let bp = Arc::new(BufferPool::new(&config.data_dir, config.bufferpool_size, config.max_records_per_page));
        Query::new(Table::new("grades", 3, 0, bp, config))
    }

    #[test]
    fn insert_select_round_trip() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        assert!(q.insert(&[1, 90, 85]));
        let rows = q.select(1, 0, &[1, 1, 1]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns, vec![Some(1), Some(90), Some(85)]);
    }

    #[test]
    fn projection_masks_columns() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        q.insert(&[1, 90, 85]);
        let rows = q.select(1, 0, &[1, 0, 1]);
        assert_eq!(rows[0].columns, vec![Some(1), None, Some(85)]);
    }

    #[test]
    fn update_none_means_unchanged() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        q.insert(&[1, 90, 85]);
        assert!(q.update(1, &[None, Some(95), None]));
        let rows = q.select(1, 0, &[1, 1, 1]);
        assert_eq!(rows[0].columns, vec![Some(1), Some(95), Some(85)]);
    }

    #[test]
    fn delete_removes_row_from_select() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        q.insert(&[1, 90, 85]);
        assert!(q.delete(1));
        assert!(q.select(1, 0, &[1, 1, 1]).is_empty());
    }

    #[test]
    fn sum_over_pk_range() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        q.insert(&[1, 90, 85]);
        q.insert(&[2, 80, 70]);
        q.insert(&[3, 70, 60]);
        assert_eq!(q.sum(1, 2, 1), Some(170));
    }

    #[test]
    fn sum_excludes_deleted_rows() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        q.insert(&[1, 90, 85]);
        q.insert(&[2, 80, 70]);
        q.insert(&[3, 70, 60]);
        assert!(q.delete(2));
        assert_eq!(q.sum(1, 3, 1), Some(160));
    }

    #[test]
    fn increment_reads_then_writes_plus_one() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        q.insert(&[1, 90, 85]);
        assert!(q.increment(1, 1));
        let rows = q.select(1, 0, &[1, 1, 1]);
        assert_eq!(rows[0].columns[1], Some(91));
    }

    #[test]
    fn select_version_walks_history() {
        let dir = TempDir::new().unwrap();
        let q = query(&dir);
        q.insert(&[1, 90, 85]);
        q.update(1, &[None, Some(95), None]);
        q.update(1, &[None, Some(99), None]);
        let latest = q.select_version(1, 0, &[1, 1, 1], 0);
        let prev = q.select_version(1, 0, &[1, 1, 1], -1);
        let base = q.select_version(1, 0, &[1, 1, 1], -2);
        assert_eq!(latest[0].columns[1], Some(99));
        assert_eq!(prev[0].columns[1], Some(95));
        assert_eq!(base[0].columns[1], Some(90));
    }
}

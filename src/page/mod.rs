//! Fixed-capacity column pages and their canonical identity.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Canonical identity of a page: `(table, column, page_no, is_base)`.
///
/// `Display`/`FromStr` produce and parse the on-disk/underscore form
/// `"<table>_<col>_<page_no>_<isBase01>"`, which doubles as the cache key's
/// string form, the filename stem, and a log tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table: String,
    pub col: usize,
    pub page_no: usize,
    pub is_base: bool,
}

impl PageId {
    pub fn new(table: impl Into<String>, col: usize, page_no: usize, is_base: bool) -> Self {
        Self {
            table: table.into(),
            col,
            page_no,
            is_base,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{self}{}", crate::config::PAGE_FILE_SUFFIX)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.table,
            self.col,
            self.page_no,
            self.is_base as u8
        )
    }
}

impl FromStr for PageId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() != 4 {
            bail!(Error::Io(format!("invalid page id: {s}")));
        }
        let col = parts[1]
            .parse()
            .map_err(|_| anyhow!(Error::Io(format!("invalid page id column: {s}"))))?;
        let page_no = parts[2]
            .parse()
            .map_err(|_| anyhow!(Error::Io(format!("invalid page id page_no: {s}"))))?;
        let is_base = match parts[3] {
            "1" => true,
            "0" => false,
            _ => bail!(Error::Io(format!("invalid page id is_base flag: {s}"))),
        };
        Ok(PageId::new(parts[0], col, page_no, is_base))
    }
}

/// A page holds up to `capacity` 64-bit signed integers for one physical
/// column of one `(page_no, is_base)` stripe. Pages never shrink; once a
/// value is written it is either read as-is or overwritten in place (the
/// only exception to the append-only model, used for INDIRECTION bumps and
/// merge rewrites).
#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: Option<PageId>,
    capacity: usize,
    data: Vec<i64>,
}

/// On-disk / wire representation: `{ "PageID": ..., "num_records": ..., "data": [...] }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PageJson {
    #[serde(rename = "PageID")]
    pub page_id: String,
    pub num_records: usize,
    pub data: Vec<i64>,
}

impl Page {
    pub fn new(capacity: usize) -> Self {
        Self {
            page_id: None,
            capacity,
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn with_id(page_id: PageId, capacity: usize) -> Self {
        Self {
            page_id: Some(page_id),
            capacity,
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn num_records(&self) -> usize {
        self.data.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.data.len() < self.capacity
    }

    /// Appends `v` to the next free slot, returning the slot index.
    pub fn append(&mut self, v: i64) -> Result<usize> {
        if !self.has_capacity() {
            bail!(Error::Internal(format!(
                "page {:?} is full ({} records)",
                self.page_id,
                self.data.len()
            )));
        }
        self.data.push(v);
        Ok(self.data.len() - 1)
    }

    pub fn read(&self, slot: usize) -> Result<i64> {
        self.data
            .get(slot)
            .copied()
            .ok_or_else(|| anyhow!(Error::Validation(format!("slot {slot} out of range"))))
    }

    /// In-place update of an already-written slot.
    pub fn overwrite(&mut self, slot: usize, v: i64) -> Result<()> {
        if slot >= self.data.len() {
            bail!(Error::Validation(format!("slot {slot} out of range")));
        }
        self.data[slot] = v;
        Ok(())
    }

    pub fn to_json(&self) -> PageJson {
        PageJson {
            page_id: self
                .page_id
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_default(),
            num_records: self.data.len(),
            data: self.data.clone(),
        }
    }

    pub fn from_json(json: PageJson, capacity: usize) -> Result<Self> {
        let page_id = if json.page_id.is_empty() {
            None
        } else {
            Some(json.page_id.parse()?)
        };
        Ok(Self {
            page_id,
            capacity,
            data: json.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_round_trips_through_display_and_parse() {
        let pid = PageId::new("grades", 3, 7, true);
        let s = pid.to_string();
        assert_eq!(s, "grades_3_7_1");
        let parsed: PageId = s.parse().unwrap();
        assert_eq!(parsed, pid);
    }

    #[test]
    fn page_append_and_read() {
        let mut p = Page::new(4);
        assert!(p.has_capacity());
        let slot = p.append(42).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(p.read(0).unwrap(), 42);
        assert!(p.read(1).is_err());
    }

    #[test]
    fn page_full_rejects_append() {
        let mut p = Page::new(2);
        p.append(1).unwrap();
        p.append(2).unwrap();
        assert!(!p.has_capacity());
        assert!(p.append(3).is_err());
    }

    #[test]
    fn page_overwrite_requires_existing_slot() {
        let mut p = Page::new(2);
        assert!(p.overwrite(0, 9).is_err());
        p.append(1).unwrap();
        p.overwrite(0, 9).unwrap();
        assert_eq!(p.read(0).unwrap(), 9);
    }

    #[test]
    fn page_json_round_trip() {
        let mut p = Page::with_id(PageId::new("t", 0, 0, true), 512);
        p.append(1).unwrap();
        p.append(2).unwrap();
        let json = p.to_json();
        let back = Page::from_json(json, 512).unwrap();
        assert_eq!(back.num_records(), 2);
        assert_eq!(back.read(1).unwrap(), 2);
        assert_eq!(back.page_id.unwrap().to_string(), "t_0_0_1");
    }
}

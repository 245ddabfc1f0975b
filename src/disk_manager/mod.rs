//! Page persistence: one JSON file per page under `DATA_DIR/<table>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::page::{Page, PageId};

#[derive(Debug)]
pub struct DiskManager {
    data_dir: PathBuf,
    max_records_per_page: usize,
}

impl DiskManager {
    pub fn new(data_dir: impl Into<PathBuf>, max_records_per_page: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_records_per_page,
        }
    }

    fn page_path(&self, page_id: &PageId) -> PathBuf {
        self.data_dir.join(&page_id.table).join(page_id.file_name())
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.data_dir.join(table)
    }

    /// Loads a page from disk, or returns a fresh empty page stamped with
    /// `page_id` if no file exists yet.
    pub fn load(&self, page_id: &PageId) -> Result<Page> {
        let path = self.page_path(page_id);
        if !path.exists() {
            return Ok(Page::with_id(page_id.clone(), self.max_records_per_page));
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading page file {}", path.display()))?;
        let json = serde_json::from_str(&text)
            .with_context(|| format!("parsing page file {}", path.display()))?;
        Page::from_json(json, self.max_records_per_page)
    }

    pub fn write(&self, page: &Page) -> Result<()> {
        let page_id = page
            .page_id
            .as_ref()
            .context("asked to write a page with no id")?;
        let dir = self.table_dir(&page_id.table);
        fs::create_dir_all(&dir).with_context(|| format!("creating dir {}", dir.display()))?;
        let path = self.page_path(page_id);
        let json = page.to_json();
        let text = serde_json::to_string(&json)?;
        fs::write(&path, text).with_context(|| format!("writing page file {}", path.display()))?;
        Ok(())
    }

    /// Lists every page id persisted for `table`, without loading them.
    pub fn list_page_ids(&self, table: &str) -> Result<Vec<PageId>> {
        let dir = self.table_dir(table);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(crate::config::PAGE_FILE_SUFFIX) {
                if let Ok(pid) = stem.parse::<PageId>() {
                    ids.push(pid);
                }
            }
        }
        Ok(ids)
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("creating dir {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::new(dir.path(), 512);

        let pid = PageId::new("grades", 0, 0, true);
        let mut page = Page::with_id(pid.clone(), 512);
        page.append(10).unwrap();
        page.append(20).unwrap();

        dm.write(&page).unwrap();

        let loaded = dm.load(&pid).unwrap();
        assert_eq!(loaded.num_records(), 2);
        assert_eq!(loaded.read(0).unwrap(), 10);
        assert_eq!(loaded.read(1).unwrap(), 20);
    }

    #[test]
    fn load_missing_file_returns_fresh_page() {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::new(dir.path(), 512);
        let pid = PageId::new("grades", 0, 0, true);
        let page = dm.load(&pid).unwrap();
        assert_eq!(page.num_records(), 0);
        assert_eq!(page.page_id.unwrap(), pid);
    }

    #[test]
    fn list_page_ids_finds_written_pages() {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::new(dir.path(), 512);
        for col in 0..3 {
            let pid = PageId::new("grades", col, 0, true);
            let page = Page::with_id(pid, 512);
            dm.write(&page).unwrap();
        }
        let ids = dm.list_page_ids("grades").unwrap();
        assert_eq!(ids.len(), 3);
    }
}

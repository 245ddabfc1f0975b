mod frame;
mod replacer;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::disk_manager::DiskManager;
use crate::error::Error;
use crate::page::{Page, PageId};
use crate::printdbg;

pub use frame::Frame;

/// Fixed-size page cache with a two-pass LRU eviction policy.
///
/// Holds at most `capacity` resident frames, keyed by [`PageId`]. Callers
/// must pair [`BufferPool::pin`] with [`BufferPool::unpin`] around any
/// write, and call [`BufferPool::mark_dirty`] before the matching unpin.
pub struct BufferPool {
    inner: Mutex<Inner>,
}

struct Inner {
    disk: DiskManager,
    frames: HashMap<PageId, Frame>,
    capacity: usize,
    clock: u64,
}

impl BufferPool {
    pub fn new(data_dir: impl Into<PathBuf>, capacity: usize, max_records_per_page: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                disk: DiskManager::new(data_dir, max_records_per_page),
                frames: HashMap::new(),
                capacity,
                clock: 0,
            }),
        }
    }

    /// Returns a clone of the resident page, loading it from disk on miss.
    pub fn get(&self, pid: &PageId) -> Result<Page> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;

        if let Some(frame) = inner.frames.get_mut(pid) {
            frame.last_access = clock;
            return Ok(frame.page.clone());
        }

        inner.ensure_room()?;
        let page = inner.disk.load(pid)?;
        inner
            .frames
            .insert(pid.clone(), Frame::new(page.clone(), clock));
        printdbg!("buffer pool: loaded page {pid}");
        Ok(page)
    }

    /// Ensures `pid` is resident (as [`get`](Self::get) does) and increments
    /// its pin count so it cannot be evicted.
    pub fn pin(&self, pid: &PageId) -> Result<()> {
        self.get(pid)?;
        let mut inner = self.inner.lock();
        let frame = inner
            .frames
            .get_mut(pid)
            .expect("page was just made resident");
        frame.pin();
        Ok(())
    }

    pub fn unpin(&self, pid: &PageId) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get_mut(pid) {
            frame.unpin();
        }
    }

    pub fn mark_dirty(&self, pid: &PageId) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get_mut(pid) {
            frame.dirty = true;
        }
    }

    /// Replaces the resident page's contents (the write-back half of a
    /// get-mutate-put cycle; callers still owe a `mark_dirty` + `unpin`).
    pub fn put(&self, pid: &PageId, page: Page) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get_mut(pid) {
            frame.page = page;
        }
    }

    /// Lists every page id persisted on disk for `table`, without loading
    /// or caching them. Used by table recovery.
    pub fn list_page_ids(&self, table: &str) -> Result<Vec<PageId>> {
        self.inner.lock().disk.list_page_ids(table)
    }

    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let Inner { disk, frames, .. } = &mut *inner;
        for frame in frames.values_mut() {
            if frame.dirty {
                disk.write(&frame.page)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Flushes and removes every resident frame.
    pub fn evict_all(&self) -> Result<()> {
        self.flush_all()?;
        self.inner.lock().frames.clear();
        Ok(())
    }

    #[cfg(test)]
    pub fn is_dirty(&self, pid: &PageId) -> bool {
        self.inner
            .lock()
            .frames
            .get(pid)
            .map(|f| f.dirty)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn pin_count(&self, pid: &PageId) -> u32 {
        self.inner
            .lock()
            .frames
            .get(pid)
            .map(|f| f.pin_count)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn last_access(&self, pid: &PageId) -> Option<u64> {
        self.inner.lock().frames.get(pid).map(|f| f.last_access)
    }

    #[cfg(test)]
    pub fn resident_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    #[cfg(test)]
    pub fn is_resident(&self, pid: &PageId) -> bool {
        self.inner.lock().frames.contains_key(pid)
    }
}

impl Inner {
    /// Evicts a victim if the pool is full. No-op if there's already room
    /// or the page is already resident.
    fn ensure_room(&mut self) -> Result<()> {
        if self.frames.len() < self.capacity {
            return Ok(());
        }

        let victim = replacer::pick_victim(self.frames.iter());
        let victim = match victim {
            Some(v) => v,
            None => bail!(Error::AllFramesPinned),
        };

        let frame = self.frames.remove(&victim).expect("victim is resident");
        if frame.dirty {
            self.disk.write(&frame.page)?;
        }
        printdbg!("buffer pool: evicted page {victim}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool(capacity: usize) -> (TempDir, BufferPool) {
        let dir = TempDir::new().unwrap();
        let pool = BufferPool::new(dir.path(), capacity, 512);
        (dir, pool)
    }

    #[test]
    fn get_loads_a_fresh_empty_page_on_miss() {
        let (_dir, pool) = pool(4);
        let pid = PageId::new("t", 0, 0, true);
        let page = pool.get(&pid).unwrap();
        assert_eq!(page.num_records(), 0);
    }

    #[test]
    fn pin_prevents_eviction_and_unpin_allows_it() {
        let (_dir, pool) = pool(1);
        let p1 = PageId::new("t", 0, 0, true);
        let p2 = PageId::new("t", 0, 1, true);

        pool.pin(&p1).unwrap();
        assert!(matches!(
            pool.get(&p2).unwrap_err().downcast_ref::<Error>(),
            Some(Error::AllFramesPinned)
        ));

        pool.unpin(&p1);
        pool.get(&p2).unwrap();
        assert!(pool.is_resident(&p2));
        assert!(!pool.is_resident(&p1));
    }

    #[test]
    fn two_pass_lru_prefers_clean_victim() {
        let (_dir, pool) = pool(2);
        let p1 = PageId::new("t", 0, 0, true);
        let p2 = PageId::new("t", 0, 1, true);
        let p3 = PageId::new("t", 0, 2, true);

        pool.get(&p1).unwrap();
        pool.get(&p2).unwrap();
        assert!(pool.last_access(&p2).unwrap() > pool.last_access(&p1).unwrap());

        pool.get(&p3).unwrap();
        assert!(pool.is_resident(&p3));
        assert!(!pool.is_resident(&p1));
        assert!(pool.is_resident(&p2));
    }

    #[test]
    fn evict_writes_back_dirty_pages() {
        let (dir, pool) = pool(1);
        let p1 = PageId::new("t", 0, 0, true);
        pool.pin(&p1).unwrap();
        let mut page = pool.get(&p1).unwrap();
        page.append(7).unwrap();
        pool.put(&p1, page);
        pool.mark_dirty(&p1);
        pool.unpin(&p1);

        let p2 = PageId::new("t", 0, 1, true);
        pool.get(&p2).unwrap();

        let dm = DiskManager::new(dir.path(), 512);
        let reloaded = dm.load(&p1).unwrap();
        assert_eq!(reloaded.read(0).unwrap(), 7);
    }

    #[test]
    fn flush_all_clears_dirty_flags() {
        let (_dir, pool) = pool(4);
        let p1 = PageId::new("t", 0, 0, true);
        pool.get(&p1).unwrap();
        pool.mark_dirty(&p1);
        assert!(pool.is_dirty(&p1));
        pool.flush_all().unwrap();
        assert!(!pool.is_dirty(&p1));
    }
}

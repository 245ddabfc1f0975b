//! Two-pass LRU victim selection, respecting pins.

use crate::page::PageId;

use super::frame::Frame;

/// Picks an eviction victim among `frames`:
/// 1. the unpinned, clean frame with the smallest `last_access`;
/// 2. if none, the unpinned (possibly dirty) frame with the smallest `last_access`;
/// 3. if none, `None` (all frames are pinned).
pub fn pick_victim<'a, I>(frames: I) -> Option<PageId>
where
    I: IntoIterator<Item = (&'a PageId, &'a Frame)>,
{
    let frames: Vec<(&PageId, &Frame)> = frames.into_iter().collect();

    let clean_victim = frames
        .iter()
        .filter(|(_, f)| !f.is_pinned() && !f.dirty)
        .min_by_key(|(_, f)| f.last_access);

    if let Some((pid, _)) = clean_victim {
        return Some((*pid).clone());
    }

    frames
        .iter()
        .filter(|(_, f)| !f.is_pinned())
        .min_by_key(|(_, f)| f.last_access)
        .map(|(pid, _)| (*pid).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn frame(last_access: u64, pinned: bool, dirty: bool) -> Frame {
        let mut f = Frame::new(crate::page::Page::new(4), last_access);
        if pinned {
            f.pin();
        }
        f.dirty = dirty;
        f
    }

    #[test]
    fn prefers_clean_over_dirty_even_if_older() {
        let mut map = HashMap::new();
        map.insert(PageId::new("t", 0, 0, true), frame(1, false, true));
        map.insert(PageId::new("t", 0, 1, true), frame(2, false, false));
        let victim = pick_victim(map.iter()).unwrap();
        assert_eq!(victim, PageId::new("t", 0, 1, true));
    }

    #[test]
    fn falls_back_to_dirty_when_no_clean_unpinned() {
        let mut map = HashMap::new();
        map.insert(PageId::new("t", 0, 0, true), frame(1, false, true));
        map.insert(PageId::new("t", 0, 1, true), frame(2, true, false));
        let victim = pick_victim(map.iter()).unwrap();
        assert_eq!(victim, PageId::new("t", 0, 0, true));
    }

    #[test]
    fn none_when_all_pinned() {
        let mut map = HashMap::new();
        map.insert(PageId::new("t", 0, 0, true), frame(1, true, true));
        map.insert(PageId::new("t", 0, 1, true), frame(2, true, false));
        assert!(pick_victim(map.iter()).is_none());
    }
}

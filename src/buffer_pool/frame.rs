//! A resident buffer-pool slot: a page plus its eviction metadata.

use crate::page::Page;

#[derive(Debug)]
pub struct Frame {
    pub page: Page,
    pub dirty: bool,
    pub pin_count: u32,
    pub last_access: u64,
}

impl Frame {
    pub fn new(page: Page, last_access: u64) -> Self {
        Self {
            page,
            dirty: false,
            pin_count: 0,
            last_access,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) {
        self.pin_count = self.pin_count.saturating_sub(1);
    }
}

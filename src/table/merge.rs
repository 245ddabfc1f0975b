//! Background merge worker loop: one named thread per table, fed range ids
//! over an mpsc channel, consolidating tail chains into base storage.

use std::sync::mpsc::Receiver;
use std::sync::Weak;

use super::Table;
use crate::printdbg;

pub fn run(table: Weak<Table>, rx: Receiver<usize>) {
    while let Ok(range_id) = rx.recv() {
        let table = match table.upgrade() {
            Some(t) => t,
            None => break,
        };
        printdbg!("merge worker {}: consolidating range {range_id}", table.name);
        if let Err(e) = table.consolidate_range(range_id) {
            printdbg!("merge worker {}: range {range_id} failed: {e}", table.name);
        }
        table.state.lock().merge_inflight.remove(&range_id);
    }
}

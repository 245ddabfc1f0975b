//! Tunables for the storage engine, collected into one struct instead of
//! scattered module-level constants so tests can vary them per `Database`.

#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem root under which `<table>/` directories are created.
    pub data_dir: String,
    /// Slots per column page.
    pub max_records_per_page: usize,
    /// Resident frames held by the buffer pool.
    pub bufferpool_size: usize,
    /// Count of leading metadata columns (INDIRECTION, RID, TIMESTAMP, SCHEMA).
    pub meta_columns: usize,
    /// First RID in the disjoint tail-RID namespace.
    pub tail_rid_start: u64,
    /// Whether to start a per-table background merge worker.
    pub enable_background_merge: bool,
    /// Sealed-tail-page threshold that triggers a merge of a range.
    pub merge_tail_threshold: usize,
    /// Whether `Database::close` flushes the buffer pool.
    pub flush_on_close: bool,
}

pub const INDIRECTION_COLUMN: usize = 0;
pub const RID_COLUMN: usize = 1;
pub const TIMESTAMP_COLUMN: usize = 2;
pub const SCHEMA_ENCODING_COLUMN: usize = 3;

pub const PAGE_FILE_SUFFIX: &str = ".page.json";
pub const DB_METADATA_FILE: &str = "metadata.json";

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            max_records_per_page: 512,
            bufferpool_size: 64,
            meta_columns: 4,
            tail_rid_start: 1_000_000_000,
            enable_background_merge: false,
            merge_tail_threshold: 3,
            flush_on_close: true,
        }
    }
}

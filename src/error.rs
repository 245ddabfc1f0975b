//! Engine-wide error type.
//!
//! Mirrors the shape used by the rest of the engine: a flat enum with a
//! `Display` impl, wrapped in `anyhow::Result` at call sites rather than
//! implementing `std::error::Error` by hand.

#[derive(Debug)]
pub enum Error {
    /// Bad column count, out-of-range column index, unknown RID, duplicate PK.
    Validation(String),
    /// select/update/delete targeted a row that doesn't exist or is deleted.
    NotFound(String),
    /// No-wait 2PL conflict; the caller must abort the transaction.
    LockConflict { rid: u64 },
    /// Buffer pool has no evictable frame left.
    AllFramesPinned,
    /// Disk I/O or on-disk format problem.
    Io(String),
    /// Invariant violation (e.g. a cyclic indirection chain). Should not
    /// happen; callers that see this should treat the table as corrupt.
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "validation error: {msg}"),
            Error::NotFound(msg) => write!(f, "not found: {msg}"),
            Error::LockConflict { rid } => write!(f, "lock conflict on rid {rid}"),
            Error::AllFramesPinned => write!(f, "buffer pool: all frames pinned"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Error::LockConflict { .. })
    }
}

use std::path::PathBuf;

use rgit_hash::ObjectId;

/// Error types for reference operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid ref name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("ref not found: {0}")]
    NotFound(String),

    #[error("ref '{0}' is a directory")]
    IsDirectory(String),

    #[error("ref '{0}' has malformed content")]
    Broken(String),

    #[error("'{existing}' exists; cannot create '{name}'")]
    Conflict { name: String, existing: String },

    #[error("ref '{name}' is at {actual} but expected {expected}")]
    StaleValue {
        name: String,
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("duplicated ref '{name}' with mismatched targets {first} and {second}")]
    DuplicatePacked {
        name: String,
        first: ObjectId,
        second: ObjectId,
    },

    #[error("ref '{0}' does not peel to a non-tag object")]
    NotPeelable(String),

    #[error("missing object {target} for ref '{name}'")]
    MissingObject { name: String, target: ObjectId },

    #[error("target {target} of branch '{name}' is not a commit")]
    NotACommit { name: String, target: ObjectId },

    #[error("cannot rename '{name}': {reason}")]
    Rename { name: String, reason: String },

    #[error("log for ref '{name}' is corrupt: {reason}")]
    ReflogCorrupt { name: String, reason: &'static str },

    #[error(transparent)]
    Lock(#[from] rgit_utils::LockError),

    #[error("I/O error on {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] rgit_hash::HashError),
}

impl RefError {
    /// True when the failure was a lock held by someone else, the one error
    /// writers commonly retry on.
    pub fn is_lock_busy(&self) -> bool {
        matches!(
            self,
            RefError::Lock(rgit_utils::LockError::AlreadyLocked { .. })
        )
    }
}

/// Non-fatal conditions observed during reads and iteration.
///
/// Warnings are data rather than log lines: operations push them into the
/// store, and callers drain them with `FilesRefStore::take_warnings`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefWarning {
    #[error("duplicated ref: {0}")]
    DuplicateRef(String),

    #[error("{name} does not point to a valid object ({target})")]
    UnknownObject { name: String, target: ObjectId },

    #[error("log for {name} has a gap: {earlier_new} is followed by {later_old}")]
    ReflogGap {
        name: String,
        earlier_new: ObjectId,
        later_old: ObjectId,
    },

    #[error("log for {name} unexpectedly ended on {last}")]
    ReflogEnded { name: String, last: ObjectId },

    #[error("ignoring dangling symref {0}")]
    DanglingSymref(String),

    #[error("ignoring broken ref {0}")]
    BrokenRef(String),
}

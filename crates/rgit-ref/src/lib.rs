//! Reference database for the rgit version-control core.
//!
//! References are named pointers from human-readable names such as
//! `refs/heads/main` or `HEAD` to object ids. This crate implements the
//! files backend: loose refs as individual files under `refs/`, packed refs
//! coalesced into a single `packed-refs` file, transactional updates under
//! lock files, recursive symbolic-ref resolution, and the per-reference
//! reflog.
//!
//! The object database is an external collaborator reached through the
//! [`odb::ObjectDatabase`] trait; the store only needs existence checks and
//! tag peeling from it.

mod error;
pub mod files;
mod name;
pub mod odb;
pub mod reflog;

pub use error::{RefError, RefWarning};
pub use files::iter::RefIter;
pub use files::packed::PackedRefs;
pub use files::transaction::{RefLock, UpdateFlags};
pub use files::FilesRefStore;
pub use name::{check_refname_format, CheckRefFlags, RefName};
pub use odb::{MemoryObjectDatabase, ObjectDatabase, ObjectKind};
pub use reflog::{RefAt, ReflogEntry};

use rgit_hash::ObjectId;

bitflags::bitflags! {
    /// Flags attached to a reference entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RefFlags: u8 {
        /// The reference is (or was reached through) a symbolic ref.
        const SYMBOLIC = 1 << 0;
        /// The entry came from the packed-refs file.
        const PACKED = 1 << 1;
        /// The on-disk content was present but unparseable.
        const BROKEN = 1 << 2;
        /// The packed-refs file carried peel information for this entry;
        /// a `None` peel then means "known not peelable".
        const KNOWS_PEELED = 1 << 3;
    }
}

/// An immutable reference entry as held in the loose and packed arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub name: RefName,
    pub target: ObjectId,
    pub peeled: Option<ObjectId>,
    pub flags: RefFlags,
}

impl RefEntry {
    pub fn is_symbolic(&self) -> bool {
        self.flags.contains(RefFlags::SYMBOLIC)
    }

    pub fn is_broken(&self) -> bool {
        self.flags.contains(RefFlags::BROKEN)
    }
}

/// The result of resolving a reference name: the final (non-symbolic) name
/// reached, its target, and the flags accumulated along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub name: RefName,
    pub target: ObjectId,
    pub flags: RefFlags,
}

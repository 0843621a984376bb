use std::fs;
use std::path::PathBuf;

use bstr::{BStr, ByteSlice};
use rgit_hash::ObjectId;
use rgit_utils::lockfile::LockFile;

use crate::error::RefError;
use crate::files::packed::{find_entry, PackedRefs};
use crate::files::{remove_empty_directories, FilesRefStore};
use crate::name::RefName;
use crate::odb::ObjectKind;
use crate::reflog;
use crate::{RefEntry, RefFlags};

bitflags::bitflags! {
    /// Policy bits for locking and writing references.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateFlags: u8 {
        /// Treat a symbolic reference as a scalar: lock and overwrite the
        /// symref file itself instead of following it.
        const NODEREF = 1 << 0;
    }
}

/// The atomic-rename staging spot for a reflog being renamed. It must live
/// under `logs/refs` so the rename never crosses devices.
const TMP_RENAMED_LOG: &str = "logs/refs/.tmp-renamed-log";

/// An exclusive lock over one reference, held until `write` commits or the
/// handle is dropped (which rolls back).
pub struct RefLock<'a> {
    store: &'a FilesRefStore,
    /// The resolved name being written.
    name: RefName,
    /// The name the caller supplied (differs when a symref was followed).
    orig_name: RefName,
    /// The value observed under the lock.
    old: ObjectId,
    /// Resolver flags at lock time.
    resolved_flags: RefFlags,
    lock: LockFile,
    /// Write even when old == new (new refs, symref clobbering, renames).
    force_write: bool,
    skip_reflog: bool,
}

impl<'a> std::fmt::Debug for RefLock<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefLock")
            .field("name", &self.name)
            .field("orig_name", &self.orig_name)
            .field("old", &self.old)
            .field("resolved_flags", &self.resolved_flags)
            .field("force_write", &self.force_write)
            .field("skip_reflog", &self.skip_reflog)
            .finish()
    }
}

impl<'a> RefLock<'a> {
    /// The resolved name this lock covers.
    pub fn name(&self) -> &RefName {
        &self.name
    }

    /// The value the reference had when the lock was taken.
    pub fn old(&self) -> &ObjectId {
        &self.old
    }

    /// Write `new` as the reference's target and commit.
    ///
    /// Writing the value the reference already has (without force) is a
    /// no-op that releases the lock and touches nothing. On success the
    /// reflog of the resolved name gains an entry, so does the original
    /// name's if a symref redirect was followed, and so does `HEAD`'s when
    /// it points at the written ref.
    pub fn write(mut self, new: &ObjectId, logmsg: &str) -> Result<(), RefError> {
        if !self.force_write && self.old == *new {
            self.lock.rollback()?;
            return Ok(());
        }

        if let Some(odb) = self.store.odb() {
            let Some((kind, _)) = odb.read_object(new) else {
                return Err(RefError::MissingObject {
                    name: self.name.to_string(),
                    target: *new,
                });
            };
            let to_branch = self.name.as_str() == "HEAD" || self.name.is_branch();
            if to_branch && kind != ObjectKind::Commit {
                return Err(RefError::NotACommit {
                    name: self.name.to_string(),
                    target: *new,
                });
            }
        }

        self.lock.write_all(format!("{}\n", new.to_hex()).as_bytes())?;
        self.lock.close()?;
        self.store.clear_loose_cache("");

        if !self.skip_reflog {
            reflog::append(self.store, &self.name, &self.old, new, logmsg)?;
            if self.name != self.orig_name {
                reflog::append(self.store, &self.orig_name, &self.old, new, logmsg)?;
            }
            if self.orig_name.as_str() != "HEAD" {
                // A branch updated directly while HEAD points at it should
                // land in HEAD's reflog too. Full reverse-symref tracking
                // would be costly; checking HEAD covers the common case.
                if let Ok(head) = self.store.resolve("HEAD", true) {
                    if head.flags.contains(RefFlags::SYMBOLIC) && head.name == self.name {
                        reflog::append(
                            self.store,
                            &RefName::new_unchecked("HEAD"),
                            &self.old,
                            new,
                            logmsg,
                        )?;
                    }
                }
            }
        }

        self.lock.commit()?;
        Ok(())
    }

    /// Release the lock without writing.
    pub fn rollback(self) -> Result<(), RefError> {
        self.lock.rollback()?;
        Ok(())
    }
}

impl FilesRefStore {
    /// Lock a reference for update.
    ///
    /// `expected`: `None` skips the old-value check; `Some(null)` demands
    /// the reference not exist; any other id must match the current value
    /// or the lock fails with `StaleValue`. The check runs after the lock
    /// file is held, so a passing lock is authoritative.
    pub fn lock_ref(
        &self,
        name: &str,
        expected: Option<&ObjectId>,
        flags: UpdateFlags,
    ) -> Result<RefLock<'_>, RefError> {
        let mustexist = expected.is_some_and(|o| !o.is_null());

        let resolved = match self.resolve(name, mustexist) {
            Err(RefError::IsDirectory(_)) => {
                // We are locking foo, but foo/bar used to exist: the dead
                // refs leave empty directories behind. Clear them and retry.
                if remove_empty_directories(&self.ref_path(name)).is_err() {
                    return Err(RefError::IsDirectory(name.to_string()));
                }
                self.resolve(name, mustexist)?
            }
            other => other?,
        };

        let missing = resolved.target.is_null();
        if missing {
            // A new name must not collide with an existing packed ref that
            // it would prefix (or that prefixes it)
            let packed = self.packed_refs("")?;
            verify_refname_available(resolved.name.as_bstr(), None, &packed)?;
        }

        let (lock_name, clobbering_symref) = if flags.contains(UpdateFlags::NODEREF) {
            (
                RefName::new_unchecked(name),
                resolved.flags.contains(RefFlags::SYMBOLIC),
            )
        } else {
            (resolved.name.clone(), false)
        };

        let ref_path = self.ref_path(lock_name.as_str());
        if let Some(parent) = ref_path.parent() {
            fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let lock = LockFile::hold(&ref_path)?;

        let mut lock = RefLock {
            store: self,
            name: lock_name,
            orig_name: RefName::new_unchecked(name),
            old: resolved.target,
            resolved_flags: resolved.flags,
            lock,
            force_write: missing || clobbering_symref,
            skip_reflog: false,
        };

        if let Some(exp) = expected {
            // Re-read under the lock; racing writers may have moved the ref
            let current = match self.resolve(lock.name.as_str(), mustexist) {
                Ok(r) => r.target,
                Err(e) => return Err(e),
            };
            lock.old = current;
            if current != *exp {
                return Err(RefError::StaleValue {
                    name: lock.name.to_string(),
                    expected: *exp,
                    actual: current,
                });
            }
        }
        Ok(lock)
    }

    /// Lock, verify, write, commit: the one-call update path.
    pub fn update_ref(
        &self,
        logmsg: &str,
        name: &str,
        new: &ObjectId,
        expected: Option<&ObjectId>,
        flags: UpdateFlags,
    ) -> Result<(), RefError> {
        let lock = self.lock_ref(name, expected, flags)?;
        lock.write(new, logmsg)
    }

    /// Delete a reference (loose and packed forms), its reflog included.
    pub fn delete_ref(
        &self,
        name: &str,
        expected: Option<&ObjectId>,
        flags: UpdateFlags,
    ) -> Result<(), RefError> {
        let lock = self.lock_ref(name, expected, UpdateFlags::empty())?;

        if !lock.resolved_flags.contains(RefFlags::PACKED)
            || lock.resolved_flags.contains(RefFlags::SYMBOLIC)
        {
            let path = if flags.contains(UpdateFlags::NODEREF) {
                self.ref_path(name)
            } else {
                self.ref_path(lock.name.as_str())
            };
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RefError::IoPath { path, source: e }),
            }
        }

        // Removing the loose file may have re-exposed an older packed entry
        // with the same name; always drop it from the packed file too.
        self.repack_without(name.as_bytes().as_bstr())?;

        let log = self.git_dir().join("logs").join(lock.name.as_str());
        match fs::remove_file(&log) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RefError::IoPath { path: log, source: e }),
        }

        self.invalidate_cache("");
        lock.rollback()
    }

    /// Rewrite the packed-refs file without the named entry, under the
    /// packed-refs lock. A name that is not packed is a no-op.
    pub(crate) fn repack_without(&self, name: &BStr) -> Result<(), RefError> {
        let packed = self.packed_refs("")?;
        if find_entry(&packed, name).is_none() {
            return Ok(());
        }
        let remaining: Vec<RefEntry> = packed
            .iter()
            .filter(|e| e.name.as_bstr() != name)
            .cloned()
            .collect();

        let path = self.git_dir().join("packed-refs");
        let mut lock = LockFile::hold(&path)?;
        lock.write_all(&PackedRefs::from_entries(remaining).serialize())?;
        lock.commit()?;
        self.clear_packed_cache("");
        Ok(())
    }

    /// Rename a scalar reference, carrying its reflog along.
    pub fn rename_ref(&self, oldname: &str, newname: &str, logmsg: &str) -> Result<(), RefError> {
        let old_log = self.git_dir().join("logs").join(oldname);
        let log_exists = match fs::symlink_metadata(&old_log) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(RefError::Rename {
                    name: oldname.to_string(),
                    reason: "reflog is a symlink".into(),
                })
            }
            Ok(_) => true,
            Err(_) => false,
        };

        let resolved = self.resolve(oldname, true).map_err(|_| RefError::Rename {
            name: oldname.to_string(),
            reason: "not found".into(),
        })?;
        if resolved.flags.contains(RefFlags::SYMBOLIC) {
            return Err(RefError::Rename {
                name: oldname.to_string(),
                reason: "renaming a symbolic ref is not supported".into(),
            });
        }
        let orig_target = resolved.target;

        {
            let skip = Some(oldname.as_bytes().as_bstr());
            let packed = self.packed_refs("")?;
            verify_refname_available(newname.as_bytes().as_bstr(), skip, &packed)?;
            let loose = self.loose_refs("")?;
            verify_refname_available(newname.as_bytes().as_bstr(), skip, &loose)?;
        }

        let tmp_log = self.git_dir().join(TMP_RENAMED_LOG);
        if log_exists {
            if let Some(parent) = tmp_log.parent() {
                fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            fs::rename(&old_log, &tmp_log).map_err(|e| RefError::Rename {
                name: oldname.to_string(),
                reason: format!("unable to move logfile: {e}"),
            })?;
        }

        let mut logmoved = false;
        let result = self.rename_ref_inner(
            oldname,
            newname,
            logmsg,
            orig_target,
            log_exists,
            &tmp_log,
            &mut logmoved,
        );
        if result.is_ok() {
            return Ok(());
        }

        // Rollback: restore the old ref and its reflog
        if let Ok(mut lock) = self.lock_ref(oldname, None, UpdateFlags::empty()) {
            lock.force_write = true;
            lock.skip_reflog = true;
            lock.old = orig_target;
            let _ = lock.write(&orig_target, "");
        }
        if logmoved {
            let _ = fs::rename(self.git_dir().join("logs").join(newname), &old_log);
        } else if log_exists {
            let _ = fs::rename(&tmp_log, &old_log);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn rename_ref_inner(
        &self,
        oldname: &str,
        newname: &str,
        logmsg: &str,
        orig_target: ObjectId,
        log_exists: bool,
        tmp_log: &PathBuf,
        logmoved: &mut bool,
    ) -> Result<(), RefError> {
        self.delete_ref(oldname, Some(&orig_target), UpdateFlags::NODEREF)
            .map_err(|e| RefError::Rename {
                name: oldname.to_string(),
                reason: format!("unable to delete old ref: {e}"),
            })?;

        // A stale scalar (or a directory of dead refs) may sit at the
        // destination
        if let Ok(existing) = self.resolve(newname, true) {
            if let Err(e) = self.delete_ref(newname, Some(&existing.target), UpdateFlags::NODEREF) {
                let dest = self.ref_path(newname);
                if dest.is_dir() {
                    remove_empty_directories(&dest).map_err(|_| RefError::Rename {
                        name: newname.to_string(),
                        reason: "directory not empty".into(),
                    })?;
                } else {
                    return Err(RefError::Rename {
                        name: newname.to_string(),
                        reason: format!("unable to delete existing ref: {e}"),
                    });
                }
            }
        }

        if log_exists {
            let new_log = self.git_dir().join("logs").join(newname);
            if let Some(parent) = new_log.parent() {
                fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            // The destination may be a directory left over from renamed-away
            // per-ref logs; empty it and retry
            loop {
                match fs::rename(tmp_log, &new_log) {
                    Ok(()) => break,
                    Err(_) if new_log.is_dir() => {
                        remove_empty_directories(&new_log).map_err(|_| RefError::Rename {
                            name: newname.to_string(),
                            reason: "log directory not empty".into(),
                        })?;
                    }
                    Err(e) => {
                        return Err(RefError::Rename {
                            name: newname.to_string(),
                            reason: format!("unable to move logfile into place: {e}"),
                        })
                    }
                }
            }
            *logmoved = true;
        }

        let mut lock = self.lock_ref(newname, None, UpdateFlags::empty())?;
        lock.force_write = true;
        lock.old = orig_target;
        lock.write(&orig_target, logmsg)
    }

    /// Coalesce loose scalar refs into the packed file, peeling annotated
    /// tags on the way; with `prune`, the migrated loose files are removed.
    pub fn pack_refs(&self, prune: bool) -> Result<(), RefError> {
        let loose = self.loose_refs("")?;
        let packed = self.packed_refs("")?;

        let mut entries: Vec<RefEntry> = packed.to_vec();
        let mut migrated: Vec<RefName> = Vec::new();
        for entry in loose.iter() {
            if entry.flags.intersects(RefFlags::SYMBOLIC | RefFlags::BROKEN)
                || entry.target.is_null()
            {
                continue;
            }
            let peeled = self.odb().and_then(|odb| match odb.read_object(&entry.target) {
                Some((ObjectKind::Tag, _)) => odb.deref_tag(&entry.target),
                _ => None,
            });
            let new_entry = RefEntry {
                name: entry.name.clone(),
                target: entry.target,
                peeled,
                flags: RefFlags::PACKED | RefFlags::KNOWS_PEELED,
            };
            match entries.binary_search_by(|e| e.name.cmp(&entry.name)) {
                Ok(i) => entries[i] = new_entry,
                Err(i) => entries.insert(i, new_entry),
            }
            migrated.push(entry.name.clone());
        }

        let path = self.git_dir().join("packed-refs");
        let mut lock = LockFile::hold(&path)?;
        lock.write_all(&PackedRefs::from_entries(entries).serialize())?;
        lock.commit()?;

        if prune {
            for name in &migrated {
                let _ = fs::remove_file(self.ref_path(name.as_str()));
            }
        }
        self.invalidate_cache("");
        Ok(())
    }
}

/// Could a reference named `name` be created without colliding with an
/// existing name in `array`? `skip` names a ref about to go away (renames).
/// A collision is a shared prefix at a `/` boundary: `a` blocks `a/b` and
/// vice versa.
pub(crate) fn verify_refname_available(
    name: &BStr,
    skip: Option<&BStr>,
    array: &[RefEntry],
) -> Result<(), RefError> {
    let name_bytes: &[u8] = name.as_ref();
    for entry in array {
        let entry_bytes: &[u8] = entry.name.as_bstr().as_ref();
        if skip.is_some_and(|s| {
            let s: &[u8] = s.as_ref();
            s == entry_bytes
        }) {
            continue;
        }
        let cmplen = name_bytes.len().min(entry_bytes.len());
        if name_bytes[..cmplen] == entry_bytes[..cmplen] {
            let longer = if name_bytes.len() < entry_bytes.len() {
                entry_bytes
            } else {
                name_bytes
            };
            if longer.get(cmplen) == Some(&b'/') {
                return Err(RefError::Conflict {
                    name: name.to_string(),
                    existing: entry.name.to_string(),
                });
            }
        }
    }
    Ok(())
}

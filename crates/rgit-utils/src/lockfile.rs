use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::LockError;

/// Exclusive-writer guard over one on-disk file.
///
/// Holding the guard means `<target>.lock` exists and was created by this
/// process with `O_CREAT|O_EXCL`; whoever loses that race backs off. New
/// content is written into the lock file and becomes visible only when
/// `commit` renames it over the target, so readers observe either the old
/// or the new content, never a partial write. `close` flushes and closes
/// the payload while the lock stays held; the ref writer uses that window
/// to append reflog entries before committing. A guard that is neither
/// committed nor rolled back removes its lock file on drop.
pub struct LockFile {
    target: PathBuf,
    lock_path: PathBuf,
    state: State,
}

enum State {
    /// Lock held, payload handle open for writing.
    Open(File),
    /// Lock held, payload flushed and closed.
    Closed,
    /// Committed or rolled back; nothing left to clean up.
    Resolved,
}

impl LockFile {
    /// Take the lock for `target` by creating `<target>.lock` exclusively.
    ///
    /// An existing lock file means another writer is active and fails the
    /// call with `LockError::AlreadyLocked`.
    pub fn hold(target: impl AsRef<Path>) -> Result<Self, LockError> {
        let target = target.as_ref().to_path_buf();
        let mut os = target.clone().into_os_string();
        os.push(".lock");
        let lock_path = PathBuf::from(os);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => Ok(Self {
                target,
                lock_path,
                state: State::Open(file),
            }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(LockError::AlreadyLocked { path: lock_path })
            }
            Err(e) => Err(LockError::Create {
                path: lock_path,
                source: e,
            }),
        }
    }

    /// Like `hold`, but contention is `Ok(None)` instead of an error.
    pub fn try_hold(target: impl AsRef<Path>) -> Result<Option<Self>, LockError> {
        match Self::hold(target) {
            Ok(lock) => Ok(Some(lock)),
            Err(LockError::AlreadyLocked { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The file this lock protects.
    pub fn path(&self) -> &Path {
        &self.target
    }

    /// The `<target>.lock` path itself.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Write payload into the held lock file. Refused once `close` ran.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), LockError> {
        match &mut self.state {
            State::Open(file) => file.write_all(buf).map_err(|e| LockError::Write {
                path: self.lock_path.clone(),
                source: e,
            }),
            _ => Err(LockError::Write {
                path: self.lock_path.clone(),
                source: io::Error::other("lock file already closed"),
            }),
        }
    }

    /// Flush the payload to disk and close the handle; the lock itself
    /// stays held. A no-op when already closed.
    pub fn close(&mut self) -> Result<(), LockError> {
        if let State::Open(file) = std::mem::replace(&mut self.state, State::Closed) {
            file.sync_all().map_err(|e| LockError::Commit {
                path: self.lock_path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Make the payload the target's content via atomic rename.
    pub fn commit(mut self) -> Result<(), LockError> {
        self.close()?;
        fs::rename(&self.lock_path, &self.target).map_err(|e| LockError::Commit {
            path: self.lock_path.clone(),
            source: e,
        })?;
        self.state = State::Resolved;
        Ok(())
    }

    /// Give the lock up, leaving the target untouched.
    pub fn rollback(mut self) -> Result<(), LockError> {
        self.state = State::Resolved;
        fs::remove_file(&self.lock_path).map_err(|e| LockError::Commit {
            path: self.lock_path.clone(),
            source: e,
        })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, State::Resolved) {
            State::Resolved => {}
            // An abandoned guard must not leave the ref wedged
            State::Open(_) | State::Closed => {
                let _ = fs::remove_file(&self.lock_path);
            }
        }
    }
}

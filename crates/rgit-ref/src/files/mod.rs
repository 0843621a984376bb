pub(crate) mod loose;
pub mod iter;
pub mod packed;
pub mod transaction;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bstr::{BStr, BString, ByteSlice};
use rgit_hash::ObjectId;
use rgit_utils::date::{GitDate, Signature};
use rgit_utils::lockfile::LockFile;

use crate::error::{RefError, RefWarning};
use crate::name::{check_refname_format, expand_rule, match_rule, CheckRefFlags, RefName,
                  REF_REV_PARSE_RULES};
use crate::odb::{ObjectDatabase, ObjectKind};
use crate::{RefEntry, RefFlags, Resolved};

use self::packed::{find_entry, PackedRefs};

/// Symbolic references may chain, only within reason.
const MAXDEPTH: usize = 5;
/// Longest submodule ref name worth chasing.
const MAXREFLEN: usize = 1024;
/// A scalar ref file is read at most this far.
const REF_FILE_READ_LIMIT: u64 = 255;

/// Per-repository cache of the two reference arrays, each loaded on first
/// demand and retained until invalidation.
#[derive(Default)]
struct RefCache {
    loose: Option<Rc<[RefEntry]>>,
    packed: Option<Rc<[RefEntry]>>,
}

/// The files-backend reference store: loose refs under `refs/`, packed refs
/// in `packed-refs`, reflogs under `logs/`.
///
/// One store serves one repository plus its submodules; caches are keyed by
/// submodule name, with the empty string standing for the main repository.
/// The store is deliberately single-threaded state (spawn one store per
/// thread where needed); cross-process safety comes from the lock files.
pub struct FilesRefStore {
    git_dir: PathBuf,
    committer: Option<Signature>,
    odb: Option<Rc<dyn ObjectDatabase>>,
    caches: RefCell<HashMap<String, RefCache>>,
    extra: RefCell<Vec<RefEntry>>,
    warnings: RefCell<Vec<RefWarning>>,
    log_all_ref_updates: bool,
}

impl FilesRefStore {
    /// Create a store over the given repository directory (the directory
    /// containing `refs/`, `packed-refs`, `HEAD` and `logs/`).
    pub fn new(git_dir: impl AsRef<Path>) -> Self {
        Self {
            git_dir: git_dir.as_ref().to_path_buf(),
            committer: None,
            odb: None,
            caches: RefCell::new(HashMap::new()),
            extra: RefCell::new(Vec::new()),
            warnings: RefCell::new(Vec::new()),
            log_all_ref_updates: true,
        }
    }

    /// Set the committer identity used for reflog entries.
    pub fn set_committer(&mut self, sig: Signature) {
        self.committer = Some(sig);
    }

    /// Attach the object-database collaborator. Without one, object
    /// existence and branch-target checks are skipped.
    pub fn set_odb(&mut self, odb: Rc<dyn ObjectDatabase>) {
        self.odb = Some(odb);
    }

    /// Turn automatic reflog creation off (bare repositories).
    pub fn set_log_all_ref_updates(&mut self, on: bool) {
        self.log_all_ref_updates = on;
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Drain the warnings collected since the last call.
    pub fn take_warnings(&self) -> Vec<RefWarning> {
        std::mem::take(&mut *self.warnings.borrow_mut())
    }

    pub(crate) fn warn(&self, warning: RefWarning) {
        self.warnings.borrow_mut().push(warning);
    }

    pub(crate) fn odb(&self) -> Option<&dyn ObjectDatabase> {
        self.odb.as_deref()
    }

    pub(crate) fn committer(&self) -> Signature {
        self.committer
            .clone()
            .unwrap_or_else(|| Signature::new("rgit", "rgit@localhost", GitDate::now()))
    }

    pub(crate) fn log_all_ref_updates(&self) -> bool {
        self.log_all_ref_updates
    }

    pub(crate) fn ref_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    // ─── cache registry ─────────────────────────────────────────────────

    /// Drop both arrays for a repository; the next read reloads from disk.
    /// Callers that mutate refs behind the store's back must call this.
    pub fn invalidate_cache(&self, submodule: &str) {
        self.caches.borrow_mut().remove(submodule);
    }

    pub(crate) fn clear_loose_cache(&self, submodule: &str) {
        if let Some(cache) = self.caches.borrow_mut().get_mut(submodule) {
            cache.loose = None;
        }
    }

    pub(crate) fn clear_packed_cache(&self, submodule: &str) {
        if let Some(cache) = self.caches.borrow_mut().get_mut(submodule) {
            cache.packed = None;
        }
    }

    /// The packed reference array, loaded on first demand.
    pub(crate) fn packed_refs(&self, submodule: &str) -> Result<Rc<[RefEntry]>, RefError> {
        if let Some(rc) = self
            .caches
            .borrow()
            .get(submodule)
            .and_then(|c| c.packed.clone())
        {
            return Ok(rc);
        }
        let path = self.submodule_git_dir(submodule).join("packed-refs");
        let mut warnings = Vec::new();
        let packed = PackedRefs::load(&path, &mut warnings)?;
        self.warnings.borrow_mut().extend(warnings);
        let rc: Rc<[RefEntry]> = packed.into_entries().into();
        self.caches
            .borrow_mut()
            .entry(submodule.to_string())
            .or_default()
            .packed = Some(rc.clone());
        Ok(rc)
    }

    /// The loose reference array, loaded on first demand.
    pub(crate) fn loose_refs(&self, submodule: &str) -> Result<Rc<[RefEntry]>, RefError> {
        if let Some(rc) = self
            .caches
            .borrow()
            .get(submodule)
            .and_then(|c| c.loose.clone())
        {
            return Ok(rc);
        }
        let dir = self.submodule_git_dir(submodule);
        let mut names = Vec::new();
        loose::walk_refs_dir(&dir, &mut names)?;

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            loose::check_loose_name(name.as_bytes().as_bstr())?;
            let entry = if submodule.is_empty() {
                // `reading = false` keeps the SYMBOLIC flag on dangling
                // symrefs instead of turning them into resolution failures
                match self.resolve(&name, false) {
                    Ok(resolved) => RefEntry {
                        name: RefName::new_unchecked(name),
                        target: resolved.target,
                        peeled: None,
                        flags: resolved.flags,
                    },
                    Err(_) => RefEntry {
                        name: RefName::new_unchecked(name),
                        target: ObjectId::NULL,
                        peeled: None,
                        flags: RefFlags::BROKEN,
                    },
                }
            } else {
                match self.gitlink_resolve(submodule, name.as_bytes().as_bstr(), 0) {
                    Some(target) => RefEntry {
                        name: RefName::new_unchecked(name),
                        target,
                        peeled: None,
                        flags: RefFlags::empty(),
                    },
                    None => RefEntry {
                        name: RefName::new_unchecked(name),
                        target: ObjectId::NULL,
                        peeled: None,
                        flags: RefFlags::BROKEN,
                    },
                }
            };
            entries.push(entry);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let rc: Rc<[RefEntry]> = entries.into();
        self.caches
            .borrow_mut()
            .entry(submodule.to_string())
            .or_default()
            .loose = Some(rc.clone());
        Ok(rc)
    }

    // ─── extra refs ─────────────────────────────────────────────────────

    /// Register a transient in-memory ref that iteration will see alongside
    /// the on-disk ones (fetch machinery uses this for provisional names).
    pub fn add_extra_ref(&self, name: &str, target: ObjectId, flags: RefFlags) {
        let mut extra = self.extra.borrow_mut();
        extra.push(RefEntry {
            name: RefName::new_unchecked(name),
            target,
            peeled: None,
            flags,
        });
        extra.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn clear_extra_refs(&self) {
        self.extra.borrow_mut().clear();
    }

    pub(crate) fn extra_refs(&self) -> Vec<RefEntry> {
        self.extra.borrow().clone()
    }

    // ─── resolver ───────────────────────────────────────────────────────

    /// Resolve a reference name to its final target, following symbolic
    /// references up to a fixed depth.
    ///
    /// With `reading` set, a missing reference is `RefError::NotFound`;
    /// without it, resolution of a missing name succeeds with a null target
    /// so that callers can prepare to create it.
    pub fn resolve(&self, name: &str, reading: bool) -> Result<Resolved, RefError> {
        check_refname_format(name.as_bytes().as_bstr(), CheckRefFlags::ALLOW_ONELEVEL)?;

        let mut refname = BString::from(name);
        let mut flags = RefFlags::empty();
        for _ in 0..MAXDEPTH {
            let name_str = refname.to_str_lossy();
            let path = self.git_dir.join(&*name_str);
            let meta = match fs::symlink_metadata(&path) {
                Ok(m) => Some(m),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(RefError::IoPath { path, source: e }),
            };

            let Some(meta) = meta else {
                // No loose file; check for a packed reference
                let packed = self.packed_refs("")?;
                if let Some(entry) = find_entry(&packed, refname.as_bstr()) {
                    return Ok(Resolved {
                        name: RefName::new_unchecked(refname),
                        target: entry.target,
                        flags: flags | RefFlags::PACKED,
                    });
                }
                if reading {
                    return Err(RefError::NotFound(refname.to_string()));
                }
                return Ok(Resolved {
                    name: RefName::new_unchecked(refname),
                    target: ObjectId::NULL,
                    flags,
                });
            };

            if meta.file_type().is_symlink() {
                // Follow "normalized" refs/... symlinks by hand; any other
                // link target is read through below.
                if let Ok(link) = fs::read_link(&path) {
                    if let Some(target) = link.to_str() {
                        if target.starts_with("refs/")
                            && check_refname_format(
                                target.as_bytes().as_bstr(),
                                CheckRefFlags::empty(),
                            )
                            .is_ok()
                        {
                            flags |= RefFlags::SYMBOLIC;
                            refname = BString::from(target);
                            continue;
                        }
                    }
                }
            } else if meta.is_dir() {
                return Err(RefError::IsDirectory(refname.to_string()));
            }

            let buf = read_bounded(&path, REF_FILE_READ_LIMIT)?;
            match loose::parse_ref_content(&buf) {
                Ok(loose::RefFileContent::Symbolic(target)) => {
                    flags |= RefFlags::SYMBOLIC;
                    refname = target.into_inner();
                }
                Ok(loose::RefFileContent::Direct(target)) => {
                    return Ok(Resolved {
                        name: RefName::new_unchecked(refname),
                        target,
                        flags,
                    });
                }
                Err(_) => return Err(RefError::Broken(refname.to_string())),
            }
        }
        // Depth exhausted
        Err(RefError::NotFound(refname.to_string()))
    }

    /// Resolve and return the target id; missing refs are an error.
    pub fn read_ref(&self, name: &str) -> Result<ObjectId, RefError> {
        Ok(self.resolve(name, true)?.target)
    }

    pub fn ref_exists(&self, name: &str) -> bool {
        self.resolve(name, true).is_ok()
    }

    /// Peel a reference to the non-tag object behind it.
    ///
    /// `cursor` is the entry handle yielded by iteration; passing it back in
    /// lets the packed peel annotation answer without re-resolving. A
    /// reference whose target is not an annotated tag does not peel.
    pub fn peel_ref(&self, name: &str, cursor: Option<&RefEntry>) -> Result<ObjectId, RefError> {
        let base = match cursor {
            Some(item) if item.name.as_str() == name => {
                if item.flags.contains(RefFlags::KNOWS_PEELED) {
                    return item
                        .peeled
                        .ok_or_else(|| RefError::NotPeelable(name.to_string()));
                }
                item.target
            }
            _ => {
                let resolved = self.resolve(name, true)?;
                if resolved.flags.contains(RefFlags::PACKED) {
                    let packed = self.packed_refs("")?;
                    if let Some(entry) = find_entry(&packed, name.as_bytes().as_bstr()) {
                        if entry.flags.contains(RefFlags::KNOWS_PEELED) {
                            return entry
                                .peeled
                                .ok_or_else(|| RefError::NotPeelable(name.to_string()));
                        }
                    }
                }
                resolved.target
            }
        };

        let odb = self
            .odb()
            .ok_or_else(|| RefError::NotPeelable(name.to_string()))?;
        match odb.read_object(&base) {
            Some((ObjectKind::Tag, _)) => odb
                .deref_tag(&base)
                .ok_or_else(|| RefError::NotPeelable(name.to_string())),
            _ => Err(RefError::NotPeelable(name.to_string())),
        }
    }

    /// Point a symbolic reference (typically `HEAD`) at another ref.
    pub fn create_symref(
        &self,
        name: &str,
        target: &str,
        logmsg: Option<&str>,
    ) -> Result<(), RefError> {
        check_refname_format(name.as_bytes().as_bstr(), CheckRefFlags::ALLOW_ONELEVEL)?;
        let old = self.read_ref(name).unwrap_or(ObjectId::NULL);

        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut lock = LockFile::hold(&path)?;
        lock.write_all(format!("ref: {target}\n").as_bytes())?;
        lock.commit()?;
        self.clear_loose_cache("");

        if let Some(msg) = logmsg {
            if let Ok(new) = self.read_ref(target) {
                crate::reflog::append(self, &RefName::new_unchecked(name), &old, &new, msg)?;
            }
        }
        Ok(())
    }

    // ─── name shortening and expansion ──────────────────────────────────

    /// Shorten a full ref name to the shortest shorthand that still
    /// unambiguously names it under the expansion rules.
    pub fn shorten_unambiguous_ref(&self, name: &str, strict: bool) -> String {
        let nr_rules = REF_REV_PARSE_RULES.len();
        // Rule 0 always matches; try the most specific rules first
        for i in (1..nr_rules).rev() {
            let Some(short) = match_rule(i, name) else {
                continue;
            };
            // In strict mode every other rule must fail to resolve; in lax
            // mode only the higher-priority ones need to
            let rules_to_fail = if strict { nr_rules } else { i };
            let ambiguous = (0..rules_to_fail)
                .filter(|&j| j != i)
                .any(|j| self.ref_exists(&expand_rule(j, short)));
            if !ambiguous {
                return short.to_string();
            }
        }
        name.to_string()
    }

    /// Find what a shorthand refers to. Returns the number of rules that
    /// matched an existing ref and the highest-priority resolution.
    pub fn dwim_ref(&self, short: &str) -> (usize, Option<Resolved>) {
        let mut found = 0;
        let mut first = None;
        for i in 0..REF_REV_PARSE_RULES.len() {
            let full = expand_rule(i, short);
            match self.resolve(&full, true) {
                Ok(resolved) => {
                    found += 1;
                    if first.is_none() {
                        first = Some(resolved);
                    }
                }
                Err(_) => match self.resolve(&full, false) {
                    Ok(r) if r.flags.contains(RefFlags::SYMBOLIC) && full != "HEAD" => {
                        self.warn(RefWarning::DanglingSymref(full));
                    }
                    Err(RefError::Broken(_)) if full.contains('/') => {
                        self.warn(RefWarning::BrokenRef(full));
                    }
                    _ => {}
                },
            }
        }
        (found, first)
    }

    // ─── submodules ─────────────────────────────────────────────────────

    /// Resolve a ref inside a submodule checked out at `submodule` (a path
    /// relative to the superproject work tree). `None` when unresolvable.
    pub fn resolve_submodule_ref(&self, submodule: &str, name: &str) -> Option<ObjectId> {
        let sub = submodule.trim_end_matches('/');
        if sub.is_empty() {
            return None;
        }
        self.gitlink_resolve(sub, name.as_bytes().as_bstr(), 0)
    }

    pub(crate) fn gitlink_resolve(
        &self,
        submodule: &str,
        name: &BStr,
        depth: usize,
    ) -> Option<ObjectId> {
        if depth > MAXDEPTH || name.len() > MAXREFLEN {
            return None;
        }
        let dir = self.submodule_git_dir(submodule);
        let path = dir.join(name.to_str().ok()?);
        let Ok(buf) = read_bounded(&path, 127) else {
            // No loose file in the submodule: try its packed refs
            let packed = self.packed_refs(submodule).ok()?;
            return find_entry(&packed, name).map(|e| e.target);
        };
        let mut len = buf.len();
        while len > 0 && buf[len - 1].is_ascii_whitespace() {
            len -= 1;
        }
        let buf = &buf[..len];
        if buf.len() >= 40 {
            if let Ok(oid) = ObjectId::from_hex(&buf[..40]) {
                return Some(oid);
            }
        }
        let rest = buf.strip_prefix(b"ref:")?;
        let target = rest.trim_start();
        self.gitlink_resolve(submodule, target.as_bstr(), depth + 1)
    }

    /// The repository directory for a submodule (empty string = main),
    /// following a `gitdir:` redirect file when present.
    pub(crate) fn submodule_git_dir(&self, submodule: &str) -> PathBuf {
        if submodule.is_empty() {
            return self.git_dir.clone();
        }
        let work = self.git_dir.parent().unwrap_or(&self.git_dir);
        let sub_dir = work.join(submodule);
        let dotgit = sub_dir.join(".git");
        if dotgit.is_file() {
            if let Ok(content) = fs::read_to_string(&dotgit) {
                if let Some(rest) = content.trim_end().strip_prefix("gitdir:") {
                    let p = Path::new(rest.trim());
                    return if p.is_absolute() {
                        p.to_path_buf()
                    } else {
                        sub_dir.join(p)
                    };
                }
            }
        }
        dotgit
    }
}

/// Read at most `limit` bytes of a file.
pub(crate) fn read_bounded(path: &Path, limit: u64) -> Result<Vec<u8>, RefError> {
    let file = fs::File::open(path).map_err(|e| RefError::IoPath {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut buf = Vec::with_capacity(limit as usize);
    file.take(limit)
        .read_to_end(&mut buf)
        .map_err(|e| RefError::IoPath {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(buf)
}

/// Remove a directory tree that contains only (possibly nested) empty
/// directories; fails without removing anything more if a file is found.
pub(crate) fn remove_empty_directories(path: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            remove_empty_directories(&entry.path())?;
        } else {
            return Err(std::io::Error::other("directory not empty"));
        }
    }
    fs::remove_dir(path)
}

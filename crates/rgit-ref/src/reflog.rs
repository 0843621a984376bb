use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice, ByteVec};
use memmap2::Mmap;
use rgit_hash::ObjectId;
use rgit_utils::date::Signature;
use rgit_utils::lockfile::LockFile;

use crate::error::{RefError, RefWarning};
use crate::files::{remove_empty_directories, FilesRefStore};
use crate::name::RefName;

/// One record of a reference's audit log.
///
/// On disk: `<old-hex> SP <new-hex> SP <identity> SP <ts> SP <tz> TAB <msg> LF`,
/// one line per record, no embedded newlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old: ObjectId,
    pub new: ObjectId,
    pub identity: Signature,
    pub message: BString,
}

impl ReflogEntry {
    /// Parse one log line (without its trailing newline).
    ///
    /// Returns `None` for anything malformed; forward iteration skips such
    /// lines rather than failing.
    pub fn parse(line: &BStr) -> Option<Self> {
        let b: &[u8] = line.as_ref();
        if b.len() < 82 {
            return None;
        }
        let old = ObjectId::from_hex(&b[..40]).ok()?;
        if b[40] != b' ' {
            return None;
        }
        let new = ObjectId::from_hex(&b[41..81]).ok()?;
        if b[81] != b' ' {
            return None;
        }

        let rest = &b[82..];
        let gt = rest.find_byte(b'>')?;
        if rest.get(gt + 1) != Some(&b' ') {
            return None;
        }
        let ts_start = gt + 2;
        let mut ts_end = ts_start;
        let mut timestamp: u64 = 0;
        while ts_end < rest.len() && rest[ts_end].is_ascii_digit() {
            timestamp = timestamp.wrapping_mul(10) + u64::from(rest[ts_end] - b'0');
            ts_end += 1;
        }
        if ts_end == ts_start || timestamp == 0 {
            return None;
        }
        if rest.get(ts_end) != Some(&b' ') {
            return None;
        }
        let sign = *rest.get(ts_end + 1)?;
        if sign != b'+' && sign != b'-' {
            return None;
        }
        for k in 0..4 {
            if !rest.get(ts_end + 2 + k)?.is_ascii_digit() {
                return None;
            }
        }

        let identity = Signature::parse(rest[..ts_end + 6].as_bstr()).ok()?;
        let msg_idx = ts_end + 6;
        let message = match rest.get(msg_idx) {
            Some(b'\t') => BString::from(&rest[msg_idx + 1..]),
            _ => BString::new(Vec::new()),
        };
        Some(Self {
            old,
            new,
            identity,
            message,
        })
    }

    /// Serialize to one log line (with trailing newline), normalizing the
    /// message down to a single line.
    pub fn to_line(&self) -> BString {
        let mut out = BString::new(Vec::with_capacity(128 + self.message.len()));
        out.push_str(self.old.to_hex());
        out.push(b' ');
        out.push_str(self.new.to_hex());
        out.push(b' ');
        out.push_str(self.identity.to_bytes());
        let msg = normalize_message(self.message.as_bstr());
        if !msg.is_empty() {
            out.push(b'\t');
            out.push_str(msg);
        }
        out.push(b'\n');
        out
    }
}

/// Collapse whitespace runs to single spaces and trim the ends; the log is
/// one line per record, so messages must not carry newlines.
pub(crate) fn normalize_message(msg: &BStr) -> BString {
    let mut out = BString::new(Vec::with_capacity(msg.len()));
    let mut was_space = true;
    for &c in msg.iter() {
        let is_space = c.is_ascii_whitespace() || c == 0x0b;
        if is_space && was_space {
            continue;
        }
        was_space = is_space;
        out.push(if is_space { b' ' } else { c });
    }
    if out.last() == Some(&b' ') {
        out.pop();
    }
    out
}

pub(crate) fn log_path(git_dir: &Path, name: &RefName) -> PathBuf {
    git_dir.join("logs").join(name.as_str())
}

/// Logs are created on demand only for these names; anything else gets a
/// log entry only if the log file already exists.
fn should_autocreate(name: &str) -> bool {
    name.starts_with("refs/heads/")
        || name.starts_with("refs/remotes/")
        || name.starts_with("refs/notes/")
        || name == "HEAD"
}

/// Append one record to a reference's log, creating the log if the
/// reference is of a logged kind.
pub(crate) fn append(
    store: &FilesRefStore,
    name: &RefName,
    old: &ObjectId,
    new: &ObjectId,
    message: &str,
) -> Result<(), RefError> {
    let path = log_path(store.git_dir(), name);
    let autocreate = store.log_all_ref_updates() && should_autocreate(name.as_str());

    let file = if autocreate {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        match OpenOptions::new().append(true).create(true).open(&path) {
            Ok(f) => f,
            Err(_) if path.is_dir() => {
                // An empty directory of renamed-away logs may sit here
                remove_empty_directories(&path).map_err(|e| RefError::IoPath {
                    path: path.clone(),
                    source: e,
                })?;
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&path)
                    .map_err(|e| RefError::IoPath {
                        path: path.clone(),
                        source: e,
                    })?
            }
            Err(e) => {
                return Err(RefError::IoPath {
                    path: path.clone(),
                    source: e,
                })
            }
        }
    } else {
        match OpenOptions::new().append(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(RefError::IoPath {
                    path: path.clone(),
                    source: e,
                })
            }
        }
    };

    let entry = ReflogEntry {
        old: *old,
        new: *new,
        identity: store.committer(),
        message: BString::from(message),
    };
    let mut file = file;
    file.write_all(&entry.to_line()).map_err(|e| RefError::IoPath {
        path: path.clone(),
        source: e,
    })?;
    Ok(())
}

/// The outcome of a time-indexed reflog lookup.
#[derive(Debug, Clone)]
pub struct RefAt {
    /// The value the reference had at the requested point.
    pub target: ObjectId,
    /// Timestamp of the record that answered.
    pub cutoff_time: i64,
    /// Timezone of that record, in the on-disk decimal form.
    pub cutoff_tz: i32,
    /// How many records lie after the answering one.
    pub cutoff_cnt: usize,
    /// The answering record's message.
    pub message: BString,
    /// The requested time predates the whole log; the oldest record was
    /// returned instead.
    pub predates: bool,
    /// Consistency findings along the scan (gaps, unexpected log end).
    pub warnings: Vec<RefWarning>,
}

impl FilesRefStore {
    /// Walk a reference's log oldest-first, skipping corrupt lines.
    ///
    /// Adjacent records are cross-checked: a record whose `old` differs
    /// from its predecessor's `new` raises a gap warning but iteration
    /// continues.
    pub fn for_each_reflog_ent<F>(&self, name: &str, f: F) -> Result<(), RefError>
    where
        F: FnMut(&ReflogEntry) -> ControlFlow<()>,
    {
        self.for_each_recent_reflog_ent(name, 0, f)
    }

    /// Like `for_each_reflog_ent`, starting `ofs` bytes before the end of
    /// the log (the first partial line is discarded).
    pub fn for_each_recent_reflog_ent<F>(
        &self,
        name: &str,
        ofs: u64,
        mut f: F,
    ) -> Result<(), RefError>
    where
        F: FnMut(&ReflogEntry) -> ControlFlow<()>,
    {
        let refname = RefName::new(name)?;
        let path = log_path(self.git_dir(), &refname);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RefError::NotFound(format!("logs/{name}")))
            }
            Err(e) => return Err(RefError::IoPath { path, source: e }),
        };
        let mut reader = BufReader::new(file);
        if ofs > 0 {
            let size = reader.get_ref().metadata().map(|m| m.len()).unwrap_or(0);
            if size < ofs {
                return Err(RefError::NotFound(format!("logs/{name}")));
            }
            reader
                .seek(SeekFrom::End(-(ofs as i64)))
                .map_err(RefError::Io)?;
            let mut partial = Vec::new();
            reader.read_until(b'\n', &mut partial).map_err(RefError::Io)?;
        }

        let mut prev_new: Option<ObjectId> = None;
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).map_err(RefError::Io)?;
            if n == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                // a final unterminated fragment is not a record
                break;
            }
            line.pop();
            let Some(entry) = ReflogEntry::parse(line.as_bstr()) else {
                continue; // corrupt? skip
            };
            if let Some(prev) = prev_new {
                if prev != entry.old {
                    self.warn(RefWarning::ReflogGap {
                        name: name.to_string(),
                        earlier_new: prev,
                        later_old: entry.old,
                    });
                }
            }
            prev_new = Some(entry.new);
            if let ControlFlow::Break(()) = f(&entry) {
                break;
            }
        }
        Ok(())
    }

    /// Enumerate every reference that has a log, with its current value.
    pub fn for_each_reflog<F>(&self, mut f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &ObjectId) -> ControlFlow<()>,
    {
        self.walk_reflog_dir("", &mut f)?;
        Ok(())
    }

    fn walk_reflog_dir<F>(&self, base: &str, f: &mut F) -> Result<ControlFlow<()>, RefError>
    where
        F: FnMut(&BStr, &ObjectId) -> ControlFlow<()>,
    {
        let dir_path = self.git_dir().join("logs").join(base);
        let dir = match fs::read_dir(&dir_path) {
            Ok(d) => d,
            Err(_) if base.is_empty() => return Ok(ControlFlow::Continue(())),
            Err(e) => {
                return Err(RefError::IoPath {
                    path: dir_path,
                    source: e,
                })
            }
        };
        for entry in dir {
            let entry = entry.map_err(|e| RefError::IoPath {
                path: dir_path.clone(),
                source: e,
            })?;
            let file_name = entry.file_name();
            let Some(fname) = file_name.to_str() else {
                continue;
            };
            if fname.starts_with('.') || fname.len() > 255 || fname.ends_with(".lock") {
                continue;
            }
            let child = if base.is_empty() {
                fname.to_string()
            } else {
                format!("{base}/{fname}")
            };
            let Ok(meta) = fs::metadata(entry.path()) else {
                continue;
            };
            if meta.is_dir() {
                if let ControlFlow::Break(()) = self.walk_reflog_dir(&child, f)? {
                    return Ok(ControlFlow::Break(()));
                }
            } else {
                let resolved = self
                    .resolve(&child, false)
                    .map_err(|_| RefError::Broken(child.clone()))?;
                if let ControlFlow::Break(()) = f(child.as_bytes().as_bstr(), &resolved.target) {
                    return Ok(ControlFlow::Break(()));
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Time-indexed lookup: the reference's value as of `at_time` (the
    /// newest record with timestamp <= `at_time`), or the `cnt`-th most
    /// recent record when `cnt` is given.
    ///
    /// Scans the memory-mapped log backward. Corruption is fatal here,
    /// unlike in forward iteration; inter-record inconsistencies are
    /// reported as warnings on the result.
    pub fn read_ref_at(
        &self,
        name: &str,
        at_time: i64,
        cnt: Option<u64>,
    ) -> Result<RefAt, RefError> {
        let refname = RefName::new(name)?;
        let path = log_path(self.git_dir(), &refname);
        let file = fs::File::open(&path).map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
        let corrupt = |reason: &'static str| RefError::ReflogCorrupt {
            name: name.to_string(),
            reason,
        };
        let len = file
            .metadata()
            .map_err(|e| RefError::IoPath {
                path: path.clone(),
                source: e,
            })?
            .len();
        if len == 0 {
            return Err(corrupt("log is empty"));
        }
        let map = unsafe { Mmap::map(&file) }.map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
        let data: &[u8] = &map;
        let logend = data.len();

        let mut warnings = Vec::new();
        let mut rec = logend;
        let mut lastrec: Option<usize> = None;
        let mut reccnt: usize = 0;
        let mut cnt: i64 = cnt.map(|c| c as i64).unwrap_or(-1);

        while rec > 0 {
            reccnt += 1;
            if data[rec - 1] == b'\n' {
                rec -= 1;
            }
            let mut lastgt: Option<usize> = None;
            while rec > 0 && data[rec - 1] != b'\n' {
                rec -= 1;
                if data[rec] == b'>' {
                    lastgt = Some(rec);
                }
            }
            let gt = lastgt.ok_or_else(|| corrupt("record without identity"))?;
            let (date, tz) = parse_date_tz(&data[gt + 1..]);

            if date <= at_time || cnt == 0 {
                let message = extract_message(&data[rec..logend]);
                let this_new =
                    parse_hex_at(data, rec + 41).ok_or_else(|| corrupt("bad new id"))?;
                let target = if let Some(later) = lastrec {
                    let later_old =
                        parse_hex_at(data, later).ok_or_else(|| corrupt("bad old id"))?;
                    if later_old != this_new {
                        warnings.push(RefWarning::ReflogGap {
                            name: name.to_string(),
                            earlier_new: this_new,
                            later_old,
                        });
                    }
                    this_new
                } else if date == at_time {
                    this_new
                } else {
                    // The newest record predates the requested time; the
                    // current value extends past the end of the log.
                    match self.resolve(name, true) {
                        Ok(current) if current.target != this_new => {
                            warnings.push(RefWarning::ReflogEnded {
                                name: name.to_string(),
                                last: this_new,
                            });
                            current.target
                        }
                        Ok(current) => current.target,
                        Err(_) => this_new,
                    }
                };
                return Ok(RefAt {
                    target,
                    cutoff_time: date,
                    cutoff_tz: tz,
                    cutoff_cnt: reccnt - 1,
                    message,
                    predates: false,
                    warnings,
                });
            }

            lastrec = Some(rec);
            if cnt > 0 {
                cnt -= 1;
            }
        }

        // Every record is newer than at_time: report the oldest one
        let mut i = 0;
        while i < logend && data[i] != b'>' && data[i] != b'\n' {
            i += 1;
        }
        if i == logend || data[i] == b'\n' {
            return Err(corrupt("record without identity"));
        }
        let (date, tz) = parse_date_tz(&data[i + 1..]);
        let mut target = parse_hex_at(data, 0).ok_or_else(|| corrupt("bad old id"))?;
        if target.is_null() {
            target = parse_hex_at(data, 41).ok_or_else(|| corrupt("bad new id"))?;
        }
        let message = extract_message(data);
        Ok(RefAt {
            target,
            cutoff_time: date,
            cutoff_tz: tz,
            cutoff_cnt: reccnt,
            message,
            predates: true,
            warnings,
        })
    }

    /// Drop log records older than `expire_timestamp`, always keeping the
    /// newest. Returns the number of records removed.
    pub fn expire_reflog(&self, name: &str, expire_timestamp: i64) -> Result<usize, RefError> {
        let refname = RefName::new(name)?;
        let path = log_path(self.git_dir(), &refname);
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(RefError::IoPath { path, source: e }),
        };

        let mut entries = Vec::new();
        for line in ByteSlice::lines(data.as_slice()) {
            if line.is_empty() {
                continue;
            }
            let entry = ReflogEntry::parse(line.as_bstr()).ok_or(RefError::ReflogCorrupt {
                name: name.to_string(),
                reason: "unparseable record",
            })?;
            entries.push(entry);
        }

        let total = entries.len();
        let mut out = BString::new(Vec::with_capacity(data.len()));
        let mut kept = 0usize;
        for (i, entry) in entries.iter().enumerate() {
            let is_tip = i == total - 1;
            if is_tip || entry.identity.date.timestamp >= expire_timestamp {
                out.push_str(entry.to_line());
                kept += 1;
            }
        }

        let mut lock = LockFile::hold(&path)?;
        lock.write_all(&out)?;
        lock.commit()?;
        Ok(total - kept)
    }
}

/// Parse `<ts> <+/-hhmm>` right after an identity's closing `>`. Lenient,
/// as the backward scanner has always been: missing pieces read as zero.
fn parse_date_tz(b: &[u8]) -> (i64, i32) {
    let mut i = 0;
    while i < b.len() && (b[i] == b' ' || b[i] == b'\t') {
        i += 1;
    }
    let mut date: i64 = 0;
    while i < b.len() && b[i].is_ascii_digit() {
        date = date.wrapping_mul(10) + i64::from(b[i] - b'0');
        i += 1;
    }
    while i < b.len() && b[i] == b' ' {
        i += 1;
    }
    let mut neg = false;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        neg = b[i] == b'-';
        i += 1;
    }
    let mut tz: i32 = 0;
    while i < b.len() && b[i].is_ascii_digit() {
        tz = tz.wrapping_mul(10) + i32::from(b[i] - b'0');
        i += 1;
    }
    (date, if neg { -tz } else { tz })
}

/// The message of the record starting at `line` (bounded by its newline):
/// everything after the TAB, empty when there is none.
fn extract_message(line: &[u8]) -> BString {
    let end = line.find_byte(b'\n').unwrap_or(line.len());
    let line = &line[..end];
    if line.len() <= 82 {
        return BString::new(Vec::new());
    }
    match line[82..].find_byte(b'\t') {
        Some(t) => BString::from(&line[82 + t + 1..]),
        None => BString::new(Vec::new()),
    }
}

fn parse_hex_at(data: &[u8], idx: usize) -> Option<ObjectId> {
    let end = idx.checked_add(40)?;
    if end > data.len() {
        return None;
    }
    ObjectId::from_hex(&data[idx..end]).ok()
}

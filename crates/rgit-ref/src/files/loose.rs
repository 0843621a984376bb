use std::fs;
use std::path::Path;

use bstr::{BStr, ByteSlice};
use rgit_hash::ObjectId;

use crate::error::RefError;
use crate::name::{check_refname_format, CheckRefFlags, RefName};

/// What a scalar ref file contains: a hex id or a `ref:` redirect.
pub(crate) enum RefFileContent {
    Symbolic(RefName),
    Direct(ObjectId),
}

/// The whitespace set the ref-file parser trims and tolerates.
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r')
}

/// Parse the contents of a loose ref file.
///
/// Trailing whitespace is trimmed. A `ref:` line (with optional whitespace
/// before the target) is a symbolic ref whose target must itself be a valid
/// name. Anything else must start with a 40-char hex id; a further
/// whitespace-separated token is tolerated (FETCH_HEAD-style files carry
/// one), any other trailing byte is malformed.
pub(crate) fn parse_ref_content(buf: &[u8]) -> Result<RefFileContent, &'static str> {
    let mut len = buf.len();
    while len > 0 && is_space(buf[len - 1]) {
        len -= 1;
    }
    let buf = &buf[..len];

    if let Some(rest) = buf.strip_prefix(b"ref:") {
        let mut target = rest;
        while target.first().copied().is_some_and(is_space) {
            target = &target[1..];
        }
        check_refname_format(target.as_bstr(), CheckRefFlags::ALLOW_ONELEVEL)
            .map_err(|_| "invalid symref target")?;
        return Ok(RefFileContent::Symbolic(RefName::new_unchecked(target)));
    }

    if buf.len() < 40 {
        return Err("not a valid ref id");
    }
    let oid = ObjectId::from_hex(&buf[..40]).map_err(|_| "not a valid ref id")?;
    if buf.len() > 40 && !is_space(buf[40]) {
        return Err("trailing junk after ref id");
    }
    Ok(RefFileContent::Direct(oid))
}

/// Recursively enumerate the regular files under `<dir>/refs` as full ref
/// names (`refs/...`), sorted by the caller afterwards.
///
/// Skipped: entries whose name starts with `.`, is longer than 255 bytes,
/// or ends in `.lock`, plus anything that cannot be stat'ed.
pub(crate) fn walk_refs_dir(dir: &Path, out: &mut Vec<String>) -> Result<(), RefError> {
    walk_dir(dir, "refs", out)
}

fn walk_dir(base: &Path, relname: &str, out: &mut Vec<String>) -> Result<(), RefError> {
    let dir = match fs::read_dir(base.join(relname)) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(RefError::IoPath {
                path: base.join(relname),
                source: e,
            })
        }
    };
    for entry in dir {
        let entry = entry.map_err(|e| RefError::IoPath {
            path: base.join(relname),
            source: e,
        })?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.starts_with('.') || name.len() > 255 || name.ends_with(".lock") {
            continue;
        }
        let child = format!("{relname}/{name}");
        // stat (following symlinks), as the reader does
        let Ok(meta) = fs::metadata(entry.path()) else {
            continue;
        };
        if meta.is_dir() {
            walk_dir(base, &child, out)?;
        } else if meta.is_file() {
            out.push(child);
        }
    }
    Ok(())
}

/// A ref name must survive the loose-entry grammar (dot-leading components
/// appear in packed files written by older tools, so they are tolerated).
pub(crate) fn check_loose_name(name: &BStr) -> Result<(), RefError> {
    check_refname_format(
        name,
        CheckRefFlags::ALLOW_ONELEVEL | CheckRefFlags::DOT_COMPONENT,
    )
}

use std::fs;
use std::path::Path;

use bstr::{BStr, ByteSlice, ByteVec};
use rgit_hash::ObjectId;

use crate::error::{RefError, RefWarning};
use crate::name::{CheckRefFlags, RefName};
use crate::{RefEntry, RefFlags};

/// The header written in front of the records. The `peeled` trait promises
/// that every annotated tag in the file carries its peel annotation, so the
/// absence of a `^` line means "not peelable".
const HEADER: &[u8] = b"# pack-refs with: peeled fully-peeled sorted \n";
const HEADER_PREFIX: &[u8] = b"# pack-refs with:";

/// The parsed packed-refs file: a sorted, duplicate-free reference array.
///
/// Format, one record per line:
/// ```text
/// # pack-refs with: peeled fully-peeled sorted
/// <hex-oid> <refname>
/// ^<hex-oid>   (peeled value of the annotated tag above)
/// ```
#[derive(Debug, Clone)]
pub struct PackedRefs {
    refs: Vec<RefEntry>,
}

impl PackedRefs {
    /// Parse the packed-refs text format.
    ///
    /// Unparseable record and peel lines are skipped the way the stream
    /// reader always has; an invalid ref name is fatal, as is a duplicated
    /// name with mismatched targets. Same-name same-target duplicates
    /// collapse to one entry with a warning.
    pub fn parse(data: &[u8], warnings: &mut Vec<RefWarning>) -> Result<Self, RefError> {
        let mut refs: Vec<RefEntry> = Vec::new();
        let mut flags = RefFlags::PACKED;
        let mut pos = 0;

        while pos < data.len() {
            let (line, terminated) = match data[pos..].find_byte(b'\n') {
                Some(n) => (&data[pos..pos + n], true),
                None => (&data[pos..], false),
            };
            pos += line.len() + 1;
            if !terminated {
                // a final unterminated fragment is not a record
                break;
            }
            if line.is_empty() {
                continue;
            }

            if line.starts_with(b"#") {
                if let Some(traits) = line.strip_prefix(HEADER_PREFIX) {
                    // the trait token must be space-delimited on both sides
                    if traits.find(b" peeled ").is_some() {
                        flags |= RefFlags::KNOWS_PEELED;
                    }
                }
                continue;
            }

            if line[0] == b'^' {
                if line.len() == 41 {
                    if let Ok(peeled) = ObjectId::from_hex(&line[1..]) {
                        if let Some(last) = refs.last_mut() {
                            last.peeled = Some(peeled);
                        }
                    }
                }
                continue;
            }

            if line.len() < 42 {
                continue;
            }
            let Ok(target) = ObjectId::from_hex(&line[..40]) else {
                continue;
            };
            if line[40] != b' ' && line[40] != b'\t' {
                continue;
            }
            let name_bytes = &line[41..];
            if matches!(name_bytes[0], b' ' | b'\t') {
                continue;
            }
            let name = RefName::new_with(
                name_bytes,
                CheckRefFlags::ALLOW_ONELEVEL | CheckRefFlags::DOT_COMPONENT,
            )?;
            refs.push(RefEntry {
                name,
                target,
                peeled: None,
                flags,
            });
        }

        sort_and_dedup(&mut refs, warnings)?;
        Ok(Self { refs })
    }

    /// Load packed-refs from disk. A missing file is an empty array.
    pub fn load(path: &Path, warnings: &mut Vec<RefWarning>) -> Result<Self, RefError> {
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { refs: Vec::new() })
            }
            Err(e) => {
                return Err(RefError::IoPath {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&data, warnings)
    }

    /// Build from an entry list (sorting it).
    pub fn from_entries(mut refs: Vec<RefEntry>) -> Self {
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Self { refs }
    }

    /// Look up an entry by name (binary search; the array is sorted).
    pub fn find(&self, name: &BStr) -> Option<&RefEntry> {
        find_entry(&self.refs, name)
    }

    /// The sorted entries.
    pub fn entries(&self) -> &[RefEntry] {
        &self.refs
    }

    pub fn into_entries(self) -> Vec<RefEntry> {
        self.refs
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Serialize back to the text format, header and peel lines included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 * self.refs.len() + HEADER.len());
        out.extend_from_slice(HEADER);
        for entry in &self.refs {
            out.push_str(entry.target.to_hex());
            out.push(b' ');
            out.push_str(entry.name.as_bstr());
            out.push(b'\n');
            if let Some(peeled) = &entry.peeled {
                out.push(b'^');
                out.push_str(peeled.to_hex());
                out.push(b'\n');
            }
        }
        out
    }
}

/// Binary-search a sorted reference array by name.
pub(crate) fn find_entry<'a>(array: &'a [RefEntry], name: &BStr) -> Option<&'a RefEntry> {
    array
        .binary_search_by(|e| e.name.as_bstr().cmp(name))
        .ok()
        .map(|i| &array[i])
}

/// Sort by name and collapse duplicates. Same name with the same target is
/// a warning; with different targets it is a fatal inconsistency.
fn sort_and_dedup(refs: &mut Vec<RefEntry>, warnings: &mut Vec<RefWarning>) -> Result<(), RefError> {
    refs.sort_by(|a, b| a.name.cmp(&b.name));
    let mut fatal: Option<RefError> = None;
    refs.dedup_by(|cur, prev| {
        if cur.name != prev.name {
            return false;
        }
        if cur.target != prev.target {
            if fatal.is_none() {
                fatal = Some(RefError::DuplicatePacked {
                    name: prev.name.to_string(),
                    first: prev.target,
                    second: cur.target,
                });
            }
        } else {
            warnings.push(RefWarning::DuplicateRef(prev.name.to_string()));
        }
        true
    });
    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

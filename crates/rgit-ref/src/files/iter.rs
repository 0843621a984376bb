use std::cmp::Ordering;
use std::ops::ControlFlow;

use bstr::{BStr, ByteSlice};

use crate::error::{RefError, RefWarning};
use crate::files::FilesRefStore;
use crate::{RefEntry, RefFlags};

/// Snapshot iterator over the merged reference arrays.
///
/// Entries come out in lexicographic name order, each live name exactly
/// once. The yielded entry doubles as the cursor `peel_ref` accepts.
pub struct RefIter {
    items: std::vec::IntoIter<RefEntry>,
}

impl Iterator for RefIter {
    type Item = RefEntry;

    fn next(&mut self) -> Option<RefEntry> {
        self.items.next()
    }
}

impl FilesRefStore {
    /// Ordered merge of (extra, packed, loose) under a prefix.
    ///
    /// A loose entry occludes a packed entry of the same name; an extra
    /// entry is seen only when no on-disk entry claims the name. Without
    /// `include_broken`, broken and dangling entries are dropped, and
    /// entries whose target the object database does not know are dropped
    /// with a warning.
    fn merged_refs(
        &self,
        submodule: &str,
        base: &str,
        include_broken: bool,
    ) -> Result<Vec<RefEntry>, RefError> {
        let packed = self.packed_refs(submodule)?;
        let loose = self.loose_refs(submodule)?;

        let mut out: Vec<RefEntry> = Vec::with_capacity(packed.len() + loose.len());
        let (mut p, mut l) = (0, 0);
        while p < packed.len() && l < loose.len() {
            match packed[p].name.cmp(&loose[l].name) {
                Ordering::Equal => {
                    // Loose wins; the packed entry is occluded
                    out.push(loose[l].clone());
                    p += 1;
                    l += 1;
                }
                Ordering::Less => {
                    out.push(packed[p].clone());
                    p += 1;
                }
                Ordering::Greater => {
                    out.push(loose[l].clone());
                    l += 1;
                }
            }
        }
        out.extend_from_slice(&packed[p..]);
        out.extend_from_slice(&loose[l..]);

        let extra = self.extra_refs();
        if !extra.is_empty() {
            let disk = out;
            let mut merged = Vec::with_capacity(disk.len() + extra.len());
            let (mut d, mut e) = (0, 0);
            while d < disk.len() && e < extra.len() {
                match disk[d].name.cmp(&extra[e].name) {
                    Ordering::Equal => {
                        merged.push(disk[d].clone());
                        d += 1;
                        e += 1;
                    }
                    Ordering::Less => {
                        merged.push(disk[d].clone());
                        d += 1;
                    }
                    Ordering::Greater => {
                        merged.push(extra[e].clone());
                        e += 1;
                    }
                }
            }
            merged.extend_from_slice(&disk[d..]);
            merged.extend_from_slice(&extra[e..]);
            out = merged;
        }

        out.retain(|entry| entry.name.as_bstr().starts_with(base.as_bytes()));
        if !include_broken {
            out.retain(|entry| {
                if entry.flags.contains(RefFlags::BROKEN) {
                    return false;
                }
                if entry.target.is_null() {
                    // dangling symref
                    return false;
                }
                if let Some(odb) = self.odb() {
                    if !odb.has_object(&entry.target) {
                        self.warn(RefWarning::UnknownObject {
                            name: entry.name.to_string(),
                            target: entry.target,
                        });
                        return false;
                    }
                }
                true
            });
        }
        Ok(out)
    }

    /// Iterate refs under a prefix. `include_broken` admits broken and
    /// dangling entries and skips object validity checks.
    pub fn iter_in(&self, prefix: &str, include_broken: bool) -> Result<RefIter, RefError> {
        Ok(RefIter {
            items: self.merged_refs("", prefix, include_broken)?.into_iter(),
        })
    }

    fn do_for_each<F>(
        &self,
        submodule: &str,
        base: &str,
        trim: usize,
        include_broken: bool,
        mut f: F,
    ) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        for entry in self.merged_refs(submodule, base, include_broken)? {
            let name: &[u8] = entry.name.as_bstr().as_ref();
            let trimmed = name[trim.min(name.len())..].as_bstr();
            if let ControlFlow::Break(()) = f(trimmed, &entry) {
                break;
            }
        }
        Ok(())
    }

    /// Visit every live ref in name order.
    pub fn for_each_ref<F>(&self, f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        self.do_for_each("", "", 0, false, f)
    }

    /// Visit refs under a prefix; the prefix is trimmed from the name the
    /// callback sees.
    pub fn for_each_ref_in<F>(&self, prefix: &str, f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        self.do_for_each("", prefix, prefix.len(), false, f)
    }

    pub fn for_each_ref_in_submodule<F>(
        &self,
        submodule: &str,
        prefix: &str,
        f: F,
    ) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        self.do_for_each(submodule, prefix, prefix.len(), false, f)
    }

    pub fn for_each_branch_ref<F>(&self, f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        self.for_each_ref_in("refs/heads/", f)
    }

    pub fn for_each_tag_ref<F>(&self, f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        self.for_each_ref_in("refs/tags/", f)
    }

    pub fn for_each_remote_ref<F>(&self, f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        self.for_each_ref_in("refs/remotes/", f)
    }

    /// Like `for_each_ref`, but admits broken refs and skips object checks.
    pub fn for_each_rawref<F>(&self, f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        self.do_for_each("", "", 0, true, f)
    }

    /// Visit `HEAD` if it resolves.
    pub fn head_ref<F>(&self, mut f: F) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        if let Ok(resolved) = self.resolve("HEAD", true) {
            let entry = RefEntry {
                name: crate::name::RefName::new_unchecked("HEAD"),
                target: resolved.target,
                peeled: None,
                flags: resolved.flags,
            };
            f(b"HEAD".as_bstr(), &entry);
        }
        Ok(())
    }

    /// Glob-filtered iteration, layered above the plain iterator.
    ///
    /// A pattern without glob specials gets an implied `/*` appended; a
    /// pattern outside `refs/` is anchored there unless a prefix is given.
    /// The callback sees full (untrimmed) names.
    pub fn for_each_glob_ref<F>(
        &self,
        pattern: &str,
        prefix: Option<&str>,
        mut f: F,
    ) -> Result<(), RefError>
    where
        F: FnMut(&BStr, &RefEntry) -> ControlFlow<()>,
    {
        let mut real_pattern = String::new();
        match prefix {
            None if !pattern.starts_with("refs/") => real_pattern.push_str("refs/"),
            Some(p) => real_pattern.push_str(p),
            None => {}
        }
        real_pattern.push_str(pattern);

        if !rgit_utils::wildmatch::has_glob_specials(pattern.as_bytes().as_bstr()) {
            // Append implied '/' '*' if not present
            if !real_pattern.ends_with('/') {
                real_pattern.push('/');
            }
            real_pattern.push('*');
        }

        self.do_for_each("", "", 0, false, |name, entry| {
            if rgit_utils::wildmatch::wildmatch(
                real_pattern.as_bytes().as_bstr(),
                entry.name.as_bstr(),
            ) {
                f(name, entry)
            } else {
                ControlFlow::Continue(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgit_hash::ObjectId;
    use std::fs;

    fn oid(byte: char) -> ObjectId {
        ObjectId::from_hex(byte.to_string().repeat(40)).unwrap()
    }

    fn write_ref_file(git_dir: &std::path::Path, name: &str, content: &str) {
        let path = git_dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn collect_names(store: &FilesRefStore) -> Vec<String> {
        let mut names = Vec::new();
        store
            .for_each_ref(|name, _| {
                names.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        names
    }

    #[test]
    fn merge_is_sorted_and_occludes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("packed-refs"),
            format!(
                "{} refs/heads/main\n{} refs/tags/old\n",
                oid('a'),
                oid('b')
            ),
        )
        .unwrap();
        write_ref_file(dir.path(), "refs/heads/main", &format!("{}\n", oid('c')));
        write_ref_file(dir.path(), "refs/heads/topic", &format!("{}\n", oid('d')));
        let store = FilesRefStore::new(dir.path());

        let entries: Vec<RefEntry> = store.iter_in("", false).unwrap().collect();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["refs/heads/main", "refs/heads/topic", "refs/tags/old"]);
        // Loose value occluded the packed one
        assert_eq!(entries[0].target, oid('c'));
        assert!(!entries[0].flags.contains(RefFlags::PACKED));
        assert!(entries[2].flags.contains(RefFlags::PACKED));
    }

    #[test]
    fn prefix_trims_callback_name() {
        let dir = tempfile::tempdir().unwrap();
        write_ref_file(dir.path(), "refs/heads/main", &format!("{}\n", oid('a')));
        write_ref_file(dir.path(), "refs/tags/v1", &format!("{}\n", oid('b')));
        let store = FilesRefStore::new(dir.path());

        let mut names = Vec::new();
        store
            .for_each_ref_in("refs/heads/", |name, _| {
                names.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(names, ["main"]);
    }

    #[test]
    fn early_break_stops_iteration() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["a", "b", "c"] {
            write_ref_file(
                dir.path(),
                &format!("refs/heads/{n}"),
                &format!("{}\n", oid('a')),
            );
        }
        let store = FilesRefStore::new(dir.path());

        let mut seen = 0;
        store
            .for_each_ref(|_, _| {
                seen += 1;
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn broken_hidden_unless_rawref() {
        let dir = tempfile::tempdir().unwrap();
        write_ref_file(dir.path(), "refs/heads/ok", &format!("{}\n", oid('a')));
        write_ref_file(dir.path(), "refs/heads/junk", "garbage\n");
        write_ref_file(dir.path(), "refs/heads/dangling", "ref: refs/heads/unborn\n");
        let store = FilesRefStore::new(dir.path());

        assert_eq!(collect_names(&store), ["refs/heads/ok"]);

        let mut raw = Vec::new();
        store
            .for_each_rawref(|name, _| {
                raw.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(raw, ["refs/heads/dangling", "refs/heads/junk", "refs/heads/ok"]);
    }

    #[test]
    fn unknown_objects_skipped_with_warning() {
        use crate::odb::{MemoryObjectDatabase, ObjectKind};
        use std::rc::Rc;

        let dir = tempfile::tempdir().unwrap();
        write_ref_file(dir.path(), "refs/heads/known", &format!("{}\n", oid('a')));
        write_ref_file(dir.path(), "refs/heads/unknown", &format!("{}\n", oid('b')));

        let mut odb = MemoryObjectDatabase::new();
        odb.insert(oid('a'), ObjectKind::Commit, vec![]);
        let mut store = FilesRefStore::new(dir.path());
        store.set_odb(Rc::new(odb));

        assert_eq!(collect_names(&store), ["refs/heads/known"]);
        let warnings = store.take_warnings();
        assert_eq!(
            warnings,
            vec![RefWarning::UnknownObject {
                name: "refs/heads/unknown".into(),
                target: oid('b'),
            }]
        );
    }

    #[test]
    fn extra_refs_yield_only_unclaimed_names() {
        let dir = tempfile::tempdir().unwrap();
        write_ref_file(dir.path(), "refs/heads/main", &format!("{}\n", oid('a')));
        let store = FilesRefStore::new(dir.path());
        store.add_extra_ref("refs/heads/main", oid('b'), RefFlags::empty());
        store.add_extra_ref("refs/extra/one", oid('c'), RefFlags::empty());

        let entries: Vec<RefEntry> = store.iter_in("", false).unwrap().collect();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["refs/extra/one", "refs/heads/main"]);
        // The on-disk value wins over the extra one
        assert_eq!(entries[1].target, oid('a'));

        store.clear_extra_refs();
        assert_eq!(collect_names(&store), ["refs/heads/main"]);
    }

    #[test]
    fn glob_filtering() {
        let dir = tempfile::tempdir().unwrap();
        write_ref_file(dir.path(), "refs/heads/main", &format!("{}\n", oid('a')));
        write_ref_file(dir.path(), "refs/heads/topic", &format!("{}\n", oid('b')));
        write_ref_file(dir.path(), "refs/tags/v1.0", &format!("{}\n", oid('c')));
        let store = FilesRefStore::new(dir.path());

        let mut names = Vec::new();
        store
            .for_each_glob_ref("heads/t*", None, |name, _| {
                names.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(names, ["refs/heads/topic"]);

        // A literal pattern grows an implied "/*"
        let mut names = Vec::new();
        store
            .for_each_glob_ref("refs/heads", None, |name, _| {
                names.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(names, ["refs/heads/main", "refs/heads/topic"]);
    }

    #[test]
    fn namespace_conveniences_trim_their_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write_ref_file(dir.path(), "refs/heads/main", &format!("{}\n", oid('a')));
        write_ref_file(dir.path(), "refs/tags/v1.0", &format!("{}\n", oid('b')));
        write_ref_file(
            dir.path(),
            "refs/remotes/origin/main",
            &format!("{}\n", oid('c')),
        );
        let store = FilesRefStore::new(dir.path());

        let mut branches = Vec::new();
        store
            .for_each_branch_ref(|name, _| {
                branches.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(branches, ["main"]);

        let mut tags = Vec::new();
        store
            .for_each_tag_ref(|name, _| {
                tags.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(tags, ["v1.0"]);

        let mut remotes = Vec::new();
        store
            .for_each_remote_ref(|name, _| {
                remotes.push(name.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(remotes, ["origin/main"]);
    }

    #[test]
    fn head_ref_visits_resolved_head() {
        let dir = tempfile::tempdir().unwrap();
        write_ref_file(dir.path(), "HEAD", "ref: refs/heads/main\n");
        write_ref_file(dir.path(), "refs/heads/main", &format!("{}\n", oid('a')));
        let store = FilesRefStore::new(dir.path());

        let mut seen = None;
        store
            .head_ref(|name, entry| {
                seen = Some((name.to_string(), entry.target, entry.flags));
                ControlFlow::Continue(())
            })
            .unwrap();
        let (name, target, flags) = seen.unwrap();
        assert_eq!(name, "HEAD");
        assert_eq!(target, oid('a'));
        assert!(flags.contains(RefFlags::SYMBOLIC));
    }

    #[test]
    fn peel_uses_iteration_cursor() {
        use crate::odb::{MemoryObjectDatabase, ObjectKind};
        use std::rc::Rc;

        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("packed-refs"),
            format!(
                "# pack-refs with: peeled \n{} refs/tags/v1\n^{}\n",
                oid('a'),
                oid('b')
            ),
        )
        .unwrap();

        let mut odb = MemoryObjectDatabase::new();
        odb.insert(oid('b'), ObjectKind::Commit, vec![]);
        odb.insert_tag(oid('a'), oid('b'));
        let mut store = FilesRefStore::new(dir.path());
        store.set_odb(Rc::new(odb));

        let mut peeled = None;
        store
            .for_each_ref(|_, entry| {
                peeled = Some(store.peel_ref("refs/tags/v1", Some(entry)).unwrap());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(peeled, Some(oid('b')));

        // Without the cursor the packed annotation still answers
        assert_eq!(store.peel_ref("refs/tags/v1", None).unwrap(), oid('b'));
    }
}

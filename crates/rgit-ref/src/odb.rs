use rgit_hash::ObjectId;

/// The object kinds the reference store distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

/// The object-database collaborator.
///
/// The store needs very little from the object side: existence checks while
/// iterating, the kind of a would-be branch target, and annotated-tag
/// peeling when the packed-refs file carries no peel annotation.
pub trait ObjectDatabase {
    /// Is the object present in the database?
    fn has_object(&self, oid: &ObjectId) -> bool;

    /// Read an object's kind and payload, or `None` if absent.
    fn read_object(&self, oid: &ObjectId) -> Option<(ObjectKind, Vec<u8>)>;

    /// Peel an annotated-tag chain to the first non-tag object.
    ///
    /// Returns `None` if `oid` is absent, is not a tag, or the chain is
    /// broken.
    fn deref_tag(&self, oid: &ObjectId) -> Option<ObjectId>;
}

/// A small in-memory object database, for tests and tooling.
#[derive(Default)]
pub struct MemoryObjectDatabase {
    objects: std::collections::HashMap<ObjectId, (ObjectKind, Vec<u8>)>,
    tag_targets: std::collections::HashMap<ObjectId, ObjectId>,
}

impl MemoryObjectDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with the given id, kind and payload.
    pub fn insert(&mut self, oid: ObjectId, kind: ObjectKind, data: Vec<u8>) {
        self.objects.insert(oid, (kind, data));
    }

    /// Insert an annotated tag pointing at `target`.
    pub fn insert_tag(&mut self, oid: ObjectId, target: ObjectId) {
        self.objects.insert(oid, (ObjectKind::Tag, Vec::new()));
        self.tag_targets.insert(oid, target);
    }
}

impl ObjectDatabase for MemoryObjectDatabase {
    fn has_object(&self, oid: &ObjectId) -> bool {
        self.objects.contains_key(oid)
    }

    fn read_object(&self, oid: &ObjectId) -> Option<(ObjectKind, Vec<u8>)> {
        self.objects.get(oid).cloned()
    }

    fn deref_tag(&self, oid: &ObjectId) -> Option<ObjectId> {
        let mut cur = *oid;
        // Bounded walk: tag chains do not get deep in practice
        for _ in 0..10 {
            match self.objects.get(&cur)? {
                (ObjectKind::Tag, _) => cur = *self.tag_targets.get(&cur)?,
                _ => return Some(cur),
            }
        }
        None
    }
}

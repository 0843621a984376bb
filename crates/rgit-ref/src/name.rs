use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::error::RefError;

bitflags::bitflags! {
    /// Relaxations accepted by `check_refname_format`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CheckRefFlags: u8 {
        /// Accept single-component names such as `HEAD`.
        const ALLOW_ONELEVEL = 1 << 0;
        /// Accept exactly one `*` as a whole component.
        const REFSPEC_PATTERN = 1 << 1;
        /// Accept components with a leading dot.
        const DOT_COMPONENT = 1 << 2;
    }
}

/// Return true iff `ch` is not allowed in reference names.
fn bad_ref_byte(ch: u8) -> bool {
    ch <= b' ' || ch == 0x7f || matches!(ch, b'~' | b'^' | b':' | b'\\' | b'*' | b'?' | b'[')
}

/// Read one name component from the front of `refname`. Returns its length,
/// or the rule it violates.
fn check_refname_component(refname: &[u8], flags: CheckRefFlags) -> Result<usize, &'static str> {
    let mut last = 0u8;
    let mut len = 0;
    while len < refname.len() {
        let ch = refname[len];
        if ch == b'/' {
            break;
        }
        if bad_ref_byte(ch) {
            return Err("disallowed character");
        }
        if last == b'.' && ch == b'.' {
            return Err("contains '..'");
        }
        if last == b'@' && ch == b'{' {
            return Err("contains '@{'");
        }
        last = ch;
        len += 1;
    }
    if len == 0 {
        return Err("empty component");
    }
    if refname[0] == b'.' {
        if !flags.contains(CheckRefFlags::DOT_COMPONENT) {
            return Err("component starts with '.'");
        }
        if refname.len() == 1 {
            return Err("component is '.'");
        }
    }
    if len >= 5 && &refname[len - 5..len] == b".lock" {
        return Err("component ends with '.lock'");
    }
    Ok(len)
}

/// Syntactic check of a reference name.
///
/// A name is a slash-separated sequence of components. A component must be
/// non-empty and must not: begin with `.` (unless `DOT_COMPONENT`), contain
/// `..`, contain bytes <= 0x20 or `0x7f`, contain `~ ^ : \ * ? [`, contain
/// `@{`, or end with `.lock`. The whole name must not end with `/` or `.`
/// and needs at least two components unless `ALLOW_ONELEVEL`. With
/// `REFSPEC_PATTERN`, exactly one `*` is accepted as a whole component.
pub fn check_refname_format(refname: &BStr, flags: CheckRefFlags) -> Result<(), RefError> {
    let mut flags = flags;
    let full = refname;
    let mut rest: &[u8] = refname.as_ref();
    let mut component_count = 0;
    let invalid = |reason| RefError::InvalidName {
        name: full.to_string(),
        reason,
    };

    loop {
        let len = match check_refname_component(rest, flags) {
            Ok(len) => len,
            Err(reason) => {
                // Accept one wildcard as a full component in pattern mode
                if flags.contains(CheckRefFlags::REFSPEC_PATTERN)
                    && rest.first() == Some(&b'*')
                    && (rest.len() == 1 || rest[1] == b'/')
                {
                    flags.remove(CheckRefFlags::REFSPEC_PATTERN);
                    1
                } else {
                    return Err(invalid(reason));
                }
            }
        };
        component_count += 1;
        if len == rest.len() {
            break;
        }
        rest = &rest[len + 1..];
    }

    if rest[rest.len() - 1] == b'.' {
        return Err(invalid("ends with '.'"));
    }
    if !flags.contains(CheckRefFlags::ALLOW_ONELEVEL) && component_count < 2 {
        return Err(invalid("one-level name"));
    }
    Ok(())
}

/// A validated reference name.
///
/// `new` applies the resolver's grammar (single-component names like `HEAD`
/// are accepted); use `new_with` for other rule sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

impl RefName {
    pub fn new(name: impl Into<BString>) -> Result<Self, RefError> {
        Self::new_with(name, CheckRefFlags::ALLOW_ONELEVEL)
    }

    pub fn new_with(name: impl Into<BString>, flags: CheckRefFlags) -> Result<Self, RefError> {
        let name = name.into();
        check_refname_format(name.as_bstr(), flags)?;
        Ok(Self(name))
    }

    /// Create without validation (for internal use with known-good names).
    pub(crate) fn new_unchecked(name: impl Into<BString>) -> Self {
        Self(name.into())
    }

    /// Is this under `refs/heads/`?
    pub fn is_branch(&self) -> bool {
        self.0.starts_with(b"refs/heads/")
    }

    /// Is this under `refs/tags/`?
    pub fn is_tag(&self) -> bool {
        self.0.starts_with(b"refs/tags/")
    }

    /// Is this under `refs/remotes/`?
    pub fn is_remote(&self) -> bool {
        self.0.starts_with(b"refs/remotes/")
    }

    /// Get the raw bytes of this ref name.
    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// Get as a string slice (ref names are valid UTF-8 in practice).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("<invalid-utf8>")
    }

    /// Get the inner BString.
    pub fn into_inner(self) -> BString {
        self.0
    }
}

impl AsRef<BStr> for RefName {
    fn as_ref(&self) -> &BStr {
        self.0.as_bstr()
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shorthand expansion rules, in decreasing priority: a shorthand `x`
/// may stand for `x`, `refs/x`, `refs/tags/x`, `refs/heads/x`,
/// `refs/remotes/x`, or `refs/remotes/x/HEAD`. Each rule is a
/// (prefix, suffix) pair around the shorthand.
pub(crate) const REF_REV_PARSE_RULES: [(&str, &str); 6] = [
    ("", ""),
    ("refs/", ""),
    ("refs/tags/", ""),
    ("refs/heads/", ""),
    ("refs/remotes/", ""),
    ("refs/remotes/", "/HEAD"),
];

/// Substitute a shorthand into rule `idx`.
pub(crate) fn expand_rule(idx: usize, short: &str) -> String {
    let (prefix, suffix) = REF_REV_PARSE_RULES[idx];
    format!("{prefix}{short}{suffix}")
}

/// Extract the shorthand a full name would have under rule `idx`, if any.
pub(crate) fn match_rule(idx: usize, full: &str) -> Option<&str> {
    let (prefix, suffix) = REF_REV_PARSE_RULES[idx];
    let short = full.strip_prefix(prefix)?.strip_suffix(suffix)?;
    (!short.is_empty()).then_some(short)
}

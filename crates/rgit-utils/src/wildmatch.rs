use bstr::BStr;

/// Check if a byte is a glob special character.
fn is_glob_special(c: u8) -> bool {
    matches!(c, b'*' | b'?' | b'[' | b'\\')
}

/// Does the pattern contain any glob special characters?
///
/// Used by callers that append an implied `/*` to literal patterns.
pub fn has_glob_specials(pattern: &BStr) -> bool {
    pattern.iter().any(|&b| is_glob_special(b))
}

/// Shell-style glob match of `pattern` against `text`.
///
/// Semantics follow `fnmatch(3)` with no flags, which is what reference
/// patterns use: `*` and `?` match any byte including `/`, `[...]` supports
/// ranges, `!`/`^` negation and the common named classes, and `\` escapes
/// the next byte. A malformed bracket expression matches nothing.
pub fn wildmatch(pattern: &BStr, text: &BStr) -> bool {
    dowild(pattern.as_ref(), text.as_ref())
}

fn dowild(mut p: &[u8], mut t: &[u8]) -> bool {
    while let Some(&pc) = p.first() {
        match pc {
            b'*' => {
                // Collapse consecutive stars
                while p.first() == Some(&b'*') {
                    p = &p[1..];
                }
                if p.is_empty() {
                    return true;
                }
                loop {
                    if dowild(p, t) {
                        return true;
                    }
                    if t.is_empty() {
                        return false;
                    }
                    t = &t[1..];
                }
            }
            b'?' => {
                if t.is_empty() {
                    return false;
                }
                p = &p[1..];
                t = &t[1..];
            }
            b'[' => {
                let Some(&tc) = t.first() else {
                    return false;
                };
                let Some((matched, rest)) = match_bracket(&p[1..], tc) else {
                    return false;
                };
                if !matched {
                    return false;
                }
                p = rest;
                t = &t[1..];
            }
            b'\\' => {
                p = &p[1..];
                let Some(&lit) = p.first() else {
                    return false;
                };
                if t.first() != Some(&lit) {
                    return false;
                }
                p = &p[1..];
                t = &t[1..];
            }
            _ => {
                if t.first() != Some(&pc) {
                    return false;
                }
                p = &p[1..];
                t = &t[1..];
            }
        }
    }
    t.is_empty()
}

/// Match one bracket expression (the leading `[` already consumed) against
/// `tc`. Returns the match result and the pattern remainder after `]`, or
/// `None` if the expression is unterminated.
fn match_bracket(p: &[u8], tc: u8) -> Option<(bool, &[u8])> {
    let mut i = 0;
    let negated = match p.first() {
        Some(&b'!') | Some(&b'^') => {
            i = 1;
            true
        }
        _ => false,
    };

    let mut matched = false;
    let mut prev: Option<u8> = None;
    let mut first = true;
    loop {
        let &c = p.get(i)?;
        if c == b']' && !first {
            i += 1;
            break;
        }
        first = false;
        if c == b'[' && p.get(i + 1) == Some(&b':') {
            // Named class: [:alpha:] etc.
            let rest = &p[i + 2..];
            let end = rest.windows(2).position(|w| w == b":]")?;
            if match_named_class(&rest[..end], tc) {
                matched = true;
            }
            prev = None;
            i += 2 + end + 2;
        } else if c == b'-' && prev.is_some() && p.get(i + 1).is_some_and(|&n| n != b']') {
            let mut hi_idx = i + 1;
            if p[hi_idx] == b'\\' {
                hi_idx += 1;
            }
            let &hi = p.get(hi_idx)?;
            let lo = prev.take().unwrap();
            if lo <= tc && tc <= hi {
                matched = true;
            }
            i = hi_idx + 1;
        } else {
            let lit = if c == b'\\' {
                i += 1;
                *p.get(i)?
            } else {
                c
            };
            if lit == tc {
                matched = true;
            }
            prev = Some(lit);
            i += 1;
        }
    }
    Some((matched != negated, &p[i..]))
}

fn match_named_class(name: &[u8], tc: u8) -> bool {
    match name {
        b"alnum" => tc.is_ascii_alphanumeric(),
        b"alpha" => tc.is_ascii_alphabetic(),
        b"digit" => tc.is_ascii_digit(),
        b"upper" => tc.is_ascii_uppercase(),
        b"lower" => tc.is_ascii_lowercase(),
        b"space" => tc.is_ascii_whitespace(),
        b"xdigit" => tc.is_ascii_hexdigit(),
        b"punct" => tc.is_ascii_punctuation(),
        b"cntrl" => tc.is_ascii_control(),
        b"graph" => tc.is_ascii_graphic(),
        b"print" => tc.is_ascii_graphic() || tc == b' ',
        _ => false,
    }
}

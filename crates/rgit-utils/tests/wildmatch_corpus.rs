//! Glob matcher corpus, focused on the shapes reference patterns take.

use bstr::BStr;
use rgit_utils::wildmatch::{has_glob_specials, wildmatch};

/// Helper: assert that the pattern matches.
fn wm(pattern: &[u8], text: &[u8]) {
    assert!(
        wildmatch(BStr::new(pattern), BStr::new(text)),
        "expected match: pattern={:?}, text={:?}",
        String::from_utf8_lossy(pattern),
        String::from_utf8_lossy(text),
    );
}

/// Helper: assert that the pattern does NOT match.
fn wn(pattern: &[u8], text: &[u8]) {
    assert!(
        !wildmatch(BStr::new(pattern), BStr::new(text)),
        "expected no match: pattern={:?}, text={:?}",
        String::from_utf8_lossy(pattern),
        String::from_utf8_lossy(text),
    );
}

#[test]
fn corpus_literal() {
    wm(b"foo", b"foo");
    wn(b"foo", b"bar");
    wm(b"", b"");
    wn(b"foo", b"");
}

#[test]
fn corpus_star() {
    wm(b"*", b"foo");
    wm(b"*", b"");
    wm(b"f*", b"foo");
    wm(b"*o", b"foo");
    wm(b"f*o", b"foo");
    wm(b"f*o", b"fo");
    wn(b"f*o", b"f");
    wm(b"**", b"anything");
    wm(b"a*b*c", b"abc");
    wm(b"a*b*c", b"aXbXXc");
    wn(b"a*b*c", b"aXcXb");
}

#[test]
fn corpus_question() {
    wm(b"?", b"a");
    wn(b"?", b"");
    wm(b"??", b"ab");
    wn(b"??", b"a");
    wm(b"?o?", b"foo");
}

#[test]
fn corpus_bracket() {
    wm(b"[abc]", b"a");
    wm(b"[abc]", b"b");
    wm(b"[abc]", b"c");
    wn(b"[abc]", b"d");
    wm(b"[a-c]", b"b");
    wn(b"[a-c]", b"d");
    wm(b"[!abc]", b"d");
    wn(b"[!abc]", b"a");
    wm(b"[]ab]", b"]");
    wm(b"[]ab]", b"a");
}

#[test]
fn corpus_named_classes() {
    wm(b"[[:digit:]]", b"7");
    wn(b"[[:digit:]]", b"x");
    wm(b"[[:alpha:]]x", b"ax");
    wm(b"v[[:xdigit:]]", b"vf");
}

#[test]
fn corpus_escape() {
    wm(b"\\*", b"*");
    wn(b"\\*", b"x");
    wm(b"\\?", b"?");
    wm(b"a\\[b", b"a[b");
}

#[test]
fn corpus_ref_patterns() {
    // Patterns as the ref iterator builds them: '*' is expected to cross '/'
    wm(b"refs/heads/*", b"refs/heads/main");
    wm(b"refs/heads/*", b"refs/heads/feature/sub");
    wn(b"refs/heads/*", b"refs/tags/v1.0");
    wm(b"refs/tags/v[0-9].*", b"refs/tags/v1.0");
    wm(b"refs/remotes/*/HEAD", b"refs/remotes/origin/HEAD");
    wn(b"refs/remotes/*/HEAD", b"refs/remotes/origin/main");
}

#[test]
fn glob_specials_probe() {
    assert!(has_glob_specials(BStr::new(b"refs/heads/*")));
    assert!(has_glob_specials(BStr::new(b"a?c")));
    assert!(has_glob_specials(BStr::new(b"a[bc]d")));
    assert!(has_glob_specials(BStr::new(b"a\\d")));
    assert!(!has_glob_specials(BStr::new(b"refs/heads/topic")));
}

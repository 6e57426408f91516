//! Strips anti-tampering constructs.
//!
//! Two rewrites: integrity conditionals that probe a constructor's string
//! form through `['test'](...['toString']())` are deleted whole, and
//! dynamically built regular expressions are replaced with an inert
//! always-matching pattern. Everything else passes through untouched.

use crate::deobfuscate::scan;

/// Applies both rewrites once over the buffer. The result is stable under
/// re-application.
pub fn strip(src: &str) -> (String, usize) {
    let (code, traps) = strip_integrity_traps(src);
    let (code, regexes) = inert_dynamic_regexes(&code);
    (code, traps + regexes)
}

fn strip_integrity_traps(src: &str) -> (String, usize) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut removed = 0;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => {
                let end = scan::string_end(src, i).unwrap_or(b.len());
                out.push_str(&src[i..end]);
                i = end;
            }
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                let end = scan::skip_trivia(src, i);
                out.push_str(&src[i..end]);
                i = end;
            }
            b'i' if scan::word_at(src, i, "if") => match trap_at(src, i) {
                Some(end) => {
                    removed += 1;
                    i = end;
                }
                None => {
                    out.push_str("if");
                    i += 2;
                }
            },
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, removed)
}

/// Matches `if (COND) {BLOCK}` where COND carries the constructor probe.
fn trap_at(src: &str, i: usize) -> Option<usize> {
    let b = src.as_bytes();
    let mut j = scan::skip_trivia(src, i + 2);
    if b.get(j) != Some(&b'(') {
        return None;
    }
    let cond_end = scan::matching(src, j)?;
    let cond = &src[j + 1..cond_end];
    if !has_member_call(cond, "test") || !has_member_call(cond, "toString") {
        return None;
    }
    j = scan::skip_trivia(src, cond_end + 1);
    if b.get(j) != Some(&b'{') {
        return None;
    }
    Some(scan::matching(src, j)? + 1)
}

/// True when `text` contains `['name'](` with either quote style.
fn has_member_call(text: &str, name: &str) -> bool {
    for quote in ['\'', '"'] {
        let needle = format!("[{q}{name}{q}](", q = quote);
        if text.contains(&needle) {
            return true;
        }
    }
    false
}

fn inert_dynamic_regexes(src: &str) -> (String, usize) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut replaced = 0;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => {
                let end = scan::string_end(src, i).unwrap_or(b.len());
                out.push_str(&src[i..end]);
                i = end;
            }
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                let end = scan::skip_trivia(src, i);
                out.push_str(&src[i..end]);
                i = end;
            }
            b'n' if scan::word_at(src, i, "new") => {
                let j = scan::skip_trivia(src, i + 3);
                if scan::word_at(src, j, "RegExp") {
                    let k = scan::skip_trivia(src, j + "RegExp".len());
                    if b.get(k) == Some(&b'(') {
                        if let Some(args_end) = scan::matching(src, k) {
                            out.push_str("/./");
                            replaced += 1;
                            i = args_end + 1;
                            continue;
                        }
                    }
                }
                out.push_str("new");
                i += 3;
            }
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, replaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_constructor_probe_conditional() {
        let src = "before(); if (guard['test'](ctor['toString']())) { trap(); } after();";
        let (out, n) = strip(src);
        assert_eq!(n, 1);
        assert!(!out.contains("trap"));
        assert!(out.contains("before();"));
        assert!(out.contains("after();"));
    }

    #[test]
    fn double_quoted_probe_matches_too() {
        let src = "if (g[\"test\"](c[\"toString\"]())) { t(); }";
        let (out, n) = strip(src);
        assert_eq!(n, 1);
        assert!(!out.contains("t();"));
    }

    #[test]
    fn ordinary_conditionals_survive() {
        let src = "if (x > 1) { run(); }";
        let (out, n) = strip(src);
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }

    #[test]
    fn dynamic_regex_becomes_inert() {
        let src = "var re = new RegExp('\\\\w+', 'g'); re.test(s);";
        let (out, n) = strip(src);
        assert_eq!(out, "var re = /./; re.test(s);");
        assert_eq!(n, 1);
    }

    #[test]
    fn regex_inside_string_is_untouched() {
        let src = "var s = 'new RegExp(x)';";
        let (out, n) = strip(src);
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }

    #[test]
    fn idempotent() {
        let src = "if (a['test'](b['toString']())) { x(); } var r = new RegExp(p);";
        let (once, _) = strip(src);
        let (twice, n) = strip(&once);
        assert_eq!(once, twice);
        assert_eq!(n, 0);
    }
}

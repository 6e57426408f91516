//! Deletes proxy wrapper definitions.
//!
//! A proxy is a function whose whole body is one `return` forwarding into a
//! decoder, an indirection layer with no other purpose. Definitions are
//! deleted; call sites that referenced them are left alone, the goal here is
//! removing scaffolding, not rebinding calls.

use crate::deobfuscate::scan;

/// Removes every `function NAME(..) { return DEC(..); }` where `DEC` is one
/// of `decoder_names`, rescanning until a full pass deletes nothing.
pub fn strip(src: &str, decoder_names: &[String]) -> (String, usize) {
    if decoder_names.is_empty() {
        return (src.to_string(), 0);
    }
    let mut code = src.to_string();
    let mut removed = 0;
    loop {
        let (next, changed) = strip_once(&code, decoder_names, &mut removed);
        if !changed {
            return (code, removed);
        }
        code = next;
    }
}

fn strip_once(src: &str, decoder_names: &[String], removed: &mut usize) -> (String, bool) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut changed = false;
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
            b'f' if scan::word_at(src, i, "function") => match proxy_at(src, i, decoder_names) {
                Some(end) => {
                    *removed += 1;
                    changed = true;
                    i = end;
                }
                None => {
                    out.push_str("function");
                    i += "function".len();
                }
            },
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, changed)
}

/// Matches a whole proxy definition at `i` and returns the index past it.
fn proxy_at(src: &str, i: usize, decoder_names: &[String]) -> Option<usize> {
    let b = src.as_bytes();
    let mut j = scan::skip_trivia(src, i + "function".len());
    let (_, after_name) = scan::ident_at(src, j)?;
    j = scan::skip_trivia(src, after_name);
    if b.get(j) != Some(&b'(') {
        return None;
    }
    let params_end = scan::matching(src, j)?;
    j = scan::skip_trivia(src, params_end + 1);
    if b.get(j) != Some(&b'{') {
        return None;
    }
    let body_end = scan::matching(src, j)?;

    // Body must be exactly `return DEC(args);`
    let mut k = scan::skip_trivia(src, j + 1);
    if !scan::word_at(src, k, "return") {
        return None;
    }
    k = scan::skip_trivia(src, k + "return".len());
    let (callee, after_callee) = scan::ident_at(src, k)?;
    if !decoder_names.iter().any(|n| n == callee) {
        return None;
    }
    k = scan::skip_trivia(src, after_callee);
    if b.get(k) != Some(&b'(') {
        return None;
    }
    let args_end = scan::matching(src, k)?;
    k = scan::skip_trivia(src, args_end + 1);
    if b.get(k) == Some(&b';') {
        k = scan::skip_trivia(src, k + 1);
    }
    if k != body_end {
        return None;
    }
    Some(body_end + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["lookup".to_string(), "cipher".to_string()]
    }

    #[test]
    fn removes_forwarders_into_decoders() {
        let src = "function bd(a, b, c) { return lookup(c - 0x31d, b); } keep();";
        let (out, n) = strip(src, &names());
        assert_eq!(out.trim(), "keep();");
        assert_eq!(n, 1);
    }

    #[test]
    fn multi_statement_bodies_survive() {
        let src = "function real(a) { log(a); return lookup(a); }";
        let (out, n) = strip(src, &names());
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }

    #[test]
    fn forwarders_into_unknown_functions_survive() {
        let src = "function f(a) { return other(a); }";
        let (out, n) = strip(src, &names());
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }

    #[test]
    fn call_sites_are_not_rewritten() {
        let src = "function p(a) { return cipher(a, 'k'); } var v = p(1);";
        let (out, _) = strip(src, &names());
        assert!(out.contains("var v = p(1);"));
        assert!(!out.contains("function p"));
    }

    #[test]
    fn terminates_on_adversarial_nesting() {
        // Many adjacent proxies, each deletion re-triggering a scan.
        let mut src = String::new();
        for k in 0..50 {
            src.push_str(&format!(
                "function p{k}(a) {{ return lookup(a + {k}); }}\n"
            ));
        }
        let (out, n) = strip(&src, &names());
        assert_eq!(n, 50);
        assert!(!out.contains("function"));
    }

    #[test]
    fn no_decoder_names_is_a_no_op() {
        let src = "function p(a) { return lookup(a); }";
        let (out, n) = strip(src, &[]);
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }
}

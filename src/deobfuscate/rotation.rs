//! Removes the pool rotation construct.
//!
//! Obfuscators emit a self-invoking function that spins a guarded retry loop,
//! shuffling the pool with `push(shift())` inside a try/catch until a checksum
//! expression settles. Once the pool has been captured statically that whole
//! block is dead weight, so it is deleted. The in-memory pool is never
//! touched here.

use crate::deobfuscate::scan;

/// Deletes every matching self-invocation. Buffers without one pass through
/// unchanged.
pub fn strip(src: &str) -> (String, usize) {
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
            b'(' => match rotation_at(src, i) {
                Some(end) => {
                    removed += 1;
                    i = end;
                }
                None => {
                    i = scan::copy_char(src, i, &mut out);
                }
            },
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, removed)
}

/// Matches a rotation self-invocation starting at the opening parenthesis.
/// Both `(function(..){..}(args));` and `(function(..){..})(args);` shapes
/// are accepted. Returns the index one past the construct (including a
/// trailing semicolon, if present).
fn rotation_at(src: &str, i: usize) -> Option<usize> {
    let b = src.as_bytes();
    let mut j = scan::skip_trivia(src, i + 1);
    if !scan::word_at(src, j, "function") {
        return None;
    }
    j = scan::skip_trivia(src, j + "function".len());
    // An optional function expression name.
    if let Some((_, after)) = scan::ident_at(src, j) {
        j = scan::skip_trivia(src, after);
    }
    if b.get(j) != Some(&b'(') {
        return None;
    }
    let params_end = scan::matching(src, j)?;
    j = scan::skip_trivia(src, params_end + 1);
    if b.get(j) != Some(&b'{') {
        return None;
    }
    let body_end = scan::matching(src, j)?;
    if !is_rotation_body(&src[j + 1..body_end]) {
        return None;
    }
    let mut k = scan::skip_trivia(src, body_end + 1);
    if b.get(k) == Some(&b'(') {
        // (function(){...}(args));
        let args_end = scan::matching(src, k)?;
        k = scan::skip_trivia(src, args_end + 1);
        if b.get(k) != Some(&b')') {
            return None;
        }
        k += 1;
    } else if b.get(k) == Some(&b')') {
        // (function(){...})(args);
        k = scan::skip_trivia(src, k + 1);
        if b.get(k) != Some(&b'(') {
            return None;
        }
        k = scan::matching(src, k)? + 1;
    } else {
        return None;
    }
    let after = scan::skip_ws(src, k);
    if src.as_bytes().get(after) == Some(&b';') {
        return Some(after + 1);
    }
    Some(k)
}

/// The body must carry the retry loop shape: a `while` loop and a
/// try/catch inside it.
fn is_rotation_body(body: &str) -> bool {
    scan::contains_word(body, "while")
        && scan::contains_word(body, "try")
        && scan::contains_word(body, "catch")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROTATOR: &str = "(function (arr, target) { \
        var attempts = 0; \
        while (attempts < 100) { \
            try { \
                var probe = arr.length * target; \
                if (probe === target) break; \
                arr.push(arr.shift()); \
            } catch (e) { \
                arr.push(arr.shift()); \
            } \
            attempts++; \
        } \
    }(gather, 500));";

    #[test]
    fn removes_trailing_call_form() {
        let src = format!("var keep = 1; {} var also = 2;", ROTATOR);
        let (out, n) = strip(&src);
        assert_eq!(n, 1);
        assert!(!out.contains("attempts"));
        assert!(out.contains("var keep = 1;"));
        assert!(out.contains("var also = 2;"));
    }

    #[test]
    fn removes_wrapped_call_form() {
        let src = "(function (a) { while (1) { try { a(); } catch (e) {} } })(x);";
        let (out, n) = strip(src);
        assert_eq!(n, 1);
        assert_eq!(out.trim(), "");
    }

    #[test]
    fn plain_iife_without_retry_loop_survives() {
        let src = "(function () { run(); }());";
        let (out, n) = strip(src);
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }

    #[test]
    fn while_inside_string_does_not_match() {
        let src = "(function () { log('while try catch'); }());";
        let (out, n) = strip(src);
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }

    #[test]
    fn no_match_passes_through_byte_identical() {
        let src = "let a = (1 + 2);\nfunction f() {}\n";
        let (out, n) = strip(src);
        assert_eq!(out, src);
        assert_eq!(n, 0);
    }
}

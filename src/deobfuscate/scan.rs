//! Shared lexical helpers for the rewrite passes.
//!
//! The passes locate constructs by scanning text directly instead of building
//! a syntax tree. These helpers keep that scanning honest: string literals and
//! comments are skipped as opaque units, and bracket matching tracks nesting
//! depth, so a brace inside a string can never terminate a function body.

/// Returns true for bytes that can start an identifier.
pub fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

/// Returns true for bytes that can continue an identifier.
pub fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Reads the identifier starting at `i`, if any.
/// Returns the identifier text and the index one past its end.
pub fn ident_at(src: &str, i: usize) -> Option<(&str, usize)> {
    let b = src.as_bytes();
    if i >= b.len() || !is_ident_start(b[i]) {
        return None;
    }
    let mut end = i + 1;
    while end < b.len() && is_ident_char(b[end]) {
        end += 1;
    }
    Some((&src[i..end], end))
}

/// Checks whether the exact word `word` sits at `i` with identifier
/// boundaries on both sides.
pub fn word_at(src: &str, i: usize, word: &str) -> bool {
    let b = src.as_bytes();
    if i + word.len() > b.len() || &src[i..i + word.len()] != word {
        return false;
    }
    if i > 0 && is_ident_char(b[i - 1]) {
        return false;
    }
    let end = i + word.len();
    end >= b.len() || !is_ident_char(b[end])
}

/// Advances past ASCII whitespace.
pub fn skip_ws(src: &str, mut i: usize) -> usize {
    let b = src.as_bytes();
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Advances past whitespace and `//` / `/* */` comments.
pub fn skip_trivia(src: &str, mut i: usize) -> usize {
    let b = src.as_bytes();
    loop {
        i = skip_ws(src, i);
        if i + 1 < b.len() && b[i] == b'/' && b[i + 1] == b'/' {
            while i < b.len() && b[i] != b'\n' {
                i += 1;
            }
        } else if i + 1 < b.len() && b[i] == b'/' && b[i + 1] == b'*' {
            match src[i + 2..].find("*/") {
                Some(off) => i += 2 + off + 2,
                None => return b.len(),
            }
        } else {
            return i;
        }
    }
}

/// Given `i` pointing at an opening quote byte, returns the index one past
/// the closing quote. Backslash escapes are honored. `None` if the literal
/// never terminates.
pub fn string_end(src: &str, i: usize) -> Option<usize> {
    let b = src.as_bytes();
    let quote = b[i];
    let mut j = i + 1;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            c if c == quote => return Some(j + 1),
            _ => j += 1,
        }
    }
    None
}

/// Given `i` pointing at an opening bracket (`(`, `[` or `{`), returns the
/// index of the matching closer. Strings and comments inside the span are
/// skipped, and nesting of the same bracket kind is depth-tracked.
pub fn matching(src: &str, i: usize) -> Option<usize> {
    let b = src.as_bytes();
    let open = b[i];
    let close = match open {
        b'(' => b')',
        b'[' => b']',
        b'{' => b'}',
        _ => return None,
    };
    let mut depth = 0usize;
    let mut j = i;
    while j < b.len() {
        let c = b[j];
        if c == b'\'' || c == b'"' {
            j = string_end(src, j)?;
            continue;
        }
        if c == b'/' && j + 1 < b.len() && (b[j + 1] == b'/' || b[j + 1] == b'*') {
            j = skip_trivia(src, j);
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(j);
            }
        }
        j += 1;
    }
    None
}

/// Copies the single character at byte offset `i` to `out` and returns the
/// offset of the next character.
pub fn copy_char(src: &str, i: usize, out: &mut String) -> usize {
    let ch = src[i..].chars().next().unwrap_or('\u{FFFD}');
    out.push(ch);
    i + ch.len_utf8()
}

/// True when the span contains `word` as a standalone identifier outside of
/// strings and comments.
pub fn contains_word(src: &str, word: &str) -> bool {
    let b = src.as_bytes();
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => match string_end(src, i) {
                Some(end) => i = end,
                None => return false,
            },
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                i = skip_trivia(src, i);
            }
            c if is_ident_start(c) => {
                let (ident, end) = ident_at(src, i).unwrap_or(("", i + 1));
                if ident == word {
                    return true;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_end_honors_escapes() {
        let src = r#"'a\'b' rest"#;
        assert_eq!(string_end(src, 0), Some(6));
    }

    #[test]
    fn matching_skips_strings_and_nesting() {
        let src = "{ a = '}'; { b } }";
        assert_eq!(matching(src, 0), Some(src.len() - 1));
    }

    #[test]
    fn matching_unterminated_is_none() {
        assert_eq!(matching("( a ( b )", 0), None);
    }

    #[test]
    fn word_boundaries() {
        assert!(word_at("while (x)", 0, "while"));
        assert!(!word_at("awhile (x)", 1, "while"));
        assert!(!word_at("whiles", 0, "while"));
    }

    #[test]
    fn contains_word_ignores_strings() {
        assert!(!contains_word("var s = 'while';", "while"));
        assert!(contains_word("while (1) {}", "while"));
    }
}

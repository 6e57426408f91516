//! Decodes hex-escaped string literals.
//!
//! Obfuscators hide string constants as `'\x68\x65\x6c\x6c\x6f'` or as
//! concatenation chains of such literals. Both forms are rewritten to plain
//! literals here. A literal qualifies only when its entire content is
//! two-digit hex escapes; anything else in it, including other escape kinds,
//! leaves the literal untouched.

use crate::deobfuscate::scan;

/// A recognized hex-only literal.
struct HexLit {
    quote: char,
    /// Index one past the closing quote.
    end: usize,
    decoded: String,
}

fn hex_literal_at(src: &str, i: usize) -> Option<HexLit> {
    let b = src.as_bytes();
    let quote = b[i];
    let end = scan::string_end(src, i)?;
    let content = &src[i + 1..end - 1];
    if content.is_empty() || content.len() % 4 != 0 {
        return None;
    }
    let cb = content.as_bytes();
    let mut decoded = String::with_capacity(content.len() / 4);
    for chunk in cb.chunks(4) {
        if chunk[0] != b'\\' || chunk[1] != b'x' {
            return None;
        }
        let hi = (chunk[2] as char).to_digit(16)?;
        let lo = (chunk[3] as char).to_digit(16)?;
        decoded.push((hi * 16 + lo) as u8 as char);
    }
    Some(HexLit {
        quote: quote as char,
        end,
        decoded,
    })
}

/// Escapes decoded text so it stays a valid literal under `quote`.
/// Escaping runs once over the final text, never per chain part, so an
/// escape-relevant byte at a part boundary cannot be corrupted.
fn escape_for(quote: char, decoded: &str) -> String {
    let mut out = String::with_capacity(decoded.len());
    for ch in decoded.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

fn quoted(quote: char, content: &str) -> String {
    let mut lit = String::with_capacity(content.len() + 2);
    lit.push(quote);
    lit.push_str(content);
    lit.push(quote);
    lit
}

/// Rewrites every standalone hex-only literal to its decoded form.
pub fn decode_hex_literals(src: &str) -> (String, usize) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut rewrites = 0;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => match hex_literal_at(src, i) {
                Some(lit) => {
                    out.push_str(&quoted(lit.quote, &escape_for(lit.quote, &lit.decoded)));
                    rewrites += 1;
                    i = lit.end;
                }
                None => {
                    let end = scan::string_end(src, i).unwrap_or(b.len());
                    out.push_str(&src[i..end]);
                    i = end;
                }
            },
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                let end = scan::skip_trivia(src, i);
                out.push_str(&src[i..end]);
                i = end;
            }
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, rewrites)
}

/// Folds chains of two or more hex-only literals joined by `+` into one
/// decoded literal, re-applied until no chain remains.
pub fn fold_hex_chains(src: &str) -> (String, usize) {
    let mut code = src.to_string();
    let mut rewrites = 0;
    loop {
        let (next, changed) = fold_once(&code, &mut rewrites);
        if !changed {
            return (code, rewrites);
        }
        code = next;
    }
}

fn fold_once(src: &str, rewrites: &mut usize) -> (String, bool) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut changed = false;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => {
                if let Some((folded, end, parts)) = chain_at(src, i) {
                    if parts >= 2 {
                        out.push_str(&folded);
                        *rewrites += 1;
                        changed = true;
                        i = end;
                        continue;
                    }
                }
                let end = scan::string_end(src, i).unwrap_or(b.len());
                out.push_str(&src[i..end]);
                i = end;
            }
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                let end = scan::skip_trivia(src, i);
                out.push_str(&src[i..end]);
                i = end;
            }
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, changed)
}

/// Reads the maximal chain of `+`-joined hex-only literals starting at `i`.
/// Returns the replacement literal, the index past the last chain part, and
/// the number of parts consumed.
fn chain_at(src: &str, i: usize) -> Option<(String, usize, usize)> {
    let first = hex_literal_at(src, i)?;
    let quote = first.quote;
    let mut decoded = first.decoded;
    let mut end = first.end;
    let mut parts = 1;
    loop {
        let mut j = scan::skip_ws(src, end);
        if src.as_bytes().get(j) != Some(&b'+') {
            break;
        }
        j = scan::skip_ws(src, j + 1);
        match src.as_bytes().get(j) {
            Some(b'\'') | Some(b'"') => match hex_literal_at(src, j) {
                Some(lit) => {
                    decoded.push_str(&lit.decoded);
                    end = lit.end;
                    parts += 1;
                }
                None => break,
            },
            _ => break,
        }
    }
    Some((quoted(quote, &escape_for(quote, &decoded)), end, parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Undoes the escaping applied by the pass, for round-trip checks.
    fn unescape(content: &str) -> String {
        let mut out = String::new();
        let mut chars = content.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => {}
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn every_byte_round_trips() {
        for byte in 0u32..=255 {
            let input = format!("var a = '\\x{:02x}';", byte);
            let (output, rewrites) = decode_hex_literals(&input);
            assert_eq!(rewrites, 1, "byte {:#x}", byte);
            let start = output.find('\'').unwrap();
            let end = scan::string_end(&output, start).unwrap();
            let decoded = unescape(&output[start + 1..end - 1]);
            let expected: String = char::from_u32(byte).unwrap().to_string();
            assert_eq!(decoded, expected, "byte {:#x}", byte);
        }
    }

    #[test]
    fn decodes_simple_literal() {
        let (out, n) = decode_hex_literals("var a = '\\x68\\x69';");
        assert_eq!(out, "var a = 'hi';");
        assert_eq!(n, 1);
    }

    #[test]
    fn respects_quote_style() {
        let (out, _) = decode_hex_literals("var a = \"\\x22\\x27\";");
        assert_eq!(out, "var a = \"\\\"'\";");
    }

    #[test]
    fn mixed_content_is_left_alone() {
        let input = "var a = '\\x68 plain';";
        let (out, n) = decode_hex_literals(input);
        assert_eq!(out, input);
        assert_eq!(n, 0);
    }

    #[test]
    fn non_hex_escape_means_no_match() {
        let input = "var a = '\\x68\\n\\x69';";
        let (out, n) = decode_hex_literals(input);
        assert_eq!(out, input);
        assert_eq!(n, 0);
    }

    #[test]
    fn folds_chains_of_various_lengths() {
        for n in [2usize, 3, 10] {
            let parts: Vec<String> = (0..n).map(|k| format!("'\\x{:02x}'", 0x61 + k)).collect();
            let input = format!("var a = {};", parts.join("+"));
            let (out, folds) = fold_hex_chains(&input);
            let expected: String = (0..n)
                .map(|k| char::from_u32(0x61 + k as u32).unwrap())
                .collect();
            assert_eq!(out, format!("var a = '{}';", expected));
            assert_eq!(folds, 1);
        }
    }

    #[test]
    fn chain_with_whitespace_folds() {
        let (out, _) = fold_hex_chains("x = '\\x68' + '\\x69'  +  '\\x21';");
        assert_eq!(out, "x = 'hi!';");
    }

    #[test]
    fn chain_stops_at_plain_literal() {
        let (out, _) = fold_hex_chains("x = '\\x68'+'\\x69'+'plain';");
        assert_eq!(out, "x = 'hi'+'plain';");
    }

    #[test]
    fn single_literal_is_not_a_chain() {
        let input = "x = '\\x68';";
        let (out, folds) = fold_hex_chains(input);
        assert_eq!(out, input);
        assert_eq!(folds, 0);
    }

    #[test]
    fn escape_spans_part_boundary() {
        // 0x5c decodes to a backslash that lands directly before the 'n'
        // from the next part; the fold must still escape it as one unit.
        let (out, _) = fold_hex_chains("x = '\\x5c'+'\\x6e';");
        assert_eq!(out, "x = '\\\\n';");
    }

    #[test]
    fn idempotent() {
        let input = "var a = '\\x68'+'\\x65'; var b = '\\x77';";
        let (once, _) = fold_hex_chains(input);
        let (once, _) = decode_hex_literals(&once);
        let (twice, n1) = fold_hex_chains(&once);
        let (twice, n2) = decode_hex_literals(&twice);
        assert_eq!(once, twice);
        assert_eq!(n1 + n2, 0);
    }
}

//! Token scanner for the JavaScript subset the sandbox evaluates.

use crate::sandbox::EvalError;

/// A single token. Keywords are delivered as [Tok::Ident] and recognized by
/// the parser, which keeps the scanner small.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Num(f64),
    Str(String),
    Punct(&'static str),
    Eof,
}

impl std::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "{}", s),
            Self::Num(n) => write!(f, "{}", n),
            Self::Str(_) => write!(f, "string literal"),
            Self::Punct(p) => write!(f, "{}", p),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Multi-character punctuators, longest first so maximal munch works.
const PUNCTS: &[&str] = &[
    ">>>=", "===", "!==", ">>>", "<<=", ">>=", "&&", "||", "==", "!=", "<=", ">=", "<<", ">>",
    "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "{", "}", "(", ")", "[", "]",
    ";", ",", ".", "<", ">", "+", "-", "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=",
];

/// Scans `src` into a token stream, `Eof`-terminated.
pub fn tokenize(src: &str) -> Result<Vec<Tok>, EvalError> {
    let b = src.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    'outer: while i < b.len() {
        let c = b[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        // Comments
        if c == b'/' && i + 1 < b.len() && b[i + 1] == b'/' {
            while i < b.len() && b[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == b'/' && i + 1 < b.len() && b[i + 1] == b'*' {
            match src[i + 2..].find("*/") {
                Some(off) => {
                    i += 2 + off + 2;
                    continue;
                }
                None => return Err(EvalError::Parse("unterminated comment".into())),
            }
        }
        // Identifiers
        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let start = i;
            while i < b.len() && (b[i].is_ascii_alphanumeric() || b[i] == b'_' || b[i] == b'$') {
                i += 1;
            }
            toks.push(Tok::Ident(src[start..i].to_string()));
            continue;
        }
        // Numbers
        if c.is_ascii_digit() || (c == b'.' && i + 1 < b.len() && b[i + 1].is_ascii_digit()) {
            let (n, end) = scan_number(src, i)?;
            toks.push(Tok::Num(n));
            i = end;
            continue;
        }
        // Strings
        if c == b'\'' || c == b'"' {
            let (s, end) = scan_string(src, i)?;
            toks.push(Tok::Str(s));
            i = end;
            continue;
        }
        // Punctuators
        for p in PUNCTS {
            if src[i..].starts_with(p) {
                toks.push(Tok::Punct(p));
                i += p.len();
                continue 'outer;
            }
        }
        return Err(EvalError::Parse(format!(
            "unexpected character {:?}",
            src[i..].chars().next().unwrap_or('\u{FFFD}')
        )));
    }
    toks.push(Tok::Eof);
    Ok(toks)
}

fn scan_number(src: &str, start: usize) -> Result<(f64, usize), EvalError> {
    let b = src.as_bytes();
    let mut i = start;
    // Hex literal
    if b[i] == b'0' && i + 1 < b.len() && (b[i + 1] == b'x' || b[i + 1] == b'X') {
        i += 2;
        let mut value = 0.0f64;
        let digits_start = i;
        while i < b.len() && b[i].is_ascii_hexdigit() {
            value = value * 16.0 + (b[i] as char).to_digit(16).unwrap_or(0) as f64;
            i += 1;
        }
        if i == digits_start {
            return Err(EvalError::Parse("malformed hex literal".into()));
        }
        return Ok((value, i));
    }
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    if i < b.len() && b[i] == b'.' {
        i += 1;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        let mut j = i + 1;
        if j < b.len() && (b[j] == b'+' || b[j] == b'-') {
            j += 1;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    src[start..i]
        .parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| EvalError::Parse(format!("malformed number {:?}", &src[start..i])))
}

fn scan_string(src: &str, start: usize) -> Result<(String, usize), EvalError> {
    let b = src.as_bytes();
    let quote = b[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < b.len() {
        match b[i] {
            c if c == quote => return Ok((out, i + 1)),
            b'\\' => {
                if i + 1 >= b.len() {
                    break;
                }
                let esc = b[i + 1];
                i += 2;
                match esc {
                    b'x' => {
                        let code = hex_digits(src, i, 2)
                            .ok_or_else(|| EvalError::Parse("malformed \\x escape".into()))?;
                        out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                        i += 2;
                    }
                    b'u' => {
                        let code = hex_digits(src, i, 4)
                            .ok_or_else(|| EvalError::Parse("malformed \\u escape".into()))?;
                        out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                        i += 4;
                    }
                    b'n' => out.push('\n'),
                    b'r' => out.push('\r'),
                    b't' => out.push('\t'),
                    b'b' => out.push('\u{8}'),
                    b'f' => out.push('\u{c}'),
                    b'v' => out.push('\u{b}'),
                    b'0' => out.push('\0'),
                    // Any other escaped character stands for itself.
                    _ => {
                        let ch = src[i - 1..].chars().next().unwrap_or('\u{FFFD}');
                        out.push(ch);
                        i = i - 1 + ch.len_utf8();
                    }
                }
            }
            c if c < 0x80 => {
                out.push(c as char);
                i += 1;
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('\u{FFFD}');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    Err(EvalError::Parse("unterminated string literal".into()))
}

fn hex_digits(src: &str, i: usize, count: usize) -> Option<u32> {
    let b = src.as_bytes();
    if i + count > b.len() {
        return None;
    }
    let mut value = 0u32;
    for k in 0..count {
        value = value * 16 + (b[i + k] as char).to_digit(16)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_hex_and_decimal_numbers() {
        let toks = tokenize("0x1f 12 3.5 1e3").unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Num(31.0),
                Tok::Num(12.0),
                Tok::Num(3.5),
                Tok::Num(1000.0),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn scans_string_escapes() {
        let toks = tokenize(r#"'\x41B\n\q'"#).unwrap();
        assert_eq!(toks[0], Tok::Str("AB\nq".to_string()));
    }

    #[test]
    fn maximal_munch_punctuators() {
        let toks = tokenize("a>>>b === c").unwrap();
        assert_eq!(toks[1], Tok::Punct(">>>"));
        assert_eq!(toks[3], Tok::Punct("==="));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize("'abc").is_err());
    }
}

//! Normalizes hexadecimal numeric expressions.
//!
//! Obfuscated control flow leans on parenthesized hex arithmetic like
//! `(0x10 + 0x5 * 0x2)`. Those groups are evaluated under the source
//! language's numeric semantics (all values are doubles, `/` divides
//! exactly) and replaced with the decimal result; afterwards every
//! remaining standalone hex literal becomes decimal. Anything that fails to
//! evaluate is left exactly as written.

use crate::deobfuscate::scan;
use crate::sandbox::interp::num_to_string;

/// Runs both rewrites: grouped arithmetic to a fixed point, then standalone
/// literals. Returns the rewritten buffer and the rewrite count.
pub fn normalize(src: &str) -> (String, usize) {
    let mut code = src.to_string();
    let mut rewrites = 0;
    loop {
        let (next, changed) = fold_groups_once(&code, &mut rewrites);
        code = next;
        if !changed {
            break;
        }
    }
    let (code, singles) = decimalize_hex_literals(&code);
    (code, rewrites + singles)
}

fn fold_groups_once(src: &str, rewrites: &mut usize) -> (String, bool) {
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
            b'(' => match scan::matching(src, i) {
                Some(close) => match eval_group(&src[i + 1..close]) {
                    Some(value) => {
                        out.push_str(&num_to_string(value));
                        *rewrites += 1;
                        changed = true;
                        i = close + 1;
                    }
                    None => {
                        i = scan::copy_char(src, i, &mut out);
                    }
                },
                None => {
                    i = scan::copy_char(src, i, &mut out);
                }
            },
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, changed)
}

#[derive(Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

/// Evaluates a group of two or more integer literals joined by `+ - * /`.
/// At least one literal must be hex; groups of plain decimals belong to the
/// input program and stay as written. Returns `None` for anything else.
fn eval_group(group: &str) -> Option<f64> {
    let b = group.as_bytes();
    let mut literals: Vec<f64> = Vec::new();
    let mut ops: Vec<Op> = Vec::new();
    let mut saw_hex = false;
    let mut i = 0;
    loop {
        i = scan::skip_ws(group, i);
        let (value, end, is_hex) = int_literal_at(group, i)?;
        saw_hex |= is_hex;
        literals.push(value);
        i = scan::skip_ws(group, end);
        if i >= b.len() {
            break;
        }
        let op = match b[i] {
            b'+' => Op::Add,
            b'-' => Op::Sub,
            b'*' => Op::Mul,
            b'/' => Op::Div,
            _ => return None,
        };
        ops.push(op);
        i += 1;
    }
    if literals.len() < 2 || !saw_hex {
        return None;
    }

    // Multiplicative operators bind first, then the additive pass runs
    // left to right.
    let mut terms: Vec<f64> = vec![literals[0]];
    let mut term_ops: Vec<Op> = Vec::new();
    for (op, value) in ops.iter().zip(literals[1..].iter()) {
        match op {
            Op::Mul => {
                let last = terms.last_mut()?;
                *last *= value;
            }
            Op::Div => {
                let last = terms.last_mut()?;
                *last /= value;
            }
            Op::Add | Op::Sub => {
                term_ops.push(*op);
                terms.push(*value);
            }
        }
    }
    let mut result = terms[0];
    for (op, term) in term_ops.iter().zip(terms[1..].iter()) {
        match op {
            Op::Add => result += term,
            Op::Sub => result -= term,
            _ => {}
        }
    }
    Some(result)
}

/// Reads a hex or decimal integer literal at `i`.
fn int_literal_at(src: &str, i: usize) -> Option<(f64, usize, bool)> {
    let b = src.as_bytes();
    if i >= b.len() || !b[i].is_ascii_digit() {
        return None;
    }
    if b[i] == b'0' && i + 1 < b.len() && (b[i + 1] == b'x' || b[i + 1] == b'X') {
        let mut j = i + 2;
        let mut value = 0.0f64;
        while j < b.len() && b[j].is_ascii_hexdigit() {
            value = value * 16.0 + (b[j] as char).to_digit(16)? as f64;
            j += 1;
        }
        if j == i + 2 || (j < b.len() && scan::is_ident_char(b[j])) {
            return None;
        }
        return Some((value, j, true));
    }
    let mut j = i;
    let mut value = 0.0f64;
    while j < b.len() && b[j].is_ascii_digit() {
        value = value * 10.0 + (b[j] - b'0') as f64;
        j += 1;
    }
    // A trailing `.`, exponent or identifier character means this is not a
    // plain integer literal.
    if j < b.len() && (b[j] == b'.' || scan::is_ident_char(b[j])) {
        return None;
    }
    Some((value, j, false))
}

fn decimalize_hex_literals(src: &str) -> (String, usize) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut rewrites = 0;
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
            b'0' if i + 1 < b.len()
                && (b[i + 1] == b'x' || b[i + 1] == b'X')
                && (i == 0 || !scan::is_ident_char(b[i - 1])) =>
            {
                let mut j = i + 2;
                while j < b.len() && b[j].is_ascii_hexdigit() {
                    j += 1;
                }
                let digits = &src[i + 2..j];
                let standalone = j > i + 2 && (j >= b.len() || !scan::is_ident_char(b[j]));
                match (standalone, u64::from_str_radix(digits, 16)) {
                    (true, Ok(value)) => {
                        out.push_str(&value.to_string());
                        rewrites += 1;
                        i = j;
                    }
                    _ => {
                        out.push_str(&src[i..j]);
                        i = j;
                    }
                }
            }
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, rewrites)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_grouped_hex_arithmetic() {
        let (out, _) = normalize("x = (0x10+0x05);");
        assert_eq!(out, "x = 21;");
    }

    #[test]
    fn decimalizes_standalone_literals() {
        let (out, _) = normalize("y = 0xFF;");
        assert_eq!(out, "y = 255;");
    }

    #[test]
    fn multiplication_binds_before_addition() {
        let (out, _) = normalize("x = (0x2+0x3*0x4);");
        assert_eq!(out, "x = 14;");
    }

    #[test]
    fn division_is_exact() {
        let (out, _) = normalize("x = (0x5/0x2);");
        assert_eq!(out, "x = 2.5;");
    }

    #[test]
    fn inner_groups_expose_outer_ones() {
        let (out, _) = normalize("x = ((0x1+0x2)*0x3);");
        assert_eq!(out, "x = 9;");
    }

    #[test]
    fn plain_decimal_groups_stay() {
        let input = "x = (1 + 2);";
        let (out, _) = normalize(input);
        assert_eq!(out, input);
    }

    #[test]
    fn groups_with_identifiers_stay() {
        let input = "x = (0x10 + n);";
        let (out, n) = normalize(input);
        assert_eq!(out, "x = (16 + n);");
        assert_eq!(n, 1);
    }

    #[test]
    fn hex_inside_strings_is_untouched() {
        let input = "s = '0xFF and (0x1+0x2)';";
        let (out, n) = normalize(input);
        assert_eq!(out, input);
        assert_eq!(n, 0);
    }

    #[test]
    fn negative_results_render_with_sign() {
        let (out, _) = normalize("x = (0x1-0x5);");
        assert_eq!(out, "x = -4;");
    }

    #[test]
    fn idempotent() {
        let (once, _) = normalize("x = (0x10+0x05) + 0xFF;");
        let (twice, n) = normalize(&once);
        assert_eq!(once, twice);
        assert_eq!(n, 0);
    }
}

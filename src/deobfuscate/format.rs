//! Best-effort readability formatting.
//!
//! Three purely textual touches: adjacent same-quote literals joined by `+`
//! collapse into one literal, statements packed onto one line get split
//! after their semicolons, and runs of blank lines shrink to a single one.
//! Nothing here re-validates syntax.

use crate::deobfuscate::scan;

/// Runs all three touches and returns the buffer plus a rewrite count.
pub fn tidy(src: &str) -> (String, usize) {
    let (code, folds) = fold_concatenations(src);
    let (code, breaks) = break_statements(&code);
    let (code, collapses) = collapse_blank_lines(&code);
    (code, folds + breaks + collapses)
}

/// Folds `'a' + 'b'` into `'ab'` (same quote style only), until stable.
pub fn fold_concatenations(src: &str) -> (String, usize) {
    let mut code = src.to_string();
    let mut folds = 0;
    loop {
        let (next, changed) = fold_once(&code, &mut folds);
        if !changed {
            return (code, folds);
        }
        code = next;
    }
}

fn fold_once(src: &str, folds: &mut usize) -> (String, bool) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut changed = false;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => {
                let quote = b[i];
                let end = match scan::string_end(src, i) {
                    Some(end) => end,
                    None => {
                        out.push_str(&src[i..]);
                        break;
                    }
                };
                // Greedily absorb `+ 'more'` sequences with the same quote.
                let mut content = src[i + 1..end - 1].to_string();
                let mut tail = end;
                let mut absorbed = false;
                loop {
                    let mut j = scan::skip_ws(src, tail);
                    if b.get(j) != Some(&b'+') {
                        break;
                    }
                    j = scan::skip_ws(src, j + 1);
                    if b.get(j) != Some(&quote) {
                        break;
                    }
                    match scan::string_end(src, j) {
                        Some(next_end) => {
                            content.push_str(&src[j + 1..next_end - 1]);
                            tail = next_end;
                            absorbed = true;
                        }
                        None => break,
                    }
                }
                if absorbed {
                    out.push(quote as char);
                    out.push_str(&content);
                    out.push(quote as char);
                    *folds += 1;
                    changed = true;
                } else {
                    out.push_str(&src[i..end]);
                }
                i = tail;
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

/// Inserts a line break after a semicolon directly followed by an
/// identifier-start character or an opening square bracket.
fn break_statements(src: &str) -> (String, usize) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len() + src.len() / 16);
    let mut breaks = 0;
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
            b';' => {
                out.push(';');
                i += 1;
                if i < b.len() && (scan::is_ident_start(b[i]) || b[i] == b'[') {
                    out.push('\n');
                    breaks += 1;
                }
            }
            _ => i = scan::copy_char(src, i, &mut out),
        }
    }
    (out, breaks)
}

/// Collapses any run of three or more newlines (blank lines may hold
/// spaces or tabs) down to one blank line.
fn collapse_blank_lines(src: &str) -> (String, usize) {
    let b = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut collapses = 0;
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'\n' {
            let start = i;
            let mut newlines = 0;
            let mut j = i;
            while j < b.len() {
                match b[j] {
                    b'\n' => {
                        newlines += 1;
                        j += 1;
                    }
                    b' ' | b'\t' | b'\r' => j += 1,
                    _ => break,
                }
            }
            // Trailing whitespace after the last newline belongs to the next
            // line's indentation; keep it out of the run.
            let mut run_end = j;
            while run_end > start && b[run_end - 1] != b'\n' {
                run_end -= 1;
            }
            if newlines >= 3 {
                out.push_str("\n\n");
                collapses += 1;
            } else {
                out.push_str(&src[start..run_end]);
            }
            i = run_end;
        } else {
            i = scan::copy_char(src, i, &mut out);
        }
    }
    (out, collapses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_same_quote_concatenation() {
        let (out, n) = fold_concatenations("var a = 'he' + 'llo';");
        assert_eq!(out, "var a = 'hello';");
        assert_eq!(n, 1);
    }

    #[test]
    fn folds_long_chains_in_one_sweep() {
        let (out, _) = fold_concatenations("x = 'a'+'b'+'c'+'d';");
        assert_eq!(out, "x = 'abcd';");
    }

    #[test]
    fn mixed_quotes_do_not_fold() {
        let input = "x = 'a' + \"b\";";
        let (out, n) = fold_concatenations(input);
        assert_eq!(out, input);
        assert_eq!(n, 0);
    }

    #[test]
    fn non_literal_operands_do_not_fold() {
        let input = "x = 'a' + b;";
        let (out, n) = fold_concatenations(input);
        assert_eq!(out, input);
        assert_eq!(n, 0);
    }

    #[test]
    fn folding_terminates_on_dense_input() {
        let mut src = String::from("x = ");
        for _ in 0..500 {
            src.push_str("'a'+");
        }
        src.push_str("'a';");
        let (out, _) = fold_concatenations(&src);
        assert_eq!(out, format!("x = '{}';", "a".repeat(501)));
    }

    #[test]
    fn breaks_after_packed_statements() {
        let (out, n) = break_statements("a();b();[1].map(f);");
        assert_eq!(out, "a();\nb();\n[1].map(f);");
        assert_eq!(n, 2);
    }

    #[test]
    fn no_break_before_whitespace_or_closers() {
        let input = "a(); b();}";
        let (out, n) = break_statements(input);
        assert_eq!(out, input);
        assert_eq!(n, 0);
    }

    #[test]
    fn semicolons_inside_strings_are_ignored() {
        let input = "var s = ';abc';";
        let (out, _) = break_statements(input);
        assert_eq!(out, input);
    }

    #[test]
    fn collapses_blank_line_runs() {
        let (out, n) = collapse_blank_lines("a\n\n\n\n\nb\n");
        assert_eq!(out, "a\n\nb\n");
        assert_eq!(n, 1);
    }

    #[test]
    fn keeps_single_blank_lines() {
        let input = "a\n\nb\n";
        let (out, n) = collapse_blank_lines(input);
        assert_eq!(out, input);
        assert_eq!(n, 0);
    }

    #[test]
    fn whitespace_only_lines_count_as_blank() {
        let (out, _) = collapse_blank_lines("a\n  \n\t\n  \nb");
        assert_eq!(out, "a\n\nb");
    }
}

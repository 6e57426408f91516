//! Recovers the obfuscator's string pool.
//!
//! The pool lives in a zero-parameter function whose body builds one array
//! literal of strings. The array literal's source text is cut out and
//! evaluated in the isolated context; the surrounding function is never
//! executed. The values reflect the array's declared order, before any
//! runtime rotation the target would have applied to it.

use tracing::debug;

use crate::deobfuscate::scan;
use crate::sandbox::{self, EvalError};

/// A recovered pool: the declaring function's name and the decoded entries.
pub struct Pool {
    pub fn_name: String,
    pub entries: Vec<String>,
}

/// Scans `src` for pool candidates and evaluates the first one that yields
/// an array of strings. `None` when no candidate evaluates; the caller
/// treats that as an empty pool and continues.
pub fn extract(src: &str, budget: u64) -> Result<Pool, EvalError> {
    let b = src.as_bytes();
    let mut i = 0;
    let mut last_error = EvalError::Reference("no string pool candidate found".into());
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => i = scan::string_end(src, i).unwrap_or(b.len()),
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                i = scan::skip_trivia(src, i);
            }
            b'f' if scan::word_at(src, i, "function") => {
                match candidate_at(src, i) {
                    Some(c) => {
                        match sandbox::eval_string_array(&src[c.array_start..=c.array_end], budget)
                        {
                            Ok(entries) => {
                                debug!(
                                    candidate = %c.name,
                                    entries = entries.len(),
                                    "string pool evaluated"
                                );
                                return Ok(Pool {
                                    fn_name: c.name,
                                    entries,
                                });
                            }
                            Err(e) => {
                                debug!(candidate = %c.name, error = %e, "pool candidate rejected");
                                last_error = e;
                                i = c.body_end + 1;
                            }
                        }
                    }
                    None => i += "function".len(),
                }
            }
            _ => i += 1,
        }
    }
    Err(last_error)
}

struct Candidate {
    name: String,
    array_start: usize,
    array_end: usize,
    body_end: usize,
}

/// Matches `function NAME() { ... [ ... ] ... }` at `i` and locates the
/// first array literal in the body.
fn candidate_at(src: &str, i: usize) -> Option<Candidate> {
    let b = src.as_bytes();
    let mut j = scan::skip_trivia(src, i + "function".len());
    let (name, after_name) = scan::ident_at(src, j)?;
    j = scan::skip_trivia(src, after_name);
    if b.get(j) != Some(&b'(') {
        return None;
    }
    let params_end = scan::matching(src, j)?;
    // Only zero-parameter functions can be pool holders.
    if scan::skip_trivia(src, j + 1) != params_end {
        return None;
    }
    j = scan::skip_trivia(src, params_end + 1);
    if b.get(j) != Some(&b'{') {
        return None;
    }
    let body_end = scan::matching(src, j)?;
    let array_start = find_array_start(src, j + 1, body_end)?;
    let array_end = scan::matching(src, array_start)?;
    Some(Candidate {
        name: name.to_string(),
        array_start,
        array_end,
        body_end,
    })
}

fn find_array_start(src: &str, from: usize, to: usize) -> Option<usize> {
    let b = src.as_bytes();
    let mut i = from;
    while i < to {
        match b[i] {
            b'\'' | b'"' => i = scan::string_end(src, i)?,
            b'/' if i + 1 < to && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                i = scan::skip_trivia(src, i);
            }
            b'[' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

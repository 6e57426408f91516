//! Locates and resolves the string decoder functions.
//!
//! The obfuscator emits two lookup helpers over the pool: a plain indexed
//! lookup and a keyed one that additionally runs a cipher-style transform
//! over the entry. Both follow the same lazy template: a named function that
//! redefines itself on first call and references its own name. That
//! self-reference is the structural signature used to find them.
//!
//! Resolution executes the two definitions in the isolated context, seeded
//! with the pool accessor and the builtin whitelist, and keeps the resulting
//! function values callable for the rest of the run. Call sites in the text
//! are not rewritten with the resolved values; only the wrapper definitions
//! around these decoders get deleted elsewhere.

use tracing::debug;

use crate::deobfuscate::scan;
use crate::sandbox::interp::{to_js_string, Value};
use crate::sandbox::{EvalError, Sandbox};

/// A located decoder definition.
#[derive(Debug, Clone)]
pub struct DecoderFn {
    pub name: String,
    /// The full `function NAME(...) {...}` source text.
    pub source: String,
}

/// Finds self-referencing function declarations, in declaration order.
/// The pool function redefines itself too, so it is excluded by name.
pub fn find_decoder_functions(src: &str, pool_fn: Option<&str>) -> Vec<DecoderFn> {
    let b = src.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => i = scan::string_end(src, i).unwrap_or(b.len()),
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                i = scan::skip_trivia(src, i);
            }
            b'f' if scan::word_at(src, i, "function") => match declaration_at(src, i) {
                Some((name, body_start, body_end)) => {
                    let body = &src[body_start..body_end];
                    if Some(name.as_str()) != pool_fn && is_self_referencing(body, &name) {
                        found.push(DecoderFn {
                            name,
                            source: src[i..=body_end].to_string(),
                        });
                    }
                    // Nested declarations belong to their parent template;
                    // resume after the whole body.
                    i = body_end + 1;
                }
                None => i += "function".len(),
            },
            _ => i += 1,
        }
    }
    found
}

/// Matches `function NAME(...) { ... }` at `i`; returns the name, the index
/// past the opening body brace, and the index of the closing brace.
fn declaration_at(src: &str, i: usize) -> Option<(String, usize, usize)> {
    let b = src.as_bytes();
    let mut j = scan::skip_trivia(src, i + "function".len());
    let (name, after_name) = scan::ident_at(src, j)?;
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
    Some((name.to_string(), j + 1, body_end))
}

/// The decoder template either reassigns its own name or returns it.
fn is_self_referencing(body: &str, name: &str) -> bool {
    let b = body.as_bytes();
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\'' | b'"' => match scan::string_end(body, i) {
                Some(end) => i = end,
                None => return false,
            },
            b'/' if i + 1 < b.len() && (b[i + 1] == b'/' || b[i + 1] == b'*') => {
                i = scan::skip_trivia(body, i);
            }
            c if scan::is_ident_start(c) => {
                let (ident, end) = match scan::ident_at(body, i) {
                    Some(v) => v,
                    None => return false,
                };
                if ident == name {
                    let j = scan::skip_trivia(body, end);
                    // `NAME = function ...` or `return NAME ...`, the two
                    // shapes the lazy template produces.
                    let before = body[..i].trim_end();
                    if before.ends_with("return") {
                        let at = before.len() - "return".len();
                        if at == 0 || !scan::is_ident_char(before.as_bytes()[at - 1]) {
                            return true;
                        }
                    }
                    if b.get(j) == Some(&b'=') && b.get(j + 1) != Some(&b'=') {
                        return true;
                    }
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    false
}

/// The resolved pair of lookup callables, backed by the loaded context.
pub struct DecoderSet {
    sandbox: Sandbox,
    plain_name: String,
    keyed_name: String,
}

impl DecoderSet {
    /// The plain decoder's name in the input program.
    pub fn plain_name(&self) -> &str {
        &self.plain_name
    }

    /// The keyed decoder's name in the input program.
    pub fn keyed_name(&self) -> &str {
        &self.keyed_name
    }

    /// Direct pool lookup by (possibly offset) index.
    pub fn plain(&self, index: f64) -> Result<String, EvalError> {
        self.invoke(&self.plain_name, &[Value::Num(index)])
    }

    /// Keyed lookup; the key drives the cipher transform over the entry.
    pub fn keyed(&self, index: f64, key: &str) -> Result<String, EvalError> {
        self.invoke(
            &self.keyed_name,
            &[Value::Num(index), Value::Str(key.to_string())],
        )
    }

    fn invoke(&self, name: &str, args: &[Value]) -> Result<String, EvalError> {
        let value = self.sandbox.call(name, args)?;
        match value {
            Value::Str(_) => Ok(to_js_string(&value)),
            other => Err(EvalError::Type(format!(
                "decoder returned {:?}, expected a string",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSet")
            .field("plain", &self.plain_name)
            .field("keyed", &self.keyed_name)
            .finish()
    }
}

/// Evaluates the first two located definitions against the pool. The first
/// is taken as the plain decoder and the second as the keyed one, matching
/// the emission order observed in the wild.
pub fn resolve(
    decoders: &[DecoderFn],
    pool: &[String],
    pool_fn: &str,
    budget: u64,
) -> Result<DecoderSet, EvalError> {
    let (plain, keyed) = match decoders {
        [] => {
            return Err(EvalError::Reference(
                "no decoder function definitions found".into(),
            ))
        }
        [single] => (single, single),
        [plain, keyed, ..] => (plain, keyed),
    };

    let sandbox = Sandbox::with_pool(pool, pool_fn, budget);
    let mut defs = plain.source.clone();
    if keyed.name != plain.name {
        defs.push('\n');
        defs.push_str(&keyed.source);
    }
    sandbox.load(&defs)?;
    debug!(plain = %plain.name, keyed = %keyed.name, "decoder definitions loaded");

    Ok(DecoderSet {
        sandbox,
        plain_name: plain.name.clone(),
        keyed_name: keyed.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL_FN: &str = "gather";

    fn pool() -> Vec<String> {
        vec![
            "hello".to_string(),
            "world".to_string(),
            "ZGF0YQ==".to_string(),
        ]
    }

    const PLAIN: &str = "function lookup(n, x) { \
        var t = gather(); \
        lookup = function (i, k) { i = i - 0x12c; var v = t[i]; return v; }; \
        return lookup(n, x); }";

    const KEYED: &str = "function cipher(n, x) { \
        cipher = function (i, k) { \
            var s = lookup(i, k); \
            var out = ''; \
            for (var j = 0; j < s.length; j++) { \
                out += String.fromCharCode(s.charCodeAt(j) ^ k.charCodeAt(j % k.length)); \
            } \
            return out; \
        }; \
        return cipher(n, x); }";

    #[test]
    fn finds_self_referencing_definitions_in_order() {
        let src = format!(
            "function helper(a) {{ return a + 1; }} {} {} function tail() {{ return 0; }}",
            PLAIN, KEYED
        );
        let found = find_decoder_functions(&src, Some(POOL_FN));
        let names: Vec<&str> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["lookup", "cipher"]);
    }

    #[test]
    fn pool_function_is_excluded() {
        let src = "function gather() { var p = ['x']; return gather = function () \
                   { return p; }, gather(); }";
        assert!(find_decoder_functions(src, Some(POOL_FN)).is_empty());
    }

    #[test]
    fn resolves_plain_lookup() {
        let found = find_decoder_functions(&format!("{} {}", PLAIN, KEYED), Some(POOL_FN));
        let set = resolve(&found, &pool(), POOL_FN, 200_000).unwrap();
        assert_eq!(set.plain(300.0).unwrap(), "hello");
        assert_eq!(set.plain(301.0).unwrap(), "world");
    }

    #[test]
    fn resolves_keyed_lookup_through_the_plain_one() {
        let found = find_decoder_functions(&format!("{} {}", PLAIN, KEYED), Some(POOL_FN));
        let set = resolve(&found, &pool(), POOL_FN, 200_000).unwrap();
        let key = "k";
        let expected: String = "hello"
            .chars()
            .map(|c| char::from_u32(c as u32 ^ 'k' as u32).unwrap())
            .collect();
        assert_eq!(set.keyed(300.0, key).unwrap(), expected);
    }

    #[test]
    fn out_of_range_index_is_a_type_error() {
        let found = find_decoder_functions(PLAIN, Some(POOL_FN));
        let set = resolve(&found, &pool(), POOL_FN, 200_000).unwrap();
        assert!(set.plain(9999.0).is_err());
    }

    #[test]
    fn missing_definitions_fail_resolution() {
        assert!(resolve(&[], &pool(), POOL_FN, 10_000).is_err());
    }
}

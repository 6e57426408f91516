//! Isolated evaluation of untrusted program fragments.
//!
//! Pool extraction and decoder resolution both need to execute pieces of the
//! input program to recover runtime values. The input is adversarial, so
//! those pieces run in a purpose-built evaluator instead of a host engine:
//! the global scope holds an explicit whitelist and nothing else, and every
//! evaluation carries a hard step budget. Exceeding the budget, failing to
//! parse, or touching anything outside the whitelist is a recoverable
//! [EvalError], never a crash.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

pub mod interp;
pub mod lexer;
pub mod parser;

use interp::{to_js_string, to_number, truthy, Env, Interp, Scope, Value};
use parser::{parse_expr, parse_program};

/// An evaluation failure inside the isolated context.
#[derive(Debug)]
pub enum EvalError {
    /// The fragment is outside the supported subset or malformed.
    Parse(String),

    /// The step budget ran out.
    Budget,

    /// A value was used in a way its type does not support.
    Type(String),

    /// An identifier was not found in the whitelisted environment.
    Reference(String),
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(m) => write!(f, "ParseError: {}", m),
            Self::Budget => write!(f, "BudgetError: evaluation step budget exhausted"),
            Self::Type(m) => write!(f, "TypeError: {}", m),
            Self::Reference(m) => write!(f, "ReferenceError: {}", m),
        }
    }
}

impl std::error::Error for EvalError {}

/// Evaluates an array-literal expression in a completely empty environment
/// and returns its elements as strings. Only literal, array, and string
/// construction can occur; any identifier reference fails.
pub fn eval_string_array(src: &str, budget: u64) -> Result<Vec<String>, EvalError> {
    let expr = parse_expr(src)?;
    let interp = Interp::new(budget);
    let env = Scope::root();
    let value = eval_expr_in(&interp, &expr, &env)?;
    match value {
        Value::Array(items) => {
            let items = items.borrow();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item {
                    Value::Str(s) => out.push(s.clone()),
                    other => {
                        return Err(EvalError::Type(format!(
                            "expected string array element, got {:?}",
                            other
                        )))
                    }
                }
            }
            Ok(out)
        }
        other => Err(EvalError::Type(format!("expected array, got {:?}", other))),
    }
}

fn eval_expr_in(interp: &Interp, expr: &parser::Expr, env: &Env) -> Result<Value, EvalError> {
    // Wrap the expression as a return so the public Interp surface stays
    // statement-based.
    let program = vec![parser::Stmt::Return(Some(expr.clone()))];
    let func = parser::FuncDef {
        params: Vec::new(),
        body: program,
    };
    let closure = Value::Func(Rc::new(interp::Closure {
        def: Rc::new(func),
        env: env.clone(),
        props: RefCell::new(HashMap::new()),
    }));
    interp.call(&closure, &[])
}

/// A loaded evaluation context holding the whitelisted globals and any
/// function definitions executed into it.
pub struct Sandbox {
    interp: Interp,
    global: Env,
}

impl Sandbox {
    /// Creates a context seeded with the string pool (exposed as a
    /// zero-argument accessor under `pool_fn`) and the builtin whitelist:
    /// `String`, `Math`, `Boolean`, `RegExp` and `decodeURIComponent`.
    pub fn with_pool(pool: &[String], pool_fn: &str, budget: u64) -> Self {
        let global = Scope::root();
        seed_builtins(&global);

        let pool: Vec<String> = pool.to_vec();
        let accessor: interp::NativeFn = Rc::new(move |_args| {
            let items: Vec<Value> = pool.iter().cloned().map(Value::Str).collect();
            Ok(Value::Array(Rc::new(RefCell::new(items))))
        });
        global.declare(pool_fn, Value::Native("pool", accessor));

        Self {
            interp: Interp::new(budget),
            global,
        }
    }

    /// Parses and executes `src` (function definitions and any top-level
    /// statements) in the context.
    pub fn load(&self, src: &str) -> Result<(), EvalError> {
        let program = parse_program(src)?;
        self.interp.reset_budget();
        self.interp.run(&program, &self.global)
    }

    /// Calls a function defined by a previous [Sandbox::load], with a fresh
    /// step budget.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let callee = lookup(&self.global, name)
            .ok_or_else(|| EvalError::Reference(format!("{} is not defined", name)))?;
        self.interp.reset_budget();
        self.interp.call(&callee, args)
    }
}

fn lookup(env: &Env, name: &str) -> Option<Value> {
    env.get(name)
}

fn object(props: Vec<(&str, Value)>) -> Value {
    let mut map = HashMap::new();
    for (k, v) in props {
        map.insert(k.to_string(), v);
    }
    Value::Object(Rc::new(RefCell::new(map)))
}

fn native(name: &'static str, f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static) -> Value {
    Value::Native(name, Rc::new(f))
}

fn seed_builtins(global: &Env) {
    global.declare("undefined", Value::Undefined);
    global.declare("NaN", Value::Num(f64::NAN));
    global.declare("Infinity", Value::Num(f64::INFINITY));

    global.declare(
        "String",
        object(vec![(
            "fromCharCode",
            native("fromCharCode", |args| {
                let mut out = String::new();
                for a in args {
                    let code = to_number(a) as i64;
                    // Code units wrap at 16 bits.
                    let unit = (code & 0xFFFF) as u32;
                    out.push(char::from_u32(unit).unwrap_or('\u{FFFD}'));
                }
                Ok(Value::Str(out))
            }),
        )]),
    );

    global.declare("Math", math_object());

    global.declare(
        "Boolean",
        native("Boolean", |args| {
            Ok(Value::Bool(
                args.first().map(truthy).unwrap_or(false),
            ))
        }),
    );

    // Pattern matching inside the context is inert: construction succeeds
    // and `test` always matches, mirroring how the dead-code pass neuters
    // dynamic patterns in the rewritten text.
    global.declare(
        "RegExp",
        native("RegExp", |args| {
            let source = args.first().map(to_js_string).unwrap_or_default();
            Ok(object(vec![
                ("source", Value::Str(source)),
                ("test", native("test", |_| Ok(Value::Bool(true)))),
            ]))
        }),
    );

    global.declare(
        "decodeURIComponent",
        native("decodeURIComponent", |args| {
            let input = args.first().map(to_js_string).unwrap_or_default();
            percent_decode(&input)
        }),
    );
}

/// Numeric constants and functions, the subset decoder routines reach for.
fn math_object() -> Value {
    use std::f64::consts::{E, LN_10, LN_2, LOG10_E, LOG2_E, PI, SQRT_2};

    /// Argument at index, defaulting to NaN as the host language does for
    /// missing arguments.
    macro_rules! get_arg {
        ($args:expr, $index:expr) => {
            $args.get($index).map(to_number).unwrap_or(f64::NAN)
        };
    }
    macro_rules! unary_fn {
        ($name:literal, $f:expr) => {
            (
                $name,
                native($name, move |args| Ok(Value::Num($f(get_arg!(args, 0))))),
            )
        };
    }

    object(vec![
        ("PI", Value::Num(PI)),
        ("E", Value::Num(E)),
        ("LN2", Value::Num(LN_2)),
        ("LN10", Value::Num(LN_10)),
        ("LOG2E", Value::Num(LOG2_E)),
        ("LOG10E", Value::Num(LOG10_E)),
        ("SQRT2", Value::Num(SQRT_2)),
        ("SQRT1_2", Value::Num(std::f64::consts::FRAC_1_SQRT_2)),
        unary_fn!("abs", f64::abs),
        unary_fn!("floor", f64::floor),
        unary_fn!("ceil", f64::ceil),
        unary_fn!("round", f64::round),
        unary_fn!("trunc", f64::trunc),
        unary_fn!("sqrt", f64::sqrt),
        unary_fn!("log", f64::ln),
        unary_fn!("exp", f64::exp),
        (
            "pow",
            native("pow", |args| {
                Ok(Value::Num(get_arg!(args, 0).powf(get_arg!(args, 1))))
            }),
        ),
        (
            "max",
            native("max", |args| {
                Ok(Value::Num(get_arg!(args, 0).max(get_arg!(args, 1))))
            }),
        ),
        (
            "min",
            native("min", |args| {
                Ok(Value::Num(get_arg!(args, 0).min(get_arg!(args, 1))))
            }),
        ),
    ])
}

/// Decodes `%HH` escape runs as UTF-8 byte sequences.
fn percent_decode(input: &str) -> Result<Value, EvalError> {
    let b = input.as_bytes();
    let mut bytes: Vec<u8> = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'%' {
            let hi = b.get(i + 1).and_then(|c| (*c as char).to_digit(16));
            let lo = b.get(i + 2).and_then(|c| (*c as char).to_digit(16));
            match (hi, lo) {
                (Some(hi), Some(lo)) => {
                    bytes.push((hi * 16 + lo) as u8);
                    i += 3;
                }
                _ => return Err(EvalError::Type("malformed percent escape".into())),
            }
        } else {
            let ch = input[i..].chars().next().unwrap_or('\u{FFFD}');
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            i += ch.len_utf8();
        }
    }
    match String::from_utf8(bytes) {
        Ok(s) => Ok(Value::Str(s)),
        Err(_) => Err(EvalError::Type("malformed UTF-8 in percent data".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_string_arrays_with_concatenation() {
        let pool = eval_string_array("['ab', 'c' + 'd', \"e\"]", 10_000).unwrap();
        assert_eq!(pool, vec!["ab", "cd", "e"]);
    }

    #[test]
    fn array_evaluation_cannot_reach_outside() {
        assert!(eval_string_array("[globalThis]", 10_000).is_err());
        assert!(eval_string_array("[process]", 10_000).is_err());
    }

    #[test]
    fn rejects_non_string_elements() {
        assert!(eval_string_array("['a', 1]", 10_000).is_err());
    }

    #[test]
    fn sandbox_runs_pool_backed_lookup() {
        let pool = vec!["alpha".to_string(), "beta".to_string()];
        let sandbox = Sandbox::with_pool(&pool, "g", 100_000);
        sandbox
            .load(
                "function h(a) { var t = g(); h = function (n) { return t[n - 0x64]; }; \
                 return h(a); }",
            )
            .unwrap();
        let v = sandbox.call("h", &[Value::Num(0x65 as f64)]).unwrap();
        assert!(matches!(v, Value::Str(s) if s == "beta"));
    }

    #[test]
    fn percent_decoding_round_trip() {
        let v = percent_decode("a%20b%C3%A9").unwrap();
        assert!(matches!(v, Value::Str(s) if s == "a b\u{e9}"));
    }

    #[test]
    fn math_builtins_compute() {
        let sandbox = Sandbox::with_pool(&[], "g", 10_000);
        sandbox
            .load("var out = Math.floor(Math.PI) + Math.max(1, 2);")
            .unwrap();
        let v = lookup(&sandbox.global, "out").unwrap();
        assert!(matches!(v, Value::Num(n) if n == 5.0));
    }
}

//! Tree-walking evaluator for the parsed subset.
//!
//! Every statement and expression evaluation ticks a shared step budget, so
//! a hostile fragment can spin a loop but cannot hold the pipeline hostage.
//! The global scope contains only what the caller seeded; there is no host
//! capability to reach.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::sandbox::parser::{BinOp, Expr, FuncDef, Prop, Stmt, UnOp};
use crate::sandbox::EvalError;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<HashMap<String, Value>>>),
    Func(Rc<Closure>),
    Native(&'static str, NativeFn),
}

pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>;

/// A user function value. The property map exists because obfuscated decoder
/// functions cache state on the function object itself.
pub struct Closure {
    pub def: Rc<FuncDef>,
    pub env: Env,
    pub props: RefCell<HashMap<String, Value>>,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Num(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Array(_) => write!(f, "[array]"),
            Self::Object(_) => write!(f, "[object]"),
            Self::Func(_) => write!(f, "[function]"),
            Self::Native(name, _) => write!(f, "[native {}]", name),
        }
    }
}

/// One lexical scope. Assignment walks the parent chain; an unresolved name
/// lands in the root scope, matching sloppy-mode behavior that obfuscated
/// fragments rely on.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Env>,
}

pub type Env = Rc<Scope>;

impl Scope {
    pub fn root() -> Env {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub fn declare(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn get(self: &Rc<Self>, name: &str) -> Option<Value> {
        let mut scope = self.clone();
        loop {
            if let Some(v) = scope.vars.borrow().get(name) {
                return Some(v.clone());
            }
            match &scope.parent {
                Some(p) => {
                    let next = p.clone();
                    scope = next;
                }
                None => return None,
            }
        }
    }

    pub fn set(self: &Rc<Self>, name: &str, value: Value) {
        let mut scope = self.clone();
        loop {
            if scope.vars.borrow().contains_key(name) {
                scope.vars.borrow_mut().insert(name.to_string(), value);
                return;
            }
            match &scope.parent {
                Some(p) => {
                    let next = p.clone();
                    scope = next;
                }
                None => {
                    scope.vars.borrow_mut().insert(name.to_string(), value);
                    return;
                }
            }
        }
    }
}

/// Statement completion.
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// The evaluator. Holds the remaining step budget; one instance is shared by
/// a load and all subsequent calls into the loaded functions.
pub struct Interp {
    budget: Cell<u64>,
    initial_budget: u64,
}

impl Interp {
    pub fn new(budget: u64) -> Self {
        Self {
            budget: Cell::new(budget),
            initial_budget: budget,
        }
    }

    /// Refills the budget, used before each re-entrant decoder call.
    pub fn reset_budget(&self) {
        self.budget.set(self.initial_budget);
    }

    fn tick(&self) -> Result<(), EvalError> {
        let left = self.budget.get();
        if left == 0 {
            return Err(EvalError::Budget);
        }
        self.budget.set(left - 1);
        Ok(())
    }

    /// Executes a program in `env`.
    pub fn run(&self, program: &[Stmt], env: &Env) -> Result<(), EvalError> {
        for stmt in program {
            if let Flow::Return(_) = self.exec(stmt, env)? {
                break;
            }
        }
        Ok(())
    }

    /// Invokes a function value with the given arguments.
    pub fn call(&self, callee: &Value, args: &[Value]) -> Result<Value, EvalError> {
        self.tick()?;
        match callee {
            Value::Native(_, f) => f(args),
            Value::Func(closure) => {
                let scope = Scope::child(&closure.env);
                for (k, param) in closure.def.params.iter().enumerate() {
                    scope.declare(param, args.get(k).cloned().unwrap_or(Value::Undefined));
                }
                for stmt in &closure.def.body {
                    if let Flow::Return(v) = self.exec(stmt, &scope)? {
                        return Ok(v);
                    }
                }
                Ok(Value::Undefined)
            }
            other => Err(EvalError::Type(format!("{:?} is not a function", other))),
        }
    }

    fn exec(&self, stmt: &Stmt, env: &Env) -> Result<Flow, EvalError> {
        self.tick()?;
        match stmt {
            Stmt::Empty => Ok(Flow::Normal),
            Stmt::Expr(e) => {
                self.eval(e, env)?;
                Ok(Flow::Normal)
            }
            Stmt::VarDecl(decls) => {
                for (name, init) in decls {
                    let value = match init {
                        Some(e) => self.eval(e, env)?,
                        None => Value::Undefined,
                    };
                    env.declare(name, value);
                }
                Ok(Flow::Normal)
            }
            Stmt::FuncDecl(name, def) => {
                env.declare(
                    name,
                    Value::Func(Rc::new(Closure {
                        def: def.clone(),
                        env: env.clone(),
                        props: RefCell::new(HashMap::new()),
                    })),
                );
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(v))
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    match self.exec(s, env)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then, other } => {
                if truthy(&self.eval(cond, env)?) {
                    self.exec(then, env)
                } else if let Some(other) = other {
                    self.exec(other, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while truthy(&self.eval(cond, env)?) {
                    self.tick()?;
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.exec(init, env)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !truthy(&self.eval(cond, env)?) {
                            break;
                        }
                    }
                    self.tick()?;
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, env)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    fn eval(&self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        self.tick()?;
        match expr {
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => env
                .get(name)
                .ok_or_else(|| EvalError::Reference(format!("{} is not defined", name))),
            Expr::Array(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for e in elems {
                    values.push(self.eval(e, env)?);
                }
                Ok(Value::Array(Rc::new(RefCell::new(values))))
            }
            Expr::Object(props) => {
                let mut map = HashMap::new();
                for (key, e) in props {
                    map.insert(key.clone(), self.eval(e, env)?);
                }
                Ok(Value::Object(Rc::new(RefCell::new(map))))
            }
            Expr::Func(def) => Ok(Value::Func(Rc::new(Closure {
                def: def.clone(),
                env: env.clone(),
                props: RefCell::new(HashMap::new()),
            }))),
            Expr::Member { obj, prop } => {
                let obj = self.eval(obj, env)?;
                let key = self.prop_key(prop, env)?;
                Ok(member_get(&obj, &key))
            }
            Expr::Call { callee, args } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for a in args {
                    arg_values.push(self.eval(a, env)?);
                }
                // Method calls dispatch through the receiver so string and
                // array builtins work without a prototype chain.
                if let Expr::Member { obj, prop } = &**callee {
                    let receiver = self.eval(obj, env)?;
                    let key = self.prop_key(prop, env)?;
                    let member = member_get(&receiver, &key);
                    return match member {
                        Value::Func(_) | Value::Native(..) => self.call(&member, &arg_values),
                        Value::Undefined => self.call_builtin(&receiver, &key, &arg_values),
                        other => Err(EvalError::Type(format!("{:?} is not a function", other))),
                    };
                }
                let callee = self.eval(callee, env)?;
                self.call(&callee, &arg_values)
            }
            Expr::New { ctor, args } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for a in args {
                    arg_values.push(self.eval(a, env)?);
                }
                let ctor_value = env
                    .get(ctor)
                    .ok_or_else(|| EvalError::Reference(format!("{} is not defined", ctor)))?;
                self.call(&ctor_value, &arg_values)
            }
            Expr::Unary { op, expr } => {
                let v = self.eval(expr, env)?;
                Ok(match op {
                    UnOp::Not => Value::Bool(!truthy(&v)),
                    UnOp::Neg => Value::Num(-to_number(&v)),
                    UnOp::Plus => Value::Num(to_number(&v)),
                    UnOp::BitNot => Value::Num(!(to_int32(to_number(&v))) as f64),
                    UnOp::TypeOf => Value::Str(type_of(&v).to_string()),
                })
            }
            Expr::Update {
                target,
                delta,
                prefix,
            } => {
                let old = to_number(&self.eval(target, env)?);
                let new = old + delta;
                self.assign_to(target, Value::Num(new), env)?;
                Ok(Value::Num(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, env)?;
                let r = self.eval(right, env)?;
                binary(*op, &l, &r)
            }
            Expr::And(left, right) => {
                let l = self.eval(left, env)?;
                if !truthy(&l) {
                    return Ok(l);
                }
                self.eval(right, env)
            }
            Expr::Or(left, right) => {
                let l = self.eval(left, env)?;
                if truthy(&l) {
                    return Ok(l);
                }
                self.eval(right, env)
            }
            Expr::Assign { op, target, value } => {
                let rhs = self.eval(value, env)?;
                let new = match op {
                    None => rhs,
                    Some(op) => {
                        let old = self.eval(target, env)?;
                        binary(*op, &old, &rhs)?
                    }
                };
                self.assign_to(target, new.clone(), env)?;
                Ok(new)
            }
            Expr::Ternary { cond, then, other } => {
                if truthy(&self.eval(cond, env)?) {
                    self.eval(then, env)
                } else {
                    self.eval(other, env)
                }
            }
            Expr::Comma(parts) => {
                let mut last = Value::Undefined;
                for p in parts {
                    last = self.eval(p, env)?;
                }
                Ok(last)
            }
        }
    }

    fn prop_key(&self, prop: &Prop, env: &Env) -> Result<String, EvalError> {
        match prop {
            Prop::Static(name) => Ok(name.clone()),
            Prop::Computed(e) => Ok(to_js_string(&self.eval(e, env)?)),
        }
    }

    fn assign_to(&self, target: &Expr, value: Value, env: &Env) -> Result<(), EvalError> {
        match target {
            Expr::Ident(name) => {
                env.set(name, value);
                Ok(())
            }
            Expr::Member { obj, prop } => {
                let obj = self.eval(obj, env)?;
                let key = self.prop_key(prop, env)?;
                member_set(&obj, &key, value)
            }
            _ => Err(EvalError::Type("invalid assignment target".into())),
        }
    }

    /// Builtin methods dispatched on the receiver's type.
    fn call_builtin(
        &self,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, EvalError> {
        /// Argument at index, defaulting to undefined.
        macro_rules! get_arg {
            ($index:expr) => {
                args.get($index).cloned().unwrap_or(Value::Undefined)
            };
        }

        match receiver {
            Value::Str(s) => match name {
                "charAt" => {
                    let i = to_number(&get_arg!(0));
                    Ok(Value::Str(char_at(s, i).map(String::from).unwrap_or_default()))
                }
                "charCodeAt" => {
                    let i = to_number(&get_arg!(0));
                    Ok(Value::Num(
                        char_at(s, i).map_or(f64::NAN, |c| c as u32 as f64),
                    ))
                }
                "indexOf" => {
                    let needle = to_js_string(&get_arg!(0));
                    Ok(Value::Num(str_index_of(s, &needle)))
                }
                "slice" => {
                    let chars: Vec<char> = s.chars().collect();
                    let len = chars.len() as f64;
                    let start = clamp_index(to_number(&get_arg!(0)), len);
                    let end = match args.get(1) {
                        Some(v) => clamp_index(to_number(v), len),
                        None => len as usize,
                    };
                    let out: String = if start < end {
                        chars[start..end].iter().collect()
                    } else {
                        String::new()
                    };
                    Ok(Value::Str(out))
                }
                "substr" => {
                    let chars: Vec<char> = s.chars().collect();
                    let len = chars.len() as f64;
                    let start = clamp_index(to_number(&get_arg!(0)), len);
                    let count = match args.get(1) {
                        Some(v) => to_number(v).max(0.0) as usize,
                        None => chars.len().saturating_sub(start),
                    };
                    let end = (start + count).min(chars.len());
                    Ok(Value::Str(chars[start..end].iter().collect()))
                }
                "split" => {
                    let sep = to_js_string(&get_arg!(0));
                    let parts: Vec<Value> = if sep.is_empty() {
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str())
                            .map(|p| Value::Str(p.to_string()))
                            .collect()
                    };
                    Ok(Value::Array(Rc::new(RefCell::new(parts))))
                }
                "replace" => {
                    // Literal search text only; the first occurrence is
                    // replaced, as in the host language.
                    let search = to_js_string(&get_arg!(0));
                    let replacement = to_js_string(&get_arg!(1));
                    Ok(Value::Str(s.replacen(search.as_str(), &replacement, 1)))
                }
                "toString" => Ok(Value::Str(s.clone())),
                _ => Err(EvalError::Type(format!("string has no method {}", name))),
            },
            Value::Num(n) => match name {
                "toString" => {
                    let radix = args.get(0).map(to_number).unwrap_or(10.0) as u32;
                    Ok(Value::Str(num_to_radix_string(*n, radix)?))
                }
                _ => Err(EvalError::Type(format!("number has no method {}", name))),
            },
            Value::Array(items) => match name {
                "push" => {
                    let mut items = items.borrow_mut();
                    for a in args {
                        items.push(a.clone());
                    }
                    Ok(Value::Num(items.len() as f64))
                }
                "shift" => Ok(if items.borrow().is_empty() {
                    Value::Undefined
                } else {
                    items.borrow_mut().remove(0)
                }),
                "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
                "join" => {
                    let sep = match args.get(0) {
                        Some(v) => to_js_string(v),
                        None => ",".to_string(),
                    };
                    let parts: Vec<String> = items.borrow().iter().map(to_js_string).collect();
                    Ok(Value::Str(parts.join(&sep)))
                }
                "indexOf" => {
                    let needle = get_arg!(0);
                    let found = items
                        .borrow()
                        .iter()
                        .position(|v| strict_eq(v, &needle))
                        .map_or(-1.0, |p| p as f64);
                    Ok(Value::Num(found))
                }
                _ => Err(EvalError::Type(format!("array has no method {}", name))),
            },
            other => Err(EvalError::Type(format!(
                "cannot call {} on {:?}",
                name, other
            ))),
        }
    }
}

fn char_at(s: &str, index: f64) -> Option<char> {
    if index.is_nan() || index < 0.0 {
        return None;
    }
    s.chars().nth(index as usize)
}

fn str_index_of(haystack: &str, needle: &str) -> f64 {
    // Offsets are in characters to stay consistent with charAt.
    match haystack.find(needle) {
        Some(byte_off) => haystack[..byte_off].chars().count() as f64,
        None => -1.0,
    }
}

fn clamp_index(v: f64, len: f64) -> usize {
    let v = if v.is_nan() { 0.0 } else { v };
    let idx = if v < 0.0 { (len + v).max(0.0) } else { v.min(len) };
    idx as usize
}

/// Property read on any value. Unknown properties read as undefined.
pub fn member_get(obj: &Value, key: &str) -> Value {
    match obj {
        Value::Object(map) => map.borrow().get(key).cloned().unwrap_or(Value::Undefined),
        Value::Func(closure) => closure
            .props
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or(Value::Undefined),
        Value::Array(items) => {
            if key == "length" {
                return Value::Num(items.borrow().len() as f64);
            }
            match key.parse::<usize>() {
                Ok(i) => items.borrow().get(i).cloned().unwrap_or(Value::Undefined),
                Err(_) => Value::Undefined,
            }
        }
        Value::Str(s) => {
            if key == "length" {
                return Value::Num(s.chars().count() as f64);
            }
            match key.parse::<usize>() {
                Ok(i) => s
                    .chars()
                    .nth(i)
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or(Value::Undefined),
                Err(_) => Value::Undefined,
            }
        }
        _ => Value::Undefined,
    }
}

fn member_set(obj: &Value, key: &str, value: Value) -> Result<(), EvalError> {
    match obj {
        Value::Object(map) => {
            map.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        Value::Func(closure) => {
            closure.props.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            if let Ok(i) = key.parse::<usize>() {
                let mut items = items.borrow_mut();
                if i >= items.len() {
                    items.resize(i + 1, Value::Undefined);
                }
                items[i] = value;
            }
            Ok(())
        }
        // Writes to primitives are silently dropped, as in sloppy mode.
        _ => Ok(()),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    Ok(match op {
        BinOp::Add => {
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                Value::Str(format!("{}{}", to_js_string(l), to_js_string(r)))
            } else {
                Value::Num(to_number(l) + to_number(r))
            }
        }
        BinOp::Sub => Value::Num(to_number(l) - to_number(r)),
        BinOp::Mul => Value::Num(to_number(l) * to_number(r)),
        BinOp::Div => Value::Num(to_number(l) / to_number(r)),
        BinOp::Rem => Value::Num(to_number(l) % to_number(r)),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let result = if let (Value::Str(a), Value::Str(b)) = (l, r) {
                match op {
                    BinOp::Lt => a < b,
                    BinOp::Gt => a > b,
                    BinOp::Le => a <= b,
                    _ => a >= b,
                }
            } else {
                let (a, b) = (to_number(l), to_number(r));
                match op {
                    BinOp::Lt => a < b,
                    BinOp::Gt => a > b,
                    BinOp::Le => a <= b,
                    _ => a >= b,
                }
            };
            Value::Bool(result)
        }
        BinOp::StrictEq => Value::Bool(strict_eq(l, r)),
        BinOp::StrictNe => Value::Bool(!strict_eq(l, r)),
        BinOp::Eq => Value::Bool(loose_eq(l, r)),
        BinOp::Ne => Value::Bool(!loose_eq(l, r)),
        BinOp::BitAnd => Value::Num((to_int32(to_number(l)) & to_int32(to_number(r))) as f64),
        BinOp::BitOr => Value::Num((to_int32(to_number(l)) | to_int32(to_number(r))) as f64),
        BinOp::BitXor => Value::Num((to_int32(to_number(l)) ^ to_int32(to_number(r))) as f64),
        BinOp::Shl => {
            Value::Num((to_int32(to_number(l)) << (to_uint32(to_number(r)) & 31)) as f64)
        }
        BinOp::Shr => {
            Value::Num((to_int32(to_number(l)) >> (to_uint32(to_number(r)) & 31)) as f64)
        }
        BinOp::UShr => {
            Value::Num((to_uint32(to_number(l)) >> (to_uint32(to_number(r)) & 31)) as f64)
        }
    })
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Undefined => false,
        Value::Bool(b) => *b,
        Value::Num(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) | Value::Func(_) | Value::Native(..) => true,
    }
}

pub fn to_number(v: &Value) -> f64 {
    match v {
        Value::Undefined => f64::NAN,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Num(n) => *n,
        Value::Str(s) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64)
            } else {
                t.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        _ => f64::NAN,
    }
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() as i64) as i32
}

fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

fn type_of(v: &Value) -> &'static str {
    match v {
        Value::Undefined => "undefined",
        Value::Bool(_) => "boolean",
        Value::Num(_) => "number",
        Value::Str(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
        Value::Func(_) | Value::Native(..) => "function",
    }
}

pub fn strict_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Num(_), Value::Str(_))
        | (Value::Str(_), Value::Num(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => {
            let (a, b) = (to_number(l), to_number(r));
            a == b
        }
        _ => strict_eq(l, r),
    }
}

/// String conversion matching the host language for the value kinds the
/// subset produces.
pub fn to_js_string(v: &Value) -> String {
    match v {
        Value::Undefined => "undefined".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Num(n) => num_to_string(*n),
        Value::Str(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.borrow().iter().map(to_js_string).collect();
            parts.join(",")
        }
        Value::Object(_) => "[object Object]".to_string(),
        Value::Func(_) | Value::Native(..) => "function".to_string(),
    }
}

/// Renders a number the way the source language does: integral values print
/// without a fractional part.
pub fn num_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

fn num_to_radix_string(n: f64, radix: u32) -> Result<String, EvalError> {
    if !(2..=36).contains(&radix) {
        return Err(EvalError::Type(format!("invalid radix {}", radix)));
    }
    if radix == 10 {
        return Ok(num_to_string(n));
    }
    if n.is_nan() || n.is_infinite() {
        return Ok(num_to_string(n));
    }
    let negative = n < 0.0;
    let mut magnitude = n.abs().trunc() as u64;
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(digits[(magnitude % radix as u64) as usize]);
        magnitude /= radix as u64;
        if magnitude == 0 {
            break;
        }
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::parser::parse_program;

    fn run_and_get(src: &str, name: &str) -> Value {
        let interp = Interp::new(100_000);
        let env = Scope::root();
        env.declare("undefined", Value::Undefined);
        let prog = parse_program(src).unwrap();
        interp.run(&prog, &env).unwrap();
        env.get(name).unwrap()
    }

    #[test]
    fn closures_capture_and_reassign_outer_names() {
        let v = run_and_get(
            "function f(a) { f = function (b) { return b * 2; }; return f(a); } \
             var out = f(21);",
            "out",
        );
        assert!(matches!(v, Value::Num(n) if n == 42.0));
    }

    #[test]
    fn function_objects_carry_properties() {
        let v = run_and_get(
            "function f() { if (f.cache === undefined) { f.cache = 'x'; } return f.cache; } \
             var out = f() + f();",
            "out",
        );
        assert!(matches!(v, Value::Str(s) if s == "xx"));
    }

    #[test]
    fn for_loop_with_string_ops() {
        let v = run_and_get(
            "var s = 'abc'; var out = ''; \
             for (var i = 0; i < s.length; i++) { out += s.charAt(s.length - 1 - i); }",
            "out",
        );
        assert!(matches!(v, Value::Str(s) if s == "cba"));
    }

    #[test]
    fn bitwise_follows_int32_truncation() {
        let v = run_and_get("var out = (255 & 300) | (1 << 8);", "out");
        assert!(matches!(v, Value::Num(n) if n == (255 & 300 | 256) as f64));
    }

    #[test]
    fn budget_exhaustion_is_an_error() {
        let interp = Interp::new(500);
        let env = Scope::root();
        let prog = parse_program("var i = 0; while (1) { i++; }").unwrap();
        assert!(matches!(interp.run(&prog, &env), Err(EvalError::Budget)));
    }

    #[test]
    fn number_rendering_is_js_like() {
        assert_eq!(num_to_string(21.0), "21");
        assert_eq!(num_to_string(2.5), "2.5");
        assert_eq!(num_to_string(-3.0), "-3");
        assert_eq!(num_to_radix_string(255.0, 16).unwrap(), "ff");
    }
}

//! Recursive-descent parser producing the small syntax tree the evaluator
//! walks. Only the constructs that obfuscator runtime fragments actually use
//! are representable; anything else is a parse error, which callers treat as
//! a recoverable evaluation failure.

use std::rc::Rc;

use crate::sandbox::lexer::{tokenize, Tok};
use crate::sandbox::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
    BitNot,
    TypeOf,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Undefined,
    Bool(bool),
    Num(f64),
    Str(String),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Func(Rc<FuncDef>),
    Member {
        obj: Box<Expr>,
        prop: Prop,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        ctor: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    /// `++`/`--` in prefix or postfix position.
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// Plain assignment carries no operator; compound forms carry the
    /// arithmetic op applied between target and value.
    Assign {
        op: Option<BinOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        other: Box<Expr>,
    },
    Comma(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub enum Prop {
    Static(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct FuncDef {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl(Vec<(String, Option<Expr>)>),
    FuncDecl(String, Rc<FuncDef>),
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        other: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Break,
    Continue,
    Empty,
}

/// Parses a full program.
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, EvalError> {
    let mut p = Parser::new(tokenize(src)?);
    let mut stmts = Vec::new();
    while !p.at_eof() {
        stmts.push(p.stmt()?);
    }
    Ok(stmts)
}

/// Parses a single expression; trailing tokens are an error.
pub fn parse_expr(src: &str) -> Result<Expr, EvalError> {
    let mut p = Parser::new(tokenize(src)?);
    let expr = p.expression()?;
    if !p.at_eof() {
        return Err(EvalError::Parse(format!(
            "unexpected {} after expression",
            p.peek()
        )));
    }
    Ok(expr)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn new(toks: Vec<Tok>) -> Self {
        Self { toks, pos: 0 }
    }

    fn peek(&self) -> &Tok {
        self.toks.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn bump(&mut self) -> Tok {
        let t = self.peek().clone();
        self.pos += 1;
        t
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), EvalError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(EvalError::Parse(format!("expected {:?}, found {}", p, self.peek())))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String, EvalError> {
        match self.bump() {
            Tok::Ident(s) => Ok(s),
            t => Err(EvalError::Parse(format!("expected identifier, found {}", t))),
        }
    }

    /// Semicolons are consumed when present; a closing brace or end of input
    /// also terminates a statement, which tolerates minified fragments.
    fn end_stmt(&mut self) {
        self.eat_punct(";");
    }

    fn stmt(&mut self) -> Result<Stmt, EvalError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_keyword("function") {
            let name = self.expect_ident()?;
            let def = self.func_rest()?;
            return Ok(Stmt::FuncDecl(name, Rc::new(def)));
        }
        if self.is_keyword("var") || self.is_keyword("let") || self.is_keyword("const") {
            self.pos += 1;
            let decl = self.var_declarators()?;
            self.end_stmt();
            return Ok(decl);
        }
        if self.eat_keyword("return") {
            if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                self.end_stmt();
                return Ok(Stmt::Return(None));
            }
            let value = self.expression()?;
            self.end_stmt();
            return Ok(Stmt::Return(Some(value)));
        }
        if self.eat_keyword("if") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let then = Box::new(self.stmt()?);
            let other = if self.eat_keyword("else") {
                Some(Box::new(self.stmt()?))
            } else {
                None
            };
            return Ok(Stmt::If { cond, then, other });
        }
        if self.eat_keyword("while") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.stmt()?);
            return Ok(Stmt::While { cond, body });
        }
        if self.eat_keyword("for") {
            return self.for_stmt();
        }
        if self.eat_keyword("break") {
            self.end_stmt();
            return Ok(Stmt::Break);
        }
        if self.eat_keyword("continue") {
            self.end_stmt();
            return Ok(Stmt::Continue);
        }
        let expr = self.expression()?;
        self.end_stmt();
        Ok(Stmt::Expr(expr))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, EvalError> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(EvalError::Parse("unterminated block".into()));
            }
            stmts.push(self.stmt()?);
        }
        self.expect_punct("}")?;
        Ok(stmts)
    }

    fn var_declarators(&mut self) -> Result<Stmt, EvalError> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.assign_expr()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::VarDecl(decls))
    }

    fn for_stmt(&mut self) -> Result<Stmt, EvalError> {
        self.expect_punct("(")?;
        let init = if self.eat_punct(";") {
            None
        } else if self.is_keyword("var") || self.is_keyword("let") || self.is_keyword("const") {
            self.pos += 1;
            let decl = self.var_declarators()?;
            self.expect_punct(";")?;
            Some(Box::new(decl))
        } else {
            let expr = self.expression()?;
            self.expect_punct(";")?;
            Some(Box::new(Stmt::Expr(expr)))
        };
        let cond = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.stmt()?);
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn func_rest(&mut self) -> Result<FuncDef, EvalError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.is_punct(")") {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        let body = self.block()?;
        Ok(FuncDef { params, body })
    }

    // Expression grammar, highest level first.

    fn expression(&mut self) -> Result<Expr, EvalError> {
        let first = self.assign_expr()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.eat_punct(",") {
            parts.push(self.assign_expr()?);
        }
        Ok(Expr::Comma(parts))
    }

    fn assign_expr(&mut self) -> Result<Expr, EvalError> {
        let target = self.ternary_expr()?;
        let op = match self.peek() {
            Tok::Punct("=") => None,
            Tok::Punct("+=") => Some(BinOp::Add),
            Tok::Punct("-=") => Some(BinOp::Sub),
            Tok::Punct("*=") => Some(BinOp::Mul),
            Tok::Punct("/=") => Some(BinOp::Div),
            Tok::Punct("%=") => Some(BinOp::Rem),
            Tok::Punct("&=") => Some(BinOp::BitAnd),
            Tok::Punct("|=") => Some(BinOp::BitOr),
            Tok::Punct("^=") => Some(BinOp::BitXor),
            Tok::Punct("<<=") => Some(BinOp::Shl),
            Tok::Punct(">>=") => Some(BinOp::Shr),
            Tok::Punct(">>>=") => Some(BinOp::UShr),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
            return Err(EvalError::Parse("invalid assignment target".into()));
        }
        self.pos += 1;
        let value = self.assign_expr()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn ternary_expr(&mut self) -> Result<Expr, EvalError> {
        let cond = self.or_expr()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assign_expr()?;
        self.expect_punct(":")?;
        let other = self.assign_expr()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            other: Box::new(other),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and_expr()?;
        while self.eat_punct("||") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.bitor_expr()?;
        while self.eat_punct("&&") {
            let right = self.bitor_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn bitor_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor_expr)
    }

    fn bitxor_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand_expr)
    }

    fn bitand_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::equality_expr)
    }

    fn equality_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[
                ("===", BinOp::StrictEq),
                ("!==", BinOp::StrictNe),
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
            ],
            Self::relational_expr,
        )
    }

    fn relational_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::shift_expr,
        )
    }

    fn shift_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[(">>>", BinOp::UShr), ("<<", BinOp::Shl), (">>", BinOp::Shr)],
            Self::additive_expr,
        )
    }

    fn additive_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::multiplicative_expr)
    }

    fn multiplicative_expr(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::unary_expr,
        )
    }

    fn binary_level(
        &mut self,
        ops: &[(&'static str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        'scan: loop {
            for (p, op) in ops {
                if self.eat_punct(p) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'scan;
                }
            }
            return Ok(left);
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Tok::Punct("!") => Some(UnOp::Not),
            Tok::Punct("~") => Some(UnOp::BitNot),
            Tok::Punct("-") => Some(UnOp::Neg),
            Tok::Punct("+") => Some(UnOp::Plus),
            Tok::Ident(s) if s == "typeof" => Some(UnOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let expr = self.unary_expr()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        if self.eat_punct("++") {
            let target = self.unary_expr()?;
            return Ok(Expr::Update {
                target: Box::new(target),
                delta: 1.0,
                prefix: true,
            });
        }
        if self.eat_punct("--") {
            let target = self.unary_expr()?;
            return Ok(Expr::Update {
                target: Box::new(target),
                delta: -1.0,
                prefix: true,
            });
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.call_member_expr()?;
        loop {
            if self.eat_punct("++") {
                expr = Expr::Update {
                    target: Box::new(expr),
                    delta: 1.0,
                    prefix: false,
                };
            } else if self.eat_punct("--") {
                expr = Expr::Update {
                    target: Box::new(expr),
                    delta: -1.0,
                    prefix: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_member_expr(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary_expr()?;
        loop {
            if self.eat_punct(".") {
                let name = self.expect_ident()?;
                expr = Expr::Member {
                    obj: Box::new(expr),
                    prop: Prop::Static(name),
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    obj: Box::new(expr),
                    prop: Prop::Computed(Box::new(index)),
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if !self.is_punct(")") {
            loop {
                args.push(self.assign_expr()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary_expr(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Punct("(") => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => {
                let mut elems = Vec::new();
                if !self.is_punct("]") {
                    loop {
                        elems.push(self.assign_expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                        // Trailing comma
                        if self.is_punct("]") {
                            break;
                        }
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(elems))
            }
            Tok::Punct("{") => {
                let mut props = Vec::new();
                if !self.is_punct("}") {
                    loop {
                        let key = match self.bump() {
                            Tok::Ident(s) => s,
                            Tok::Str(s) => s,
                            Tok::Num(n) => crate::sandbox::interp::num_to_string(n),
                            t => {
                                return Err(EvalError::Parse(format!(
                                    "expected property key, found {}",
                                    t
                                )))
                            }
                        };
                        self.expect_punct(":")?;
                        props.push((key, self.assign_expr()?));
                        if !self.eat_punct(",") {
                            break;
                        }
                        if self.is_punct("}") {
                            break;
                        }
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::Object(props))
            }
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" | "undefined" => Ok(Expr::Undefined),
                "function" => {
                    // Function expressions may carry a name; the subset does
                    // not bind it, callers always assign the value anyway.
                    if let Tok::Ident(_) = self.peek() {
                        self.pos += 1;
                    }
                    Ok(Expr::Func(Rc::new(self.func_rest()?)))
                }
                "new" => {
                    let ctor = self.expect_ident()?;
                    let args = if self.is_punct("(") {
                        self.arguments()?
                    } else {
                        Vec::new()
                    };
                    Ok(Expr::New { ctor, args })
                }
                _ => Ok(Expr::Ident(name)),
            },
            t => Err(EvalError::Parse(format!("unexpected {}", t))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decoder_shaped_program() {
        let src = r#"
            function h(a, b) {
                var t = g();
                h = function (n, i) {
                    n = n - 0x12c;
                    var v = t[n];
                    return v;
                };
                return h(a, b);
            }
        "#;
        let prog = parse_program(src).unwrap();
        assert_eq!(prog.len(), 1);
        assert!(matches!(&prog[0], Stmt::FuncDecl(name, _) if name == "h"));
    }

    #[test]
    fn parses_for_with_comma_and_postfix() {
        let prog = parse_program("for (var i = 0, j = 0; i < 10; i++) { j += i; }").unwrap();
        assert!(matches!(&prog[0], Stmt::For { .. }));
    }

    #[test]
    fn precedence_bitand_below_shift() {
        // 255 & r >> 2 must parse as 255 & (r >> 2)
        let expr = parse_expr("255 & r >> 2").unwrap();
        match expr {
            Expr::Binary { op, right, .. } => {
                assert_eq!(op, BinOp::BitAnd);
                assert!(matches!(*right, Expr::Binary { op: BinOp::Shr, .. }));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn rejects_unsupported_syntax() {
        assert!(parse_program("var f = a => b;").is_err());
        assert!(parse_expr("1 + ").is_err());
    }
}

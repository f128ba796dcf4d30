//! The small expression/statement sublanguage rule bodies are written in.
//!
//! Rule bodies don't need a general-purpose scripting language (§9 design
//! notes: "avoid building a general interpreter unless rule bodies
//! themselves need arbitrary scripting"); they need arithmetic, string
//! comparison and the handful of built-ins in §4.1. This module is a small
//! hand-rolled lexer, recursive-descent expression parser, and tree-walking
//! evaluator, in the shape of the teacher's own hand-rolled Datalog-style
//! parsers (no parser-combinator crate is pulled in for this).

use std::collections::HashMap;
use std::fmt;

use crate::rule::Builtins;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    pub fn as_string(&self) -> String {
        match self {
            Value::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty() && s != "0" && s != "false",
        }
    }

    fn as_num(&self) -> Result<f64, String> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("not a number: {s:?}")),
        }
    }

    /// Parse a raw tag value the way the language coerces strings to
    /// numbers on demand (Tcl-style "stringly typed" values).
    pub fn from_tag_value(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) if !raw.trim().is_empty() => Value::Num(n),
            _ => Value::Str(raw.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    NumberLit(f64),
    StringLit(String),
    Var(String),
    Call(String, Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Concat,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Set(String, Expr),
    Return(Option<Expr>),
    Continue,
    Exception(Option<Expr>),
    Expr(Expr),
}

/// Result of evaluating one statement list (a default rule's block body).
pub enum BlockOutcome {
    /// Ran to completion (or hit an explicit `return`); `locals` holds every
    /// variable assigned during the block.
    Completed(HashMap<String, Value>),
    /// Hit `exception [msg]`.
    Exception(Option<String>),
    /// Hit `continue`: accept whatever outputs were set so far even if some
    /// `out` patterns remain unbound.
    Continue(HashMap<String, Value>),
}

pub struct Scope<'a> {
    pub vars: HashMap<String, Value>,
    pub builtins: &'a dyn Builtins,
}

impl<'a> Scope<'a> {
    pub fn new(inputs: HashMap<String, Value>, builtins: &'a dyn Builtins) -> Self {
        Self {
            vars: inputs,
            builtins,
        }
    }

    pub fn eval_expr(&self, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::NumberLit(n) => Ok(Value::Num(*n)),
            Expr::StringLit(s) => Ok(Value::Str(s.clone())),
            Expr::Var(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| format!("undefined variable ${name}")),
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| self.eval_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.builtins.call(name, &values, self)
            }
            Expr::Unary(op, inner) => {
                let v = self.eval_expr(inner)?;
                match op {
                    UnOp::Neg => Ok(Value::Num(-v.as_num()?)),
                    UnOp::Not => Ok(Value::Bool(!v.as_bool())),
                }
            }
            Expr::Binary(lhs, op, rhs) => {
                let l = self.eval_expr(lhs)?;
                if matches!(op, BinOp::And) && !l.as_bool() {
                    return Ok(Value::Bool(false));
                }
                if matches!(op, BinOp::Or) && l.as_bool() {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval_expr(rhs)?;
                eval_binary(&l, *op, &r)
            }
        }
    }

    pub fn run_block(&mut self, stmts: &[Stmt]) -> Result<BlockOutcome, String> {
        for stmt in stmts {
            match stmt {
                Stmt::Set(name, expr) => {
                    let v = self.eval_expr(expr)?;
                    self.vars.insert(name.clone(), v);
                }
                Stmt::Expr(expr) => {
                    self.eval_expr(expr)?;
                }
                Stmt::Return(expr) => {
                    if let Some(expr) = expr {
                        self.eval_expr(expr)?;
                    }
                    return Ok(BlockOutcome::Completed(self.vars.clone()));
                }
                Stmt::Continue => {
                    return Ok(BlockOutcome::Continue(self.vars.clone()));
                }
                Stmt::Exception(msg_expr) => {
                    let msg = match msg_expr {
                        Some(expr) => Some(self.eval_expr(expr)?.as_string()),
                        None => None,
                    };
                    return Ok(BlockOutcome::Exception(msg));
                }
            }
        }
        Ok(BlockOutcome::Completed(self.vars.clone()))
    }
}

fn eval_binary(l: &Value, op: BinOp, r: &Value) -> Result<Value, String> {
    use BinOp::*;
    Ok(match op {
        Add => Value::Num(l.as_num()? + r.as_num()?),
        Sub => Value::Num(l.as_num()? - r.as_num()?),
        Mul => Value::Num(l.as_num()? * r.as_num()?),
        Div => {
            let divisor = r.as_num()?;
            if divisor == 0.0 {
                return Err("division by zero".to_string());
            }
            Value::Num(l.as_num()? / divisor)
        }
        Concat => Value::Str(format!("{}{}", l.as_string(), r.as_string())),
        Eq => Value::Bool(values_equal(l, r)),
        Ne => Value::Bool(!values_equal(l, r)),
        Lt | Le | Gt | Ge => {
            let ordering = compare_values(l, r)?;
            Value::Bool(match op {
                Lt => ordering == std::cmp::Ordering::Less,
                Le => ordering != std::cmp::Ordering::Greater,
                Gt => ordering == std::cmp::Ordering::Greater,
                Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            })
        }
        And => Value::Bool(l.as_bool() && r.as_bool()),
        Or => Value::Bool(l.as_bool() || r.as_bool()),
    })
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l.as_num(), r.as_num()) {
        (Ok(a), Ok(b)) => a == b,
        _ => l.as_string() == r.as_string(),
    }
}

fn compare_values(l: &Value, r: &Value) -> Result<std::cmp::Ordering, String> {
    match (l.as_num(), r.as_num()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).ok_or_else(|| "NaN comparison".to_string()),
        _ => Ok(l.as_string().cmp(&r.as_string())),
    }
}

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Var(String),
    Number(f64),
    Str(String),
    Symbol(char),
    Op(String),
    Eof,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
        }
    }

    pub fn tokenize(src: &str) -> Result<Vec<Token>, String> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let done = tok == Token::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace_and_comments();
        let Some(&c) = self.chars.peek() else {
            return Ok(Token::Eof);
        };
        if c == '$' {
            self.chars.next();
            let name = self.read_ident_chars();
            if name.is_empty() {
                return Err("expected variable name after '$'".to_string());
            }
            return Ok(Token::Var(name));
        }
        if c == '"' {
            self.chars.next();
            let mut s = String::new();
            loop {
                match self.chars.next() {
                    Some('"') => break,
                    Some('\\') => {
                        if let Some(escaped) = self.chars.next() {
                            s.push(escaped);
                        }
                    }
                    Some(ch) => s.push(ch),
                    None => return Err("unterminated string literal".to_string()),
                }
            }
            return Ok(Token::Str(s));
        }
        if c.is_ascii_digit() {
            let mut s = String::new();
            while let Some(&ch) = self.chars.peek() {
                if ch.is_ascii_digit() || ch == '.' {
                    s.push(ch);
                    self.chars.next();
                } else {
                    break;
                }
            }
            return s
                .parse::<f64>()
                .map(Token::Number)
                .map_err(|_| format!("invalid number literal: {s}"));
        }
        if c.is_alphabetic() || c == '_' {
            let ident = self.read_ident_chars();
            return Ok(Token::Ident(ident));
        }
        for (chars, op) in [
            ("==", "=="),
            ("!=", "!="),
            ("<=", "<="),
            (">=", ">="),
            ("&&", "&&"),
            ("||", "||"),
        ] {
            if self.starts_with(chars) {
                self.advance_n(chars.len());
                return Ok(Token::Op(op.to_string()));
            }
        }
        if "+-*/<>!(){},;".contains(c) {
            self.chars.next();
            return Ok(Token::Symbol(c));
        }
        Err(format!("unexpected character: {c:?}"))
    }

    fn starts_with(&self, s: &str) -> bool {
        let mut clone = self.chars.clone();
        for expected in s.chars() {
            match clone.next() {
                Some(c) if c == expected => continue,
                _ => return false,
            }
        }
        true
    }

    fn advance_n(&mut self, n: usize) {
        for _ in 0..n {
            self.chars.next();
        }
    }

    fn read_ident_chars(&mut self) -> String {
        let mut s = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                s.push(ch);
                self.chars.next();
            } else {
                break;
            }
        }
        s
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while let Some(&c) = self.chars.peek() {
                if c.is_whitespace() {
                    self.chars.next();
                } else {
                    break;
                }
            }
            if self.chars.peek() == Some(&'#') {
                while let Some(&c) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
                continue;
            }
            break;
        }
    }
}

// ---------------------------------------------------------------------
// Expression / statement parser
// ---------------------------------------------------------------------

pub struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_expr_source(src: &str) -> Result<Expr, String> {
        let src = strip_expr_wrapper(src);
        let tokens = Lexer::tokenize(&src)?;
        let mut parser = ExprParser::new(tokens);
        let expr = parser.parse_or()?;
        parser.expect_eof()?;
        Ok(expr)
    }

    pub fn parse_block_source(src: &str) -> Result<Vec<Stmt>, String> {
        let tokens = Lexer::tokenize(src)?;
        let mut parser = ExprParser::new(tokens);
        parser.parse_statements()
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        tok
    }

    fn expect_eof(&self) -> Result<(), String> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(format!("unexpected trailing token: {other:?}")),
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<(), String> {
        match self.advance() {
            Token::Symbol(s) if s == c => Ok(()),
            other => Err(format!("expected '{c}', found {other:?}")),
        }
    }

    fn parse_statements(&mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        loop {
            while matches!(self.peek(), Token::Symbol(';')) {
                self.advance();
            }
            if matches!(self.peek(), Token::Eof) {
                break;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, String> {
        match self.peek().clone() {
            Token::Ident(kw) if kw == "set" => {
                self.advance();
                let name = match self.advance() {
                    Token::Ident(name) => name,
                    other => return Err(format!("expected identifier after 'set', found {other:?}")),
                };
                let expr = self.parse_or()?;
                Ok(Stmt::Set(name, expr))
            }
            Token::Ident(kw) if kw == "return" => {
                self.advance();
                if matches!(self.peek(), Token::Symbol(';') | Token::Eof) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.parse_or()?)))
                }
            }
            Token::Ident(kw) if kw == "continue" => {
                self.advance();
                Ok(Stmt::Continue)
            }
            Token::Ident(kw) if kw == "exception" => {
                self.advance();
                if matches!(self.peek(), Token::Symbol(';') | Token::Eof) {
                    Ok(Stmt::Exception(None))
                } else {
                    Ok(Stmt::Exception(Some(self.parse_or()?)))
                }
            }
            _ => Ok(Stmt::Expr(self.parse_or()?)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::Op(op) if op == "||") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), Token::Op(op) if op == "&&") {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::Op(op) if op == "==" => BinOp::Eq,
                Token::Op(op) if op == "!=" => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Op(op) if op == "<=" => BinOp::Le,
                Token::Op(op) if op == ">=" => BinOp::Ge,
                Token::Symbol('<') => BinOp::Lt,
                Token::Symbol('>') => BinOp::Gt,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Symbol('+') => BinOp::Add,
                Token::Symbol('-') => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Symbol('*') => BinOp::Mul,
                Token::Symbol('/') => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Token::Symbol('-') => {
                self.advance();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Symbol('!') => {
                self.advance();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::NumberLit(n)),
            Token::Str(s) => Ok(Expr::StringLit(s)),
            Token::Var(name) => Ok(Expr::Var(name)),
            Token::Ident(name) => {
                if matches!(self.peek(), Token::Symbol('(')) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Token::Symbol(')')) {
                        loop {
                            args.push(self.parse_or()?);
                            if matches!(self.peek(), Token::Symbol(',')) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect_symbol(')')?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::StringLit(name))
                }
            }
            Token::Symbol('(') => {
                let inner = self.parse_or()?;
                self.expect_symbol(')')?;
                Ok(inner)
            }
            other => Err(format!("unexpected token in expression: {other:?}")),
        }
    }
}

/// Strips an optional Tcl-flavored `[expr { ... }]` wrapper so rules can be
/// written either in the original bracketed style or as a bare expression.
fn strip_expr_wrapper(src: &str) -> String {
    let trimmed = src.trim();
    let trimmed = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .map(str::trim)
        .unwrap_or(trimmed);
    if let Some(inner) = trimmed
        .strip_prefix("[expr")
        .and_then(|s| s.trim_start().strip_prefix('{'))
    {
        if let Some(inner) = inner.trim_end().strip_suffix("}]") {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::NullBuiltins;

    fn eval(src: &str, vars: &[(&str, Value)]) -> Value {
        let expr = ExprParser::parse_expr_source(src).unwrap();
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let builtins = NullBuiltins;
        let scope = Scope::new(vars, &builtins);
        scope.eval_expr(&expr).unwrap()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("$x + 1", &[("x", Value::Num(41.0))]), Value::Num(42.0));
    }

    #[test]
    fn tcl_expr_wrapper_is_stripped() {
        assert_eq!(
            eval("[expr {$x + 1}]", &[("x", Value::Num(41.0))]),
            Value::Num(42.0)
        );
    }

    #[test]
    fn comparison() {
        assert_eq!(
            eval("$count >= 0", &[("count", Value::Num(-3.0))]),
            Value::Bool(false)
        );
    }

    #[test]
    fn block_sets_locals() {
        let stmts = ExprParser::parse_block_source("set y $x + 1").unwrap();
        let builtins = NullBuiltins;
        let mut scope = Scope::new(
            [("x".to_string(), Value::Num(41.0))].into_iter().collect(),
            &builtins,
        );
        match scope.run_block(&stmts).unwrap() {
            BlockOutcome::Completed(locals) => {
                assert_eq!(locals.get("y"), Some(&Value::Num(42.0)));
            }
            _ => panic!("expected completion"),
        }
    }
}

//! Expression engine for selections, weights and binning variables.
//!
//! Expressions are compiled once into an AST whose variables are numbered
//! slots, then bound to the column layout of an event batch and evaluated
//! per row without name lookups.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), the ternary `c ? a : b`, and built-in
//! functions (abs, fabs, sqrt, log, exp, pow, min, max, cos, sin).
//!
//! Truthiness is C-like: any nonzero value is true, comparisons and logical
//! operators yield `1.0` or `0.0`.

use crate::error::{HistError, Result};
use crate::fields::FieldSet;
use crate::source::Row;

/// Names of the built-in functions.
pub const FUNCTIONS: &[&str] =
    &["abs", "fabs", "sqrt", "log", "exp", "pow", "min", "max", "cos", "sin"];

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize), // index into required_branches
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
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
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
    Cos,
    Sin,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" | "fabs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "exp" => Func::Exp,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            "cos" => Func::Cos,
            "sin" => Func::Sin,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

// ── Variable lookup ────────────────────────────────────────────

/// Source of variable values during evaluation, indexed by slot.
trait VarLookup {
    fn var(&self, i: usize) -> f64;
}

impl VarLookup for [f64] {
    #[inline]
    fn var(&self, i: usize) -> f64 {
        self[i]
    }
}

struct SlotRow<'r, 'b> {
    row: &'r Row<'b>,
    slots: &'r [usize],
}

impl VarLookup for SlotRow<'_, '_> {
    #[inline]
    fn var(&self, i: usize) -> f64 {
        self.row.value(self.slots[i])
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A compiled expression ready for evaluation.
///
/// Variable identifiers in the expression are mapped to field names.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
    /// Field names referenced by this expression (ordered by first occurrence).
    pub required_branches: Vec<String>,
}

impl CompiledExpr {
    /// Parse and compile an expression string.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(HistError::Expression("empty expression".into()));
        }
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_ternary()?;
        if parser.pos < parser.tokens.len() {
            return Err(HistError::Expression(format!(
                "unexpected token after expression '{input}': {:?}",
                parser.tokens[parser.pos]
            )));
        }
        let branches = std::mem::take(&mut parser.branches);
        Ok(CompiledExpr { source: input.to_string(), ast, required_branches: branches })
    }

    /// The expression text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the expression for a single row.
    ///
    /// `values` must have the same length and order as `required_branches`.
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval_expr(&self.ast, values)
    }

    /// Bind the expression to the column layout described by `fields`.
    pub fn bind(&self, fields: &FieldSet) -> Result<BoundExpr> {
        let slots = self
            .required_branches
            .iter()
            .map(|name| {
                fields.position(name).ok_or_else(|| {
                    HistError::MissingField(format!(
                        "'{name}' (referenced by '{}') is not materialized",
                        self.source
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BoundExpr { expr: self.clone(), slots })
    }
}

/// A compiled expression bound to the slots of a [`FieldSet`].
#[derive(Debug, Clone)]
pub struct BoundExpr {
    expr: CompiledExpr,
    slots: Vec<usize>,
}

impl BoundExpr {
    /// Evaluate against one event row.
    #[inline]
    pub fn eval(&self, row: &Row<'_>) -> f64 {
        eval_expr(&self.expr.ast, &SlotRow { row, slots: &self.slots })
    }

    /// The expression text.
    pub fn source(&self) -> &str {
        self.expr.source()
    }
}

// ── Evaluation ─────────────────────────────────────────────────

#[inline]
fn truthy(v: f64) -> bool {
    v != 0.0
}

#[inline]
fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr<V: VarLookup + ?Sized>(e: &Expr, vals: &V) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => vals.var(*i),
        Expr::UnaryNeg(a) => -eval_expr(a, vals),
        Expr::UnaryNot(a) => flag(!truthy(eval_expr(a, vals))),
        Expr::Ternary(c, a, b) => {
            if truthy(eval_expr(c, vals)) {
                eval_expr(a, vals)
            } else {
                eval_expr(b, vals)
            }
        }
        Expr::BinOp(BinOp::And, a, b) => {
            flag(truthy(eval_expr(a, vals)) && truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(BinOp::Or, a, b) => {
            flag(truthy(eval_expr(a, vals)) || truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vals);
            let rhs = eval_expr(b, vals);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Eq => flag((lhs - rhs).abs() < f64::EPSILON),
                BinOp::Ne => flag((lhs - rhs).abs() >= f64::EPSILON),
                BinOp::Lt => flag(lhs < rhs),
                BinOp::Le => flag(lhs <= rhs),
                BinOp::Gt => flag(lhs > rhs),
                BinOp::Ge => flag(lhs >= rhs),
                BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled above"),
            }
        }
        Expr::Call(f, args) => {
            let a0 = || eval_expr(&args[0], vals);
            let a1 = || eval_expr(&args[1], vals);
            match f {
                Func::Abs => a0().abs(),
                Func::Sqrt => a0().sqrt(),
                Func::Log => a0().ln(),
                Func::Exp => a0().exp(),
                Func::Pow => a0().powf(a1()),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
                Func::Cos => a0().cos(),
                Func::Sin => a0().sin(),
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Two-character operators
        if i + 1 < chars.len() {
            let tok = match (c, chars[i + 1]) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 = s
                .parse()
                .map_err(|_| HistError::Expression(format!("invalid number: '{s}'")))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(HistError::Expression(format!(
                "unexpected character '{c}' in '{input}'"
            )));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    branches: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, branches: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => {
                Err(HistError::Expression(format!("expected {:?}, got {:?}", expected, other)))
            }
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.branches.iter().position(|b| b == name) {
            i
        } else {
            self.branches.push(name.to_string());
            self.branches.len() - 1
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if !matches!(self.peek(), Some(Token::Question)) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_ternary()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_ternary()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    let idx = self.resolve_var(&name);
                    return Ok(Expr::Var(idx));
                }
                self.advance(); // consume '('
                let func = Func::from_name(&name).ok_or_else(|| {
                    HistError::Expression(format!("unknown function: '{name}'"))
                })?;
                let mut args = vec![self.parse_ternary()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    args.push(self.parse_ternary()?);
                }
                self.expect(&Token::RParen)?;
                if args.len() != func.arity() {
                    return Err(HistError::Expression(format!(
                        "function '{name}' takes {} argument(s), got {}",
                        func.arity(),
                        args.len()
                    )));
                }
                Ok(Expr::Call(func, args))
            }
            other => Err(HistError::Expression(format!(
                "expected number, identifier, or '(', got {:?}",
                other
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

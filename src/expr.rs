//! Formula engine for selections, weights, transforms and apply conditions.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), built-in functions (abs, sqrt, log, exp,
//! pow, min, max) and bracket-indexed identifiers (`name[i]`).
//!
//! A compiled formula only knows the *names* it references. Binding names to
//! concrete values is left to the caller, which passes a lookup closure indexed
//! by position in [`CompiledExpr::required_vars`].

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize),
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
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
}

impl Func {
    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

/// A compiled formula ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
    /// Identifiers referenced by the formula, ordered by first occurrence.
    /// Indexed identifiers keep their brackets (`"px[1]"`).
    pub required_vars: Vec<String>,
}

impl CompiledExpr {
    /// Parse and compile a formula string.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(AppError::Expression("empty formula".to_string()));
        }
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(AppError::Expression(format!(
                "unexpected token after expression in '{input}': {:?}",
                parser.tokens[parser.pos]
            )));
        }
        let vars = std::mem::take(&mut parser.vars);
        Ok(CompiledExpr {
            source: input.to_string(),
            ast,
            required_vars: vars,
        })
    }

    /// The formula text this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with values ordered like `required_vars`.
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval_expr(&self.ast, &|i| values[i])
    }

    /// Evaluate with a lookup from `required_vars` position to value.
    pub fn eval_with<F: Fn(usize) -> f64>(&self, lookup: F) -> f64 {
        eval_expr(&self.ast, &lookup)
    }

}

/// Split `name[i]` into `("name", Some(i))`. Names without a trailing index are
/// returned unchanged.
pub fn strip_bracket(name: &str) -> (&str, Option<usize>) {
    let trimmed = name.trim();
    if let Some(open) = trimmed.find('[')
        && trimmed.ends_with(']')
    {
        let base = &trimmed[..open];
        let inner = &trimmed[open + 1..trimmed.len() - 1];
        if let Ok(idx) = inner.trim().parse::<usize>() {
            return (base, Some(idx));
        }
    }
    (trimmed, None)
}

/// Formula truth value. NaN is false, so a cut on a missing element never
/// accepts.
pub fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn truth(v: bool) -> f64 {
    if v { 1.0 } else { 0.0 }
}

fn eval_expr(e: &Expr, vals: &dyn Fn(usize) -> f64) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => vals(*i),
        Expr::UnaryNeg(a) => -eval_expr(a, vals),
        Expr::UnaryNot(a) => truth(!truthy(eval_expr(a, vals))),
        // `&&` and `||` short-circuit.
        Expr::BinOp(BinOp::And, a, b) => {
            truth(truthy(eval_expr(a, vals)) && truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(BinOp::Or, a, b) => {
            truth(truthy(eval_expr(a, vals)) || truthy(eval_expr(b, vals)))
        }
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vals);
            let rhs = eval_expr(b, vals);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Eq => truth((lhs - rhs).abs() < f64::EPSILON),
                BinOp::Ne => truth((lhs - rhs).abs() >= f64::EPSILON),
                BinOp::Lt => truth(lhs < rhs),
                BinOp::Le => truth(lhs <= rhs),
                BinOp::Gt => truth(lhs > rhs),
                BinOp::Ge => truth(lhs >= rhs),
                BinOp::And | BinOp::Or => unreachable!("handled above"),
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
            }
        }
    }
}

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
                .map_err(|_| AppError::Expression(format!("invalid number: '{s}'")))?;
            tokens.push(Token::Num(n));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let mut ident: String = chars[start..i].iter().collect();

            // `name[3]` is a single identifier referencing element 3.
            if i < chars.len() && chars[i] == '[' {
                let close = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| AppError::Expression(format!("unclosed '[' after '{ident}'")))?;
                let inner: String = chars[i + 1..close].iter().collect();
                let idx: usize = inner.trim().parse().map_err(|_| {
                    AppError::Expression(format!("invalid array index '{inner}' for '{ident}'"))
                })?;
                ident = format!("{ident}[{idx}]");
                i = close + 1;
            }
            tokens.push(Token::Ident(ident));
            continue;
        }

        return Err(AppError::Expression(format!(
            "unexpected character '{c}' in '{input}'"
        )));
    }

    Ok(tokens)
}

// Grammar, loosest first: or, and, comparison, sum, product, unary, atom.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    vars: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            vars: Vec::new(),
        }
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
            other => Err(AppError::Expression(format!(
                "expected {expected:?}, got {other:?}"
            ))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.vars.iter().position(|b| b == name) {
            i
        } else {
            self.vars.push(name.to_string());
            self.vars.len() - 1
        }
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
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let func = match name.as_str() {
                        "abs" => Func::Abs,
                        "sqrt" => Func::Sqrt,
                        "log" => Func::Log,
                        "exp" => Func::Exp,
                        "pow" => Func::Pow,
                        "min" => Func::Min,
                        "max" => Func::Max,
                        _ => {
                            return Err(AppError::Expression(format!("unknown function: '{name}'")));
                        }
                    };
                    let mut args = vec![self.parse_or()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                    self.expect(&Token::RParen)?;
                    if args.len() != func.arity() {
                        return Err(AppError::Expression(format!(
                            "function '{name}' takes {} argument(s), got {}",
                            func.arity(),
                            args.len()
                        )));
                    }
                    Ok(Expr::Call(func, args))
                } else {
                    let idx = self.resolve_var(&name);
                    Ok(Expr::Var(idx))
                }
            }
            other => Err(AppError::Expression(format!(
                "expected number, identifier, or '(', got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_precedence() {
        let e = CompiledExpr::compile("2 + 3 * 4").unwrap();
        assert!(e.required_vars.is_empty());
        assert!((e.eval_row(&[]) - 14.0).abs() < 1e-12);
    }

    #[test]
    fn selection_with_variables() {
        let e = CompiledExpr::compile("nJets >= 2 && Enu > 0.3").unwrap();
        assert_eq!(e.required_vars, vec!["nJets", "Enu"]);
        assert_eq!(e.eval_row(&[2.0, 0.5]), 1.0);
        assert_eq!(e.eval_row(&[1.0, 0.5]), 0.0);
    }

    #[test]
    fn indexed_identifiers_are_kept_whole() {
        let e = CompiledExpr::compile("px[0]*px[0] + px[1]*px[1]").unwrap();
        assert_eq!(e.required_vars, vec!["px[0]", "px[1]"]);
        assert!((e.eval_row(&[3.0, 4.0]) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn functions_check_arity() {
        let e = CompiledExpr::compile("pow(x, 2)").unwrap();
        assert!((e.eval_row(&[3.0]) - 9.0).abs() < 1e-12);
        assert!(CompiledExpr::compile("pow(x)").is_err());
        assert!(CompiledExpr::compile("foo(x)").is_err());
    }

    #[test]
    fn negation_and_not() {
        let e = CompiledExpr::compile("!(x > 3) || -x > 0").unwrap();
        assert_eq!(e.eval_row(&[2.0]), 1.0);
        assert_eq!(e.eval_row(&[5.0]), 0.0);
    }

    #[test]
    fn eval_with_lookup() {
        let e = CompiledExpr::compile("a / b").unwrap();
        let values = [10.0, 4.0];
        assert!((e.eval_with(|i| values[i]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn strip_bracket_splits_index() {
        assert_eq!(strip_bracket("weights[3]"), ("weights", Some(3)));
        assert_eq!(strip_bracket("Enu"), ("Enu", None));
        assert_eq!(strip_bracket("bad[x]"), ("bad[x]", None));
    }

    #[test]
    fn rejects_garbage() {
        assert!(CompiledExpr::compile("").is_err());
        assert!(CompiledExpr::compile("x $ 2").is_err());
        assert!(CompiledExpr::compile("(x + 1").is_err());
        assert!(CompiledExpr::compile("x[").is_err());
    }

    #[test]
    fn nan_is_false_in_boolean_context() {
        assert!(!truthy(f64::NAN));
        assert!(!truthy(0.0));
        assert!(truthy(-2.0));
        let e = CompiledExpr::compile("flag && x > 0").unwrap();
        assert_eq!(e.eval_row(&[f64::NAN, 1.0]), 0.0);
        let not = CompiledExpr::compile("!flag").unwrap();
        assert_eq!(not.eval_row(&[f64::NAN]), 1.0);
    }
}

//! Arithmetic mini-grammar used by the `eval` resolver
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary)*
//! unary   := ("+" | "-")* primary
//! primary := NUMBER | "(" expr ")"
//! ```
//!
//! Integer operands stay integral under `+ - *` (overflow is an error).
//! `/` always produces a float.

use std::fmt;
use std::iter::Peekable;

use thiserror::Error;

use crate::stack::ensure_sufficient_stack;
use crate::value::Value;

/// Failures of the arithmetic grammar
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArithError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("unexpected '{token}' at offset {offset}")]
    UnexpectedToken { token: String, offset: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected ')' at offset {offset}")]
    ExpectedClosingParen { offset: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
}

/// Result of an arithmetic evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Integer(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(x) => write!(f, "{}", x),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{}", n),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(Number),
    Neg(Box<Expr>),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
}

type ParseResult<T> = Result<T, ArithError>;

fn tokenize(input: &str) -> ParseResult<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                tokens.push((lex_number(input, &mut chars)?, offset));
                continue;
            }
            ch => return Err(ArithError::UnexpectedChar { ch, offset }),
        };
        chars.next();
        tokens.push((token, offset));
    }

    Ok(tokens)
}

fn lex_number<I>(input: &str, chars: &mut Peekable<I>) -> ParseResult<Token>
where
    I: Iterator<Item = (usize, char)>,
{
    let Some(&(start, _)) = chars.peek() else {
        return Err(ArithError::UnexpectedEnd);
    };
    let mut end = start;
    let mut is_float = false;
    let mut prev = '\0';

    while let Some(&(i, c)) = chars.peek() {
        let accept = c.is_ascii_digit()
            || c == '.'
            || c == 'e'
            || c == 'E'
            || ((c == '+' || c == '-') && (prev == 'e' || prev == 'E'));
        if !accept {
            break;
        }
        if !c.is_ascii_digit() {
            is_float = true;
        }
        prev = c;
        end = i + c.len_utf8();
        chars.next();
    }

    let text = &input[start..end];
    let invalid = || ArithError::InvalidNumber {
        text: text.to_string(),
        offset: start,
    };
    if is_float {
        text.parse::<f64>()
            .map(|f| Token::Num(Number::Float(f)))
            .map_err(|_| invalid())
    } else {
        text.parse::<i64>()
            .map(|i| Token::Num(Number::Int(i)))
            .map_err(|_| invalid())
    }
}

fn unexpected(token: Option<&(Token, usize)>) -> ArithError {
    match token {
        Some((t, offset)) => ArithError::UnexpectedToken {
            token: t.to_string(),
            offset: *offset,
        },
        None => ArithError::UnexpectedEnd,
    }
}

/// `expr := term (("+" | "-") term)*`
fn parse_additive<'a, I>(tokens: &mut Peekable<I>) -> ParseResult<Expr>
where
    I: Iterator<Item = &'a (Token, usize)>,
{
    let mut left = parse_multiplicative(tokens)?;
    while let Some(op) = tokens.peek().and_then(|(t, _)| match t {
        Token::Plus => Some(BinaryOperator::Add),
        Token::Minus => Some(BinaryOperator::Sub),
        _ => None,
    }) {
        tokens.next();
        let right = parse_multiplicative(tokens)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }
    Ok(left)
}

/// `term := unary (("*" | "/") unary)*`
fn parse_multiplicative<'a, I>(tokens: &mut Peekable<I>) -> ParseResult<Expr>
where
    I: Iterator<Item = &'a (Token, usize)>,
{
    let mut left = parse_unary(tokens)?;
    while let Some(op) = tokens.peek().and_then(|(t, _)| match t {
        Token::Star => Some(BinaryOperator::Mul),
        Token::Slash => Some(BinaryOperator::Div),
        _ => None,
    }) {
        tokens.next();
        let right = parse_unary(tokens)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }
    Ok(left)
}

/// `unary := ("+" | "-")* primary`; a run of signs folds to one negation or none
fn parse_unary<'a, I>(tokens: &mut Peekable<I>) -> ParseResult<Expr>
where
    I: Iterator<Item = &'a (Token, usize)>,
{
    let mut negate = false;
    while let Some((sign, _)) = tokens.next_if(|(t, _)| matches!(t, Token::Plus | Token::Minus)) {
        if *sign == Token::Minus {
            negate = !negate;
        }
    }

    let primary = parse_primary(tokens)?;
    Ok(if negate {
        Expr::Neg(Box::new(primary))
    } else {
        primary
    })
}

fn parse_primary<'a, I>(tokens: &mut Peekable<I>) -> ParseResult<Expr>
where
    I: Iterator<Item = &'a (Token, usize)>,
{
    match tokens.next() {
        Some((Token::Num(n), _)) => Ok(Expr::Num(*n)),
        Some((Token::LParen, offset)) => {
            let inner = ensure_sufficient_stack(|| parse_additive(tokens))?;
            match tokens.next() {
                Some((Token::RParen, _)) => Ok(inner),
                Some((_, offset)) => Err(ArithError::ExpectedClosingParen { offset: *offset }),
                None => Err(ArithError::ExpectedClosingParen { offset: *offset }),
            }
        }
        other => Err(unexpected(other)),
    }
}

fn apply(op: BinaryOperator, left: Number, right: Number) -> Result<Number, ArithError> {
    use Number::{Float, Int};

    match (op, left, right) {
        (BinaryOperator::Div, _, r) if r.as_f64() == 0.0 => Err(ArithError::DivisionByZero),
        (BinaryOperator::Div, l, r) => Ok(Float(l.as_f64() / r.as_f64())),
        (BinaryOperator::Add, Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or(ArithError::Overflow),
        (BinaryOperator::Sub, Int(a), Int(b)) => a.checked_sub(b).map(Int).ok_or(ArithError::Overflow),
        (BinaryOperator::Mul, Int(a), Int(b)) => a.checked_mul(b).map(Int).ok_or(ArithError::Overflow),
        (BinaryOperator::Add, l, r) => Ok(Float(l.as_f64() + r.as_f64())),
        (BinaryOperator::Sub, l, r) => Ok(Float(l.as_f64() - r.as_f64())),
        (BinaryOperator::Mul, l, r) => Ok(Float(l.as_f64() * r.as_f64())),
    }
}

fn eval_expr(expr: &Expr) -> Result<Number, ArithError> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Neg(inner) => match eval_expr(inner)? {
            Number::Int(i) => i.checked_neg().map(Number::Int).ok_or(ArithError::Overflow),
            Number::Float(f) => Ok(Number::Float(-f)),
        },
        Expr::BinaryOp { left, op, right } => apply(*op, eval_expr(left)?, eval_expr(right)?),
    }
}

/// Parse and evaluate an arithmetic expression
pub fn evaluate(input: &str) -> Result<Number, ArithError> {
    let tokens = tokenize(input)?;
    let mut iter = tokens.iter().peekable();
    let expr = parse_additive(&mut iter)?;
    if let Some(trailing) = iter.next() {
        return Err(unexpected(Some(trailing)));
    }
    eval_expr(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("2+3*4"), Ok(Number::Int(14)));
        assert_eq!(evaluate("(2+3)*4"), Ok(Number::Int(20)));
        assert_eq!(evaluate("10 - 4 - 3"), Ok(Number::Int(3)));
    }

    #[test]
    fn test_division_is_float() {
        assert_eq!(evaluate("7/2"), Ok(Number::Float(3.5)));
        assert_eq!(evaluate("8/4"), Ok(Number::Float(2.0)));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(evaluate("1/0"), Err(ArithError::DivisionByZero));
        assert_eq!(evaluate("1/(2-2.0)"), Err(ArithError::DivisionByZero));
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(evaluate("5e-4*2"), Ok(Number::Float(1e-3)));
        assert_eq!(evaluate("0.5 + 1"), Ok(Number::Float(1.5)));
        assert_eq!(evaluate("2E+1"), Ok(Number::Float(20.0)));
    }

    #[test]
    fn test_unary_operators() {
        assert_eq!(evaluate("-3 + 5"), Ok(Number::Int(2)));
        assert_eq!(evaluate("-(2*3)"), Ok(Number::Int(-6)));
        assert_eq!(evaluate("+4"), Ok(Number::Int(4)));
        assert_eq!(evaluate("2--1"), Ok(Number::Int(3)));
    }

    #[test]
    fn test_long_sign_runs_and_nesting() {
        let signs = "-".repeat(100_001);
        assert_eq!(evaluate(&format!("{}5", signs)), Ok(Number::Int(-5)));
        assert_eq!(evaluate(&format!("{}5", "-".repeat(100_000))), Ok(Number::Int(5)));
        assert_eq!(evaluate(&format!("3 {}2", "+-".repeat(50_000))), Ok(Number::Int(5)));

        let depth = 5_000;
        let nested = format!("{}7{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(evaluate(&nested), Ok(Number::Int(7)));
    }

    #[test]
    fn test_overflow() {
        assert_eq!(
            evaluate("9223372036854775807 + 1"),
            Err(ArithError::Overflow)
        );
    }

    #[test]
    fn test_malformed() {
        assert_eq!(evaluate(""), Err(ArithError::UnexpectedEnd));
        assert_eq!(evaluate("2 +"), Err(ArithError::UnexpectedEnd));
        assert_eq!(
            evaluate("2 x 3"),
            Err(ArithError::UnexpectedChar { ch: 'x', offset: 2 })
        );
        assert_eq!(
            evaluate("(1 + 2"),
            Err(ArithError::ExpectedClosingParen { offset: 0 })
        );
        assert_eq!(
            evaluate("1 2"),
            Err(ArithError::UnexpectedToken {
                token: "2".into(),
                offset: 2
            })
        );
        assert!(matches!(
            evaluate("1.2.3"),
            Err(ArithError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ArithError::UnexpectedChar { ch: '%', offset: 4 }.to_string(),
            "unexpected character '%' at offset 4"
        );
    }
}

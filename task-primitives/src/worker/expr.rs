// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A tiny arithmetic/string expression language, evaluated on the child side of a
//! [`super::Worker`]. Supports integer/float arithmetic, string literals, and two
//! built-in calls: `error("message")` raises, `abort()` terminates the process
//! immediately (used to exercise the crash/[`super::WorkerError::Terminated`] path).

use nom::{
    Finish, IResult, Parser,
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{char, digit1, multispace0, none_of},
    combinator::{map, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded},
};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Str(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Errors raised while parsing or evaluating an [`eval`] call.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("could not parse expression: {0}")]
    Parse(String),

    #[error("{0}")]
    Raised(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// A sentinel error variant signalling the process should abort immediately rather than
/// return a [`Response`](super::protocol::Response) - used only by the `abort()`
/// built-in.
pub struct AbortRequested;

/// Evaluates `source`, returning either its value or an [`EvalError`]. Returns
/// `Ok(Err(AbortRequested))`'s caller-visible equivalent via [`Outcome`].
pub fn eval(source: &str) -> Outcome {
    let expr = match parse(source) {
        Ok(expr) => expr,
        Err(e) => return Outcome::Error(EvalError::Parse(e)),
    };
    eval_expr(&expr)
}

/// Result of evaluating an expression: a value, a raised error, or a request to abort
/// the process (the child's `main` acts on this directly, never serializing a
/// response).
pub enum Outcome {
    Value(JsonValue),
    Error(EvalError),
    Abort,
}

fn eval_expr(expr: &Expr) -> Outcome {
    match expr {
        Expr::Num(n) => Outcome::Value(serde_json::Number::from_f64(*n).map_or(JsonValue::Null, JsonValue::Number)),
        Expr::Str(s) => Outcome::Value(JsonValue::String(s.clone())),
        Expr::Neg(inner) => match eval_expr(inner) {
            Outcome::Value(JsonValue::Number(n)) => {
                let n = -n.as_f64().unwrap_or(0.0);
                Outcome::Value(serde_json::Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number))
            }
            other => other,
        },
        Expr::Add(a, b) => numeric_binop(a, b, |x, y| Ok(x + y)),
        Expr::Sub(a, b) => numeric_binop(a, b, |x, y| Ok(x - y)),
        Expr::Mul(a, b) => numeric_binop(a, b, |x, y| Ok(x * y)),
        Expr::Div(a, b) => numeric_binop(a, b, |x, y| if y == 0.0 { Err(EvalError::DivisionByZero) } else { Ok(x / y) }),
        Expr::Call(name, args) => eval_call(name, args),
    }
}

fn numeric_binop(a: &Expr, b: &Expr, op: impl FnOnce(f64, f64) -> Result<f64, EvalError>) -> Outcome {
    let a = match eval_expr(a) {
        Outcome::Value(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        other => return other,
    };
    let b = match eval_expr(b) {
        Outcome::Value(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        other => return other,
    };
    match op(a, b) {
        Ok(result) => Outcome::Value(serde_json::Number::from_f64(result).map_or(JsonValue::Null, JsonValue::Number)),
        Err(e) => Outcome::Error(e),
    }
}

fn eval_call(name: &str, args: &[Expr]) -> Outcome {
    match name {
        "error" => match args.first().map(eval_expr) {
            Some(Outcome::Value(JsonValue::String(message))) => Outcome::Error(EvalError::Raised(message)),
            Some(Outcome::Value(other)) => Outcome::Error(EvalError::Raised(other.to_string())),
            Some(other) => other,
            None => Outcome::Error(EvalError::Raised(String::new())),
        },
        "abort" => Outcome::Abort,
        other => Outcome::Error(EvalError::UnknownFunction(other.to_owned())),
    }
}

fn parse(source: &str) -> Result<Expr, String> {
    let (rest, expr) = delimited(multispace0, parse_additive, multispace0)
        .parse(source)
        .finish()
        .map_err(|e: nom::error::Error<&str>| e.to_string())?;
    if !rest.is_empty() {
        return Err(format!("unexpected trailing input: {rest:?}"));
    }
    Ok(expr)
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_multiplicative(input)?;
    let (input, rest) = nom::multi::many0(pair(
        delimited(multispace0, alt((char('+'), char('-'))), multispace0),
        parse_multiplicative,
    ))
    .parse(input)?;
    let expr = rest.into_iter().fold(first, |acc, (op, rhs)| {
        if op == '+' { Expr::Add(Box::new(acc), Box::new(rhs)) } else { Expr::Sub(Box::new(acc), Box::new(rhs)) }
    });
    Ok((input, expr))
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = nom::multi::many0(pair(
        delimited(multispace0, alt((char('*'), char('/'))), multispace0),
        parse_unary,
    ))
    .parse(input)?;
    let expr = rest.into_iter().fold(first, |acc, (op, rhs)| {
        if op == '*' { Expr::Mul(Box::new(acc), Box::new(rhs)) } else { Expr::Div(Box::new(acc), Box::new(rhs)) }
    });
    Ok((input, expr))
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(pair(char('-'), multispace0), parse_unary), |e| Expr::Neg(Box::new(e))),
        parse_primary,
    ))
    .parse(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    delimited(
        multispace0,
        alt((parse_call, parse_number, parse_string, parse_parenthesized)),
        multispace0,
    )
    .parse(input)
}

fn parse_parenthesized(input: &str) -> IResult<&str, Expr> {
    delimited(char('('), delimited(multispace0, parse_additive, multispace0), char(')')).parse(input)
}

fn parse_number(input: &str) -> IResult<&str, Expr> {
    map(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |s: &str| Expr::Num(s.parse().unwrap_or(0.0)),
    )
    .parse(input)
}

fn parse_string(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            char('"'),
            opt(escaped_transform(
                none_of("\"\\"),
                '\\',
                alt((value("\\", tag("\\")), value("\"", tag("\"")), value("\n", tag("n")))),
            )),
            char('"'),
        ),
        |s: Option<String>| Expr::Str(s.unwrap_or_default()),
    )
    .parse(input)
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(nom::multi::many1(alt((nom::character::complete::alpha1, tag("_")))))(input)
}

fn parse_call(input: &str) -> IResult<&str, Expr> {
    map(
        pair(
            parse_identifier,
            delimited(
                char('('),
                separated_list0(delimited(multispace0, char(','), multispace0), parse_additive),
                preceded(multispace0, char(')')),
            ),
        ),
        |(name, args)| Expr::Call(name.to_owned(), args),
    )
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_ok(src: &str) -> JsonValue {
        match eval(src) {
            Outcome::Value(v) => v,
            Outcome::Error(e) => panic!("unexpected eval error for {src:?}: {e}"),
            Outcome::Abort => panic!("unexpected abort for {src:?}"),
        }
    }

    #[test]
    fn evaluates_arithmetic() {
        assert_eq!(eval_ok("1+2"), JsonValue::from(3.0));
        assert_eq!(eval_ok("2 * (3 + 4)"), JsonValue::from(14.0));
        assert_eq!(eval_ok("-5 + 2"), JsonValue::from(-3.0));
    }

    #[test]
    fn evaluates_string_literals() {
        assert_eq!(eval_ok(r#""hello""#), JsonValue::from("hello"));
    }

    #[test]
    fn error_call_raises_with_the_given_message() {
        match eval(r#"error("oops")"#) {
            Outcome::Error(EvalError::Raised(message)) => assert_eq!(message, "oops"),
            Outcome::Value(_) => panic!("expected a raised error, got a value"),
            Outcome::Abort => panic!("expected a raised error, got an abort request"),
            Outcome::Error(other) => panic!("expected Raised, got a different error: {other}"),
        }
    }

    #[test]
    fn abort_call_requests_process_abort() {
        assert!(matches!(eval("abort()"), Outcome::Abort));
    }

    #[test]
    fn division_by_zero_is_an_eval_error_not_a_panic() {
        assert!(matches!(eval("1/0"), Outcome::Error(EvalError::DivisionByZero)));
    }
}

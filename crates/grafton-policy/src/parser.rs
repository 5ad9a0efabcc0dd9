//! Rule text to [`Expr`], with `nom`.
//!
//! Precedence, loosest first: `?:`, `||`, `&&`, relations (`< <= > >= == != in`),
//! `+ -`, `* / %`, unary `! -`, member access and calls.

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag};
use nom::character::complete::{alpha1, alphanumeric1, char as pchar, digit1, multispace0, satisfy};
use nom::combinator::{all_consuming, map, map_res, not, opt, recognize, value};
use nom::error::{Error, ErrorKind};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::IResult;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{PolicyError, PolicyResult};
use crate::value::Value;

type Res<'a, T> = IResult<&'a str, T>;

/// Parse a complete rule.
pub fn parse(source: &str) -> PolicyResult<Expr> {
    match all_consuming(terminated(expr, multispace0))(source) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(err) | nom::Err::Failure(err)) => Err(PolicyError::Parse {
            offset: source.len() - err.input.len(),
            message: format!("unexpected input {:?}", snippet(err.input)),
        }),
        Err(nom::Err::Incomplete(_)) => Err(PolicyError::Parse {
            offset: source.len(),
            message: "unexpected end of input".into(),
        }),
    }
}

fn snippet(rest: &str) -> &str {
    let rest = rest.trim_start();
    if rest.is_empty() {
        return "<end>";
    }
    match rest.char_indices().nth(16) {
        Some((end, _)) => &rest[..end],
        None => rest,
    }
}

fn sym<'a>(token: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    preceded(multispace0, tag(token))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    terminated(sym(word), not(satisfy(is_ident_char)))
}

fn identifier(input: &str) -> Res<'_, &str> {
    preceded(
        multispace0,
        recognize(pair(alt((alpha1, tag("_"))), many0(alt((alphanumeric1, tag("_")))))),
    )(input)
}

fn expr(input: &str) -> Res<'_, Expr> {
    let (input, condition) = or_expr(input)?;
    let (input, branches) = opt(pair(preceded(sym("?"), expr), preceded(sym(":"), expr)))(input)?;
    let parsed = match branches {
        Some((then, otherwise)) => {
            Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise))
        }
        None => condition,
    };
    Ok((input, parsed))
}

fn left_assoc<'a>(
    input: &'a str,
    operand: fn(&'a str) -> Res<'a, Expr>,
    operator: impl FnMut(&'a str) -> Res<'a, BinaryOp>,
) -> Res<'a, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(operator, operand))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |lhs, (op, rhs)| Expr::binary(op, lhs, rhs));
    Ok((input, folded))
}

fn or_expr(input: &str) -> Res<'_, Expr> {
    left_assoc(input, and_expr, value(BinaryOp::Or, sym("||")))
}

fn and_expr(input: &str) -> Res<'_, Expr> {
    left_assoc(input, relation, value(BinaryOp::And, sym("&&")))
}

fn relation(input: &str) -> Res<'_, Expr> {
    left_assoc(
        input,
        additive,
        alt((
            value(BinaryOp::Le, sym("<=")),
            value(BinaryOp::Ge, sym(">=")),
            value(BinaryOp::Eq, sym("==")),
            value(BinaryOp::Ne, sym("!=")),
            value(BinaryOp::Lt, sym("<")),
            value(BinaryOp::Gt, sym(">")),
            value(BinaryOp::In, keyword("in")),
        )),
    )
}

fn additive(input: &str) -> Res<'_, Expr> {
    left_assoc(
        input,
        multiplicative,
        alt((value(BinaryOp::Add, sym("+")), value(BinaryOp::Sub, sym("-")))),
    )
}

fn multiplicative(input: &str) -> Res<'_, Expr> {
    left_assoc(
        input,
        unary,
        alt((
            value(BinaryOp::Mul, sym("*")),
            value(BinaryOp::Div, sym("/")),
            value(BinaryOp::Rem, sym("%")),
        )),
    )
}

fn unary(input: &str) -> Res<'_, Expr> {
    alt((
        map(preceded(sym("!"), unary), |e| Expr::unary(UnaryOp::Not, e)),
        map(preceded(sym("-"), unary), |e| Expr::unary(UnaryOp::Neg, e)),
        member,
    ))(input)
}

fn member(input: &str) -> Res<'_, Expr> {
    let (input, base) = primary(input)?;
    let (input, suffixes) = many0(preceded(sym("."), pair(identifier, opt(call_args))))(input)?;
    let folded = suffixes
        .into_iter()
        .fold(base, |operand, (name, args)| match args {
            Some(args) => Expr::Method(Box::new(operand), name.to_string(), args),
            None => Expr::Select(Box::new(operand), name.to_string()),
        });
    Ok((input, folded))
}

fn call_args(input: &str) -> Res<'_, Vec<Expr>> {
    delimited(sym("("), separated_list0(sym(","), expr), sym(")"))(input)
}

fn primary(input: &str) -> Res<'_, Expr> {
    alt((
        delimited(sym("("), expr, sym(")")),
        map(delimited(sym("["), separated_list0(sym(","), expr), sym("]")), Expr::List),
        map(string_literal, |s| Expr::Literal(Value::String(s))),
        map(int_literal, |i| Expr::Literal(Value::Int(i))),
        name_or_call,
    ))(input)
}

fn int_literal(input: &str) -> Res<'_, i64> {
    preceded(multispace0, map_res(digit1, |digits: &str| digits.parse::<i64>()))(input)
}

fn string_literal(input: &str) -> Res<'_, String> {
    preceded(
        multispace0,
        delimited(
            pchar('"'),
            map(
                opt(escaped_transform(
                    is_not("\"\\"),
                    '\\',
                    alt((
                        value("\\", tag("\\")),
                        value("\"", tag("\"")),
                        value("\n", tag("n")),
                        value("\r", tag("r")),
                        value("\t", tag("t")),
                    )),
                )),
                Option::unwrap_or_default,
            ),
            pchar('"'),
        ),
    )(input)
}

fn name_or_call(input: &str) -> Res<'_, Expr> {
    let (rest, name) = identifier(input)?;
    match name {
        "true" => Ok((rest, Expr::Literal(Value::Bool(true)))),
        "false" => Ok((rest, Expr::Literal(Value::Bool(false)))),
        "null" => Ok((rest, Expr::Literal(Value::Null))),
        "in" => Err(nom::Err::Error(Error::new(input, ErrorKind::Tag))),
        _ => {
            let (rest, args) = opt(call_args)(rest)?;
            let parsed = match args {
                Some(args) => Expr::Call(name.to_string(), args),
                None => Expr::Ident(name.to_string()),
            };
            Ok((rest, parsed))
        }
    }
}

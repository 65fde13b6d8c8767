//! Parameter expressions used for widths and sizes inside custom definitions.
//!
//! A property such as `bitWidth` may be a plain integer or an expression
//! over declared parameters: `$WIDTH`, `$WIDTH*2`, `($N+1)/2`.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, one_of, space0},
    combinator::{all_consuming, map, map_res, recognize},
    multi::{fold_many0, many0},
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CircuitError, Result};

/// Bound parameter values, keyed by name without the `$` sigil.
pub type ParamEnv = BTreeMap<String, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamExpr {
    Literal(i64),
    Symbol(String),
    Binary(Box<ParamExpr>, ParamOp, Box<ParamExpr>),
}

impl ParamExpr {
    pub fn parse(text: &str) -> Result<Self> {
        match all_consuming(expr)(text.trim()) {
            Ok((_, parsed)) => Ok(parsed),
            Err(e) => Err(CircuitError::Expression(format!(
                "invalid parameter expression '{}': {}",
                text, e
            ))),
        }
    }

    pub fn eval(&self, env: &ParamEnv) -> Result<i64> {
        match self {
            ParamExpr::Literal(v) => Ok(*v),
            ParamExpr::Symbol(name) => env.get(name).copied().ok_or_else(|| {
                CircuitError::UnknownParameter {
                    symbol: name.clone(),
                    context: format!("expression '{}'", self),
                }
            }),
            ParamExpr::Binary(lhs, op, rhs) => {
                let a = lhs.eval(env)?;
                let b = rhs.eval(env)?;
                match op {
                    ParamOp::Add => Ok(a.saturating_add(b)),
                    ParamOp::Sub => Ok(a.saturating_sub(b)),
                    ParamOp::Mul => Ok(a.saturating_mul(b)),
                    ParamOp::Div => {
                        if b == 0 {
                            Err(CircuitError::InvalidParameter {
                                name: self.to_string(),
                                context: "parameter expression".into(),
                                reason: "division by zero".into(),
                            })
                        } else {
                            Ok(a / b)
                        }
                    }
                }
            }
        }
    }

    /// Every `$symbol` referenced by this expression, in source order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ParamExpr::Literal(_) => {}
            ParamExpr::Symbol(name) => out.push(name.as_str()),
            ParamExpr::Binary(lhs, _, rhs) => {
                lhs.collect_symbols(out);
                rhs.collect_symbols(out);
            }
        }
    }
}

impl From<i64> for ParamExpr {
    fn from(value: i64) -> Self {
        ParamExpr::Literal(value)
    }
}

impl fmt::Display for ParamExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamExpr::Literal(v) => write!(f, "{}", v),
            ParamExpr::Symbol(name) => write!(f, "${}", name),
            ParamExpr::Binary(lhs, op, rhs) => {
                let op = match op {
                    ParamOp::Add => '+',
                    ParamOp::Sub => '-',
                    ParamOp::Mul => '*',
                    ParamOp::Div => '/',
                };
                write!(f, "({}{}{})", lhs, op, rhs)
            }
        }
    }
}

impl Serialize for ParamExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ParamExpr::Literal(v) => serializer.serialize_i64(*v),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ParamExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(ParamExpr::Literal(v)),
            Raw::Text(text) => ParamExpr::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}

// Grammar: expr := term (('+'|'-') term)* ; term := factor (('*'|'/') factor)*
fn expr(input: &str) -> IResult<&str, ParamExpr> {
    let (input, init) = term(input)?;
    fold_many0(
        pair(delimited(space0, one_of("+-"), space0), term),
        move || init.clone(),
        |acc, (op, rhs)| {
            let op = if op == '+' { ParamOp::Add } else { ParamOp::Sub };
            ParamExpr::Binary(Box::new(acc), op, Box::new(rhs))
        },
    )(input)
}

fn term(input: &str) -> IResult<&str, ParamExpr> {
    let (input, init) = factor(input)?;
    fold_many0(
        pair(delimited(space0, one_of("*/"), space0), factor),
        move || init.clone(),
        |acc, (op, rhs)| {
            let op = if op == '*' { ParamOp::Mul } else { ParamOp::Div };
            ParamExpr::Binary(Box::new(acc), op, Box::new(rhs))
        },
    )(input)
}

fn factor(input: &str) -> IResult<&str, ParamExpr> {
    delimited(
        space0,
        alt((
            map(map_res(digit1, str::parse::<i64>), ParamExpr::Literal),
            map(preceded(char('$'), identifier), |name: &str| {
                ParamExpr::Symbol(name.to_string())
            }),
            delimited(char('('), expr, char(')')),
        )),
        space0,
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

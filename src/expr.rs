//! Boolean/compare expressions over named signal values.
//!
//! Used for breakpoint conditions (`clk != 0 && count == 0x0f`) and for
//! FSM transition guards (`in0 == 1`). Values are unsigned; any nonzero
//! result is true.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, hex_digit1, satisfy, space0},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use std::fmt;

use crate::error::{CircuitError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(u64),
    Signal(String),
    Not(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

impl Expr {
    pub fn parse(text: &str) -> Result<Self> {
        match all_consuming(or_expr)(text.trim()) {
            Ok((_, expr)) => Ok(expr),
            Err(e) => Err(CircuitError::Expression(format!(
                "cannot parse '{}': {}",
                text, e
            ))),
        }
    }

    /// Evaluate against `lookup`, which maps a signal name to its value.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<u64>) -> Result<u64> {
        match self {
            Expr::Const(v) => Ok(*v),
            Expr::Signal(name) => lookup(name)
                .ok_or_else(|| CircuitError::Expression(format!("unknown signal '{}'", name))),
            Expr::Not(inner) => Ok((inner.eval(lookup)? == 0) as u64),
            Expr::Binary(lhs, BinOp::And, rhs) => {
                Ok((lhs.eval(lookup)? != 0 && rhs.eval(lookup)? != 0) as u64)
            }
            Expr::Binary(lhs, BinOp::Or, rhs) => {
                Ok((lhs.eval(lookup)? != 0 || rhs.eval(lookup)? != 0) as u64)
            }
            Expr::Binary(lhs, op, rhs) => {
                let a = lhs.eval(lookup)?;
                let b = rhs.eval(lookup)?;
                let result = match op {
                    BinOp::Eq => a == b,
                    BinOp::Ne => a != b,
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    BinOp::Ge => a >= b,
                    BinOp::And | BinOp::Or => unreachable!("handled above"),
                };
                Ok(result as u64)
            }
        }
    }

    pub fn is_true(&self, lookup: &dyn Fn(&str) -> Option<u64>) -> Result<bool> {
        Ok(self.eval(lookup)? != 0)
    }

    /// Signal names referenced, in source order, duplicates included.
    pub fn signals(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Const(_) => {}
            Expr::Signal(name) => out.push(name),
            Expr::Not(inner) => inner.collect(out),
            Expr::Binary(lhs, _, rhs) => {
                lhs.collect(out);
                rhs.collect(out);
            }
        }
    }

    /// Render with signal names rewritten by `rename`; the output is valid
    /// Verilog expression syntax.
    pub fn render(&self, rename: &dyn Fn(&str) -> String) -> String {
        match self {
            Expr::Const(v) => format!("{}", v),
            Expr::Signal(name) => rename(name),
            Expr::Not(inner) => format!("!({})", inner.render(rename)),
            Expr::Binary(lhs, op, rhs) => format!(
                "({} {} {})",
                lhs.render(rename),
                op.symbol(),
                rhs.render(rename)
            ),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&|name| name.to_string()))
    }
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(space0, inner, space0)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), and_expr))(input)?;
    Ok((input, fold(first, rest, BinOp::Or)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = cmp_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), cmp_expr))(input)?;
    Ok((input, fold(first, rest, BinOp::And)))
}

fn fold(first: Expr, rest: Vec<Expr>, op: BinOp) -> Expr {
    rest.into_iter()
        .fold(first, |acc, rhs| Expr::Binary(Box::new(acc), op, Box::new(rhs)))
}

fn cmp_expr(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = unary(input)?;
    let (input, tail) = opt(pair(ws(compare_op), unary))(input)?;
    Ok((
        input,
        match tail {
            Some((op, rhs)) => Expr::Binary(Box::new(lhs), op, Box::new(rhs)),
            None => lhs,
        },
    ))
}

fn compare_op(input: &str) -> IResult<&str, BinOp> {
    alt((
        map(tag("=="), |_| BinOp::Eq),
        map(tag("!="), |_| BinOp::Ne),
        map(tag("<="), |_| BinOp::Le),
        map(tag(">="), |_| BinOp::Ge),
        map(tag("<"), |_| BinOp::Lt),
        map(tag(">"), |_| BinOp::Gt),
    ))(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('!')), unary), |e| Expr::Not(Box::new(e))),
        atom,
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(number, Expr::Const),
        map(signal_name, |s: &str| Expr::Signal(s.to_string())),
        delimited(char('('), or_expr, char(')')),
    )))(input)
}

fn number(input: &str) -> IResult<&str, u64> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |s: &str| u64::from_str_radix(s, 16)),
        map_res(
            preceded(tag_no_case("0b"), take_while1(|c: char| c == '0' || c == '1')),
            |s: &str| u64::from_str_radix(s, 2),
        ),
        map_res(digit1, str::parse::<u64>),
    ))(input)
}

// component ids may contain '-', and `comp.port` addresses a single port
fn signal_name(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        opt(pair(
            char('.'),
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        )),
    )))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval(text: &str, values: &[(&str, u64)]) -> Result<u64> {
        let map: HashMap<String, u64> = values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Expr::parse(text)?.eval(&|name| map.get(name).copied())
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("signal!=0", &[("signal", 1)]).unwrap(), 1);
        assert_eq!(eval("signal != 0", &[("signal", 0)]).unwrap(), 0);
        assert_eq!(eval("a <= 0x10", &[("a", 16)]).unwrap(), 1);
        assert_eq!(eval("a > 0b11", &[("a", 3)]).unwrap(), 0);
    }

    #[test]
    fn test_logic_precedence() {
        // && binds tighter than ||
        assert_eq!(eval("a==1 || b==1 && c==1", &[("a", 1), ("b", 0), ("c", 0)]).unwrap(), 1);
        assert_eq!(eval("(a==1 || b==1) && c==1", &[("a", 1), ("b", 0), ("c", 0)]).unwrap(), 0);
        assert_eq!(eval("!a", &[("a", 0)]).unwrap(), 1);
        assert_eq!(eval("!(a == 2)", &[("a", 2)]).unwrap(), 0);
    }

    #[test]
    fn test_port_and_dashed_names() {
        let e = Expr::parse("ram1.data == 0x5a && in-1").unwrap();
        assert_eq!(e.signals(), vec!["ram1.data", "in-1"]);
    }

    #[test]
    fn test_unknown_signal_is_error() {
        assert!(eval("ghost == 1", &[]).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("a ==").is_err());
        assert!(Expr::parse("(a").is_err());
        assert!(Expr::parse("").is_err());
    }

    #[test]
    fn test_render() {
        let e = Expr::parse("a==1 && !b").unwrap();
        assert_eq!(e.render(&|n| format!("s_{}", n)), "((s_a == 1) && !(s_b))");
    }
}

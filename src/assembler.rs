//! Line-based assembler feeding ROM/RAM contents.
//!
//! An [`Assembler`] is an ordered list of [`Rule`]s. Each source line, with
//! comments stripped, must match one rule's pattern in full; the first
//! matching rule encodes it into bytes.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::fmt;

use crate::error::{CircuitError, Result};

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"[;#].*$").unwrap();
}

type Encoder = Box<dyn Fn(&Captures) -> std::result::Result<Vec<u8>, String> + Send + Sync>;

pub struct Rule {
    pattern: Regex,
    encode: Encoder,
}

impl Rule {
    /// `pattern` is anchored to the whole line and matched case-insensitively.
    pub fn new<F>(pattern: &str, encode: F) -> Result<Self>
    where
        F: Fn(&Captures) -> std::result::Result<Vec<u8>, String> + Send + Sync + 'static,
    {
        let pattern = Regex::new(&format!(r"(?i)^(?:{})$", pattern))
            .map_err(|e| CircuitError::Expression(format!("bad assembler pattern: {}", e)))?;
        Ok(Rule {
            pattern,
            encode: Box::new(encode),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("pattern", &self.pattern.as_str()).finish()
    }
}

#[derive(Debug, Default)]
pub struct Assembler {
    rules: Vec<Rule>,
}

impl Assembler {
    pub fn new(rules: Vec<Rule>) -> Self {
        Assembler { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Assemble `source` into bytes. Line numbers in errors start at 1.
    pub fn assemble(&self, source: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for (n, raw) in source.lines().enumerate() {
            let line_no = n + 1;
            let line = COMMENT.replace(raw, "");
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (rule, captures) = self
                .rules
                .iter()
                .find_map(|rule| rule.pattern.captures(line).map(|c| (rule, c)))
                .ok_or_else(|| CircuitError::Assembly {
                    line: line_no,
                    message: format!("no rule matches '{}'", line),
                })?;
            let encoded = (rule.encode)(&captures).map_err(|message| CircuitError::Assembly {
                line: line_no,
                message,
            })?;
            bytes.extend(encoded);
        }
        Ok(bytes)
    }
}

/// Parse a decimal, `0x` hex or `0b` binary literal.
pub fn parse_number(text: &str) -> std::result::Result<u64, String> {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
    } else {
        lower.parse::<u64>()
    };
    parsed.map_err(|_| format!("'{}' is not a number", text))
}

/// Parse a literal that must fit in one byte.
pub fn parse_byte(text: &str) -> std::result::Result<u8, String> {
    let value = parse_number(text)?;
    u8::try_from(value).map_err(|_| format!("{} does not fit in a byte", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Assembler {
        Assembler::new(vec![
            Rule::new(r"nop", |_| Ok(vec![0x00])).unwrap(),
            Rule::new(r"ldi\s+r([0-3])\s*,\s*(\S+)", |c| {
                let reg: u8 = c[1].parse().map_err(|_| "bad register".to_string())?;
                Ok(vec![0x10 | reg, parse_byte(&c[2])?])
            })
            .unwrap(),
            Rule::new(r"\.byte\s+(\S+)", |c| Ok(vec![parse_byte(&c[1])?])).unwrap(),
            // shadowed by the nop rule above
            Rule::new(r"n.p", |_| Ok(vec![0xff])).unwrap(),
        ])
    }

    #[test]
    fn test_assemble_program() {
        let source = "\
; setup
ldi r1, 0x2a   # answer
NOP

.byte 0b101
";
        assert_eq!(toy().assemble(source).unwrap(), vec![0x11, 0x2a, 0x00, 0x05]);
    }

    #[test]
    fn test_first_rule_wins() {
        assert_eq!(toy().assemble("nop").unwrap(), vec![0x00]);
        assert_eq!(toy().assemble("nip").unwrap(), vec![0xff]);
    }

    #[test]
    fn test_unmatched_line_reports_line_number() {
        let err = toy().assemble("nop\n\njmp 4\n").unwrap_err();
        assert!(matches!(err, CircuitError::Assembly { line: 3, .. }));
    }

    #[test]
    fn test_encoder_error_reports_line_number() {
        let err = toy().assemble("nop\nldi r2, 300").unwrap_err();
        match err {
            CircuitError::Assembly { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("300"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_partial_match_is_rejected() {
        assert!(toy().assemble("nop nop").is_err());
        assert!(Rule::new(r"(", |_| Ok(vec![])).is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0xFF"), Ok(255));
        assert_eq!(parse_number("0b11"), Ok(3));
        assert!(parse_number("zz").is_err());
    }
}

//! Trusted arithmetic tool.
//!
//! Recursive-descent evaluator over `+ - * / % ^`, parentheses, unary signs
//! and decimal literals. `^` is right-associative and binds tighter than
//! unary minus on its left operand (`-2^2 == -4`). Nesting of parentheses,
//! signs and exponents is capped at [`MAX_NESTING`].

use serde_json::json;
use verity_core::{
    error::ToolError,
    types::{ToolDescriptor, ToolOutput},
};

use super::Tool;

pub const CALCULATOR_TOOL: &str = "calculator";

/// Deepest nesting of parentheses, unary signs and exponents accepted.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalcError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
    #[error("expression nested deeper than {MAX_NESTING} levels")]
    TooDeep,
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let mut parser = Parser { chars: expression.chars().collect(), pos: 0, depth: 0 };
    let value = parser.expr()?;
    parser.skip_ws();
    if let Some(&c) = parser.chars.get(parser.pos) {
        return Err(CalcError::UnexpectedChar(c, parser.pos));
    }
    if value.is_finite() { Ok(value) } else { Err(CalcError::NonFinite) }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.unary()?;
        while let Some(op @ ('*' | '/' | '%' | 'x' | '×')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                '/' | '%' if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                '/' => acc / rhs,
                '%' => acc % rhs,
                _ => acc * rhs,
            };
        }
        Ok(acc)
    }

    /// Every recursive path passes through here, so this is where depth is counted.
    fn unary(&mut self) -> Result<f64, CalcError> {
        if self.depth >= MAX_NESTING {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                match self.peek() {
                    Some(')') => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some(c) => Err(CalcError::UnexpectedChar(c, self.pos)),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(CalcError::UnexpectedChar(c, self.pos)),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, CalcError> {
        let mut literal = String::new();
        while let Some(&c) = self.chars.get(self.pos) {
            match c {
                '0'..='9' | '.' => literal.push(c),
                // thousands separators
                ',' | '_' => {}
                _ => break,
            }
            self.pos += 1;
        }
        literal.parse::<f64>().map_err(|_| CalcError::InvalidNumber(literal))
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let fixed = format!("{value:.6}");
        fixed.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[derive(Debug, Default)]
pub struct CalculatorTool;

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            id: CALCULATOR_TOOL.to_string(),
            description: "Evaluate an arithmetic expression exactly (+ - * / % ^ and parentheses)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"expression": {"type": "string"}},
                "required": ["expression"]
            }),
            trusted: true,
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let expression = arguments
            .get("expression")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing string field 'expression'".into()))?;
        let value = evaluate(expression).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(ToolOutput::text(format!("{expression} = {}", format_number(value))).conclusive())
    }
}

//! The arithmetic toolset: `add`, `subtract`, `multiply`, `divide`.
//!
//! Operands are JSON numbers (integer or float). Integer-only operations stay
//! integral unless they overflow `i64`, in which case they fall back to float
//! arithmetic. `divide` always yields a float rounded to 9 decimal places.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::errors::ToolError;

/// Decimal places kept by `divide`.
const DIVIDE_PRECISION: usize = 9;

// ─── Number ──────────────────────────────────────────────────────────────────

/// A JSON number that remembers whether it was integral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            // Matches both 0.0 and -0.0.
            Number::Float(f) => f == 0.0,
        }
    }
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x:?}"),
        }
    }
}

// ─── Operation ───────────────────────────────────────────────────────────────

/// Arguments shared by every arithmetic tool.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BinaryArgs {
    pub a: Number,
    pub b: Number,
}

/// One of the four registered arithmetic tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    /// Registration order, as reported by `tools/list`.
    pub const ALL: [Operation; 4] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Operation::Add => "Use this tool to add two numbers together.",
            Operation::Subtract => "Use this tool to subtract one number from another.",
            Operation::Multiply => "Use this tool to multiply two numbers together.",
            Operation::Divide => {
                "Use this tool to divide one number by another.\n\n\
                 Returns the result rounded to 9 decimal places.\n\
                 Raises an error if attempting to divide by zero."
            }
        }
    }

    /// Human-readable descriptions of `a` and `b`.
    fn parameter_descriptions(self) -> (&'static str, &'static str) {
        match self {
            Operation::Add => ("The first number to add.", "The second number to add."),
            Operation::Subtract => ("The number to subtract from.", "The number to subtract."),
            Operation::Multiply => (
                "The first number to multiply.",
                "The second number to multiply.",
            ),
            Operation::Divide => ("The number to divide.", "The number to divide by."),
        }
    }

    /// JSON Schema for the tool's `{a, b}` arguments.
    pub fn input_schema(self) -> serde_json::Value {
        let (a_desc, b_desc) = self.parameter_descriptions();
        let number = |desc: &str| {
            json!({
                "anyOf": [{"type": "integer"}, {"type": "number"}],
                "description": desc,
            })
        };
        json!({
            "type": "object",
            "properties": {
                "a": number(a_desc),
                "b": number(b_desc),
            },
            "required": ["a", "b"],
        })
    }

    /// JSON Schema for the `{result}` structured output.
    pub fn output_schema(self) -> serde_json::Value {
        let result = match self {
            Operation::Divide => json!({"type": "number"}),
            _ => json!({"anyOf": [{"type": "integer"}, {"type": "number"}]}),
        };
        json!({
            "type": "object",
            "properties": {"result": result},
            "required": ["result"],
        })
    }

    /// Decode raw call arguments and apply the operation.
    pub fn call(self, arguments: serde_json::Value) -> Result<Number, ToolError> {
        let args: BinaryArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidParams {
                reason: e.to_string(),
            })?;
        self.apply(args.a, args.b)
    }

    pub fn apply(self, a: Number, b: Number) -> Result<Number, ToolError> {
        let result = match self {
            Operation::Add => integral_or_float(a, b, i64::checked_add, |x, y| x + y),
            Operation::Subtract => integral_or_float(a, b, i64::checked_sub, |x, y| x - y),
            Operation::Multiply => integral_or_float(a, b, i64::checked_mul, |x, y| x * y),
            Operation::Divide => {
                if b.is_zero() {
                    return Err(ToolError::invalid_argument("Cannot divide by zero"));
                }
                Number::Float(round_to(a.as_f64() / b.as_f64(), DIVIDE_PRECISION))
            }
        };

        if let Number::Float(x) = result {
            if !x.is_finite() {
                return Err(ToolError::invalid_argument(format!(
                    "{} result is not a finite number",
                    self.name()
                )));
            }
        }
        Ok(result)
    }
}

/// Integer arithmetic when both operands are integers and the result fits,
/// float arithmetic otherwise.
fn integral_or_float(
    a: Number,
    b: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Number {
    if let (Number::Int(x), Number::Int(y)) = (a, b) {
        if let Some(r) = int_op(x, y) {
            return Number::Int(r);
        }
    }
    Number::Float(float_op(a.as_f64(), b.as_f64()))
}

/// Round to `digits` decimal places, half-to-even on the exact binary value.
///
/// Formatting with a fixed precision rounds the exact decimal expansion of
/// the float, so the re-parse yields the nearest representable result.
fn round_to(x: f64, digits: usize) -> f64 {
    if !x.is_finite() {
        return x;
    }
    format!("{x:.digits$}").parse().unwrap_or(x)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

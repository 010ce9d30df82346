//! Parameter declarations, their domains, and concrete assignments.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{Result, SweepError};

/// Tolerance used when counting real grid points so exact endpoints survive
/// floating-point division.
const REAL_GRID_EPSILON: f64 = 1e-9;

/// A concrete parameter value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    /// Canonical textual form used when substituting into scripts.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Real(v) => write!(f, "{}", v),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

/// The set of values a parameter ranges over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Domain {
    /// Every integer in `[min, max]`.
    Integer { min: i64, max: i64 },

    /// The grid `min, min + step, ...` up to and including `max`.
    Real { min: f64, max: f64, step: f64 },

    /// The listed values, in order.
    Categorical { values: Vec<String> },
}

impl Domain {
    /// Validate the domain and return the number of values it contains.
    pub fn cardinality(&self, parameter: &str) -> Result<u64> {
        match self {
            Domain::Integer { min, max } => {
                if min > max {
                    return Err(SweepError::domain(
                        parameter,
                        format!("minimum {} exceeds maximum {}", min, max),
                    ));
                }
                let count = (*max as i128) - (*min as i128) + 1;
                u64::try_from(count).map_err(|_| {
                    SweepError::domain(parameter, "integer range is too large to enumerate")
                })
            }
            Domain::Real { min, max, step } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(SweepError::domain(parameter, "bounds must be finite"));
                }
                if min > max {
                    return Err(SweepError::domain(
                        parameter,
                        format!("minimum {} exceeds maximum {}", min, max),
                    ));
                }
                if !step.is_finite() || *step <= 0.0 {
                    return Err(SweepError::domain(
                        parameter,
                        format!("step must be positive and finite, got {}", step),
                    ));
                }
                let steps = ((max - min) / step + REAL_GRID_EPSILON).floor();
                if steps >= u64::MAX as f64 {
                    return Err(SweepError::domain(
                        parameter,
                        "real grid is too large to enumerate",
                    ));
                }
                Ok(steps as u64 + 1)
            }
            Domain::Categorical { values } => {
                if values.is_empty() {
                    return Err(SweepError::domain(parameter, "no categorical values declared"));
                }
                for (i, value) in values.iter().enumerate() {
                    if !is_shell_safe(value) {
                        return Err(SweepError::domain(
                            parameter,
                            format!("value `{}` contains characters unsafe for scripts", value),
                        ));
                    }
                    if values[..i].contains(value) {
                        return Err(SweepError::domain(
                            parameter,
                            format!("duplicate value `{}`", value),
                        ));
                    }
                }
                Ok(values.len() as u64)
            }
        }
    }

    /// Value at position `i` of the domain. `i` must be below the cardinality.
    pub(crate) fn value_at(&self, i: u64) -> ParamValue {
        match self {
            Domain::Integer { min, .. } => ParamValue::Int(((*min as i128) + i as i128) as i64),
            Domain::Real { min, max, step } => {
                // Rounding may land just past `max` when the endpoint is off-grid.
                let raw = min + i as f64 * step;
                ParamValue::Real(round_to_grid(raw, *min, *step).min(*max))
            }
            Domain::Categorical { values } => ParamValue::Text(values[i as usize].clone()),
        }
    }

    /// Short human-readable description, e.g. `integer [1, 10]`.
    pub fn describe(&self) -> String {
        match self {
            Domain::Integer { min, max } => format!("integer [{}, {}]", min, max),
            Domain::Real { min, max, step } => format!("real [{}, {}] step {}", min, max, step),
            Domain::Categorical { values } => format!("categorical {{{}}}", values.join(", ")),
        }
    }
}

/// Round `value` to the decimal precision implied by the grid's origin and
/// step so that `0.1 * 3` renders as `0.3`.
fn round_to_grid(value: f64, min: f64, step: f64) -> f64 {
    let precision = decimals(min).max(decimals(step));
    match precision {
        Some(p) => format!("{:.*}", p, value).parse().unwrap_or(value),
        None => value,
    }
}

/// Number of fractional digits in the shortest representation of `v`, or
/// `None` when that representation uses an exponent.
fn decimals(v: f64) -> Option<usize> {
    let repr = v.to_string();
    if repr.contains(['e', 'E']) {
        return None;
    }
    Some(repr.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0))
}

/// Categorical values are substituted verbatim into shell text, so they are
/// restricted to characters that carry no shell meaning.
fn is_shell_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-+/:=,@%".contains(c))
}

/// Returns `true` if `name` is a valid parameter identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(flatten)]
    pub domain: Domain,
}

impl ParameterSpec {
    /// Declare an integer parameter over `[min, max]`.
    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Integer { min, max },
        }
    }

    /// Declare a real parameter swept on a grid.
    pub fn real(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Real { min, max, step },
        }
    }

    /// Declare a categorical parameter.
    pub fn categorical<S: Into<String>>(name: impl Into<String>, values: Vec<S>) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Categorical {
                values: values.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Validate this parameter and return its domain size.
    pub fn cardinality(&self) -> Result<u64> {
        self.domain.cardinality(&self.name)
    }
}

/// One parameter bound to a value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: ParamValue,
}

/// One concrete binding of every parameter, in declaration order.
///
/// Produced by [`crate::sweep::Sweep`]; `index` is the assignment's position
/// in sweep-generation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterAssignment {
    pub index: u64,
    pub bindings: Vec<Binding>,
}

impl ParameterAssignment {
    /// Look up a parameter's value by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.value)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Display for ParameterAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bindings.is_empty() {
            return f.write_str("(no parameters)");
        }
        for (i, binding) in self.bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", binding.name, binding.value)?;
        }
        Ok(())
    }
}

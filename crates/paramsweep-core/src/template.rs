//! Script templates compiled against a declared parameter set.
//!
//! Placeholders use `${name}`. `$${...}` is an escape for a literal `${...}`;
//! every other `$` sequence (`$HOME`, `$(( a + b ))`) is plain shell text.
//! Placeholders are resolved when the template is compiled, so an undeclared
//! name is reported while loading the tool definition rather than on a
//! provisioned machine.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::domain::error::{Result, SweepError};
use crate::domain::param::{ParameterAssignment, ParameterSpec};
use crate::domain::stage::Stage;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\$\{([^}]*)\}|\$\{([^}]*)\}").expect("placeholder pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A template bound to the parameters of one tool definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    stage: Stage,
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source` and check every placeholder against `declared`.
    pub fn compile(
        stage: Stage,
        source: impl Into<String>,
        declared: &[ParameterSpec],
    ) -> Result<Self> {
        let source = source.into();
        let names: HashSet<&str> = declared.iter().map(|p| p.name.as_str()).collect();

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut cursor = 0;

        for caps in placeholder_pattern().captures_iter(&source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            literal.push_str(&source[cursor..whole.start()]);
            cursor = whole.end();

            if let Some(escaped) = caps.get(1) {
                literal.push_str("${");
                literal.push_str(escaped.as_str());
                literal.push('}');
                continue;
            }

            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if !names.contains(name) {
                return Err(SweepError::UnknownPlaceholder {
                    template: stage,
                    placeholder: name.to_string(),
                });
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Placeholder(name.to_string()));
        }

        literal.push_str(&source[cursor..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            stage,
            source,
            segments,
        })
    }

    /// Stage this template renders for.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct parameter names referenced, in order of first use.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !seen.contains(&name.as_str()) {
                    seen.push(name.as_str());
                }
            }
        }
        seen
    }

    /// Substitute the assignment's values into the template.
    pub fn render(&self, assignment: &ParameterAssignment) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = assignment.get(name).ok_or_else(|| {
                        SweepError::UnknownPlaceholder {
                            template: self.stage,
                            placeholder: name.clone(),
                        }
                    })?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

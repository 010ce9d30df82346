//! Tool definition loader.
//!
//! Reads a YAML (`.yaml`/`.yml`) or JSON (`.json`) document with the fields
//! `tool_name`, `parameters`, `compute`, and the three `*_template_string`
//! fields, and validates it into a [`ToolSpec`]. Every shape error is a
//! [`SweepError::ConfigParse`] naming the offending field.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::domain::compute::ComputeSpec;
use crate::domain::error::{Result, SweepError};
use crate::domain::param::{Domain, ParameterSpec};
use crate::domain::stage::Stage;
use crate::domain::tool_spec::ToolSpec;

const FILE_TYPE_MSG: &str = "files must end with .yaml, .yml, or .json";

/// Document encodings accepted by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(SweepError::parse(
                path.display().to_string(),
                FILE_TYPE_MSG,
            )),
        }
    }
}

/// Load and validate a tool definition from disk.
pub fn load_tool_spec(path: &Path) -> Result<ToolSpec> {
    let format = ConfigFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), ?format, "loading tool definition");
    parse_tool_spec(&text, format)
}

/// Parse and validate a tool definition from text.
pub fn parse_tool_spec(text: &str, format: ConfigFormat) -> Result<ToolSpec> {
    let doc: Value = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(text)
            .map_err(|e| SweepError::parse("<document>", e.to_string()))?,
        ConfigFormat::Json => serde_json::from_str(text)
            .map_err(|e| SweepError::parse("<document>", e.to_string()))?,
    };
    let root = doc
        .as_object()
        .ok_or_else(|| SweepError::parse("<document>", "expected a mapping at the top level"))?;

    let tool_name = required_str(root, "tool_name", "tool_name")?;
    let parameters = parse_parameters(root)?;
    let compute = parse_compute(root)?;

    // A tool may have nothing to stage in or out; the command is mandatory.
    let setup = optional_str(root, Stage::Setup.template_field())?.unwrap_or_default();
    let command = required_str(
        root,
        Stage::Command.template_field(),
        Stage::Command.template_field(),
    )?;
    let finish = optional_str(root, Stage::Finish.template_field())?.unwrap_or_default();

    ToolSpec::new(tool_name, parameters, compute, &setup, &command, &finish)
}

fn parse_parameters(root: &Map<String, Value>) -> Result<Vec<ParameterSpec>> {
    let list = root
        .get("parameters")
        .ok_or_else(|| SweepError::parse("parameters", "missing field"))?;
    let list = match list {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        _ => return Err(SweepError::parse("parameters", "expected a list")),
    };

    list.iter()
        .enumerate()
        .map(|(i, item)| {
            let field = format!("parameters[{}]", i);
            let obj = item
                .as_object()
                .ok_or_else(|| SweepError::parse(&field, "expected a mapping"))?;
            parse_parameter(obj, &field)
        })
        .collect()
}

fn parse_parameter(obj: &Map<String, Value>, field: &str) -> Result<ParameterSpec> {
    let name = required_str(obj, "name", &format!("{}.name", field))?;
    let kind = required_str(obj, "type", &format!("{}.type", field))?;

    let domain = match kind.to_ascii_lowercase().as_str() {
        "int" | "integer" => Domain::Integer {
            min: required_i64(obj, "minimum", field)?,
            max: required_i64(obj, "maximum", field)?,
        },
        "real" | "float" | "double" => Domain::Real {
            min: required_f64(obj, "minimum", field)?,
            max: required_f64(obj, "maximum", field)?,
            step: required_f64(obj, "step", field)?,
        },
        "categorical" | "choice" => {
            let values_field = format!("{}.values", field);
            let values = obj
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| SweepError::parse(&values_field, "expected a list of values"))?;
            let values = values
                .iter()
                .enumerate()
                .map(|(j, v)| {
                    scalar_to_string(v).ok_or_else(|| {
                        SweepError::parse(format!("{}[{}]", values_field, j), "expected a scalar")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Domain::Categorical { values }
        }
        other => {
            return Err(SweepError::InvalidDomain {
                parameter: name,
                reason: format!("type `{}` has no domain rule", other),
            })
        }
    };

    Ok(ParameterSpec { name, domain })
}

fn parse_compute(root: &Map<String, Value>) -> Result<ComputeSpec> {
    let compute = root
        .get("compute")
        .ok_or_else(|| SweepError::parse("compute", "missing field"))?
        .as_object()
        .ok_or_else(|| SweepError::parse("compute", "expected a mapping"))?;

    let mut provider = None;
    let mut fields = BTreeMap::new();
    for (key, value) in compute {
        let text = scalar_to_string(value)
            .ok_or_else(|| SweepError::parse(format!("compute.{}", key), "expected a scalar"))?;
        if key == "type" || key == "provider" {
            provider = Some(text);
        } else {
            fields.insert(key.clone(), text);
        }
    }

    let provider =
        provider.ok_or_else(|| SweepError::parse("compute.type", "missing provider tag"))?;
    ComputeSpec::new(provider, fields)
}

fn required_str(obj: &Map<String, Value>, key: &str, field: &str) -> Result<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(SweepError::parse(field, "expected a string")),
        None => Err(SweepError::parse(field, "missing field")),
    }
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(SweepError::parse(key, "expected a string")),
    }
}

fn required_i64(obj: &Map<String, Value>, key: &str, field: &str) -> Result<i64> {
    let field = format!("{}.{}", field, key);
    match obj.get(key) {
        Some(v) => v
            .as_i64()
            .ok_or_else(|| SweepError::parse(&field, "expected an integer")),
        None => Err(SweepError::parse(&field, "missing field")),
    }
}

fn required_f64(obj: &Map<String, Value>, key: &str, field: &str) -> Result<f64> {
    let field = format!("{}.{}", field, key);
    match obj.get(key) {
        Some(v) => v
            .as_f64()
            .ok_or_else(|| SweepError::parse(&field, "expected a number")),
        None => Err(SweepError::parse(&field, "missing field")),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

//! Compute shape requested for each run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{Result, SweepError};

/// Provider tag for compute that runs on the orchestrating host.
pub const LOCAL_PROVIDER: &str = "local";

/// Provider tag for EC2 virtual machines.
pub const EC2_PROVIDER: &str = "ec2";

/// Provider-specific compute description.
///
/// Opaque to the core beyond checking that the fields a provider needs are
/// present; interpretation belongs to the compute provisioner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputeSpec {
    /// Provider tag, e.g. `ec2` or `local`.
    pub provider: String,

    /// Remaining provider fields (shape, image, ...).
    pub fields: BTreeMap<String, String>,
}

impl ComputeSpec {
    /// Build and validate a compute spec.
    pub fn new(provider: impl Into<String>, fields: BTreeMap<String, String>) -> Result<Self> {
        let spec = Self {
            provider: provider.into(),
            fields,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Compute on the orchestrating host.
    pub fn local() -> Self {
        Self {
            provider: LOCAL_PROVIDER.to_string(),
            fields: BTreeMap::new(),
        }
    }

    /// Look up a provider field.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Check that the fields required by the provider are present.
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(SweepError::parse("compute.type", "provider tag is empty"));
        }
        for key in required_fields(&self.provider) {
            match self.field(key) {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(SweepError::parse(
                        format!("compute.{}", key),
                        format!("required for provider `{}`", self.provider),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Fields each known provider requires: instance shape and machine image.
fn required_fields(provider: &str) -> &'static [&'static str] {
    match provider {
        EC2_PROVIDER => &["instance_model", "ami"],
        _ => &[],
    }
}

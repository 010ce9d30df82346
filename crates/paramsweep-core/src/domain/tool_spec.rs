//! Tool definition: the validated, immutable input to a sweep.

use serde::Serialize;
use std::collections::HashSet;

use super::compute::ComputeSpec;
use super::digest::SpecDigest;
use super::error::{Result, SweepError};
use super::param::{is_identifier, ParameterAssignment, ParameterSpec};
use super::stage::{RenderedRun, Script, Stage};
use crate::sweep::Sweep;
use crate::template::Template;

/// A validated tool definition.
///
/// Construction checks parameter names and domains and compiles the three
/// templates against the declared parameters, so any `ToolSpec` value can
/// be swept and rendered without further validation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    name: String,
    parameters: Vec<ParameterSpec>,
    compute: ComputeSpec,
    setup: Template,
    command: Template,
    finish: Template,
    #[serde(skip)]
    sweep: Sweep,
    #[serde(skip)]
    digest: SpecDigest,
}

impl ToolSpec {
    /// Validate and assemble a tool definition.
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<ParameterSpec>,
        compute: ComputeSpec,
        setup: &str,
        command: &str,
        finish: &str,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SweepError::parse("tool_name", "must not be empty"));
        }

        let mut seen = HashSet::new();
        for (i, param) in parameters.iter().enumerate() {
            if !is_identifier(&param.name) {
                return Err(SweepError::parse(
                    format!("parameters[{}].name", i),
                    format!("`{}` is not a valid identifier", param.name),
                ));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(SweepError::parse(
                    format!("parameters[{}].name", i),
                    format!("duplicate parameter `{}`", param.name),
                ));
            }
        }

        compute.validate()?;
        let sweep = Sweep::new(&parameters)?;
        let setup = Template::compile(Stage::Setup, setup, &parameters)?;
        let command = Template::compile(Stage::Command, command, &parameters)?;
        let finish = Template::compile(Stage::Finish, finish, &parameters)?;

        let mut spec = Self {
            name,
            parameters,
            compute,
            setup,
            command,
            finish,
            sweep,
            digest: SpecDigest::from_bytes(b""),
        };
        spec.digest = SpecDigest::of_json(&spec)?;
        Ok(spec)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn compute(&self) -> &ComputeSpec {
        &self.compute
    }

    /// Digest of the definition's canonical JSON form.
    pub fn digest(&self) -> &SpecDigest {
        &self.digest
    }

    /// The full parameter sweep.
    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    /// Template for the given stage.
    pub fn template(&self, stage: Stage) -> &Template {
        match stage {
            Stage::Setup => &self.setup,
            Stage::Command => &self.command,
            Stage::Finish => &self.finish,
        }
    }

    /// Render all three scripts for one assignment.
    pub fn render(&self, assignment: ParameterAssignment) -> Result<RenderedRun> {
        let script = |stage: Stage| -> Result<Script> {
            Ok(Script {
                stage,
                body: self.template(stage).render(&assignment)?,
            })
        };
        Ok(RenderedRun {
            setup: script(Stage::Setup)?,
            command: script(Stage::Command)?,
            finish: script(Stage::Finish)?,
            assignment,
        })
    }

    /// Lazily render every assignment of the sweep in generation order.
    pub fn rendered_runs(&self) -> impl Iterator<Item = Result<RenderedRun>> + '_ {
        self.sweep.iter().map(move |a| self.render(a))
    }
}

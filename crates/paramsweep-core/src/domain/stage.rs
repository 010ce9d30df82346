//! Lifecycle stages and the scripts rendered for them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::param::ParameterAssignment;

/// One of the three phases of a run's script lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stages inputs onto the compute resource.
    Setup,

    /// Runs the tool itself.
    Command,

    /// Retrieves outputs from the compute resource.
    Finish,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Setup, Stage::Command, Stage::Finish];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Command => "command",
            Stage::Finish => "finish",
        }
    }

    /// Name of the document field holding this stage's template.
    pub fn template_field(&self) -> &'static str {
        match self {
            Stage::Setup => "setup_template_string",
            Stage::Command => "command_template_string",
            Stage::Finish => "finish_template_string",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A literal, fully substituted script for one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Script {
    pub stage: Stage,
    pub body: String,
}

/// An assignment together with its three rendered scripts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedRun {
    pub assignment: ParameterAssignment,
    pub setup: Script,
    pub command: Script,
    pub finish: Script,
}

impl RenderedRun {
    /// Position of this run in sweep-generation order.
    pub fn index(&self) -> u64 {
        self.assignment.index
    }

    /// Script for the given stage.
    pub fn script(&self, stage: Stage) -> &Script {
        match stage {
            Stage::Setup => &self.setup,
            Stage::Command => &self.command,
            Stage::Finish => &self.finish,
        }
    }
}

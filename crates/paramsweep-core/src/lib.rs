//! paramsweep core library
//!
//! Validated tool definitions and everything that can be computed from them
//! without touching compute:
//! - loading YAML/JSON tool definitions into a [`ToolSpec`]
//! - lazily enumerating the parameter sweep
//! - rendering the setup, command and finish scripts per assignment

pub mod config;
pub mod domain;
pub mod sweep;
pub mod telemetry;
pub mod template;

pub use config::{load_tool_spec, parse_tool_spec, ConfigFormat};
pub use domain::{
    Binding, ComputeSpec, Domain, ParamValue, ParameterAssignment, ParameterSpec, RenderedRun,
    Result, Script, SpecDigest, Stage, SweepError, ToolSpec, EC2_PROVIDER, LOCAL_PROVIDER,
};
pub use sweep::{Sweep, SweepIter};
pub use telemetry::init_tracing;
pub use template::Template;

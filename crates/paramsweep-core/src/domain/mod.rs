//! Domain model: tool definitions, parameters, stages, and errors.

pub mod compute;
pub mod digest;
pub mod error;
pub mod param;
pub mod stage;
pub mod tool_spec;

pub use compute::{ComputeSpec, EC2_PROVIDER, LOCAL_PROVIDER};
pub use digest::SpecDigest;
pub use error::{Result, SweepError};
pub use param::{Binding, Domain, ParamValue, ParameterAssignment, ParameterSpec};
pub use stage::{RenderedRun, Script, Stage};
pub use tool_spec::ToolSpec;

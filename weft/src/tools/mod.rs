//! Tool trait, registry, and output shape shared by every libs/generator/
//! preprocessor tool a graph node can invoke.

mod registry;
mod tool;
mod tool_output;

pub use registry::{ToolDescriptor, ToolRegistry};
pub use tool::{Tool, ToolCategory, ToolError, STATE_INJECTION_KEY};
pub use tool_output::{ToolOutput, ToolStatus};

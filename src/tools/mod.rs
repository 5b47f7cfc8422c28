pub mod invoker;
pub mod types;

pub use invoker::{ScriptInvoker, ToolInvoker, TOOL_FAILURE_FALLBACK};
pub use types::{FunctionSpec, ToolDefinition, ToolError};

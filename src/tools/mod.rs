//! Built-in tool implementations.

pub mod sample;

use crate::mcp::handler::ToolRegistry;

/// Register all built-in tools.
pub fn register_all_tools(registry: &mut ToolRegistry) {
    registry.register(sample::ReverseTool::default());
    registry.register(sample::RandomNumberTool);
}

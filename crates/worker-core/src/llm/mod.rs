pub mod client;
pub mod tool_loop;
pub mod tool_registry;

pub use client::{chat_with_tools, ChatTurn, ToolCall};
pub use tool_loop::{run_llm_tool_loop, LlmTaskEnvelope, ToolCallAudit};
pub use tool_registry::{dispatch, get_tools_schema, parse_repo_context, parse_tool_args, RepoContext};

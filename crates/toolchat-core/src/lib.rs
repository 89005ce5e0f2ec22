pub mod config;
pub mod orchestrator;
pub mod projects;
pub mod tool;
pub mod transcript;
pub mod usage;

pub use config::*;
pub use orchestrator::{
    Orchestrator, ToolOutcome, Turn, APOLOGY_REPLY, DEFAULT_SYSTEM_PROMPT, EMPTY_REPLY,
    NO_TOOL_FALLBACK_REPLY, REPLY_ERROR_REPLY,
};
pub use projects::{register_project_tools, Project, ProjectDetails, ProjectStore};
pub use tool::{FnTool, ParamSpec, ParamType, ToolArgs, ToolError, ToolExecutor, ToolRegistry, ToolSpec};
pub use usage::{InMemoryUsageTracker, NoOpUsageTracker, UsageEvent, UsageStats, UsageTracker};

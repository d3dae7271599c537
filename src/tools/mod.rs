//! 工具层：封闭能力集合、注册表、带超时的执行器、输入 Schema、Mock 实现

pub mod executor;
pub mod mock;
pub mod registry;
pub mod schema;

pub use executor::ToolExecutor;
pub use mock::{mock_registry, MockTool};
pub use registry::{Tool, ToolError, ToolErrorKind, ToolKind, ToolRegistry};
pub use schema::{input_schema_for, tool_kind_schema_json};

//! 推理能力层：模型抽象、带超时的调用、JSON 提取、确定性 Mock

pub mod mock;
pub mod parse;
pub mod traits;

pub use mock::MockReasoning;
pub use parse::{extract_json_block, parse_json};
pub use traits::{
    generate_with_timeout, GenerationConstraints, ModelError, ReasoningModel, ResponseFormat,
};

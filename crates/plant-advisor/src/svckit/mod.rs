//! Service Kit - Agent Tools
//!
//! Domain-specific tools that implement `agent_core::Tool` for the plant-care
//! advisor, one per `ToolKind` slot.

mod knowledge_base;
mod npk_calculator;
mod ph_calculator;

pub use knowledge_base::{KnowledgeBaseTool, NO_RESULTS, UNAVAILABLE};
pub use npk_calculator::NpkCalculatorTool;
pub use ph_calculator::PhCalculatorTool;

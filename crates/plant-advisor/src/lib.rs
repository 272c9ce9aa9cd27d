//! # plant-advisor
//!
//! Plant-care advisor grounded in a document knowledge base, with exact
//! fertilizer and soil pH dosing.
//!
//! ## Tools
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `knowledge_base` | Retrieve passages from ingested agronomy documents |
//! | `npk_calculator` | Grams of fertilizer product for a nutrient target |
//! | `ph_calculator` | Kilograms of lime or sulfur to move soil pH |
//!
//! ## Example: tomatoes in a greenhouse
//!
//! ```text
//! "My greenhouse tomatoes have blossom end rot and the soil reads pH 5.5"
//!    │
//!    ├─► knowledge_base  "tomato blossom end rot calcium"  → guide passages
//!    ├─► ph_calculator   5.5 → 6.5, 2 m³ loam              → 2.6 kg garden lime
//!    └─► answer citing the guide and the lime dose
//! ```

pub mod dosing;
pub mod error;
pub mod knowledge;
pub mod model;
pub mod svckit;

use std::sync::Arc;

use agent_core::ToolTable;

pub use error::{AdvisorError, Result};
pub use knowledge::{HashingEmbedder, IngestReport, KnowledgeBase, RetrievalConfig};
pub use model::{Amendment, Npk, Nutrient, SoilType};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{KnowledgeBaseTool, NpkCalculatorTool, PhCalculatorTool};
}

/// Table with all three plant-care tools
pub fn tool_table(kb: Arc<KnowledgeBase>) -> ToolTable {
    ToolTable::new()
        .with(Arc::new(tools::KnowledgeBaseTool::new(kb)))
        .with(Arc::new(tools::NpkCalculatorTool))
        .with(Arc::new(tools::PhCalculatorTool))
}

/// System prompt for the plant-care agent
pub const PLANT_CARE_PROMPT: &str = r#"You are a practical plant-care assistant for home gardeners and growers.

## How to Answer

1. For questions about plant problems, care routines, pests or diseases, search the
   knowledge base first with `knowledge_base` and base your advice on what it returns.
2. If the knowledge base says "No relevant documents found in the knowledge base.", say
   that you found no reference material and give only general, clearly hedged advice.
   Never invent citations.
3. For fertilizer quantities always use `npk_calculator`; for liming or acidifying soil
   always use `ph_calculator`. Do not do dosing arithmetic yourself.
4. If a tool reports an error, fix the arguments and try again, or ask the user for the
   missing measurement.

## Calling Tools

When you need a tool, respond with only a JSON block in this exact format:
```tool
{"tool": "tool_name", "arguments": {"arg1": "value1"}}
```

Call one tool at a time and wait for its result. When you have what you need, answer
in plain language: the likely cause, the concrete steps, quantities with units, and the
sources you relied on."#;

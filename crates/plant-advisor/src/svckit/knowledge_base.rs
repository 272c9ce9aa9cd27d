//! Knowledge Lookup Tool
//!
//! Searches ingested agronomy documents and quotes the matching passages
//! with their source files.

use std::sync::Arc;

use async_trait::async_trait;

use agent_core::{
    Result as CoreResult, Tool, ToolCall, ToolKind, ToolResult,
    tool::{ParameterSchema, ToolSchema},
};

use crate::error::AdvisorError;
use crate::knowledge::KnowledgeBase;

/// Returned when no chunk clears the similarity threshold
pub const NO_RESULTS: &str = "No relevant documents found in the knowledge base.";

/// Returned as a degraded result when retrieval keeps failing
pub const UNAVAILABLE: &str = "Could not access the knowledge base";

pub struct KnowledgeBaseTool {
    kb: Arc<KnowledgeBase>,
}

impl KnowledgeBaseTool {
    pub const fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn kind(&self) -> ToolKind {
        ToolKind::KnowledgeBase
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.kind().name().into(),
            description: "Search gardening guides and agronomy manuals for plant care, fertilization \
                schedules, diseases and pests, soil and watering requirements, and seasonal tips."
                .into(),
            parameters: vec![ParameterSchema::required(
                "query",
                "string",
                "Detailed search query, e.g. 'tomato blossom end rot calcium'",
            )],
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let name = self.kind().name();
        let query = call.text("query").ok_or(AdvisorError::EmptyQuery)?;

        let hits = match self.kb.lookup(query).await {
            Ok(hits) => hits,
            Err(e) if e.is_invalid_input() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge base unavailable");
                return Ok(ToolResult::degraded(name, UNAVAILABLE));
            }
        };

        if hits.is_empty() {
            return Ok(ToolResult::success(name, NO_RESULTS));
        }

        let mut output = String::new();
        for (i, hit) in hits.iter().enumerate() {
            output.push_str(&format!(
                "[{}] {} (chunk {}, score {:.2})\n{}\n\n",
                i + 1,
                hit.chunk.file_name,
                hit.chunk.chunk_index,
                hit.score,
                hit.chunk.text
            ));
        }

        let mut sources: Vec<&str> = Vec::new();
        for hit in &hits {
            if !sources.contains(&hit.chunk.file_name.as_str()) {
                sources.push(&hit.chunk.file_name);
            }
        }
        output.push_str(&format!("Sources: {}", sources.join(", ")));

        let data = serde_json::json!({
            "sources": sources,
            "chunks": hits.iter().map(|h| serde_json::json!({
                "doc_id": h.chunk.doc_id,
                "chunk_index": h.chunk.chunk_index,
                "score": h.score,
            })).collect::<Vec<_>>(),
        });

        Ok(ToolResult::success(name, output).with_data(data))
    }
}

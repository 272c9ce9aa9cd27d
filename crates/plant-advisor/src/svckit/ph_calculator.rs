//! pH Calculator Tool

use async_trait::async_trait;
use rust_decimal::Decimal;

use agent_core::{
    Result as CoreResult, Tool, ToolCall, ToolKind, ToolResult,
    tool::{ParameterSchema, ToolSchema},
};

use super::npk_calculator::number;
use crate::dosing::PhRequest;
use crate::error::{AdvisorError, Result};
use crate::model::SoilType;

pub struct PhCalculatorTool;

impl PhCalculatorTool {
    fn parse_request(call: &ToolCall) -> Result<PhRequest> {
        let required = |key: &str| -> Result<Decimal> {
            number(call, key)?.ok_or_else(|| AdvisorError::InvalidQuantity(format!("{key} is required")))
        };

        Ok(PhRequest {
            current_ph: required("current_ph")?,
            target_ph: required("target_ph")?,
            soil_volume_m3: required("soil_volume_m3")?,
            soil_type: call
                .text("soil_type")
                .map_or(Ok(SoilType::default()), str::parse)?,
        })
    }
}

#[async_trait]
impl Tool for PhCalculatorTool {
    fn kind(&self) -> ToolKind {
        ToolKind::PhCalculator
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.kind().name().into(),
            description: "Calculate kilograms of garden lime (to raise) or elemental sulfur (to lower) \
                needed to move soil pH to a target, split into applications of at most one pH unit."
                .into(),
            parameters: vec![
                ParameterSchema::required("current_ph", "number", "Measured soil pH (0-14)"),
                ParameterSchema::required("target_ph", "number", "Desired soil pH (0-14)"),
                ParameterSchema::required("soil_volume_m3", "number", "Volume of soil to treat in cubic metres"),
                ParameterSchema::optional("soil_type", "string", "Soil texture")
                    .with_default(serde_json::json!("loam"))
                    .with_enum(&["sand", "loam", "clay"]),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let plan = Self::parse_request(call)?.plan()?;
        let data = serde_json::to_value(&plan)?;
        Ok(ToolResult::success(self.kind().name(), plan.render()).with_data(data))
    }
}

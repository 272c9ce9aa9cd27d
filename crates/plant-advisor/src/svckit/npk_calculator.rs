//! NPK Calculator Tool
//!
//! Grams of a fertilizer product needed to hit a nutrient target.

use async_trait::async_trait;
use rust_decimal::Decimal;

use agent_core::{
    Result as CoreResult, Tool, ToolCall, ToolKind, ToolResult,
    tool::{ParameterSchema, ToolSchema},
};

use crate::dosing::NpkRequest;
use crate::dosing::ph::finite_decimal;
use crate::error::{AdvisorError, Result};
use crate::model::{Npk, Nutrient};

pub struct NpkCalculatorTool;

impl NpkCalculatorTool {
    fn parse_request(call: &ToolCall) -> Result<NpkRequest> {
        let target_ratio: Npk = call
            .text("target_ratio")
            .ok_or_else(|| AdvisorError::InvalidRatio("target_ratio is required".into()))?
            .parse()
            .map_err(AdvisorError::InvalidRatio)?;

        let product: Npk = call
            .text("product")
            .ok_or_else(|| AdvisorError::InvalidProduct("product is required".into()))?
            .parse()
            .map_err(AdvisorError::InvalidProduct)?;

        let nutrient: Nutrient = call.text("nutrient").unwrap_or("N").parse()?;

        let amount_g = number(call, "amount_g")?
            .ok_or_else(|| AdvisorError::InvalidQuantity("amount_g is required".into()))?;
        let volume_l = number(call, "volume_l")?;

        Ok(NpkRequest {
            target_ratio,
            nutrient,
            amount_g,
            product,
            volume_l,
        })
    }
}

/// Optional finite numeric argument as a decimal
pub(crate) fn number(call: &ToolCall, key: &str) -> Result<Option<Decimal>> {
    call.number(key)
        .map_err(|e| AdvisorError::InvalidQuantity(e.to_string()))?
        .map(|value| finite_decimal(value, key))
        .transpose()
}

#[async_trait]
impl Tool for NpkCalculatorTool {
    fn kind(&self) -> ToolKind {
        ToolKind::NpkCalculator
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.kind().name().into(),
            description: "Calculate how many grams of a fertilizer product supply a wanted amount of one \
                nutrient, what the dose delivers of N, P and K, and the resulting ppm when dissolved."
                .into(),
            parameters: vec![
                ParameterSchema::required("target_ratio", "string", "Wanted N-P-K ratio, e.g. '3-1-2'"),
                ParameterSchema::optional("nutrient", "string", "Nutrient amount_g refers to")
                    .with_default(serde_json::json!("N"))
                    .with_enum(&["N", "P", "K"]),
                ParameterSchema::required("amount_g", "number", "Grams of that nutrient wanted"),
                ParameterSchema::required("product", "string", "Fertilizer N-P-K percentages, e.g. '10-10-10'"),
                ParameterSchema::optional("volume_l", "number", "Litres of water or soil the dose goes into"),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let plan = Self::parse_request(call)?.plan()?;
        let data = serde_json::to_value(&plan)?;
        Ok(ToolResult::success(self.kind().name(), plan.render()).with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::AgentError;

    #[tokio::test]
    async fn test_dose_for_tomatoes() {
        let call = ToolCall::new(
            "npk_calculator",
            serde_json::json!({
                "target_ratio": "3-1-2",
                "nutrient": "N",
                "amount_g": 30,
                "product": "10-10-10",
                "volume_l": "100"
            }),
        );

        let result = NpkCalculatorTool.execute(&call).await.unwrap();
        assert!(result.success);
        assert!(result.output.contains("Apply 300 g of 10-10-10"));
        assert!(result.output.contains("N 300 ppm"));
        assert_eq!(result.data.unwrap()["nutrient"], "N");
    }

    #[tokio::test]
    async fn test_rejections_are_validation_errors() {
        let bad = [
            serde_json::json!({"target_ratio": "3-1", "amount_g": 30, "product": "10-10-10"}),
            serde_json::json!({"target_ratio": "3-1-2", "amount_g": "lots", "product": "10-10-10"}),
            serde_json::json!({"target_ratio": "3-1-2", "amount_g": 30, "product": "0-10-10"}),
            serde_json::json!({"target_ratio": "3-1-2", "amount_g": 30, "product": "10-10-10", "nutrient": "Mg"}),
            serde_json::json!({"target_ratio": "3-1-2", "amount_g": 30, "product": "10-10-10", "volume_l": 0}),
            serde_json::json!({"target_ratio": "3-1-2", "amount_g": 1e28, "product": "1-0-0"}),
        ];
        for args in bad {
            let call = ToolCall::new("npk_calculator", args.clone());
            let err = NpkCalculatorTool.execute(&call).await.unwrap_err();
            assert!(matches!(err, AgentError::ToolValidation(_)), "{args} gave {err:?}");
        }
    }
}

//! NPK Fertilizer Dosing
//!
//! How much of a fertilizer product delivers a wanted mass of one nutrient,
//! what that dose carries of the other two, and what the target ratio asks
//! for across all three.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{AdvisorError, Result};
use crate::model::{Npk, Nutrient};

/// Inputs to an NPK dosing calculation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NpkRequest {
    /// Wanted N-P-K ratio, e.g. 3-1-2
    pub target_ratio: Npk,

    /// Nutrient `amount_g` refers to
    pub nutrient: Nutrient,

    /// Grams of `nutrient` wanted
    pub amount_g: Decimal,

    /// Fertilizer N-P-K percentages by weight
    pub product: Npk,

    /// Litres of water or soil the dose goes into
    pub volume_l: Option<Decimal>,
}

/// Concentration of a dose once dissolved
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dilution {
    pub volume_l: Decimal,
    pub product_g_per_l: Decimal,
    /// mg of each nutrient per litre
    pub ppm: Npk,
}

/// Result of an NPK dosing calculation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpkPlan {
    pub nutrient: Nutrient,
    pub product: Npk,
    pub target_ratio: Npk,

    /// Grams of fertilizer product to apply
    pub product_g: Decimal,

    /// Grams of each nutrient the dose delivers
    pub delivered_g: Npk,

    /// Grams of each nutrient the target ratio calls for
    pub target_g: Npk,

    pub dilution: Option<Dilution>,
}

fn too_large(field: &str) -> AdvisorError {
    AdvisorError::InvalidQuantity(format!("{field} is too large to dose"))
}

impl NpkRequest {
    fn validate(&self) -> Result<()> {
        let ratio = &self.target_ratio;
        if ratio.any_negative() {
            return Err(AdvisorError::InvalidRatio(format!("{ratio} has a negative part")));
        }
        match ratio.sum() {
            None => return Err(AdvisorError::InvalidRatio(format!("{ratio} is too large"))),
            Some(total) if total.is_zero() => {
                return Err(AdvisorError::InvalidRatio(format!("{ratio} sums to zero")));
            }
            Some(_) => {}
        }
        if ratio.get(self.nutrient).is_zero() {
            return Err(AdvisorError::InvalidRatio(format!(
                "{ratio} has no {} to scale from",
                self.nutrient
            )));
        }

        let product = &self.product;
        if product.any_negative() {
            return Err(AdvisorError::InvalidProduct(format!("{product} has a negative percentage")));
        }
        if product.sum().is_none_or(|total| total > dec!(100)) {
            return Err(AdvisorError::InvalidProduct(format!("{product} sums above 100%")));
        }
        if product.get(self.nutrient) <= Decimal::ZERO {
            return Err(AdvisorError::InvalidProduct(format!(
                "{product} contains no {}",
                self.nutrient
            )));
        }

        if self.amount_g <= Decimal::ZERO {
            return Err(AdvisorError::InvalidQuantity("amount_g must be positive".into()));
        }
        if self.volume_l.is_some_and(|v| v <= Decimal::ZERO) {
            return Err(AdvisorError::InvalidQuantity("volume_l must be positive".into()));
        }

        Ok(())
    }

    /// Compute the dose
    pub fn plan(&self) -> Result<NpkPlan> {
        self.validate()?;

        let fraction = self.product.get(self.nutrient) / dec!(100);
        let product_g = self.amount_g.checked_div(fraction).ok_or_else(|| too_large("amount_g"))?;
        let delivered_g = self
            .product
            .try_map(|pct| product_g.checked_mul(pct)?.checked_div(dec!(100)))
            .ok_or_else(|| too_large("amount_g"))?;

        let scale = self
            .amount_g
            .checked_div(self.target_ratio.get(self.nutrient))
            .ok_or_else(|| too_large("amount_g"))?;
        let target_g = self
            .target_ratio
            .try_map(|part| part.checked_mul(scale))
            .ok_or_else(|| too_large("amount_g"))?;

        let dilution = self
            .volume_l
            .map(|volume_l| {
                let product_g_per_l = product_g.checked_div(volume_l)?;
                let ppm = delivered_g.try_map(|grams| grams.checked_mul(dec!(1000))?.checked_div(volume_l))?;
                Some(Dilution {
                    volume_l,
                    product_g_per_l,
                    ppm,
                })
            })
            .map(|d| d.ok_or_else(|| too_large("volume_l")))
            .transpose()?;

        tracing::debug!(
            nutrient = %self.nutrient,
            product = %self.product,
            %product_g,
            "Computed NPK dose"
        );

        Ok(NpkPlan {
            nutrient: self.nutrient,
            product: self.product,
            target_ratio: self.target_ratio,
            product_g,
            delivered_g,
            target_g,
            dilution,
        })
    }
}

impl NpkPlan {
    /// Human-readable summary for the model
    pub fn render(&self) -> String {
        let r = |d: Decimal| d.round_dp(2).normalize();
        let mut out = format!(
            "Apply {} g of {} fertilizer to supply {} g of {}.\n",
            r(self.product_g),
            self.product,
            r(self.delivered_g.get(self.nutrient)),
            self.nutrient
        );
        out.push_str(&format!(
            "Delivered: N {} g, P {} g, K {} g\n",
            r(self.delivered_g.n),
            r(self.delivered_g.p),
            r(self.delivered_g.k)
        ));
        out.push_str(&format!(
            "Target for {} ratio: N {} g, P {} g, K {} g\n",
            self.target_ratio,
            r(self.target_g.n),
            r(self.target_g.p),
            r(self.target_g.k)
        ));

        let shortfalls: Vec<String> = Nutrient::ALL
            .iter()
            .filter(|&&n| self.delivered_g.get(n) < self.target_g.get(n))
            .map(|&n| format!("{n} short by {} g", r(self.target_g.get(n) - self.delivered_g.get(n))))
            .collect();
        if !shortfalls.is_empty() {
            out.push_str(&format!("This product alone leaves {}.\n", shortfalls.join(", ")));
        }

        if let Some(d) = &self.dilution {
            out.push_str(&format!(
                "In {} L: {} g/L of product; N {} ppm, P {} ppm, K {} ppm\n",
                r(d.volume_l),
                r(d.product_g_per_l),
                r(d.ppm.n),
                r(d.ppm.p),
                r(d.ppm.k)
            ));
        }

        out
    }
}

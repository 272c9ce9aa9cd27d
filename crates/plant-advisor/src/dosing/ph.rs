//! Soil pH Amendment
//!
//! Garden lime raises pH, elemental sulfur lowers it. Quantities come from a
//! kg per m³ per pH unit table by soil texture, and larger corrections are
//! split into applications of at most one pH unit each.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{AdvisorError, Result};
use crate::model::{Amendment, SoilType};

/// Differences below this need no amendment
pub const MIN_ADJUSTMENT: Decimal = dec!(0.1);

/// Largest pH change per application
pub const MAX_STEP: Decimal = dec!(1.0);

/// kg of amendment per m³ of soil per pH unit
pub const fn rate_kg_per_m3(amendment: Amendment, soil: SoilType) -> Decimal {
    match (amendment, soil) {
        (Amendment::GardenLime, SoilType::Sand) => dec!(0.8),
        (Amendment::GardenLime, SoilType::Loam) => dec!(1.3),
        (Amendment::GardenLime, SoilType::Clay) => dec!(1.9),
        (Amendment::ElementalSulfur, SoilType::Sand) => dec!(0.16),
        (Amendment::ElementalSulfur, SoilType::Loam) => dec!(0.49),
        (Amendment::ElementalSulfur, SoilType::Clay) => dec!(0.65),
        (Amendment::None, _) => Decimal::ZERO,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhRequest {
    pub current_ph: Decimal,
    pub target_ph: Decimal,
    pub soil_volume_m3: Decimal,
    pub soil_type: SoilType,
}

/// One application in a staged correction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub ph_change: Decimal,
    pub kg: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhPlan {
    pub current_ph: Decimal,
    pub target_ph: Decimal,
    pub soil_type: SoilType,
    pub amendment: Amendment,
    pub total_kg: Decimal,
    pub applications: Vec<Application>,
}

/// Convert a float argument, rejecting NaN and infinities
pub fn finite_decimal(value: f64, field: &str) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(AdvisorError::InvalidQuantity(format!("{field} must be a finite number")));
    }
    Decimal::try_from(value).map_err(|_| AdvisorError::InvalidQuantity(format!("{field} is out of range")))
}

fn check_ph(value: Decimal, field: &str) -> Result<()> {
    if value < Decimal::ZERO || value > dec!(14) {
        return Err(AdvisorError::InvalidPh(format!("{field} {value} is outside 0-14")));
    }
    Ok(())
}

impl PhRequest {
    pub fn plan(&self) -> Result<PhPlan> {
        check_ph(self.current_ph, "current_ph")?;
        check_ph(self.target_ph, "target_ph")?;
        if self.soil_volume_m3 <= Decimal::ZERO {
            return Err(AdvisorError::InvalidQuantity("soil_volume_m3 must be positive".into()));
        }

        let difference = self.target_ph - self.current_ph;
        let change = difference.abs();
        let amendment = if change < MIN_ADJUSTMENT {
            Amendment::None
        } else if difference > Decimal::ZERO {
            Amendment::GardenLime
        } else {
            Amendment::ElementalSulfur
        };

        let too_large = || AdvisorError::InvalidQuantity("soil_volume_m3 is too large to dose".into());
        let per_unit = rate_kg_per_m3(amendment, self.soil_type)
            .checked_mul(self.soil_volume_m3)
            .ok_or_else(too_large)?;
        let mut applications = Vec::new();
        if amendment != Amendment::None {
            let mut remaining = change;
            while remaining > Decimal::ZERO {
                let step = remaining.min(MAX_STEP);
                applications.push(Application {
                    ph_change: step,
                    kg: step.checked_mul(per_unit).ok_or_else(too_large)?,
                });
                remaining -= step;
            }
        }
        let total_kg = applications
            .iter()
            .try_fold(Decimal::ZERO, |total, a| total.checked_add(a.kg))
            .ok_or_else(too_large)?;

        Ok(PhPlan {
            current_ph: self.current_ph,
            target_ph: self.target_ph,
            soil_type: self.soil_type,
            amendment,
            total_kg,
            applications,
        })
    }
}

impl PhPlan {
    pub fn render(&self) -> String {
        let r = |d: Decimal| d.round_dp(2).normalize();
        if self.amendment == Amendment::None {
            return format!(
                "Soil pH {} is already within {} of the target {}: no amendment needed (0 kg).",
                r(self.current_ph),
                MIN_ADJUSTMENT,
                r(self.target_ph)
            );
        }

        let direction = if self.amendment == Amendment::GardenLime { "raise" } else { "lower" };
        let mut out = format!(
            "To {direction} {} soil from pH {} to {}, apply {} kg of {} in total.\n",
            self.soil_type,
            r(self.current_ph),
            r(self.target_ph),
            r(self.total_kg),
            self.amendment
        );
        if self.applications.len() > 1 {
            out.push_str(&format!(
                "Split into {} applications, retesting the soil between them:\n",
                self.applications.len()
            ));
            for (i, app) in self.applications.iter().enumerate() {
                out.push_str(&format!(
                    "  {}. {} kg for {} pH units\n",
                    i + 1,
                    r(app.kg),
                    r(app.ph_change)
                ));
            }
        }
        out
    }
}

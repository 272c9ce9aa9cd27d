//! Domain Models
//!
//! Fertilizer and soil types shared by the dosing calculators.
//! Uses `rust_decimal` for all quantities so grams and ppm come out exact.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AdvisorError, Result};

/// A primary macronutrient
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nutrient {
    #[serde(rename = "N")]
    Nitrogen,
    #[serde(rename = "P")]
    Phosphorus,
    #[serde(rename = "K")]
    Potassium,
}

impl Nutrient {
    pub const ALL: [Self; 3] = [Self::Nitrogen, Self::Phosphorus, Self::Potassium];

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Nitrogen => "N",
            Self::Phosphorus => "P",
            Self::Potassium => "K",
        }
    }
}

impl fmt::Display for Nutrient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Nutrient {
    type Err = AdvisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "n" | "nitrogen" => Ok(Self::Nitrogen),
            "p" | "phosphorus" => Ok(Self::Phosphorus),
            "k" | "potassium" => Ok(Self::Potassium),
            _ => Err(AdvisorError::UnknownNutrient(s.trim().to_string())),
        }
    }
}

/// Three N-P-K figures: a ratio, or a fertilizer's percentages by weight
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Npk {
    pub n: Decimal,
    pub p: Decimal,
    pub k: Decimal,
}

impl Npk {
    pub const fn new(n: Decimal, p: Decimal, k: Decimal) -> Self {
        Self { n, p, k }
    }

    pub const fn get(&self, nutrient: Nutrient) -> Decimal {
        match nutrient {
            Nutrient::Nitrogen => self.n,
            Nutrient::Phosphorus => self.p,
            Nutrient::Potassium => self.k,
        }
    }

    /// Total of the three figures, `None` on overflow
    pub fn sum(&self) -> Option<Decimal> {
        self.n.checked_add(self.p)?.checked_add(self.k)
    }

    pub fn any_negative(&self) -> bool {
        Nutrient::ALL.iter().any(|&n| self.get(n) < Decimal::ZERO)
    }

    /// Apply `f` to each figure, `None` if any call fails
    pub fn try_map(&self, f: impl Fn(Decimal) -> Option<Decimal>) -> Option<Self> {
        Some(Self::new(f(self.n)?, f(self.p)?, f(self.k)?))
    }
}

impl fmt::Display for Npk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.n.normalize(),
            self.p.normalize(),
            self.k.normalize()
        )
    }
}

impl FromStr for Npk {
    type Err = String;

    /// Parses `"3-1-2"`, `"3:1:2"` or `"3 1 2"`
    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = s
            .split(|c: char| c == ':' || c == '/' || c == ',' || c.is_whitespace())
            .flat_map(split_dashes)
            .filter(|p| !p.is_empty())
            .collect();

        let [n, p, k] = *parts.as_slice() else {
            return Err(format!("expected three N-P-K figures, got '{}'", s.trim()));
        };
        let parse = |part: &str| {
            Decimal::from_str(part).map_err(|_| format!("'{part}' is not a number in '{}'", s.trim()))
        };

        Ok(Self::new(parse(n)?, parse(p)?, parse(k)?))
    }
}

/// Split on `-` separators while keeping a leading minus sign on a figure
fn split_dashes(segment: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = segment.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let is_sign = i == start;
        if b == b'-' && !is_sign {
            parts.push(&segment[start..i]);
            start = i + 1;
        }
    }
    parts.push(&segment[start..]);
    parts
}

/// Soil texture class
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilType {
    Sand,
    #[default]
    Loam,
    Clay,
}

impl SoilType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sand => "sand",
            Self::Loam => "loam",
            Self::Clay => "clay",
        }
    }
}

impl fmt::Display for SoilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SoilType {
    type Err = AdvisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sand" | "sandy" => Ok(Self::Sand),
            "loam" | "loamy" => Ok(Self::Loam),
            "clay" | "clayey" => Ok(Self::Clay),
            _ => Err(AdvisorError::UnknownSoilType(s.trim().to_string())),
        }
    }
}

/// Soil amendment used to move pH
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amendment {
    /// Raises pH
    GardenLime,
    /// Lowers pH
    ElementalSulfur,
    /// Already within 0.1 of the target
    None,
}

impl Amendment {
    pub const fn name(self) -> &'static str {
        match self {
            Self::GardenLime => "garden lime",
            Self::ElementalSulfur => "elemental sulfur",
            Self::None => "no amendment needed",
        }
    }
}

impl fmt::Display for Amendment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_npk_parsing() {
        let npk: Npk = "3-1-2".parse().unwrap();
        assert_eq!(npk, Npk::new(dec!(3), dec!(1), dec!(2)));
        assert_eq!(npk.sum(), Some(dec!(6)));
        assert_eq!(npk.to_string(), "3-1-2");

        let spaced: Npk = "10 : 10 : 10".parse().unwrap();
        assert_eq!(spaced.get(Nutrient::Potassium), dec!(10));

        let decimal: Npk = "4.5-0-1.5".parse().unwrap();
        assert_eq!(decimal.n, dec!(4.5));

        let negative: Npk = "-1-2-3".parse().unwrap();
        assert!(negative.any_negative());

        assert!("3-1".parse::<Npk>().is_err());
        assert!("a-b-c".parse::<Npk>().is_err());
    }

    #[test]
    fn test_nutrient_and_soil_names() {
        assert_eq!("nitrogen".parse::<Nutrient>().unwrap(), Nutrient::Nitrogen);
        assert_eq!("k".parse::<Nutrient>().unwrap(), Nutrient::Potassium);
        assert!("Mg".parse::<Nutrient>().is_err());

        assert_eq!("Sandy".parse::<SoilType>().unwrap(), SoilType::Sand);
        assert_eq!(SoilType::default(), SoilType::Loam);
        assert!(matches!("peat".parse::<SoilType>(), Err(AdvisorError::UnknownSoilType(_))));
    }
}

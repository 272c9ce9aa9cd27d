//! Dosing Calculators

pub mod npk;
pub mod ph;

pub use npk::{Dilution, NpkPlan, NpkRequest};
pub use ph::{Application, PhPlan, PhRequest};

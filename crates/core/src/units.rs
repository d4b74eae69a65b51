//! Unit-of-measure conversion policy.
//!
//! The base unit is the canonical unit of account. Buy and pack units are
//! whole multiples of it. Every quantity inside the bridge is expressed in
//! base units; conversion happens only when interpreting an operator-entered
//! quantity and when writing a final quantity to a destination document that
//! is declared in buy/pack units.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Unit granularity a quantity is expressed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitOfMeasure {
    Base,
    Buy,
    Pack,
}

impl UnitOfMeasure {
    pub fn is_base(self) -> bool {
        matches!(self, UnitOfMeasure::Base)
    }
}

/// Per-item conversion factors (base units contained in one buy/pack unit).
///
/// Deserialization goes through [`ItemUnitFactors::new`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawUnitFactors")]
pub struct ItemUnitFactors {
    buy: i64,
    pack: i64,
}

#[derive(Deserialize)]
struct RawUnitFactors {
    buy: i64,
    pack: i64,
}

impl TryFrom<RawUnitFactors> for ItemUnitFactors {
    type Error = DomainError;

    fn try_from(raw: RawUnitFactors) -> DomainResult<Self> {
        Self::new(raw.buy, raw.pack)
    }
}

impl ItemUnitFactors {
    /// Factors must be strictly positive.
    pub fn new(buy: i64, pack: i64) -> DomainResult<Self> {
        if buy <= 0 {
            return Err(DomainError::validation("buy unit factor must be positive"));
        }
        if pack <= 0 {
            return Err(DomainError::validation("pack unit factor must be positive"));
        }
        Ok(Self { buy, pack })
    }

    /// Item managed purely in base units.
    pub const fn base_only() -> Self {
        Self { buy: 1, pack: 1 }
    }

    pub fn buy(&self) -> i64 {
        self.buy
    }

    pub fn pack(&self) -> i64 {
        self.pack
    }

    /// Base units contained in one `unit`.
    pub fn factor(&self, unit: UnitOfMeasure) -> i64 {
        match unit {
            UnitOfMeasure::Base => 1,
            UnitOfMeasure::Buy => self.buy,
            UnitOfMeasure::Pack => self.pack,
        }
    }
}

impl Default for ItemUnitFactors {
    fn default() -> Self {
        Self::base_only()
    }
}

/// Convert `qty` from one unit to another.
///
/// Identity when `from == to`. Otherwise the quantity is scaled up to base
/// units and divided down to the target unit with integer division
/// (truncation, never rounding), matching the ERP posting rules.
pub fn convert(
    qty: i64,
    from: UnitOfMeasure,
    to: UnitOfMeasure,
    factors: &ItemUnitFactors,
) -> DomainResult<i64> {
    if from == to {
        return Ok(qty);
    }
    let base = to_base(qty, from, factors)?;
    Ok(from_base(base, to, factors))
}

/// Interpret an operator-entered quantity expressed in `unit`.
pub fn to_base(qty: i64, unit: UnitOfMeasure, factors: &ItemUnitFactors) -> DomainResult<i64> {
    qty.checked_mul(factors.factor(unit))
        .ok_or_else(|| DomainError::overflow(format!("{qty} x {unit:?} exceeds i64")))
}

/// Express a base quantity in `unit` for a destination document.
pub fn from_base(base_qty: i64, unit: UnitOfMeasure, factors: &ItemUnitFactors) -> i64 {
    base_qty / factors.factor(unit)
}

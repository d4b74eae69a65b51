//! `scanbridge-core`: shared building blocks for the warehouse/ERP bridge.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the error model, strongly-typed identifiers and unit-of-measure arithmetic.

pub mod error;
pub mod id;
pub mod units;

pub use error::{DomainError, DomainResult};
pub use id::{BinEntry, CardCode, DocEntry, ItemCode, LineNum, PickListId, WarehouseCode};
pub use units::{ItemUnitFactors, UnitOfMeasure};

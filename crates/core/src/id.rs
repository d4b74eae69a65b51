//! Strongly-typed identifiers used across the bridge.
//!
//! ERP documents are keyed by an internal entry number plus a line number;
//! master data (items, warehouses, business partners) by string codes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Internal key of an ERP document (unique per document type).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocEntry(i64);

/// Zero-based line number within an ERP document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineNum(i32);

/// Internal key of a bin location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinEntry(i32);

/// Absolute entry of a pick list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PickListId(i64);

/// Item master code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCode(String);

/// Warehouse code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseCode(String);

/// Business partner (vendor/customer) code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardCode(String);

macro_rules! impl_numeric_newtype {
    ($t:ty, $inner:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$inner> for $t {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$t> for $inner {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<$inner>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

macro_rules! impl_code_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a code, rejecting blank input.
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::invalid_id(format!("{} cannot be empty", $name)));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_numeric_newtype!(DocEntry, i64, "DocEntry");
impl_numeric_newtype!(LineNum, i32, "LineNum");
impl_numeric_newtype!(BinEntry, i32, "BinEntry");
impl_numeric_newtype!(PickListId, i64, "PickListId");

impl_code_newtype!(ItemCode, "ItemCode");
impl_code_newtype!(WarehouseCode, "WarehouseCode");
impl_code_newtype!(CardCode, "CardCode");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_parse_and_display() {
        let entry: DocEntry = " 500 ".parse().unwrap();
        assert_eq!(entry, DocEntry::new(500));
        assert_eq!(entry.to_string(), "500");

        let err = "abc".parse::<BinEntry>().unwrap_err();
        match err {
            DomainError::InvalidId(msg) if msg.starts_with("BinEntry") => {}
            other => panic!("Expected InvalidId, got {other:?}"),
        }
    }

    #[test]
    fn blank_codes_are_rejected() {
        assert!(ItemCode::parse("  ").is_err());
        assert_eq!(ItemCode::parse("SKU1").unwrap().as_str(), "SKU1");
    }
}

//! Result shapes for multi-result-set materialization.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// How one property of a composite result is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// First row of the next result set.
    Scalar,
    /// All rows of the next result set.
    List,
    /// Not read from any result set.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeSlot {
    pub property: &'static str,
    pub kind: SlotKind,
}

impl ShapeSlot {
    pub const fn scalar(property: &'static str) -> Self {
        Self {
            property,
            kind: SlotKind::Scalar,
        }
    }

    pub const fn list(property: &'static str) -> Self {
        Self {
            property,
            kind: SlotKind::List,
        }
    }

    pub const fn ignore(property: &'static str) -> Self {
        Self {
            property,
            kind: SlotKind::Ignore,
        }
    }
}

/// A composite type filled from several result sets.
///
/// Result sets are consumed strictly in the order of [`ResultShape::slots`]:
/// the command must select its result sets in that same order. `Ignore`
/// slots do not consume a result set.
pub trait ResultShape: Serialize + DeserializeOwned + Default + Send + 'static {
    fn slots() -> &'static [ShapeSlot];
}

//! Error types for Tessera

use std::fmt;

use thiserror::Error;

use crate::{ElementId, OrderKey};

/// Why a raw string is not a usable order key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKey {
    Empty,
    InvalidHead,
    InvalidDigit,
    IntegerTooShort,
    TrailingZero,
    SmallestInteger,
}

impl fmt::Display for MalformedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            MalformedKey::Empty => "empty key",
            MalformedKey::InvalidHead => "head is not an ascii letter",
            MalformedKey::InvalidDigit => "contains a non base-62 digit",
            MalformedKey::IntegerTooShort => "integer part is shorter than its head encodes",
            MalformedKey::TrailingZero => "fractional part ends with zero",
            MalformedKey::SmallestInteger => "smallest integer cannot be used as a key",
        };
        f.write_str(reason)
    }
}

/// Order key parsing and generation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderKeyError {
    #[error("Malformed order key {key:?}: {reason}")]
    Malformed { key: String, reason: MalformedKey },

    #[error("Order keys are not ordered: {lower} >= {upper}")]
    Unordered { lower: OrderKey, upper: OrderKey },

    #[error("Order key space exhausted")]
    Exhausted,
}

/// Context of one element involved in an ordering violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyContext {
    pub id: ElementId,
    pub index: Option<OrderKey>,
    pub version: u32,
    pub is_deleted: bool,
}

impl fmt::Display for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(index) => write!(f, "{}:{}", index, self.id)?,
            None => write!(f, "<none>:{}", self.id)?,
        }
        write!(f, ":{}:{}", self.is_deleted, self.version)
    }
}

/// Fractional indices invariant has been compromised.
///
/// Reports the first offending pair plus the total number of violations, so
/// callers can decide whether to repair and retry or treat it as corruption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Fractional indices invariant has been compromised at position {position}: {} -> {element} ({violations} violation(s))",
    display_predecessor(.predecessor)
)]
pub struct InvalidFractionalIndexError {
    /// Array position of the offending element
    pub position: usize,
    /// Element right before the offending one
    pub predecessor: Option<KeyContext>,
    /// Offending element
    pub element: KeyContext,
    /// Total number of violations found in the scanned sequence
    pub violations: usize,
}

fn display_predecessor(predecessor: &Option<KeyContext>) -> String {
    match predecessor {
        Some(context) => context.to_string(),
        None => "<start>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_index_display() {
        let err = InvalidFractionalIndexError {
            position: 1,
            predecessor: Some(KeyContext {
                id: ElementId::new("A"),
                index: Some(OrderKey::parse("a1").unwrap()),
                version: 2,
                is_deleted: false,
            }),
            element: KeyContext {
                id: ElementId::new("B"),
                index: Some(OrderKey::parse("a0").unwrap()),
                version: 1,
                is_deleted: true,
            },
            violations: 1,
        };

        let message = err.to_string();
        assert!(message.contains("position 1"));
        assert!(message.contains("a1:A:false:2"));
        assert!(message.contains("a0:B:true:1"));
    }
}

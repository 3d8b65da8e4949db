//! Prefixed numeric identifiers
//!
//! An identifier is a kind prefix followed by a decimal number: `col12`,
//! `m7`, `r31`. The canonical form has no leading zeros. Legacy exports name
//! items with zero-padded numbers (`0000012`) and the legacy display form is
//! padded to four digits (`m0012`); both decode to the same number.

use crate::error::{RepoError, Result};
use crate::types::ItemKind;
use std::fmt;

/// Longest accepted digit string (`u64::MAX` has 20 digits)
pub const MAX_ID_DIGITS: usize = 20;

/// Width of the legacy padded display form
pub const LEGACY_ID_WIDTH: usize = 4;

/// Encoder/decoder for `{prefix}{digits}` identifiers
pub struct IdCodec;

impl IdCodec {
    /// Encode `n` in canonical form
    ///
    /// # Errors
    /// `BadRequest` if `n` is negative.
    pub fn encode(prefix: &str, n: i64) -> Result<String> {
        if n < 0 {
            return Err(RepoError::bad_request(format!(
                "negative id for prefix {:?}: {}",
                prefix, n
            )));
        }
        Ok(format!("{}{}", prefix, n))
    }

    /// Encode `n` in the legacy zero-padded display form (`m0012`)
    pub fn encode_padded(prefix: &str, n: u64) -> String {
        format!("{}{:0width$}", prefix, n, width = LEGACY_ID_WIDTH)
    }

    /// Decode an id carrying `expected_prefix`
    ///
    /// Returns `None` when the prefix differs or the remainder is not a
    /// canonical or zero-padded non-negative integer.
    pub fn decode(expected_prefix: &str, id: &str) -> Option<u64> {
        id.strip_prefix(expected_prefix).and_then(Self::parse_digits)
    }

    /// Parse a bare decimal string, zero padding allowed (`"0000012"` is 12)
    pub fn parse_digits(digits: &str) -> Option<u64> {
        if digits.is_empty()
            || digits.len() > MAX_ID_DIGITS
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        digits.parse::<u64>().ok()
    }

    /// Whether `digits` is in canonical form (no leading zeros except `"0"`)
    pub fn is_canonical(digits: &str) -> bool {
        Self::parse_digits(digits).is_some() && (digits == "0" || !digits.starts_with('0'))
    }
}

/// Typed identifier of a content item
///
/// Equality is on `(kind, number)`, so `m0012` and `m12` are the same item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    kind: ItemKind,
    number: u64,
}

impl ItemId {
    /// Create an id from its parts
    pub fn new(kind: ItemKind, number: u64) -> Self {
        ItemId { kind, number }
    }

    /// Parse an id of the given kind
    ///
    /// # Errors
    /// `BadRequest` if the prefix does not match or the number is malformed.
    pub fn parse(kind: ItemKind, id: &str) -> Result<Self> {
        IdCodec::decode(kind.id_prefix(), id)
            .map(|number| ItemId { kind, number })
            .ok_or_else(|| RepoError::bad_request(format!("malformed {} id: {:?}", kind, id)))
    }

    /// Parse an id of any kind, picking the kind from its prefix
    pub fn parse_any(id: &str) -> Result<Self> {
        for kind in [ItemKind::Collection, ItemKind::Module, ItemKind::Resource] {
            if let Some(number) = IdCodec::decode(kind.id_prefix(), id) {
                return Ok(ItemId { kind, number });
            }
        }
        Err(RepoError::bad_request(format!("malformed item id: {:?}", id)))
    }

    /// Item kind
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Numeric part
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Legacy padded display form (`m0012`)
    pub fn legacy(&self) -> String {
        IdCodec::encode_padded(self.kind.id_prefix(), self.number)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.id_prefix(), self.number)
    }
}

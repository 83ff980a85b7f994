//! Asset pair identity
//!
//! A pair is an ordered `(base, quote)` of denominations. Its identity is the
//! canonical string `"BASE:QUOTE"`; every keyed store in the engine uses that
//! form, so iteration order is the lexicographic order of canonical names.

use crate::error::EngineError;
use std::fmt;
use std::str::FromStr;

pub const PAIR_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetPair {
    base: String,
    quote: String,
}

impl AssetPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, EngineError> {
        let base = base.into();
        let quote = quote.into();
        if base.is_empty() || quote.is_empty() || base == quote {
            return Err(EngineError::InvalidPair(format!("{}:{}", base, quote)));
        }
        if base.contains(PAIR_SEPARATOR) || quote.contains(PAIR_SEPARATOR) {
            return Err(EngineError::InvalidPair(format!("{}:{}", base, quote)));
        }
        Ok(Self { base, quote })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// The pair with members swapped.
    pub fn inverse(&self) -> AssetPair {
        AssetPair {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// Canonical string form used as the store key.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.base, PAIR_SEPARATOR, self.quote)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.base, PAIR_SEPARATOR, self.quote)
    }
}

impl FromStr for AssetPair {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(PAIR_SEPARATOR) {
            Some((base, quote)) => AssetPair::new(base, quote),
            None => Err(EngineError::InvalidPair(s.to_string())),
        }
    }
}

//! Resource quantities and request/limit pairs
//!
//! A [`ResourceAmount`] is a Kubernetes quantity string (`"250m"`, `"1Gi"`,
//! `"5e3"`) that has been checked against the quantity grammar. Unset amounts
//! are modelled as `Option::None`, never as zero.
//!
//! A [`ResourcePair`] holds the possibly-unset request and limit for one
//! dimension; resolving it against defaults yields a [`ResolvedPair`] where
//! both amounts are always present.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use once_cell::sync::Lazy;
use regex::Regex;

/// `<sign>?<digits>[.<digits>]<suffix>?` where the suffix is binary SI,
/// decimal SI or a decimal exponent.
static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:Ki|Mi|Gi|Ti|Pi|Ei|[eE][+-]?[0-9]+|[numkMGTPE])?$",
    )
    .expect("quantity grammar is a valid regex")
});

/// A quantity string that did not match the grammar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseQuantityError {
    /// Nothing left after trimming whitespace
    #[error("quantity is empty")]
    Empty,
    /// Not a number with an optional unit suffix
    #[error("quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$', got {0:?}")]
    Format(String),
}

/// A validated resource quantity (CPU, memory or ephemeral storage)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceAmount(String);

impl ResourceAmount {
    /// Parse a quantity, trimming surrounding whitespace first
    pub fn parse(value: &str) -> Result<Self, ParseQuantityError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ParseQuantityError::Empty);
        }
        if !QUANTITY_RE.is_match(trimmed) {
            return Err(ParseQuantityError::Format(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The quantity as written
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the numeric part is zero, whatever the unit
    ///
    /// A zero amount is left out of the container's resource lists, which
    /// Kubernetes treats as "no request" / "no limit".
    pub fn is_zero(&self) -> bool {
        self.0
            .trim_start_matches(['+', '-'])
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .filter(char::is_ascii_digit)
            .all(|c| c == '0')
    }

    /// Convert into the Kubernetes API representation
    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.0.clone())
    }
}

impl FromStr for ResourceAmount {
    type Err = ParseQuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request and limit for one dimension, either of which may be unset
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourcePair {
    /// Requested amount
    pub request: Option<ResourceAmount>,
    /// Limit amount
    pub limit: Option<ResourceAmount>,
}

/// Request and limit for one dimension after resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPair {
    /// Requested amount
    pub request: ResourceAmount,
    /// Limit amount
    pub limit: ResourceAmount,
}

impl ResolvedPair {
    /// Create a pair from two amounts
    pub fn new(request: ResourceAmount, limit: ResourceAmount) -> Self {
        Self { request, limit }
    }
}

impl ResourcePair {
    /// Fill in whatever is unset
    ///
    /// - nothing set: both amounts come from `defaults`
    /// - only one set: the other is copied from it, defaults are ignored
    /// - both set: unchanged
    pub fn resolve(self, defaults: &ResolvedPair) -> ResolvedPair {
        match (self.request, self.limit) {
            (None, None) => defaults.clone(),
            (Some(request), None) => ResolvedPair {
                limit: request.clone(),
                request,
            },
            (None, Some(limit)) => ResolvedPair {
                request: limit.clone(),
                limit,
            },
            (Some(request), Some(limit)) => ResolvedPair { request, limit },
        }
    }
}

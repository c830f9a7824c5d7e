use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Numeric security identity.
///
/// The ID is persisted as the decimal string form of the number (the object
/// name), so it must round-trip through [`fmt::Display`] and [`FromStr`].
/// Zero is reserved as [`IdentityId::NONE`], the "no ID" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(u64);

impl IdentityId {
    /// The "no ID" sentinel returned by lookups that found nothing.
    pub const NONE: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` for the [`IdentityId::NONE`] sentinel.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self.0)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdentityId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self).map_err(|e| TypeError::InvalidId {
            value: s.to_string(),
            reason: e.to_string(),
        })
    }
}

impl From<u64> for IdentityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_decimal() {
        assert_eq!(IdentityId::new(4242).to_string(), "4242");
    }

    #[test]
    fn parse_decimal_name() {
        let id: IdentityId = "1024".parse().unwrap();
        assert_eq!(id.get(), 1024);
    }

    #[test]
    fn parse_rejects_non_numeric_name() {
        let err = "web-frontend".parse::<IdentityId>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidId { .. }));
    }

    #[test]
    fn parse_rejects_negative() {
        assert!("-5".parse::<IdentityId>().is_err());
    }

    #[test]
    fn none_sentinel() {
        assert!(IdentityId::NONE.is_none());
        assert!(!IdentityId::new(1).is_none());
        assert_eq!(IdentityId::default(), IdentityId::NONE);
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&IdentityId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}

//! Viewer tier attached to a user at creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Subscription tier of a user. Stored as a `SMALLINT` in `1..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum Tier {
    #[default]
    Tier1,
    Tier2,
    Tier3,
}

impl Tier {
    pub fn as_i16(self) -> i16 {
        match self {
            Tier::Tier1 => 1,
            Tier::Tier2 => 2,
            Tier::Tier3 => 3,
        }
    }
}

impl TryFrom<i16> for Tier {
    type Error = CoreError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::Tier1),
            2 => Ok(Tier::Tier2),
            3 => Ok(Tier::Tier3),
            other => Err(CoreError::Validation(format!("invalid tier: {other}"))),
        }
    }
}

impl From<Tier> for i16 {
    fn from(tier: Tier) -> Self {
        tier.as_i16()
    }
}

impl FromStr for Tier {
    type Err = CoreError;

    /// Accepts `"1"`..`"3"` and `"tier1"`..`"tier3"` in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let digits = normalized.strip_prefix("tier").unwrap_or(&normalized);
        digits
            .parse::<i16>()
            .map_err(|_| CoreError::Validation(format!("invalid tier: {s}")))
            .and_then(Tier::try_from)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier{}", self.as_i16())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_numeric_and_prefixed_forms() {
        assert_eq!("1".parse::<Tier>().unwrap(), Tier::Tier1);
        assert_eq!("tier2".parse::<Tier>().unwrap(), Tier::Tier2);
        assert_eq!(" TIER3 ".parse::<Tier>().unwrap(), Tier::Tier3);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_matches!("0".parse::<Tier>(), Err(CoreError::Validation(_)));
        assert_matches!("Tier0".parse::<Tier>(), Err(CoreError::Validation(_)));
        assert_matches!("x".parse::<Tier>(), Err(CoreError::Validation(_)));
        assert_matches!(Tier::try_from(999), Err(CoreError::Validation(_)));
    }

    #[test]
    fn default_tier_is_one() {
        assert_eq!(Tier::default().as_i16(), 1);
        assert_eq!(Tier::Tier3.to_string(), "Tier3");
    }

    #[test]
    fn serializes_as_plain_integer() {
        assert_eq!(serde_json::to_string(&Tier::Tier2).unwrap(), "2");
    }
}

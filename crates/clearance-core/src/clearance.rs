//! Clearance levels.
//!
//! The ordinal values are a deployment constant shared by every participant.
//! Labels used by older schema versions are accepted as aliases of the
//! canonical variant at the same ordinal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// A classification tier, totally ordered from least to most restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClearanceLevel {
    Unclassified = 0,
    Internal = 1,
    Confidential = 2,
    /// Also issued as `RESTRICTED` by older schemas.
    Secret = 3,
    TopSecret = 4,
}

impl ClearanceLevel {
    /// All levels in ascending order.
    pub const ALL: [ClearanceLevel; 5] = [
        ClearanceLevel::Unclassified,
        ClearanceLevel::Internal,
        ClearanceLevel::Confidential,
        ClearanceLevel::Secret,
        ClearanceLevel::TopSecret,
    ];

    /// The lowest tier. Messages at this level travel in plaintext.
    pub const LOWEST: ClearanceLevel = ClearanceLevel::Unclassified;

    /// Numeric ordinal.
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Look up a level by ordinal.
    pub fn from_ordinal(value: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    /// Canonical label.
    pub const fn label(self) -> &'static str {
        match self {
            ClearanceLevel::Unclassified => "UNCLASSIFIED",
            ClearanceLevel::Internal => "INTERNAL",
            ClearanceLevel::Confidential => "CONFIDENTIAL",
            ClearanceLevel::Secret => "SECRET",
            ClearanceLevel::TopSecret => "TOP_SECRET",
        }
    }

    /// Whether a holder at this level may read content at `required`.
    pub fn permits(self, required: ClearanceLevel) -> bool {
        self >= required
    }

    /// Parse from a JSON value: a label string, a numeric string, or an integer.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_u64().and_then(Self::from_ordinal),
            _ => None,
        }
    }
}

impl fmt::Display for ClearanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ClearanceLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u64>() {
            return Self::from_ordinal(n)
                .ok_or_else(|| CoreError::UnknownClearanceLevel(s.to_string()));
        }

        let normalized: String = trimmed
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        match normalized.as_str() {
            "UNCLASSIFIED" => Ok(ClearanceLevel::Unclassified),
            "INTERNAL" => Ok(ClearanceLevel::Internal),
            "CONFIDENTIAL" => Ok(ClearanceLevel::Confidential),
            "SECRET" | "RESTRICTED" => Ok(ClearanceLevel::Secret),
            "TOP_SECRET" | "TOPSECRET" => Ok(ClearanceLevel::TopSecret),
            _ => Err(CoreError::UnknownClearanceLevel(s.to_string())),
        }
    }
}

impl Serialize for ClearanceLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ClearanceLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        ClearanceLevel::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown clearance level: {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        for pair in ClearanceLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_parse_aliases_and_separators() {
        assert_eq!("restricted".parse::<ClearanceLevel>().unwrap(), ClearanceLevel::Secret);
        assert_eq!("Top Secret".parse::<ClearanceLevel>().unwrap(), ClearanceLevel::TopSecret);
        assert_eq!("top-secret".parse::<ClearanceLevel>().unwrap(), ClearanceLevel::TopSecret);
        assert_eq!("TOP_SECRET".parse::<ClearanceLevel>().unwrap(), ClearanceLevel::TopSecret);
        assert_eq!("2".parse::<ClearanceLevel>().unwrap(), ClearanceLevel::Confidential);
    }

    #[test]
    fn test_parse_rejects_unknown_labels() {
        assert!("OFFICIAL".parse::<ClearanceLevel>().is_err());
        assert!("7".parse::<ClearanceLevel>().is_err());
        assert!("".parse::<ClearanceLevel>().is_err());
    }

    #[test]
    fn test_json_forms() {
        assert_eq!(
            ClearanceLevel::from_json(&serde_json::json!(4)),
            Some(ClearanceLevel::TopSecret)
        );
        assert_eq!(
            ClearanceLevel::from_json(&serde_json::json!("internal")),
            Some(ClearanceLevel::Internal)
        );
        assert_eq!(ClearanceLevel::from_json(&serde_json::json!(true)), None);

        let json = serde_json::to_string(&ClearanceLevel::Secret).unwrap();
        assert_eq!(json, "\"SECRET\"");
    }

    #[test]
    fn test_permits() {
        assert!(ClearanceLevel::Secret.permits(ClearanceLevel::Confidential));
        assert!(ClearanceLevel::Secret.permits(ClearanceLevel::Secret));
        assert!(!ClearanceLevel::Internal.permits(ClearanceLevel::Confidential));
    }
}

//! Priority lanes for request scheduling

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Name of the lane a request is queued on
///
/// Lanes are ordered by the scheduler configuration (highest first), so any
/// number of priority levels can be declared without touching dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(Cow<'static, str>);

impl Priority {
    pub const HIGH: Priority = Priority(Cow::Borrowed("high"));
    pub const NORMAL: Priority = Priority(Cow::Borrowed("normal"));

    /// Create a priority for a custom lane name
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "" => Err(format!("Unknown priority: {}", s)),
            "high" => Ok(Self::HIGH),
            "normal" => Ok(Self::NORMAL),
            _ if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') => Ok(Self::named(name)),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_display() {
        assert_eq!(Priority::HIGH.to_string(), "high");
        assert_eq!(Priority::NORMAL.to_string(), "normal");
        assert_eq!(Priority::named("Background").to_string(), "background");
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::HIGH);
        assert_eq!("normal".parse::<Priority>().unwrap(), Priority::NORMAL);
        assert_eq!("bulk".parse::<Priority>().unwrap(), Priority::named("bulk"));
        assert!("".parse::<Priority>().is_err());
        assert!("no spaces".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_default() {
        assert_eq!(Priority::default(), Priority::NORMAL);
    }

    #[test]
    fn test_priority_serde() {
        let json = serde_json::to_string(&Priority::HIGH).unwrap();
        assert_eq!(json, "\"high\"");

        let priority: Priority = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(priority, Priority::NORMAL);
    }

    #[test]
    fn test_owned_and_borrowed_compare_equal() {
        assert_eq!(Priority::named("high"), Priority::HIGH);
    }
}

//! Explicit feedback: the like/dislike value and the event recorded for it.

use crate::features::FeatureVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A like (`+1`) or a dislike (`-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Rating {
    Like,
    Dislike,
}

impl Rating {
    #[must_use]
    pub const fn is_like(self) -> bool {
        matches!(self, Self::Like)
    }

    #[must_use]
    pub const fn value(self) -> i8 {
        match self {
            Self::Like => 1,
            Self::Dislike => -1,
        }
    }
}

impl From<Rating> for i8 {
    fn from(rating: Rating) -> Self {
        rating.value()
    }
}

impl TryFrom<i8> for Rating {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            v if v > 0 => Ok(Self::Like),
            v if v < 0 => Ok(Self::Dislike),
            _ => Err("rating must be +1 or -1, got 0".to_string()),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Like => f.write_str("like"),
            Self::Dislike => f.write_str("dislike"),
        }
    }
}

/// One explicit feedback action, kept in the recent-ratings window and
/// forwarded to the rating log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub track_id: String,
    pub rating: Rating,
    pub features: FeatureVector,
    pub timestamp: DateTime<Utc>,
    /// Start time of the session the rating happened in (RFC 3339).
    pub session_id: String,
    #[serde(default)]
    pub primary_genre: Option<String>,
    #[serde(default)]
    pub artist_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_serializes_as_signed_unit() {
        assert_eq!(serde_json::to_string(&Rating::Like).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Rating::Dislike).unwrap(), "-1");
        assert_eq!(serde_json::from_str::<Rating>("-1").unwrap(), Rating::Dislike);
        assert!(serde_json::from_str::<Rating>("0").is_err());
    }

    #[test]
    fn test_rating_conversions() {
        assert_eq!(Rating::try_from(5), Ok(Rating::Like));
        assert!(Rating::Like.is_like());
        assert!(!Rating::Dislike.is_like());
        assert_eq!(i8::from(Rating::Dislike), -1);
        assert_eq!(Rating::Dislike.to_string(), "dislike");
    }
}

//! Expiration settings attached to writes.

use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a written item should expire.
///
/// An item may expire at an absolute point in time or after a sliding window
/// of inactivity, never both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    pub absolute: Option<DateTime<Utc>>,
    pub sliding: Option<Duration>,
}

impl Expiration {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn absolute(at: DateTime<Utc>) -> Self {
        Self {
            absolute: Some(at),
            sliding: None,
        }
    }

    pub fn sliding(window: Duration) -> Self {
        Self {
            absolute: None,
            sliding: Some(window),
        }
    }

    /// A zero sliding window means "no sliding expiration"
    pub fn sliding_window(&self) -> Option<Duration> {
        self.sliding.filter(|window| !window.is_zero())
    }

    pub fn validate(&self) -> Result<()> {
        if self.absolute.is_some() && self.sliding_window().is_some() {
            return Err(CacheError::invalid_argument(
                "absolute and sliding expiration cannot both be set",
            ));
        }
        Ok(())
    }
}

/// Relative eviction priority of an item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPriority {
    Low,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    NotRemovable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_and_sliding_conflict() {
        let both = Expiration {
            absolute: Some(Utc::now()),
            sliding: Some(Duration::from_secs(30)),
        };
        assert!(matches!(both.validate(), Err(CacheError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_sliding_is_no_sliding() {
        let expiration = Expiration {
            absolute: Some(Utc::now()),
            sliding: Some(Duration::ZERO),
        };
        assert!(expiration.validate().is_ok());
        assert!(Expiration::never().validate().is_ok());
        assert!(Expiration::sliding(Duration::from_secs(1)).validate().is_ok());
    }
}

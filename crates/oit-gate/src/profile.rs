//! Gate Profiles: polling cadence and patience for the external judge

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often the judge is polled and how long a submission may stay unanswered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateProfile {
    /// Profile name (e.g., "field@1.0")
    pub name: String,

    /// Fixed polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Seconds without a verdict before the step is reported as timed out
    pub validation_timeout_secs: u64,
}

impl GateProfile {
    /// Field default: poll every 3 s, give up after 2 minutes
    pub fn field() -> Self {
        Self {
            name: "field@1.0".to_string(),
            poll_interval_ms: 3_000,
            validation_timeout_secs: 120,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn timeout_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.validation_timeout_secs.min(i64::MAX as u64) as i64)
    }
}

impl Default for GateProfile {
    fn default() -> Self {
        Self::field()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_profile_uses_defaults() {
        let profile: GateProfile = serde_json::from_str(r#"{ "poll_interval_ms": 500 }"#).unwrap();
        assert_eq!(profile.poll_interval(), Duration::from_millis(500));
        assert_eq!(profile.validation_timeout_secs, 120);
        assert_eq!(profile.name, "field@1.0");
    }
}

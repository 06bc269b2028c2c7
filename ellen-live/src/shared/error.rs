use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `ellen-live`.
///
/// Only [`SyncError::Network`] and [`SyncError::Decode`] ever reach the presentation layer, as
/// the `Degraded` state of a view. [`SyncError::MalformedMessage`] and
/// [`SyncError::StaleResult`] are swallowed where they are detected: a live feed keeps running
/// past a bad payload, and a result belonging to a superseded view is simply discarded.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode snapshot payload: {0}")]
    Decode(String),

    #[error("malformed stream message: {0}")]
    MalformedMessage(String),

    #[error("stale result for epoch {received} discarded (current epoch {current})")]
    StaleResult { received: u64, current: u64 },
}

impl SyncError {
    /// Determine if an error is a failed snapshot that must surface as a `Degraded` view.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_snapshot_failure(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Decode(_) => true,
            _ => false,
        }
    }

    /// Determine if an error is dropped at the point of detection and never surfaces.
    pub fn is_silent(&self) -> bool {
        !self.is_snapshot_failure()
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Network(value.to_string())
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(value: url::ParseError) -> Self {
        Self::Network(format!("invalid endpoint url: {value}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_classification() {
        struct TestCase {
            input: SyncError,
            snapshot_failure: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: transport failure or non-2xx surfaces as Degraded
                input: SyncError::Network("HTTP error: 502 Bad Gateway".to_string()),
                snapshot_failure: true,
            },
            TestCase {
                // TC1: body shape mismatch surfaces as Degraded
                input: SyncError::Decode("missing field `id`".to_string()),
                snapshot_failure: true,
            },
            TestCase {
                // TC2: single bad stream payload is swallowed
                input: SyncError::MalformedMessage("expected value at line 1".to_string()),
                snapshot_failure: false,
            },
            TestCase {
                // TC3: late snapshot for a superseded view is swallowed
                input: SyncError::StaleResult {
                    received: 1,
                    current: 2,
                },
                snapshot_failure: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                test.input.is_snapshot_failure(),
                test.snapshot_failure,
                "TC{} failed",
                index
            );
            assert_eq!(test.input.is_silent(), !test.snapshot_failure, "TC{} failed", index);
        }
    }

    #[test]
    fn test_stale_result_display() {
        let error = SyncError::StaleResult {
            received: 3,
            current: 5,
        };
        assert_eq!(
            error.to_string(),
            "stale result for epoch 3 discarded (current epoch 5)"
        );
    }
}

// ABOUTME: Error taxonomy for synchronisation runs
// ABOUTME: Separates channel failures, unreadable payloads and local store failures

use thiserror::Error;

/// Failure that ends a synchronisation run.
///
/// Application-level page failures are not errors: they come back as
/// `PageStatus::Failure` pages and only end the current phase.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network I/O failed or the server answered with a non-success HTTP status.
    #[error("{0}. This is possibly caused by a lack of connectivity, try again after ensuring you have a valid connection")]
    Transport(String),

    /// The response body could not be interpreted as a change page.
    #[error("Unexpected response from the update server: {0}")]
    Malformed(String),

    /// The local store rejected an operation.
    #[error("A SQLite error occurred: {0}")]
    Store(String),
}

impl SyncError {
    pub fn malformed(message: impl Into<String>) -> Self {
        SyncError::Malformed(message.into())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Malformed(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Malformed(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_message_mentions_connectivity() {
        let err = SyncError::Transport("connection refused".to_string());
        let msg = err.to_string();
        assert!(msg.starts_with("connection refused"));
        assert!(msg.contains("lack of connectivity"));
    }

    #[test]
    fn json_errors_are_malformed() {
        let err: SyncError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, SyncError::Malformed(_)));
    }

    #[test]
    fn sqlite_errors_are_store_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: SyncError = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err().into();
        assert!(matches!(err, SyncError::Store(_)));
        assert!(err.to_string().contains("missing"));
    }
}

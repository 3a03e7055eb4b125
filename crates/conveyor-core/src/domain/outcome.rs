//! Outcome model: what a handler reports back for one execution.

use serde::{Deserialize, Serialize};

use super::status::TaskStatus;

/// Result of running a handler once.
///
/// The dispatcher pattern-matches on the variant: `Done` and `Skip` are
/// terminal, `Error` retries until the record's ceiling and then becomes
/// terminal ERROR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
    Skip {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Outcome {
    pub fn done() -> Self {
        Outcome::Done {
            data: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outcome::Error {
            message: message.into(),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Outcome::Skip {
            message: Some(message.into()),
        }
    }

    /// Attach result data (meaningful on `Done`; other variants carry none).
    pub fn with_data(self, data: serde_json::Value) -> Self {
        match self {
            Outcome::Done { message, .. } => Outcome::Done {
                data: Some(data),
                message,
            },
            other => other,
        }
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        match self {
            Outcome::Done { data, .. } => Outcome::Done {
                data,
                message: Some(message),
            },
            Outcome::Error { .. } => Outcome::Error { message },
            Outcome::Skip { .. } => Outcome::Skip {
                message: Some(message),
            },
        }
    }

    /// Status a record lands in when this outcome is applied terminally.
    pub fn terminal_status(&self) -> TaskStatus {
        match self {
            Outcome::Done { .. } => TaskStatus::Done,
            Outcome::Error { .. } => TaskStatus::Error,
            Outcome::Skip { .. } => TaskStatus::Skip,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Done { message, .. } | Outcome::Skip { message } => message.as_deref(),
            Outcome::Error { message } => Some(message),
        }
    }
}

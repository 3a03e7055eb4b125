//! Task status machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Task status.
///
/// Transitions:
/// - Todo -> Processing (claim)
/// - Processing -> Done | Skip (outcome, terminal)
/// - Processing -> Todo (error outcome with retries left)
/// - Processing -> Error (error outcome with retries exhausted, terminal)
///
/// Wire names are the uppercase forms ("TODO", "PROCESSING", ...), which is
/// also the persisted field surface external consumers rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    Processing,
    Done,
    Error,
    Skip,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Todo,
        TaskStatus::Processing,
        TaskStatus::Done,
        TaskStatus::Error,
        TaskStatus::Skip,
    ];

    /// No further automatic transitions (a record in Error already exhausted
    /// its retries; a non-terminal error outcome resets to Todo instead).
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Skip)
    }

    /// Eligible for a claim.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Todo)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Done => "DONE",
            TaskStatus::Error => "ERROR",
            TaskStatus::Skip => "SKIP",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TODO" => Ok(TaskStatus::Todo),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "DONE" => Ok(TaskStatus::Done),
            "ERROR" => Ok(TaskStatus::Error),
            "SKIP" => Ok(TaskStatus::Skip),
            other => Err(EngineError::validation(format!("unknown status '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn serializes_as_uppercase_names() {
        let s = serde_json::to_string(&TaskStatus::Todo).unwrap();
        assert_eq!(s, "\"TODO\"");

        let s = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(s, "\"PROCESSING\"");
    }

    #[rstest]
    #[case::todo(TaskStatus::Todo, false)]
    #[case::processing(TaskStatus::Processing, false)]
    #[case::done(TaskStatus::Done, true)]
    #[case::error(TaskStatus::Error, true)]
    #[case::skip(TaskStatus::Skip, true)]
    fn terminal_statuses(#[case] status: TaskStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn only_todo_is_runnable() {
        for status in TaskStatus::ALL {
            assert_eq!(status.is_runnable(), status == TaskStatus::Todo);
        }
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("todo".parse::<TaskStatus>().unwrap(), TaskStatus::Todo);
        assert_eq!("DONE".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        assert!("RUNNING".parse::<TaskStatus>().is_err());
    }
}

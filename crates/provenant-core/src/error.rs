// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for provenant-core.
//!
//! Provides a unified error type with stable error codes for the node store,
//! the persister, the process state machine and the daemon loop.

use std::fmt;

use crate::process::ProcessState;
use crate::Pid;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while storing, restoring or running processes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Malformed or contradictory input for a buildable entity.
    Validation {
        /// The field or port that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Node was not found in the node store.
    NodeNotFound {
        /// The node UUID that was not found.
        pid: Pid,
    },

    /// The node exists but carries no checkpoint under the requested key.
    CheckpointNotFound {
        /// The process id.
        pid: Pid,
        /// The optional checkpoint tag.
        tag: Option<String>,
    },

    /// A checkpoint was found but the process could not be rebuilt from it.
    StateRestoration {
        /// The process id.
        pid: Pid,
        /// The reason for failure.
        reason: String,
    },

    /// Attribute write attempted on a sealed node.
    SealedWrite {
        /// The sealed node.
        pid: Pid,
        /// The attribute key that was being written.
        key: String,
    },

    /// The process state machine rejected a transition.
    InvalidTransition {
        /// The process id.
        pid: Pid,
        /// State the process was in.
        from: ProcessState,
        /// State that was requested.
        to: ProcessState,
    },

    /// A non-dynamic output port was emitted twice.
    OutputAlreadyEmitted {
        /// The process id.
        pid: Pid,
        /// The output port.
        port: String,
    },

    /// Output emitted on a port the process does not declare.
    UnknownOutputPort {
        /// The process id.
        pid: Pid,
        /// The output port.
        port: String,
    },

    /// A required output port was never emitted.
    MissingOutput {
        /// The process id.
        pid: Pid,
        /// The output port.
        port: String,
    },

    /// Output emitted while the process is waiting or after it was sealed.
    OutputRejected {
        /// The process id.
        pid: Pid,
        /// The output port.
        port: String,
        /// The state the process was in.
        state: ProcessState,
    },

    /// The process body raised an error.
    ProcessFailed {
        /// The process id.
        pid: Pid,
        /// Error details.
        message: String,
    },

    /// The process is already on the current execution stack.
    ReentrantProcess {
        /// The process id.
        pid: Pid,
    },

    /// No process type is registered under this name.
    UnknownProcessType {
        /// The requested type name.
        type_name: String,
    },

    /// The operation is deliberately not supported.
    Unsupported {
        /// The operation name.
        operation: &'static str,
    },

    /// Database operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Shorthand for a process body failure.
    pub fn process_failed(pid: Pid, message: impl Into<String>) -> Self {
        Self::ProcessFailed {
            pid,
            message: message.into(),
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NodeNotFound { .. } => "NODE_NOT_FOUND",
            Self::CheckpointNotFound { .. } => "CHECKPOINT_NOT_FOUND",
            Self::StateRestoration { .. } => "STATE_RESTORATION_FAILED",
            Self::SealedWrite { .. } => "SEALED_WRITE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::OutputAlreadyEmitted { .. } => "OUTPUT_ALREADY_EMITTED",
            Self::UnknownOutputPort { .. } => "UNKNOWN_OUTPUT_PORT",
            Self::MissingOutput { .. } => "MISSING_OUTPUT",
            Self::OutputRejected { .. } => "OUTPUT_REJECTED",
            Self::ProcessFailed { .. } => "PROCESS_FAILED",
            Self::ReentrantProcess { .. } => "REENTRANT_PROCESS",
            Self::UnknownProcessType { .. } => "UNKNOWN_PROCESS_TYPE",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this is one of the lookup-failure variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NodeNotFound { .. } | Self::CheckpointNotFound { .. }
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::NodeNotFound { pid } => write!(f, "Node '{}' not found", pid),
            Self::CheckpointNotFound { pid, tag } => {
                if let Some(tag) = tag {
                    write!(f, "Checkpoint '{}' not found for process '{}'", tag, pid)
                } else {
                    write!(f, "No checkpoint found for process '{}'", pid)
                }
            }
            Self::StateRestoration { pid, reason } => {
                write!(f, "Failed to restore process '{}': {}", pid, reason)
            }
            Self::SealedWrite { pid, key } => {
                write!(
                    f,
                    "Cannot set attribute '{}' on node '{}': node is sealed",
                    key, pid
                )
            }
            Self::InvalidTransition { pid, from, to } => {
                write!(
                    f,
                    "Process '{}' cannot move from '{}' to '{}'",
                    pid, from, to
                )
            }
            Self::OutputAlreadyEmitted { pid, port } => {
                write!(
                    f,
                    "Process '{}' already emitted output port '{}'",
                    pid, port
                )
            }
            Self::UnknownOutputPort { pid, port } => {
                write!(f, "Process '{}' has no output port '{}'", pid, port)
            }
            Self::MissingOutput { pid, port } => {
                write!(
                    f,
                    "Process '{}' finished without required output '{}'",
                    pid, port
                )
            }
            Self::OutputRejected { pid, port, state } => {
                write!(
                    f,
                    "Process '{}' cannot emit '{}' while {}",
                    pid, port, state
                )
            }
            Self::ProcessFailed { pid, message } => {
                write!(f, "Process '{}' failed: {}", pid, message)
            }
            Self::ReentrantProcess { pid } => {
                write!(f, "Process '{}' is already on the call stack", pid)
            }
            Self::UnknownProcessType { type_name } => {
                write!(f, "Process type '{}' is not registered", type_name)
            }
            Self::Unsupported { operation } => {
                write!(f, "Operation '{}' is not supported", operation)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pid() -> Pid {
        Pid::from(Uuid::nil())
    }

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (CoreError::validation("code_type", "bad"), "VALIDATION_ERROR"),
            (CoreError::NodeNotFound { pid: pid() }, "NODE_NOT_FOUND"),
            (
                CoreError::CheckpointNotFound {
                    pid: pid(),
                    tag: None,
                },
                "CHECKPOINT_NOT_FOUND",
            ),
            (
                CoreError::StateRestoration {
                    pid: pid(),
                    reason: "class mismatch".to_string(),
                },
                "STATE_RESTORATION_FAILED",
            ),
            (
                CoreError::SealedWrite {
                    pid: pid(),
                    key: "checkpoint".to_string(),
                },
                "SEALED_WRITE",
            ),
            (
                CoreError::Unsupported {
                    operation: "delete_checkpoint",
                },
                "UNSUPPORTED",
            ),
            (
                CoreError::Database {
                    operation: "insert".to_string(),
                    details: "disk I/O error".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::NodeNotFound { pid: pid() };
        assert_eq!(
            err.to_string(),
            "Node '00000000-0000-0000-0000-000000000000' not found"
        );

        let err = CoreError::CheckpointNotFound {
            pid: pid(),
            tag: Some("before-submit".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Checkpoint 'before-submit' not found for process '00000000-0000-0000-0000-000000000000'"
        );

        let err = CoreError::InvalidTransition {
            pid: pid(),
            from: ProcessState::Finished,
            to: ProcessState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Process '00000000-0000-0000-0000-000000000000' cannot move from 'finished' to 'running'"
        );

        let err = CoreError::validation("label", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Validation error for 'label': must not be empty"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(CoreError::NodeNotFound { pid: pid() }.is_not_found());
        assert!(
            CoreError::CheckpointNotFound {
                pid: pid(),
                tag: None
            }
            .is_not_found()
        );
        assert!(!CoreError::validation("x", "y").is_not_found());
    }
}

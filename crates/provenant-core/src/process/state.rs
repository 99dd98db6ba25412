// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process lifecycle states and the transitions allowed between them.
//!
//! ```text
//!   CREATED ──► RUNNING ◄──► WAITING
//!      │           │            │
//!      │           ├──► FINISHED┤
//!      │           │            │
//!      └──────► FAILED ◄────────┘
//!                  │
//!     FINISHED ─► STOPPED ─► DESTROYED
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a process in its run state machine.
///
/// Serialized as the same string that is stored on process nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum ProcessState {
    /// Created and initialised, not yet running.
    Created,
    /// Executing outline steps.
    Running,
    /// Suspended on a wait condition.
    Waiting,
    /// Outline exhausted successfully.
    Finished,
    /// Body raised an error.
    Failed,
    /// Cleanup hook has run.
    Stopped,
    /// Torn down; the live process is no longer observable.
    Destroyed,
}

impl ProcessState {
    /// Returns the string representation stored on process nodes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
        }
    }

    /// Parse a state from its stored string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "waiting" => Some(Self::Waiting),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            "destroyed" => Some(Self::Destroyed),
            _ => None,
        }
    }

    /// Whether the machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Failed)
                | (Running, Waiting)
                | (Running, Finished)
                | (Running, Failed)
                | (Waiting, Running)
                | (Waiting, Failed)
                | (Finished, Stopped)
                | (Failed, Stopped)
                | (Stopped, Destroyed)
        )
    }

    /// No further progress can be made from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Stopped | Self::Destroyed
        )
    }
}

impl From<ProcessState> for &'static str {
    fn from(state: ProcessState) -> Self {
        state.as_str()
    }
}

impl TryFrom<String> for ProcessState {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("unknown process state '{}'", s))
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

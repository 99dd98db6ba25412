// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provenant Core - Resumable Process Engine
//!
//! This crate runs processes that can be checkpointed into a provenance graph
//! and resumed later, possibly by a different daemon. Every process is backed
//! by a node in the [`store`]; its pid is the node's UUID.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │  Runtime::run / spawn    │      │  Runtime::submit         │
//! │  (blocking execution)    │      │  (daemon-driven)         │
//! └────────────┬─────────────┘      └────────────┬─────────────┘
//!              │                                 │
//!              ▼                                 ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │  ProcessInstance         │◄─────│  daemon::tick_workflow_  │
//! │  (state machine, hooks)  │      │  engine (resume pending) │
//! └────────────┬─────────────┘      └──────────────────────────┘
//!              │ Bundle
//!              ▼
//! ┌──────────────────────────┐
//! │  DatabasePersister       │
//! │  (checkpoint attribute)  │
//! └────────────┬─────────────┘
//!              ▼
//! ┌──────────────────────────┐
//! │  NodeStore               │
//! │  (SQLite or in-memory)   │
//! └──────────────────────────┘
//! ```
//!
//! # Process State Machine
//!
//! ```text
//!   CREATED ──► RUNNING ──► FINISHED ──► STOPPED ──► DESTROYED
//!                 │  ▲
//!            wait │  │ continue
//!                 ▼  │
//!               WAITING
//!
//!   any non-terminal state ──► FAILED
//! ```
//!
//! # Configuration
//!
//! The daemon binary reads its configuration from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PROVENANT_DATABASE_URL` | Yes | - | SQLite connection URL |
//! | `PROVENANT_TICK_INTERVAL_MS` | No | `1000` | Delay between daemon ticks |
//! | `PROVENANT_MAX_QUERY_RETRIES` | No | `3` | Retries for busy/locked queries |
//! | `PROVENANT_PRINT_EXCEPTIONS` | No | `false` | Surface resume errors from ticks |

/// Built-in process types.
pub mod builtin;

/// Checkpoint bundles: serializable snapshots of a process instance.
pub mod bundle;

/// Codes and the validating code builder.
pub mod code;

/// Computers that remote codes run on.
pub mod computer;

/// Daemon configuration loaded from environment variables.
pub mod config;

/// Daemon tick loop.
pub mod daemon;

/// Error types with stable error codes.
pub mod error;

/// Checkpoint persistence over the node store.
pub mod persister;

/// Process trait, specs, contexts and the instance state machine.
pub mod process;

/// Process-wide record of finished and failed processes.
pub mod registry;

/// Embeddable runtime: submit, run and resume processes.
pub mod runtime;

/// Call stack of running processes.
pub mod stack;

/// Provenance node store backends.
pub mod store;

pub use error::{CoreError, Result};
pub use process::{Inputs, Outputs, Pid, Process, ProcessContext, ProcessSpec, ProcessType};
pub use runtime::Runtime;

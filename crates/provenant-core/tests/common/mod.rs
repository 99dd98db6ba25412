// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test processes and helpers for provenant-core integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::bail;
use provenant_core::builtin::register_builtins;
use provenant_core::process::{
    Inputs, Pid, Process, ProcessContext, ProcessSpec, ProcessType, StepOutcome, ValueType,
    WaitOn,
};
use provenant_core::runtime::Runtime;
use provenant_core::store::SqliteNodeStore;
use serde_json::{Value, json};

/// Runtime over an in-memory SQLite store with the built-ins and the test
/// processes registered.
pub async fn test_runtime() -> Runtime {
    let store = SqliteNodeStore::connect("sqlite::memory:", 3)
        .await
        .expect("Failed to open in-memory SQLite store");
    register_builtins(Runtime::builder())
        .store(Arc::new(store))
        .register::<Squares>()
        .register::<Trivial>()
        .register::<BrokenOnResume>()
        .register::<Failing>()
        .register::<DepthRecorder>()
        .register::<DoubleEmit>()
        .build()
        .expect("Failed to build runtime")
}

/// Inputs from `(name, value)` pairs.
pub fn inputs<const N: usize>(pairs: [(&str, Value); N]) -> Inputs {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// `ctx.a_squared = a * a`, checkpoint, then `sum = b + ctx.a_squared`.
#[derive(Default)]
pub struct Squares;

impl Process for Squares {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new()
            .input("a", ValueType::Integer)
            .input("b", ValueType::Integer)
            .output("sum", ValueType::Integer)
            .outline(["square", "add"])
    }

    fn run_step(&mut self, step: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        match step {
            "square" => {
                let a: i64 = cx.input_as("a")?;
                cx.set_ctx("a_squared", a * a);
                Ok(StepOutcome::Wait(WaitOn::Checkpoint))
            }
            "add" => {
                let b: i64 = cx.input_as("b")?;
                let a_squared: i64 = cx.ctx_as("a_squared")?;
                cx.out("sum", b + a_squared)?;
                Ok(StepOutcome::Next)
            }
            other => bail!("unknown step '{}'", other),
        }
    }
}

impl ProcessType for Squares {
    const TYPE_NAME: &'static str = "tests.squares";
}

/// Single step, no waits.
#[derive(Default)]
pub struct Trivial;

impl Process for Trivial {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new()
            .optional_input("n", ValueType::Integer)
            .optional_output("n", ValueType::Integer)
            .outline(["only"])
    }

    fn run_step(&mut self, _: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        if let Some(n) = cx.input("n").cloned() {
            cx.out("n", n)?;
        }
        Ok(StepOutcome::Next)
    }
}

impl ProcessType for Trivial {
    const TYPE_NAME: &'static str = "tests.trivial";
}

/// Creates fine, but refuses to be restored from a checkpoint.
#[derive(Default)]
pub struct BrokenOnResume;

impl Process for BrokenOnResume {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new().outline(["only"])
    }

    fn on_create(&mut self, _: &mut ProcessContext, saved: Option<&Value>) -> anyhow::Result<()> {
        if saved.is_some() {
            bail!("cannot restore");
        }
        Ok(())
    }

    fn run_step(&mut self, _: &str, _: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        Ok(StepOutcome::Next)
    }
}

impl ProcessType for BrokenOnResume {
    const TYPE_NAME: &'static str = "tests.broken_on_resume";
}

/// The outline step always fails.
#[derive(Default)]
pub struct Failing;

impl Process for Failing {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new().outline(["boom"])
    }

    fn run_step(&mut self, _: &str, _: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        bail!("boom")
    }
}

impl ProcessType for Failing {
    const TYPE_NAME: &'static str = "tests.failing";
}

/// Call stack depth observed by [`DepthRecorder`] hooks, keyed by pid.
pub static DEPTHS: Mutex<Vec<(Pid, &'static str, usize)>> = Mutex::new(Vec::new());

/// Hook names and depths recorded for `pid`.
pub fn depths_of(pid: Pid) -> Vec<(&'static str, usize)> {
    DEPTHS
        .lock()
        .unwrap()
        .iter()
        .filter(|(p, _, _)| *p == pid)
        .map(|(_, hook, depth)| (*hook, *depth))
        .collect()
}

/// Records the stack depth on create and stop; fails its step if `fail` is set.
#[derive(Default)]
pub struct DepthRecorder;

impl DepthRecorder {
    fn record(cx: &ProcessContext, hook: &'static str) {
        DEPTHS
            .lock()
            .unwrap()
            .push((cx.pid(), hook, cx.execution().depth()));
    }
}

impl Process for DepthRecorder {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new()
            .optional_input("fail", ValueType::Bool)
            .outline(["record"])
    }

    fn on_create(&mut self, cx: &mut ProcessContext, _: Option<&Value>) -> anyhow::Result<()> {
        Self::record(cx, "create");
        Ok(())
    }

    fn on_stop(&mut self, cx: &mut ProcessContext) -> anyhow::Result<()> {
        Self::record(cx, "stop");
        Ok(())
    }

    fn run_step(&mut self, _: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        if cx.input("fail") == Some(&json!(true)) {
            bail!("asked to fail");
        }
        Ok(StepOutcome::Next)
    }
}

impl ProcessType for DepthRecorder {
    const TYPE_NAME: &'static str = "tests.depth_recorder";
}

/// Emissions delivered to [`DoubleEmit::on_output_emitted`], keyed by pid.
pub static EMISSIONS: Mutex<Vec<(Pid, String, Value)>> = Mutex::new(Vec::new());

/// Emits `value` once, then checks that a second emission is rejected.
#[derive(Default)]
pub struct DoubleEmit;

impl Process for DoubleEmit {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new()
            .output("value", ValueType::Integer)
            .outline(["emit"])
    }

    fn run_step(&mut self, _: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        cx.out("value", 1)?;
        match cx.out("value", 2) {
            Ok(()) => bail!("second emission was accepted"),
            Err(e) if e.error_code() == "OUTPUT_ALREADY_EMITTED" => Ok(StepOutcome::Next),
            Err(e) => Err(e.into()),
        }
    }

    fn on_output_emitted(
        &mut self,
        cx: &mut ProcessContext,
        port: &str,
        value: &Value,
        _dynamic: bool,
    ) -> anyhow::Result<()> {
        EMISSIONS
            .lock()
            .unwrap()
            .push((cx.pid(), port.to_string(), value.clone()));
        Ok(())
    }
}

impl ProcessType for DoubleEmit {
    const TYPE_NAME: &'static str = "tests.double_emit";
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in process types registered by the daemon binary.

use anyhow::{Context, anyhow};
use serde_json::{Value, json};

use crate::process::{
    ChildOutcome, Inputs, Pid, Process, ProcessContext, ProcessSpec, ProcessType, StepOutcome,
    ValueType,
};
use crate::runtime::RuntimeBuilder;

/// Register every built-in process type.
pub fn register_builtins(builder: RuntimeBuilder) -> RuntimeBuilder {
    builder.register::<ArithmeticAdd>().register::<AddChain>()
}

fn add(x: &Value, y: &Value) -> anyhow::Result<Value> {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        let sum = x.checked_add(y).ok_or_else(|| anyhow!("integer overflow"))?;
        return Ok(json!(sum));
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => Ok(json!(x + y)),
        _ => Err(anyhow!("cannot add {} and {}", x, y)),
    }
}

/// Adds `x` and `y`, emitting `sum`.
#[derive(Debug, Default)]
pub struct ArithmeticAdd;

impl Process for ArithmeticAdd {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new()
            .input("x", ValueType::Number)
            .input("y", ValueType::Number)
            .output("sum", ValueType::Number)
            .outline(["add"])
    }

    fn run_step(&mut self, _step: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        let (x, y) = match (cx.input("x"), cx.input("y")) {
            (Some(x), Some(y)) => (x.clone(), y.clone()),
            _ => return Err(anyhow!("inputs x and y are required")),
        };
        cx.out("sum", add(&x, &y)?)?;
        Ok(StepOutcome::Next)
    }
}

impl ProcessType for ArithmeticAdd {
    const TYPE_NAME: &'static str = "arithmetic.add";
}

/// Computes `(x + y) + z` with two [`ArithmeticAdd`] children, waiting on
/// each one in turn.
#[derive(Debug, Default)]
pub struct AddChain;

const CHILD_KEY: &str = "child";
const PARTIAL_KEY: &str = "partial";

impl AddChain {
    fn child_sum(cx: &ProcessContext) -> anyhow::Result<Value> {
        let pid: Pid = cx.ctx_as(CHILD_KEY).context("no child recorded")?;
        match cx.child_outcome(pid) {
            Some(ChildOutcome::Finished { outputs }) => outputs
                .get("sum")
                .cloned()
                .ok_or_else(|| anyhow!("child {} did not emit 'sum'", pid)),
            Some(ChildOutcome::Failed { message }) => {
                Err(anyhow!("child {} failed: {}", pid, message))
            }
            None => Err(anyhow!("child {} has not finished", pid)),
        }
    }

    fn launch(cx: &mut ProcessContext, x: Value, y: Value) -> StepOutcome {
        let inputs = Inputs::from([("x".to_string(), x), ("y".to_string(), y)]);
        let pid = cx.spawn::<ArithmeticAdd>(inputs);
        cx.set_ctx(CHILD_KEY, pid.to_string());
        cx.wait_for_children()
    }
}

impl Process for AddChain {
    fn spec(&self) -> ProcessSpec {
        ProcessSpec::new()
            .input("x", ValueType::Number)
            .input("y", ValueType::Number)
            .input("z", ValueType::Number)
            .output("result", ValueType::Number)
            .outline(["add_xy", "add_z", "result"])
    }

    fn run_step(&mut self, step: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        let input = |cx: &ProcessContext, name: &str| {
            cx.input(name)
                .cloned()
                .ok_or_else(|| anyhow!("input '{}' is required", name))
        };

        match step {
            "add_xy" => {
                let (x, y) = (input(cx, "x")?, input(cx, "y")?);
                Ok(Self::launch(cx, x, y))
            }
            "add_z" => {
                let partial = Self::child_sum(cx)?;
                cx.set_ctx(PARTIAL_KEY, partial.clone());
                let z = input(cx, "z")?;
                Ok(Self::launch(cx, partial, z))
            }
            "result" => {
                let result = Self::child_sum(cx)?;
                cx.out("result", result)?;
                Ok(StepOutcome::Next)
            }
            other => Err(anyhow!("unknown step '{}'", other)),
        }
    }
}

impl ProcessType for AddChain {
    const TYPE_NAME: &'static str = "arithmetic.add_chain";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_integers() {
        assert_eq!(add(&json!(2), &json!(3)).unwrap(), json!(5));
        assert_eq!(add(&json!(2), &json!(0.5)).unwrap(), json!(2.5));
        assert!(add(&json!(i64::MAX), &json!(1)).is_err());
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plain functions wrapped as single-step processes.

use std::fmt;
use std::sync::Arc;

use super::{Inputs, Outputs, Process, ProcessContext, ProcessSpec, StepOutcome, ValueType};

type Body = Arc<dyn Fn(&Inputs) -> anyhow::Result<Outputs> + Send + Sync>;

/// A function run as a process with a one-step outline.
///
/// Every returned entry is emitted as a dynamic output.
#[derive(Clone)]
pub struct FunctionProcess {
    name: String,
    body: Body,
    params: Vec<String>,
    kwargs: bool,
}

impl FunctionProcess {
    /// Wrap `body` under `name`; the name doubles as the catalog type name.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Inputs) -> anyhow::Result<Outputs> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
            params: Vec::new(),
            kwargs: false,
        }
    }

    /// Declare a required positional parameter.
    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    /// Accept arbitrary extra inputs.
    pub fn with_kwargs(mut self) -> Self {
        self.kwargs = true;
        self
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for FunctionProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionProcess")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("kwargs", &self.kwargs)
            .finish_non_exhaustive()
    }
}

impl Process for FunctionProcess {
    fn spec(&self) -> ProcessSpec {
        let mut spec = self
            .params
            .iter()
            .fold(ProcessSpec::new(), |spec, param| {
                spec.input(param.clone(), ValueType::Any)
            })
            .dynamic_output()
            .outline(["run"]);
        if self.kwargs {
            spec = spec.dynamic_input();
        }
        spec
    }

    fn run_step(&mut self, step: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        anyhow::ensure!(step == "run", "function process has no step '{}'", step);
        let outputs = (self.body)(cx.inputs())?;
        for (port, value) in outputs {
            cx.out(port, value)?;
        }
        Ok(StepOutcome::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add() -> FunctionProcess {
        FunctionProcess::new("tests.add", |inputs: &Inputs| {
            let a = inputs["a"].as_i64().unwrap_or_default();
            let b = inputs["b"].as_i64().unwrap_or_default();
            Ok(Outputs::from([("result".to_string(), json!(a + b))]))
        })
        .with_param("a")
        .with_param("b")
    }

    #[test]
    fn test_spec_declares_params() {
        let spec = add().spec();
        assert_eq!(spec.inputs().len(), 2);
        assert!(spec.has_dynamic_output());
        assert_eq!(spec.steps(), &["run".to_string()]);
    }

    #[test]
    fn test_unknown_inputs_rejected_without_kwargs() {
        let inputs = Inputs::from([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
            ("c".to_string(), json!(3)),
        ]);
        assert!(add().spec().validate_inputs(&inputs).is_err());
        add().with_kwargs().spec().validate_inputs(&inputs).unwrap();
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Name-to-factory catalog used to rebuild processes from checkpoints.
//!
//! A checkpoint only stores the class name. Rust cannot construct a type from
//! a string, so every resumable process type is registered here with a
//! factory producing a default instance; `on_create` then restores its state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::{FunctionProcess, Process, ProcessType};
use crate::error::{CoreError, Result};

/// Builds a fresh, un-initialised process instance.
pub type ProcessFactory = Arc<dyn Fn() -> Box<dyn Process> + Send + Sync>;

/// Registered process types, keyed by type name.
#[derive(Clone, Default)]
pub struct ProcessCatalog {
    factories: Arc<RwLock<HashMap<String, ProcessFactory>>>,
}

impl ProcessCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for a [`ProcessType`].
    pub fn factory_for<P: ProcessType>() -> ProcessFactory {
        Arc::new(|| Box::new(P::default()) as Box<dyn Process>)
    }

    /// Register `P` under its type name. Re-registering is a no-op.
    pub fn register<P: ProcessType>(&self) {
        self.ensure(P::TYPE_NAME, Self::factory_for::<P>);
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register_factory(&self, name: impl Into<String>, factory: ProcessFactory) {
        let name = name.into();
        debug!(type_name = %name, "Registering process type");
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, factory);
    }

    /// Register a function process under its own name.
    pub fn register_function(&self, function: FunctionProcess) {
        let name = function.name().to_string();
        self.register_factory(
            name,
            Arc::new(move || Box::new(function.clone()) as Box<dyn Process>),
        );
    }

    /// Register `name` with the factory from `make` unless already present.
    pub(crate) fn ensure(&self, name: &str, make: impl FnOnce() -> ProcessFactory) {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !factories.contains_key(name) {
            debug!(type_name = %name, "Registering process type");
            factories.insert(name.to_string(), make());
        }
    }

    /// Whether a type is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Build a fresh instance of the type registered under `name`.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Process>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownProcessType {
                type_name: name.to_string(),
            })?;
        Ok(factory())
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ProcessCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCatalog")
            .field("types", &self.names())
            .finish()
    }
}

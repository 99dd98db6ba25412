// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Codes and their incrementally validated builder.
//!
//! A code is either uploaded from a local folder with every calculation
//! (`StoreAndUpload`) or already installed on a computer (`OnComputer`).
//! [`CodeBuilder`] applies every setter to a scratch copy of its draft and
//! only keeps the change when all checks pass, so the draft is always a valid
//! (possibly incomplete) configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::computer::Computer;
use crate::error::{CoreError, Result};
use crate::store::{NewNode, NodeStore, NodeType};

/// How a code reaches the computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    /// Stored with the provenance graph and uploaded for every run.
    StoreAndUpload,
    /// Pre-installed on a computer.
    OnComputer,
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreAndUpload => f.write_str("store in the db and upload"),
            Self::OnComputer => f.write_str("on computer"),
        }
    }
}

/// Draft code configuration. Every field is optional until [`CodeBuilder::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSpec {
    /// How the code reaches the computer.
    pub code_type: Option<CodeType>,
    /// Short name, shown as `label@computer` for remote codes.
    pub label: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Calculation plugin that writes this code's input files.
    pub input_plugin: Option<String>,
    /// Name of the computer an on-computer code is installed on.
    pub computer: Option<String>,
    /// Absolute path of the executable on that computer.
    pub remote_abs_path: Option<PathBuf>,
    /// Local folder uploaded with every store-and-upload run.
    pub code_folder: Option<PathBuf>,
    /// Executable path relative to `code_folder`.
    pub code_rel_path: Option<PathBuf>,
    /// Shell text run before the executable.
    pub prepend_text: Option<String>,
    /// Shell text run after the executable.
    pub append_text: Option<String>,
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the check.
    pub check: &'static str,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.check, self.message)
    }
}

/// Every violated check of a rejected configuration, in check order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("The following errors were encountered: {}", join(.violations))]
pub struct CodeValidationError {
    /// Violations in check order.
    pub violations: Vec<Violation>,
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CodeValidationError {
    /// Whether a check with this name failed.
    pub fn has(&self, check: &str) -> bool {
        self.violations.iter().any(|v| v.check == check)
    }
}

impl From<CodeValidationError> for CoreError {
    fn from(err: CodeValidationError) -> Self {
        CoreError::validation("code", err.to_string())
    }
}

type Check = fn(&CodeSpec, &mut Vec<Violation>);

/// Consistency checks run on every change, in this order.
const CHECKS: [Check; 3] = [check_store_and_upload, check_on_computer, check_label];

fn check_store_and_upload(spec: &CodeSpec, out: &mut Vec<Violation>) {
    if spec.code_type != Some(CodeType::StoreAndUpload) {
        return;
    }
    if spec.computer.is_some() {
        out.push(Violation {
            check: "store_and_upload",
            message: "invalid option for store-and-upload code: \"computer\"".to_string(),
        });
    }
    if spec.remote_abs_path.is_some() {
        out.push(Violation {
            check: "store_and_upload",
            message: "invalid option for store-and-upload code: \"remote_abs_path\"".to_string(),
        });
    }
}

fn check_on_computer(spec: &CodeSpec, out: &mut Vec<Violation>) {
    if spec.code_type != Some(CodeType::OnComputer) {
        return;
    }
    if spec.code_folder.is_some() {
        out.push(Violation {
            check: "on_computer",
            message: "invalid option for on-computer code: \"code_folder\"".to_string(),
        });
    }
    if spec.code_rel_path.is_some() {
        out.push(Violation {
            check: "on_computer",
            message: "invalid option for on-computer code: \"code_rel_path\"".to_string(),
        });
    }
}

fn check_label(spec: &CodeSpec, out: &mut Vec<Violation>) {
    if let Some(label) = &spec.label {
        if label.trim().is_empty() {
            out.push(Violation {
                check: "label",
                message: "must not be empty".to_string(),
            });
        } else if label.contains('@') {
            out.push(Violation {
                check: "label",
                message: "must not contain '@'".to_string(),
            });
        }
    }
}

fn validate(spec: &CodeSpec) -> std::result::Result<(), CodeValidationError> {
    let mut violations = Vec::new();
    for check in CHECKS {
        check(spec, &mut violations);
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CodeValidationError { violations })
    }
}

/// Builds a [`Code`] from validated settings.
#[derive(Debug, Clone, Default)]
pub struct CodeBuilder {
    spec: CodeSpec,
}

type BuilderResult<'a> = std::result::Result<&'a mut CodeBuilder, CodeValidationError>;

impl CodeBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete draft, rejecting it if inconsistent.
    pub fn from_spec(spec: CodeSpec) -> std::result::Result<Self, CodeValidationError> {
        validate(&spec)?;
        Ok(Self { spec })
    }

    /// The current, always consistent draft.
    pub fn spec(&self) -> &CodeSpec {
        &self.spec
    }

    /// Apply `change` to a scratch copy and keep it only if every check passes.
    fn update(&mut self, change: impl FnOnce(&mut CodeSpec)) -> BuilderResult<'_> {
        let mut scratch = self.spec.clone();
        change(&mut scratch);
        validate(&scratch)?;
        self.spec = scratch;
        Ok(self)
    }

    /// Set the code type; the location fields already set must fit it.
    pub fn code_type(&mut self, code_type: CodeType) -> BuilderResult<'_> {
        self.update(|spec| spec.code_type = Some(code_type))
    }

    /// Set the label. Empty labels and labels containing `@` are rejected.
    pub fn label(&mut self, label: impl Into<String>) -> BuilderResult<'_> {
        let label = label.into();
        self.update(|spec| spec.label = Some(label))
    }

    /// Set the description.
    pub fn description(&mut self, description: impl Into<String>) -> BuilderResult<'_> {
        let description = description.into();
        self.update(|spec| spec.description = Some(description))
    }

    /// Set the input plugin.
    pub fn input_plugin(&mut self, plugin: impl Into<String>) -> BuilderResult<'_> {
        let plugin = plugin.into();
        self.update(|spec| spec.input_plugin = Some(plugin))
    }

    /// Set the computer. Rejected for store-and-upload codes.
    pub fn computer(&mut self, computer: impl Into<String>) -> BuilderResult<'_> {
        let computer = computer.into();
        self.update(|spec| spec.computer = Some(computer))
    }

    /// Set the remote executable path. Rejected for store-and-upload codes.
    pub fn remote_abs_path(&mut self, path: impl Into<PathBuf>) -> BuilderResult<'_> {
        let path = path.into();
        self.update(|spec| spec.remote_abs_path = Some(path))
    }

    /// Set the local code folder. Rejected for on-computer codes.
    pub fn code_folder(&mut self, folder: impl Into<PathBuf>) -> BuilderResult<'_> {
        let folder = folder.into();
        self.update(|spec| spec.code_folder = Some(folder))
    }

    /// Set the executable path inside the code folder. Rejected for on-computer codes.
    pub fn code_rel_path(&mut self, path: impl Into<PathBuf>) -> BuilderResult<'_> {
        let path = path.into();
        self.update(|spec| spec.code_rel_path = Some(path))
    }

    /// Set the text run before the executable.
    pub fn prepend_text(&mut self, text: impl Into<String>) -> BuilderResult<'_> {
        let text = text.into();
        self.update(|spec| spec.prepend_text = Some(text))
    }

    /// Set the text run after the executable.
    pub fn append_text(&mut self, text: impl Into<String>) -> BuilderResult<'_> {
        let text = text.into();
        self.update(|spec| spec.append_text = Some(text))
    }

    /// Produce the code. Beyond the consistency checks this requires a code
    /// type, a label and the location fields of that type, and lists the
    /// files of the code folder.
    pub fn build(&self) -> std::result::Result<Code, CodeValidationError> {
        validate(&self.spec)?;

        let spec = &self.spec;
        let mut violations = Vec::new();
        let required = |check: &'static str, field: &str| Violation {
            check,
            message: format!("\"{}\" is required", field),
        };

        if spec.label.is_none() {
            violations.push(required("label", "label"));
        }

        let location = match spec.code_type {
            None => {
                violations.push(required("code_type", "code_type"));
                None
            }
            Some(CodeType::StoreAndUpload) => {
                if spec.code_folder.is_none() {
                    violations.push(required("store_and_upload", "code_folder"));
                }
                if spec.code_rel_path.is_none() {
                    violations.push(required("store_and_upload", "code_rel_path"));
                }
                match (&spec.code_folder, &spec.code_rel_path) {
                    (Some(folder), Some(executable)) => match list_folder(folder) {
                        Ok(files) => Some(CodeLocation::Local {
                            executable: executable.clone(),
                            files,
                        }),
                        Err(violation) => {
                            violations.push(violation);
                            None
                        }
                    },
                    _ => None,
                }
            }
            Some(CodeType::OnComputer) => {
                if spec.computer.is_none() {
                    violations.push(required("on_computer", "computer"));
                }
                match &spec.remote_abs_path {
                    None => violations.push(required("on_computer", "remote_abs_path")),
                    Some(path) if !path.is_absolute() => violations.push(Violation {
                        check: "on_computer",
                        message: "\"remote_abs_path\" must be absolute".to_string(),
                    }),
                    Some(_) => {}
                }
                match (&spec.computer, &spec.remote_abs_path) {
                    (Some(computer), Some(path)) => Some(CodeLocation::Remote {
                        computer: computer.clone(),
                        executable: path.clone(),
                    }),
                    _ => None,
                }
            }
        };

        match location {
            Some(location) if violations.is_empty() => Ok(Code {
                label: spec.label.clone().unwrap_or_default(),
                description: spec.description.clone().unwrap_or_default(),
                input_plugin: spec.input_plugin.clone(),
                location,
                prepend_text: spec.prepend_text.clone().unwrap_or_default(),
                append_text: spec.append_text.clone().unwrap_or_default(),
            }),
            _ => Err(CodeValidationError { violations }),
        }
    }
}

/// Absolute paths of the entries in `folder`, sorted.
fn list_folder(folder: &Path) -> std::result::Result<Vec<PathBuf>, Violation> {
    let unreadable = |e: std::io::Error| Violation {
        check: "store_and_upload",
        message: format!("cannot read code folder {:?}: {}", folder, e),
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        files.push(std::fs::canonicalize(&path).map_err(unreadable)?);
    }
    files.sort();
    Ok(files)
}

/// Where the executable lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeLocation {
    /// Uploaded from local files.
    Local {
        /// Executable path relative to the uploaded folder.
        executable: PathBuf,
        /// Files to upload.
        files: Vec<PathBuf>,
    },
    /// Installed on a computer.
    Remote {
        /// Computer name.
        computer: String,
        /// Absolute path of the executable on the computer.
        executable: PathBuf,
    },
}

/// A complete code, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    /// Short name.
    pub label: String,
    /// Free-form description.
    pub description: String,
    /// Calculation plugin, if any.
    pub input_plugin: Option<String>,
    /// Where the executable lives.
    pub location: CodeLocation,
    /// Shell text run before the executable.
    pub prepend_text: String,
    /// Shell text run after the executable.
    pub append_text: String,
}

impl Code {
    /// `label@computer` for remote codes, the plain label otherwise.
    pub fn full_label(&self) -> String {
        match &self.location {
            CodeLocation::Local { .. } => self.label.clone(),
            CodeLocation::Remote { computer, .. } => format!("{}@{}", self.label, computer),
        }
    }

    /// Whether the code is uploaded from local files.
    pub fn is_local(&self) -> bool {
        matches!(self.location, CodeLocation::Local { .. })
    }

    /// Store as a sealed `code` node. Remote codes need their computer to be
    /// stored first.
    pub async fn store(&self, store: &dyn NodeStore) -> Result<Uuid> {
        if let CodeLocation::Remote { computer, .. } = &self.location
            && Computer::find(store, computer).await?.is_none()
        {
            return Err(CoreError::validation(
                "computer",
                format!("computer '{}' is not configured", computer),
            ));
        }

        let mut node = NewNode::new(Uuid::new_v4(), NodeType::Code);
        node.label = self.label.clone();
        node.description = self.description.clone();
        if let Value::Object(attributes) = serde_json::to_value(self)? {
            node.attributes = attributes;
        }

        let record = store.create_node(node).await?;
        store.seal_node(record.uuid).await?;
        info!(uuid = %record.uuid, label = %self.full_label(), "Code stored");
        Ok(record.uuid)
    }

    /// Load a stored code.
    pub async fn load(store: &dyn NodeStore, uuid: Uuid) -> Result<Code> {
        let node = store.load_node(uuid).await?;
        if node.node_type != NodeType::Code {
            return Err(CoreError::validation(
                "code",
                format!("node '{}' is a {} node", uuid, node.node_type.as_str()),
            ));
        }
        Ok(serde_json::from_value(Value::Object(node.attributes))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNodeStore;

    #[test]
    fn test_contradictory_setter_keeps_previous_spec() {
        let mut builder = CodeBuilder::new();
        builder
            .code_type(CodeType::StoreAndUpload)
            .unwrap()
            .label("pw")
            .unwrap();
        let before = builder.spec().clone();

        let err = builder.computer("localhost").unwrap_err();
        assert!(err.has("store_and_upload"));
        assert_eq!(builder.spec(), &before);
    }

    #[test]
    fn test_switching_code_type_reports_every_violation() {
        let mut builder = CodeBuilder::new();
        builder
            .code_folder("/tmp/code")
            .unwrap()
            .code_rel_path("bin/run.sh")
            .unwrap();

        let err = builder.code_type(CodeType::OnComputer).unwrap_err();
        assert_eq!(err.violations.len(), 2);
        assert!(err.violations.iter().all(|v| v.check == "on_computer"));
        assert_eq!(builder.spec().code_type, None);
    }

    #[test]
    fn test_label_checks() {
        let mut builder = CodeBuilder::new();
        assert!(builder.label("pw@cluster").unwrap_err().has("label"));
        assert!(builder.label("  ").unwrap_err().has("label"));
        builder.label("pw").unwrap();
    }

    #[test]
    fn test_from_spec_validates() {
        let spec = CodeSpec {
            code_type: Some(CodeType::OnComputer),
            code_folder: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        assert!(CodeBuilder::from_spec(spec).is_err());
    }

    #[test]
    fn test_build_requires_location_fields() {
        let mut builder = CodeBuilder::new();
        builder
            .code_type(CodeType::OnComputer)
            .unwrap()
            .label("pw")
            .unwrap();

        let err = builder.build().unwrap_err();
        assert_eq!(err.violations.len(), 2);

        builder.computer("localhost").unwrap();
        builder.remote_abs_path("relative/pw.x").unwrap();
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn test_build_local_code_lists_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), "#!/bin/sh\n").unwrap();
        std::fs::write(dir.path().join("input.txt"), "x").unwrap();

        let mut builder = CodeBuilder::new();
        builder
            .code_type(CodeType::StoreAndUpload)
            .unwrap()
            .label("script")
            .unwrap()
            .code_folder(dir.path())
            .unwrap()
            .code_rel_path("run.sh")
            .unwrap();

        let code = builder.build().unwrap();
        let CodeLocation::Local { executable, files } = &code.location else {
            panic!("expected a local code");
        };
        assert_eq!(executable, &PathBuf::from("run.sh"));
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.is_absolute()));
        assert_eq!(code.full_label(), "script");
    }

    #[tokio::test]
    async fn test_remote_code_needs_stored_computer() {
        let store = MemoryNodeStore::new();
        let mut builder = CodeBuilder::new();
        builder
            .code_type(CodeType::OnComputer)
            .unwrap()
            .label("pw")
            .unwrap()
            .computer("localhost")
            .unwrap()
            .remote_abs_path("/usr/bin/pw.x")
            .unwrap()
            .input_plugin("quantumespresso.pw")
            .unwrap();
        let code = builder.build().unwrap();
        assert_eq!(code.full_label(), "pw@localhost");

        assert!(code.store(&store).await.is_err());

        Computer::localhost("localhost", "/tmp")
            .store(&store)
            .await
            .unwrap();
        let uuid = code.store(&store).await.unwrap();

        let node = store.load_node(uuid).await.unwrap();
        assert!(node.sealed);
        assert_eq!(Code::load(&store, uuid).await.unwrap(), code);
    }
}

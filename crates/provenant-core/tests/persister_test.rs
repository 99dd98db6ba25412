// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checkpoint save/restore against the SQLite node store.

mod common;

use common::*;
use provenant_core::daemon::tick_workflow_engine;
use provenant_core::error::CoreError;
use provenant_core::persister::Persister;
use provenant_core::process::{ProcessState, ProcessType};
use provenant_core::runtime::OUTPUTS_ATTR;
use provenant_core::stack::ExecutionContext;
use serde_json::json;

#[tokio::test]
async fn test_resumed_run_matches_direct_run() {
    let runtime = test_runtime().await;
    let direct = runtime
        .run::<Squares>(inputs([("a", json!(2)), ("b", json!(4))]))
        .await
        .unwrap();
    assert_eq!(direct["sum"], json!(8));

    let pid = runtime
        .submit::<Squares>(inputs([("a", json!(2)), ("b", json!(4))]))
        .await
        .unwrap();

    // First tick suspends at the checkpoint barrier
    assert!(tick_workflow_engine(&runtime, true).await.unwrap());
    let bundle = runtime.persister().load_checkpoint(pid, None).await.unwrap();
    assert_eq!(bundle.state(), ProcessState::Waiting);
    assert_eq!(bundle.cursor(), 1);
    assert_eq!(bundle.ctx()["a_squared"], json!(4));

    assert!(!tick_workflow_engine(&runtime, true).await.unwrap());
    assert!(runtime.registry().has_finished(pid));

    let outputs = runtime
        .store()
        .get_attr(pid.as_uuid(), OUTPUTS_ATTR)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outputs, json!({"sum": 8}));
    assert_eq!(outputs["sum"], direct["sum"]);
}

#[tokio::test]
async fn test_pid_is_node_uuid() {
    let runtime = test_runtime().await;
    let pid = runtime
        .submit::<Squares>(inputs([("a", json!(1)), ("b", json!(1))]))
        .await
        .unwrap();

    let node = runtime.store().load_node(pid.as_uuid()).await.unwrap();
    assert_eq!(node.uuid, pid.as_uuid());
    assert_eq!(node.process_type.as_deref(), Some(Squares::TYPE_NAME));

    let bundle = runtime.persister().load_checkpoint(pid, None).await.unwrap();
    assert_eq!(bundle.pid(), pid);
    assert_eq!(bundle.class(), Squares::TYPE_NAME);
}

#[tokio::test]
async fn test_sealed_node_rejects_checkpoint() {
    let runtime = test_runtime().await;
    let (_, pid) = runtime
        .run_with_pid::<Squares>(inputs([("a", json!(3)), ("b", json!(1))]))
        .await
        .unwrap();

    let before = runtime.store().load_node(pid.as_uuid()).await.unwrap();
    assert!(before.is_sealed());

    // The last checkpoint written before finishing is still on the node
    let bundle = runtime.persister().load_checkpoint(pid, None).await.unwrap();
    let instance = bundle
        .unbundle(runtime.catalog(), ExecutionContext::new())
        .unwrap();

    let err = runtime
        .persister()
        .save_checkpoint(&instance, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SealedWrite { .. }));

    let err = runtime
        .persister()
        .save_checkpoint(&instance, Some("late"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SEALED_WRITE");

    let after = runtime.store().load_node(pid.as_uuid()).await.unwrap();
    assert_eq!(before.attributes, after.attributes);
}

#[tokio::test]
async fn test_admin_operations_are_unsupported() {
    let runtime = test_runtime().await;
    let pid = runtime.submit::<Trivial>(Default::default()).await.unwrap();
    let persister = runtime.persister();

    assert!(matches!(
        persister.delete_checkpoint(pid, None).await,
        Err(CoreError::Unsupported { .. })
    ));
    assert!(matches!(
        persister.delete_process_checkpoints(pid).await,
        Err(CoreError::Unsupported { .. })
    ));
    assert!(matches!(
        persister.get_checkpoints().await,
        Err(CoreError::Unsupported { .. })
    ));
    assert!(matches!(
        persister.get_process_checkpoints(pid).await,
        Err(CoreError::Unsupported { .. })
    ));

    // Nothing was removed
    persister.load_checkpoint(pid, None).await.unwrap();
}

#[tokio::test]
async fn test_checkpoint_on_disk_survives_reopen() {
    use provenant_core::runtime::Runtime;
    use provenant_core::store::SqliteNodeStore;
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("provenance.db");

    let pid = {
        let store = SqliteNodeStore::from_path(&path).await.unwrap();
        let runtime = Runtime::builder()
            .store(Arc::new(store))
            .register::<Squares>()
            .build()
            .unwrap();
        let pid = runtime
            .submit::<Squares>(inputs([("a", json!(2)), ("b", json!(4))]))
            .await
            .unwrap();
        tick_workflow_engine(&runtime, true).await.unwrap();
        pid
    };

    // A fresh runtime, as a restarted daemon would have
    let store = SqliteNodeStore::from_path(&path).await.unwrap();
    let runtime = Runtime::builder()
        .store(Arc::new(store))
        .register::<Squares>()
        .build()
        .unwrap();
    while tick_workflow_engine(&runtime, true).await.unwrap() {}

    assert!(runtime.registry().has_finished(pid));
    let node = runtime.store().load_node(pid.as_uuid()).await.unwrap();
    assert_eq!(node.get_attr(OUTPUTS_ATTR), Some(&json!({"sum": 8})));
}

#![cfg(unix)]

mod common;

use common::{create_params, eventually, harness, harness_with_engine, write_params, RecordingEngine};
use serde_json::Value;
use shell_session_registry::error::AppError;
use shell_session_registry::tools::callback::EventKind;
use shell_session_registry::tools::terminal_tool::{CreateTerminalParams, DestroyTerminalParams};
use std::sync::Arc;
use std::time::Duration;

fn destroy_params(name: &str) -> DestroyTerminalParams {
    DestroyTerminalParams { name: name.to_string() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn echo_reaches_output_callback_and_blank_lines_do_not() {
    let h = harness();
    h.manager.create(&create_params("a", Some("on-out"), None)).await.unwrap();

    h.manager.write(&write_params("a", "echo hi")).await.unwrap();
    h.manager.write(&write_params("a", "echo")).await.unwrap();
    h.manager.write(&write_params("a", "echo done")).await.unwrap();

    assert!(eventually(|| h.engine.has_line("a", EventKind::Output, "done")).await);
    let delivered = h.engine.for_session("a");
    let texts: Vec<&Value> = delivered.iter().map(|d| &d.argument).collect();
    assert_eq!(texts, vec![&Value::from("hi"), &Value::from("done")]);
    assert!(delivered.iter().all(|d| d.program == "on-out"));

    h.manager.destroy(&destroy_params("a")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stderr_lines_go_to_error_callback() {
    let h = harness();
    h.manager.create(&create_params("e", Some("on-out"), Some("on-err"))).await.unwrap();

    h.manager.write(&write_params("e", "echo oops 1>&2")).await.unwrap();

    assert!(eventually(|| h.engine.has_line("e", EventKind::Error, "oops")).await);
    let err = h
        .engine
        .for_session("e")
        .into_iter()
        .find(|d| d.kind == EventKind::Error)
        .unwrap();
    assert_eq!(err.program, "on-err");

    h.manager.destroy(&destroy_params("e")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_with_same_name_have_one_winner() {
    let h = harness();
    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.create(&create_params("dup", None, None)).await })
        })
        .collect();

    let mut successes = 0;
    let mut invalid = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::InvalidArgument(_)) => invalid += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(invalid, 7);
    assert_eq!(h.manager.registry().len(), 1);

    h.manager.destroy(&destroy_params("dup")).await.unwrap();
    assert!(eventually(|| h.scopes.released() == h.scopes.created()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_after_destroy_is_not_found() {
    let h = harness();
    h.manager.create(&create_params("gone", None, None)).await.unwrap();

    let result = h.manager.destroy(&destroy_params("gone")).await.unwrap();
    assert!(result.destroyed);

    let err = h.manager.write(&write_params("gone", "echo hi")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(name) if name == "gone"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shell_exit_removes_session_without_destroy() {
    let h = harness();
    h.manager.create(&create_params("quitter", Some("on-out"), None)).await.unwrap();

    h.manager.write(&write_params("quitter", "echo one; echo two; exit")).await.unwrap();

    assert!(eventually(|| h.manager.registry().lookup("quitter").is_none()).await);
    assert!(eventually(|| h.engine.has_exit("quitter")).await);

    let delivered = h.engine.for_session("quitter");
    let last = delivered.last().unwrap();
    assert_eq!(last.kind, EventKind::Exited);
    assert_eq!(last.argument, Value::Null);
    assert!(h.engine.has_line("quitter", EventKind::Output, "one"));
    assert!(h.engine.has_line("quitter", EventKind::Output, "two"));
    assert_eq!(delivered.iter().filter(|d| d.kind == EventKind::Exited).count(), 1);

    assert!(eventually(|| h.scopes.released() == 1).await);
    let err = h.manager.write(&write_params("quitter", "echo hi")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // Destroying after a spontaneous exit is a benign no-op.
    let result = h.manager.destroy(&destroy_params("quitter")).await.unwrap();
    assert!(!result.destroyed);
    assert_eq!(h.scopes.released(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn destroy_twice_is_safe_and_leaves_others_alone() {
    let h = harness();
    h.manager.create(&create_params("a", None, None)).await.unwrap();
    h.manager.create(&create_params("b", Some("on-b"), None)).await.unwrap();

    assert!(h.manager.destroy(&destroy_params("a")).await.unwrap().destroyed);
    assert!(!h.manager.destroy(&destroy_params("a")).await.unwrap().destroyed);

    assert!(h.manager.registry().lookup("b").is_some());
    h.manager.write(&write_params("b", "echo still-here")).await.unwrap();
    assert!(eventually(|| h.engine.has_line("b", EventKind::Output, "still-here")).await);

    h.manager.destroy(&destroy_params("b")).await.unwrap();
    assert_eq!(h.scopes.created(), 2);
    assert!(eventually(|| h.scopes.released() == 2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_sessions_never_cross_deliver() {
    let h = harness();
    h.manager.create(&create_params("a", Some("on-a"), None)).await.unwrap();
    h.manager.create(&create_params("b", Some("on-b"), None)).await.unwrap();

    for i in 0..5 {
        h.manager.write(&write_params("a", &format!("echo from-a-{i}"))).await.unwrap();
        h.manager.write(&write_params("b", &format!("echo from-b-{i}"))).await.unwrap();
    }

    assert!(eventually(|| h.engine.for_session("a").len() == 5 && h.engine.for_session("b").len() == 5).await);

    for (session, program, prefix) in [("a", "on-a", "from-a-"), ("b", "on-b", "from-b-")] {
        let delivered = h.engine.for_session(session);
        let expected: Vec<Value> = (0..5).map(|i| Value::from(format!("{prefix}{i}"))).collect();
        let actual: Vec<Value> = delivered.iter().map(|d| d.argument.clone()).collect();
        assert_eq!(actual, expected, "session {session} saw foreign or reordered output");
        assert!(delivered.iter().all(|d| d.program == program));
    }

    h.manager.destroy_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_callback_does_not_stop_the_pump() {
    let h = harness();
    h.manager.create(&create_params("f", Some("on-out"), None)).await.unwrap();

    h.manager.write(&write_params("f", "echo boom")).await.unwrap();
    h.manager.write(&write_params("f", "echo after")).await.unwrap();

    assert!(eventually(|| h.engine.has_line("f", EventKind::Output, "after")).await);
    assert!(h.engine.has_line("f", EventKind::Output, "boom"));
    assert!(h.manager.registry().lookup("f").is_some());

    h.manager.destroy(&destroy_params("f")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn destroy_delivers_exit_last_and_releases_scope_once() {
    let h = harness();
    h.manager.create(&create_params("d", Some("on-out"), None)).await.unwrap();
    h.manager.write(&write_params("d", "echo before")).await.unwrap();
    assert!(eventually(|| h.engine.has_line("d", EventKind::Output, "before")).await);

    h.manager.destroy(&destroy_params("d")).await.unwrap();

    let delivered = h.engine.for_session("d");
    assert_eq!(delivered.last().map(|d| d.kind), Some(EventKind::Exited));
    assert_eq!(h.scopes.released(), 1);
    assert!(h.manager.list_sessions().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn name_can_be_reused_after_destroy() {
    let h = harness();
    h.manager.create(&create_params("again", None, None)).await.unwrap();
    h.manager.destroy(&destroy_params("again")).await.unwrap();

    h.manager.create(&create_params("again", Some("on-out"), None)).await.unwrap();
    h.manager.write(&write_params("again", "echo second")).await.unwrap();
    assert!(eventually(|| h.engine.has_line("again", EventKind::Output, "second")).await);
    assert!(h.manager.registry().lookup("again").is_some());

    h.manager.destroy(&destroy_params("again")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn working_folder_is_resolved_against_root() {
    let h = harness();
    std::fs::create_dir(h.root.path().join("sub")).unwrap();
    let params = CreateTerminalParams {
        working_folder: Some("sub".to_string()),
        ..create_params("cwd", Some("on-out"), None)
    };
    let info = h.manager.create(&params).await.unwrap();
    let expected = dunce::canonicalize(h.root.path().join("sub")).unwrap();
    assert_eq!(info.working_directory, expected.display().to_string());

    h.manager.write(&write_params("cwd", "pwd")).await.unwrap();
    let expected_line = expected.display().to_string();
    assert!(eventually(|| h.engine.has_line("cwd", EventKind::Output, &expected_line)).await);

    h.manager.destroy(&destroy_params("cwd")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_requests_leave_registry_unchanged() {
    let h = harness();

    let err = h.manager.create(&create_params("  ", None, None)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));

    let params = CreateTerminalParams {
        working_folder: Some("missing-dir".to_string()),
        ..create_params("nowhere", None, None)
    };
    assert!(matches!(h.manager.create(&params).await, Err(AppError::InvalidArgument(_))));

    let err = h.manager.write(&write_params("nobody", "echo hi")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    h.manager.create(&create_params("x", None, None)).await.unwrap();
    let err = h.manager.write(&write_params("x", "")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));
    let err = h.manager.write(&write_params("x", "sudo ls")).await.unwrap_err();
    assert!(matches!(err, AppError::CommandBlocked(_)));

    assert_eq!(h.manager.registry().names(), vec!["x".to_string()]);
    assert_eq!(h.scopes.created(), 1);
    h.manager.destroy(&destroy_params("x")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_callbacks_still_see_every_line_before_exit() {
    // Each callback outlasts the post-exit drain period several times over.
    let h = harness_with_engine(Arc::new(RecordingEngine::slow(Duration::from_millis(300))));
    h.manager.create(&create_params("slow", Some("on-out"), None)).await.unwrap();

    h.manager
        .write(&write_params("slow", "echo l1; echo l2; echo l3; echo l4; exit"))
        .await
        .unwrap();

    assert!(eventually(|| h.engine.has_exit("slow")).await);
    let finished: Vec<Value> = h.engine.for_session("slow").into_iter().map(|d| d.argument).collect();
    assert_eq!(
        finished,
        vec![
            Value::from("l1"),
            Value::from("l2"),
            Value::from("l3"),
            Value::from("l4"),
            Value::Null
        ]
    );
    assert_eq!(h.engine.started(), finished);
    assert!(h.manager.registry().lookup("slow").is_none());
    assert!(eventually(|| h.scopes.released() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn background_job_holding_output_does_not_block_exit() {
    let h = harness();
    h.manager.create(&create_params("bg", Some("on-out"), None)).await.unwrap();

    h.manager.write(&write_params("bg", "echo started; sleep 5 & exit")).await.unwrap();

    assert!(eventually(|| h.engine.has_exit("bg")).await);
    assert!(h.engine.has_line("bg", EventKind::Output, "started"));
    assert!(h.manager.registry().lookup("bg").is_none());
}

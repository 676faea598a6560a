//! Integration tests for render sessions, driven by small `sh` renderers

use futures::future::join_all;
use livedoc_session::{RenderCommand, RenderSessionManager, SessionError, SessionState};
use std::sync::Arc;
use std::time::Duration;

const PROLOG: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#;

/// Answers every line with an SVG document, split across two writes
fn echo_renderer() -> RenderCommand {
    let script = format!(
        r#"while IFS= read -r line; do printf '%s<svg><text>' '{PROLOG}'; sleep 0.01; printf '%s</text></svg>\n' "$line"; done"#
    );
    RenderCommand::new("sh").with_args(["-c".to_string(), script])
}

/// Reads two requests and exits without answering either
fn dying_renderer() -> RenderCommand {
    RenderCommand::new("sh").with_args(["-c", "read a; read b; exit 3"])
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn body(reply: &str) -> &str {
    reply
        .trim_start_matches(PROLOG)
        .trim_start_matches("<svg><text>")
        .trim_end_matches("</text></svg>")
}

#[tokio::test]
async fn test_single_render() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RenderSessionManager::new(echo_renderer());

    let reply = manager.render(dir.path(), "A -> B").await.unwrap();

    assert!(reply.starts_with(PROLOG));
    assert_eq!(body(&reply), "A -> B");
    manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_renders_resolve_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RenderSessionManager::new(echo_renderer());

    let requests: Vec<String> = (1..=6).map(|i| format!("r{i}")).collect();
    let replies = join_all(
        requests
            .iter()
            .map(|request| manager.render(dir.path(), request)),
    )
    .await;

    let bodies: Vec<String> = replies
        .into_iter()
        .map(|reply| body(&reply.unwrap()).to_string())
        .collect();
    assert_eq!(bodies, requests);

    let session = manager.session(dir.path()).unwrap();
    assert_eq!(session.pending_len(), 0);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_one_session_per_directory() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let manager = RenderSessionManager::new(echo_renderer());

    let (a, b) = tokio::join!(
        manager.render(first.path(), "left"),
        manager.render(second.path(), "right"),
    );
    assert_eq!(body(&a.unwrap()), "left");
    assert_eq!(body(&b.unwrap()), "right");

    let pid = manager.session(first.path()).unwrap().pid();
    manager.render(first.path(), "again").await.unwrap();
    assert_eq!(manager.session(first.path()).unwrap().pid(), pid);
    assert_ne!(manager.session(second.path()).unwrap().pid(), pid);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_dead_session_hands_pending_requests_to_successor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    let manager = Arc::new(RenderSessionManager::new(dying_renderer()));

    let spawn_render = |request: &'static str| {
        let manager = manager.clone();
        let path = path.clone();
        tokio::spawn(async move { manager.render(&path, request).await })
    };

    let oldest = spawn_render("a");
    wait_until(|| manager.pending(&path) == 1).await;
    let second = spawn_render("b");

    wait_until(|| manager.handed_off(&path) == 2).await;
    assert!(manager.session(&path).unwrap().is_dead());

    manager.set_command(echo_renderer());
    let newest = spawn_render("c");

    // The new process's first reply goes to the oldest inherited request
    let reply = tokio::time::timeout(Duration::from_secs(5), oldest)
        .await
        .expect("oldest request should resolve")
        .unwrap()
        .unwrap();
    assert_eq!(body(&reply), "c");

    assert!(!manager.session(&path).unwrap().is_dead());
    assert_eq!(manager.handed_off(&path), 0);
    assert_eq!(manager.pending(&path), 2);

    second.abort();
    newest.abort();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_only_unanswered_requests_carry_over() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    // Answers the first request, then exits after reading the second
    let script = format!(
        r#"IFS= read -r a; printf '%s<svg><text>%s</text></svg>\n' '{PROLOG}' "$a"; read b; exit 3"#
    );
    let manager = Arc::new(RenderSessionManager::new(
        RenderCommand::new("sh").with_args(["-c".to_string(), script]),
    ));

    let first = manager.render(&path, "a").await.unwrap();
    assert_eq!(body(&first), "a");

    let spawn_render = |request: &'static str| {
        let manager = manager.clone();
        let path = path.clone();
        tokio::spawn(async move { manager.render(&path, request).await })
    };

    let second = spawn_render("b");
    wait_until(|| manager.handed_off(&path) == 1).await;
    assert!(manager.session(&path).unwrap().is_dead());

    manager.set_command(echo_renderer());
    let newest = spawn_render("c");

    let reply = tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .expect("inherited request should resolve")
        .unwrap()
        .unwrap();
    assert_eq!(body(&reply), "c");

    assert_eq!(manager.handed_off(&path), 0);
    assert_eq!(manager.pending(&path), 1);

    newest.abort();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_spawned_session_is_ready() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RenderSessionManager::new(echo_renderer());

    let session = manager.session_for(dir.path()).unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RenderSessionManager::new(RenderCommand::new("livedoc-no-such-renderer"));

    let err = manager.render(dir.path(), "x").await.unwrap_err();
    assert!(matches!(err, SessionError::Spawn { .. }));
    assert!(manager.session(dir.path()).is_none());
}

#[tokio::test]
async fn test_timeout_keeps_queue_alignment() {
    let dir = tempfile::tempdir().unwrap();
    // Answers only after the second request arrives, then echoes both
    let script = format!(
        r#"read a; read b; printf '%s<svg><text>%s</text></svg>\n%s<svg><text>%s</text></svg>\n' '{PROLOG}' "$a" '{PROLOG}' "$b"; cat >/dev/null"#
    );
    let manager = RenderSessionManager::new(RenderCommand::new("sh").with_args(["-c".to_string(), script]))
        .with_timeout(Duration::from_millis(200));

    let err = manager.render(dir.path(), "slow").await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout(_)));

    // "slow" is still first in the queue, so its reply does not leak to us
    let reply = manager.render(dir.path(), "next").await.unwrap();
    assert_eq!(body(&reply), "next");
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_renderer() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RenderSessionManager::new(echo_renderer());
    manager.render(dir.path(), "x").await.unwrap();

    let session = manager.session(dir.path()).unwrap();
    manager.shutdown().await;

    wait_until(|| session.is_dead()).await;
    assert!(manager.session(dir.path()).is_none());
}

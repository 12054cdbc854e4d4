//! Teardown idempotency, convergence, and resource release.

use std::sync::Arc;
use std::time::Duration;

use shell_gateway::gateway::channel::CLOSE_NORMAL;
use shell_gateway::gateway::handler::handle_inbound;
use shell_gateway::models::session::SessionState;
use shell_gateway::session::cleanup::CloseTrigger;

use super::test_helpers::{open_recorded_session, params, test_app_state, ChannelEvent};

#[tokio::test]
async fn close_is_idempotent() {
    let state = test_app_state();
    let (session, recording) = open_recorded_session(&state, &params(None, None)).unwrap();
    let id = session.id().to_owned();

    assert!(state.cleanup.close(&id, CloseTrigger::ChannelClosed).await);
    assert!(!state.cleanup.close(&id, CloseTrigger::ChannelClosed).await);
    state.cleanup.teardown(&session, CloseTrigger::TransportError).await;

    assert!(!state.registry.contains(&id));
    assert!(!session.is_process_alive().await);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(recording.closes().len(), 1);
}

#[tokio::test]
async fn concurrent_triggers_converge_on_one_teardown() {
    let state = test_app_state();
    let (session, recording) = open_recorded_session(&state, &params(None, None)).unwrap();

    let triggers = [
        CloseTrigger::ChannelClosed,
        CloseTrigger::TransportError,
        CloseTrigger::ProcessExited,
        CloseTrigger::Explicit,
    ];
    let tasks: Vec<_> = triggers
        .into_iter()
        .map(|trigger| {
            let state = std::sync::Arc::clone(&state);
            let session = std::sync::Arc::clone(&session);
            tokio::spawn(async move { state.cleanup.teardown(&session, trigger).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert!(state.registry.is_empty());
    assert!(!session.is_process_alive().await);
    assert_eq!(recording.closes().len(), 1);
    assert_eq!(recording.closes()[0].0, CLOSE_NORMAL);
}

#[cfg(unix)]
#[tokio::test]
async fn nothing_is_relayed_after_close() {
    let state = test_app_state();
    let (session, recording) = open_recorded_session(&state, &params(None, None)).unwrap();

    // Keep the shell busy producing output while the session closes.
    handle_inbound(
        &state,
        &session,
        r#"{"type":"command","data":"while true; do echo tick; done\n"}"#,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    state.cleanup.teardown(&session, CloseTrigger::ChannelClosed).await;
    let events = recording.events();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(recording.events(), events);
    assert!(matches!(events.last(), Some(ChannelEvent::Close(CLOSE_NORMAL, _))));
}

#[cfg(unix)]
#[tokio::test]
async fn close_mid_command_kills_process_within_bound() {
    use super::test_helpers::{process_exists, process_group_alive, wait_until};

    let state = test_app_state();
    let (session, _recording) = open_recorded_session(&state, &params(None, None)).unwrap();
    let pid = session.pid();

    handle_inbound(&state, &session, r#"{"type":"command","data":"sleep 30\n"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(
        Duration::from_secs(2),
        state.cleanup.close(session.id(), CloseTrigger::ChannelClosed),
    )
    .await
    .expect("teardown finishes within two seconds");

    assert!(!process_exists(pid));
    assert!(!state.registry.contains(session.id()));
    assert!(wait_until(Duration::from_secs(2), || !process_group_alive(pid)).await);
}

#[cfg(unix)]
#[tokio::test]
async fn teardown_finishes_while_stdin_write_is_blocked() {
    use super::test_helpers::{process_exists, process_group_alive, wait_until};

    let state = test_app_state();
    let (session, _recording) = open_recorded_session(&state, &params(None, None)).unwrap();
    let pid = session.pid();

    handle_inbound(&state, &session, r#"{"type":"command","data":"sleep 30\n"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Nothing reads stdin while `sleep` runs, so this fills the pipe and stalls.
    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.write_input(&"x".repeat(512 * 1024)).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!writer.is_finished());

    tokio::time::timeout(
        Duration::from_secs(5),
        state.cleanup.close(session.id(), CloseTrigger::Explicit),
    )
    .await
    .expect("teardown finishes despite the blocked write");

    let written = tokio::time::timeout(Duration::from_secs(1), writer)
        .await
        .expect("blocked writer is released")
        .unwrap();
    assert!(written.is_err());
    assert!(!process_exists(pid));
    assert!(!state.registry.contains(session.id()));
    assert!(wait_until(Duration::from_secs(2), || !process_group_alive(pid)).await);
}

#[cfg(unix)]
#[tokio::test]
async fn background_job_is_killed_after_shell_exits() {
    use super::test_helpers::{process_group_alive, wait_until};

    let state = test_app_state();
    let (session, _recording) = open_recorded_session(&state, &params(None, None)).unwrap();
    let pgid = session.pid();

    handle_inbound(
        &state,
        &session,
        r#"{"type":"command","data":"sleep 300 &\nexit\n"}"#,
    )
    .await;
    tokio::time::timeout(
        Duration::from_secs(2),
        session.process_exited(Duration::from_millis(20)),
    )
    .await
    .expect("shell exits");

    // The job keeps the group and the output pipes alive.
    assert!(process_group_alive(pgid));
    assert!(!session.is_drained());

    state.cleanup.teardown(&session, CloseTrigger::ProcessExited).await;

    assert!(wait_until(Duration::from_secs(2), || !process_group_alive(pgid)).await);
    assert!(!state.registry.contains(session.id()));
}

#[tokio::test]
async fn close_unknown_session_is_noop() {
    let state = test_app_state();
    assert!(!state.cleanup.close("no-such-session", CloseTrigger::Explicit).await);
}

#[tokio::test]
async fn close_all_empties_registry() {
    let state = test_app_state();
    let mut recordings = Vec::new();
    for _ in 0..3 {
        let (_, recording) = open_recorded_session(&state, &params(None, None)).unwrap();
        recordings.push(recording);
    }
    assert_eq!(state.registry.len(), 3);

    state.cleanup.close_all(CloseTrigger::Shutdown).await;

    assert!(state.registry.is_empty());
    for recording in recordings {
        assert_eq!(
            recording.closes(),
            vec![(CLOSE_NORMAL, "server shutting down".to_owned())]
        );
    }
}

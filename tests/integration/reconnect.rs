// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for automatic reconnection: backoff scheduling, the
//! retry budget, catch-up history after a reconnect, and the manual
//! reconnect affordance once the budget is spent.
//!
//! ## Disconnect simulation
//!
//! Aborting the backend's `JoinHandle` does not close WebSocket connections
//! already handed to their own tasks. Instead a TCP proxy sits between the
//! client and the real backend; killing the proxy aborts every proxied
//! connection task, dropping both TCP streams and letting the client's
//! WebSocket layer observe the disconnect immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use grouplink::auth::StaticToken;
use grouplink::config::{ReconnectPolicy, SessionConfig};
use grouplink::connection::ConnectionState;
use grouplink::session::{Identity, SessionCallbacks, SessionManager};
use grouplink_backend::server::{self, BackendState};
use grouplink_proto::message::{ContentType, GroupId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// A TCP proxy forwarding between a client-facing port and the real backend.
/// `kill()` aborts all tracked connection tasks, severing every proxied
/// stream at once.
struct TcpProxy {
    accept_handle: tokio::task::JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    async fn new(proxy_port: u16, backend_addr: &str) -> Self {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{proxy_port}"))
            .await
            .unwrap_or_else(|e| panic!("proxy: failed to bind to port {proxy_port}: {e}"));
        let backend = backend_addr.to_string();
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let conn_handles_clone = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            loop {
                let (mut client_stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let backend = backend.clone();
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) = tokio::net::TcpStream::connect(&backend).await
                    else {
                        return;
                    };
                    // No sub-tasks, so aborting this task drops both streams.
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });
                conn_handles_clone.lock().push(conn_handle);
            }
        });

        Self {
            accept_handle,
            conn_handles,
        }
    }

    fn kill(self) {
        self.accept_handle.abort();
        let handles = self.conn_handles.lock();
        for h in handles.iter() {
            h.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Find a free port by binding to 0 and recording the port.
async fn find_free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to port 0");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

async fn start_backend(state: Arc<BackendState>) -> String {
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start backend");
    addr.to_string()
}

fn fast_config(endpoint: String, max_attempts: u32) -> SessionConfig {
    SessionConfig {
        endpoint,
        connect_timeout: Duration::from_secs(5),
        channel_capacity: 64,
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            max_attempts,
        },
    }
}

fn identity(user: &str, group: i64) -> Identity {
    Identity {
        user_id: UserId::new(user),
        group_id: GroupId::new(group),
    }
}

/// Callbacks that report connectivity flips with a timestamp, plus history
/// snapshot counts to observe catch-up reloads.
struct Observed {
    connectivity: mpsc::UnboundedReceiver<(bool, Instant)>,
    history_loads: Arc<Mutex<usize>>,
}

fn observing_callbacks() -> (SessionCallbacks, Observed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let history_loads = Arc::new(Mutex::new(0));
    let hl = Arc::clone(&history_loads);
    let callbacks = SessionCallbacks {
        on_new_message: Box::new(|_| {}),
        on_history_loaded: Box::new(move |_| *hl.lock() += 1),
        on_connection_change: Box::new(move |connected| {
            let _ = tx.send((connected, Instant::now()));
        }),
    };
    (
        callbacks,
        Observed {
            connectivity: rx,
            history_loads,
        },
    )
}

/// Wait for a connectivity flip in the given direction, skipping repeats
/// of the other direction.
async fn wait_for_connectivity(
    rx: &mut mpsc::UnboundedReceiver<(bool, Instant)>,
    connected: bool,
) -> Instant {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some((flag, at))) if flag == connected => return at,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("connectivity channel closed"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for connectivity = {connected}");
}

// =============================================================================
// Test 1: Reconnect after a severed connection, with catch-up history
// =============================================================================

#[tokio::test]
async fn reconnects_and_reloads_history_after_partition() {
    let state = Arc::new(BackendState::new());
    let backend_addr = start_backend(Arc::clone(&state)).await;

    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &backend_addr).await;
    let endpoint = format!("ws://127.0.0.1:{proxy_port}/api");

    let (callbacks, mut observed) = observing_callbacks();
    let session = SessionManager::new(
        fast_config(endpoint, 5),
        StaticToken::new("tok"),
        callbacks,
    );
    session.switch(identity("user_42", 7)).await;
    wait_for_connectivity(&mut observed.connectivity, true).await;

    // A message lands while we are connected.
    session
        .send_message("before the partition", ContentType::Text)
        .await
        .expect("send failed");

    // Wait for the broadcast echo so the frame has actually crossed the
    // proxy before we sever it.
    let echo_deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while session.messages().is_empty() {
        assert!(
            tokio::time::Instant::now() < echo_deadline,
            "timed out waiting for the pre-partition echo"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // Sever the network.
    proxy.kill();
    wait_for_connectivity(&mut observed.connectivity, false).await;

    // While the client is away, another member posts to the group.
    state
        .groups
        .append(
            7,
            &UserId::new("user_9"),
            "posted while away".to_string(),
            ContentType::Text,
            None,
        )
        .await;

    // Restore the path on the same port; the supervisor reconnects on its own.
    let _proxy2 = TcpProxy::new(proxy_port, &backend_addr).await;
    wait_for_connectivity(&mut observed.connectivity, true).await;

    // The automatic post-reconnect history request catches the gap up.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let contents: Vec<String> = session.messages().iter().map(|m| m.content.clone()).collect();
        if contents.contains(&"posted while away".to_string()) {
            assert!(contents.contains(&"before the partition".to_string()));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for catch-up history, have: {contents:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(*observed.history_loads.lock() >= 2, "expected a reload after reconnect");

    session.close().await;
}

// =============================================================================
// Test 2: Exponential backoff between attempts
// =============================================================================

#[tokio::test]
async fn backoff_between_attempts_grows_exponentially() {
    let state = Arc::new(BackendState::new());
    let backend_addr = start_backend(Arc::clone(&state)).await;

    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &backend_addr).await;
    let endpoint = format!("ws://127.0.0.1:{proxy_port}/api");

    let (callbacks, mut observed) = observing_callbacks();
    let session = SessionManager::new(
        fast_config(endpoint, 3),
        StaticToken::new("tok"),
        callbacks,
    );
    session.switch(identity("user_42", 7)).await;
    wait_for_connectivity(&mut observed.connectivity, true).await;

    // Kill the proxy; with no listener on the port, every retry fails fast.
    proxy.kill();

    // Each failed cycle surfaces one disconnected notification. The gaps
    // between them reflect the backoff schedule: 100ms, then 200ms.
    let first = wait_for_connectivity(&mut observed.connectivity, false).await;
    let second = wait_for_connectivity(&mut observed.connectivity, false).await;
    let third = wait_for_connectivity(&mut observed.connectivity, false).await;

    let gap_1 = second - first;
    let gap_2 = third - second;
    assert!(
        gap_1 >= Duration::from_millis(80),
        "gap between attempt 1 and 2 too short: {gap_1:?}"
    );
    assert!(
        gap_2 >= Duration::from_millis(160),
        "gap between attempt 2 and 3 too short: {gap_2:?}"
    );
    assert!(
        gap_2 > gap_1,
        "gap 2 ({gap_2:?}) should exceed gap 1 ({gap_1:?})"
    );

    session.close().await;
}

// =============================================================================
// Test 3: Retry budget exhaustion parks the session in Idle
// =============================================================================

#[tokio::test]
async fn exhausted_retry_budget_parks_in_idle() {
    // Point at a port nothing listens on; every attempt fails.
    let dead_port = find_free_port().await;
    let endpoint = format!("ws://127.0.0.1:{dead_port}/api");

    let (callbacks, mut observed) = observing_callbacks();
    let session = SessionManager::new(
        fast_config(endpoint, 2),
        StaticToken::new("tok"),
        callbacks,
    );
    session.switch(identity("user_42", 7)).await;

    // Two scheduled retries, then the terminal notification.
    wait_for_connectivity(&mut observed.connectivity, false).await;
    wait_for_connectivity(&mut observed.connectivity, false).await;
    wait_for_connectivity(&mut observed.connectivity, false).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.state() != ConnectionState::Idle {
        assert!(
            tokio::time::Instant::now() < deadline,
            "supervisor never settled in Idle, state: {:?}",
            session.state()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!session.is_connected());

    session.close().await;
}

// =============================================================================
// Test 4: Manual reconnect after the budget is spent
// =============================================================================

#[tokio::test]
async fn manual_reconnect_recovers_after_budget_exhaustion() {
    let state = Arc::new(BackendState::new());
    let backend_addr = start_backend(Arc::clone(&state)).await;

    // Start with no proxy at the port, so every automatic attempt fails.
    let proxy_port = find_free_port().await;
    let endpoint = format!("ws://127.0.0.1:{proxy_port}/api");

    let (callbacks, mut observed) = observing_callbacks();
    let session = SessionManager::new(
        fast_config(endpoint, 1),
        StaticToken::new("tok"),
        callbacks,
    );
    session.switch(identity("user_42", 7)).await;

    // Initial failure plus the single retry, then Idle.
    wait_for_connectivity(&mut observed.connectivity, false).await;
    wait_for_connectivity(&mut observed.connectivity, false).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.state() != ConnectionState::Idle {
        assert!(tokio::time::Instant::now() < deadline, "never reached Idle");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // The network comes back; the user asks for a reconnect.
    let _proxy = TcpProxy::new(proxy_port, &backend_addr).await;
    session.reconnect().expect("reconnect failed");

    wait_for_connectivity(&mut observed.connectivity, true).await;
    assert!(session.is_connected());

    session
        .send_message("back online", ContentType::Text)
        .await
        .expect("send after manual reconnect failed");

    session.close().await;
}

// =============================================================================
// Test 5: A superseded connection cannot touch the new session's store
// =============================================================================

#[tokio::test]
async fn switch_isolates_the_new_session_from_the_old_group() {
    let state = Arc::new(BackendState::new());
    let backend_addr = start_backend(Arc::clone(&state)).await;
    let endpoint = format!("ws://{backend_addr}/api");

    let (callbacks, mut observed) = observing_callbacks();
    let session = SessionManager::new(
        fast_config(endpoint, 5),
        StaticToken::new("tok"),
        callbacks,
    );

    session.switch(identity("user_42", 7)).await;
    wait_for_connectivity(&mut observed.connectivity, true).await;
    session
        .send_message("only for group seven", ContentType::Text)
        .await
        .expect("send failed");

    session.switch(identity("user_42", 8)).await;
    wait_for_connectivity(&mut observed.connectivity, true).await;

    // Traffic keeps flowing in the old group; none of it may appear here.
    state
        .groups
        .append(
            7,
            &UserId::new("user_9"),
            "late group seven traffic".to_string(),
            ContentType::Text,
            None,
        )
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(session.messages().is_empty());
    assert_eq!(
        session.identity().map(|i| i.group_id),
        Some(GroupId::new(8))
    );

    session.close().await;
}

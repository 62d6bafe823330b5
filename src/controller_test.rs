use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use time::OffsetDateTime;

use super::*;
use crate::auth::refresh::TokenRefresher;
use crate::auth::store::{ACCESS_KEY, CredentialStore, MemoryStore, USERNAME_KEY};
use crate::session::CloseReason;

const WS_URL: &str = "ws://chat.test/ws/chat";

// =============================================================================
// MOCKS
// =============================================================================

struct NoRefresh;

#[async_trait::async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(&self, _refresh_token: &str) -> Result<String, CredentialError> {
        Err(CredentialError::RefreshRejected { status: 401 })
    }
}

/// Test side of one mock socket.
struct Peer {
    events: mpsc::UnboundedSender<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Peer {
    fn push(&self, event: SocketEvent) {
        self.events.send(event).unwrap();
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

struct MockSocket {
    events: mpsc::UnboundedReceiver<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl ChatSocket for MockSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_event(&mut self) -> SocketEvent {
        self.events.recv().await.unwrap_or_else(|| SocketEvent::Closed(CloseReason::abnormal("peer dropped")))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockConnector {
    attempts: Mutex<Vec<(String, Instant)>>,
    refusals: AtomicU32,
    peers: mpsc::UnboundedSender<Peer>,
}

impl MockConnector {
    fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn ChatSocket>, TransportError> {
        self.attempts.lock().unwrap().push((url.to_owned(), Instant::now()));
        if self.refusals.load(Ordering::SeqCst) > 0 {
            self.refusals.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (events, events_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let fail_sends = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.peers.send(Peer {
            events,
            sent: sent.clone(),
            fail_sends: fail_sends.clone(),
            closed: closed.clone(),
        });
        Ok(Box::new(MockSocket { events: events_rx, sent, fail_sends, closed }))
    }
}

// =============================================================================
// HARNESS
// =============================================================================

struct Harness {
    handle: ChatHandle,
    notices: broadcast::Receiver<SessionNotice>,
    connector: Arc<MockConnector>,
    peers: mpsc::UnboundedReceiver<Peer>,
}

impl Harness {
    async fn next_peer(&mut self) -> Peer {
        self.peers.recv().await.expect("connector dropped")
    }

    async fn wait_open(&self) {
        self.handle.wait_for_state(|s| *s == ConnectionState::Open).await.unwrap();
    }

    fn drain_notices(&mut self) -> Vec<SessionNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    fn transitions(&mut self) -> Vec<(ConnectionState, ConnectionState)> {
        self.drain_notices()
            .into_iter()
            .filter_map(|n| match n {
                SessionNotice::Transition(t) => Some((t.from, t.to)),
                _ => None,
            })
            .collect()
    }
}

fn valid_token() -> String {
    let exp = OffsetDateTime::now_utc().unix_timestamp() + 3600;
    encode(&Header::default(), &json!({"exp": exp}), &EncodingKey::from_secret(b"s")).unwrap()
}

fn signed_in_store() -> MemoryStore {
    MemoryStore::with_values([(ACCESS_KEY, valid_token()), (USERNAME_KEY, "Ann".to_owned())])
}

fn mount(store: MemoryStore, refusals: u32) -> Harness {
    let (peers_tx, peers) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        attempts: Mutex::new(Vec::new()),
        refusals: AtomicU32::new(refusals),
        peers: peers_tx,
    });
    let gate = Arc::new(CredentialGate::new(Arc::new(store), Arc::new(NoRefresh)));
    let options = SessionOptions { ws_url: WS_URL.to_owned(), policy: ReconnectPolicy::default(), draft_limit: 100 };

    let controller = ChatController::new(options, gate, connector.clone());
    let notices = controller.subscribe();
    let handle = controller.mount();
    Harness { handle, notices, connector, peers }
}

// =============================================================================
// CONNECTING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn mount_connects_with_token_query() {
    let store = signed_in_store();
    let token = store.access_token().unwrap().unwrap();
    let mut h = mount(store, 0);
    let _peer = h.next_peer().await;
    h.wait_open().await;

    let attempts = h.connector.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].0, format!("{WS_URL}/?token={token}"));
    assert_eq!(
        h.transitions(),
        vec![
            (ConnectionState::Idle, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Open),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn close_schedules_one_reconnect_after_default_delay() {
    let mut h = mount(signed_in_store(), 0);
    let first = h.next_peer().await;
    h.wait_open().await;
    h.drain_notices();

    first.push(SocketEvent::Closed(CloseReason::new(1001, "going away")));
    let _second = h.next_peer().await;
    h.wait_open().await;

    let attempts = h.connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[1].1 - attempts[0].1 >= Duration::from_millis(5000));

    let closed = ConnectionState::Closed(CloseReason::new(1001, "going away"));
    assert_eq!(
        h.transitions(),
        vec![
            (ConnectionState::Open, closed.clone()),
            (closed, ConnectionState::Reconnecting { attempt: 1 }),
            (ConnectionState::Reconnecting { attempt: 1 }, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Open),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn handshake_failure_retries_after_delay() {
    let mut h = mount(signed_in_store(), 1);
    let _peer = h.next_peer().await;
    h.wait_open().await;

    let attempts = h.connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[1].1 - attempts[0].1 >= Duration::from_millis(5000));
}

#[tokio::test(start_paused = true)]
async fn socket_error_then_close_reconnects_once() {
    let mut h = mount(signed_in_store(), 0);
    let first = h.next_peer().await;
    h.wait_open().await;

    first.push(SocketEvent::Error("connection reset".into()));
    first.push(SocketEvent::Closed(CloseReason::abnormal("connection reset")));
    let _second = h.next_peer().await;
    h.wait_open().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.connector.attempts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_credential_stays_idle_without_retry() {
    let mut h = mount(MemoryStore::new(), 0);

    let notice = loop {
        match h.notices.recv().await.unwrap() {
            SessionNotice::CredentialUnavailable(reason) => break reason,
            _ => {}
        }
    };
    assert!(notice.contains("no access token"));
    h.handle.wait_for_state(|s| *s == ConnectionState::Idle).await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.connector.attempts().is_empty());
    assert_eq!(h.handle.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn manual_connect_after_credential_failure() {
    let store = Arc::new(MemoryStore::new());
    let (peers_tx, mut peers) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        attempts: Mutex::new(Vec::new()),
        refusals: AtomicU32::new(0),
        peers: peers_tx,
    });
    let gate = Arc::new(CredentialGate::new(store.clone(), Arc::new(NoRefresh)));
    let options = SessionOptions { ws_url: WS_URL.to_owned(), policy: ReconnectPolicy::default(), draft_limit: 100 };
    let controller = ChatController::new(options, gate, connector.clone());
    let mut notices = controller.subscribe();
    let handle = controller.mount();

    while !matches!(notices.recv().await.unwrap(), SessionNotice::CredentialUnavailable(_)) {}
    store.set_access_token(&valid_token()).unwrap();

    handle.connect().await.unwrap();
    let _peer = peers.recv().await.unwrap();
    handle.wait_for_state(|s| *s == ConnectionState::Open).await.unwrap();
    assert_eq!(connector.attempts().len(), 1);
}

// =============================================================================
// TEARDOWN
// =============================================================================

#[tokio::test(start_paused = true)]
async fn teardown_closes_socket_and_is_idempotent() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;

    h.handle.teardown().await;
    assert!(peer.closed.load(Ordering::SeqCst));
    assert_eq!(h.handle.state(), ConnectionState::Idle);

    h.handle.teardown().await;
    assert!(matches!(h.handle.connect().await, Err(ChatError::SessionClosed)));
    assert!(matches!(h.handle.send("hi").await, Err(ChatError::SessionClosed)));
}

#[tokio::test(start_paused = true)]
async fn teardown_while_waiting_cancels_reconnect() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;

    peer.push(SocketEvent::Closed(CloseReason::abnormal("lost")));
    h.handle
        .wait_for_state(|s| matches!(s, ConnectionState::Reconnecting { .. }))
        .await
        .unwrap();
    h.handle.teardown().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.attempts().len(), 1);
    assert_eq!(h.handle.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_tears_down() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;

    drop(h.handle);
    for _ in 0..100 {
        if peer.closed.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(peer.closed.load(Ordering::SeqCst));
}

// =============================================================================
// MESSAGES AND SENDING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn frames_are_logged_and_broadcast_in_order() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;
    h.drain_notices();

    peer.push(SocketEvent::Frame(r#"{"message":"hi","user":"Alice","timestamp":"2024-01-01T10:00:00Z"}"#.into()));
    peer.push(SocketEvent::Frame(String::new()));
    peer.push(SocketEvent::Frame("Bob: hello there".into()));

    let mut delivered = Vec::new();
    while delivered.len() < 2 {
        if let SessionNotice::Message(m) = h.notices.recv().await.unwrap() {
            delivered.push((m.user, m.text));
        }
    }
    assert_eq!(
        delivered,
        vec![("Alice".to_owned(), "hi".to_owned()), ("Bob".to_owned(), "hello there".to_owned())]
    );

    let log = h.handle.messages().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].time.to_string(), "10:00");
    assert_eq!(log[1].user, "Bob");
}

#[tokio::test(start_paused = true)]
async fn submit_sends_draft_as_stored_user_and_clears_it() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;

    h.handle.edit_draft("  hello league  ").await.unwrap();
    assert_eq!(h.handle.submit().await.unwrap(), SendOutcome::Sent);

    let sent: Vec<serde_json::Value> = peer.sent().iter().map(|s| serde_json::from_str(s).unwrap()).collect();
    assert_eq!(sent, vec![json!({"message": "hello league", "user": "Ann"})]);
    assert_eq!(h.handle.draft().await.unwrap(), "");
}

#[tokio::test(start_paused = true)]
async fn blank_send_transmits_nothing() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;

    h.handle.edit_draft("draft").await.unwrap();
    assert_eq!(h.handle.send("").await.unwrap(), SendOutcome::Skipped(SkipReason::Blank));
    assert_eq!(h.handle.send("   ").await.unwrap(), SendOutcome::Skipped(SkipReason::Blank));
    assert!(peer.sent().is_empty());
    assert_eq!(h.handle.draft().await.unwrap(), "draft");
}

#[tokio::test(start_paused = true)]
async fn explicit_send_over_limit_transmits_nothing() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;

    h.handle.edit_draft("keep me").await.unwrap();
    assert_eq!(h.handle.send("a".repeat(150)).await.unwrap(), SendOutcome::Skipped(SkipReason::TooLong));
    assert!(peer.sent().is_empty());
    assert_eq!(h.handle.draft().await.unwrap(), "keep me");
}

#[tokio::test(start_paused = true)]
async fn send_before_open_is_skipped() {
    let h = mount(MemoryStore::new(), 0);
    h.handle.wait_for_state(|s| *s == ConnectionState::Idle).await.unwrap();
    assert_eq!(h.handle.send("hi").await.unwrap(), SendOutcome::Skipped(SkipReason::NotOpen));
}

#[tokio::test(start_paused = true)]
async fn failed_send_keeps_draft_and_session() {
    let mut h = mount(signed_in_store(), 0);
    let peer = h.next_peer().await;
    h.wait_open().await;
    peer.fail_sends.store(true, Ordering::SeqCst);
    h.drain_notices();

    h.handle.edit_draft("retry me").await.unwrap();
    let err = h.handle.submit().await.unwrap_err();
    assert!(matches!(err, ChatError::Transport(TransportError::Send(_))));
    assert_eq!(h.handle.draft().await.unwrap(), "retry me");
    assert_eq!(h.handle.state(), ConnectionState::Open);
    assert_eq!(h.drain_notices(), vec![SessionNotice::SendFailed("websocket send failed: broken pipe".into())]);

    peer.fail_sends.store(false, Ordering::SeqCst);
    assert_eq!(h.handle.submit().await.unwrap(), SendOutcome::Sent);
    assert_eq!(h.handle.draft().await.unwrap(), "");
}

#[tokio::test(start_paused = true)]
async fn over_limit_draft_is_rejected() {
    let mut h = mount(signed_in_store(), 0);
    let _peer = h.next_peer().await;

    h.handle.edit_draft("short").await.unwrap();
    let err = h.handle.edit_draft("x".repeat(101)).await.unwrap_err();
    assert!(matches!(err, ChatError::Draft(DraftError::TooLong { limit: 100, len: 101 })));
    assert_eq!(h.handle.draft().await.unwrap(), "short");
}

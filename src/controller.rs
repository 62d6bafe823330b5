//! Async driver for one mounted chat view.
//!
//! DESIGN
//! ======
//! [`ChatController::mount`] spawns a single task that owns the
//! [`ChatSession`], the in-flight connect attempt, the live socket and the
//! reconnect timer. Everything reaches that task through a command channel,
//! so session state is never shared or locked.
//!
//! The task loops over one `tokio::select!`:
//! - commands from [`ChatHandle`]s
//! - the pending connect (credential gate, then socket handshake)
//! - the next socket event
//! - the reconnect deadline
//!
//! Each wake-up is turned into a [`SessionEvent`]; the returned [`Action`]s
//! are performed here and the recorded transitions are published.
//!
//! OBSERVING
//! =========
//! Current state is a `watch` channel. Transitions, delivered messages,
//! credential failures and send failures go out on a `broadcast` channel as
//! [`SessionNotice`]s. Subscribe before mounting to see the first
//! `Idle -> Connecting` transition.

use std::ops::ControlFlow;
use std::sync::Arc;

use frames::{ChatMessage, DisplayTime, FrameError};
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};

use crate::auth::{CredentialError, CredentialGate, token_prefix};
use crate::config::ChatConfig;
use crate::session::draft::DraftError;
use crate::session::policy::ReconnectPolicy;
use crate::session::{Action, ChatSession, ConnectionState, SendPlan, SessionEvent, SkipReason, Transition};
use crate::transport::{ChatSocket, Connector, SocketEvent, TransportError, socket_url};

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat session is closed")]
    SessionClosed,
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Transition(Transition),
    Message(ChatMessage),
    /// The gate produced no usable token; the session went back to `Idle`.
    CredentialUnavailable(String),
    SendFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub ws_url: String,
    pub policy: ReconnectPolicy,
    pub draft_limit: usize,
}

impl SessionOptions {
    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Self {
        Self { ws_url: config.ws_url.clone(), policy: config.reconnect, draft_limit: config.draft_limit }
    }
}

enum Command {
    Connect(oneshot::Sender<()>),
    EditDraft { text: String, reply: oneshot::Sender<Result<(), DraftError>> },
    /// `None` sends the current draft.
    Send { text: Option<String>, reply: oneshot::Sender<Result<SendOutcome, ChatError>> },
    Messages(oneshot::Sender<Vec<ChatMessage>>),
    Draft(oneshot::Sender<String>),
    Teardown(oneshot::Sender<()>),
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct ChatController {
    options: SessionOptions,
    gate: Arc<CredentialGate>,
    connector: Arc<dyn Connector>,
    notices: broadcast::Sender<SessionNotice>,
}

impl ChatController {
    #[must_use]
    pub fn new(options: SessionOptions, gate: Arc<CredentialGate>, connector: Arc<dyn Connector>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { options, gate, connector, notices }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Start the driver task and request the first connection.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn mount(self) -> ChatHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            session: ChatSession::new(self.options.policy, self.options.draft_limit),
            ws_url: self.options.ws_url,
            gate: self.gate,
            connector: self.connector,
            state_tx,
            notices: self.notices.clone(),
            pending: None,
            socket: None,
            timer: None,
        };
        tokio::spawn(driver.run(command_rx));

        ChatHandle { commands, state, notices: self.notices }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable front for a mounted session. Dropping every handle tears the
/// session down.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    notices: broadcast::Sender<SessionNotice>,
}

impl ChatHandle {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] if the session ends first.
    pub async fn wait_for_state<F>(&self, mut predicate: F) -> Result<ConnectionState, ChatError>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut state = self.state.clone();
        let current = state.wait_for(|s| predicate(s)).await.map_err(|_| ChatError::SessionClosed)?;
        Ok(current.clone())
    }

    /// Manual reconnect trigger. Ignored while a connection is live.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after teardown.
    pub async fn connect(&self) -> Result<(), ChatError> {
        self.request(Command::Connect).await
    }

    /// Replace the outbound draft.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Draft`] when `text` is over the limit; the
    /// previous draft is kept.
    pub async fn edit_draft(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let text = text.into();
        self.request(|reply| Command::EditDraft { text, reply }).await??;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after teardown.
    pub async fn draft(&self) -> Result<String, ChatError> {
        self.request(Command::Draft).await
    }

    /// Send the current draft.
    ///
    /// # Errors
    ///
    /// See [`ChatHandle::send`].
    pub async fn submit(&self) -> Result<SendOutcome, ChatError> {
        self.request(|reply| Command::Send { text: None, reply }).await?
    }

    /// Send `text` as the stored user. Blank or over-limit text, a connection
    /// that is not open, or a torn-down session skip without touching the
    /// wire. The draft is cleared only once the frame is written.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] when the socket rejects the frame
    /// (the draft is kept), or [`ChatError::SessionClosed`] after teardown.
    pub async fn send(&self, text: impl Into<String>) -> Result<SendOutcome, ChatError> {
        let text = text.into();
        self.request(|reply| Command::Send { text: Some(text), reply }).await?
    }

    /// Snapshot of the message log, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after teardown.
    pub async fn messages(&self) -> Result<Vec<ChatMessage>, ChatError> {
        self.request(Command::Messages).await
    }

    /// Close the socket and cancel any pending reconnect. Safe to call more
    /// than once.
    pub async fn teardown(&self) {
        if self.request(Command::Teardown).await.is_err() {
            tracing::debug!("teardown on a session that already ended");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).map_err(|_| ChatError::SessionClosed)?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum ConnectOutcome {
    Opened(Box<dyn ChatSocket>),
    NoCredential(CredentialError),
    Failed(TransportError),
}

enum Wake {
    Command(Option<Command>),
    Connected(ConnectOutcome),
    Socket(SocketEvent),
    Timer(u64),
}

struct Driver {
    session: ChatSession,
    ws_url: String,
    gate: Arc<CredentialGate>,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    notices: broadcast::Sender<SessionNotice>,
    pending: Option<BoxFuture<'static, ConnectOutcome>>,
    socket: Option<Box<dyn ChatSocket>>,
    /// Reconnect deadline and the generation it was scheduled under.
    timer: Option<(Instant, u64)>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.apply(SessionEvent::ConnectRequested).await;

        loop {
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                outcome = poll_connect(&mut self.pending) => Wake::Connected(outcome),
                event = next_socket_event(&mut self.socket) => Wake::Socket(event),
                generation = fire_timer(self.timer) => Wake::Timer(generation),
            };

            match wake {
                Wake::Command(Some(command)) => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Wake::Command(None) => {
                    tracing::debug!("all chat handles dropped; tearing down");
                    self.apply(SessionEvent::TeardownRequested).await;
                    break;
                }
                Wake::Connected(outcome) => self.on_connect_outcome(outcome).await,
                Wake::Socket(event) => self.on_socket_event(event).await,
                Wake::Timer(generation) => {
                    self.timer = None;
                    self.apply(SessionEvent::TimerFired { generation }).await;
                }
            }
        }
        tracing::debug!("chat driver stopped");
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect(reply) => {
                self.apply(SessionEvent::ConnectRequested).await;
                let _ = reply.send(());
            }
            Command::EditDraft { text, reply } => {
                let _ = reply.send(self.session.edit_draft(text));
            }
            Command::Send { text, reply } => {
                let result = self.send(text).await;
                let _ = reply.send(result);
            }
            Command::Messages(reply) => {
                let _ = reply.send(self.session.messages().to_vec());
            }
            Command::Draft(reply) => {
                let _ = reply.send(self.session.draft().to_owned());
            }
            Command::Teardown(reply) => {
                self.apply(SessionEvent::TeardownRequested).await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        match outcome {
            ConnectOutcome::Opened(socket) => {
                tracing::info!(url = %self.ws_url, "chat socket open");
                self.socket = Some(socket);
                self.apply(SessionEvent::Opened).await;
            }
            ConnectOutcome::NoCredential(e) => {
                tracing::error!(error = %e, "no valid credential; not connecting");
                let _ = self.notices.send(SessionNotice::CredentialUnavailable(e.to_string()));
                self.apply(SessionEvent::CredentialUnavailable(e.to_string())).await;
            }
            ConnectOutcome::Failed(e) => {
                tracing::warn!(error = %e, "chat socket handshake failed");
                self.apply(SessionEvent::ConnectFailed(e.to_string())).await;
            }
        }
    }

    async fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Frame(raw) => {
                let received_at = DisplayTime::now();
                self.apply(SessionEvent::FrameReceived { raw, received_at }).await;
            }
            SocketEvent::Error(e) => {
                tracing::warn!(error = %e, "chat socket error");
                self.apply(SessionEvent::SocketError(e)).await;
            }
            SocketEvent::Closed(reason) => {
                self.socket = None;
                tracing::warn!(code = reason.code, reason = %reason.reason, "chat socket closed");
                self.apply(SessionEvent::Closed(reason)).await;
            }
        }
    }

    async fn send(&mut self, text: Option<String>) -> Result<SendOutcome, ChatError> {
        let text = text.unwrap_or_else(|| self.session.draft().to_owned());
        let user = self.gate.store().username();

        let payload = match self.session.plan_send(&text, &user)? {
            SendPlan::Transmit(payload) => payload,
            SendPlan::Skip(reason) => {
                tracing::debug!(?reason, "send skipped");
                return Ok(SendOutcome::Skipped(reason));
            }
        };
        let Some(socket) = self.socket.as_mut() else {
            return Ok(SendOutcome::Skipped(SkipReason::NotOpen));
        };

        match socket.send_text(payload).await {
            Ok(()) => {
                self.session.confirm_sent();
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat send failed; draft kept");
                let _ = self.notices.send(SessionNotice::SendFailed(e.to_string()));
                Err(e.into())
            }
        }
    }

    async fn apply(&mut self, event: SessionEvent) {
        let actions = self.session.handle(event);
        self.publish_transitions();
        for action in actions {
            self.perform(action).await;
        }
    }

    fn publish_transitions(&mut self) {
        let transitions = self.session.drain_transitions();
        if transitions.is_empty() {
            return;
        }
        self.state_tx.send_replace(self.session.state().clone());
        for transition in transitions {
            let _ = self.notices.send(SessionNotice::Transition(transition));
        }
    }

    async fn perform(&mut self, action: Action) {
        match action {
            Action::BeginConnect => self.pending = Some(self.connect_future()),
            Action::AbortConnect => {
                if self.pending.take().is_some() {
                    tracing::debug!("in-flight connect dropped");
                }
            }
            Action::CloseSocket => {
                if let Some(mut socket) = self.socket.take()
                    && let Err(e) = socket.close().await
                {
                    tracing::warn!(error = %e, "chat socket close failed");
                }
            }
            Action::ScheduleReconnect { delay, generation } => {
                tracing::warn!(?delay, generation, "scheduling chat reconnect");
                self.timer = Some((Instant::now() + delay, generation));
            }
            Action::CancelReconnect => self.timer = None,
            Action::Deliver(message) => {
                let _ = self.notices.send(SessionNotice::Message(message));
            }
        }
    }

    fn connect_future(&self) -> BoxFuture<'static, ConnectOutcome> {
        let gate = Arc::clone(&self.gate);
        let connector = Arc::clone(&self.connector);
        let ws_url = self.ws_url.clone();
        Box::pin(async move {
            let token = match gate.ensure_valid_access_token().await {
                Ok(token) => token,
                Err(e) => return ConnectOutcome::NoCredential(e),
            };
            tracing::debug!(token = %token_prefix(&token), "opening chat socket");
            match connector.connect(&socket_url(&ws_url, &token)).await {
                Ok(socket) => ConnectOutcome::Opened(socket),
                Err(e) => ConnectOutcome::Failed(e),
            }
        })
    }
}

async fn poll_connect(pending: &mut Option<BoxFuture<'static, ConnectOutcome>>) -> ConnectOutcome {
    let Some(connect) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = connect.await;
    *pending = None;
    outcome
}

async fn next_socket_event(socket: &mut Option<Box<dyn ChatSocket>>) -> SocketEvent {
    match socket.as_mut() {
        Some(socket) => socket.next_event().await,
        None => std::future::pending().await,
    }
}

async fn fire_timer(timer: Option<(Instant, u64)>) -> u64 {
    match timer {
        Some((deadline, generation)) => {
            sleep_until(deadline).await;
            generation
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;

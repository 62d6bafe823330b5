//! Connection state machine for one mounted chat view.
//!
//! DESIGN
//! ======
//! `ChatSession` does no I/O. It consumes discrete [`SessionEvent`]s (socket
//! open/close/error/message, timer expiry, connect and teardown requests) and
//! returns the [`Action`]s the driver in `controller` must perform. Every
//! state change is also recorded as a [`Transition`] so callers can observe
//! and assert on the exact sequence.
//!
//! STATES
//! ======
//! `Idle -> Connecting -> Open -> Closed(reason) -> Reconnecting -> Connecting ...`
//!
//! A connect request is ignored while `Connecting` or `Open`, so at most one
//! socket is ever live. A missing credential drops back to `Idle` without
//! scheduling a retry; only a close (or failed handshake) schedules one.
//!
//! STALE TIMERS
//! ============
//! Each scheduled reconnect carries a generation number. Teardown and manual
//! reconnects bump the generation, so a timer that fires late is a no-op.

pub mod draft;
pub mod policy;

use std::time::Duration;

use frames::{ChatMessage, DisplayTime, FrameError, OutboundMessage};

use self::draft::{Draft, DraftError};
use self::policy::ReconnectPolicy;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed(CloseReason),
    /// Waiting for reconnect attempt `attempt` to fire.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    /// `true` while a socket is being opened or is open.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// View mount or manual reconnect trigger.
    ConnectRequested,
    /// The credential gate produced no usable token.
    CredentialUnavailable(String),
    Opened,
    /// The socket handshake failed before it ever opened.
    ConnectFailed(String),
    /// Transport-level error. Logged only; the following close drives recovery.
    SocketError(String),
    Closed(CloseReason),
    FrameReceived { raw: String, received_at: DisplayTime },
    TimerFired { generation: u64 },
    TeardownRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Acquire a credential and open a socket.
    BeginConnect,
    /// Drop an in-flight connect attempt.
    AbortConnect,
    CloseSocket,
    ScheduleReconnect { delay: Duration, generation: u64 },
    CancelReconnect,
    /// A message was appended to the log.
    Deliver(ChatMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Blank,
    /// Longer than the draft limit, in characters.
    TooLong,
    NotOpen,
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPlan {
    /// Encoded JSON frame to put on the socket.
    Transmit(String),
    Skip(SkipReason),
}

pub struct ChatSession {
    state: ConnectionState,
    active: bool,
    generation: u64,
    attempts: u32,
    policy: ReconnectPolicy,
    draft: Draft,
    messages: Vec<ChatMessage>,
    transitions: Vec<Transition>,
}

impl ChatSession {
    #[must_use]
    pub fn new(policy: ReconnectPolicy, draft_limit: usize) -> Self {
        Self {
            state: ConnectionState::Idle,
            active: true,
            generation: 0,
            attempts: 0,
            policy,
            draft: Draft::new(draft_limit),
            messages: Vec::new(),
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// `false` once teardown ran. A torn-down session ignores every event.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        self.draft.as_str()
    }

    /// Replace the draft text.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::TooLong`] when `text` exceeds the draft limit.
    pub fn edit_draft(&mut self, text: impl Into<String>) -> Result<(), DraftError> {
        self.draft.edit(text)
    }

    /// Take the transitions recorded since the last call.
    pub fn drain_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    /// Feed one event through the state machine.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Action> {
        if !self.active {
            tracing::debug!(?event, "event after teardown ignored");
            return Vec::new();
        }

        match event {
            SessionEvent::ConnectRequested => self.on_connect_requested(),
            SessionEvent::CredentialUnavailable(reason) => {
                if self.state == ConnectionState::Connecting {
                    tracing::debug!(%reason, "connect aborted without credential");
                    self.transition(ConnectionState::Idle);
                }
                Vec::new()
            }
            SessionEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.attempts = 0;
                    self.transition(ConnectionState::Open);
                }
                Vec::new()
            }
            SessionEvent::ConnectFailed(reason) => {
                if self.state == ConnectionState::Connecting {
                    self.transition(ConnectionState::Closed(CloseReason::abnormal(reason)));
                    return self.schedule_reconnect();
                }
                Vec::new()
            }
            SessionEvent::SocketError(_) => Vec::new(),
            SessionEvent::Closed(reason) => {
                if self.state.is_live() {
                    self.transition(ConnectionState::Closed(reason));
                    return self.schedule_reconnect();
                }
                Vec::new()
            }
            SessionEvent::FrameReceived { raw, received_at } => match frames::normalize(&raw, received_at) {
                Some(msg) => {
                    self.messages.push(msg.clone());
                    vec![Action::Deliver(msg)]
                }
                None => Vec::new(),
            },
            SessionEvent::TimerFired { generation } => {
                let waiting = matches!(self.state, ConnectionState::Reconnecting { .. });
                if !waiting || generation != self.generation {
                    tracing::debug!(generation, current = self.generation, "stale reconnect timer ignored");
                    return Vec::new();
                }
                self.transition(ConnectionState::Connecting);
                vec![Action::BeginConnect]
            }
            SessionEvent::TeardownRequested => self.on_teardown(),
        }
    }

    fn on_connect_requested(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                tracing::debug!(state = ?self.state, "connect ignored; connection already live");
                Vec::new()
            }
            ConnectionState::Reconnecting { .. } => {
                self.generation += 1;
                self.attempts = 0;
                self.transition(ConnectionState::Connecting);
                vec![Action::CancelReconnect, Action::BeginConnect]
            }
            ConnectionState::Idle | ConnectionState::Closed(_) => {
                self.attempts = 0;
                self.transition(ConnectionState::Connecting);
                vec![Action::BeginConnect]
            }
        }
    }

    fn on_teardown(&mut self) -> Vec<Action> {
        self.active = false;
        self.generation += 1;
        let actions = match self.state {
            ConnectionState::Connecting => vec![Action::AbortConnect],
            ConnectionState::Open => vec![Action::CloseSocket],
            ConnectionState::Reconnecting { .. } => vec![Action::CancelReconnect],
            ConnectionState::Idle | ConnectionState::Closed(_) => Vec::new(),
        };
        if self.state != ConnectionState::Idle {
            self.transition(ConnectionState::Idle);
        }
        actions
    }

    fn schedule_reconnect(&mut self) -> Vec<Action> {
        self.attempts = self.attempts.saturating_add(1);
        let Some(delay) = self.policy.delay_for(self.attempts) else {
            tracing::warn!(attempts = self.attempts - 1, "reconnect attempts exhausted; staying closed");
            return Vec::new();
        };
        self.generation += 1;
        self.transition(ConnectionState::Reconnecting { attempt: self.attempts });
        vec![Action::ScheduleReconnect { delay, generation: self.generation }]
    }

    /// Decide what a send of `text` should put on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the outbound payload cannot be encoded.
    pub fn plan_send(&self, text: &str, user: &str) -> Result<SendPlan, FrameError> {
        if !self.active {
            return Ok(SendPlan::Skip(SkipReason::TornDown));
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendPlan::Skip(SkipReason::Blank));
        }
        if text.chars().count() > self.draft.limit() {
            return Ok(SendPlan::Skip(SkipReason::TooLong));
        }
        if self.state != ConnectionState::Open {
            return Ok(SendPlan::Skip(SkipReason::NotOpen));
        }
        let payload = frames::encode_outbound(&OutboundMessage::new(text, user))?;
        Ok(SendPlan::Transmit(payload))
    }

    /// Record that a planned frame reached the socket.
    pub fn confirm_sent(&mut self) {
        self.draft.clear();
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = std::mem::replace(&mut self.state, to.clone());
        tracing::debug!(?from, ?to, "connection state changed");
        self.transitions.push(Transition { from, to });
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

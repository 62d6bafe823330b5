//! Wire model and normalizer for the chat room WebSocket endpoint.
//!
//! The chat server pushes text frames in two shapes: structured JSON events
//! carrying `message`/`user`/`timestamp`, and legacy plain-text broadcasts in
//! the informal shape `"<user>: <message>"`. This crate classifies a raw frame
//! into an [`InboundFrame`], turns it into a [`ChatMessage`], and encodes the
//! JSON payload the client sends back.
//!
//! Everything here is pure and synchronous so the session layer can run it
//! inside its event loop without suspension points.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Display name used when a frame carries no usable sender.
pub const ANONYMOUS_USER: &str = "Anonymous";

const NAIVE_DATETIME: &[FormatItem<'_>] = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const NAIVE_DATETIME_FRACTION: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
const NAIVE_DATE: &[FormatItem<'_>] = format_description!("[year]-[month]-[day]");

const AVATAR_PALETTE: [&str; 26] = [
    "#FF1744", "#00E676", "#2979FF", "#FFD600", "#1DE9B6", "#D500F9", "#F50057", "#3D5AFE", "#8D6E63",
    "#00ACC1", "#FF6D00", "#76FF03", "#651FFF", "#00B0FF", "#FF9100", "#00B8D4", "#FF1744", "#536DFE",
    "#FFC400", "#5D4037", "#EA80FC", "#40C4FF", "#EEEEEE", "#90A4AE", "#C6FF00", "#FF4081",
];

/// Error returned by [`encode_outbound`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The outbound payload could not be serialized to JSON.
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// DISPLAY TIME
// =============================================================================

/// Wall-clock time of a message, rendered as `HH:mm`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayTime {
    hour: u8,
    minute: u8,
}

impl DisplayTime {
    /// Build a display time from raw components. Returns `None` when out of range.
    #[must_use]
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Wall-clock time of `dt` in its own offset.
    #[must_use]
    pub fn from_datetime(dt: OffsetDateTime) -> Self {
        Self { hour: dt.hour(), minute: dt.minute() }
    }

    /// Current local time, falling back to UTC when the local offset is unknown.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc().to_offset(local_offset()))
    }

    #[must_use]
    pub fn hour(self) -> u8 {
        self.hour
    }

    #[must_use]
    pub fn minute(self) -> u8 {
        self.minute
    }

    /// Interpret a structured frame's `timestamp` value.
    ///
    /// Accepts RFC 3339 text (rendered in its own offset), naive
    /// `YYYY-MM-DD[THH:MM:SS[.f]]` text (rendered as written), and numbers
    /// of epoch milliseconds (rendered in local time).
    #[must_use]
    pub fn parse_timestamp(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => parse_timestamp_text(raw),
            Value::Number(n) => {
                #[allow(clippy::cast_possible_truncation)]
                let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?;
                let dt = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()?;
                Some(Self::from_datetime(dt.to_offset(local_offset())))
            }
            _ => None,
        }
    }
}

impl fmt::Display for DisplayTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

fn parse_timestamp_text(raw: &str) -> Option<DisplayTime> {
    let trimmed = raw.trim();
    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(DisplayTime::from_datetime(dt));
    }

    let candidate = trimmed.replacen(' ', "T", 1);
    for format in [NAIVE_DATETIME_FRACTION, NAIVE_DATETIME] {
        if let Ok(dt) = PrimitiveDateTime::parse(&candidate, format) {
            return Some(DisplayTime { hour: dt.hour(), minute: dt.minute() });
        }
    }
    Date::parse(&candidate, NAIVE_DATE)
        .ok()
        .map(|_| DisplayTime { hour: 0, minute: 0 })
}

// =============================================================================
// CHAT MESSAGE
// =============================================================================

/// One entry of the chat log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub user: String,
    pub text: String,
    pub time: DisplayTime,
}

impl ChatMessage {
    /// Uppercase first character of the sender, or `?` when the name is empty.
    #[must_use]
    pub fn initial(&self) -> char {
        self.user
            .chars()
            .next()
            .and_then(|c| c.to_uppercase().next())
            .unwrap_or('?')
    }

    /// Avatar color for the sender's initial. Code points from `A` upward
    /// wrap onto the palette (`É` included); anything below `A` has none.
    #[must_use]
    pub fn avatar_color(&self) -> Option<&'static str> {
        let offset = u32::from(self.initial()).checked_sub(u32::from('A'))?;
        let index = usize::try_from(offset).ok()? % AVATAR_PALETTE.len();
        Some(AVATAR_PALETTE[index])
    }
}

// =============================================================================
// INBOUND FRAMES
// =============================================================================

/// Classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// JSON object carrying both `message` and `user` keys. Values are kept
    /// raw because either may be null or empty on the wire.
    Structured {
        user: Value,
        message: Value,
        timestamp: Option<Value>,
    },
    /// Anything else: non-JSON text, JSON that is not an object, or an object
    /// missing one of the required keys.
    PlainText(String),
}

impl InboundFrame {
    /// Classify a raw text frame. Empty frames yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(structured(map).unwrap_or_else(|| Self::PlainText(raw.to_owned()))),
            _ => Some(Self::PlainText(raw.to_owned())),
        }
    }

    /// Convert into a chat message. `received_at` is used when the frame
    /// carries no usable timestamp.
    #[must_use]
    pub fn into_message(self, received_at: DisplayTime) -> ChatMessage {
        match self {
            Self::Structured { user, message, timestamp } => ChatMessage {
                user: display_text(&user).unwrap_or_else(|| ANONYMOUS_USER.to_owned()),
                text: display_text(&message).unwrap_or_default(),
                time: timestamp
                    .filter(is_truthy)
                    .and_then(|ts| DisplayTime::parse_timestamp(&ts))
                    .unwrap_or(received_at),
            },
            Self::PlainText(raw) => plain_text_message(&raw, received_at),
        }
    }
}

fn structured(mut map: Map<String, Value>) -> Option<InboundFrame> {
    if !map.contains_key("message") || !map.contains_key("user") {
        return None;
    }
    Some(InboundFrame::Structured {
        user: map.remove("user").unwrap_or(Value::Null),
        message: map.remove("message").unwrap_or(Value::Null),
        timestamp: map.remove("timestamp"),
    })
}

fn plain_text_message(raw: &str, received_at: DisplayTime) -> ChatMessage {
    match raw.find(':') {
        Some(idx) if idx > 0 => {
            let user = raw[..idx].trim();
            ChatMessage {
                user: if user.is_empty() { ANONYMOUS_USER.to_owned() } else { user.to_owned() },
                text: raw[idx + 1..].trim().to_owned(),
                time: received_at,
            }
        }
        _ => ChatMessage { user: ANONYMOUS_USER.to_owned(), text: raw.to_owned(), time: received_at },
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn display_text(value: &Value) -> Option<String> {
    if !is_truthy(value) {
        return None;
    }
    Some(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Parse and normalize a raw inbound frame in one step.
///
/// Returns `None` only for an empty frame; every other input produces a
/// message, at worst attributed to [`ANONYMOUS_USER`].
#[must_use]
pub fn normalize(raw: &str, received_at: DisplayTime) -> Option<ChatMessage> {
    InboundFrame::parse(raw).map(|frame| frame.into_message(received_at))
}

// =============================================================================
// OUTBOUND FRAMES
// =============================================================================

/// Payload the client sends for a chat line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message: String,
    pub user: String,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, user: impl Into<String>) -> Self {
        Self { message: message.into(), user: user.into() }
    }
}

/// Serialize an outbound chat line to its JSON text frame.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialization fails.
pub fn encode_outbound(msg: &OutboundMessage) -> Result<String, FrameError> {
    Ok(serde_json::to_string(msg)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;

pub mod auth;
pub mod config;
pub mod controller;
pub mod session;
pub mod transport;

pub use controller::{ChatController, ChatError, ChatHandle, SendOutcome, SessionNotice, SessionOptions};
pub use session::{CloseReason, ConnectionState, Transition};

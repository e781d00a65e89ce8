//! Terminal client for the OpenICE chat assistant.

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod ui;

pub use client::{ApiClient, ByteStream, MessageTransport};
pub use config::{ClientConfig, Config};
pub use error::{ClientError, StreamingError};
pub use session::{AskOutcome, ChatSession, RetryPolicy, SessionState};

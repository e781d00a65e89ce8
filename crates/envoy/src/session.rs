//! One chat conversation as seen by the terminal client.
//!
//! [`ChatSession`] owns the transcript and publishes every change through a
//! `watch` channel. A call to [`ChatSession::ask`] runs one user turn: the
//! user's message and a loading placeholder are shown immediately, the
//! response is decoded and folded into the transcript as it streams in, and
//! on failure the transcript is rolled back to what the user typed.
//!
//! A turn that stops early, whether through its cancel signal or because its
//! future was dropped, keeps the text shown so far and clears the loading
//! state, so the session accepts the next message.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use openice_shared::{
    Chat, ChatBasic, ChatMessage, MessageRequest, Role, Transcript, TranscriptReducer,
    decode_stream,
};
use tokio::sync::watch;
use uuid::Uuid;

use crate::client::MessageTransport;
use crate::error::{ClientError, Result};

pub const TRACING_TARGET: &str = "openice_envoy::session";

#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub transcript: Transcript,
    /// A turn is in flight.
    pub loading: bool,
    /// Failure of the most recent turn, cleared when the next one starts.
    pub error: Option<Arc<ClientError>>,
}

#[derive(Clone, Debug)]
pub enum AskOutcome {
    /// The response stream was read to the end.
    Completed,
    /// Nothing to send after trimming.
    Empty,
    /// Another turn is still in flight.
    Busy,
    Cancelled,
    /// Every attempt failed. The error is also published in [`SessionState`].
    Failed(Arc<ClientError>),
}

/// Retry schedule for a failed turn: exponential backoff starting at
/// `base_delay`, capped at `max_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct ChatSession<T> {
    transport: T,
    chat: ChatBasic,
    reducer: TranscriptReducer,
    retry: RetryPolicy,
    state: watch::Sender<SessionState>,
}

impl<T: MessageTransport> ChatSession<T> {
    /// A session for a fresh chat, showing only the greeting.
    pub fn new(transport: T, chat_id: Uuid) -> Self {
        Self::with_transcript(transport, chat_id, Transcript::seeded())
    }

    /// A session continuing `chat`. Falls back to the greeting when the chat
    /// has no visible history.
    pub fn from_chat(transport: T, chat: &Chat) -> Self {
        let history = chat.visible_messages();
        let transcript = if history.is_empty() {
            Transcript::seeded()
        } else {
            Transcript::from_messages(history)
        };
        let mut session = Self::with_transcript(transport, chat.uuid, transcript);
        session.chat = chat.basic();
        session
    }

    pub fn with_transcript(transport: T, chat_id: Uuid, transcript: Transcript) -> Self {
        let (state, _) = watch::channel(SessionState {
            transcript,
            ..SessionState::default()
        });
        Self {
            transport,
            chat: ChatBasic::new(chat_id),
            reducer: TranscriptReducer::default(),
            retry: RetryPolicy::default(),
            state,
        }
    }

    pub fn with_reducer(mut self, reducer: TranscriptReducer) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat.uuid
    }

    /// Name and description of the chat, as far as the server sent them.
    pub fn chat(&self) -> &ChatBasic {
        &self.chat
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn ask(&self, text: &str) -> AskOutcome {
        let (_keep, cancel) = watch::channel(false);
        self.ask_with_cancel(text, cancel).await
    }

    /// Runs one turn. Setting `cancel` to `true` stops reading the response
    /// and keeps whatever has been rendered so far. Dropping the returned
    /// future has the same effect.
    pub async fn ask_with_cancel(&self, text: &str, mut cancel: watch::Receiver<bool>) -> AskOutcome {
        let text = text.trim();
        if text.is_empty() {
            return AskOutcome::Empty;
        }

        let mut started = false;
        self.state.send_if_modified(|state| {
            if state.loading {
                return false;
            }
            // Resending the message of a failed turn reuses its entry.
            let resend = state.error.is_some()
                && state.transcript.last().and_then(|m| m.as_text()).is_some_and(|last| {
                    last.meta.role == Role::User && last.content == text
                });
            if !resend {
                state.transcript = state.transcript.appended(ChatMessage::user_text(text));
            }
            state.transcript = state.transcript.appended(ChatMessage::loading(None));
            state.loading = true;
            state.error = None;
            started = true;
            true
        });
        if !started {
            tracing::debug!(target: TRACING_TARGET, "Turn already in flight");
            return AskOutcome::Busy;
        }
        let turn = TurnGuard::new(&self.state, self.chat.uuid);

        let snapshot = self.state.borrow().transcript.clone();
        let request = MessageRequest {
            content: text.to_string(),
        };
        tracing::info!(target: TRACING_TARGET, chat_id = %self.chat.uuid, "Sending message");

        let mut retry = 0;
        loop {
            let result = tokio::select! {
                result = self.run_attempt(&request) => result,
                _ = cancelled(&mut cancel) => return AskOutcome::Cancelled,
            };

            let err = match result {
                Ok(()) => {
                    turn.complete(|state| state.loading = false);
                    return AskOutcome::Completed;
                }
                Err(err) => err,
            };

            if retry >= self.retry.max_retries || !err.is_retryable() {
                tracing::warn!(
                    target: TRACING_TARGET,
                    chat_id = %self.chat.uuid,
                    attempts = retry + 1,
                    error = %err,
                    "Message failed"
                );
                let err = Arc::new(err);
                turn.complete(|state| {
                    state.transcript = snapshot.without_tail();
                    state.loading = false;
                    state.error = Some(err.clone());
                });
                return AskOutcome::Failed(err);
            }

            let delay = self.retry.delay_for(retry);
            retry += 1;
            tracing::warn!(
                target: TRACING_TARGET,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying message"
            );

            // Discard what the failed attempt streamed.
            self.state
                .send_modify(|state| state.transcript = snapshot.clone());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(&mut cancel) => return AskOutcome::Cancelled,
            }
        }
    }

    async fn run_attempt(&self, request: &MessageRequest) -> Result<()> {
        let body = self.transport.create_message(self.chat.uuid, request).await?;
        let events = decode_stream(body);
        futures_util::pin_mut!(events);

        while let Some(event) = events.next().await {
            let event = event?;
            self.state.send_modify(|state| {
                state.transcript = self.reducer.apply(&state.transcript, &event);
            });
        }
        Ok(())
    }
}

/// Clears the loading state of a turn that ends without completing or
/// failing. Runs on drop, so a dropped `ask` future cannot leave the session
/// busy.
struct TurnGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    chat_id: Uuid,
    done: bool,
}

impl<'a> TurnGuard<'a> {
    fn new(state: &'a watch::Sender<SessionState>, chat_id: Uuid) -> Self {
        Self {
            state,
            chat_id,
            done: false,
        }
    }

    /// Publishes the final state of a turn that ran to an outcome.
    fn complete(mut self, finish: impl FnOnce(&mut SessionState)) {
        self.done = true;
        self.state.send_modify(finish);
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        tracing::info!(target: TRACING_TARGET, chat_id = %self.chat_id, "Turn cancelled");
        self.state.send_modify(|state| {
            let unresolved = state
                .transcript
                .last()
                .and_then(|m| m.as_loading())
                .is_some_and(|loading| !loading.error);
            if unresolved {
                state.transcript = state.transcript.without_tail();
            }
            state.loading = false;
        });
    }
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

//! The conversation transcript and the reducer that folds events into it.
//!
//! [`Transcript`] is an immutable snapshot. Applying an event never touches
//! the input; it returns a new snapshot that shares every untouched entry by
//! `Arc`, so callers can detect what changed with [`Arc::ptr_eq`]. The only
//! structural change besides appending is replacing the last entry.
//!
//! One tool call is assumed to be in flight at a time: a new loading entry
//! replaces the previous one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::events::Event;
use crate::messages::ChatMessage;
use crate::stream::{NoopObserver, TracingObserver};

/// Tracing target for transcript updates.
pub const TRACING_TARGET: &str = "openice_shared::transcript";

/// Builds the message that a finished tool call turns into.
pub type ToolCallHandler = Arc<dyn Fn(&str, &serde_json::Value) -> ChatMessage + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Arc<ChatMessage>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        Self {
            messages: messages.into_iter().map(Arc::new).collect(),
        }
    }

    /// A transcript holding only the greeting.
    pub fn seeded() -> Self {
        Self::from_messages([ChatMessage::greeting()])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Arc<ChatMessage>> {
        self.messages.last()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<ChatMessage>> {
        self.messages.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChatMessage>> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[Arc<ChatMessage>] {
        &self.messages
    }

    /// New transcript with `message` added at the end.
    pub fn appended(&self, message: ChatMessage) -> Self {
        let mut messages = self.messages.clone();
        messages.push(Arc::new(message));
        Self { messages }
    }

    /// New transcript with the last entry replaced by `message`. Appends when
    /// empty.
    pub fn with_tail(&self, message: ChatMessage) -> Self {
        let mut messages = self.messages.clone();
        messages.pop();
        messages.push(Arc::new(message));
        Self { messages }
    }

    /// New transcript without its last entry.
    pub fn without_tail(&self) -> Self {
        let mut messages = self.messages.clone();
        messages.pop();
        Self { messages }
    }
}

/// Applies one event with no tool-call handlers registered.
pub fn apply(transcript: &Transcript, event: &Event) -> Transcript {
    TranscriptReducer::default().apply(transcript, event)
}

/// Hook through which the reducer reports events it could not place.
pub trait ReduceObserver {
    /// A tool call finished but no handler is registered for it.
    fn on_unhandled_tool_call(&self, _name: &str) {}

    /// A tool call failed while the transcript was empty.
    fn on_orphan_tool_error(&self, _name: &str) {}
}

impl<O: ReduceObserver + ?Sized> ReduceObserver for Arc<O> {
    fn on_unhandled_tool_call(&self, name: &str) {
        (**self).on_unhandled_tool_call(name)
    }

    fn on_orphan_tool_error(&self, name: &str) {
        (**self).on_orphan_tool_error(name)
    }
}

impl ReduceObserver for NoopObserver {}

impl ReduceObserver for TracingObserver {
    fn on_unhandled_tool_call(&self, name: &str) {
        tracing::debug!(target: TRACING_TARGET, tool = %name, "No handler for finished tool call");
    }

    fn on_orphan_tool_error(&self, name: &str) {
        tracing::warn!(target: TRACING_TARGET, tool = %name, "Tool call error with no pending entry");
    }
}

/// Folds stream events into a transcript.
///
/// Finished tool calls are ignored unless a handler is registered for the
/// tool's name.
#[derive(Clone)]
pub struct TranscriptReducer {
    handlers: HashMap<String, ToolCallHandler>,
    observer: Arc<dyn ReduceObserver + Send + Sync>,
}

impl Default for TranscriptReducer {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl std::fmt::Debug for TranscriptReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptReducer")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TranscriptReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str, &serde_json::Value) -> ChatMessage + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn with_observer(mut self, observer: impl ReduceObserver + Send + Sync + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn apply(&self, transcript: &Transcript, event: &Event) -> Transcript {
        let last = transcript.last();
        let tail_is_text = last.is_some_and(|m| m.is_assistant_text());
        let tail_is_loading = last.is_some_and(|m| m.is_assistant_loading());

        match event {
            Event::TextDelta { delta } => match last.and_then(|m| m.as_text()) {
                Some(text) if tail_is_text => {
                    let mut merged = text.clone();
                    merged.content.push_str(delta);
                    transcript.with_tail(ChatMessage::Text(merged))
                }
                _ => {
                    let message = ChatMessage::assistant_text(delta.as_str());
                    if tail_is_loading {
                        transcript.with_tail(message)
                    } else {
                        transcript.appended(message)
                    }
                }
            },
            Event::ToolCallCreated { name } => {
                let message = ChatMessage::loading(Some(name.clone()));
                if tail_is_loading {
                    transcript.with_tail(message)
                } else {
                    transcript.appended(message)
                }
            }
            Event::ToolCallDone { name, value } => match self.handlers.get(name) {
                Some(handler) => {
                    let message = handler(name, value);
                    if tail_is_loading {
                        transcript.with_tail(message)
                    } else {
                        transcript.appended(message)
                    }
                }
                None => {
                    self.observer.on_unhandled_tool_call(name);
                    transcript.clone()
                }
            },
            Event::ToolCallError { name } => {
                let message = ChatMessage::tool_error(name.as_str());
                if transcript.is_empty() {
                    self.observer.on_orphan_tool_error(name);
                    transcript.appended(message)
                } else {
                    transcript.with_tail(message)
                }
            }
            Event::StreamEnd => transcript.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::messages::{MessageKind, Role};

    fn user_turn() -> Transcript {
        Transcript::seeded().appended(ChatMessage::user_text("How many?"))
    }

    #[test]
    fn test_text_deltas_accumulate_into_one_message() {
        let t = apply(&Transcript::new(), &Event::text_delta("Hello"));
        let t = apply(&t, &Event::text_delta(" world"));

        assert_eq!(t.len(), 1);
        let text = t.last().unwrap().as_text().unwrap();
        assert_eq!(text.content, "Hello world");
        assert_eq!(text.meta.role, Role::Assistant);
    }

    #[test]
    fn test_merge_keeps_identity_of_merged_message() {
        let t1 = apply(&user_turn(), &Event::text_delta("a"));
        let t2 = apply(&t1, &Event::text_delta("b"));
        assert_eq!(t1.last().unwrap().uuid(), t2.last().unwrap().uuid());
        assert_eq!(t1.last().unwrap().as_text().unwrap().content, "a");
    }

    #[test]
    fn test_text_after_user_message_appends() {
        let before = user_turn();
        let after = apply(&before, &Event::text_delta("Hi"));
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after.last().unwrap().role(), Role::Assistant);
    }

    #[test]
    fn test_loading_resolves_into_text() {
        let before = user_turn();
        let loading = apply(&before, &Event::tool_call_created("search"));
        let done = apply(&loading, &Event::text_delta("done"));

        assert_eq!(loading.len(), before.len() + 1);
        assert_eq!(done.len(), before.len() + 1);
        let last = done.last().unwrap();
        assert_eq!(last.kind(), MessageKind::Text);
        assert_eq!(last.as_text().unwrap().content, "done");
        assert_ne!(last.uuid(), loading.last().unwrap().uuid());
    }

    #[test]
    fn test_only_one_loading_entry_at_a_time() {
        let t = apply(&user_turn(), &Event::tool_call_created("a"));
        let t = apply(&t, &Event::tool_call_created("b"));

        assert_eq!(t.len(), 3);
        let loading = t.last().unwrap().as_loading().unwrap();
        assert_eq!(loading.name.as_deref(), Some("b"));
        assert!(!loading.error);
    }

    #[test]
    fn test_tool_call_after_text_appends() {
        let t = apply(&user_turn(), &Event::text_delta("Let me check."));
        let t = apply(&t, &Event::tool_call_created("search"));
        assert_eq!(t.len(), 4);
        assert_eq!(t.last().unwrap().kind(), MessageKind::Loading);
    }

    #[test]
    fn test_tool_error_replaces_tail() {
        let created = apply(&user_turn(), &Event::tool_call_created("x"));
        let failed = apply(&created, &Event::tool_call_error("x"));

        assert_eq!(failed.len(), created.len());
        let loading = failed.last().unwrap().as_loading().unwrap();
        assert!(loading.error);
        assert_eq!(loading.name.as_deref(), Some("x"));
    }

    #[test]
    fn test_tool_error_on_empty_transcript_appends() {
        let t = apply(&Transcript::new(), &Event::tool_call_error("x"));
        assert_eq!(t.len(), 1);
        assert!(t.last().unwrap().as_loading().unwrap().error);
    }

    #[test]
    fn test_tool_done_without_handler_is_inert() {
        let before = apply(&user_turn(), &Event::tool_call_created("search"));
        let after = apply(
            &before,
            &Event::ToolCallDone {
                name: "search".to_string(),
                value: json!({ "rows": 3 }),
            },
        );

        assert_eq!(after.len(), before.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_registered_handler_replaces_loading_entry() {
        let reducer = TranscriptReducer::new().register("search", |_, value| {
            ChatMessage::search("detention", value.clone())
        });

        let t = reducer.apply(&user_turn(), &Event::tool_call_created("search"));
        let t = reducer.apply(
            &t,
            &Event::ToolCallDone {
                name: "search".to_string(),
                value: json!([1, 2]),
            },
        );

        assert_eq!(t.len(), 3);
        assert_eq!(t.last().unwrap().kind(), MessageKind::Search);
    }

    #[test]
    fn test_stream_end_is_inert() {
        let before = user_turn();
        let after = apply(&before, &Event::StreamEnd);
        assert_eq!(after.len(), before.len());
        assert!(Arc::ptr_eq(before.last().unwrap(), after.last().unwrap()));
    }

    #[test]
    fn test_append_preserves_existing_references() {
        let before = user_turn();
        let after = apply(&before, &Event::text_delta("x"));

        for i in 0..before.len() {
            assert!(Arc::ptr_eq(before.get(i).unwrap(), after.get(i).unwrap()));
        }
    }

    #[test]
    fn test_tail_replacement_swaps_only_the_tail() {
        let before = apply(&user_turn(), &Event::text_delta("x"));
        let after = apply(&before, &Event::text_delta("y"));
        let tail = before.len() - 1;

        for i in 0..tail {
            assert!(Arc::ptr_eq(before.get(i).unwrap(), after.get(i).unwrap()));
        }
        assert!(!Arc::ptr_eq(
            before.get(tail).unwrap(),
            after.get(tail).unwrap()
        ));
        assert_eq!(before.last().unwrap().as_text().unwrap().content, "x");
    }

    #[test]
    fn test_greeting_does_not_absorb_deltas_from_a_new_turn() {
        let t = apply(&user_turn(), &Event::text_delta("Answer"));
        let greeting = t.get(0).unwrap().as_text().unwrap();
        assert_eq!(greeting.content, crate::messages::GREETING);
    }

    #[test]
    fn test_full_turn() {
        let events = [
            Event::tool_call_created("lookup"),
            Event::tool_call_error("lookup"),
            Event::text_delta("Sorry, "),
            Event::text_delta("try again."),
        ];

        let t = events
            .iter()
            .fold(user_turn(), |t, event| apply(&t, event));

        // A failed tool entry still resolves into the text that follows it.
        assert_eq!(t.len(), 3);
        assert_eq!(
            t.last().unwrap().as_text().unwrap().content,
            "Sorry, try again."
        );
    }

    #[derive(Default)]
    struct Recorder {
        log: std::sync::Mutex<Vec<String>>,
    }

    impl ReduceObserver for Recorder {
        fn on_unhandled_tool_call(&self, name: &str) {
            self.log.lock().unwrap().push(format!("unhandled:{name}"));
        }

        fn on_orphan_tool_error(&self, name: &str) {
            self.log.lock().unwrap().push(format!("orphan:{name}"));
        }
    }

    #[test]
    fn test_unplaced_events_reported_to_observer() {
        let recorder = Arc::new(Recorder::default());
        let reducer = TranscriptReducer::new().with_observer(recorder.clone());

        let t = reducer.apply(
            &user_turn(),
            &Event::ToolCallDone {
                name: "lookup".to_string(),
                value: json!({}),
            },
        );
        assert_eq!(t.len(), user_turn().len());

        let t = reducer.apply(&Transcript::new(), &Event::tool_call_error("search"));
        assert_eq!(t.len(), 1);

        reducer.apply(&user_turn(), &Event::text_delta("fine"));
        assert_eq!(
            *recorder.log.lock().unwrap(),
            vec!["unhandled:lookup".to_string(), "orphan:search".to_string()]
        );
    }
}

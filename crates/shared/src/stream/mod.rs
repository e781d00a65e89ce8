//! Incremental decoder for the newline-delimited JSON event stream.
//!
//! The chat API answers a message with a chunked body of one JSON event per
//! line. Chunk boundaries fall anywhere: inside a line, inside a JSON string,
//! inside a multi-byte character. [`StreamDecoder`] reassembles complete
//! events from such chunks; [`decode_stream`] wraps it around an async byte
//! stream.
//!
//! A line that is not yet valid JSON is kept and retried with the text that
//! follows it, with no separator. A line that is valid JSON but not a known
//! event is dropped. `response.completed` stops decoding and is never
//! emitted.

mod utf8;

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};

use crate::events::{Event, LineParse, parse_line};

pub use utf8::{Decoded, Utf8Buffer};

/// Tracing target for stream decoding.
pub const TRACING_TARGET: &str = "openice_shared::stream";

/// Default cap on the reassembly buffer: 1 MiB.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Hook through which the decoder reports what it does with each line.
///
/// Every method defaults to doing nothing.
pub trait DecodeObserver {
    fn on_event(&self, _event: &Event) {}

    /// A line did not parse yet and is being held for the next one.
    fn on_fragment(&self, _fragment: &str) {}

    /// Valid JSON that is not a known event. The line is dropped.
    fn on_invalid_line(&self, _line: &str, _error: &serde_json::Error) {}

    fn on_stream_end(&self) {}

    /// Leftover text at the end of the stream that never parsed.
    fn on_trailing_dropped(&self, _fragment: &str) {}

    fn on_malformed_utf8(&self, _replaced: usize) {}

    /// The held fragment grew past the configured cap and was discarded.
    fn on_overflow(&self, _bytes: usize) {}
}

impl<O: DecodeObserver + ?Sized> DecodeObserver for &O {
    fn on_event(&self, event: &Event) {
        (**self).on_event(event)
    }

    fn on_fragment(&self, fragment: &str) {
        (**self).on_fragment(fragment)
    }

    fn on_invalid_line(&self, line: &str, error: &serde_json::Error) {
        (**self).on_invalid_line(line, error)
    }

    fn on_stream_end(&self) {
        (**self).on_stream_end()
    }

    fn on_trailing_dropped(&self, fragment: &str) {
        (**self).on_trailing_dropped(fragment)
    }

    fn on_malformed_utf8(&self, replaced: usize) {
        (**self).on_malformed_utf8(replaced)
    }

    fn on_overflow(&self, bytes: usize) {
        (**self).on_overflow(bytes)
    }
}

impl<O: DecodeObserver + ?Sized> DecodeObserver for Arc<O> {
    fn on_event(&self, event: &Event) {
        (**self).on_event(event)
    }

    fn on_fragment(&self, fragment: &str) {
        (**self).on_fragment(fragment)
    }

    fn on_invalid_line(&self, line: &str, error: &serde_json::Error) {
        (**self).on_invalid_line(line, error)
    }

    fn on_stream_end(&self) {
        (**self).on_stream_end()
    }

    fn on_trailing_dropped(&self, fragment: &str) {
        (**self).on_trailing_dropped(fragment)
    }

    fn on_malformed_utf8(&self, replaced: usize) {
        (**self).on_malformed_utf8(replaced)
    }

    fn on_overflow(&self, bytes: usize) {
        (**self).on_overflow(bytes)
    }
}

/// Silent observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DecodeObserver for NoopObserver {}

/// Reports decoder activity as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DecodeObserver for TracingObserver {
    fn on_event(&self, event: &Event) {
        if !matches!(event, Event::TextDelta { .. }) {
            tracing::debug!(target: TRACING_TARGET, kind = event.kind(), "Decoded event");
        }
    }

    fn on_fragment(&self, fragment: &str) {
        tracing::trace!(
            target: TRACING_TARGET,
            bytes = fragment.len(),
            "Holding partial line"
        );
    }

    fn on_invalid_line(&self, line: &str, error: &serde_json::Error) {
        tracing::warn!(
            target: TRACING_TARGET,
            line = %line,
            error = %error,
            "Dropping unrecognised event"
        );
    }

    fn on_stream_end(&self) {
        tracing::debug!(target: TRACING_TARGET, "Response completed");
    }

    fn on_trailing_dropped(&self, fragment: &str) {
        tracing::warn!(
            target: TRACING_TARGET,
            fragment = %fragment,
            "Dropping unparseable data at end of stream"
        );
    }

    fn on_malformed_utf8(&self, replaced: usize) {
        tracing::warn!(
            target: TRACING_TARGET,
            replaced,
            "Replaced malformed UTF-8 in stream"
        );
    }

    fn on_overflow(&self, bytes: usize) {
        tracing::warn!(
            target: TRACING_TARGET,
            bytes,
            "Discarding oversized partial line"
        );
    }
}

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Largest partial line kept for reassembly.
    pub max_pending_bytes: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl DecoderConfig {
    pub fn with_max_pending_bytes(mut self, max_pending_bytes: usize) -> Self {
        self.max_pending_bytes = max_pending_bytes;
        self
    }
}

/// Push-based decoder. Feed it chunks in order, then call [`finish`].
///
/// One decoder serves exactly one response body; a retried request needs a
/// new one.
///
/// [`finish`]: StreamDecoder::finish
#[derive(Debug)]
pub struct StreamDecoder<O = TracingObserver> {
    utf8: Utf8Buffer,
    pending: String,
    finished: bool,
    config: DecoderConfig,
    observer: O,
}

impl StreamDecoder<TracingObserver> {
    pub fn new() -> Self {
        Self::with_observer(TracingObserver)
    }
}

impl Default for StreamDecoder<TracingObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: DecodeObserver> StreamDecoder<O> {
    pub fn with_observer(observer: O) -> Self {
        Self::with_config(DecoderConfig::default(), observer)
    }

    pub fn with_config(config: DecoderConfig, observer: O) -> Self {
        Self {
            utf8: Utf8Buffer::new(),
            pending: String::new(),
            finished: false,
            config,
            observer,
        }
    }

    /// Whether `response.completed` has been seen. Once it has, further input
    /// is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Text held back waiting for the rest of its line.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Decodes one chunk and returns the events it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Event> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let decoded = self.utf8.decode(chunk);
        if decoded.replaced > 0 {
            self.observer.on_malformed_utf8(decoded.replaced);
        }

        for segment in decoded.text.split('\n') {
            if self.finished {
                break;
            }
            if let Some(event) = self.take_line(segment) {
                events.push(event);
            }
        }

        events
    }

    /// Ends the input, making one last attempt on any held fragment.
    pub fn finish(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if self.utf8.has_carry() {
            let flushed = self.utf8.flush();
            self.observer.on_malformed_utf8(flushed.replaced);
            self.pending.push_str(&flushed.text);
        }

        let rest = std::mem::take(&mut self.pending);
        if rest.trim().is_empty() {
            return None;
        }

        match parse_line(&rest) {
            LineParse::Event(Event::StreamEnd) => {
                self.observer.on_stream_end();
                None
            }
            LineParse::Event(event) => {
                self.observer.on_event(&event);
                Some(event)
            }
            LineParse::Incomplete | LineParse::Invalid(_) => {
                self.observer.on_trailing_dropped(rest.trim());
                None
            }
        }
    }

    fn take_line(&mut self, segment: &str) -> Option<Event> {
        // The held fragment is kept untrimmed so that whitespace inside a
        // JSON string survives a chunk boundary.
        let mut candidate = std::mem::take(&mut self.pending);
        candidate.push_str(segment);

        if candidate.trim().is_empty() {
            return None;
        }

        match parse_line(&candidate) {
            LineParse::Event(Event::StreamEnd) => {
                self.finished = true;
                self.observer.on_stream_end();
                None
            }
            LineParse::Event(event) => {
                self.observer.on_event(&event);
                Some(event)
            }
            LineParse::Incomplete => {
                if candidate.len() > self.config.max_pending_bytes {
                    self.observer.on_overflow(candidate.len());
                } else {
                    self.observer.on_fragment(&candidate);
                    self.pending = candidate;
                }
                None
            }
            LineParse::Invalid(err) => {
                self.observer.on_invalid_line(candidate.trim(), &err);
                None
            }
        }
    }
}

/// Decodes an async stream of byte chunks into events.
///
/// The returned stream is lazy and single-use. A transport error is yielded
/// once and ends it; `response.completed` ends it without reading the rest of
/// the source.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<Event, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    decode_stream_with(chunks, StreamDecoder::new())
}

/// [`decode_stream`] with a caller-supplied decoder.
pub fn decode_stream_with<S, B, E, O>(
    chunks: S,
    mut decoder: StreamDecoder<O>,
) -> impl Stream<Item = Result<Event, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    O: DecodeObserver,
{
    try_stream! {
        futures_util::pin_mut!(chunks);

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            for event in decoder.push(chunk.as_ref()) {
                yield event;
            }
            if decoder.is_finished() {
                break;
            }
        }

        if let Some(event) = decoder.finish() {
            yield event;
        }
    }
}

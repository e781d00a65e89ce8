pub mod events;
pub mod messages;
pub mod stream;
pub mod transcript;

pub use events::{Event, LineParse, parse_line};
pub use messages::{Chat, ChatBasic, ChatMessage, MessageKind, MessageRequest, Role, TextOption};
pub use stream::{DecodeObserver, DecoderConfig, NoopObserver, StreamDecoder, TracingObserver, decode_stream};
pub use transcript::{ReduceObserver, ToolCallHandler, Transcript, TranscriptReducer, apply};

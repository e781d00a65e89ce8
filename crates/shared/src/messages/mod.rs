use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GREETING: &str = "Hello! What would you like to know about immigration statistics?";

static GREETING_OPTIONS: Lazy<Vec<TextOption>> = Lazy::new(|| {
    [
        ("Are all", "detainees criminals?", "Are all detainees criminals?"),
        (
            "How long do",
            "detainees stay in detention?",
            "How long do detainees stay in detention?",
        ),
        (
            "How many detainees",
            "are there in the US?",
            "How many detainees are there in the US?",
        ),
        (
            "How are detainees",
            "being released?",
            "How are detainees being released?",
        ),
    ]
    .into_iter()
    .map(|(title, subtitle, value)| TextOption {
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        value: value.to_string(),
    })
    .collect()
});

/// Current UTC time as ISO-8601 with second precision, e.g. `2025-03-01T17:04:05`.
pub fn timestamp_now() -> String {
    jiff::Timestamp::now()
        .strftime("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Fields every message carries regardless of its type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageMeta {
    pub uuid: Uuid,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl MessageMeta {
    /// Fresh identity stamped with the current time.
    pub fn new(role: Role) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            role,
            created_at: Some(timestamp_now()),
            hidden: false,
        }
    }
}

/// A suggested follow-up prompt attached to a text message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TextOption {
    pub title: String,
    pub subtitle: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TextMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<TextOption>,
}

/// Placeholder for a pending or failed tool call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LoadingMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub complete: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SearchMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,
    pub query: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Loading,
    Search,
}

/// One entry of a conversation transcript.
///
/// Values are never edited after construction. Merging a streamed fragment
/// into a message produces a new `ChatMessage`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatMessage {
    Text(TextMessage),
    Loading(LoadingMessage),
    Search(SearchMessage),
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        ChatMessage::Text(TextMessage {
            meta: MessageMeta::new(role),
            content: content.into(),
            options: Vec::new(),
        })
    }

    pub fn user_text(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant placeholder for work in progress, optionally tied to a tool.
    pub fn loading(name: Option<String>) -> Self {
        ChatMessage::Loading(LoadingMessage {
            meta: MessageMeta::new(Role::Assistant),
            name,
            error: false,
            complete: false,
        })
    }

    /// Assistant placeholder for a tool call that failed.
    pub fn tool_error(name: impl Into<String>) -> Self {
        ChatMessage::Loading(LoadingMessage {
            meta: MessageMeta::new(Role::Assistant),
            name: Some(name.into()),
            error: true,
            complete: false,
        })
    }

    pub fn search(query: impl Into<String>, value: serde_json::Value) -> Self {
        ChatMessage::Search(SearchMessage {
            meta: MessageMeta::new(Role::Assistant),
            query: query.into(),
            value,
        })
    }

    /// Synthetic opening message shown when a chat has no visible history.
    pub fn greeting() -> Self {
        ChatMessage::Text(TextMessage {
            meta: MessageMeta::new(Role::Assistant),
            content: GREETING.to_string(),
            options: GREETING_OPTIONS.clone(),
        })
    }

    pub fn meta(&self) -> &MessageMeta {
        match self {
            ChatMessage::Text(m) => &m.meta,
            ChatMessage::Loading(m) => &m.meta,
            ChatMessage::Search(m) => &m.meta,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.meta().uuid
    }

    pub fn role(&self) -> Role {
        self.meta().role
    }

    pub fn created_at(&self) -> Option<&str> {
        self.meta().created_at.as_deref()
    }

    pub fn is_hidden(&self) -> bool {
        self.meta().hidden
    }

    pub fn is_assistant(&self) -> bool {
        self.role() == Role::Assistant
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            ChatMessage::Text(_) => MessageKind::Text,
            ChatMessage::Loading(_) => MessageKind::Loading,
            ChatMessage::Search(_) => MessageKind::Search,
        }
    }

    pub fn as_text(&self) -> Option<&TextMessage> {
        match self {
            ChatMessage::Text(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_loading(&self) -> Option<&LoadingMessage> {
        match self {
            ChatMessage::Loading(m) => Some(m),
            _ => None,
        }
    }

    /// Assistant text message, the only kind a text delta can merge into.
    pub fn is_assistant_text(&self) -> bool {
        self.is_assistant() && self.kind() == MessageKind::Text
    }

    pub fn is_assistant_loading(&self) -> bool {
        self.is_assistant() && self.kind() == MessageKind::Loading
    }
}

/// A message as the chat API stores it. Tool calls and their outputs are
/// recorded alongside text, so only some records become [`ChatMessage`]s.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageRecord {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl MessageRecord {
    /// Converts a visible text record into a transcript message.
    pub fn to_message(&self) -> Option<ChatMessage> {
        if self.hidden {
            return None;
        }

        let role = match self.role.as_deref() {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => return None,
        };

        let meta = MessageMeta {
            uuid: self.uuid,
            role,
            created_at: self.created_at.clone(),
            hidden: false,
        };

        match self.kind.as_str() {
            "text" => Some(ChatMessage::Text(TextMessage {
                meta,
                content: self.content.clone().unwrap_or_default(),
                options: Vec::new(),
            })),
            "loading" => Some(ChatMessage::Loading(LoadingMessage {
                meta,
                name: self.name.clone(),
                error: false,
                complete: true,
            })),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatBasic {
    pub uuid: Uuid,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ChatBasic {
    /// A chat known only by id.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            created_at: None,
            name: None,
            description: None,
        }
    }

    /// Name to show in a header, falling back to the id.
    pub fn title(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.uuid.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Chat {
    pub uuid: Uuid,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

impl Chat {
    /// History to show, in server order: non-hidden text and loading entries.
    pub fn visible_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter_map(MessageRecord::to_message)
            .collect()
    }

    pub fn basic(&self) -> ChatBasic {
        ChatBasic {
            uuid: self.uuid,
            created_at: self.created_at.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageRequest {
    pub content: String,
}

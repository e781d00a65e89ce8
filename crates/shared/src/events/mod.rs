use serde::{Deserialize, Serialize};
use serde_json::error::Category;

/// One unit of the streamed chat response, discriminated by its `type` field.
///
/// The wire format is newline-delimited JSON; see [`crate::stream`] for how a
/// byte stream is turned into a sequence of these.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "response.output_text.delta")]
    TextDelta {
        delta: String,
    },
    #[serde(rename = "tool.call.created")]
    ToolCallCreated {
        name: String,
    },
    #[serde(rename = "tool.call.done")]
    ToolCallDone {
        name: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    #[serde(rename = "tool.call.error")]
    ToolCallError {
        name: String,
    },
    #[serde(rename = "response.completed")]
    StreamEnd,
}

impl Event {
    /// The wire `type` string of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TextDelta { .. } => "response.output_text.delta",
            Event::ToolCallCreated { .. } => "tool.call.created",
            Event::ToolCallDone { .. } => "tool.call.done",
            Event::ToolCallError { .. } => "tool.call.error",
            Event::StreamEnd => "response.completed",
        }
    }

    pub fn is_stream_end(&self) -> bool {
        matches!(self, Event::StreamEnd)
    }

    pub fn text_delta(delta: impl Into<String>) -> Self {
        Event::TextDelta { delta: delta.into() }
    }

    pub fn tool_call_created(name: impl Into<String>) -> Self {
        Event::ToolCallCreated { name: name.into() }
    }

    pub fn tool_call_error(name: impl Into<String>) -> Self {
        Event::ToolCallError { name: name.into() }
    }
}

/// Outcome of parsing one candidate line of the event stream.
#[derive(Debug)]
pub enum LineParse {
    /// A complete, recognised event.
    Event(Event),
    /// Not (yet) a complete JSON value. The decoder keeps it and retries once
    /// more text has arrived.
    Incomplete,
    /// Well-formed JSON that is not a known event shape.
    Invalid(serde_json::Error),
}

/// Parses a single line of the stream after trimming surrounding whitespace.
///
/// Syntax is checked before shape: a prefix such as `{"type":"unknown.ki` is
/// incomplete even though its tag could already be rejected.
pub fn parse_line(text: &str) -> LineParse {
    let value = match serde_json::from_str::<serde_json::Value>(text.trim()) {
        Ok(value) => value,
        Err(err) => {
            return match err.classify() {
                Category::Eof | Category::Syntax => LineParse::Incomplete,
                Category::Data | Category::Io => LineParse::Invalid(err),
            };
        }
    };

    match serde_json::from_value::<Event>(value) {
        Ok(event) => LineParse::Event(event),
        Err(err) => LineParse::Invalid(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_every_wire_shape() {
        let cases = [
            (
                r#"{"type":"response.output_text.delta","delta":"Hi"}"#,
                Event::text_delta("Hi"),
            ),
            (
                r#"{"type":"tool.call.created","name":"search"}"#,
                Event::tool_call_created("search"),
            ),
            (
                r#"{"type":"tool.call.done","name":"search","value":{"hits":3}}"#,
                Event::ToolCallDone {
                    name: "search".to_string(),
                    value: json!({ "hits": 3 }),
                },
            ),
            (
                r#"{"type":"tool.call.error","name":"search"}"#,
                Event::tool_call_error("search"),
            ),
            (r#"{"type":"response.completed"}"#, Event::StreamEnd),
        ];

        for (line, expected) in cases {
            match parse_line(line) {
                LineParse::Event(event) => assert_eq!(event, expected, "line: {line}"),
                other => panic!("expected event for {line}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_tool_call_done_without_value_is_null() {
        let LineParse::Event(event) = parse_line(r#"{"type":"tool.call.done","name":"x"}"#) else {
            panic!("expected event");
        };
        assert_eq!(
            event,
            Event::ToolCallDone {
                name: "x".to_string(),
                value: serde_json::Value::Null,
            }
        );
    }

    #[test]
    fn test_stream_end_ignores_extra_fields() {
        let parsed = parse_line(r#"{"type":"response.completed","response":{"id":"r_1"}}"#);
        assert!(matches!(parsed, LineParse::Event(Event::StreamEnd)));
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let parsed = parse_line("  \t{\"type\":\"tool.call.created\",\"name\":\"a\"}\r ");
        assert!(matches!(parsed, LineParse::Event(Event::ToolCallCreated { .. })));
    }

    #[test]
    fn test_truncated_json_is_incomplete() {
        assert!(matches!(
            parse_line(r#"{"type":"response."#),
            LineParse::Incomplete
        ));
        assert!(matches!(
            parse_line(r#"{"type":"response.output_text.delta","delta":"hel"#),
            LineParse::Incomplete
        ));
    }

    #[test]
    fn test_syntax_error_is_incomplete() {
        // A tail fragment on its own is a syntax error, not a shape error.
        assert!(matches!(
            parse_line(r#"output_text.delta","delta":"hi"}"#),
            LineParse::Incomplete
        ));
    }

    #[test]
    fn test_unknown_type_is_invalid() {
        assert!(matches!(
            parse_line(r#"{"type":"unknown.kind","foo":1}"#),
            LineParse::Invalid(_)
        ));
    }

    #[test]
    fn test_prefix_of_unknown_type_is_incomplete() {
        assert!(matches!(
            parse_line(r#"{"type":"unknown.kind","fo"#),
            LineParse::Incomplete
        ));
    }

    #[test]
    fn test_missing_field_is_invalid() {
        assert!(matches!(
            parse_line(r#"{"type":"tool.call.created"}"#),
            LineParse::Invalid(_)
        ));
        assert!(matches!(parse_line(r#"[1,2,3]"#), LineParse::Invalid(_)));
    }

    #[test]
    fn test_serializes_to_wire_shape() {
        let value = serde_json::to_value(Event::text_delta("x")).unwrap();
        assert_eq!(
            value,
            json!({ "type": "response.output_text.delta", "delta": "x" })
        );

        let value = serde_json::to_value(Event::StreamEnd).unwrap();
        assert_eq!(value, json!({ "type": "response.completed" }));
    }

    #[test]
    fn test_kind_matches_wire_type() {
        let events = [
            Event::text_delta("a"),
            Event::tool_call_created("b"),
            Event::tool_call_error("c"),
            Event::StreamEnd,
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }
}

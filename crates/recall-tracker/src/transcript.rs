use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" | "human" => Some(Self::User),
            "assistant" | "model" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One message from a transcript. `position` is the 1-based ordinal of the
/// JSONL line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptMessage {
    pub position: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub role: MessageRole,
    pub text: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub messages: Vec<TranscriptMessage>,
    /// Complete lines seen, corrupt ones included.
    pub line_count: u64,
    pub parsed_lines: u64,
    pub skipped_corrupt_lines: usize,
    pub deferred_partial_line: bool,
}

impl Transcript {
    /// True when there were lines but none of them was JSON.
    pub fn is_unparseable(&self) -> bool {
        self.line_count > 0 && self.parsed_lines == 0
    }
}

/// Normalizes a JSONL transcript into ordered messages.
///
/// Accepts flat `{role, text|content, timestamp|ts}` lines and nested
/// `{type, timestamp, message: {role, content}}` lines where `content` is a
/// string or a list of `{type: "text", text}` parts. Lines without a
/// recognizable message still count toward positions. A trailing line with
/// no newline that fails to parse is treated as still being written.
pub fn normalize_jsonl(bytes: &[u8]) -> Transcript {
    let mut transcript = Transcript::default();
    let mut rest = bytes;

    while !rest.is_empty() {
        let (line, complete) = match rest.iter().position(|byte| *byte == b'\n') {
            Some(index) => {
                let line = &rest[..index];
                rest = &rest[index + 1..];
                (line, true)
            }
            None => {
                let line = rest;
                rest = &[];
                (line, false)
            }
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let parsed: Value = match serde_json::from_slice(line) {
            Ok(parsed) => parsed,
            Err(_) if !complete => {
                transcript.deferred_partial_line = true;
                break;
            }
            Err(_) => {
                transcript.line_count += 1;
                transcript.skipped_corrupt_lines += 1;
                continue;
            }
        };

        transcript.line_count += 1;
        transcript.parsed_lines += 1;
        if let Some(message) = parse_message(&parsed, transcript.line_count) {
            transcript.messages.push(message);
        }
    }

    transcript
}

fn parse_message(value: &Value, position: u64) -> Option<TranscriptMessage> {
    let object = value.as_object()?;
    let timestamp = first_timestamp(object);

    let (role, text) = match object.get("message").and_then(Value::as_object) {
        Some(nested) => {
            let role = nested
                .get("role")
                .and_then(Value::as_str)
                .or_else(|| object.get("type").and_then(Value::as_str))
                .and_then(MessageRole::parse)?;
            (role, content_text(nested.get("content"))?)
        }
        None => {
            let role = object
                .get("role")
                .and_then(Value::as_str)
                .and_then(MessageRole::parse)?;
            let text = content_text(object.get("text"))
                .or_else(|| content_text(object.get("content")))?;
            (role, text)
        }
    };

    Some(TranscriptMessage {
        position,
        timestamp,
        role,
        text,
    })
}

fn content_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(Value::as_object)
                .filter(|part| {
                    part.get("type")
                        .and_then(Value::as_str)
                        .map_or(true, |kind| kind == "text")
                })
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

fn first_timestamp(object: &Map<String, Value>) -> Option<DateTime<Utc>> {
    ["timestamp", "ts"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find_map(|value| {
            DateTime::parse_from_rfc3339(value.trim())
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
        })
}

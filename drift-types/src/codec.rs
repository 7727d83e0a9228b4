//! Frame and typed-value codecs.
//!
//! Frames are text: fields separated by the ASCII unit separator (`0x1F`),
//! frames terminated by the ASCII record separator (`0x1E`). Decoding is
//! per-frame fault isolated: one malformed frame yields an `Err` entry
//! without aborting the rest of the batch, and never panics.
//!
//! The typed-value codec preserves JSON scalar types inside a single frame
//! field (used by PATCH payloads and auth responses): a one-character
//! prefix tags the type, the rest is the payload.

use serde_json::Value;

use crate::error::ParseError;
use crate::message::{Action, Message, Topic};

/// Field separator within a frame.
pub const FIELD_SEPARATOR: char = '\u{1f}';
/// Frame terminator.
pub const FRAME_SEPARATOR: char = '\u{1e}';

/// Encode a single message as one terminated frame.
pub fn encode(message: &Message) -> String {
    let mut out = String::new();
    encode_into(message, &mut out);
    out
}

/// Encode a batch of messages as consecutive frames.
pub fn encode_all(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        encode_into(message, &mut out);
    }
    out
}

fn encode_into(message: &Message, out: &mut String) {
    out.push_str(message.topic().code());
    out.push(FIELD_SEPARATOR);
    out.push_str(message.action.code());
    for field in &message.data {
        out.push(FIELD_SEPARATOR);
        out.push_str(field);
    }
    out.push(FRAME_SEPARATOR);
}

/// Decode a batch of frames.
///
/// Each frame decodes independently; malformed frames become `Err` entries
/// so the caller can log and drop them without losing the rest.
pub fn parse(raw: &str) -> Vec<Result<Message, ParseError>> {
    raw.split(FRAME_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .map(parse_frame)
        .collect()
}

fn parse_frame(frame: &str) -> Result<Message, ParseError> {
    let mut fields = frame.split(FIELD_SEPARATOR);
    let topic_code = fields.next().filter(|f| !f.is_empty()).ok_or(ParseError::EmptyFrame)?;
    let topic = Topic::from_code(topic_code)?;
    let action_code = fields.next().ok_or(ParseError::MissingField("action"))?;
    let action = Action::from_code(topic, action_code)?;
    let data = fields.map(str::to_string).collect();
    Ok(Message::new(action, data))
}

/// Encode a JSON value as a typed frame field.
///
/// Scalars keep their type on the wire: `S` string, `N` number, `T` true,
/// `F` false, `L` null; objects and arrays are `O` followed by JSON.
pub fn encode_typed(value: &Value) -> String {
    match value {
        Value::String(s) => format!("S{s}"),
        Value::Number(n) => format!("N{n}"),
        Value::Bool(true) => "T".to_string(),
        Value::Bool(false) => "F".to_string(),
        Value::Null => "L".to_string(),
        Value::Object(_) | Value::Array(_) => format!("O{value}"),
    }
}

/// Decode a typed frame field back into a JSON value.
pub fn parse_typed(raw: &str) -> Result<Value, ParseError> {
    let mut chars = raw.chars();
    let prefix = chars.next();
    let payload = chars.as_str();
    match prefix {
        Some('S') => Ok(Value::String(payload.to_string())),
        Some('N') => parse_number(payload),
        Some('T') => Ok(Value::Bool(true)),
        Some('F') => Ok(Value::Bool(false)),
        Some('L') => Ok(Value::Null),
        Some('O') => serde_json::from_str(payload).map_err(ParseError::InvalidJson),
        other => Err(ParseError::UnknownTypePrefix(other)),
    }
}

/// Numbers try integer representations first so `N42` round-trips as an
/// integer rather than as `42.0`.
fn parse_number(payload: &str) -> Result<Value, ParseError> {
    if let Ok(i) = payload.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(u) = payload.parse::<u64>() {
        return Ok(Value::from(u));
    }
    match payload.parse::<f64>() {
        Ok(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| ParseError::InvalidNumber(payload.to_string())),
        Err(_) => Err(ParseError::InvalidNumber(payload.to_string())),
    }
}

//! JSON hub protocol framing.
//!
//! Every message is a JSON object terminated by the ASCII record separator
//! (`0x1E`). A text frame may carry several records.

use serde::Serialize;
use serde_json::{json, Value};

pub const RECORD_SEPARATOR: char = '\u{1e}';

pub const MESSAGE_INVOCATION: u64 = 1;
pub const MESSAGE_STREAM_INVOCATION: u64 = 4;
pub const MESSAGE_COMPLETION: u64 = 3;
pub const MESSAGE_PING: u64 = 6;
pub const MESSAGE_CLOSE: u64 = 7;

pub const SUPPORTED_PROTOCOL: &str = "json";

#[derive(Serialize)]
struct Invocation<'a> {
    #[serde(rename = "type")]
    kind: u64,
    target: &'a str,
    arguments: &'a [&'a str],
}

/// A record received from a client
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Handshake { protocol: String, version: u64 },
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
        streaming: bool,
    },
    Ping,
    Close,
    Other(u64),
    Malformed,
}

/// Build a server-to-client invocation record
pub fn invocation(target: &str, arguments: &[&str]) -> Result<String, serde_json::Error> {
    let mut frame = serde_json::to_string(&Invocation {
        kind: MESSAGE_INVOCATION,
        target,
        arguments,
    })?;
    frame.push(RECORD_SEPARATOR);
    Ok(frame)
}

pub fn ping() -> String {
    record(json!({ "type": MESSAGE_PING }))
}

/// Answer to the client's protocol handshake; `{}` on success
pub fn handshake_response(error: Option<&str>) -> String {
    match error {
        Some(error) => record(json!({ "error": error })),
        None => record(json!({})),
    }
}

/// Successful completion of a client invocation without a result
pub fn completion(invocation_id: &str) -> String {
    record(json!({
        "type": MESSAGE_COMPLETION,
        "invocationId": invocation_id,
    }))
}

/// Completion carrying an error for a failed or refused client invocation
pub fn completion_error(invocation_id: Option<&str>, error: &str) -> String {
    match invocation_id {
        Some(id) => record(json!({
            "type": MESSAGE_COMPLETION,
            "invocationId": id,
            "error": error,
        })),
        None => record(json!({
            "type": MESSAGE_COMPLETION,
            "error": error,
        })),
    }
}

pub fn close(error: Option<&str>) -> String {
    match error {
        Some(error) => record(json!({ "type": MESSAGE_CLOSE, "error": error })),
        None => record(json!({ "type": MESSAGE_CLOSE })),
    }
}

/// Split a text frame into records and classify each
pub fn parse_inbound(text: &str) -> Vec<Inbound> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(record: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(record) else {
        return Inbound::Malformed;
    };

    if let Some(protocol) = value.get("protocol").and_then(Value::as_str) {
        return Inbound::Handshake {
            protocol: protocol.to_string(),
            version: value.get("version").and_then(Value::as_u64).unwrap_or(0),
        };
    }

    match value.get("type").and_then(Value::as_u64) {
        Some(kind @ (MESSAGE_INVOCATION | MESSAGE_STREAM_INVOCATION)) => Inbound::Invocation {
            invocation_id: value
                .get("invocationId")
                .and_then(Value::as_str)
                .map(str::to_string),
            target: value
                .get("target")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            arguments: match value.get("arguments") {
                Some(Value::Array(arguments)) => arguments.clone(),
                _ => Vec::new(),
            },
            streaming: kind == MESSAGE_STREAM_INVOCATION,
        },
        Some(MESSAGE_PING) => Inbound::Ping,
        Some(MESSAGE_CLOSE) => Inbound::Close,
        Some(other) => Inbound::Other(other),
        None => Inbound::Malformed,
    }
}

fn record(value: Value) -> String {
    let mut frame = value.to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

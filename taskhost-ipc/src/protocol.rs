//! IPC protocol definitions and message types

use serde_json::Value as JsonValue;

use crate::error::{IpcError, ProtocolError};

const HEARTBEAT: &str = "heartbeat";
const RESULT: &str = "result";
const MESSAGE: &str = "message";

/// Messages sent from a worker process to the supervisor (worker stdout)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `["heartbeat"]`: the worker is still making progress
    Heartbeat,

    /// `["result", text]`: the worker's answer to the task payload
    Result(String),
}

impl InboundMessage {
    /// Parse one line of worker output.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: JsonValue =
            serde_json::from_str(line).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let JsonValue::Array(items) = value else {
            return Err(ProtocolError::NotAnArray);
        };

        let keyword = match items.first() {
            Some(JsonValue::String(keyword)) => keyword.as_str(),
            _ => return Err(ProtocolError::MissingKeyword),
        };

        match keyword {
            HEARTBEAT => {
                expect_arity(HEARTBEAT, &items, 1)?;
                Ok(InboundMessage::Heartbeat)
            }
            RESULT => {
                expect_arity(RESULT, &items, 2)?;
                match &items[1] {
                    JsonValue::String(text) => Ok(InboundMessage::Result(text.clone())),
                    _ => Err(ProtocolError::InvalidArgument {
                        keyword: RESULT,
                        reason: "result must be a string",
                    }),
                }
            }
            other => Err(ProtocolError::UnknownKeyword(other.to_string())),
        }
    }

    /// Parse a raw line as read from the pipe, rejecting invalid UTF-8.
    pub fn parse_bytes(line: &[u8]) -> Result<Self, ProtocolError> {
        let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::parse(line)
    }

    /// Protocol keyword of this message
    pub fn keyword(&self) -> &'static str {
        match self {
            InboundMessage::Heartbeat => HEARTBEAT,
            InboundMessage::Result(_) => RESULT,
        }
    }
}

fn expect_arity(
    keyword: &'static str,
    items: &[JsonValue],
    expected: usize,
) -> Result<(), ProtocolError> {
    if items.len() != expected {
        return Err(ProtocolError::InvalidArity {
            keyword,
            expected,
            actual: items.len(),
        });
    }
    Ok(())
}

/// Messages sent from the supervisor to a worker process (worker stdin)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// `["message", text]`: the task payload
    Message(String),
}

impl OutboundMessage {
    /// Encode as a single minified JSON line, without the trailing newline.
    pub fn encode(&self) -> Result<String, IpcError> {
        let value = match self {
            OutboundMessage::Message(text) => {
                JsonValue::Array(vec![MESSAGE.into(), JsonValue::String(text.clone())])
            }
        };
        Ok(serde_json::to_string(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heartbeat() {
        assert_eq!(
            InboundMessage::parse(r#"["heartbeat"]"#),
            Ok(InboundMessage::Heartbeat)
        );
    }

    #[test]
    fn test_parse_result() {
        assert_eq!(
            InboundMessage::parse(r#"["result", "OK"]"#),
            Ok(InboundMessage::Result("OK".to_string()))
        );
        assert_eq!(
            InboundMessage::parse(r#"["result",""]"#),
            Ok(InboundMessage::Result(String::new()))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(matches!(
            InboundMessage::parse("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            InboundMessage::parse(""),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            InboundMessage::parse(r#"{"result": "OK"}"#),
            Err(ProtocolError::NotAnArray)
        );
        assert_eq!(InboundMessage::parse("[]"), Err(ProtocolError::MissingKeyword));
        assert_eq!(
            InboundMessage::parse("[42, \"OK\"]"),
            Err(ProtocolError::MissingKeyword)
        );
        assert_eq!(
            InboundMessage::parse(r#"["bogus"]"#),
            Err(ProtocolError::UnknownKeyword("bogus".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_bad_result_shape() {
        assert_eq!(
            InboundMessage::parse(r#"["result"]"#),
            Err(ProtocolError::InvalidArity {
                keyword: "result",
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            InboundMessage::parse(r#"["result", "a", "b"]"#),
            Err(ProtocolError::InvalidArity {
                keyword: "result",
                expected: 2,
                actual: 3
            })
        );
        assert!(matches!(
            InboundMessage::parse(r#"["result", null]"#),
            Err(ProtocolError::InvalidArgument { .. })
        ));
        assert!(matches!(
            InboundMessage::parse(r#"["result", {"x": 1}]"#),
            Err(ProtocolError::InvalidArgument { .. })
        ));
        assert!(matches!(
            InboundMessage::parse(r#"["heartbeat", 1]"#),
            Err(ProtocolError::InvalidArity { .. })
        ));
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        assert_eq!(
            InboundMessage::parse_bytes(&[0x5b, 0xff, 0x5d]),
            Err(ProtocolError::InvalidUtf8)
        );
    }

    #[test]
    fn test_encode_message_is_minified() {
        let line = OutboundMessage::Message("hello \"world\"\n".to_string())
            .encode()
            .unwrap();
        assert_eq!(line, r#"["message","hello \"world\"\n"]"#);
        assert!(!line.contains('\n'));
    }
}

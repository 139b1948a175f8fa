//! Nostr relay message types.
//!
//! The subset of the NIP-01 relay protocol a watcher needs:
//! - Client to Relay: REQ, CLOSE
//! - Relay to Client: EVENT, EOSE, CLOSED, NOTICE (AUTH challenges are parsed and ignored)

use crate::error::ClientError;
use nostr::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),
}

fn parse_array(json: &str) -> Result<Vec<Value>, MessageError> {
    let arr: Vec<Value> =
        serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;
    if arr.is_empty() {
        return Err(MessageError::InvalidFormat("empty array".to_string()));
    }
    Ok(arr)
}

fn string_at(arr: &[Value], index: usize, field: &str) -> Result<String, MessageError> {
    arr.get(index)
        .ok_or_else(|| MessageError::MissingField(field.to_string()))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidFormat(format!("{} not a string", field)))
}

/// Messages sent from client to relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },
}

impl ClientMessage {
    /// Subscription id the message refers to.
    pub fn subscription_id(&self) -> &str {
        match self {
            ClientMessage::Req {
                subscription_id, ..
            }
            | ClientMessage::Close { subscription_id } => subscription_id,
        }
    }

    /// Serialize to JSON array for sending to relay.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr: Vec<Value> = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }

    /// Parse a client frame, as a relay would.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr = parse_array(json)?;
        let msg_type = string_at(&arr, 0, "message type")?;

        match msg_type.as_str() {
            "REQ" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let filters = arr[2..]
                    .iter()
                    .map(|value| serde_json::from_value(value.clone()))
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(ClientMessage::Close {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
            }),
            _ => Err(MessageError::UnknownType(msg_type)),
        }
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge (NIP-42): ["AUTH", <challenge>]
    Auth { challenge: String },
}

impl RelayMessage {
    /// Parse a JSON message from the relay.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr = parse_array(json)?;
        let msg_type = string_at(&arr, 0, "message type")?;

        match msg_type.as_str() {
            "EVENT" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let event = arr
                    .get(2)
                    .ok_or_else(|| MessageError::MissingField("event".to_string()))?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event: serde_json::from_value(event.clone())?,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
                message: arr.get(2).and_then(Value::as_str).unwrap_or("").to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(&arr, 1, "message")?,
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: string_at(&arr, 1, "challenge")?,
            }),
            _ => Err(MessageError::UnknownType(msg_type)),
        }
    }

    /// Build an EVENT frame. Used by relays and test doubles.
    pub fn event_frame(subscription_id: &str, event: &Event) -> String {
        serde_json::json!(["EVENT", subscription_id, event]).to_string()
    }
}

/// Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events since timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events until timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries keyed with the `#` prefix (e.g. `#p`)
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter. The key should be the tag letter (e.g., "e", "p").
    pub fn tag(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{}", key.into()), values);
        self
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn pubkey_refs(self, pubkeys: Vec<String>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Values of a tag query, by tag letter.
    pub fn tag_values(&self, key: &str) -> Option<&[String]> {
        self.tags.get(&format!("#{}", key)).map(Vec::as_slice)
    }
}

/// A websocket relay address.
///
/// Parsing normalizes the URL (lowercase host, explicit root path), so two
/// spellings of the same relay compare equal and share one pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayUrl(Url);

impl RelayUrl {
    pub fn parse(input: &str) -> Result<Self, ClientError> {
        let url = Url::parse(input.trim())?;
        match url.scheme() {
            "ws" | "wss" if url.host_str().is_some() => Ok(Self(url)),
            "ws" | "wss" => Err(ClientError::InvalidUrl(format!("{}: missing host", input))),
            scheme => Err(ClientError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                input, scheme
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl FromStr for RelayUrl {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT_JSON: &str = r#"{"id":"abc","pubkey":"pk","created_at":123,"kind":1059,"tags":[["p","def"]],"content":"Hello","sig":"sig"}"#;

    #[test]
    fn test_client_message_req() {
        let filter = Filter::new().kinds(vec![1059]).since(1000);
        let msg = ClientMessage::Req {
            subscription_id: "sub1".to_string(),
            filters: vec![filter],
        };

        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"["REQ","sub1",{"kinds":[1059],"since":1000}]"#);
    }

    #[test]
    fn test_client_message_close() {
        let msg = ClientMessage::Close {
            subscription_id: "sub1".to_string(),
        };
        assert_eq!(msg.to_json().unwrap(), r#"["CLOSE","sub1"]"#);
    }

    #[test]
    fn test_client_message_parse_preserves_filter() {
        let original = ClientMessage::Req {
            subscription_id: "watch".to_string(),
            filters: vec![
                Filter::new()
                    .kinds(vec![1059])
                    .pubkey_refs(vec!["ab".repeat(32)])
                    .since(1_700_000_000),
            ],
        };

        let parsed = ClientMessage::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.subscription_id(), "watch");
    }

    #[test]
    fn test_client_message_parse_rejects_event() {
        assert!(matches!(
            ClientMessage::from_json(r#"["EVENT",{}]"#),
            Err(MessageError::UnknownType(_))
        ));
    }

    #[test]
    fn test_relay_message_event() {
        let json = format!(r#"["EVENT","sub1",{}]"#, EVENT_JSON);
        match RelayMessage::from_json(&json).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event.id, "abc");
                assert_eq!(event.kind, 1059);
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_relay_message_eose() {
        match RelayMessage::from_json(r#"["EOSE","sub1"]"#).unwrap() {
            RelayMessage::Eose { subscription_id } => assert_eq!(subscription_id, "sub1"),
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_relay_message_closed_without_reason() {
        match RelayMessage::from_json(r#"["CLOSED","sub1"]"#).unwrap() {
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert!(message.is_empty());
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_relay_message_notice_and_auth() {
        assert!(matches!(
            RelayMessage::from_json(r#"["NOTICE","rate limited"]"#).unwrap(),
            RelayMessage::Notice { message } if message == "rate limited"
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["AUTH","challenge123"]"#).unwrap(),
            RelayMessage::Auth { challenge } if challenge == "challenge123"
        ));
    }

    #[test]
    fn test_invalid_message() {
        assert!(RelayMessage::from_json("not valid json").is_err());
        assert!(RelayMessage::from_json("[]").is_err());
        assert!(RelayMessage::from_json(r#"["UNKNOWN"]"#).is_err());
        assert!(RelayMessage::from_json(r#"["OK","id",true,""]"#).is_err());
        assert!(RelayMessage::from_json(r#"["EVENT","sub1"]"#).is_err());
        assert!(RelayMessage::from_json(r#"["EVENT",7,{}]"#).is_err());
    }

    #[test]
    fn test_event_frame_parses_back() {
        let event: Event = serde_json::from_str(EVENT_JSON).unwrap();
        let frame = RelayMessage::event_frame("sub9", &event);
        assert!(matches!(
            RelayMessage::from_json(&frame).unwrap(),
            RelayMessage::Event { subscription_id, event: parsed } if subscription_id == "sub9" && parsed == event
        ));
    }

    #[test]
    fn test_filter_serialization_omits_empty_fields() {
        let filter = Filter::new()
            .kinds(vec![1059])
            .pubkey_refs(vec!["pk".to_string()]);

        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("\"kinds\":[1059]"));
        assert!(json.contains("\"#p\":[\"pk\"]"));
        assert!(!json.contains("authors"));
        assert!(!json.contains("since"));
        assert_eq!(filter.tag_values("p"), Some(&["pk".to_string()][..]));
    }

    #[test]
    fn test_relay_url_normalizes() {
        let a = RelayUrl::parse("wss://Relay.Example.com").unwrap();
        let b = RelayUrl::parse(" wss://relay.example.com/ ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "wss://relay.example.com/");
    }

    #[test]
    fn test_relay_url_rejects_non_websocket() {
        assert!(matches!(
            RelayUrl::parse("https://relay.example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            RelayUrl::parse("not a url"),
            Err(ClientError::UrlParse(_))
        ));
    }
}

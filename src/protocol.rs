//! Line-oriented wire protocol codec.
//!
//! A request or response is a single line of `Key=Value` pairs joined by the
//! `~SEP~` delimiter, e.g. `Action=PUBLISH~SEP~Content=Hello World`.
//!
//! Requests decode into a [`ClientRequest`] with one variant per action, each
//! carrying only the fields that action requires. Responses encode from a
//! [`ClientResponse`] with a stable field order. The codec holds no state and
//! is safe to use from any number of connections concurrently.

use chrono::{DateTime, Utc};

/// Field delimiter between `Key=Value` pairs on the wire.
pub const DELIMITER: &str = "~SEP~";

/// Error code reported for unexpected dispatch failures.
pub const INTERNAL_ERROR_CODE: i32 = 500;

/// The operation a client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Publish,
    Read,
    Delete,
    ExtendLease,
}

impl Action {
    /// Parse an action from its wire name, case-insensitively.
    fn from_wire(value: &str) -> Option<Action> {
        match value.to_ascii_uppercase().as_str() {
            "PUBLISH" => Some(Action::Publish),
            "READ" => Some(Action::Read),
            "DELETE" => Some(Action::Delete),
            "EXTEND_LEASE" => Some(Action::ExtendLease),
            _ => None,
        }
    }
}

/// A decoded client request.
///
/// Each variant carries exactly the fields its action requires, so consumers
/// never have to inspect optional fields that cannot apply to the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Publish a message to the queue.
    Publish { content: String },

    /// Read messages for a client, optionally extending the lease.
    Read {
        client_id: String,
        lease_expired_at: Option<i64>,
    },

    /// Extend the lease on messages held by a client.
    ExtendLease {
        client_id: String,
        lease_expired_at: Option<i64>,
    },

    /// Delete a message previously read by a client.
    Delete {
        client_id: String,
        message_id: String,
    },
}

impl ClientRequest {
    /// The action this request was decoded from.
    pub fn action(&self) -> Action {
        match self {
            ClientRequest::Publish { .. } => Action::Publish,
            ClientRequest::Read { .. } => Action::Read,
            ClientRequest::ExtendLease { .. } => Action::ExtendLease,
            ClientRequest::Delete { .. } => Action::Delete,
        }
    }
}

/// A single queue message with its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub message: String,
}

/// A serializable error carried in a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
}

/// A structured response to be sent to a client.
///
/// The type deliberately does not enforce mutual exclusion between `error`
/// and the normal-result fields; callers are expected to populate one or the
/// other, and the encoder emits whatever is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientResponse {
    pub error: Option<ErrorInfo>,
    pub messages: Vec<Message>,
    pub client_id: Option<String>,
    pub lease_expired_at: Option<DateTime<Utc>>,
}

impl ClientResponse {
    /// A response carrying only an error.
    pub fn from_error(code: i32, message: impl Into<String>) -> Self {
        ClientResponse {
            error: Some(ErrorInfo {
                code,
                message: message.into(),
            }),
            ..Default::default()
        }
    }
}

/// Request decode errors.
///
/// All of these are recoverable protocol faults: the session reports them to
/// the client as an error response and keeps the connection open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input is blank or a fragment is not a `Key=Value` pair.
    MalformedInput(String),
    /// A field required by the action (or `Action` itself) is absent.
    MissingField(&'static str),
    /// The `Action` value is not a known action.
    InvalidAction(String),
    /// A numeric field holds a non-numeric value.
    InvalidNumber { field: &'static str, value: String },
}

impl DecodeError {
    /// Stable application error code reported to clients.
    pub fn code(&self) -> i32 {
        match self {
            DecodeError::MalformedInput(_) => 400,
            DecodeError::MissingField(_) => 401,
            DecodeError::InvalidAction(_) => 402,
            DecodeError::InvalidNumber { .. } => 403,
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            DecodeError::MissingField(field) => {
                write!(f, "Missing mandatory '{}' parameter", field)
            }
            DecodeError::InvalidAction(action) => {
                write!(f, "Invalid action specified: {}", action)
            }
            DecodeError::InvalidNumber { field, value } => {
                write!(f, "Invalid number format for '{}': {}", field, value)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode one raw request line into a [`ClientRequest`].
pub fn decode(raw: &str) -> Result<ClientRequest, DecodeError> {
    if raw.trim().is_empty() {
        return Err(DecodeError::MalformedInput(
            "input cannot be empty".to_string(),
        ));
    }

    let mut params: Vec<(&str, &str)> = Vec::new();
    for fragment in raw.split(DELIMITER) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        // Split on the first '=' only; values may themselves contain '='.
        let (key, value) = fragment
            .split_once('=')
            .ok_or_else(|| DecodeError::MalformedInput(fragment.to_string()))?;
        params.push((key.trim(), value.trim()));
    }

    let action_str = lookup(&params, "Action").ok_or(DecodeError::MissingField("Action"))?;
    let action = Action::from_wire(action_str)
        .ok_or_else(|| DecodeError::InvalidAction(action_str.to_string()))?;

    match action {
        Action::Publish => Ok(ClientRequest::Publish {
            content: required(&params, "Content")?.to_string(),
        }),
        Action::Read => Ok(ClientRequest::Read {
            client_id: required(&params, "ClientId")?.to_string(),
            lease_expired_at: optional_i64(&params, "LeaseExpiredAt")?,
        }),
        Action::ExtendLease => Ok(ClientRequest::ExtendLease {
            client_id: required(&params, "ClientId")?.to_string(),
            lease_expired_at: optional_i64(&params, "LeaseExpiredAt")?,
        }),
        Action::Delete => Ok(ClientRequest::Delete {
            client_id: required(&params, "ClientId")?.to_string(),
            message_id: required(&params, "MessageId")?.to_string(),
        }),
    }
}

fn lookup<'a>(params: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn required<'a>(
    params: &[(&'a str, &'a str)],
    key: &'static str,
) -> Result<&'a str, DecodeError> {
    lookup(params, key).ok_or(DecodeError::MissingField(key))
}

fn optional_i64(
    params: &[(&str, &str)],
    key: &'static str,
) -> Result<Option<i64>, DecodeError> {
    match lookup(params, key) {
        None => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| DecodeError::InvalidNumber {
                field: key,
                value: value.to_string(),
            }),
    }
}

/// Encode a [`ClientResponse`] into one wire line (without a line terminator).
///
/// Field order is fixed: error fields, then client id, then lease expiry,
/// then messages by position. Encoding never fails; absent optional fields
/// are simply not emitted, and in particular `LeaseExpiredAt` is gated on
/// its own presence rather than on `ClientId`.
pub fn encode(response: &ClientResponse) -> String {
    let mut fields: Vec<(String, String)> = Vec::new();

    if let Some(error) = &response.error {
        fields.push(("ErrorCode".to_string(), error.code.to_string()));
        fields.push(("ErrorMessage".to_string(), error.message.clone()));
    }

    if let Some(client_id) = &response.client_id {
        fields.push(("ClientId".to_string(), client_id.clone()));
    }

    if let Some(lease) = &response.lease_expired_at {
        fields.push(("LeaseExpiredAt".to_string(), lease.timestamp().to_string()));
    }

    for (i, msg) in response.messages.iter().enumerate() {
        fields.push((format!("MessageId_{}", i), msg.message_id.clone()));
        fields.push((format!("Message_{}", i), msg.message.clone()));
    }

    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_publish() {
        let request = decode("Action=PUBLISH~SEP~Content=Hello").unwrap();
        assert_eq!(
            request,
            ClientRequest::Publish {
                content: "Hello".to_string()
            }
        );
    }

    #[test]
    fn test_decode_read_with_lease() {
        let request = decode("Action=READ~SEP~ClientId=c1~SEP~LeaseExpiredAt=1700000000").unwrap();
        assert_eq!(
            request,
            ClientRequest::Read {
                client_id: "c1".to_string(),
                lease_expired_at: Some(1700000000),
            }
        );
    }

    #[test]
    fn test_decode_read_without_lease() {
        let request = decode("Action=READ~SEP~ClientId=c1").unwrap();
        assert_eq!(
            request,
            ClientRequest::Read {
                client_id: "c1".to_string(),
                lease_expired_at: None,
            }
        );
    }

    #[test]
    fn test_decode_extend_lease() {
        let request =
            decode("Action=EXTEND_LEASE~SEP~ClientId=c2~SEP~LeaseExpiredAt=42").unwrap();
        assert_eq!(
            request,
            ClientRequest::ExtendLease {
                client_id: "c2".to_string(),
                lease_expired_at: Some(42),
            }
        );
    }

    #[test]
    fn test_decode_delete() {
        let request = decode("Action=DELETE~SEP~ClientId=c1~SEP~MessageId=m7").unwrap();
        assert_eq!(
            request,
            ClientRequest::Delete {
                client_id: "c1".to_string(),
                message_id: "m7".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_action_is_case_insensitive() {
        let request = decode("Action=publish~SEP~Content=x").unwrap();
        assert_eq!(request.action(), Action::Publish);
    }

    #[test]
    fn test_decode_blank_input() {
        assert!(matches!(decode(""), Err(DecodeError::MalformedInput(_))));
        assert!(matches!(decode("   "), Err(DecodeError::MalformedInput(_))));
    }

    #[test]
    fn test_decode_fragment_without_equals() {
        assert!(matches!(
            decode("Action=PUBLISH~SEP~garbage"),
            Err(DecodeError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_decode_missing_action() {
        assert_eq!(
            decode("Content=Hello"),
            Err(DecodeError::MissingField("Action"))
        );
    }

    #[test]
    fn test_decode_unknown_action() {
        assert_eq!(
            decode("Action=FOO"),
            Err(DecodeError::InvalidAction("FOO".to_string()))
        );
    }

    #[test]
    fn test_decode_missing_required_field() {
        assert_eq!(
            decode("Action=PUBLISH"),
            Err(DecodeError::MissingField("Content"))
        );
        assert_eq!(
            decode("Action=READ"),
            Err(DecodeError::MissingField("ClientId"))
        );
        assert_eq!(
            decode("Action=DELETE~SEP~ClientId=c1"),
            Err(DecodeError::MissingField("MessageId"))
        );
    }

    #[test]
    fn test_decode_non_numeric_lease() {
        assert_eq!(
            decode("Action=READ~SEP~ClientId=c1~SEP~LeaseExpiredAt=soon"),
            Err(DecodeError::InvalidNumber {
                field: "LeaseExpiredAt",
                value: "soon".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_value_may_contain_equals() {
        let request = decode("Action=PUBLISH~SEP~Content=a=b=c").unwrap();
        assert_eq!(
            request,
            ClientRequest::Publish {
                content: "a=b=c".to_string()
            }
        );
    }

    #[test]
    fn test_decode_trims_whitespace_and_skips_empty_fragments() {
        let request = decode("  Action=PUBLISH ~SEP~~SEP~ Content = Hello ").unwrap();
        assert_eq!(
            request,
            ClientRequest::Publish {
                content: "Hello".to_string()
            }
        );
    }

    #[test]
    fn test_encode_error_only() {
        let response = ClientResponse::from_error(400, "bad");
        assert_eq!(encode(&response), "ErrorCode=400~SEP~ErrorMessage=bad");
    }

    #[test]
    fn test_encode_field_order_with_error_and_messages() {
        let response = ClientResponse {
            error: Some(ErrorInfo {
                code: 400,
                message: "bad".to_string(),
            }),
            messages: vec![
                Message {
                    message_id: "m0".to_string(),
                    message: "first".to_string(),
                },
                Message {
                    message_id: "m1".to_string(),
                    message: "second".to_string(),
                },
            ],
            client_id: None,
            lease_expired_at: None,
        };
        let expected = "ErrorCode=400~SEP~ErrorMessage=bad~SEP~MessageId_0=m0~SEP~Message_0=first~SEP~MessageId_1=m1~SEP~Message_1=second";
        assert_eq!(encode(&response), expected);
    }

    #[test]
    fn test_encode_client_id_and_lease() {
        let response = ClientResponse {
            error: None,
            messages: vec![],
            client_id: Some("c1".to_string()),
            lease_expired_at: Some(Utc.timestamp_opt(1700000000, 0).unwrap()),
        };
        assert_eq!(
            encode(&response),
            "ClientId=c1~SEP~LeaseExpiredAt=1700000000"
        );
    }

    #[test]
    fn test_encode_client_id_without_lease() {
        // LeaseExpiredAt is gated on its own presence.
        let response = ClientResponse {
            client_id: Some("c1".to_string()),
            ..Default::default()
        };
        assert_eq!(encode(&response), "ClientId=c1");
    }

    #[test]
    fn test_encode_empty_response() {
        assert_eq!(encode(&ClientResponse::default()), "");
    }

    #[test]
    fn test_encode_is_deterministic() {
        let response = ClientResponse {
            error: Some(ErrorInfo {
                code: 1,
                message: "x".to_string(),
            }),
            messages: vec![Message {
                message_id: "a".to_string(),
                message: "b".to_string(),
            }],
            client_id: Some("c".to_string()),
            lease_expired_at: Some(Utc.timestamp_opt(5, 0).unwrap()),
        };
        assert_eq!(encode(&response), encode(&response));
    }
}

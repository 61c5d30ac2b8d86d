//! The seam between the client runtime and the network.
//!
//! [`Transport`] is what the client needs from the outside world: fetching evaluated flags for an
//! identity, opening the live update stream, and delivering analytics events.
//! [`HttpTransport`](crate::HttpTransport) is the default implementation.
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::{events::EventRecord, Error, FlagDescriptor, FlagMap, RedactedIdentity, Result};

/// Messages received on a live update stream, parsed with [`StreamMessage::parse`].
///
/// Items of the stream are `Err(Error::StreamParse(_))` for messages that could not be parsed;
/// the connection is still considered alive after those. Any other error ends the connection.
pub type MessageStream = BoxStream<'static, Result<StreamMessage>>;

/// A message received on the live update stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Full snapshot of all flags.
    Put(FlagMap),
    /// A single flag was added or updated.
    Patch {
        /// Flag key.
        key: String,
        /// New descriptor of the flag.
        descriptor: FlagDescriptor,
    },
    /// A single flag was deleted.
    Delete {
        /// Flag key.
        key: String,
        /// Version of the deletion. Older stored versions are removed.
        version: Option<u64>,
    },
    /// Flags changed on the server. The client should fetch them again.
    Ping,
}

#[derive(Deserialize)]
struct PatchPayload {
    key: String,
    #[serde(flatten)]
    descriptor: FlagDescriptor,
}

#[derive(Deserialize)]
struct DeletePayload {
    key: String,
    #[serde(default)]
    version: Option<u64>,
}

impl StreamMessage {
    /// Parse a message from its event type and data.
    ///
    /// Returns `None` for unknown event types, which should be ignored.
    pub fn parse(event_type: &str, data: &str) -> Option<Result<StreamMessage>> {
        let parse_error = |err: serde_json::Error| Error::StreamParse(format!("{event_type}: {err}"));

        let message = match event_type {
            "put" => serde_json::from_str::<FlagMap>(data)
                .map(StreamMessage::Put)
                .map_err(parse_error),
            "patch" => serde_json::from_str::<PatchPayload>(data)
                .map(|it| StreamMessage::Patch {
                    key: it.key,
                    descriptor: it.descriptor,
                })
                .map_err(parse_error),
            "delete" => serde_json::from_str::<DeletePayload>(data)
                .map(|it| StreamMessage::Delete {
                    key: it.key,
                    version: it.version,
                })
                .map_err(parse_error),
            "ping" => Ok(StreamMessage::Ping),
            _ => return None,
        };

        Some(message)
    }
}

/// Network capability consumed by the client.
///
/// Identities handed to the transport already have private attributes removed. `hash` is the
/// opaque signature passed to [`Client::identify`](crate::Client::identify), if any.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the evaluated flags for `identity`.
    async fn fetch_flags(&self, identity: &RedactedIdentity, hash: Option<&str>) -> Result<FlagMap>;

    /// Open the live update stream for `identity`.
    async fn open_stream(
        &self,
        identity: &RedactedIdentity,
        hash: Option<&str>,
    ) -> Result<MessageStream>;

    /// Deliver a batch of analytics events.
    async fn post_events(&self, events: Vec<EventRecord>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlagValue;

    #[test]
    fn parses_put() {
        let message = StreamMessage::parse("put", r#"{"a": {"value": true, "version": 1}}"#)
            .unwrap()
            .unwrap();

        let StreamMessage::Put(flags) = message else {
            panic!("expected a put message");
        };
        assert_eq!(flags["a"].value, FlagValue::Bool(true));
    }

    #[test]
    fn parses_patch_and_delete() {
        let patch = StreamMessage::parse(
            "patch",
            r#"{"key": "a", "value": "x", "variation": 1, "version": 2}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            patch,
            StreamMessage::Patch {
                key: "a".to_owned(),
                descriptor: FlagDescriptor::new("x".into())
                    .with_variation_index(1)
                    .with_version(2),
            }
        );

        let delete = StreamMessage::parse("delete", r#"{"key": "a", "version": 3}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            delete,
            StreamMessage::Delete {
                key: "a".to_owned(),
                version: Some(3)
            }
        );
    }

    #[test]
    fn malformed_data_is_a_parse_error() {
        let result = StreamMessage::parse("patch", "{not json").unwrap();
        assert!(matches!(result, Err(Error::StreamParse(_))));
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        assert!(StreamMessage::parse("heartbeat", "").is_none());
        assert_eq!(
            StreamMessage::parse("ping", "").unwrap().unwrap(),
            StreamMessage::Ping
        );
    }
}

//! A client-side feature flag runtime.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that holds the flag values evaluated by the flag service
//! for one active [`Identity`]. Flag values are served synchronously with [`Client::variation`];
//! a missing flag falls back to the default passed by the caller.
//!
//! Flags are fetched when the client starts and whenever the active identity changes with
//! [`Client::identify`]. An optional live update stream keeps them current. By default the stream
//! is only open while someone listens for `change` events (see [`Client::on`]).
//!
//! Flag evaluations and custom events recorded with [`Client::track`] are buffered, deduplicated,
//! optionally sampled, and delivered to the event collection service in the background.
//!
//! All network access goes through the [`Transport`] trait. [`HttpTransport`] is used unless
//! another transport is configured with [`ClientConfig::transport`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Flag evaluation never fails. Errors that have no caller to be returned to, such as a failed
//! event delivery or a dropped stream connection, are emitted as `error` events and logged when
//! nobody listens for them.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `flagwire` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into client operations.
//!
//! # Runtime
//!
//! Background work runs as Tokio tasks, so clients must be created within a Tokio runtime.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod config;
mod emitter;
mod error;
mod flag;
mod flag_store;
mod http;
mod identity;
mod persistence;
mod streaming;
mod transport;
mod value;

pub mod events;

#[cfg(test)]
mod test_support;

pub use client::{
    flag_change_event, Client, ClientEvent, ReadinessState, ReadyOutcome, EVENT_CHANGE,
    EVENT_ERROR, EVENT_FAILED, EVENT_INITIALIZED, EVENT_READY,
};
pub use config::ClientConfig;
pub use emitter::{EventEmitter, Listener, SubscriptionHandle};
pub use error::{Error, Result};
pub use flag::{
    ErrorKind, EvaluationDetail, EvaluationReason, FlagDescriptor, FlagMap, FlagSet, ReasonKind,
};
pub use flag_store::{diff, ChangeSet, FlagChange, FlagStore};
pub use http::{HttpTransport, HttpTransportConfig};
pub use identity::{AttributeValue, Identity, PrivacyPolicy, RedactedIdentity};
pub use persistence::{Bootstrap, MemoryPersistence, Persistence};
pub use streaming::{StreamState, StreamingUpdater};
pub use transport::{MessageStream, StreamMessage, Transport};
pub use value::FlagValue;

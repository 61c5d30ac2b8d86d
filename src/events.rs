//! Analytics events produced by the client and shipped back to the event collection service.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{EvaluationReason, FlagValue, RedactedIdentity};

pub mod processor;

pub use processor::{EventProcessor, EventProcessorConfig};

/// A single analytics event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventRecord {
    /// A flag was evaluated.
    Feature(FeatureEvent),
    /// Application-defined event recorded with [`Client::track`](crate::Client::track).
    Custom(CustomEvent),
    /// The active identity changed.
    Identify(IdentifyEvent),
}

impl EventRecord {
    /// When the event was recorded.
    pub fn creation_date(&self) -> DateTime<Utc> {
        match self {
            EventRecord::Feature(event) => event.creation_date,
            EventRecord::Custom(event) => event.creation_date,
            EventRecord::Identify(event) => event.creation_date,
        }
    }
}

/// An evaluation of a flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvent {
    /// When the event was recorded.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_date: DateTime<Utc>,
    /// Flag key.
    pub key: String,
    /// Identity the flag was evaluated for.
    pub user: Arc<RedactedIdentity>,
    /// Value returned to the caller.
    pub value: FlagValue,
    /// Index of the value among the flag's variations.
    #[serde(rename = "variation", skip_serializing_if = "Option::is_none")]
    pub variation_index: Option<u32>,
    /// Flag version at evaluation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// The default value supplied by the caller. `None` for evaluations done by
    /// [`Client::all_flags`](crate::Client::all_flags).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<FlagValue>,
    /// Only present when evaluation reasons are enabled, or for unknown flags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<EvaluationReason>,
    /// The flag was unknown and the caller's default was returned.
    pub default_used: bool,
}

/// An event recorded with [`Client::track`](crate::Client::track).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    /// When the event was recorded.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_date: DateTime<Utc>,
    /// Event name.
    pub key: String,
    /// Identity active when the event was recorded.
    pub user: Arc<RedactedIdentity>,
    /// Arbitrary application data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The active identity changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyEvent {
    /// When the identity became active.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_date: DateTime<Utc>,
    /// Identity key.
    pub key: String,
    /// The new identity.
    pub user: Arc<RedactedIdentity>,
}

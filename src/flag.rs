use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::FlagValue;

/// Flags as delivered by the service: flag key to evaluation result.
pub type FlagMap<V = FlagValue> = HashMap<String, Arc<FlagDescriptor<V>>>;

/// Flag key to flag value, as returned by [`Client::all_flags`](crate::Client::all_flags).
pub type FlagSet<V = FlagValue> = HashMap<String, V>;

/// Result of evaluating a single flag for the active identity.
///
/// Descriptors are immutable. Updates replace the whole descriptor of a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDescriptor<V = FlagValue> {
    /// Value of the flag for the identity.
    pub value: V,
    /// Index of `value` among the values the flag can take.
    #[serde(rename = "variation", default, skip_serializing_if = "Option::is_none")]
    pub variation_index: Option<u32>,
    /// Server-side version of the flag. Used to discard out-of-order live updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Only populated when evaluation reasons are requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EvaluationReason>,
}

impl<V> FlagDescriptor<V> {
    /// Create a descriptor with only a value.
    pub fn new(value: V) -> FlagDescriptor<V> {
        FlagDescriptor {
            value,
            variation_index: None,
            version: None,
            reason: None,
        }
    }

    /// Set the variation index.
    pub fn with_variation_index(mut self, index: u32) -> Self {
        self.variation_index = Some(index);
        self
    }

    /// Set the flag version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the evaluation reason.
    pub fn with_reason(mut self, reason: EvaluationReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Why a flag evaluated to its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReason {
    /// General category of the reason.
    pub kind: ReasonKind,
    /// Set when `kind` is [`ReasonKind::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Index of the matched rule, for [`ReasonKind::RuleMatch`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_index: Option<u32>,
    /// Id of the matched rule, for [`ReasonKind::RuleMatch`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Key of the failed prerequisite, for [`ReasonKind::PrerequisiteFailed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerequisite_key: Option<String>,
}

impl EvaluationReason {
    /// An `ERROR` reason with the given kind.
    pub fn error(error_kind: ErrorKind) -> EvaluationReason {
        EvaluationReason {
            kind: ReasonKind::Error,
            error_kind: Some(error_kind),
            rule_index: None,
            rule_id: None,
            prerequisite_key: None,
        }
    }

    /// Reason reported for flags the client does not know.
    pub fn flag_not_found() -> EvaluationReason {
        EvaluationReason::error(ErrorKind::FlagNotFound)
    }
}

/// Category of an [`EvaluationReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonKind {
    /// The flag is off and returned its off variation.
    Off,
    /// No rule matched and the fallthrough variation was returned.
    Fallthrough,
    /// The identity was targeted individually.
    TargetMatch,
    /// The identity matched a rule.
    RuleMatch,
    /// A prerequisite flag did not have the required value.
    PrerequisiteFailed,
    /// The flag could not be evaluated. See [`EvaluationReason::error_kind`].
    Error,
}

/// Why a flag could not be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Flags were requested before they were available.
    ClientNotReady,
    /// The flag key is unknown.
    FlagNotFound,
    /// The flag data is invalid.
    MalformedFlag,
    /// No identity was given.
    UserNotSpecified,
    /// The value has an unexpected type.
    WrongType,
    /// Unexpected failure during evaluation.
    Exception,
}

/// Returned by [`Client::variation_detail`](crate::Client::variation_detail).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetail<V = FlagValue> {
    /// Flag value, or the caller's default.
    pub value: V,
    /// Index of the value among the flag's variations. `None` when the default was used.
    pub variation_index: Option<u32>,
    /// `None` only when the flag exists but the service did not send a reason (evaluation reasons
    /// are disabled).
    pub reason: Option<EvaluationReason>,
}

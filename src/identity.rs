//! The user on whose behalf flags are evaluated, and removal of private attributes before the user
//! leaves the process.
use std::collections::{BTreeMap, HashSet};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Value of a custom identity attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string attribute.
    String(String),
    /// A numeric attribute.
    Number(f64),
    /// A boolean attribute.
    Boolean(bool),
    /// A list of attribute values.
    Array(Vec<AttributeValue>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// The active user context.
///
/// Only `key` is required. Attributes listed in `private_attribute_names` (or in the client's
/// [`ClientConfig::private_attribute_names`](crate::ClientConfig::private_attribute_names)) are
/// stripped before the identity is sent to the service or included in analytics events.
///
/// ```
/// # use flagwire::Identity;
/// let user = Identity::new("user-123")
///     .with_email("someone@example.com")
///     .with_custom("plan", "enterprise")
///     .with_private_attribute("email");
/// assert!(user.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Unique key of the identity. Must not be empty.
    pub key: String,
    /// Secondary key used for percentage rollouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    /// Full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// First name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Country.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Whether the identity is anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
    /// Application-defined attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, AttributeValue>,
    /// Attributes of this identity that are never sent to the service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_attribute_names: Vec<String>,
}

impl Identity {
    /// Create an identity with only a key.
    pub fn new(key: impl Into<String>) -> Identity {
        Identity {
            key: key.into(),
            ..Identity::default()
        }
    }

    /// Set the full name.
    pub fn with_name(mut self, name: impl Into<String>) -> Identity {
        self.name = Some(name.into());
        self
    }

    /// Set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Identity {
        self.email = Some(email.into());
        self
    }

    /// Set the country.
    pub fn with_country(mut self, country: impl Into<String>) -> Identity {
        self.country = Some(country.into());
        self
    }

    /// Mark the identity as anonymous.
    pub fn with_anonymous(mut self, anonymous: bool) -> Identity {
        self.anonymous = Some(anonymous);
        self
    }

    /// Set a custom attribute.
    pub fn with_custom(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Identity {
        self.custom.insert(name.into(), value.into());
        self
    }

    /// Mark an attribute of this identity as private.
    pub fn with_private_attribute(mut self, name: impl Into<String>) -> Identity {
        self.private_attribute_names.push(name.into());
        self
    }

    /// Check that the identity can be used for evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] if `key` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::InvalidIdentity);
        }
        Ok(())
    }

    /// Produce a copy of this identity with private attributes removed.
    ///
    /// `key` and `anonymous` can never be private. Names of removed attributes are listed in
    /// `privateAttrs`, so the service knows they existed.
    pub fn redact(&self, policy: &PrivacyPolicy) -> RedactedIdentity {
        let local: HashSet<&str> = self
            .private_attribute_names
            .iter()
            .map(String::as_str)
            .collect();
        let is_private =
            |name: &str| policy.all_attributes_private || policy.contains(name) || local.contains(name);

        let mut private_attrs = Vec::new();
        let mut keep = |name: &str, value: &Option<String>| -> Option<String> {
            match value {
                Some(_) if is_private(name) => {
                    private_attrs.push(name.to_owned());
                    None
                }
                other => other.clone(),
            }
        };

        let secondary = keep("secondary", &self.secondary);
        let name = keep("name", &self.name);
        let first_name = keep("firstName", &self.first_name);
        let last_name = keep("lastName", &self.last_name);
        let email = keep("email", &self.email);
        let avatar = keep("avatar", &self.avatar);
        let ip = keep("ip", &self.ip);
        let country = keep("country", &self.country);

        let mut custom = BTreeMap::new();
        for (name, value) in &self.custom {
            if is_private(name) {
                private_attrs.push(name.clone());
            } else {
                custom.insert(name.clone(), value.clone());
            }
        }

        RedactedIdentity {
            key: self.key.clone(),
            secondary,
            name,
            first_name,
            last_name,
            email,
            avatar,
            ip,
            country,
            anonymous: self.anonymous,
            custom,
            private_attrs,
        }
    }
}

/// Client-wide private attribute configuration.
#[derive(Debug, Clone, Default)]
pub struct PrivacyPolicy {
    /// Treat every attribute other than the key as private.
    pub all_attributes_private: bool,
    /// Attributes that are private for every identity.
    pub private_attribute_names: HashSet<String>,
}

impl PrivacyPolicy {
    fn contains(&self, name: &str) -> bool {
        self.private_attribute_names.contains(name)
    }
}

/// An [`Identity`] with private attributes removed. This is the only form of identity that is
/// handed to the transport or written into analytics events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedIdentity {
    /// Unique key of the identity. Never redacted.
    pub key: String,
    /// Secondary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    /// Full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// First name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Country.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Whether the identity is anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
    /// Application-defined attributes that are not private.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, AttributeValue>,
    /// Names of the attributes that were removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_attrs: Vec<String>,
}

use std::{sync::Arc, time::Duration};

use crate::{
    events::EventProcessorConfig, streaming::StreamingUpdater, Bootstrap, Client, Identity,
    Persistence, PrivacyPolicy, Result, Transport,
};

/// Configuration for [`Client`].
///
/// ```
/// # use flagwire::ClientConfig;
/// # use std::time::Duration;
/// let config = ClientConfig::new("environment-id")
///     .evaluation_reasons(true)
///     .flush_interval(Duration::from_secs(5))
///     .private_attribute_names(["email"]);
/// ```
pub struct ClientConfig {
    pub(crate) environment_id: String,
    pub(crate) base_url: String,
    pub(crate) stream_url: String,
    pub(crate) events_url: String,
    pub(crate) streaming: Option<bool>,
    pub(crate) use_report: bool,
    pub(crate) send_sdk_headers: bool,
    pub(crate) evaluation_reasons: bool,
    pub(crate) send_events: bool,
    pub(crate) all_attributes_private: bool,
    pub(crate) private_attribute_names: Vec<String>,
    pub(crate) allow_frequent_duplicate_events: bool,
    pub(crate) send_events_only_for_variation: bool,
    pub(crate) flush_interval: Duration,
    pub(crate) sampling_interval: u32,
    pub(crate) stream_reconnect_delay: Duration,
    pub(crate) event_capacity: usize,
    pub(crate) bootstrap: Option<Bootstrap>,
    pub(crate) hash: Option<String>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) persistence: Option<Arc<dyn Persistence>>,
}

impl ClientConfig {
    /// Default base URL for flag requests.
    pub const DEFAULT_BASE_URL: &'static str = "https://app.flagwire.io";
    /// Default base URL for the live update stream.
    pub const DEFAULT_STREAM_URL: &'static str = "https://stream.flagwire.io";
    /// Default base URL for analytics events.
    pub const DEFAULT_EVENTS_URL: &'static str = "https://events.flagwire.io";

    /// Create a default configuration for the given client-side environment id.
    pub fn new(environment_id: impl Into<String>) -> ClientConfig {
        ClientConfig {
            environment_id: environment_id.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            stream_url: ClientConfig::DEFAULT_STREAM_URL.to_owned(),
            events_url: ClientConfig::DEFAULT_EVENTS_URL.to_owned(),
            streaming: None,
            use_report: false,
            send_sdk_headers: true,
            evaluation_reasons: false,
            send_events: true,
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
            allow_frequent_duplicate_events: false,
            send_events_only_for_variation: false,
            flush_interval: EventProcessorConfig::DEFAULT_FLUSH_INTERVAL,
            sampling_interval: 0,
            stream_reconnect_delay: StreamingUpdater::DEFAULT_RECONNECT_DELAY,
            event_capacity: EventProcessorConfig::DEFAULT_CAPACITY,
            bootstrap: None,
            hash: None,
            transport: None,
            persistence: None,
        }
    }

    /// Override base URL for flag requests. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override base URL for the live update stream.
    pub fn stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = stream_url.into();
        self
    }

    /// Override base URL for analytics events.
    pub fn events_url(mut self, events_url: impl Into<String>) -> Self {
        self.events_url = events_url.into();
        self
    }

    /// `Some(true)` always keeps the live update stream open, `Some(false)` never opens it.
    /// `None` (the default) opens it only while there are change listeners.
    pub fn streaming(mut self, streaming: Option<bool>) -> Self {
        self.streaming = streaming;
        self
    }

    /// Send the identity in a request body (`REPORT`) instead of the URL.
    pub fn use_report(mut self, use_report: bool) -> Self {
        self.use_report = use_report;
        self
    }

    /// Include SDK identification headers in requests.
    pub fn send_sdk_headers(mut self, send_sdk_headers: bool) -> Self {
        self.send_sdk_headers = send_sdk_headers;
        self
    }

    /// Request evaluation reasons from the service.
    pub fn evaluation_reasons(mut self, evaluation_reasons: bool) -> Self {
        self.evaluation_reasons = evaluation_reasons;
        self
    }

    /// Master switch for analytics events.
    pub fn send_events(mut self, send_events: bool) -> Self {
        self.send_events = send_events;
        self
    }

    /// Treat every identity attribute other than the key as private.
    pub fn all_attributes_private(mut self, all_attributes_private: bool) -> Self {
        self.all_attributes_private = all_attributes_private;
        self
    }

    /// Identity attributes that are never sent to the service.
    pub fn private_attribute_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.private_attribute_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Record every evaluation event instead of suppressing repeats of the same flag value.
    pub fn allow_frequent_duplicate_events(mut self, allow: bool) -> Self {
        self.allow_frequent_duplicate_events = allow;
        self
    }

    /// Only record evaluation events for [`Client::variation`] and
    /// [`Client::variation_detail`], not for [`Client::all_flags`].
    pub fn send_events_only_for_variation(mut self, only_for_variation: bool) -> Self {
        self.send_events_only_for_variation = only_for_variation;
        self
    }

    /// Interval between automatic event flushes. `Duration::ZERO` disables the timer.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Keep one in `sampling_interval` evaluation events. `0` keeps all of them.
    pub fn sampling_interval(mut self, sampling_interval: u32) -> Self {
        self.sampling_interval = sampling_interval;
        self
    }

    /// Delay before reconnecting a dropped stream.
    pub fn stream_reconnect_delay(mut self, delay: Duration) -> Self {
        self.stream_reconnect_delay = delay;
        self
    }

    /// Maximum number of buffered analytics events.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Flags to serve before the initial fetch completes.
    pub fn bootstrap(mut self, bootstrap: Bootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Signature of the initial identity, for services that verify identities.
    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Replace the default HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Storage used by [`Bootstrap::LocalStorage`].
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub(crate) fn privacy_policy(&self) -> PrivacyPolicy {
        PrivacyPolicy {
            all_attributes_private: self.all_attributes_private,
            private_attribute_names: self.private_attribute_names.iter().cloned().collect(),
        }
    }

    pub(crate) fn event_processor_config(&self) -> EventProcessorConfig {
        EventProcessorConfig {
            enabled: self.send_events,
            allow_frequent_duplicate_events: self.allow_frequent_duplicate_events,
            sampling_interval: self.sampling_interval,
            flush_interval: self.flush_interval,
            capacity: self.event_capacity,
        }
    }

    /// Create a new [`Client`] for `identity` using this configuration.
    ///
    /// See [`Client::start`].
    pub fn to_client(self, identity: Identity) -> Result<Client> {
        Client::start(self, identity)
    }
}

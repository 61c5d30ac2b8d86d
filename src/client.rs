use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, RwLock, Weak,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    emitter::{EventEmitter, Listener, SubscriptionHandle},
    events::{CustomEvent, EventProcessor, EventRecord, FeatureEvent, IdentifyEvent},
    flag_store::{diff, ChangeSet, FlagStore},
    streaming::{StreamHandler, StreamState, StreamingUpdater},
    transport::{StreamMessage, Transport},
    Bootstrap, ClientConfig, Error, EvaluationDetail, EvaluationReason, FlagMap, FlagSet,
    FlagValue, HttpTransport, HttpTransportConfig, Identity, Persistence, PrivacyPolicy,
    RedactedIdentity, Result,
};

/// Emitted once when the initial fetch has settled, whether it succeeded or not.
pub const EVENT_READY: &str = "ready";
/// Emitted once when the initial fetch succeeded.
pub const EVENT_INITIALIZED: &str = "initialized";
/// Emitted once when the initial fetch failed.
pub const EVENT_FAILED: &str = "failed";
/// Emitted with the whole [`ChangeSet`] whenever flag values change.
pub const EVENT_CHANGE: &str = "change";
/// Emitted for errors that have no caller to be returned to.
pub const EVENT_ERROR: &str = "error";

/// Name of the event emitted when the value of `flag_key` changes.
pub fn flag_change_event(flag_key: &str) -> String {
    format!("{EVENT_CHANGE}:{flag_key}")
}

fn is_change_event(event_name: &str) -> bool {
    event_name == EVENT_CHANGE
        || event_name
            .strip_prefix(EVENT_CHANGE)
            .is_some_and(|rest| rest.starts_with(':'))
}

/// Payload delivered to listeners registered with [`Client::on`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The initial fetch has settled. Delivered on `ready`.
    Ready,
    /// The initial fetch succeeded. Delivered on `initialized`.
    Initialized,
    /// The initial fetch failed. Delivered on `failed`.
    Failed(Error),
    /// All flags that changed in one update.
    Change(ChangeSet),
    /// A single flag changed. Delivered on `change:<key>`.
    FlagChange {
        /// Flag key.
        key: String,
        /// New value. `None` if the flag was removed.
        current: Option<FlagValue>,
        /// Value before the change. `None` if the flag was added.
        previous: Option<FlagValue>,
    },
    /// An error with no caller to be returned to. Delivered on `error`.
    Error(Error),
}

/// Whether the initial fetch has settled. Never reverts to `Uninitialized`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessState {
    /// The initial fetch is still running.
    Uninitialized,
    /// The initial fetch has settled.
    Ready(ReadyOutcome),
}

/// How the initial fetch settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyOutcome {
    /// Flags were fetched for the initial identity.
    Initialized,
    /// The fetch failed. Bootstrap flags, if any, are still served.
    Failed(Error),
}

impl ReadinessState {
    /// `None` while the initial fetch is running.
    pub fn outcome(&self) -> Option<&ReadyOutcome> {
        match self {
            ReadinessState::Uninitialized => None,
            ReadinessState::Ready(outcome) => Some(outcome),
        }
    }
}

/// The active identity together with the flags evaluated for it.
struct Session {
    id: u64,
    identity: Arc<Identity>,
    redacted: Arc<RedactedIdentity>,
    hash: Option<String>,
    flags: FlagStore,
}

struct StreamPolicy {
    /// `None` follows the number of change listeners.
    forced: Option<bool>,
    change_listeners: usize,
    /// Streaming waits for the initial fetch to settle.
    allowed: bool,
}

/// A feature flag client for a single active identity.
///
/// The client holds the flags evaluated for the current identity and serves them synchronously
/// with [`Client::variation`]. Flags are fetched when the client starts and on every
/// [`Client::identify`], and kept current by an optional live update stream. Evaluations and
/// custom events are buffered and delivered to the event collection service in the background.
///
/// `Client` is cheap to clone; clones share the same state.
///
/// # Examples
/// ```no_run
/// # use flagwire::{ClientConfig, Identity};
/// # async fn run() -> flagwire::Result<()> {
/// let client = ClientConfig::new("environment-id").to_client(Identity::new("user-key"))?;
/// client.wait_for_initialization().await?;
///
/// if client.variation("new-checkout", false) == true.into() {
///     // ...
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    weak_self: Weak<ClientInner>,
    transport: Arc<dyn Transport>,
    persistence: Option<Arc<dyn Persistence>>,
    save_snapshots: bool,
    privacy: PrivacyPolicy,
    send_events_only_for_variation: bool,
    session: RwLock<Arc<Session>>,
    /// Serializes writers of the session and its flags.
    session_write: Mutex<()>,
    next_session_id: AtomicU64,
    identify_seq: AtomicU64,
    emitter: EventEmitter<ClientEvent>,
    events: EventProcessor,
    streaming: StreamingUpdater,
    stream_policy: Mutex<StreamPolicy>,
    readiness: watch::Sender<ReadinessState>,
    closed: AtomicBool,
    init_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Start a client for `identity`.
    ///
    /// Flags from the configured [`Bootstrap`] are available immediately. The initial fetch runs
    /// in the background; use [`Client::wait_until_ready`] or
    /// [`Client::wait_for_initialization`] to wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] if the identity has no key, and
    /// [`Error::InvalidBaseUrl`] if the default transport cannot be built.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(config: ClientConfig, identity: Identity) -> Result<Client> {
        identity.validate()?;

        let transport: Arc<dyn Transport> = match config.transport.clone() {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(HttpTransportConfig::from(&config))?),
        };
        let save_snapshots = matches!(config.bootstrap, Some(Bootstrap::LocalStorage));
        let initial_flags = initial_flags(&config, &identity);
        let privacy = config.privacy_policy();

        let redacted = Arc::new(identity.redact(&privacy));
        let session = Arc::new(Session {
            id: 0,
            identity: Arc::new(identity),
            redacted,
            hash: config.hash.clone(),
            flags: FlagStore::from_flags(initial_flags),
        });
        let (readiness, _) = watch::channel(ReadinessState::Uninitialized);

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let on_error = {
                let weak = weak.clone();
                Arc::new(move |err: Error| match weak.upgrade() {
                    Some(inner) => inner.emit_error(err),
                    None => log::error!(target: "flagwire", "{err}"),
                })
            };

            ClientInner {
                weak_self: weak.clone(),
                transport: transport.clone(),
                persistence: config.persistence.clone(),
                save_snapshots,
                privacy,
                send_events_only_for_variation: config.send_events_only_for_variation,
                session: RwLock::new(session.clone()),
                session_write: Mutex::new(()),
                next_session_id: AtomicU64::new(1),
                identify_seq: AtomicU64::new(0),
                emitter: EventEmitter::new(),
                events: EventProcessor::start(
                    config.event_processor_config(),
                    transport.clone(),
                    on_error,
                ),
                streaming: StreamingUpdater::new(transport, config.stream_reconnect_delay),
                stream_policy: Mutex::new(StreamPolicy {
                    forced: config.streaming,
                    change_listeners: 0,
                    allowed: false,
                }),
                readiness,
                closed: AtomicBool::new(false),
                init_task: Mutex::new(None),
            }
        });

        inner.record_identify(&session);
        let task = tokio::spawn(ClientInner::initialize(Arc::downgrade(&inner)));
        *inner.lock_init_task() = Some(task);

        log::debug!(target: "flagwire", identity = session.identity.key.as_str(); "client started");
        Ok(Client { inner })
    }

    /// Value of `flag_key` for the current identity, or `default` if the flag is unknown.
    pub fn variation(&self, flag_key: &str, default: impl Into<FlagValue>) -> FlagValue {
        self.evaluate(flag_key, default.into()).value
    }

    /// Like [`Client::variation`], but also returns the variation index and the reason for the
    /// value. Unknown flags get an `ERROR`/`FLAG_NOT_FOUND` reason.
    pub fn variation_detail(&self, flag_key: &str, default: impl Into<FlagValue>) -> EvaluationDetail {
        self.evaluate(flag_key, default.into())
    }

    fn evaluate(&self, flag_key: &str, default: FlagValue) -> EvaluationDetail {
        let session = self.inner.current_session();

        let descriptor = session.flags.get(flag_key);
        let default_used = descriptor.as_ref().map_or(true, |it| it.value.is_null());
        let detail = match &descriptor {
            Some(descriptor) => EvaluationDetail {
                value: if default_used {
                    default.clone()
                } else {
                    descriptor.value.clone()
                },
                variation_index: descriptor.variation_index,
                reason: descriptor.reason.clone(),
            },
            None => {
                log::trace!(target: "flagwire", flag_key; "evaluated an unknown flag");
                EvaluationDetail {
                    value: default.clone(),
                    variation_index: None,
                    reason: Some(EvaluationReason::flag_not_found()),
                }
            }
        };

        self.inner.events.enqueue(EventRecord::Feature(FeatureEvent {
            creation_date: Utc::now(),
            key: flag_key.to_owned(),
            user: session.redacted.clone(),
            value: detail.value.clone(),
            variation_index: detail.variation_index,
            version: descriptor.and_then(|it| it.version),
            default: Some(default),
            reason: detail.reason.clone(),
            default_used,
        }));

        detail
    }

    /// Switch to a new identity and fetch its flags.
    ///
    /// If several calls overlap, the last one wins: earlier calls return
    /// [`Error::IdentifySuperseded`] and leave the client untouched. On success, listeners are
    /// notified about every flag whose value differs from the previous identity's.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidIdentity`] if the identity has no key.
    /// - [`Error::IdentifySuperseded`] if a later call started before this one finished.
    /// - Transport errors if the flags could not be fetched. The previous identity stays active.
    /// - [`Error::ClientClosed`] after [`Client::close`].
    pub async fn identify(&self, identity: Identity, hash: Option<String>) -> Result<FlagSet> {
        self.inner.identify(identity, hash).await
    }

    /// [`Client::identify`], invoking `on_done` exactly once with the result.
    pub async fn identify_with<F>(
        &self,
        identity: Identity,
        hash: Option<String>,
        on_done: F,
    ) -> Result<FlagSet>
    where
        F: FnOnce(Result<FlagSet>) + Send,
    {
        let result = self.inner.identify(identity, hash).await;
        on_done(result.clone());
        result
    }

    /// The active identity.
    pub fn user(&self) -> Arc<Identity> {
        self.inner.current_session().identity.clone()
    }

    /// `Some(true)` keeps the live update stream open, `Some(false)` closes it, and `None` opens
    /// it only while there are `change` listeners.
    pub fn set_streaming(&self, streaming: Option<bool>) {
        self.inner.lock_stream_policy().forced = streaming;
        self.inner.update_streaming();
    }

    /// Connection state of the live update stream.
    pub fn streaming_state(&self) -> StreamState {
        self.inner.streaming.state()
    }

    /// Register `listener` for `event_name`.
    ///
    /// Events are `ready`, `initialized`, `failed`, `change`, `change:<flag key>` and `error`.
    pub fn on(
        &self,
        event_name: impl Into<String>,
        listener: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.on_listener(event_name, Arc::new(listener))
    }

    /// Register a shared listener, which can later be removed with [`Client::off_callback`].
    pub fn on_listener(
        &self,
        event_name: impl Into<String>,
        listener: Listener<ClientEvent>,
    ) -> SubscriptionHandle {
        let handle = self.inner.emitter.on_listener(event_name, listener);
        if is_change_event(handle.event_name()) {
            self.inner.recount_change_listeners();
        }
        handle
    }

    /// Remove a subscription. Returns `false` if it was already removed.
    pub fn off(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.inner.emitter.off(handle);
        if removed && is_change_event(handle.event_name()) {
            self.inner.recount_change_listeners();
        }
        removed
    }

    /// Remove every subscription of `listener` to `event_name`. Returns how many were removed.
    pub fn off_callback(&self, event_name: &str, listener: &Listener<ClientEvent>) -> usize {
        let removed = self.inner.emitter.off_listener(event_name, listener);
        if removed > 0 && is_change_event(event_name) {
            self.inner.recount_change_listeners();
        }
        removed
    }

    /// Record a custom event for the current identity.
    pub fn track(&self, key: impl Into<String>, data: Option<serde_json::Value>) {
        let session = self.inner.current_session();
        self.inner.events.enqueue(EventRecord::Custom(CustomEvent {
            creation_date: Utc::now(),
            key: key.into(),
            user: session.redacted.clone(),
            data,
        }));
    }

    /// Values of all flags for the current identity.
    pub fn all_flags(&self) -> FlagSet {
        let session = self.inner.current_session();
        let flags = session.flags.snapshot();

        if !self.inner.send_events_only_for_variation {
            for (key, descriptor) in flags.iter() {
                self.inner.events.enqueue(EventRecord::Feature(FeatureEvent {
                    creation_date: Utc::now(),
                    key: key.clone(),
                    user: session.redacted.clone(),
                    value: descriptor.value.clone(),
                    variation_index: descriptor.variation_index,
                    version: descriptor.version,
                    default: None,
                    reason: descriptor.reason.clone(),
                    default_used: false,
                }));
            }
        }

        values(&flags)
    }

    /// Hand buffered events to the transport.
    ///
    /// Delivery continues in the background. Delivery failures are emitted as `error` events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientClosed`] after [`Client::close`].
    pub async fn flush(&self) -> Result<()> {
        if self.inner.is_closed() {
            return Err(Error::ClientClosed);
        }
        self.inner.events.flush();
        Ok(())
    }

    /// [`Client::flush`], invoking `on_done` exactly once with the result.
    pub async fn flush_with<F>(&self, on_done: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send,
    {
        let result = self.flush().await;
        on_done(result.clone());
        result
    }

    /// Wait until the initial fetch has settled, successfully or not.
    pub async fn wait_until_ready(&self) {
        let mut receiver = self.inner.readiness.subscribe();
        // The sender lives as long as `self`.
        let _ = receiver.wait_for(|state| state.outcome().is_some()).await;
    }

    /// Wait until the initial fetch has settled.
    ///
    /// # Errors
    ///
    /// Returns the error the initial fetch failed with.
    pub async fn wait_for_initialization(&self) -> Result<()> {
        let mut receiver = self.inner.readiness.subscribe();
        let state = receiver
            .wait_for(|state| state.outcome().is_some())
            .await
            .map_err(|_| Error::ClientClosed)?;

        match state.outcome() {
            Some(ReadyOutcome::Initialized) => Ok(()),
            Some(ReadyOutcome::Failed(err)) => Err(err.clone()),
            None => Err(Error::ClientClosed),
        }
    }

    /// Current readiness, without waiting.
    pub fn readiness(&self) -> ReadinessState {
        self.inner.readiness.borrow().clone()
    }

    /// Stop streaming and background timers, and deliver the remaining events.
    ///
    /// The client keeps serving the flags it has, but no longer updates them or records events.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let _policy = self.inner.lock_stream_policy();
            self.inner.streaming.stop();
        }
        if let Some(task) = self.inner.lock_init_task().take() {
            task.abort();
        }
        self.inner.events.close().await;

        log::debug!(target: "flagwire", "client closed");
    }
}

fn initial_flags(config: &ClientConfig, identity: &Identity) -> FlagMap {
    match &config.bootstrap {
        None => FlagMap::new(),
        Some(Bootstrap::Flags(flags)) => Bootstrap::flags_to_map(flags),
        Some(Bootstrap::LocalStorage) => {
            let Some(persistence) = &config.persistence else {
                log::warn!(target: "flagwire", "local storage bootstrap requested without persistence");
                return FlagMap::new();
            };
            match persistence.load_snapshot(identity) {
                Ok(flags) => flags.unwrap_or_default(),
                Err(err) => {
                    log::warn!(target: "flagwire", "failed to load flag snapshot: {err}");
                    FlagMap::new()
                }
            }
        }
    }
}

fn values(flags: &FlagMap) -> FlagSet {
    flags
        .iter()
        .map(|(key, descriptor)| (key.clone(), descriptor.value.clone()))
        .collect()
}

impl ClientInner {
    fn current_session(&self) -> Arc<Session> {
        self.session
            .read()
            .expect("thread holding session lock should not panic")
            .clone()
    }

    fn lock_stream_policy(&self) -> std::sync::MutexGuard<'_, StreamPolicy> {
        self.stream_policy
            .lock()
            .expect("thread holding stream policy lock should not panic")
    }

    fn lock_init_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.init_task
            .lock()
            .expect("thread holding init task lock should not panic")
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn stream_handler(&self) -> Weak<dyn StreamHandler> {
        self.weak_self.clone()
    }

    async fn initialize(weak: Weak<ClientInner>) {
        let Some((session, transport)) = weak
            .upgrade()
            .map(|inner| (inner.current_session(), inner.transport.clone()))
        else {
            return;
        };

        let result = transport
            .fetch_flags(&session.redacted, session.hash.as_deref())
            .await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        match result {
            Ok(flags) => {
                // Dropped if an identify has committed a new session in the meantime.
                inner.apply_to_session(session.id, |store| store.replace_all(flags));
                log::debug!(target: "flagwire", "client initialized");
                inner.settle(ReadyOutcome::Initialized);
            }
            Err(err) => {
                log::warn!(target: "flagwire", "failed to fetch initial flags: {err}");
                inner.settle(ReadyOutcome::Failed(err.clone()));
                inner.emit_error(err);
            }
        }

        inner.lock_stream_policy().allowed = true;
        inner.update_streaming();
    }

    fn settle(&self, outcome: ReadyOutcome) {
        let settled = self.readiness.send_if_modified(|state| {
            if state.outcome().is_some() {
                return false;
            }
            *state = ReadinessState::Ready(outcome.clone());
            true
        });
        if !settled {
            return;
        }

        self.emitter.emit(EVENT_READY, &ClientEvent::Ready);
        match outcome {
            ReadyOutcome::Initialized => {
                self.emitter.emit(EVENT_INITIALIZED, &ClientEvent::Initialized);
            }
            ReadyOutcome::Failed(err) => {
                self.emitter.emit(EVENT_FAILED, &ClientEvent::Failed(err));
            }
        }
    }

    async fn identify(&self, identity: Identity, hash: Option<String>) -> Result<FlagSet> {
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }
        identity.validate()?;

        let seq = self.identify_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let redacted = Arc::new(identity.redact(&self.privacy));

        let result = self.transport.fetch_flags(&redacted, hash.as_deref()).await;
        if self.identify_seq.load(Ordering::SeqCst) != seq {
            log::debug!(target: "flagwire", identity = identity.key.as_str(); "identify superseded by a later call");
            return Err(Error::IdentifySuperseded);
        }
        let flags = match result {
            Ok(flags) => flags,
            Err(err) => {
                log::warn!(target: "flagwire", identity = identity.key.as_str(); "failed to fetch flags: {err}");
                self.emit_error(err.clone());
                return Err(err);
            }
        };

        let (session, changes) = {
            let _guard = self
                .session_write
                .lock()
                .expect("thread holding session write lock should not panic");
            if self.identify_seq.load(Ordering::SeqCst) != seq {
                return Err(Error::IdentifySuperseded);
            }

            let previous = self.current_session();
            let session = Arc::new(Session {
                id: self.next_session_id.fetch_add(1, Ordering::SeqCst),
                identity: Arc::new(identity),
                redacted,
                hash,
                flags: FlagStore::from_flags(flags),
            });
            let changes = diff(&previous.flags.snapshot(), &session.flags.snapshot());
            *self
                .session
                .write()
                .expect("thread holding session lock should not panic") = session.clone();
            self.persist(&session);

            (session, changes)
        };

        log::debug!(target: "flagwire", identity = session.identity.key.as_str(), changed = changes.len(); "identified");
        self.record_identify(&session);
        {
            let _policy = self.lock_stream_policy();
            self.streaming.restart(self.stream_handler());
        }
        self.emit_changes(&changes);

        Ok(values(&session.flags.snapshot()))
    }

    /// Apply an update to the flags of session `session_id`, if it is still the active one, and
    /// notify listeners.
    fn apply_to_session(&self, session_id: u64, update: impl FnOnce(&FlagStore) -> ChangeSet) {
        let changes = {
            let _guard = self
                .session_write
                .lock()
                .expect("thread holding session write lock should not panic");
            let session = self.current_session();
            if session.id != session_id {
                log::debug!(target: "flagwire", "ignoring update for a previous identity");
                return;
            }

            let changes = update(&session.flags);
            if !changes.is_empty() {
                self.persist(&session);
            }
            changes
        };

        self.emit_changes(&changes);
    }

    fn persist(&self, session: &Session) {
        if !self.save_snapshots {
            return;
        }
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(err) = persistence.save_snapshot(&session.identity, &session.flags.snapshot()) {
            log::warn!(target: "flagwire", "failed to save flag snapshot: {err}");
        }
    }

    fn emit_changes(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }

        log::trace!(target: "flagwire", changes:serde; "flags changed");
        self.emitter
            .emit(EVENT_CHANGE, &ClientEvent::Change(changes.clone()));
        for (key, change) in changes {
            self.emitter.emit(
                &flag_change_event(key),
                &ClientEvent::FlagChange {
                    key: key.clone(),
                    current: change.current.clone(),
                    previous: change.previous.clone(),
                },
            );
        }
    }

    fn emit_error(&self, error: Error) {
        let delivered = self
            .emitter
            .emit(EVENT_ERROR, &ClientEvent::Error(error.clone()));
        if delivered == 0 {
            log::error!(target: "flagwire", "{error}");
        }
    }

    fn record_identify(&self, session: &Session) {
        self.events.enqueue(EventRecord::Identify(IdentifyEvent {
            creation_date: Utc::now(),
            key: session.identity.key.clone(),
            user: session.redacted.clone(),
        }));
    }

    fn recount_change_listeners(&self) {
        let count = self.emitter.count_matching(is_change_event);
        self.lock_stream_policy().change_listeners = count;
        self.update_streaming();
    }

    fn update_streaming(&self) {
        let policy = self.lock_stream_policy();
        if !policy.allowed || self.is_closed() {
            return;
        }

        let wanted = policy.forced.unwrap_or(policy.change_listeners > 0);
        if wanted && !self.streaming.is_running() {
            self.streaming.start(self.stream_handler());
        } else if !wanted && self.streaming.is_running() {
            self.streaming.stop();
        }
    }
}

#[async_trait]
impl StreamHandler for ClientInner {
    fn connection_target(&self) -> (u64, Arc<RedactedIdentity>, Option<String>) {
        let session = self.current_session();
        (session.id, session.redacted.clone(), session.hash.clone())
    }

    async fn handle_message(&self, session_id: u64, message: StreamMessage) {
        match message {
            StreamMessage::Put(flags) => {
                self.apply_to_session(session_id, |store| store.replace_all(flags));
            }
            StreamMessage::Patch { key, descriptor } => {
                self.apply_to_session(session_id, |store| store.apply_patch(&key, descriptor));
            }
            StreamMessage::Delete { key, version } => {
                self.apply_to_session(session_id, |store| store.apply_delete(&key, version));
            }
            StreamMessage::Ping => {
                let session = self.current_session();
                if session.id != session_id {
                    return;
                }
                match self
                    .transport
                    .fetch_flags(&session.redacted, session.hash.as_deref())
                    .await
                {
                    Ok(flags) => {
                        self.apply_to_session(session_id, |store| store.replace_all(flags));
                    }
                    Err(err) => {
                        log::warn!(target: "flagwire", "failed to refetch flags: {err}");
                        self.emit_error(err);
                    }
                }
            }
        }
    }

    fn report_error(&self, error: Error) {
        self.emit_error(error);
    }
}

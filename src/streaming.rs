//! Live update connection that keeps the flag store current.
//!
//! [`StreamingUpdater`] runs a background task that opens the stream through the
//! [`Transport`], forwards every message to a [`StreamHandler`], and reconnects after a fixed
//! delay whenever the connection ends.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    transport::{StreamMessage, Transport},
    Error, RedactedIdentity,
};

/// Connection state of the [`StreamingUpdater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not running.
    Stopped,
    /// Opening the connection.
    Connecting,
    /// Receiving messages.
    Connected,
    /// The server ended the stream. A reconnect is scheduled.
    Disconnected,
    /// The connection failed. A reconnect is scheduled.
    Errored,
}

/// Where the stream connects to and where its messages go.
#[async_trait]
pub(crate) trait StreamHandler: Send + Sync {
    /// Identity to connect for, with its hash and a token identifying the session. The token is
    /// handed back with every message so messages for a replaced session can be ignored.
    fn connection_target(&self) -> (u64, Arc<RedactedIdentity>, Option<String>);

    async fn handle_message(&self, session: u64, message: StreamMessage);

    fn report_error(&self, error: Error);
}

/// Owns the optional live update connection.
pub struct StreamingUpdater {
    transport: Arc<dyn Transport>,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<StreamState>>,
    /// Incremented on every start/stop. A connection task only updates `state` while its
    /// generation is current.
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingUpdater {
    /// Default delay before reconnecting a dropped stream.
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

    pub(crate) fn new(transport: Arc<dyn Transport>, reconnect_delay: Duration) -> StreamingUpdater {
        let (state, _) = watch::channel(StreamState::Stopped);
        StreamingUpdater {
            transport,
            reconnect_delay,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Whether the connection task is running.
    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }

    /// Start the connection task. Does nothing if it is already running.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn start(&self, handler: Weak<dyn StreamHandler>) {
        let mut task = self.lock_task();
        if task.is_some() {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!(target: "flagwire", generation; "starting stream");

        let connection = Connection {
            transport: self.transport.clone(),
            reconnect_delay: self.reconnect_delay,
            state: self.state.clone(),
            generation,
            current_generation: self.generation.clone(),
            handler,
        };
        *task = Some(tokio::spawn(connection.run()));
    }

    /// Stop the connection task. Does nothing if it is not running.
    pub fn stop(&self) {
        let mut task = self.lock_task();
        let Some(handle) = task.take() else {
            return;
        };

        self.generation.fetch_add(1, Ordering::SeqCst);
        handle.abort();
        self.state.send_replace(StreamState::Stopped);
        log::debug!(target: "flagwire", "stopped stream");
    }

    /// Reconnect, for example because the identity changed. Does nothing if not running.
    pub(crate) fn restart(&self, handler: Weak<dyn StreamHandler>) {
        if self.is_running() {
            self.stop();
            self.start(handler);
        }
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task
            .lock()
            .expect("thread holding stream task lock should not panic")
    }
}

impl Drop for StreamingUpdater {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }
}

struct Connection {
    transport: Arc<dyn Transport>,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<StreamState>>,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    handler: Weak<dyn StreamHandler>,
}

impl Connection {
    fn set_state(&self, state: StreamState) {
        if self.current_generation.load(Ordering::SeqCst) == self.generation {
            self.state.send_replace(state);
        }
    }

    async fn run(self) {
        loop {
            self.set_state(StreamState::Connecting);

            let Some((session, identity, hash)) =
                self.handler.upgrade().map(|it| it.connection_target())
            else {
                // The client is gone.
                return;
            };

            let outcome = match self.transport.open_stream(&identity, hash.as_deref()).await {
                Ok(stream) => {
                    log::debug!(target: "flagwire", "stream connected");
                    self.set_state(StreamState::Connected);
                    match self.consume(session, stream).await {
                        Some(outcome) => outcome,
                        None => return,
                    }
                }
                Err(err) => {
                    log::warn!(target: "flagwire", "failed to open stream: {err:?}");
                    self.report(err);
                    StreamState::Errored
                }
            };
            self.set_state(outcome);

            log::debug!(target: "flagwire", delay_ms = self.reconnect_delay.as_millis() as u64; "reconnecting stream after delay");
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Process messages until the connection ends. Returns `None` if the client is gone.
    async fn consume(&self, session: u64, mut stream: crate::transport::MessageStream) -> Option<StreamState> {
        while let Some(item) = stream.next().await {
            let handler = self.handler.upgrade()?;
            match item {
                Ok(message) => handler.handle_message(session, message).await,
                Err(err @ Error::StreamParse(_)) => {
                    log::warn!(target: "flagwire", "received malformed stream message: {err:?}");
                    handler.report_error(err);
                }
                Err(err) => {
                    log::warn!(target: "flagwire", "stream connection failed: {err:?}");
                    handler.report_error(err);
                    return Some(StreamState::Errored);
                }
            }
        }

        log::debug!(target: "flagwire", "stream disconnected");
        Some(StreamState::Disconnected)
    }

    fn report(&self, error: Error) {
        if let Some(handler) = self.handler.upgrade() {
            handler.report_error(error);
        }
    }
}

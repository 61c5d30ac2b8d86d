//! Scripted transport for tests.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt};
use tokio::{sync::oneshot, time::Instant};

use crate::{
    events::EventRecord,
    transport::{MessageStream, StreamMessage, Transport},
    Error, FlagDescriptor, FlagMap, FlagValue, RedactedIdentity, Result,
};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Let spawned tasks run until they block.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub(crate) fn flag_map(entries: &[(&str, FlagValue)]) -> FlagMap {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_owned(), Arc::new(FlagDescriptor::new(value.clone()))))
        .collect()
}

#[derive(Default)]
pub(crate) struct MockTransport {
    /// Flags returned for each identity key. Unknown keys get an empty map.
    flags: Mutex<HashMap<String, FlagMap>>,
    /// Fetches for these identity keys wait until the sender is used or dropped.
    holds: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    fail_fetches: AtomicBool,
    fail_posts: AtomicBool,
    fail_streams: AtomicBool,
    fetches: Mutex<Vec<String>>,
    stream_opens: Mutex<Vec<(String, Instant)>>,
    stream_senders: Mutex<Vec<mpsc::UnboundedSender<Result<StreamMessage>>>>,
    posted: Mutex<Vec<Vec<EventRecord>>>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    pub fn set_flags(&self, identity_key: &str, flags: FlagMap) {
        self.flags
            .lock()
            .unwrap()
            .insert(identity_key.to_owned(), flags);
    }

    /// Make the next fetch for `identity_key` wait until the returned sender fires.
    pub fn hold(&self, identity_key: &str) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        self.holds
            .lock()
            .unwrap()
            .insert(identity_key.to_owned(), receiver);
        sender
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_streams(&self, fail: bool) {
        self.fail_streams.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn stream_opens(&self) -> Vec<(String, Instant)> {
        self.stream_opens.lock().unwrap().clone()
    }

    /// Push a message into the most recently opened stream.
    pub fn send(&self, message: Result<StreamMessage>) {
        let senders = self.stream_senders.lock().unwrap();
        let sender = senders.last().expect("no stream has been opened");
        sender
            .unbounded_send(message)
            .expect("stream receiver should be alive");
    }

    /// End the most recently opened stream, as if the server closed the connection.
    pub fn disconnect(&self) {
        if let Some(sender) = self.stream_senders.lock().unwrap().last() {
            sender.close_channel();
        }
    }

    pub fn posted_batches(&self) -> Vec<Vec<EventRecord>> {
        self.posted.lock().unwrap().clone()
    }

    pub fn posted_events(&self) -> Vec<EventRecord> {
        self.posted.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_flags(&self, identity: &RedactedIdentity, _hash: Option<&str>) -> Result<FlagMap> {
        self.fetches.lock().unwrap().push(identity.key.clone());

        let hold = self.holds.lock().unwrap().remove(&identity.key);
        if let Some(hold) = hold {
            let _ = hold.await;
        }

        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(Error::UnexpectedStatus(503));
        }

        Ok(self
            .flags
            .lock()
            .unwrap()
            .get(&identity.key)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_stream(
        &self,
        identity: &RedactedIdentity,
        _hash: Option<&str>,
    ) -> Result<MessageStream> {
        self.stream_opens
            .lock()
            .unwrap()
            .push((identity.key.clone(), Instant::now()));

        if self.fail_streams.load(Ordering::SeqCst) {
            return Err(Error::Stream("connection refused".to_owned()));
        }

        let (sender, receiver) = mpsc::unbounded();
        self.stream_senders.lock().unwrap().push(sender);
        Ok(receiver.boxed())
    }

    async fn post_events(&self, events: Vec<EventRecord>) -> Result<()> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(Error::UnexpectedStatus(500));
        }
        self.posted.lock().unwrap().push(events);
        Ok(())
    }
}

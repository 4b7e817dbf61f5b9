//! Sample channel shared by the execution and plot workers of one run.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One row of reporter output: field names with their values, in report order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    fields: Vec<(String, f64)>,
}

impl Sample {
    pub fn new(fields: Vec<(String, f64)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| *value)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl FromIterator<(String, f64)> for Sample {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

// Serialized as a JSON object whose keys keep report order.
impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Items carried by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Sample(Sample),
    /// The producer is finished; nothing follows.
    EndOfStream,
}

/// Outcome of a single timed receive.
#[derive(Debug, PartialEq)]
pub enum Poll {
    Message(Message),
    Idle,
    Disconnected,
}

/// Create the sender/receiver pair for one run.
pub fn sample_channel() -> (SampleSender, SampleReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (SampleSender { tx }, SampleReceiver { rx })
}

/// Producer half. Sends never block; a vanished consumer is not an error
/// for the producer, it just means nobody is plotting any more.
#[derive(Debug, Clone)]
pub struct SampleSender {
    tx: Sender<Message>,
}

impl SampleSender {
    pub fn send_sample(&self, sample: Sample) -> bool {
        self.tx.send(Message::Sample(sample)).is_ok()
    }

    pub fn send_end(&self) -> bool {
        self.tx.send(Message::EndOfStream).is_ok()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct SampleReceiver {
    rx: Receiver<Message>,
}

impl SampleReceiver {
    /// Wait up to `timeout` for the next item.
    pub fn poll(&self, timeout: Duration) -> Poll {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Poll::Message(message),
            Err(RecvTimeoutError::Timeout) => Poll::Idle,
            Err(RecvTimeoutError::Disconnected) => Poll::Disconnected,
        }
    }

    #[cfg(test)]
    pub fn try_iter(&self) -> impl Iterator<Item = Message> + '_ {
        self.rx.try_iter()
    }
}

/// Cooperative stop request visible to both workers of a run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_one();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` has been called, even if it was called before
    /// this future was created.
    pub async fn notified(&self) {
        if self.is_stopped() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

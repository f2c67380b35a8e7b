use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace};
use zenoh::Result;

use crate::common::DataHandler;
use crate::msg::ZMessage;
use crate::node::{MessageEvent, Node, Publication, RawSample, Subscription};

/// Typed publisher over a node [`Publication`].
pub struct ZPub<T: ZMessage> {
    inner: Box<dyn Publication>,
    _phantom_data: PhantomData<fn(&T)>,
}

impl<T: ZMessage> ZPub<T> {
    pub fn new(node: &dyn Node, topic: &str) -> Result<Self> {
        let inner = node.advertise(topic)?;
        Ok(Self {
            inner,
            _phantom_data: PhantomData,
        })
    }

    #[tracing::instrument(name = "publish", skip(self, msg), fields(
        topic = %self.inner.topic(),
        payload_len = tracing::field::Empty
    ))]
    pub fn publish(&self, msg: &T) -> Result<()> {
        let payload = ZMessage::serialize(msg)?;
        tracing::Span::current().record("payload_len", payload.len());
        trace!("[PUB] Publishing message");
        self.inner.publish(payload)
    }

    pub fn num_subscribers(&self) -> usize {
        self.inner.num_subscribers()
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }
}

/// Typed subscriber over a node [`Subscription`].
///
/// Built either with a callback, which runs on the node's spinner, or with a
/// queue drained by [`ZSub::recv_timeout`].
pub struct ZSub<T: ZMessage> {
    inner: Box<dyn Subscription>,
    queue: Option<flume::Receiver<RawSample>>,
    _phantom_data: PhantomData<fn() -> T>,
}

impl<T> ZSub<T>
where
    T: ZMessage + Send + 'static,
{
    pub fn with_callback<F>(node: &dyn Node, topic: &str, callback: F) -> Result<Self>
    where
        F: Fn(T, &MessageEvent) + Send + Sync + 'static,
    {
        let handler = Arc::new(move |sample: RawSample| match T::deserialize(&sample.payload) {
            Ok(msg) => callback(msg, &sample.event),
            Err(e) => error!("[SUB] Failed to deserialize message: {}", e),
        });
        let inner = node.subscribe(topic, DataHandler::Callback(handler))?;
        debug!("[SUB] Callback subscriber on {}", inner.topic());
        Ok(Self {
            inner,
            queue: None,
            _phantom_data: PhantomData,
        })
    }

    pub fn with_queue(node: &dyn Node, topic: &str) -> Result<Self> {
        let (tx, rx) = flume::unbounded();
        let inner = node.subscribe(topic, DataHandler::Queue(tx))?;
        debug!("[SUB] Queued subscriber on {}", inner.topic());
        Ok(Self {
            inner,
            queue: Some(rx),
            _phantom_data: PhantomData,
        })
    }

    fn queue(&self) -> Result<&flume::Receiver<RawSample>> {
        self.queue
            .as_ref()
            .ok_or_else(|| {
                zenoh::Error::from("Subscriber was built with callback, no queue available")
            })
    }

    /// Receive and deserialize the next message with timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Result<(T, MessageEvent)> {
        let sample = self
            .queue()?
            .recv_timeout(timeout)
            .map_err(|_| zenoh::Error::from("Receive timed out"))?;
        let msg = T::deserialize(&sample.payload)?;
        Ok((msg, sample.event))
    }

    pub fn try_recv(&self) -> Option<Result<T>> {
        let sample = self.queue.as_ref()?.try_recv().ok()?;
        Some(T::deserialize(&sample.payload))
    }

    pub fn num_publishers(&self) -> usize {
        self.inner.num_publishers()
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }
}

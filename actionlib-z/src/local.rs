//! In-process transport.
//!
//! A [`LocalBus`] is a topic registry shared by every [`LocalNode`] created
//! from it. Publishing hands a copy of the payload to the spinner of each
//! subscribed node, so delivery keeps the same threading model as the zenoh
//! transport while matching counts stay exact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, trace};
use zenoh::Result;

use crate::common::DataHandler;
use crate::context::GlobalCounter;
use crate::names;
use crate::node::{MessageEvent, Node, NodeHandle, Publication, RawSample, Subscription};
use crate::spinner::{Spinner, SpinnerHandle};
use crate::time::Time;

struct LocalSubscriber {
    spinner: SpinnerHandle,
    handler: DataHandler<RawSample>,
}

#[derive(Default)]
struct TopicEntry {
    publishers: usize,
    subscribers: HashMap<usize, LocalSubscriber>,
}

#[derive(Default)]
struct BusInner {
    topics: RwLock<HashMap<String, TopicEntry>>,
    counter: GlobalCounter,
}

impl BusInner {
    fn deliver(&self, topic: &str, payload: &[u8], publisher_name: &str) {
        let topics = self.topics.read();
        let Some(entry) = topics.get(topic) else {
            return;
        };
        for (id, sub) in entry.subscribers.iter() {
            let handler = sub.handler.clone();
            let raw = RawSample {
                payload: payload.to_vec(),
                event: MessageEvent {
                    publisher_name: publisher_name.to_string(),
                    receipt_time: Time::now(),
                },
            };
            if !sub.spinner.dispatch(Box::new(move || handler.handle(raw))) {
                trace!("[SUB] Subscriber {} on {} has stopped spinning", id, topic);
            }
        }
    }
}

/// Shared in-process topic registry.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(&self, name: &str) -> Result<NodeHandle> {
        self.create_node_with_namespace(name, "")
    }

    pub fn create_node_with_namespace(&self, name: &str, namespace: &str) -> Result<NodeHandle> {
        names::validate_node_name(name).map_err(|e| zenoh::Error::from(e.to_string()))?;
        names::validate_namespace(namespace).map_err(|e| zenoh::Error::from(e.to_string()))?;
        let fq_name = names::fully_qualified_node_name(namespace, name);
        let spinner = Spinner::new(&fq_name)?;
        info!("Local node ready: {}", fq_name);
        Ok(Arc::new(LocalNode {
            name: name.to_string(),
            namespace: namespace.to_string(),
            fq_name,
            bus: self.inner.clone(),
            spinner,
            ok: AtomicBool::new(true),
        }))
    }
}

pub struct LocalNode {
    name: String,
    namespace: String,
    fq_name: String,
    bus: Arc<BusInner>,
    spinner: Spinner,
    ok: AtomicBool,
}

impl LocalNode {
    fn qualify(&self, topic: &str) -> Result<String> {
        names::qualify_topic_name(topic, &self.namespace, &self.name)
            .map_err(|e| zenoh::Error::from(format!("Failed to qualify topic: {}", e)))
    }
}

impl Node for LocalNode {
    fn name(&self) -> &str {
        &self.fq_name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn is_ok(&self) -> bool {
        self.ok.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.ok.swap(false, Ordering::AcqRel) {
            debug!("Shutting down local node {}", self.fq_name);
            self.spinner.stop();
        }
    }

    fn advertise(&self, topic: &str) -> Result<Box<dyn Publication>> {
        let topic = self.qualify(topic)?;
        self.bus
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .publishers += 1;
        debug!("[PUB] Local publisher ready: topic={}", topic);
        Ok(Box::new(LocalPublication {
            topic,
            publisher_name: self.fq_name.clone(),
            bus: Arc::downgrade(&self.bus),
        }))
    }

    fn subscribe(
        &self,
        topic: &str,
        handler: DataHandler<RawSample>,
    ) -> Result<Box<dyn Subscription>> {
        let topic = self.qualify(topic)?;
        let id = self.bus.counter.increment();
        self.bus
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .subscribers
            .insert(
                id,
                LocalSubscriber {
                    spinner: self.spinner.handle(),
                    handler,
                },
            );
        debug!("[SUB] Local subscriber ready: topic={}", topic);
        Ok(Box::new(LocalSubscription {
            id,
            topic,
            bus: Arc::downgrade(&self.bus),
        }))
    }
}

struct LocalPublication {
    topic: String,
    publisher_name: String,
    bus: Weak<BusInner>,
}

impl Publication for LocalPublication {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, payload: Vec<u8>) -> Result<()> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| zenoh::Error::from("Local bus has been dropped"))?;
        bus.deliver(&self.topic, &payload, &self.publisher_name);
        Ok(())
    }

    fn num_subscribers(&self) -> usize {
        self.bus.upgrade().map_or(0, |bus| {
            bus.topics
                .read()
                .get(&self.topic)
                .map_or(0, |entry| entry.subscribers.len())
        })
    }
}

impl Drop for LocalPublication {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade()
            && let Some(entry) = bus.topics.write().get_mut(&self.topic)
        {
            entry.publishers = entry.publishers.saturating_sub(1);
        }
    }
}

struct LocalSubscription {
    id: usize,
    topic: String,
    bus: Weak<BusInner>,
}

impl Subscription for LocalSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn num_publishers(&self) -> usize {
        self.bus.upgrade().map_or(0, |bus| {
            bus.topics
                .read()
                .get(&self.topic)
                .map_or(0, |entry| entry.publishers)
        })
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade()
            && let Some(entry) = bus.topics.write().get_mut(&self.topic)
        {
            entry.subscribers.remove(&self.id);
        }
    }
}

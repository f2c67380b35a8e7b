//! The transport capability consumed by the action layer.
//!
//! Anything that can advertise and subscribe raw payloads on named topics
//! can host actions. [`ZNode`] is backed by a zenoh session; the in-process
//! [`LocalNode`](crate::local::LocalNode) is used by tests and demos.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};
use zenoh::liveliness::LivelinessToken;
use zenoh::{Result, Session, Wait};

use crate::common::DataHandler;
use crate::context::GlobalCounter;
use crate::entity::{EndpointEntity, EntityKind, NodeEntity};
use crate::graph::Graph;
use crate::names;
use crate::spinner::{Spinner, SpinnerHandle};
use crate::time::Time;
use crate::Builder;

/// Metadata delivered alongside every inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEvent {
    /// Fully qualified name of the publishing node.
    pub publisher_name: String,
    pub receipt_time: Time,
}

/// A serialized message as handed over by the transport.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub payload: Vec<u8>,
    pub event: MessageEvent,
}

pub trait Publication: Send + Sync {
    fn topic(&self) -> &str;
    fn publish(&self, payload: Vec<u8>) -> Result<()>;
    fn num_subscribers(&self) -> usize;
}

pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;
    fn num_publishers(&self) -> usize;
}

pub trait Node: Send + Sync {
    /// Fully qualified node name, e.g. `/robot/fib_server`.
    fn name(&self) -> &str;
    fn namespace(&self) -> &str;
    fn is_ok(&self) -> bool;
    fn shutdown(&self);
    fn advertise(&self, topic: &str) -> Result<Box<dyn Publication>>;
    /// Delivers every sample on `topic` to `handler`, on this node's spinner.
    fn subscribe(&self, topic: &str, handler: DataHandler<RawSample>)
    -> Result<Box<dyn Subscription>>;
}

pub type NodeHandle = Arc<dyn Node>;

pub struct ZNode {
    pub entity: NodeEntity,
    fq_name: String,
    session: Arc<Session>,
    counter: Arc<GlobalCounter>,
    graph: Arc<Graph>,
    spinner: Spinner,
    ok: AtomicBool,
    _lv_token: LivelinessToken,
}

pub struct ZNodeBuilder {
    pub domain_id: usize,
    pub name: String,
    pub namespace: String,
    pub session: Arc<Session>,
    pub counter: Arc<GlobalCounter>,
    pub graph: Arc<Graph>,
}

impl ZNodeBuilder {
    pub fn with_namespace<S: AsRef<str>>(mut self, namespace: S) -> Self {
        self.namespace = namespace.as_ref().to_owned();
        self
    }
}

impl Builder for ZNodeBuilder {
    type Output = NodeHandle;

    #[tracing::instrument(
        name = "node_build",
        skip(self),
        fields(name = %self.name, namespace = %self.namespace)
    )]
    fn build(self) -> Result<NodeHandle> {
        names::validate_node_name(&self.name).map_err(|e| zenoh::Error::from(e.to_string()))?;
        names::validate_namespace(&self.namespace)
            .map_err(|e| zenoh::Error::from(e.to_string()))?;
        let id = self.counter.increment();
        let entity = NodeEntity::new(
            self.domain_id,
            self.session.zid(),
            id,
            self.name,
            self.namespace,
        );
        let lv_token = self
            .session
            .liveliness()
            .declare_token(entity.lv_token_key_expr()?)
            .wait()?;
        let fq_name = names::fully_qualified_node_name(&entity.namespace, &entity.name);
        let spinner = Spinner::new(&fq_name)?;
        info!("Node ready: {}", fq_name);
        Ok(Arc::new(ZNode {
            entity,
            fq_name,
            session: self.session,
            counter: self.counter,
            graph: self.graph,
            spinner,
            ok: AtomicBool::new(true),
            _lv_token: lv_token,
        }))
    }
}

impl ZNode {
    fn endpoint(&self, topic: &str, kind: EntityKind) -> Result<EndpointEntity> {
        let topic = names::qualify_topic_name(topic, &self.entity.namespace, &self.entity.name)
            .map_err(|e| zenoh::Error::from(format!("Failed to qualify topic: {}", e)))?;
        Ok(EndpointEntity {
            id: self.counter.increment(),
            node: self.entity.clone(),
            kind,
            topic,
        })
    }
}

impl Node for ZNode {
    fn name(&self) -> &str {
        &self.fq_name
    }

    fn namespace(&self) -> &str {
        &self.entity.namespace
    }

    fn is_ok(&self) -> bool {
        self.ok.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.ok.swap(false, Ordering::AcqRel) {
            debug!("Shutting down node {}", self.fq_name);
            self.spinner.stop();
        }
    }

    #[tracing::instrument(name = "advertise", skip(self), fields(node = %self.fq_name))]
    fn advertise(&self, topic: &str) -> Result<Box<dyn Publication>> {
        let entity = self.endpoint(topic, EntityKind::Publisher)?;
        let key_expr = entity.topic_key_expr()?;
        debug!("[PUB] Key expression: {}", key_expr);
        let inner = self
            .session
            .declare_publisher(key_expr)
            .congestion_control(zenoh::qos::CongestionControl::Block)
            .wait()?;
        let lv_token = self
            .session
            .liveliness()
            .declare_token(entity.lv_token_key_expr()?)
            .wait()?;
        info!("[PUB] Publisher ready: topic={}", entity.topic);
        Ok(Box::new(ZPublication {
            attachment: self.fq_name.clone().into_bytes(),
            entity,
            inner,
            graph: self.graph.clone(),
            _lv_token: lv_token,
        }))
    }

    #[tracing::instrument(name = "subscribe", skip(self, handler), fields(node = %self.fq_name))]
    fn subscribe(
        &self,
        topic: &str,
        handler: DataHandler<RawSample>,
    ) -> Result<Box<dyn Subscription>> {
        let entity = self.endpoint(topic, EntityKind::Subscription)?;
        let key_expr = entity.topic_key_expr()?;
        debug!("[SUB] Key expression: {}", key_expr);
        let spinner: SpinnerHandle = self.spinner.handle();
        let inner = self
            .session
            .declare_subscriber(key_expr)
            .callback(move |sample| {
                let publisher_name = sample
                    .attachment()
                    .map(|a| String::from_utf8_lossy(&a.to_bytes()).into_owned())
                    .unwrap_or_default();
                let raw = RawSample {
                    payload: sample.payload().to_bytes().into_owned(),
                    event: MessageEvent {
                        publisher_name,
                        receipt_time: Time::now(),
                    },
                };
                let handler = handler.clone();
                if !spinner.dispatch(Box::new(move || handler.handle(raw))) {
                    tracing::trace!("[SUB] Spinner stopped, dropping sample");
                }
            })
            .wait()?;
        let lv_token = self
            .session
            .liveliness()
            .declare_token(entity.lv_token_key_expr()?)
            .wait()?;
        info!("[SUB] Subscriber ready: topic={}", entity.topic);
        Ok(Box::new(ZSubscription {
            entity,
            graph: self.graph.clone(),
            _inner: inner,
            _lv_token: lv_token,
        }))
    }
}

struct ZPublication {
    entity: EndpointEntity,
    attachment: Vec<u8>,
    inner: zenoh::pubsub::Publisher<'static>,
    graph: Arc<Graph>,
    _lv_token: LivelinessToken,
}

impl Publication for ZPublication {
    fn topic(&self) -> &str {
        &self.entity.topic
    }

    fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.inner
            .put(payload)
            .attachment(self.attachment.clone())
            .wait()
    }

    fn num_subscribers(&self) -> usize {
        self.graph.count(EntityKind::Subscription, &self.entity.topic)
    }
}

struct ZSubscription {
    entity: EndpointEntity,
    graph: Arc<Graph>,
    _inner: zenoh::pubsub::Subscriber<()>,
    _lv_token: LivelinessToken,
}

impl Subscription for ZSubscription {
    fn topic(&self) -> &str {
        &self.entity.topic
    }

    fn num_publishers(&self) -> usize {
        self.graph.count(EntityKind::Publisher, &self.entity.topic)
    }
}

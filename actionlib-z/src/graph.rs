use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use zenoh::{Result, Session, Wait, pubsub::Subscriber, sample::SampleKind, session::ZenohId};

use crate::entity::{ADMIN_SPACE, Entity, EntityKind};

/// Live entities keyed by their liveliness token.
#[derive(Default, Debug)]
pub struct GraphData {
    entities: HashMap<String, Entity>,
}

impl GraphData {
    fn insert(&mut self, key: &str) {
        match Entity::try_from(key) {
            Ok(entity) => {
                self.entities.insert(key.to_string(), entity);
            }
            Err(e) => warn!("Ignoring unparsable liveliness token {}: {:?}", key, e),
        }
    }

    fn remove(&mut self, key: &str) {
        // Duplicate removals happen when a token is undeclared during a reconnect
        self.entities.remove(key);
    }

    fn count(&self, kind: EntityKind, topic: &str) -> usize {
        self.entities
            .values()
            .filter(|ent| match ent {
                Entity::Endpoint(x) => x.kind == kind && x.topic == topic,
                Entity::Node(_) => false,
            })
            .count()
    }
}

/// Session-wide view of the endpoints announced through liveliness.
pub struct Graph {
    pub data: Arc<Mutex<GraphData>>,
    pub zid: ZenohId,
    _subscriber: Subscriber<()>,
}

impl Graph {
    pub fn new(session: &Session, domain_id: usize) -> Result<Self> {
        let zid = session.zid();
        let data = Arc::new(Mutex::new(GraphData::default()));
        let c_data = data.clone();
        let sub = session
            .liveliness()
            .declare_subscriber(format!("{ADMIN_SPACE}/{domain_id}/**"))
            .history(true)
            .callback(move |sample| {
                let key = sample.key_expr().as_str();
                let mut guard = c_data.lock();
                match sample.kind() {
                    SampleKind::Put => guard.insert(key),
                    SampleKind::Delete => guard.remove(key),
                }
            })
            .wait()?;
        debug!("Graph tracking liveliness for domain {}", domain_id);
        Ok(Self {
            data,
            zid,
            _subscriber: sub,
        })
    }

    pub fn count(&self, kind: EntityKind, topic: impl AsRef<str>) -> usize {
        self.data.lock().count(kind, topic.as_ref())
    }
}

use std::fmt::Display;

use zenoh::{Result, key_expr::KeyExpr, session::ZenohId};

const EMPTY_NAMESPACE: &str = "%";
pub const ADMIN_SPACE: &str = "@actionlib_z";

#[derive(Default, Debug, Hash, strum::EnumString, strum::Display, Eq, PartialEq, Clone, Copy)]
pub enum EntityKind {
    #[default]
    #[strum(serialize = "NN")]
    Node,
    #[strum(serialize = "MP")]
    Publisher,
    #[strum(serialize = "MS")]
    Subscription,
}

#[derive(Default, Debug, Hash, Clone, PartialEq, Eq)]
pub struct NodeEntity {
    pub domain_id: usize,
    pub z_id: ZenohId,
    pub id: usize,
    pub name: String,
    pub namespace: String,
}

fn mangle_name(name: &str) -> String {
    name.replace('/', "%")
}

fn demangle_name(name: &str) -> String {
    name.replace('%', "/")
}

impl NodeEntity {
    pub fn new(
        domain_id: usize,
        z_id: ZenohId,
        id: usize,
        name: String,
        namespace: String,
    ) -> Self {
        Self {
            domain_id,
            z_id,
            id,
            name,
            namespace,
        }
    }

    // <ADMIN_SPACE>/<domain_id>/<zid>/<nid>/<nid>/NN/<namespace>/<node_name>
    pub fn lv_token_key_expr(&self) -> Result<KeyExpr<'static>> {
        let Self {
            domain_id,
            z_id,
            id,
            name,
            namespace,
        } = self;
        let namespace = if namespace.is_empty() || namespace == "/" {
            EMPTY_NAMESPACE.to_string()
        } else {
            mangle_name(namespace)
        };
        let kind = EntityKind::Node;
        Ok(
            format!("{ADMIN_SPACE}/{domain_id}/{z_id}/{id}/{id}/{kind}/{namespace}/{name}")
                .try_into()?,
        )
    }
}

pub type Topic = String;

#[derive(Default, Debug, Hash, PartialEq, Eq, Clone)]
pub struct EndpointEntity {
    pub id: usize,
    pub node: NodeEntity,
    pub kind: EntityKind,
    pub topic: Topic,
}

impl EndpointEntity {
    // <ADMIN_SPACE>/<domain_id>/<zid>/<nid>/<eid>/<entity_kind>/<topic_name>
    pub fn lv_token_key_expr(&self) -> Result<KeyExpr<'static>> {
        Ok(self.to_string().try_into()?)
    }

    // <domain_id>/<topic_name>
    pub fn topic_key_expr(&self) -> Result<KeyExpr<'static>> {
        let topic = self.topic.strip_prefix('/').unwrap_or(&self.topic);
        let topic = topic.strip_suffix('/').unwrap_or(topic);
        Ok(format!("{}/{}", self.node.domain_id, topic).try_into()?)
    }
}

impl Display for EndpointEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let NodeEntity {
            domain_id,
            z_id,
            id: node_id,
            ..
        } = &self.node;
        write!(
            f,
            "{ADMIN_SPACE}/{domain_id}/{z_id}/{node_id}/{}/{}/{}",
            self.id,
            self.kind,
            mangle_name(&self.topic)
        )
    }
}

#[derive(Debug, Hash, PartialEq, Eq)]
pub enum Entity {
    Node(NodeEntity),
    Endpoint(EndpointEntity),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Endpoint(x) => x.kind,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EntityConversionError {
    MissingAdminSpace,
    MissingDomainId,
    MissingZId,
    MissingNodeId,
    MissingEntityId,
    MissingEntityKind,
    MissingNamespace,
    MissingNodeName,
    MissingTopicName,
    ParsingError,
}

impl TryFrom<&str> for Entity {
    type Error = EntityConversionError;

    // - <ADMIN_SPACE>/<domain_id>/<zid>/<nid>/<eid>/<entity_kind>/<topic_name>
    // - <ADMIN_SPACE>/<domain_id>/<zid>/<nid>/<nid>/NN/<namespace>/<node_name>
    fn try_from(value: &str) -> std::result::Result<Entity, Self::Error> {
        use EntityConversionError::*;
        let mut iter = value.split('/');
        if iter.next().ok_or(MissingAdminSpace)? != ADMIN_SPACE {
            return Err(MissingAdminSpace);
        }
        let domain_id = iter
            .next()
            .ok_or(MissingDomainId)?
            .parse()
            .map_err(|_| ParsingError)?;
        let z_id = iter
            .next()
            .ok_or(MissingZId)?
            .parse()
            .map_err(|_| ParsingError)?;
        let node_id = iter
            .next()
            .ok_or(MissingNodeId)?
            .parse()
            .map_err(|_| ParsingError)?;
        let entity_id = iter
            .next()
            .ok_or(MissingEntityId)?
            .parse()
            .map_err(|_| ParsingError)?;
        let kind: EntityKind = iter
            .next()
            .ok_or(MissingEntityKind)?
            .parse()
            .map_err(|_| ParsingError)?;

        let mut node = NodeEntity {
            domain_id,
            z_id,
            id: node_id,
            ..Default::default()
        };
        Ok(match kind {
            EntityKind::Node => {
                node.namespace = match iter.next().ok_or(MissingNamespace)? {
                    EMPTY_NAMESPACE => String::new(),
                    x => demangle_name(x),
                };
                node.name = iter.next().ok_or(MissingNodeName)?.to_string();
                Entity::Node(node)
            }
            _ => Entity::Endpoint(EndpointEntity {
                id: entity_id,
                node,
                kind,
                topic: demangle_name(iter.next().ok_or(MissingTopicName)?),
            }),
        })
    }
}

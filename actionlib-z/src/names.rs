// Graph name validation and qualification

/// Suffixes of the five topics that carry one action.
pub const GOAL: &str = "goal";
pub const CANCEL: &str = "cancel";
pub const STATUS: &str = "status";
pub const FEEDBACK: &str = "feedback";
pub const RESULT: &str = "result";

/// Errors that can occur during topic name qualification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicNameError {
    /// Topic name is empty
    Empty,
    /// Topic name ends with a forward slash
    EndsWithSlash,
    /// Topic name contains invalid characters
    InvalidCharacters(String),
    /// Namespace is invalid
    InvalidNamespace(String),
    /// Node name is invalid
    InvalidNodeName(String),
}

impl std::fmt::Display for TopicNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Topic name is empty"),
            Self::EndsWithSlash => write!(f, "Topic name ends with forward slash"),
            Self::InvalidCharacters(s) => {
                write!(f, "Topic name contains invalid characters: {}", s)
            }
            Self::InvalidNamespace(s) => write!(f, "Invalid namespace: {}", s),
            Self::InvalidNodeName(s) => write!(f, "Invalid node name: {}", s),
        }
    }
}

impl std::error::Error for TopicNameError {}

/// A component starts with a letter or underscore, followed by alphanumerics or underscores.
fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return false,
    }
    bytes[1..]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'_')
}

fn validate_components(name: &str, what: &str) -> Result<(), TopicNameError> {
    for part in name.split('/') {
        if !part.is_empty() && !is_valid_component(part) {
            return Err(TopicNameError::InvalidCharacters(format!(
                "invalid component '{}'{}",
                part, what
            )));
        }
    }
    Ok(())
}

pub fn validate_namespace(namespace: &str) -> Result<(), TopicNameError> {
    if namespace.is_empty() || namespace == "/" {
        return Ok(());
    }
    if namespace.ends_with('/') {
        return Err(TopicNameError::InvalidNamespace(
            "namespace cannot end with '/'".to_string(),
        ));
    }
    for part in namespace.split('/').filter(|p| !p.is_empty()) {
        if !is_valid_component(part) {
            return Err(TopicNameError::InvalidNamespace(format!(
                "invalid component '{}'",
                part
            )));
        }
    }
    Ok(())
}

pub fn validate_node_name(node_name: &str) -> Result<(), TopicNameError> {
    if node_name.is_empty() {
        return Err(TopicNameError::InvalidNodeName(
            "node name is empty".to_string(),
        ));
    }
    if !is_valid_component(node_name) {
        return Err(TopicNameError::InvalidNodeName(format!(
            "invalid node name '{}'",
            node_name
        )));
    }
    Ok(())
}

fn normalize_namespace(namespace: &str) -> &str {
    if namespace.is_empty() || namespace == "/" {
        ""
    } else {
        namespace
    }
}

/// `/<namespace>/<name>`, or `/<name>` in the root namespace.
pub fn fully_qualified_node_name(namespace: &str, node_name: &str) -> String {
    let namespace = normalize_namespace(namespace);
    if namespace.is_empty() {
        format!("/{}", node_name)
    } else if namespace.starts_with('/') {
        format!("{}/{}", namespace, node_name)
    } else {
        format!("/{}/{}", namespace, node_name)
    }
}

/// Qualify a topic name against a node's namespace and name.
///
/// - Absolute topics (starting with '/') are kept, minus a trailing slash
/// - Private topics (starting with '~') expand to `/<namespace>/<node_name>/<topic>`
/// - Relative topics expand to `/<namespace>/<topic>`
///
/// ```
/// use actionlib_z::names::qualify_topic_name;
///
/// assert_eq!(qualify_topic_name("/fibonacci", "/ns", "node").unwrap(), "/fibonacci");
/// assert_eq!(qualify_topic_name("fibonacci/goal", "/ns", "node").unwrap(), "/ns/fibonacci/goal");
/// assert_eq!(qualify_topic_name("~status", "/ns", "node").unwrap(), "/ns/node/status");
/// ```
pub fn qualify_topic_name(
    topic: &str,
    namespace: &str,
    node_name: &str,
) -> Result<String, TopicNameError> {
    if topic.is_empty() {
        return Err(TopicNameError::Empty);
    }
    validate_namespace(namespace)?;
    validate_node_name(node_name)?;

    let namespace = match normalize_namespace(namespace) {
        "" => String::new(),
        ns if ns.starts_with('/') => ns.to_string(),
        ns => format!("/{}", ns),
    };

    if let Some(rest) = topic.strip_prefix('/') {
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Err(TopicNameError::InvalidCharacters(
                "topic cannot be just '/'".to_string(),
            ));
        }
        validate_components(rest, "")?;
        return Ok(format!("/{}", rest));
    }

    if let Some(suffix) = topic.strip_prefix('~') {
        let suffix = suffix.strip_prefix('/').unwrap_or(suffix);
        validate_components(suffix, " in private topic")?;
        return Ok(if suffix.is_empty() {
            format!("{}/{}", namespace, node_name)
        } else {
            format!("{}/{}/{}", namespace, node_name, suffix)
        });
    }

    let topic = topic.strip_suffix('/').unwrap_or(topic);
    validate_components(topic, "")?;
    Ok(format!("{}/{}", namespace, topic))
}

/// Joins an action name with one of the five topic suffixes.
pub fn action_topic(action: &str, suffix: &str) -> Result<String, TopicNameError> {
    if action.is_empty() {
        return Err(TopicNameError::Empty);
    }
    if action.len() > 1 && action.ends_with('/') {
        return Err(TopicNameError::EndsWithSlash);
    }
    Ok(format!("{}/{}", action.trim_end_matches('/'), suffix))
}

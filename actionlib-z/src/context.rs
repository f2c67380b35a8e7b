use std::path::PathBuf;
use std::sync::{Arc, atomic::AtomicUsize};

use serde_json::json;
use zenoh::{Result, Session, Wait};

use crate::{Builder, graph::Graph, node::ZNodeBuilder};

#[derive(Debug, Default)]
pub struct GlobalCounter(AtomicUsize);

impl GlobalCounter {
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, std::sync::atomic::Ordering::AcqRel)
    }
}

/// Parses `key1=value1;key2=value2` where every value is JSON5.
///
/// Shared by the zenoh session overrides and the action tunables.
pub fn parse_overrides(var: &str, overrides: &str) -> Result<Vec<(String, serde_json::Value)>> {
    let mut parsed = Vec::new();
    for pair in overrides.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        // Split on first '=' only
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("Invalid {} format: '{}'. Expected 'key=value'", var, pair).into());
        };
        let (key, value) = (key.trim(), value.trim());
        match json5::from_str::<serde_json::Value>(value) {
            Ok(json_value) => {
                tracing::debug!("Override: {} = {}", key, json_value);
                parsed.push((key.to_string(), json_value));
            }
            Err(e) => {
                return Err(format!(
                    "Failed to parse {} value for key '{}': {} (value: {})",
                    var, key, e, value
                )
                .into());
            }
        }
    }
    Ok(parsed)
}

#[derive(Default)]
pub struct ZContextBuilder {
    domain_id: usize,
    config_file: Option<PathBuf>,
    config_overrides: Vec<(String, serde_json::Value)>,
}

impl ZContextBuilder {
    /// Set the domain ID; only nodes in the same domain see each other
    pub fn with_domain_id(mut self, domain_id: usize) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Load the zenoh configuration from a JSON5 file
    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Add a JSON configuration override
    ///
    /// # Example
    /// ```no_run
    /// use actionlib_z::{Builder, context::ZContextBuilder};
    /// use serde_json::json;
    ///
    /// let ctx = ZContextBuilder::default()
    ///     .with_json("scouting/multicast/enabled", json!(false))
    ///     .with_json("connect/endpoints", json!(["tcp/127.0.0.1:7447"]))
    ///     .build()?;
    /// # Ok::<(), zenoh::Error>(())
    /// ```
    pub fn with_json<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.config_overrides.push((key.into(), value));
        self
    }

    /// Convenience method: disable multicast scouting
    pub fn disable_multicast_scouting(self) -> Self {
        self.with_json("scouting/multicast/enabled", json!(false))
    }

    /// Convenience method: connect to specific endpoints
    pub fn with_connect_endpoints<I, S>(self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints.into_iter().map(|s| s.into()).collect();
        self.with_json("connect/endpoints", json!(endpoints))
    }

    /// Convenience method: listen on specific endpoints
    pub fn with_listen_endpoints<I, S>(self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints.into_iter().map(|s| s.into()).collect();
        self.with_json("listen/endpoints", json!(endpoints))
    }

    /// Convenience method: set mode (peer, client, router)
    pub fn with_mode<S: Into<String>>(self, mode: S) -> Self {
        self.with_json("mode", json!(mode.into()))
    }

    /// Appends overrides from `ROSZ_CONFIG_OVERRIDE`
    ///
    /// ```text
    /// export ROSZ_CONFIG_OVERRIDE='mode="client";connect/endpoints=["tcp/192.168.1.1:7447"]'
    /// ```
    fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(overrides) = std::env::var("ROSZ_CONFIG_OVERRIDE") {
            tracing::debug!("Applying config overrides from ROSZ_CONFIG_OVERRIDE: {}", overrides);
            let parsed = parse_overrides("ROSZ_CONFIG_OVERRIDE", &overrides)?;
            self.config_overrides.extend(parsed);
        }
        Ok(self)
    }
}

impl Builder for ZContextBuilder {
    type Output = ZContext;

    #[tracing::instrument(name = "context_build", skip(self), fields(domain_id = self.domain_id))]
    fn build(mut self) -> Result<ZContext> {
        // Priority order:
        // 1. Config file passed via with_config_file()
        // 2. ROSZ_CONFIG_FILE environment variable
        // 3. Default config
        let mut config = if let Some(ref config_file) = self.config_file {
            zenoh::Config::from_file(config_file)?
        } else if let Ok(path) = std::env::var("ROSZ_CONFIG_FILE") {
            zenoh::Config::from_file(path)?
        } else {
            zenoh::Config::default()
        };

        self = self.apply_env_overrides()?;

        for (key, value) in self.config_overrides {
            let value_str = serde_json::to_string(&value)
                .map_err(|e| format!("Failed to serialize value for key '{}': {}", key, e))?;
            config.insert_json5(&key, &value_str).map_err(|e| {
                format!(
                    "Failed to apply config override '{}' = '{}': {}",
                    key, value_str, e
                )
            })?;
        }

        let session = zenoh::open(config).wait()?;
        let domain_id = self.domain_id;
        let graph = Arc::new(Graph::new(&session, domain_id)?);

        Ok(ZContext {
            session: Arc::new(session),
            counter: Arc::new(GlobalCounter::default()),
            domain_id,
            graph,
        })
    }
}

pub struct ZContext {
    session: Arc<Session>,
    // Global counter for the participants
    counter: Arc<GlobalCounter>,
    domain_id: usize,
    graph: Arc<Graph>,
}

impl ZContext {
    pub fn create_node<S: AsRef<str>>(&self, name: S) -> ZNodeBuilder {
        ZNodeBuilder {
            domain_id: self.domain_id,
            name: name.as_ref().to_owned(),
            namespace: "".to_string(),
            session: self.session.clone(),
            counter: self.counter.clone(),
            graph: self.graph.clone(),
        }
    }

    pub fn shutdown(&self) -> Result<()> {
        self.session.close().wait()
    }
}

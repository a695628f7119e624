//! Runtime configuration.
//!
//! Defaults suit local development against a graph service on its standard
//! port; the builder methods and `from_env` cover everything else.

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::GRAPH_BASE_URL;
use crate::route::ROUTE_PAYLOAD_MAX_LEN;

/// Configuration for the gateway and chat sessions.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the orchestration graph service.
    pub graph_base_url: String,
    /// Address the gateway binds to.
    pub bind_addr: String,
    /// Chat model identifier forwarded to the graph, when overridden.
    pub model: Option<String>,
    /// Number of documents the retrieval step fetches.
    pub retrieval_k: u32,
    /// Metadata filters applied to retrieval.
    pub retrieval_filters: HashMap<String, Value>,
    /// Ceiling for the routing-payload suppression filter.
    pub route_payload_max_len: usize,
    /// Skip the startup health probe (useful for testing).
    pub skip_health_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph_base_url: GRAPH_BASE_URL.to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
            model: None,
            retrieval_k: 4,
            retrieval_filters: HashMap::new(),
            route_payload_max_len: ROUTE_PAYLOAD_MAX_LEN,
            skip_health_check: false,
        }
    }
}

impl Config {
    /// Create a Config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the graph service base URL.
    pub fn with_graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.graph_base_url = url.into();
        self
    }

    /// Set the gateway bind address.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the chat model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the retrieval result count.
    pub fn with_retrieval_k(mut self, k: u32) -> Self {
        self.retrieval_k = k;
        self
    }

    /// Add one retrieval metadata filter.
    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.retrieval_filters.insert(key.into(), value);
        self
    }

    /// Set the routing-payload suppression ceiling.
    pub fn with_route_payload_max_len(mut self, max_len: usize) -> Self {
        self.route_payload_max_len = max_len;
        self
    }

    /// Set whether to skip the startup health probe.
    pub fn with_skip_health_check(mut self, skip: bool) -> Self {
        self.skip_health_check = skip;
        self
    }

    /// Build a Config from `DOCENT_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DOCENT_GRAPH_URL") {
            config.graph_base_url = url;
        }
        if let Ok(addr) = std::env::var("DOCENT_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(model) = std::env::var("DOCENT_MODEL") {
            config.model = Some(model);
        }
        if let Ok(k) = std::env::var("DOCENT_RETRIEVAL_K") {
            if let Ok(k) = k.parse() {
                config.retrieval_k = k;
            }
        }

        config
    }
}

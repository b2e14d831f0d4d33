use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use xxhash_rust::xxh3::xxh3_128;

pub mod cache;
pub mod checksum;
pub mod client;
pub mod component;
pub mod config;
pub mod connection;
pub mod error;
pub mod hydrator;
pub mod middleware;
pub mod pipeline;
pub mod schema;
pub mod wire;

#[cfg(test)]
mod testing;

pub use cache::ComponentCache;
pub use checksum::SigningKey;
pub use client::ClientStore;
pub use component::{Component, ComponentInstance, ComponentRegistry};
pub use config::ProtocolConfig;
pub use connection::ConnectionHandler;
pub use error::{ActionError, ProtocolError, Rejection, RejectionKind};
pub use pipeline::{HydrationStep, Passes, Pipeline};
pub use schema::{ComponentSchema, PropertyKind, PropertySchema, Visibility};
pub use wire::{Action, Effects, RequestPayload, ResponsePayload, WireResponse};

/// Flat property bag as carried on the wire and in the cache.
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// Length of generated component ids.
pub const COMPONENT_ID_LEN: usize = 20;

/// Length of generated client session ids.
pub const SESSION_ID_LEN: usize = 32;

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Opaque id of one client-visible component instance
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Fresh random alphanumeric id for a first render.
    pub fn generate() -> Self {
        Self(random_token(COMPONENT_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One client's page: the scope its liveness reports apply to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_token(SESSION_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache address of a component: a pure function of its id and class name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint for `id` rendered by the class `name`.
    ///
    /// The name is length-prefixed so that `("ab", "c")` and `("a", "bc")`
    /// never share an input.
    pub fn derive(id: &ComponentId, name: &str) -> Self {
        let mut input = Vec::with_capacity(8 + name.len() + id.0.len());
        input.extend_from_slice(&(name.len() as u64).to_le_bytes());
        input.extend_from_slice(name.as_bytes());
        input.extend_from_slice(id.0.as_bytes());
        Self(format!("{:032x}", xxh3_128(&input)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

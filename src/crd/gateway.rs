//! Minimal typed view of the Istio `Gateway` resource
//!
//! Only the fields needed to derive an external registry host are modelled.
//! Unknown fields are ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1beta1",
    kind = "Gateway",
    plural = "gateways",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    #[serde(default)]
    pub servers: Vec<GatewayServer>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayServer {
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Gateway {
    /// First host of the first server, if any
    pub fn first_host(&self) -> Option<&str> {
        self.spec
            .servers
            .first()
            .and_then(|s| s.hosts.first())
            .map(String::as_str)
    }
}

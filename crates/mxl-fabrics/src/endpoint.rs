//! Fabric endpoint addresses.

use std::fmt;

use mxl_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A provider endpoint: interface/address (`node`) and service identifier
/// (`service`). For TCP and verbs these are a host and a numeric port; for
/// EFA both may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub node: Option<String>,
    pub service: Option<String>,
}

impl EndpointAddress {
    pub fn new(node: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            service: Some(service.into()),
        }
    }

    /// The `host:port` string to bind a passive TCP endpoint to. The node is
    /// required; a missing service binds an ephemeral port.
    pub(crate) fn tcp_bind_addr(&self) -> Result<String> {
        let node = self
            .node
            .as_deref()
            .ok_or(Error::InvalidArg("tcp endpoint requires a node"))?;
        let service = self.service.as_deref().unwrap_or("0");
        Ok(format!("{node}:{service}"))
    }

    /// The `host:port` string to connect to. Both parts are required.
    pub(crate) fn tcp_connect_addr(&self) -> Result<String> {
        let node = self
            .node
            .as_deref()
            .ok_or(Error::InvalidArg("tcp endpoint requires a node"))?;
        let service = self
            .service
            .as_deref()
            .ok_or(Error::InvalidArg("tcp endpoint requires a service"))?;
        Ok(format!("{node}:{service}"))
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.node.as_deref().unwrap_or("-"),
            self.service.as_deref().unwrap_or("-")
        )
    }
}

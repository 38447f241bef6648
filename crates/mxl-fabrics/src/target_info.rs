//! The self-delimiting descriptor a target hands to initiators.

use std::fmt;
use std::str::FromStr;

use mxl_core::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::EndpointAddress;
use crate::provider::Provider;

/// Remote memory-region descriptor: everything an initiator needs to address
/// the target's grain ring with one-sided writes.
///
/// Grain slots are backed by per-slot files, so addressing is
/// `(slot, offset)` rather than a flat offset: `base` and `length` describe
/// the advertised region for provider-level registration, while
/// `grain_count` and `slot_size` (header plus payload stride) drive slot
/// arithmetic. `key` is the access key the target requires on every write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub base: u64,
    pub length: u64,
    pub key: u64,
    pub grain_count: u64,
    pub slot_size: u64,
}

/// Target description shared out-of-band with initiators.
///
/// Serializes to a single printable JSON line, safe to copy/paste;
/// `to_string` and `parse` round-trip exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub provider: Provider,
    pub endpoint: EndpointAddress,
    pub region: RegionDescriptor,
    pub flow_id: Uuid,
}

impl fmt::Display for TargetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for TargetInfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| {
            tracing::error!(error = %e, "malformed target info string");
            Error::InvalidArg("malformed target info string")
        })
    }
}

//! Fabric provider selection and its string/raw codecs.

use std::fmt;
use std::str::FromStr;

use mxl_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// The fabric backends, in `auto` resolution order.
const DECLARED_ORDER: [Provider; 3] = [Provider::Tcp, Provider::Verbs, Provider::Efa];

/// A fabric backend.
///
/// The raw values and lowercase names are a stable wire contract:
/// `auto ↔ 0`, `tcp ↔ 1`, `verbs ↔ 2`, `efa ↔ 3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto = 0,
    Tcp = 1,
    Verbs = 2,
    Efa = 3,
}

impl Provider {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Provider::Auto),
            1 => Some(Provider::Tcp),
            2 => Some(Provider::Verbs),
            3 => Some(Provider::Efa),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Whether this build carries a driver for the provider.
    pub fn is_available(self) -> bool {
        matches!(self, Provider::Tcp)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Auto => "auto",
            Provider::Tcp => "tcp",
            Provider::Verbs => "verbs",
            Provider::Efa => "efa",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Provider::Auto),
            "tcp" => Ok(Provider::Tcp),
            "verbs" => Ok(Provider::Verbs),
            "efa" => Ok(Provider::Efa),
            _ => Err(Error::InvalidArg("unknown fabric provider")),
        }
    }
}

/// Resolve the provider to bind with. `Auto` tries the declared order and
/// picks the first available backend; naming an unavailable backend directly
/// is a fabric error.
pub(crate) fn resolve(provider: Provider) -> Result<Provider> {
    match provider {
        Provider::Auto => DECLARED_ORDER
            .into_iter()
            .find(|p| p.is_available())
            .ok_or_else(|| Error::Fabric("no fabric provider available".into())),
        p if p.is_available() => Ok(p),
        p => Err(Error::Fabric(format!("provider '{p}' is not available in this build"))),
    }
}

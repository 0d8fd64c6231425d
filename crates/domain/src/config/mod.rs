//! Configuration document types for the three YAML kinds (`Arena`,
//! `Scenario`, `Provider`). Loading and cross-file resolution live in the
//! `arena` binary crate; the types here only describe shape and defaults.

mod arena;
mod context;
mod provider;
mod scenario;
mod vars;

pub use arena::*;
pub use context::*;
pub use provider::*;
pub use scenario::*;
pub use vars::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "promptkit/v1";

/// Common envelope shared by every config file kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl<T> Document<T> {
    /// Check the envelope fields against the expected kind.
    pub fn check_kind(&self, expected: &str) -> crate::Result<()> {
        if self.api_version != API_VERSION {
            return Err(crate::Error::Config(format!(
                "unsupported apiVersion {:?}, expected {API_VERSION:?}",
                self.api_version
            )));
        }
        if self.kind != expected {
            return Err(crate::Error::Config(format!(
                "expected kind {expected:?}, found {:?}",
                self.kind
            )));
        }
        Ok(())
    }
}

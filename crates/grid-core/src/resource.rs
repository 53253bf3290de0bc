// SPDX-License-Identifier: MIT

//! Resource requests attached to an [`crate::application::Application`],
//! and the CPU architecture enum they can be pinned to.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A memory quantity, always stored in bytes internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryQuantity(pub u64);

impl MemoryQuantity {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_mb(mb: u64) -> Self {
        Self(mb * 1024 * 1024)
    }

    pub const fn from_gb(gb: u64) -> Self {
        Self(gb * 1024 * 1024 * 1024)
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }
}

/// Closed set of CPU architectures a Backend or Application may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    I686,
}

crate::simple_display! {
    Architecture {
        X86_64 => "x86_64",
        I686 => "i686",
    }
}

/// Resources an [`crate::application::Application`] asks a Backend for.
///
/// All fields are optional at the type level except `requested_cores`,
/// which always defaults to 1 (a job always occupies at least one core).
/// Construction-time validation of the numeric fields (positive integers)
/// happens in [`crate::application::ApplicationBuilder::build`], not here,
/// since the user-facing error needs to name the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub requested_cores: u32,
    pub requested_memory: Option<MemoryQuantity>,
    #[serde(with = "duration_opt_serde")]
    pub requested_walltime: Option<Duration>,
    pub requested_architecture: Option<Architecture>,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            requested_cores: 1,
            requested_memory: None,
            requested_walltime: None,
            requested_architecture: None,
        }
    }
}

mod duration_opt_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        v.map(|d| d.as_secs()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<u64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_is_one_core_unbounded() {
        let r = ResourceRequest::default();
        assert_eq!(r.requested_cores, 1);
        assert!(r.requested_memory.is_none());
    }

    #[test]
    fn memory_quantity_conversions() {
        assert_eq!(MemoryQuantity::from_gb(1).bytes(), 1024 * 1024 * 1024);
        assert_eq!(MemoryQuantity::from_mb(1).bytes(), 1024 * 1024);
    }
}

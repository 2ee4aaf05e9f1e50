use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a buffer physically lives. The engine only distinguishes host
/// memory from device memory; which accelerator runtime backs the latter is
/// a transport concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Host,
    Accelerator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Host => write!(f, "host"),
            DeviceKind::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" | "cpu" => Ok(DeviceKind::Host),
            "accelerator" | "cuda" => Ok(DeviceKind::Accelerator),
            other => Err(format!("unrecognized device kind {other:?}")),
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Advisory operation mode carried with every request.
///
/// The dispatcher forwards it to the handler untouched; it never enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    #[default]
    Normal,
    Nonmutating,
    Idempotent,
}

impl OperationMode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Nonmutating => 1,
            Self::Idempotent => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Nonmutating),
            2 => Some(Self::Idempotent),
            _ => None,
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Nonmutating => "nonmutating",
            Self::Idempotent => "idempotent",
        };
        f.write_str(s)
    }
}

/// How a request travels and whether it produces a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationKind {
    #[default]
    Twoway,
    Oneway,
    BatchOneway,
}

impl InvocationKind {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Twoway => 0,
            Self::Oneway => 1,
            Self::BatchOneway => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Twoway),
            1 => Some(Self::Oneway),
            2 => Some(Self::BatchOneway),
            _ => None,
        }
    }

    /// Only twoway invocations ever receive a reply.
    pub fn expects_reply(self) -> bool {
        matches!(self, Self::Twoway)
    }
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Twoway => "twoway",
            Self::Oneway => "oneway",
            Self::BatchOneway => "batch-oneway",
        };
        f.write_str(s)
    }
}

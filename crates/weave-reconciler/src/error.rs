#![forbid(unsafe_code)]

//! Error types.
//!
//! Render and commit never propagate errors for malformed descriptions;
//! those go to the diagnostics side channel. The only hard failure is a host
//! adapter operation failing, which is fatal to the root it happened on.

use crate::root::RootId;
use std::fmt;

/// The host operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    CreateInstance,
    CreateTextInstance,
    AppendChild,
    InsertBefore,
    RemoveChild,
    UpdateInstance,
    UpdateText,
}

impl HostOp {
    /// Stable name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateInstance => "create_instance",
            Self::CreateTextInstance => "create_text_instance",
            Self::AppendChild => "append_child",
            Self::InsertBefore => "insert_before",
            Self::RemoveChild => "remove_child",
            Self::UpdateInstance => "update_instance",
            Self::UpdateText => "update_text",
        }
    }
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host adapter operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub op: HostOp,
    pub message: String,
}

impl HostError {
    pub fn new(op: HostOp, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host {} failed: {}", self.op, self.message)
    }
}

impl std::error::Error for HostError {}

/// Errors returned by the update submission API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// No root with this id exists.
    UnknownRoot(RootId),
    /// A host failure poisoned this root; it accepts no further updates.
    RootPoisoned(RootId),
    /// A host operation failed.
    Host(HostError),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRoot(id) => write!(f, "unknown root {id:?}"),
            Self::RootPoisoned(id) => write!(f, "root {id:?} is poisoned by an earlier host failure"),
            Self::Host(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Host(e) => Some(e),
            Self::UnknownRoot(_) | Self::RootPoisoned(_) => None,
        }
    }
}

impl From<HostError> for ReconcileError {
    fn from(e: HostError) -> Self {
        Self::Host(e)
    }
}

//! Error taxonomy shared by loaders, geometry and the derivation graph.
//!
//! DESIGN
//! ======
//! A single cloneable enum so one failure can be cached on a node and handed
//! unchanged to every dependent that reads it. Nothing inside the graph
//! recovers from these; they surface to whoever reads the affected node.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

use crate::loader::Resource;

/// Errors produced anywhere in the visualization core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VizError {
    /// The resource could not be fetched or read.
    #[error("failed to load {resource}: {reason}")]
    LoadFailed { resource: Resource, reason: String },

    /// The resource endpoint answered with a non-success status.
    #[error("failed to load {resource}: status {status}")]
    LoadStatus { resource: Resource, status: u16 },

    /// The payload was fetched but is not the expected JSON document.
    #[error("malformed {resource}: {reason}")]
    Malformed { resource: Resource, reason: String },

    /// A node read itself, directly or through other nodes.
    #[error("dependency cycle: {path}")]
    Cycle { path: String },

    /// The selected group has no matching feature in one of the datasets.
    #[error("group {group} has no matching {missing}")]
    InconsistentData { group: i64, missing: &'static str },

    /// A bounding box was requested for input without coordinates.
    #[error("bounding box requested for empty geometry")]
    EmptyGeometry,

    /// The meeting-point collection contains no labelled features.
    #[error("no group ids present in meeting points")]
    NoGroups,

    /// A key was read that was never registered with the graph.
    #[error("unknown node: {0}")]
    UnknownNode(&'static str),

    /// A key was registered twice.
    #[error("duplicate node: {0}")]
    DuplicateNode(&'static str),

    /// A node was read (or written) with a value type it does not hold.
    #[error("type mismatch for node: {0}")]
    TypeMismatch(&'static str),

    /// A write was attempted on a computed node.
    #[error("node is not writable: {0}")]
    ReadOnlyNode(&'static str),

    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    Config(String),

    /// The data server could not bind or stopped serving.
    #[error("server failed: {0}")]
    Server(String),
}

/// Grepable error code and retryable flag for structured error reporting.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

impl ErrorCode for VizError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::LoadFailed { .. } => "E_LOAD_FAILED",
            Self::LoadStatus { .. } => "E_LOAD_STATUS",
            Self::Malformed { .. } => "E_MALFORMED",
            Self::Cycle { .. } => "E_CYCLE",
            Self::InconsistentData { .. } => "E_INCONSISTENT_DATA",
            Self::EmptyGeometry => "E_EMPTY_GEOMETRY",
            Self::NoGroups => "E_NO_GROUPS",
            Self::UnknownNode(_) => "E_UNKNOWN_NODE",
            Self::DuplicateNode(_) => "E_DUPLICATE_NODE",
            Self::TypeMismatch(_) => "E_TYPE_MISMATCH",
            Self::ReadOnlyNode(_) => "E_READ_ONLY_NODE",
            Self::Config(_) => "E_CONFIG",
            Self::Server(_) => "E_SERVER",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::LoadFailed { .. } | Self::LoadStatus { status: 429 | 500..=599, .. })
    }
}

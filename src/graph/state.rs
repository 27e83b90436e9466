//! Observable node states.

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;

use std::any::Any;
use std::sync::Arc;

use crate::error::VizError;

/// Type-erased node value. Identity (the allocation) is what changes on
/// recompute; contents are never compared.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// What a read of a node observes.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeState<T> {
    /// An asynchronous ancestor has not resolved yet.
    Pending,
    /// The current value.
    Ready(T),
    /// The node, or something it depends on, failed.
    Failed(VizError),
}

impl<T> NodeState<T> {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Self::Ready(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&VizError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Convert into a `Result` so compute bodies can short-circuit with `?`.
    ///
    /// # Errors
    ///
    /// Returns the matching [`Suspend`] for pending and failed states.
    pub fn into_result(self) -> Result<T, Suspend> {
        match self {
            Self::Pending => Err(Suspend::Pending),
            Self::Ready(v) => Ok(v),
            Self::Failed(e) => Err(Suspend::Failed(e)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> NodeState<U> {
        match self {
            Self::Pending => NodeState::Pending,
            Self::Ready(v) => NodeState::Ready(f(v)),
            Self::Failed(e) => NodeState::Failed(e),
        }
    }
}

impl<T> From<Result<T, Suspend>> for NodeState<T> {
    fn from(result: Result<T, Suspend>) -> Self {
        match result {
            Ok(v) => Self::Ready(v),
            Err(Suspend::Pending) => Self::Pending,
            Err(Suspend::Failed(e)) => Self::Failed(e),
        }
    }
}

impl NodeState<AnyValue> {
    /// Downcast a stored value; a wrong type reads as a failure.
    pub(crate) fn typed<T: Any + Send + Sync>(&self, name: &'static str) -> NodeState<Arc<T>> {
        match self {
            Self::Pending => NodeState::Pending,
            Self::Failed(e) => NodeState::Failed(e.clone()),
            Self::Ready(v) => match Arc::clone(v).downcast::<T>() {
                Ok(t) => NodeState::Ready(t),
                Err(_) => NodeState::Failed(VizError::TypeMismatch(name)),
            },
        }
    }
}

/// Why a compute body stopped before producing a value.
#[derive(Clone, Debug, PartialEq)]
pub enum Suspend {
    Pending,
    Failed(VizError),
}

impl From<VizError> for Suspend {
    fn from(e: VizError) -> Self {
        Self::Failed(e)
    }
}

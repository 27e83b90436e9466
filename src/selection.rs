//! Selected-group state and the events that change it.
//!
//! DESIGN
//! ======
//! The selection is a plain graph input. Widgets and map picks never write it
//! directly; they produce a [`SelectionEvent`] that the session applies, so
//! every change flows through one invalidation path.

#[cfg(test)]
#[path = "selection_test.rs"]
mod selection_test;

use serde::{Deserialize, Serialize};

use crate::geo::GroupId;
use crate::graph::NodeKey;

/// The selected group, or `None` to show every group.
pub const SELECTED_GROUP: NodeKey<Option<GroupId>> = NodeKey::new("selectedGroup");

/// Inbound selection change from a list widget or a map pick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "group", rename_all = "snake_case")]
pub enum SelectionEvent {
    Select(GroupId),
    Clear,
}

impl SelectionEvent {
    /// The selection value this event writes.
    #[must_use]
    pub fn value(self) -> Option<GroupId> {
        match self {
            Self::Select(group) => Some(group),
            Self::Clear => None,
        }
    }
}

impl From<Option<GroupId>> for SelectionEvent {
    fn from(group: Option<GroupId>) -> Self {
        group.map_or(Self::Clear, Self::Select)
    }
}

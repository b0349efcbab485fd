//! Operations: the only way node state changes.
//!
//! Wire shape is tagged by the `k` key:
//! ```text
//! {"k":"add",    "node":{…}}
//! {"k":"move",   "id":"a", "x":5, "y":5}
//! {"k":"patch",  "id":"a", "changes":{…}}
//! {"k":"remove", "id":"a"}
//! ```

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodePatch};

/// A single edit to the node table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "k", rename_all = "lowercase")]
pub enum Operation {
    /// Insert the node, replacing any node with the same id.
    Add { node: Node },
    /// Reposition an existing node.
    Move { id: String, x: f64, y: f64 },
    /// Shallow-merge fields onto an existing node.
    Patch { id: String, changes: NodePatch },
    /// Delete a node.
    Remove { id: String },
}

impl Operation {
    pub fn add(node: Node) -> Self {
        Operation::Add { node }
    }

    pub fn move_to(id: impl Into<String>, x: f64, y: f64) -> Self {
        Operation::Move { id: id.into(), x, y }
    }

    pub fn patch(id: impl Into<String>, changes: NodePatch) -> Self {
        Operation::Patch {
            id: id.into(),
            changes,
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Operation::Remove { id: id.into() }
    }

    /// Id of the node this operation targets.
    pub fn target(&self) -> &str {
        match self {
            Operation::Add { node } => &node.id,
            Operation::Move { id, .. } | Operation::Patch { id, .. } | Operation::Remove { id } => id,
        }
    }

    /// Short tag, as written on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::Add { .. } => "add",
            Operation::Move { .. } => "move",
            Operation::Patch { .. } => "patch",
            Operation::Remove { .. } => "remove",
        }
    }
}

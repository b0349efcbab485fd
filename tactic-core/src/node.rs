//! Board nodes: the drawable elements of a room.
//!
//! A [`Node`] is a flat record with a shape [`NodeKind`], a position and a
//! handful of optional styling fields. Kinds this build does not know about
//! are carried verbatim in [`NodeKind::Other`], and fields it does not know
//! about are carried in [`Node::extra`], so a node survives a decode/encode
//! cycle unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shape variant of a node.
///
/// Serialized as a plain string (`"player"`, `"arrow"`, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Player,
    Arrow,
    Zone,
    Cone,
    Freehand,
    /// A kind introduced by a newer client. Kept as-is, rendered with a fallback.
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Player => "player",
            NodeKind::Arrow => "arrow",
            NodeKind::Zone => "zone",
            NodeKind::Cone => "cone",
            NodeKind::Freehand => "freehand",
            NodeKind::Other(kind) => kind,
        }
    }

    /// Whether this build has a dedicated renderer for the kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, NodeKind::Other(_))
    }
}

impl From<String> for NodeKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "player" => NodeKind::Player,
            "arrow" => NodeKind::Arrow,
            "zone" => NodeKind::Zone,
            "cone" => NodeKind::Cone,
            "freehand" => NodeKind::Freehand,
            _ => NodeKind::Other(kind),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A drawable element on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Shape-dependent numbers: a width/height pair, a polyline, …
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<f64>>,
    /// Fields this build does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            x,
            y,
            rotation: None,
            color: None,
            label: None,
            points: None,
            extra: Map::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_points(mut self, points: Vec<f64>) -> Self {
        self.points = Some(points);
        self
    }

    /// Shallow-merge `changes` onto this node.
    ///
    /// Only fields present in the patch are written. The `id` is never
    /// rewritten: the node stays filed under the key it was added with.
    pub fn merge(&mut self, changes: &NodePatch) {
        if let Some(kind) = &changes.kind {
            self.kind = kind.clone();
        }
        if let Some(x) = changes.x {
            self.x = x;
        }
        if let Some(y) = changes.y {
            self.y = y;
        }
        if let Some(rotation) = changes.rotation {
            self.rotation = Some(rotation);
        }
        if let Some(color) = &changes.color {
            self.color = Some(color.clone());
        }
        if let Some(label) = &changes.label {
            self.label = Some(label.clone());
        }
        if let Some(points) = &changes.points {
            self.points = Some(points.clone());
        }
        for (key, value) in &changes.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Partial node carried by a `patch` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<f64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodePatch {
    pub fn color(color: impl Into<String>) -> Self {
        Self {
            color: Some(color.into()),
            ..Self::default()
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.x.is_none()
            && self.y.is_none()
            && self.rotation.is_none()
            && self.color.is_none()
            && self.label.is_none()
            && self.points.is_none()
            && self.extra.is_empty()
    }
}

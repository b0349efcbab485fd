//! # tactic-core: document model for TacticBoard rooms
//!
//! A room is an ordered table of drawable [`Node`]s. The table changes only
//! through [`Operation`]s, which the server sequences into snapshots and
//! delta batches. [`Board`] is the local replica that applies them.
//!
//! ## Modules
//!
//! - [`node`]: `Node`, `NodeKind`, `NodePatch`
//! - [`ops`]: the `add` / `move` / `patch` / `remove` operation set
//! - [`board`]: sequence-checked replica (snapshot + delta application)

pub mod board;
pub mod node;
pub mod ops;

pub use board::{ApplyOutcome, Board, GapPolicy};
pub use node::{Node, NodeKind, NodePatch};
pub use ops::Operation;

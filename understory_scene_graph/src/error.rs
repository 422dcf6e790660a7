// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors returned by tree mutations and batch queries.

use crate::types::NodeId;

/// Errors reported by [`Tree`](crate::Tree) operations.
///
/// All of these indicate a usage error on the caller's side. None of them
/// leave the tree partially modified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// The identifier does not refer to a live node.
    #[error("node {0:?} is not alive")]
    StaleNode(NodeId),
    /// Reparenting `node` under `parent` would make it its own ancestor.
    #[error("cannot parent {node:?} under {parent:?}, which is in its own subtree")]
    Cycle {
        /// The node being reparented.
        node: NodeId,
        /// The rejected parent.
        parent: NodeId,
    },
    /// Batch queries must be anchored at a node without a parent.
    #[error("batch anchor {0:?} is not a root")]
    NotRoot(NodeId),
    /// Some requested node does not descend from the batch anchor.
    #[error("the objects are not part of the same tree")]
    NotOneTree,
    /// The batch would track more joints than the configured capacity.
    #[error("batch needs {requested} joints, capacity is {capacity}")]
    TooLarge {
        /// Number of joints the batch reached before giving up.
        requested: usize,
        /// Configured [`SceneConfig::batch_capacity`](crate::SceneConfig::batch_capacity).
        capacity: usize,
    },
}

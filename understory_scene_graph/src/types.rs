// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public types for the scene graph: node and feature identifiers, cache flags, and configuration.

/// Identifier for a node in the tree (generational).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) u32, pub(crate) u32);

impl NodeId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Identifier for a feature attached to a node (generational).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FeatureId(pub(crate) u32, pub(crate) u32);

impl FeatureId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

bitflags::bitflags! {
    /// Which cached quantities a [`Feature`](crate::Feature) wants pushed on clean.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CachedTransformations: u8 {
        /// Absolute transformation matrix, delivered through [`Feature::clean`](crate::Feature::clean).
        const ABSOLUTE          = 0b0000_0001;
        /// Inverted absolute transformation matrix, delivered through
        /// [`Feature::clean_inverted`](crate::Feature::clean_inverted).
        const INVERTED_ABSOLUTE = 0b0000_0010;
    }
}

impl Default for CachedTransformations {
    fn default() -> Self {
        Self::empty()
    }
}

/// Default upper bound on the number of joints a single batch may track.
pub const DEFAULT_BATCH_CAPACITY: usize = 65_535;

/// Tree-wide configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneConfig {
    /// Maximum number of joints (distinct requested nodes plus branch points) a batch
    /// call may track before failing with [`SceneError::TooLarge`](crate::SceneError::TooLarge).
    pub batch_capacity: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
        }
    }
}

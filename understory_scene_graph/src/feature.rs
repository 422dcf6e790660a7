// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Features: per-node consumers of cached absolute transformations.

use alloc::boxed::Box;

use crate::types::CachedTransformations;

/// A consumer attached to a node that caches quantities derived from the
/// node's absolute transformation.
///
/// The tree calls [`mark_dirty`](Feature::mark_dirty) whenever the node's
/// absolute transformation becomes stale, and pushes fresh matrices through
/// [`clean`](Feature::clean) and [`clean_inverted`](Feature::clean_inverted)
/// when the node is cleaned, according to
/// [`cached_transformations`](Feature::cached_transformations).
///
/// A feature's cache is valid exactly when its node is clean.
pub trait Feature<M> {
    /// Which matrices this feature wants to receive on clean.
    fn cached_transformations(&self) -> CachedTransformations {
        CachedTransformations::empty()
    }

    /// Receives the absolute transformation matrix of the node.
    fn clean(&mut self, absolute: &M) {
        let _ = absolute;
    }

    /// Receives the inverted absolute transformation matrix of the node.
    fn clean_inverted(&mut self, inverted_absolute: &M) {
        let _ = inverted_absolute;
    }

    /// The node's absolute transformation is no longer valid.
    fn mark_dirty(&mut self) {}
}

impl<M, F: Feature<M> + ?Sized> Feature<M> for Box<F> {
    fn cached_transformations(&self) -> CachedTransformations {
        (**self).cached_transformations()
    }

    fn clean(&mut self, absolute: &M) {
        (**self).clean(absolute);
    }

    fn clean_inverted(&mut self, inverted_absolute: &M) {
        (**self).clean_inverted(inverted_absolute);
    }

    fn mark_dirty(&mut self) {
        (**self).mark_dirty();
    }
}

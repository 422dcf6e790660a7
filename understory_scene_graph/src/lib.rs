// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_scene_graph --heading-base-level=0

//! Understory Scene Graph: a transformation hierarchy with lazily cached absolute transforms.
//!
//! Understory Scene Graph is a reusable building block for scene editors, game objects, and any
//! hierarchy where many consumers need the absolute (world) transformation of a node.
//!
//! - Represents a tree of nodes, each with a local transformation relative to its parent.
//! - Caches absolute transformations and recomputes only what a mutation invalidated.
//! - Pushes cached matrices (and their inverses) into per-node [`Feature`]s on clean.
//! - Computes absolute transformations for many nodes at once, walking shared ancestor
//!   paths only once.
//!
//! ## Dirty and clean
//!
//! Every node is either clean (its cached absolute transformation, and every cache derived from
//! it in its features, is valid) or dirty. Reparenting a node or editing its local transformation
//! marks it and its whole subtree dirty and tells every feature in that subtree. Ancestors are
//! never touched. Marking stops at nodes that already are dirty, since their subtrees are too.
//!
//! Cleaning happens on demand:
//! - [`Tree::clean`] walks up to the nearest clean ancestor and back down, cleaning that chain.
//! - [`Tree::clean_many`] cleans a set of nodes (plus their dirty ancestors) with a single batch
//!   computation.
//!
//! [`Tree::absolute_transformation`] is a separate, pure read that always recomputes by walking
//! to the root and never touches cached state.
//!
//! ## Batch transformations
//!
//! [`Tree::transformations`] returns the absolute transformations of an arbitrary list of nodes
//! (duplicates allowed) composed with an initial transformation. Requested nodes and the branch
//! points where their paths meet become *joints*; each joint is resolved once, relative to its
//! nearest joint ancestor, so the work is proportional to the number of distinct nodes on the
//! requested paths rather than the sum of their depths. Batches are anchored at a root node;
//! nodes from other trees are rejected with [`SceneError::NotOneTree`], and the number of joints
//! is bounded by [`SceneConfig::batch_capacity`].
//!
//! ## API overview
//!
//! - [`Tree`]: the node arena, generic over the [`Transformation`] type and the feature type.
//! - [`Transformation`]: the algebra the tree needs (compose, invert, identity, matrix
//!   conversion), implemented for [`kurbo::Affine`] and [`kurbo::TranslateScale`].
//! - [`Feature`]: a consumer of a node's cached matrices, selected by [`CachedTransformations`].
//! - [`NodeId`] / [`FeatureId`]: generational handles.
//! - [`SceneConfig`]: tree-wide settings.
//! - [`SceneError`]: usage errors reported by mutations and batch queries.
//!
//! Key operations:
//! - [`Tree::insert_scene`](Tree::insert_scene) / [`Tree::insert`](Tree::insert) → [`NodeId`]
//! - [`Tree::set_parent`](Tree::set_parent), [`Tree::remove`](Tree::remove)
//! - [`Tree::set_local_transform`](Tree::set_local_transform) /
//!   [`Tree::transform`](Tree::transform) / [`Tree::transform_local`](Tree::transform_local)
//! - [`Tree::set_dirty`](Tree::set_dirty), [`Tree::clean`](Tree::clean),
//!   [`Tree::clean_many`](Tree::clean_many)
//! - [`Tree::transformations`](Tree::transformations) /
//!   [`Tree::transformation_matrices`](Tree::transformation_matrices)
//! - [`Tree::attach_feature`](Tree::attach_feature) / [`Tree::detach_feature`](Tree::detach_feature)
//!
//! ## Example
//!
//! ```rust
//! use kurbo::{Affine, Vec2};
//! use understory_scene_graph::{CachedTransformations, Feature, Tree};
//!
//! /// Keeps the inverse world transform around, for example to map pointer
//! /// positions into a node's local space.
//! #[derive(Default)]
//! struct PointerSpace {
//!     world_to_local: Option<Affine>,
//! }
//!
//! impl Feature<Affine> for PointerSpace {
//!     fn cached_transformations(&self) -> CachedTransformations {
//!         CachedTransformations::INVERTED_ABSOLUTE
//!     }
//!
//!     fn clean_inverted(&mut self, inverted_absolute: &Affine) {
//!         self.world_to_local = Some(*inverted_absolute);
//!     }
//!
//!     fn mark_dirty(&mut self) {
//!         self.world_to_local = None;
//!     }
//! }
//!
//! let mut tree: Tree<Affine, PointerSpace> = Tree::default();
//! let scene = tree.insert_scene(Affine::IDENTITY);
//! let panel = tree
//!     .insert(Some(scene), Affine::translate(Vec2::new(1.0, 0.0)))
//!     .unwrap();
//! let button = tree
//!     .insert(Some(panel), Affine::translate(Vec2::new(0.0, 1.0)))
//!     .unwrap();
//! let space = tree.attach_feature(button, PointerSpace::default()).unwrap();
//!
//! // One pass resolves both nodes; the scene→panel segment is shared.
//! let world = tree
//!     .transformations(scene, &[button, panel], Affine::IDENTITY)
//!     .unwrap();
//! assert_eq!(world[0], Affine::translate(Vec2::new(1.0, 1.0)));
//! assert_eq!(world[1], Affine::translate(Vec2::new(1.0, 0.0)));
//!
//! // Cleaning pushes the inverse into the feature.
//! tree.clean(button);
//! assert_eq!(
//!     tree.feature(space).unwrap().world_to_local,
//!     Some(Affine::translate(Vec2::new(-1.0, -1.0)))
//! );
//! ```
//!
//! ## Crate features
//!
//! - `std` (default): enables `std` support in `kurbo`.
//! - `libm`: `no_std` floating-point support for `kurbo` through `libm`.
//!
//! This crate is `no_std` and uses `alloc`. It is single-threaded: mutation takes `&mut Tree`,
//! and callers sharing a tree across threads must serialize access themselves.

#![no_std]

extern crate alloc;

mod batch;
mod error;
mod feature;
mod transformation;
mod tree;
mod types;

pub use error::SceneError;
pub use feature::Feature;
pub use transformation::Transformation;
pub use tree::Tree;
pub use types::{CachedTransformations, DEFAULT_BATCH_CAPACITY, FeatureId, NodeId, SceneConfig};

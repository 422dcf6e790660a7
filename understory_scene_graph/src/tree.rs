// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core tree implementation: structure, dirty propagation, clean resolution, features.

use alloc::{boxed::Box, vec, vec::Vec};
use kurbo::Affine;
use smallvec::SmallVec;

use crate::error::SceneError;
use crate::feature::Feature;
use crate::transformation::Transformation;
use crate::types::{CachedTransformations, FeatureId, NodeId, SceneConfig};

/// A transformation hierarchy with lazily cached absolute transformations.
///
/// The type parameter `T` is the transformation carried by every node; it
/// defaults to [`Affine`]. `F` is the feature type stored by the tree; it
/// defaults to boxed trait objects so heterogeneous features can share one
/// tree, but a concrete type (or an enum) avoids the indirection.
///
/// Mutations (reparenting, editing a local transform) mark the affected
/// subtree dirty right away. Absolute transformations are recomputed only when
/// asked for, through [`Tree::clean`], [`Tree::clean_many`] or the batch
/// queries, which also push fresh matrices into the attached features.
///
/// ## Example
///
/// ```rust
/// use kurbo::{Affine, Vec2};
/// use understory_scene_graph::Tree;
///
/// let mut tree = Tree::new();
/// let scene = tree.insert_scene(Affine::IDENTITY);
/// let arm = tree
///     .insert(Some(scene), Affine::translate(Vec2::new(1.0, 0.0)))
///     .unwrap();
/// let hand = tree
///     .insert(Some(arm), Affine::translate(Vec2::new(0.0, 1.0)))
///     .unwrap();
///
/// assert_eq!(
///     tree.clean(hand),
///     Some(Affine::translate(Vec2::new(1.0, 1.0)))
/// );
/// assert_eq!(tree.is_dirty(hand), Some(false));
///
/// // Moving the arm invalidates the hand as well.
/// tree.set_local_transform(arm, Affine::translate(Vec2::new(2.0, 0.0)));
/// assert_eq!(tree.is_dirty(hand), Some(true));
/// ```
pub struct Tree<T: Transformation = Affine, F = Box<dyn Feature<Affine>>> {
    /// slots
    nodes: Vec<Option<Node<T>>>,
    /// last generation per slot (persists across frees)
    generations: Vec<u32>,
    free_list: Vec<usize>,
    features: Vec<Option<FeatureSlot<F>>>,
    feature_generations: Vec<u32>,
    feature_free_list: Vec<usize>,
    config: SceneConfig,
}

impl<T: Transformation, F> core::fmt::Debug for Tree<T, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total = self.nodes.len();
        let alive = self.nodes.iter().filter(|n| n.is_some()).count();
        let dirty = self.nodes.iter().flatten().filter(|n| n.dirty).count();
        let features = self.features.iter().filter(|s| s.is_some()).count();
        f.debug_struct("Tree")
            .field("nodes_total", &total)
            .field("nodes_alive", &alive)
            .field("nodes_dirty", &dirty)
            .field("features", &features)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T, F> Default for Tree<T, F>
where
    T: Transformation,
    F: Feature<T::Matrix>,
{
    fn default() -> Self {
        Self::with_config(SceneConfig::default())
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Node<T> {
    generation: u32,
    pub(crate) parent: Option<NodeId>,
    children: Vec<NodeId>,
    pub(crate) local: T,
    /// Valid only while `dirty` is false.
    absolute: T,
    pub(crate) dirty: bool,
    scene: bool,
    features: SmallVec<[FeatureId; 2]>,
}

impl<T: Transformation> Node<T> {
    fn new(generation: u32, local: T, scene: bool) -> Self {
        Self {
            generation,
            parent: None,
            children: Vec::new(),
            local,
            absolute: T::identity(),
            dirty: true,
            scene,
            features: SmallVec::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct FeatureSlot<F> {
    generation: u32,
    node: NodeId,
    feature: F,
}

impl Tree {
    /// Create a new empty tree of [`Affine`] nodes with boxed features and the
    /// default [`SceneConfig`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T, F> Tree<T, F>
where
    T: Transformation,
    F: Feature<T::Matrix>,
{
    /// Create a new empty tree with an explicit configuration.
    pub fn with_config(config: SceneConfig) -> Self {
        Self {
            nodes: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            features: Vec::new(),
            feature_generations: Vec::new(),
            feature_free_list: Vec::new(),
            config,
        }
    }

    /// The configuration this tree was created with.
    pub fn config(&self) -> SceneConfig {
        self.config
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Returns true if the tree holds no live nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a scene root.
    ///
    /// A scene is a root that can never be given a parent; its local
    /// transformation is also its absolute transformation.
    pub fn insert_scene(&mut self, local: T) -> NodeId {
        self.alloc_node(local, true)
    }

    /// Insert a new node as a child of `parent`, or as a detached root if `None`.
    ///
    /// New nodes start dirty. Fails with [`SceneError::StaleNode`] if `parent`
    /// is not alive.
    pub fn insert(&mut self, parent: Option<NodeId>, local: T) -> Result<NodeId, SceneError> {
        if let Some(p) = parent
            && !self.is_alive(p)
        {
            return Err(SceneError::StaleNode(p));
        }
        let id = self.alloc_node(local, false);
        if let Some(p) = parent {
            self.link_parent(id, p);
        }
        Ok(id)
    }

    /// Remove a node together with its subtree and every feature attached within it.
    pub fn remove(&mut self, id: NodeId) {
        if !self.is_alive(id) {
            return;
        }
        if let Some(parent) = self.node(id).parent {
            self.unlink_parent(id, parent);
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes[current.idx()].take() else {
                continue;
            };
            stack.extend(node.children.iter().copied());
            for fid in node.features {
                self.features[fid.idx()] = None;
                self.feature_free_list.push(fid.idx());
            }
            self.free_list.push(current.idx());
        }
    }

    /// Reparent `id` under `parent`, or detach it into its own root with `None`.
    ///
    /// Nothing happens if `parent` already is the parent of `id` or if `id` is
    /// a scene. Reparenting a node into its own subtree is rejected with
    /// [`SceneError::Cycle`] and leaves the tree untouched. Otherwise the node
    /// and its subtree are marked dirty.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), SceneError> {
        if !self.is_alive(id) {
            return Err(SceneError::StaleNode(id));
        }
        if let Some(p) = parent
            && !self.is_alive(p)
        {
            return Err(SceneError::StaleNode(p));
        }

        let node = self.node(id);
        let old_parent = node.parent;
        if old_parent == parent || node.scene {
            return Ok(());
        }

        if let Some(new_parent) = parent {
            let mut cursor = Some(new_parent);
            while let Some(p) = cursor {
                if p == id {
                    log::debug!("rejected reparenting {id:?} under its descendant {new_parent:?}");
                    return Err(SceneError::Cycle {
                        node: id,
                        parent: new_parent,
                    });
                }
                cursor = self.node(p).parent;
            }
        }

        if let Some(old) = old_parent {
            self.unlink_parent(id, old);
        }
        if let Some(p) = parent {
            self.link_parent(id, p);
        }
        self.mark_dirty(id);
        Ok(())
    }

    /// Replace the local transformation of `id`.
    pub fn set_local_transform(&mut self, id: NodeId, local: T) {
        if let Some(n) = self.node_opt_mut(id) {
            n.local = local;
            self.mark_dirty(id);
        }
    }

    /// Apply `transformation` on top of the local transformation, in parent space.
    pub fn transform(&mut self, id: NodeId, transformation: T) {
        if let Some(n) = self.node_opt_mut(id) {
            n.local = transformation.compose(&n.local);
            self.mark_dirty(id);
        }
    }

    /// Apply `transformation` underneath the local transformation, in local space.
    pub fn transform_local(&mut self, id: NodeId, transformation: T) {
        if let Some(n) = self.node_opt_mut(id) {
            n.local = n.local.compose(&transformation);
            self.mark_dirty(id);
        }
    }

    /// Reset the local transformation to identity.
    pub fn reset_transformation(&mut self, id: NodeId) {
        self.set_local_transform(id, T::identity());
    }

    /// Mark `id`, its subtree, and all their features dirty.
    ///
    /// Already-dirty nodes are skipped together with their subtrees, which are
    /// dirty as well.
    pub fn set_dirty(&mut self, id: NodeId) {
        if self.is_alive(id) {
            self.mark_dirty(id);
        }
    }

    /// Returns true if `id` refers to a live node.
    ///
    /// A `NodeId` is considered live if its slot exists and its generation matches
    /// the current generation stored in that slot.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.idx())
            .and_then(|n| n.as_ref())
            .map(|n| n.generation == id.1)
            .unwrap_or(false)
    }

    /// Returns whether the cached absolute transformation of a live node is stale.
    pub fn is_dirty(&self, id: NodeId) -> Option<bool> {
        self.node_opt(id).map(|n| n.dirty)
    }

    /// Returns true if `id` is a live scene root.
    pub fn is_scene(&self, id: NodeId) -> bool {
        self.node_opt(id).is_some_and(|n| n.scene)
    }

    /// Returns the local transformation of a live node.
    pub fn local_transform(&self, id: NodeId) -> Option<T> {
        self.node_opt(id).map(|n| n.local)
    }

    /// Returns the parent of a node if live, or `None` for roots or stale ids.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.node_opt(id).and_then(|n| n.parent)
    }

    /// Get the children of a node, or empty slice if node is stale.
    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        match self.node_opt(id) {
            Some(n) => n.children.as_slice(),
            None => &[],
        }
    }

    /// Returns the root of the tree containing `id`.
    pub fn root_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        let mut node = self.node_opt(id)?;
        while let Some(parent) = node.parent {
            current = parent;
            node = self.node(parent);
        }
        Some(current)
    }

    /// Returns the scene containing `id`, or `None` if its root is not a scene.
    pub fn scene_of(&self, id: NodeId) -> Option<NodeId> {
        self.root_of(id).filter(|&root| self.node(root).scene)
    }

    /// Compute the absolute transformation of `id` by walking to its root.
    ///
    /// This is a pure read: it ignores and does not touch any cached state.
    pub fn absolute_transformation(&self, id: NodeId) -> Option<T> {
        let mut node = self.node_opt(id)?;
        let mut absolute = node.local;
        while let Some(parent) = node.parent {
            node = self.node(parent);
            absolute = node.local.compose(&absolute);
        }
        Some(absolute)
    }

    /// Matrix form of [`Tree::absolute_transformation`].
    pub fn absolute_transformation_matrix(&self, id: NodeId) -> Option<T::Matrix> {
        self.absolute_transformation(id).map(|t| t.to_matrix())
    }

    /// Return the absolute transformation of `id`, recomputing it if stale.
    ///
    /// Walks up to the nearest clean ancestor (or the root), then back down,
    /// cleaning every node on the way and pushing fresh matrices into their
    /// features. Returns `None` for stale identifiers.
    pub fn clean(&mut self, id: NodeId) -> Option<T> {
        let node = self.node_opt(id)?;
        if !node.dirty {
            return Some(node.absolute);
        }

        let mut chain = Vec::new();
        let mut base = T::identity();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let n = self.node(current);
            if !n.dirty {
                base = n.absolute;
                break;
            }
            chain.push(current);
            cursor = n.parent;
        }
        log::trace!("cleaning {} nodes up from {id:?}", chain.len());

        let mut running = base;
        for &current in chain.iter().rev() {
            running = running.compose(&self.node(current).local);
            self.clean_node(current, running);
        }
        debug_assert!(!self.node(id).dirty, "clean left {id:?} dirty");
        Some(running)
    }

    /// Attach a feature to a live node, returning its handle.
    ///
    /// If the node is already clean the feature immediately receives the
    /// matrices it asks for; otherwise it is told its cache is dirty.
    pub fn attach_feature(&mut self, node: NodeId, mut feature: F) -> Option<FeatureId> {
        let n = self.node_opt(node)?;
        if n.dirty {
            feature.mark_dirty();
        } else {
            let absolute = n.absolute;
            let kinds = feature.cached_transformations();
            if kinds.contains(CachedTransformations::ABSOLUTE) {
                feature.clean(&absolute.to_matrix());
            }
            if kinds.contains(CachedTransformations::INVERTED_ABSOLUTE) {
                feature.clean_inverted(&absolute.inverted().to_matrix());
            }
        }

        let id = if let Some(idx) = self.feature_free_list.pop() {
            let generation = self.feature_generations[idx].saturating_add(1);
            self.feature_generations[idx] = generation;
            self.features[idx] = Some(FeatureSlot {
                generation,
                node,
                feature,
            });
            #[allow(
                clippy::cast_possible_truncation,
                reason = "FeatureId uses 32-bit indices by design."
            )]
            FeatureId::new(idx as u32, generation)
        } else {
            let generation = 1_u32;
            self.features.push(Some(FeatureSlot {
                generation,
                node,
                feature,
            }));
            self.feature_generations.push(generation);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "FeatureId uses 32-bit indices by design."
            )]
            FeatureId::new((self.features.len() - 1) as u32, generation)
        };
        self.node_mut(node).features.push(id);
        Some(id)
    }

    /// Detach a feature from its node and hand it back.
    pub fn detach_feature(&mut self, id: FeatureId) -> Option<F> {
        let slot = self.features.get(id.idx())?.as_ref()?;
        if slot.generation != id.1 {
            return None;
        }
        let slot = self.features[id.idx()].take()?;
        self.feature_free_list.push(id.idx());
        if let Some(n) = self.node_opt_mut(slot.node) {
            n.features.retain(|f| *f != id);
        }
        Some(slot.feature)
    }

    /// Access a live feature.
    pub fn feature(&self, id: FeatureId) -> Option<&F> {
        self.features
            .get(id.idx())?
            .as_ref()
            .filter(|s| s.generation == id.1)
            .map(|s| &s.feature)
    }

    /// Access a live feature mutably.
    pub fn feature_mut(&mut self, id: FeatureId) -> Option<&mut F> {
        self.features
            .get_mut(id.idx())?
            .as_mut()
            .filter(|s| s.generation == id.1)
            .map(|s| &mut s.feature)
    }

    /// Returns the node a live feature is attached to.
    pub fn feature_node(&self, id: FeatureId) -> Option<NodeId> {
        self.features
            .get(id.idx())?
            .as_ref()
            .filter(|s| s.generation == id.1)
            .map(|s| s.node)
    }

    /// Features attached to a node, in attachment order, or empty slice if node is stale.
    pub fn features_of(&self, id: NodeId) -> &[FeatureId] {
        match self.node_opt(id) {
            Some(n) => n.features.as_slice(),
            None => &[],
        }
    }
}

impl<T, F> Tree<T, F>
where
    T: Transformation,
    F: Feature<T::Matrix>,
{
    // --- internals ---

    /// Access a node; panics if `id` is stale.
    pub(crate) fn node(&self, id: NodeId) -> &Node<T> {
        self.nodes[id.idx()].as_ref().expect("dangling NodeId")
    }

    /// Access a node mutably; panics if `id` is stale.
    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        self.nodes[id.idx()].as_mut().expect("dangling NodeId")
    }

    pub(crate) fn node_opt(&self, id: NodeId) -> Option<&Node<T>> {
        let n = self.nodes.get(id.idx())?.as_ref()?;
        if n.generation != id.1 {
            return None;
        }
        Some(n)
    }

    fn node_opt_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        let n = self.nodes.get_mut(id.idx())?.as_mut()?;
        if n.generation != id.1 {
            return None;
        }
        Some(n)
    }

    fn alloc_node(&mut self, local: T, scene: bool) -> NodeId {
        let (idx, generation) = if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            self.nodes[idx] = Some(Node::new(generation, local, scene));
            #[allow(
                clippy::cast_possible_truncation,
                reason = "NodeId uses 32-bit indices by design."
            )]
            (idx as u32, generation)
        } else {
            let generation = 1_u32;
            self.nodes.push(Some(Node::new(generation, local, scene)));
            self.generations.push(generation);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "NodeId uses 32-bit indices by design."
            )]
            ((self.nodes.len() - 1) as u32, generation)
        };
        NodeId::new(idx, generation)
    }

    fn link_parent(&mut self, id: NodeId, parent: NodeId) {
        let parent_node = self.node_mut(parent);
        parent_node.children.push(id);
        self.node_mut(id).parent = Some(parent);
    }

    fn unlink_parent(&mut self, id: NodeId, parent: NodeId) {
        let p = self.node_mut(parent);
        p.children.retain(|c| *c != id);
        self.node_mut(id).parent = None;
    }

    /// Mark a subtree dirty, stopping at nodes that already are.
    fn mark_dirty(&mut self, id: NodeId) {
        let Self { nodes, features, .. } = self;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = nodes[current.idx()].as_mut() else {
                unreachable!("children of live nodes are live");
            };
            if node.dirty {
                continue;
            }
            for fid in &node.features {
                if let Some(slot) = features[fid.idx()].as_mut() {
                    slot.feature.mark_dirty();
                }
            }
            // Reversed so children are visited in order.
            stack.extend(node.children.iter().rev().copied());
            node.dirty = true;
        }
    }

    /// Store `absolute` as the cached transformation of `id`, push matrices
    /// into its features, and mark it clean.
    ///
    /// The matrix and its inverse are computed at most once, and only if some
    /// feature asks for them.
    pub(crate) fn clean_node(&mut self, id: NodeId, absolute: T) {
        let Self { nodes, features, .. } = self;
        let Some(node) = nodes[id.idx()].as_mut() else {
            unreachable!("only live nodes are cleaned");
        };

        let mut matrix = None;
        let mut inverted = None;
        for fid in &node.features {
            let Some(slot) = features[fid.idx()].as_mut() else {
                continue;
            };
            let kinds = slot.feature.cached_transformations();
            if kinds.contains(CachedTransformations::ABSOLUTE) {
                let m = matrix.get_or_insert_with(|| absolute.to_matrix());
                slot.feature.clean(m);
            }
            if kinds.contains(CachedTransformations::INVERTED_ABSOLUTE) {
                let m = inverted.get_or_insert_with(|| absolute.inverted().to_matrix());
                slot.feature.clean_inverted(m);
            }
        }

        node.absolute = absolute;
        node.dirty = false;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use kurbo::Vec2;

    /// Feature that records every call it receives.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct Probe {
        pub(crate) kinds: CachedTransformations,
        pub(crate) absolute: Option<Affine>,
        pub(crate) inverted: Option<Affine>,
        pub(crate) cleans: usize,
        pub(crate) dirty_marks: usize,
    }

    impl Probe {
        pub(crate) fn wanting(kinds: CachedTransformations) -> Self {
            Self {
                kinds,
                ..Self::default()
            }
        }
    }

    impl Feature<Affine> for Probe {
        fn cached_transformations(&self) -> CachedTransformations {
            self.kinds
        }

        fn clean(&mut self, absolute: &Affine) {
            self.absolute = Some(*absolute);
            self.cleans += 1;
        }

        fn clean_inverted(&mut self, inverted_absolute: &Affine) {
            self.inverted = Some(*inverted_absolute);
        }

        fn mark_dirty(&mut self) {
            self.dirty_marks += 1;
        }
    }

    pub(crate) fn translate(x: f64, y: f64) -> Affine {
        Affine::translate(Vec2::new(x, y))
    }

    /// Scene root `r`, `a` under it, `b` under `a`.
    pub(crate) fn small_scene() -> (Tree<Affine, Probe>, NodeId, NodeId, NodeId) {
        let mut tree = Tree::default();
        let r = tree.insert_scene(Affine::IDENTITY);
        let a = tree.insert(Some(r), translate(1.0, 0.0)).unwrap();
        let b = tree.insert(Some(a), translate(0.0, 1.0)).unwrap();
        (tree, r, a, b)
    }

    #[test]
    fn absolute_follows_parent_chain() {
        let (mut tree, r, a, b) = small_scene();
        assert_eq!(tree.absolute_transformation(b), Some(translate(1.0, 1.0)));

        let c = tree.insert(Some(r), translate(5.0, 5.0)).unwrap();
        tree.set_parent(a, Some(c)).unwrap();
        assert_eq!(tree.absolute_transformation(b), Some(translate(6.0, 6.0)));
        assert_eq!(tree.parent_of(a), Some(c));
        assert_eq!(tree.children_of(r), &[c]);
    }

    #[test]
    fn absolute_matches_parent_composition() {
        let (mut tree, r, a, b) = small_scene();
        let c = tree.insert(Some(a), Affine::scale(2.0)).unwrap();
        let d = tree.insert(Some(c), translate(3.0, 0.5)).unwrap();
        tree.set_local_transform(r, translate(-1.0, 4.0));
        for id in [a, b, c, d] {
            let parent = tree.parent_of(id).unwrap();
            let expected = tree
                .absolute_transformation(parent)
                .unwrap()
                .compose(&tree.local_transform(id).unwrap());
            assert_eq!(tree.absolute_transformation(id), Some(expected));
        }
        assert_eq!(tree.absolute_transformation(r), tree.local_transform(r));
    }

    #[test]
    fn cycle_is_rejected_without_mutation() {
        let (mut tree, r, a, b) = small_scene();
        assert_eq!(
            tree.set_parent(a, Some(b)),
            Err(SceneError::Cycle { node: a, parent: b })
        );
        assert_eq!(
            tree.set_parent(a, Some(a)),
            Err(SceneError::Cycle { node: a, parent: a })
        );
        assert_eq!(tree.parent_of(a), Some(r));
        assert_eq!(tree.parent_of(b), Some(a));

        // Scenes never get a parent.
        tree.clean(b);
        assert_eq!(tree.set_parent(r, Some(b)), Ok(()));
        assert_eq!(tree.parent_of(r), None);
        assert_eq!(tree.is_dirty(b), Some(false));
    }

    #[test]
    fn same_parent_is_noop() {
        let (mut tree, r, a, _) = small_scene();
        tree.clean(a);
        tree.set_parent(a, Some(r)).unwrap();
        assert_eq!(tree.is_dirty(a), Some(false));
    }

    #[test]
    fn reparent_marks_subtree_dirty() {
        let (mut tree, r, a, b) = small_scene();
        let c = tree.insert(Some(r), translate(5.0, 5.0)).unwrap();
        tree.clean(b);
        tree.clean(c);
        tree.set_parent(a, Some(c)).unwrap();
        assert_eq!(tree.is_dirty(a), Some(true));
        assert_eq!(tree.is_dirty(b), Some(true));
        assert_eq!(tree.is_dirty(c), Some(false));
        assert_eq!(tree.clean(b), Some(translate(6.0, 6.0)));
    }

    #[test]
    fn set_dirty_reaches_descendants_and_features_only() {
        let (mut tree, r, a, b) = small_scene();
        let fr = tree
            .attach_feature(r, Probe::wanting(CachedTransformations::ABSOLUTE))
            .unwrap();
        let fb = tree
            .attach_feature(b, Probe::wanting(CachedTransformations::ABSOLUTE))
            .unwrap();
        tree.clean(b);
        let marks_before = tree.feature(fb).unwrap().dirty_marks;

        tree.set_dirty(a);
        assert_eq!(tree.is_dirty(r), Some(false));
        assert_eq!(tree.is_dirty(a), Some(true));
        assert_eq!(tree.is_dirty(b), Some(true));
        assert_eq!(tree.feature(fb).unwrap().dirty_marks, marks_before + 1);
        assert_eq!(tree.feature(fr).unwrap().dirty_marks, 1);

        // Already dirty: nothing is notified again.
        tree.set_dirty(a);
        assert_eq!(tree.feature(fb).unwrap().dirty_marks, marks_before + 1);
    }

    #[test]
    fn clean_is_idempotent() {
        let (mut tree, _, _, b) = small_scene();
        let fb = tree
            .attach_feature(b, Probe::wanting(CachedTransformations::ABSOLUTE))
            .unwrap();
        let first = tree.clean(b);
        let second = tree.clean(b);
        assert_eq!(first, Some(translate(1.0, 1.0)));
        assert_eq!(first, second);
        assert_eq!(tree.is_dirty(b), Some(false));
        assert_eq!(tree.feature(fb).unwrap().cleans, 1);
    }

    #[test]
    fn clean_stops_at_clean_ancestor() {
        let (mut tree, _, a, b) = small_scene();
        let fa = tree
            .attach_feature(a, Probe::wanting(CachedTransformations::ABSOLUTE))
            .unwrap();
        tree.clean(a);
        assert_eq!(tree.feature(fa).unwrap().cleans, 1);

        tree.set_local_transform(b, translate(0.0, 3.0));
        assert_eq!(tree.clean(b), Some(translate(1.0, 3.0)));
        assert_eq!(tree.feature(fa).unwrap().cleans, 1);
    }

    #[test]
    fn features_receive_requested_matrices() {
        let (mut tree, _, _, b) = small_scene();
        let plain = tree
            .attach_feature(b, Probe::wanting(CachedTransformations::ABSOLUTE))
            .unwrap();
        let inverse = tree
            .attach_feature(
                b,
                Probe::wanting(CachedTransformations::INVERTED_ABSOLUTE),
            )
            .unwrap();
        let both = tree
            .attach_feature(b, Probe::wanting(CachedTransformations::all()))
            .unwrap();
        let none = tree.attach_feature(b, Probe::default()).unwrap();
        tree.clean(b);

        let expected = translate(1.0, 1.0);
        let expected_inverse = translate(-1.0, -1.0);
        assert_eq!(tree.feature(plain).unwrap().absolute, Some(expected));
        assert_eq!(tree.feature(plain).unwrap().inverted, None);
        assert_eq!(tree.feature(inverse).unwrap().absolute, None);
        assert_eq!(
            tree.feature(inverse).unwrap().inverted,
            Some(expected_inverse)
        );
        assert_eq!(tree.feature(both).unwrap().absolute, Some(expected));
        assert_eq!(tree.feature(both).unwrap().inverted, Some(expected_inverse));
        assert_eq!(tree.feature(none).unwrap().absolute, None);
        assert_eq!(tree.features_of(b), &[plain, inverse, both, none]);
    }

    static TO_MATRIX: AtomicUsize = AtomicUsize::new(0);
    static INVERTED: AtomicUsize = AtomicUsize::new(0);

    /// One-dimensional offset that counts matrix conversions and inversions.
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Offset(i64);

    impl Transformation for Offset {
        type Matrix = i64;

        fn identity() -> Self {
            Self(0)
        }

        fn compose(&self, other: &Self) -> Self {
            Self(self.0 + other.0)
        }

        fn inverted(&self) -> Self {
            INVERTED.fetch_add(1, Ordering::Relaxed);
            Self(-self.0)
        }

        fn to_matrix(&self) -> i64 {
            TO_MATRIX.fetch_add(1, Ordering::Relaxed);
            self.0
        }

        fn from_matrix(matrix: &i64) -> Self {
            Self(*matrix)
        }
    }

    #[derive(Default)]
    struct Both {
        absolute: Option<i64>,
        inverted: Option<i64>,
    }

    impl Feature<i64> for Both {
        fn cached_transformations(&self) -> CachedTransformations {
            CachedTransformations::all()
        }

        fn clean(&mut self, absolute: &i64) {
            self.absolute = Some(*absolute);
        }

        fn clean_inverted(&mut self, inverted_absolute: &i64) {
            self.inverted = Some(*inverted_absolute);
        }
    }

    #[test]
    fn matrices_are_computed_once_per_clean() {
        let mut tree: Tree<Offset, Both> = Tree::default();
        let r = tree.insert_scene(Offset(1));
        let a = tree.insert(Some(r), Offset(2)).unwrap();
        let ids = [
            tree.attach_feature(a, Both::default()).unwrap(),
            tree.attach_feature(a, Both::default()).unwrap(),
            tree.attach_feature(a, Both::default()).unwrap(),
        ];

        TO_MATRIX.store(0, Ordering::Relaxed);
        INVERTED.store(0, Ordering::Relaxed);
        assert_eq!(tree.clean(a), Some(Offset(3)));
        // One matrix and one inverse matrix, shared by all three features.
        assert_eq!(TO_MATRIX.load(Ordering::Relaxed), 2);
        assert_eq!(INVERTED.load(Ordering::Relaxed), 1);
        for id in ids {
            let feature = tree.feature(id).unwrap();
            assert_eq!(feature.absolute, Some(3));
            assert_eq!(feature.inverted, Some(-3));
        }

        // A clean node computes nothing.
        assert_eq!(tree.clean(a), Some(Offset(3)));
        assert_eq!(TO_MATRIX.load(Ordering::Relaxed), 2);
        assert_eq!(INVERTED.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn late_feature_on_clean_node_is_filled() {
        let (mut tree, _, a, _) = small_scene();
        tree.clean(a);
        let f = tree
            .attach_feature(a, Probe::wanting(CachedTransformations::ABSOLUTE))
            .unwrap();
        assert_eq!(tree.feature(f).unwrap().absolute, Some(translate(1.0, 0.0)));
        assert_eq!(tree.feature(f).unwrap().dirty_marks, 0);
    }

    #[test]
    fn detach_feature_returns_it() {
        let (mut tree, _, a, _) = small_scene();
        let f = tree.attach_feature(a, Probe::default()).unwrap();
        assert_eq!(tree.feature_node(f), Some(a));
        let probe = tree.detach_feature(f);
        assert!(probe.is_some());
        assert!(tree.feature(f).is_none());
        assert!(tree.features_of(a).is_empty());
        assert!(tree.detach_feature(f).is_none());

        // Slot reuse bumps the generation.
        let g = tree.attach_feature(a, Probe::default()).unwrap();
        assert_ne!(f, g);
        assert!(tree.feature(f).is_none());
        assert!(tree.feature_mut(g).is_some());
    }

    #[test]
    fn remove_drops_subtree_and_features() {
        let (mut tree, r, a, b) = small_scene();
        let fb = tree.attach_feature(b, Probe::default()).unwrap();
        tree.remove(a);
        assert!(!tree.is_alive(a));
        assert!(!tree.is_alive(b));
        assert!(tree.feature(fb).is_none());
        assert!(tree.children_of(r).is_empty());
        assert_eq!(tree.len(), 1);

        let c = tree.insert(Some(r), translate(2.0, 0.0)).unwrap();
        assert!(tree.is_alive(c));
        assert!(!tree.is_alive(a));
        assert!(!tree.is_alive(b));
        assert_eq!(tree.clean(a), None);
        assert_eq!(tree.absolute_transformation(b), None);
    }

    #[test]
    fn insert_under_stale_parent_fails() {
        let (mut tree, _, a, _) = small_scene();
        tree.remove(a);
        assert_eq!(
            tree.insert(Some(a), Affine::IDENTITY),
            Err(SceneError::StaleNode(a))
        );
    }

    #[test]
    fn detached_roots_can_join_a_scene() {
        let (mut tree, r, a, _) = small_scene();
        let loose = tree.insert(None, translate(7.0, 0.0)).unwrap();
        assert!(!tree.is_scene(loose));
        assert_eq!(tree.root_of(loose), Some(loose));
        assert_eq!(tree.scene_of(loose), None);

        tree.set_parent(loose, Some(a)).unwrap();
        assert_eq!(tree.scene_of(loose), Some(r));
        assert_eq!(tree.clean(loose), Some(translate(8.0, 0.0)));

        tree.set_parent(loose, None).unwrap();
        assert_eq!(tree.root_of(loose), Some(loose));
        assert_eq!(tree.clean(loose), Some(translate(7.0, 0.0)));
    }

    #[test]
    fn transform_composes_on_either_side() {
        let (mut tree, _, a, _) = small_scene();
        tree.transform(a, Affine::scale(2.0));
        assert_eq!(
            tree.local_transform(a),
            Some(Affine::new([2.0, 0.0, 0.0, 2.0, 2.0, 0.0]))
        );
        tree.reset_transformation(a);
        tree.set_local_transform(a, translate(1.0, 0.0));
        tree.transform_local(a, Affine::scale(2.0));
        assert_eq!(
            tree.local_transform(a),
            Some(Affine::new([2.0, 0.0, 0.0, 2.0, 1.0, 0.0]))
        );
        assert_eq!(tree.is_dirty(a), Some(true));
        tree.reset_transformation(a);
        assert_eq!(tree.local_transform(a), Some(Affine::IDENTITY));
    }

    #[test]
    fn boxed_features_share_a_tree() {
        let mut tree = Tree::new();
        let scene = tree.insert_scene(translate(1.0, 2.0));
        let f = tree
            .attach_feature(
                scene,
                Box::new(Probe::wanting(CachedTransformations::ABSOLUTE)),
            )
            .unwrap();
        assert_eq!(tree.clean(scene), Some(translate(1.0, 2.0)));
        assert_eq!(tree.features_of(scene), &[f]);
        assert_eq!(
            tree.absolute_transformation_matrix(scene),
            Some(translate(1.0, 2.0))
        );
    }
}

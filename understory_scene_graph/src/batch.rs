// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Batched absolute transformations.
//!
//! Resolving many nodes one by one re-walks every ancestor segment they share.
//! The batch engine instead splits the nodes involved into two groups:
//!
//! - *joints*: the requested nodes, plus every node where two or more
//!   requested paths meet on their way to the root;
//! - *non-joints*: the plain paths between joints.
//!
//! Each joint's transformation relative to its nearest joint ancestor is
//! computed once by walking its path segment, then the joint chains are
//! composed top-down. Every node is visited a constant number of times, so the
//! total work is proportional to the number of distinct nodes on the requested
//! paths.
//!
//! All bookkeeping lives in a map owned by the call; nodes carry no scratch
//! state between calls.

use alloc::{vec, vec::Vec};
use hashbrown::{HashMap, HashSet};

use crate::error::SceneError;
use crate::feature::Feature;
use crate::transformation::Transformation;
use crate::tree::Tree;
use crate::types::NodeId;

#[derive(Clone, Copy, Debug, Default)]
struct Scratch {
    visited: bool,
    /// Index into the joint list, once the node is known to be a joint.
    joint: Option<usize>,
}

/// Transformation of a joint relative to its nearest joint ancestor, or to
/// the batch initial transformation if the path reached the root.
#[derive(Clone, Copy, Debug)]
struct Segment<T> {
    relative: T,
    parent_joint: Option<usize>,
}

impl<T, F> Tree<T, F>
where
    T: Transformation,
    F: Feature<T::Matrix>,
{
    /// Compute absolute transformations for many nodes at once.
    ///
    /// Returns, for every entry of `objects` (duplicates included, in order),
    /// `initial.compose(&absolute)`. Cached state is neither read nor written.
    ///
    /// The batch is anchored at `root`, which must be a node without a parent,
    /// and every object must descend from it.
    ///
    /// # Errors
    ///
    /// - [`SceneError::StaleNode`] if `root` or any object is not alive.
    /// - [`SceneError::NotRoot`] if `root` has a parent.
    /// - [`SceneError::NotOneTree`] if an object belongs to another tree.
    /// - [`SceneError::TooLarge`] if the batch tracks more joints than
    ///   [`SceneConfig::batch_capacity`](crate::SceneConfig::batch_capacity).
    pub fn transformations(
        &self,
        root: NodeId,
        objects: &[NodeId],
        initial: T,
    ) -> Result<Vec<T>, SceneError> {
        let root_node = self.node_opt(root).ok_or(SceneError::StaleNode(root))?;
        if root_node.parent.is_some() {
            return Err(SceneError::NotRoot(root));
        }
        if let Some(&stale) = objects.iter().find(|&&id| !self.is_alive(id)) {
            return Err(SceneError::StaleNode(stale));
        }
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        // Requested objects are the first joints. Duplicates share the joint
        // of their first occurrence.
        let mut scratch: HashMap<NodeId, Scratch> = HashMap::with_capacity(objects.len() * 2);
        let mut joints = Vec::with_capacity(objects.len());
        let mut object_joints = Vec::with_capacity(objects.len());
        for &id in objects {
            let entry = scratch.entry(id).or_default();
            let joint = *entry.joint.get_or_insert_with(|| {
                joints.push(id);
                joints.len() - 1
            });
            object_joints.push(joint);
        }
        let capacity = self.config().batch_capacity;
        if joints.len() > capacity {
            log::debug!(
                "rejected batch of {} distinct objects, capacity is {capacity}",
                joints.len()
            );
            return Err(SceneError::TooLarge {
                requested: joints.len(),
                capacity,
            });
        }

        self.discover_joints(root, &mut scratch, &mut joints)?;
        let segments = self.joint_segments(&scratch, &joints);
        let absolute = compose_segments(&segments, initial);
        log::trace!(
            "batch of {} objects resolved through {} joints",
            objects.len(),
            joints.len()
        );

        Ok(object_joints.into_iter().map(|j| absolute[j]).collect())
    }

    /// Matrix form of [`Tree::transformations`].
    ///
    /// `initial` is converted with [`Transformation::from_matrix`] and every
    /// result with [`Transformation::to_matrix`].
    pub fn transformation_matrices(
        &self,
        root: NodeId,
        objects: &[NodeId],
        initial: &T::Matrix,
    ) -> Result<Vec<T::Matrix>, SceneError> {
        let transformations = self.transformations(root, objects, T::from_matrix(initial))?;
        Ok(transformations.iter().map(T::to_matrix).collect())
    }

    /// Clean many nodes with a single batch computation.
    ///
    /// Already-clean objects are skipped. The dirty ones and their dirty
    /// ancestors are resolved together from their shared root, then each is
    /// cleaned once and its features receive fresh matrices.
    ///
    /// # Errors
    ///
    /// - [`SceneError::StaleNode`] for dead identifiers.
    /// - [`SceneError::NotOneTree`] if the dirty objects do not share a root.
    /// - [`SceneError::TooLarge`] if the dirty objects, their dirty ancestors
    ///   and the branch points between them exceed
    ///   [`SceneConfig::batch_capacity`](crate::SceneConfig::batch_capacity).
    ///   Dirty ancestors count, so a single deep object can be enough.
    ///
    /// On error nothing is cleaned.
    pub fn clean_many(&mut self, objects: &[NodeId]) -> Result<(), SceneError> {
        if let Some(&stale) = objects.iter().find(|&&id| !self.is_alive(id)) {
            return Err(SceneError::StaleNode(stale));
        }
        let mut pending: Vec<NodeId> = objects
            .iter()
            .copied()
            .filter(|&id| self.node(id).dirty)
            .collect();
        let Some(&first) = pending.first() else {
            return Ok(());
        };

        // Pull in dirty ancestors, each once.
        let mut seen: HashSet<NodeId> = HashSet::with_capacity(pending.len());
        for i in 0..pending.len() {
            let id = pending[i];
            if !seen.insert(id) {
                continue;
            }
            let mut parent = self.node(id).parent;
            while let Some(p) = parent
                && !seen.contains(&p)
                && self.node(p).dirty
            {
                seen.insert(p);
                pending.push(p);
                parent = self.node(p).parent;
            }
        }

        let Some(root) = self.root_of(first) else {
            unreachable!("{first:?} was checked to be alive");
        };
        let transformations = self.transformations(root, &pending, T::identity())?;

        for (&id, &absolute) in pending.iter().zip(&transformations) {
            // Duplicates are cleaned by their first occurrence.
            if self.node(id).dirty {
                self.clean_node(id, absolute);
            }
        }
        debug_assert!(
            pending.iter().all(|&id| !self.node(id).dirty),
            "clean_many left dirty nodes behind"
        );
        Ok(())
    }

    /// Walk every requested path up until it meets another one or the root,
    /// promoting meeting points to joints.
    fn discover_joints(
        &self,
        root: NodeId,
        scratch: &mut HashMap<NodeId, Scratch>,
        joints: &mut Vec<NodeId>,
    ) -> Result<(), SceneError> {
        let capacity = self.config().batch_capacity;
        let mut working = joints.clone();
        let mut cursor = 0;
        while !working.is_empty() {
            let current = working[cursor];
            let entry = scratch.entry(current).or_default();
            if entry.visited {
                // Another path already came through here.
                working.swap_remove(cursor);
            } else {
                entry.visited = true;
                match self.node(current).parent {
                    None => {
                        if current != root {
                            log::debug!("batch object root {current:?} is not {root:?}");
                            return Err(SceneError::NotOneTree);
                        }
                        working.swap_remove(cursor);
                    }
                    Some(parent) => {
                        let parent_entry = scratch.entry(parent).or_default();
                        if parent_entry.visited || parent_entry.joint.is_some() {
                            working.swap_remove(cursor);
                            if parent_entry.joint.is_none() {
                                if joints.len() >= capacity {
                                    return Err(SceneError::TooLarge {
                                        requested: joints.len() + 1,
                                        capacity,
                                    });
                                }
                                parent_entry.joint = Some(joints.len());
                                joints.push(parent);
                            }
                        } else {
                            working[cursor] = parent;
                        }
                    }
                }
            }
            if cursor >= working.len() {
                cursor = 0;
            }
        }
        Ok(())
    }

    /// Compose each joint's local transformation with the non-joint path
    /// above it.
    fn joint_segments(
        &self,
        scratch: &HashMap<NodeId, Scratch>,
        joints: &[NodeId],
    ) -> Vec<Segment<T>> {
        joints
            .iter()
            .map(|&joint| {
                let mut node = self.node(joint);
                let mut relative = node.local;
                loop {
                    let Some(parent) = node.parent else {
                        return Segment {
                            relative,
                            parent_joint: None,
                        };
                    };
                    if let Some(k) = scratch.get(&parent).and_then(|s| s.joint) {
                        return Segment {
                            relative,
                            parent_joint: Some(k),
                        };
                    }
                    node = self.node(parent);
                    relative = node.local.compose(&relative);
                }
            })
            .collect()
    }
}

/// Resolve joint segments into absolute transformations, parents first.
fn compose_segments<T: Transformation>(segments: &[Segment<T>], initial: T) -> Vec<T> {
    let mut absolute: Vec<Option<T>> = vec![None; segments.len()];
    let mut chain = Vec::new();
    for start in 0..segments.len() {
        let mut cursor = Some(start);
        while let Some(j) = cursor
            && absolute[j].is_none()
        {
            chain.push(j);
            cursor = segments[j].parent_joint;
        }
        while let Some(j) = chain.pop() {
            let segment = segments[j];
            let base = match segment.parent_joint {
                Some(k) => {
                    let Some(base) = absolute[k] else {
                        unreachable!("parent joint {k} is composed before {j}");
                    };
                    base
                }
                None => initial,
            };
            absolute[j] = Some(base.compose(&segment.relative));
        }
    }
    absolute
        .into_iter()
        .map(|t| match t {
            Some(t) => t,
            None => unreachable!("every joint is composed"),
        })
        .collect()
}

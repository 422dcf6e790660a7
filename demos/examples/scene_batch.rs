// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scene graph walkthrough: build a small arm rig, move it around, and resolve
//! world transforms both one node at a time and in a single batch.
//!
//! Run:
//! - `cargo run -p understory_demos --example scene_batch`

use kurbo::{Affine, Point, Vec2};
use understory_scene_graph::{CachedTransformations, Feature, SceneError, Tree};

/// Tracks where a node's origin lands in world space.
#[derive(Debug, Default)]
struct Marker {
    name: &'static str,
    world_origin: Option<Point>,
}

impl Marker {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            world_origin: None,
        }
    }
}

impl Feature<Affine> for Marker {
    fn cached_transformations(&self) -> CachedTransformations {
        CachedTransformations::ABSOLUTE
    }

    fn clean(&mut self, absolute: &Affine) {
        self.world_origin = Some(*absolute * Point::ORIGIN);
    }

    fn mark_dirty(&mut self) {
        self.world_origin = None;
    }
}

fn main() {
    let mut tree: Tree<Affine, Marker> = Tree::default();
    let scene = tree.insert_scene(Affine::IDENTITY);
    let shoulder = tree
        .insert(Some(scene), Affine::translate(Vec2::new(1.0, 0.0)))
        .unwrap();
    let elbow = tree
        .insert(Some(shoulder), Affine::translate(Vec2::new(0.0, 1.0)))
        .unwrap();
    let wrist = tree
        .insert(Some(elbow), Affine::translate(Vec2::new(0.0, 1.0)))
        .unwrap();
    let thumb = tree
        .insert(Some(wrist), Affine::translate(Vec2::new(0.5, 0.0)))
        .unwrap();
    let finger = tree
        .insert(Some(wrist), Affine::translate(Vec2::new(0.0, 0.5)))
        .unwrap();

    let markers = [
        tree.attach_feature(thumb, Marker::new("thumb")).unwrap(),
        tree.attach_feature(finger, Marker::new("finger")).unwrap(),
    ];

    println!("== One batch, shared arm segment ==");
    let world = tree
        .transformations(scene, &[thumb, finger, elbow], Affine::IDENTITY)
        .unwrap();
    for (name, t) in ["thumb", "finger", "elbow"].iter().zip(&world) {
        println!("{name:>7}: {:?}", *t * Point::ORIGIN);
    }

    println!("\n== Clean through features ==");
    tree.clean_many(&[thumb, finger]).unwrap();
    for id in markers {
        let marker = tree.feature(id).unwrap();
        println!("{:>7}: {:?}", marker.name, marker.world_origin);
    }

    println!("\n== Rotate the shoulder ==");
    tree.transform_local(shoulder, Affine::rotate(core::f64::consts::FRAC_PI_2));
    for id in markers {
        let marker = tree.feature(id).unwrap();
        println!("{:>7}: {:?} (dirty)", marker.name, marker.world_origin);
    }
    tree.clean(thumb);
    tree.clean(finger);
    for id in markers {
        let marker = tree.feature(id).unwrap();
        println!("{:>7}: {:?}", marker.name, marker.world_origin);
    }

    println!("\n== Rejected edits ==");
    match tree.set_parent(shoulder, Some(thumb)) {
        Err(SceneError::Cycle { node, parent }) => {
            println!("cannot move {node:?} under its own descendant {parent:?}");
        }
        other => println!("unexpected: {other:?}"),
    }
    let other_scene = tree.insert_scene(Affine::IDENTITY);
    match tree.transformations(other_scene, &[thumb], Affine::IDENTITY) {
        Err(err) => println!("batch from the wrong scene: {err}"),
        Ok(_) => println!("unexpected success"),
    }
}

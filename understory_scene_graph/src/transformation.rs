// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The transformation algebra consumed by the tree.

use core::fmt::Debug;

use kurbo::{Affine, TranslateScale};

/// A transformation type that nodes can carry as their local transform.
///
/// The tree never inspects a transformation; it only composes, inverts, and
/// converts them. Composition follows the usual matrix convention:
/// `a.compose(&b)` applies `b` first and `a` second, so a node's absolute
/// transformation is `parent_absolute.compose(&local)`.
pub trait Transformation: Copy + Debug {
    /// Matrix form handed to [`Feature`](crate::Feature)s.
    type Matrix;

    /// The identity transformation.
    fn identity() -> Self;

    /// Returns `self` applied after `other`.
    #[must_use]
    fn compose(&self, other: &Self) -> Self;

    /// Returns the inverse transformation.
    #[must_use]
    fn inverted(&self) -> Self;

    /// Converts to matrix form.
    fn to_matrix(&self) -> Self::Matrix;

    /// Converts from matrix form.
    fn from_matrix(matrix: &Self::Matrix) -> Self;
}

impl Transformation for Affine {
    type Matrix = Self;

    fn identity() -> Self {
        Self::IDENTITY
    }

    fn compose(&self, other: &Self) -> Self {
        *self * *other
    }

    fn inverted(&self) -> Self {
        self.inverse()
    }

    fn to_matrix(&self) -> Self {
        *self
    }

    fn from_matrix(matrix: &Self) -> Self {
        *matrix
    }
}

/// Uniform scale plus translation.
///
/// [`from_matrix`](Transformation::from_matrix) keeps the translation and the
/// scale of the x axis; rotation and shear in the matrix are dropped.
impl Transformation for TranslateScale {
    type Matrix = Affine;

    fn identity() -> Self {
        Self::scale(1.0)
    }

    fn compose(&self, other: &Self) -> Self {
        *self * *other
    }

    fn inverted(&self) -> Self {
        self.inverse()
    }

    fn to_matrix(&self) -> Affine {
        Affine::from(*self)
    }

    fn from_matrix(matrix: &Affine) -> Self {
        let [a, ..] = matrix.as_coeffs();
        Self::new(matrix.translation(), a)
    }
}

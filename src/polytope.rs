//! Random walks confined to the Birkhoff polytope.
//!
//! A polytope instance owns one bistochastic matrix — its "current point" —
//! and exposes a small capability set: read the point, replace it, propose a
//! random feasible direction, and move along a direction by a bounded step.
//! Alternative walk strategies implement [`BirkhoffPolytope`] without the
//! learner having to care which one it drives.
//!
//! The one concrete strategy here, [`VertexCurvePolytope`], walks the
//! polytope's 1-skeleton: each direction is a scaled difference of two
//! permutation matrices, which keeps every row and column sum invariant by
//! construction (the same total mass is added and removed per row and per
//! column), and the scaling bound keeps every entry non-negative for any step
//! in `[0, 1)`. No renormalization ever runs after a move.

use crate::{matrix, Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::RngCore;

/// A mutable current point inside the Birkhoff polytope, plus the geometry
/// operations a random-walk learner needs.
pub trait BirkhoffPolytope {
    /// Row (and column) count of the matrices this polytope holds.
    fn dim(&self) -> usize;

    /// The current point, as a read-only snapshot. Clone it before proposing
    /// a move if you need rollback.
    fn current_point(&self) -> ArrayView2<'_, f64>;

    /// Replace the current point.
    ///
    /// Only the dimension is checked; full bistochasticity validation is
    /// deliberately skipped for speed, so callers are trusted to hand over a
    /// valid point. This is a documented relaxation, not an oversight.
    fn set_current_point(&mut self, point: Array2<f64>) -> Result<()>;

    /// A random feasible direction from the current point, flattened
    /// row-major. Moving along it by any step in `[0, 1)` stays inside the
    /// polytope.
    fn random_direction(&self, rng: &mut dyn RngCore) -> Array1<f64>;

    /// Move the current point along `direction` by `inc`, which must satisfy
    /// `0 <= inc < 1`. On error the point is untouched.
    fn move_point(&mut self, direction: &ArrayView1<f64>, inc: f64) -> Result<()>;
}

/// The vertex-curve strategy: directions are differences of two random
/// permutation matrices, scaled to the largest step the current point admits.
#[derive(Debug, Clone)]
pub struct VertexCurvePolytope {
    n: usize,
    point: Array2<f64>,
}

impl VertexCurvePolytope {
    /// A polytope at the uniform bistochastic point (every entry `1/n`).
    pub fn new(n: usize) -> Self {
        Self {
            n,
            point: matrix::uniform_bistoc(n),
        }
    }
}

impl BirkhoffPolytope for VertexCurvePolytope {
    fn dim(&self) -> usize {
        self.n
    }

    fn current_point(&self) -> ArrayView2<'_, f64> {
        self.point.view()
    }

    fn set_current_point(&mut self, point: Array2<f64>) -> Result<()> {
        if point.nrows() != self.n || point.ncols() != self.n {
            return Err(Error::Shape("point dimension must match the polytope"));
        }
        self.point = point;
        Ok(())
    }

    fn random_direction(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let n = self.n;
        let p1 = matrix::random_permutation_sparse(rng, n);
        let p2 = matrix::random_permutation_sparse(rng, n);

        // The maximal coefficient each permutation admits is the minimal
        // entry of the point along it: adding more than 1-α at the p1
        // positions would push an entry past 1 elsewhere, and subtracting
        // more than β at the p2 positions would go negative.
        let mut alpha = f64::INFINITY;
        let mut beta = f64::INFINITY;
        for i in 0..n {
            alpha = alpha.min(self.point[[i, p1[i]]]);
            beta = beta.min(self.point[[i, p2[i]]]);
        }
        let u = (1.0 - alpha).min(beta);

        // Accumulate rather than assign: p1 and p2 may overlap.
        let mut dir = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            dir[[i, p1[i]]] += u;
            dir[[i, p2[i]]] -= u;
        }
        matrix::flatten(&dir.view())
    }

    fn move_point(&mut self, direction: &ArrayView1<f64>, inc: f64) -> Result<()> {
        if !(0.0..1.0).contains(&inc) {
            return Err(Error::Domain("increment must satisfy 0 <= inc < 1"));
        }

        let mut tmp = Array2::<f64>::zeros((self.n, self.n));
        matrix::multiply_flat(&mut tmp, direction, inc)?;
        self.point += &tmp;
        Ok(())
    }
}

//! # birkhoff
//!
//! Birkhoff–von Neumann machinery for doubly stochastic ("bistochastic")
//! matrices: decomposition into weighted permutation matrices, permutation
//! sampling, random walks on the Birkhoff polytope, and a Metropolis–Hastings
//! learner that jointly searches a family of bistochastic matrices against a
//! caller-supplied, sample-based loss.
//!
//! This crate is intentionally small:
//!
//! - it implements the **core numerics** (permanents, polytope walks, BvN
//!   peeling, permutation sampling, the MH loop),
//! - it does not provide a CLI, logging, or an experiment runner (that belongs
//!   to driver layers).
//!
//! ## Public invariants (must not change)
//!
//! - **Determinism knobs are explicit**: anything random takes an RNG or a
//!   `seed` parameter; there is no process-global RNG state.
//! - **No hidden normalization**: `VertexCurvePolytope::set_current_point`
//!   checks dimensions only and trusts its caller on bistochasticity (a
//!   documented relaxation); `sinkhorn::balance` is the one place matrices are
//!   renormalized, and it says so.
//! - **Polytope moves preserve feasibility exactly**: a vertex-curve direction
//!   plus any step in `[0, 1)` keeps row sums, column sums, and
//!   non-negativity without renormalization.
//! - **Best-found tracking is decoupled from the walk**: accepting or
//!   rejecting a proposal never touches the best-so-far sample set; only
//!   individual loss evaluations do.
//!
//! ## Complexity caveat
//!
//! [`matrix::permanent`] is Ryser's inclusion–exclusion formula, O(2^n · n²).
//! It is correct for any n it accepts but intended for small n (tens, not
//! hundreds); exact permutation sampling inherits this cost.
//!
//! ## References (conceptual anchors)
//!
//! - Birkhoff (1946): every doubly stochastic matrix is a convex combination
//!   of permutation matrices (the Birkhoff polytope's vertices).
//! - Ryser (1963): permanent via inclusion–exclusion.
//! - Sinkhorn & Knopp (1967): alternating row/column balancing.
//! - Hastings (1970): the Metropolis–Hastings acceptance rule used by the
//!   joint learner.
//!
//! ## Module map
//!
//! - `matrix`: dense-matrix primitives (permanent, permutations, directions)
//! - `polytope`: random walks confined to the Birkhoff polytope's 1-skeleton
//! - `sinkhorn`: in-place doubly-stochastic balancing
//! - `decomp`: BvN decomposition and permutation sampling
//! - `learner`: joint Metropolis–Hastings search over several polytopes

pub mod decomp;
pub mod learner;
pub mod matrix;
pub mod polytope;
pub mod sinkhorn;

/// birkhoff error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

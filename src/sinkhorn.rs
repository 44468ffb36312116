//! In-place Sinkhorn balancing of non-negative square matrices.
//!
//! Alternates row and column normalization until every marginal sum is within
//! tolerance of 1:
//!
//! ```text
//! M[i,:] /= Σⱼ M[i,j]    then    M[:,j] /= Σᵢ M[i,j]
//! ```
//!
//! For a matrix with total support this converges to the unique
//! doubly-stochastic matrix of the form `D₁ M D₂` (Sinkhorn & Knopp, 1967).
//! This is the crate's one normalization entry point; nothing else rescales a
//! matrix behind the caller's back.

use crate::{Error, Result};
use ndarray::Array2;

/// Marginal-sum tolerance for convergence.
const TOL: f64 = 1e-10;
/// Row+column normalization sweeps before giving up.
const MAX_SWEEPS: usize = 10_000;

fn marginal_errors(m: &Array2<f64>) -> (f64, f64) {
    let n = m.nrows();
    let mut row_err = 0.0f64;
    let mut col_err = 0.0f64;
    for i in 0..n {
        let mut row_sum = 0.0;
        let mut col_sum = 0.0;
        for j in 0..n {
            row_sum += m[[i, j]];
            col_sum += m[[j, i]];
        }
        row_err = row_err.max((row_sum - 1.0).abs());
        col_err = col_err.max((col_sum - 1.0).abs());
    }
    (row_err, col_err)
}

/// Balance a non-negative square matrix into a bistochastic one, in place.
///
/// Fails without touching semantics the caller relies on: a `Shape` error for
/// a non-square matrix, a `Domain` error for empty input, negative or
/// non-finite entries, a zero row/column sum encountered during a sweep, or
/// exhaustion of the internal sweep budget. On error the matrix contents are
/// unspecified.
pub fn balance(m: &mut Array2<f64>) -> Result<()> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(Error::Shape("balance requires a square matrix"));
    }
    if n == 0 {
        return Err(Error::Domain("balance requires a non-empty matrix"));
    }
    if m.iter().any(|&x| !x.is_finite() || x < 0.0) {
        return Err(Error::Domain("balance requires finite non-negative entries"));
    }

    for _ in 0..MAX_SWEEPS {
        for i in 0..n {
            let mut row_sum = 0.0;
            for j in 0..n {
                row_sum += m[[i, j]];
            }
            if row_sum <= 0.0 {
                return Err(Error::Domain("cannot balance a matrix with a zero row"));
            }
            for j in 0..n {
                m[[i, j]] /= row_sum;
            }
        }

        for j in 0..n {
            let mut col_sum = 0.0;
            for i in 0..n {
                col_sum += m[[i, j]];
            }
            if col_sum <= 0.0 {
                return Err(Error::Domain("cannot balance a matrix with a zero column"));
            }
            for i in 0..n {
                m[[i, j]] /= col_sum;
            }
        }

        let (row_err, col_err) = marginal_errors(m);
        if row_err < TOL && col_err < TOL {
            return Ok(());
        }
    }

    Err(Error::Domain("sinkhorn balancing did not converge"))
}

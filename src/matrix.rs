//! Dense-matrix primitives for bistochastic-matrix work.
//!
//! These are intentionally boring building blocks: destination-style
//! elementwise arithmetic, permutation generation/validation, and the matrix
//! permanent. Everything validates shapes up front and fails with
//! [`Error::Shape`] instead of panicking on a stray index.
//!
//! The permanent is Ryser's inclusion–exclusion formula — worst-case
//! exponential by nature. It is correct for every size it accepts, but meant
//! for small matrices (tens of rows, not hundreds).

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::sinkhorn;

fn same_shape(dest: &Array2<f64>, a: &ArrayView2<f64>) -> Result<()> {
    if dest.nrows() != a.nrows() || dest.ncols() != a.ncols() {
        return Err(Error::Shape("operand shape must match destination"));
    }
    Ok(())
}

fn square_flat(dest: &Array2<f64>, flat_len: usize) -> Result<()> {
    if dest.nrows() != dest.ncols() {
        return Err(Error::Shape("destination must be square"));
    }
    if flat_len != dest.nrows() * dest.ncols() {
        return Err(Error::Shape("flattened operand length must be n*n"));
    }
    Ok(())
}

/// Elementwise product `dest = a ∘ b`.
pub fn multiply(dest: &mut Array2<f64>, a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Result<()> {
    same_shape(dest, a)?;
    same_shape(dest, b)?;
    for i in 0..dest.nrows() {
        for j in 0..dest.ncols() {
            dest[[i, j]] = a[[i, j]] * b[[i, j]];
        }
    }
    Ok(())
}

/// Elementwise scale `dest = a * s`.
pub fn multiply_scalar(dest: &mut Array2<f64>, a: &ArrayView2<f64>, s: f64) -> Result<()> {
    same_shape(dest, a)?;
    for i in 0..dest.nrows() {
        for j in 0..dest.ncols() {
            dest[[i, j]] = a[[i, j]] * s;
        }
    }
    Ok(())
}

/// Scale a row-major flattened vector into a square destination:
/// `dest[i][j] = a[i*n + j] * s`.
pub fn multiply_flat(dest: &mut Array2<f64>, a: &ArrayView1<f64>, s: f64) -> Result<()> {
    square_flat(dest, a.len())?;
    let n = dest.ncols();
    for i in 0..n {
        for j in 0..n {
            dest[[i, j]] = a[i * n + j] * s;
        }
    }
    Ok(())
}

/// Elementwise sum `dest = a + b`.
pub fn add(dest: &mut Array2<f64>, a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Result<()> {
    same_shape(dest, a)?;
    same_shape(dest, b)?;
    for i in 0..dest.nrows() {
        for j in 0..dest.ncols() {
            dest[[i, j]] = a[[i, j]] + b[[i, j]];
        }
    }
    Ok(())
}

/// Elementwise shift `dest = a + s`.
pub fn add_scalar(dest: &mut Array2<f64>, a: &ArrayView2<f64>, s: f64) -> Result<()> {
    same_shape(dest, a)?;
    for i in 0..dest.nrows() {
        for j in 0..dest.ncols() {
            dest[[i, j]] = a[[i, j]] + s;
        }
    }
    Ok(())
}

/// Add a row-major flattened vector to a square matrix:
/// `dest[i][j] = a[i][j] + v[i*n + j]`.
pub fn add_flat(dest: &mut Array2<f64>, a: &ArrayView2<f64>, v: &ArrayView1<f64>) -> Result<()> {
    same_shape(dest, a)?;
    square_flat(dest, v.len())?;
    let n = dest.ncols();
    for i in 0..n {
        for j in 0..n {
            dest[[i, j]] = a[[i, j]] + v[i * n + j];
        }
    }
    Ok(())
}

/// Elementwise difference `dest = a - b`.
pub fn subtract(dest: &mut Array2<f64>, a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Result<()> {
    same_shape(dest, a)?;
    same_shape(dest, b)?;
    for i in 0..dest.nrows() {
        for j in 0..dest.ncols() {
            dest[[i, j]] = a[[i, j]] - b[[i, j]];
        }
    }
    Ok(())
}

/// Elementwise unary transform `dest = f(a)`.
pub fn apply(dest: &mut Array2<f64>, a: &ArrayView2<f64>, f: impl Fn(f64) -> f64) -> Result<()> {
    same_shape(dest, a)?;
    for i in 0..dest.nrows() {
        for j in 0..dest.ncols() {
            dest[[i, j]] = f(a[[i, j]]);
        }
    }
    Ok(())
}

/// Inner product over the overlapping prefix of two vectors.
pub fn dot(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    let mut accum = 0.0;
    for i in 0..a.len().min(b.len()) {
        accum += a[i] * b[i];
    }
    accum
}

/// Row-major linearization of a matrix.
pub fn flatten(a: &ArrayView2<f64>) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(a.nrows() * a.ncols());
    let ncols = a.ncols();
    for i in 0..a.nrows() {
        for j in 0..ncols {
            out[i * ncols + j] = a[[i, j]];
        }
    }
    out
}

/// Matrix permanent via Ryser's inclusion–exclusion formula.
///
/// For every non-empty subset `S` of column indices, take the product over
/// rows of the row-sum restricted to `S`, weight by `(-1)^|S|`, sum, and
/// multiply the total by `(-1)^n`. O(2^n · n²); exact, not approximate.
pub fn permanent(input: &ArrayView2<f64>) -> Result<f64> {
    let n = input.nrows();
    if input.ncols() != n {
        return Err(Error::Shape("permanent requires a square matrix"));
    }
    if n >= usize::BITS as usize {
        return Err(Error::Domain("matrix too large for permanent"));
    }

    let mut collector = 0.0;
    // mask = bit pattern of the column subset S; the empty subset contributes 0.
    for mask in 1usize..(1usize << n) {
        let sign = if mask.count_ones() % 2 == 0 { 1.0 } else { -1.0 };
        let mut accum = 1.0;
        for row in 0..n {
            let mut x = 0.0;
            for col in 0..n {
                if mask & (1 << col) != 0 {
                    x += input[[row, col]];
                }
            }
            accum *= x;
        }
        collector += sign * accum;
    }

    let sign_n = if n % 2 == 0 { 1.0 } else { -1.0 };
    Ok(sign_n * collector)
}

/// Scale a vector to unit Euclidean norm.
pub fn normalize(input: &ArrayView1<f64>) -> Result<Array1<f64>> {
    let mut norm_sq = 0.0;
    for i in 0..input.len() {
        norm_sq += input[i] * input[i];
    }
    let norm = norm_sq.sqrt();
    if norm == 0.0 {
        return Err(Error::Domain("cannot normalize a zero-norm vector"));
    }
    let mut out = input.to_owned();
    for i in 0..out.len() {
        out[i] /= norm;
    }
    Ok(out)
}

/// A uniformly random direction on the unit sphere in n-dimensional space:
/// n i.i.d. standard normals rescaled to unit Euclidean norm.
pub fn random_direction_in_nd_space<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(n);
    let mut norm_sq = 0.0;
    for i in 0..n {
        let x: f64 = StandardNormal.sample(rng);
        out[i] = x;
        norm_sq += x * x;
    }
    let norm = norm_sq.sqrt();
    for i in 0..n {
        out[i] /= norm;
    }
    out
}

/// The n×n identity matrix.
pub fn identity(n: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        out[[i, i]] = 1.0;
    }
    out
}

/// The uniform bistochastic matrix: every entry `1/n`. This is the barycenter
/// of the Birkhoff polytope.
pub fn uniform_bistoc(n: usize) -> Array2<f64> {
    Array2::<f64>::from_elem((n, n), 1.0 / n as f64)
}

/// An n×n matrix of i.i.d. uniform `[0, 1)` entries (not normalized).
pub fn random_matrix<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            out[[i, j]] = rng.random();
        }
    }
    out
}

/// A uniformly random permutation in sparse form: `perm[i]` is the column
/// chosen for row `i`.
pub fn random_permutation_sparse<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    perm
}

/// A uniformly random permutation as a dense 0/1 matrix.
pub fn random_permutation<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Array2<f64> {
    perm_to_dense(&random_permutation_sparse(rng, n))
}

/// Convert a sparse permutation to its dense 0/1 matrix.
pub fn perm_to_dense(perm: &[usize]) -> Array2<f64> {
    let n = perm.len();
    let mut out = Array2::<f64>::zeros((n, n));
    for (i, &j) in perm.iter().enumerate() {
        out[[i, j]] = 1.0;
    }
    out
}

/// True iff every entry is exactly 0 or 1 and every row and every column has
/// exactly one 1. Non-square matrices are never permutations.
pub fn is_permutation(matrix: &ArrayView2<f64>) -> bool {
    let n = matrix.nrows();
    if matrix.ncols() != n {
        return false;
    }

    for row in 0..n {
        let mut num_ones = 0;
        for col in 0..n {
            let x = matrix[[row, col]];
            if x == 1.0 {
                num_ones += 1;
            } else if x != 0.0 {
                return false;
            }
        }
        if num_ones != 1 {
            return false;
        }
    }

    for col in 0..n {
        let mut num_ones = 0;
        for row in 0..n {
            if matrix[[row, col]] == 1.0 {
                num_ones += 1;
            }
        }
        if num_ones != 1 {
            return false;
        }
    }

    true
}

/// Build a bistochastic matrix biased toward `perm`: `alpha` everywhere,
/// 1.0 at the positions `(i, perm[i])`, then Sinkhorn-balanced in place.
///
/// Smaller `alpha` means a sharper bias. Fails if `alpha` is not positive and
/// finite, if `perm` indexes out of range, or if balancing does not converge.
pub fn preconditioned_bistoch(perm: &[usize], alpha: f64) -> Result<Array2<f64>> {
    let n = perm.len();
    if n == 0 {
        return Err(Error::Domain("permutation must be non-empty"));
    }
    if !(alpha > 0.0) || !alpha.is_finite() {
        return Err(Error::Domain("alpha must be positive and finite"));
    }
    if perm.iter().any(|&j| j >= n) {
        return Err(Error::Domain("permutation entry out of range"));
    }

    let mut out = Array2::<f64>::from_elem((n, n), alpha);
    for (i, &j) in perm.iter().enumerate() {
        out[[i, j]] = 1.0;
    }

    sinkhorn::balance(&mut out)?;
    Ok(out)
}

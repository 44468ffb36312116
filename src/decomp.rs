//! Birkhoff–von Neumann decomposition and permutation sampling.
//!
//! Every bistochastic matrix is a convex combination of permutation matrices
//! (Birkhoff, 1946). This module peels such a combination off greedily and
//! uses it two ways:
//!
//! - [`BvnDecomposer::mean_permutation`]: the single highest-weight
//!   permutation of the decomposition (deterministic, consumes no randomness),
//! - [`BvnDecomposer::sample`]: one permutation drawn at random, where a
//!   permutation σ is weighted by the product of the entries it selects,
//!   `Π_i m[i][σ(i)]`.
//!
//! The sampling strategy is a tagged variant dispatched inside one entry
//! point: `Exact` does sequential conditional sampling with permanents of the
//! remaining minors (inherits the permanent's exponential cost), `Gibbs` runs
//! a fixed budget of pairwise heat-bath swaps.

use crate::{matrix, Error, Result};
use ndarray::{Array2, ArrayView2};
use rand::{Rng, RngCore};

/// Tolerance used when validating that an input matrix is bistochastic.
pub const EPSILON: f64 = 1e-6;

/// Support cutoff during peeling, relative to the residual's remaining mass.
const SUPPORT_RTOL: f64 = 1e-9;

/// Pairwise heat-bath updates per Gibbs sample, as a multiple of n².
const GIBBS_STEP_FACTOR: usize = 10;

/// An immutable weighted permutation: one term of a BvN decomposition.
///
/// Across all terms returned for one decomposition, coefficients are
/// non-negative, sum to 1 within tolerance, and the coefficient-weighted sum
/// of the matrices reconstructs the decomposed matrix.
#[derive(Debug, Clone)]
pub struct CoeffAndMatrix {
    pub coeff: f64,
    pub matrix: Array2<f64>,
}

impl CoeffAndMatrix {
    pub fn new(coeff: f64, matrix: Array2<f64>) -> Self {
        Self { coeff, matrix }
    }

    /// The term's permutation in sparse form (`perm[i]` = column of row i's 1).
    pub fn as_flat_perm(&self) -> Result<Vec<usize>> {
        if !matrix::is_permutation(&self.matrix.view()) {
            return Err(Error::Domain("term matrix is not a permutation"));
        }
        let n = self.matrix.nrows();
        let mut perm = vec![0usize; n];
        for i in 0..n {
            for j in 0..n {
                if self.matrix[[i, j]] == 1.0 {
                    perm[i] = j;
                }
            }
        }
        Ok(perm)
    }
}

/// How [`BvnDecomposer::sample`] draws a permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    /// Sequential conditional sampling weighted by permanents of the
    /// remaining minors. Exact, and exponential in n.
    Exact,
    /// Pairwise heat-bath swap chain from a uniformly random start.
    /// Approximate, polynomial per sample.
    Gibbs,
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Exact
    }
}

/// Check that `m` is square, non-empty, and bistochastic within [`EPSILON`].
pub fn check_bistochastic(m: &ArrayView2<f64>) -> Result<()> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(Error::Shape("bistochastic matrix must be square"));
    }
    if n == 0 {
        return Err(Error::Domain("bistochastic matrix must be non-empty"));
    }
    if m.iter().any(|&x| !x.is_finite()) {
        return Err(Error::Domain("bistochastic matrix has non-finite entries"));
    }
    if m.iter().any(|&x| x < -EPSILON) {
        return Err(Error::Domain("bistochastic matrix has negative entries"));
    }
    for i in 0..n {
        let mut row_sum = 0.0;
        let mut col_sum = 0.0;
        for j in 0..n {
            row_sum += m[[i, j]];
            col_sum += m[[j, i]];
        }
        if (row_sum - 1.0).abs() > EPSILON {
            return Err(Error::Domain("bistochastic matrix row sums must be 1"));
        }
        if (col_sum - 1.0).abs() > EPSILON {
            return Err(Error::Domain("bistochastic matrix column sums must be 1"));
        }
    }
    Ok(())
}

/// Augmenting-path search for one row of the support matching.
fn try_assign(
    m: &ArrayView2<f64>,
    threshold: f64,
    row: usize,
    visited: &mut [bool],
    col_owner: &mut [Option<usize>],
) -> bool {
    for j in 0..m.ncols() {
        if visited[j] || m[[row, j]] <= threshold {
            continue;
        }
        visited[j] = true;
        let reassigned = match col_owner[j] {
            None => true,
            Some(owner) => try_assign(m, threshold, owner, visited, col_owner),
        };
        if reassigned {
            col_owner[j] = Some(row);
            return true;
        }
    }
    false
}

/// A permutation inside the support of `m` (entries above `threshold`), or
/// `None` if no perfect matching exists there.
fn support_matching(m: &ArrayView2<f64>, threshold: f64) -> Option<Vec<usize>> {
    let n = m.nrows();
    let mut col_owner: Vec<Option<usize>> = vec![None; n];
    for row in 0..n {
        let mut visited = vec![false; n];
        if !try_assign(m, threshold, row, &mut visited, &mut col_owner) {
            return None;
        }
    }

    let mut perm = vec![0usize; n];
    for (j, owner) in col_owner.iter().enumerate() {
        perm[owner.expect("complete matching assigns every column")] = j;
    }
    Some(perm)
}

/// Permanent of the minor spanning rows `rows_from..` and the given columns.
fn restricted_permanent(m: &ArrayView2<f64>, rows_from: usize, cols: &[usize]) -> Result<f64> {
    let k = cols.len();
    let mut sub = Array2::<f64>::zeros((k, k));
    for (ri, row) in (rows_from..m.nrows()).enumerate() {
        for (ci, &col) in cols.iter().enumerate() {
            sub[[ri, ci]] = m[[row, col]];
        }
    }
    matrix::permanent(&sub.view())
}

/// Decomposes bistochastic matrices into weighted permutations and samples
/// permutations from them.
#[derive(Debug, Clone, Default)]
pub struct BvnDecomposer {
    strategy: SamplingStrategy,
}

impl BvnDecomposer {
    pub fn new(strategy: SamplingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    /// Peel `m` into weighted permutations: repeatedly find a permutation in
    /// the residual's support, subtract the minimal matched entry times that
    /// permutation, stop once the residual mass is below [`EPSILON`].
    pub fn decompose(&self, m: &ArrayView2<f64>) -> Result<Vec<CoeffAndMatrix>> {
        check_bistochastic(m)?;
        let n = m.nrows();

        let mut residual = m.to_owned();
        let mut remaining = 1.0f64;
        let mut out = Vec::new();

        // Birkhoff bound: at most (n-1)² + 1 vertices are ever needed.
        for _ in 0..(n * n + 1) {
            if remaining <= EPSILON {
                break;
            }
            let threshold = remaining * SUPPORT_RTOL;
            let perm = support_matching(&residual.view(), threshold)
                .ok_or(Error::Domain("no permutation in the residual's support"))?;

            let mut coeff = f64::INFINITY;
            for (i, &j) in perm.iter().enumerate() {
                coeff = coeff.min(residual[[i, j]]);
            }
            for (i, &j) in perm.iter().enumerate() {
                residual[[i, j]] -= coeff;
            }
            remaining -= coeff;

            out.push(CoeffAndMatrix::new(coeff, matrix::perm_to_dense(&perm)));
        }

        if remaining > EPSILON {
            return Err(Error::Domain("decomposition did not terminate"));
        }
        Ok(out)
    }

    /// The highest-weight permutation of the decomposition of `m`.
    ///
    /// Deterministic: consumes no randomness, so repeated calls on the same
    /// matrix agree regardless of any RNG state.
    pub fn mean_permutation(&self, m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let terms = self.decompose(m)?;
        let best = terms
            .into_iter()
            .max_by(|a, b| a.coeff.total_cmp(&b.coeff))
            .ok_or(Error::Domain("decomposition produced no terms"))?;
        Ok(best.matrix)
    }

    /// Draw one permutation from `m`, weighted by `Π_i m[i][σ(i)]`, using the
    /// configured [`SamplingStrategy`].
    pub fn sample(&self, rng: &mut dyn RngCore, m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        check_bistochastic(m)?;
        match self.strategy {
            SamplingStrategy::Exact => self.sample_exact(rng, m),
            SamplingStrategy::Gibbs => self.sample_gibbs(rng, m),
        }
    }

    fn sample_exact(&self, rng: &mut dyn RngCore, m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let n = m.nrows();
        let mut available: Vec<usize> = (0..n).collect();
        let mut perm = Vec::with_capacity(n);

        for row in 0..n {
            // Weight of committing to column `col` at this row: the entry
            // itself times the permanent of what the later rows can still do.
            let mut weights = Vec::with_capacity(available.len());
            let mut total = 0.0;
            for idx in 0..available.len() {
                let col = available[idx];
                let entry = m[[row, col]].max(0.0);
                let w = if entry == 0.0 {
                    0.0
                } else if available.len() == 1 {
                    entry
                } else {
                    let mut rest = available.clone();
                    rest.remove(idx);
                    // Cancellation in Ryser's sum can leave tiny negatives.
                    entry * restricted_permanent(m, row + 1, &rest)?.max(0.0)
                };
                weights.push(w);
                total += w;
            }

            if total <= 0.0 {
                return Err(Error::Domain("exact sampling found no admissible column"));
            }

            // Cumulative scan; roundoff can leave the running sum just short
            // of `total`, so fall back to the last positive weight.
            let u: f64 = rng.random::<f64>() * total;
            let mut acc = 0.0;
            let mut chosen = None;
            for (idx, &w) in weights.iter().enumerate() {
                acc += w;
                if w > 0.0 && u <= acc {
                    chosen = Some(idx);
                    break;
                }
            }
            let idx = match chosen {
                Some(idx) => idx,
                None => weights
                    .iter()
                    .rposition(|&w| w > 0.0)
                    .expect("positive total implies a positive weight"),
            };
            perm.push(available.remove(idx));
        }

        Ok(matrix::perm_to_dense(&perm))
    }

    fn sample_gibbs(&self, rng: &mut dyn RngCore, m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let n = m.nrows();
        let mut perm = matrix::random_permutation_sparse(rng, n);
        if n < 2 {
            return Ok(matrix::perm_to_dense(&perm));
        }

        for _ in 0..GIBBS_STEP_FACTOR * n * n {
            let i = rng.random_range(0..n);
            let mut k = rng.random_range(0..n - 1);
            if k >= i {
                k += 1;
            }

            // Heat-bath on the two positions: keep or swap their columns in
            // proportion to the two configurations' weights.
            let w_keep = m[[i, perm[i]]] * m[[k, perm[k]]];
            let w_swap = m[[i, perm[k]]] * m[[k, perm[i]]];
            let total = w_keep + w_swap;
            let u: f64 = rng.random();
            if total > 0.0 && u * total < w_swap {
                perm.swap(i, k);
            }
        }

        Ok(matrix::perm_to_dense(&perm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn decompose_identity_is_a_single_term() {
        let d = BvnDecomposer::default();
        let terms = d.decompose(&matrix::identity(4).view()).unwrap();
        assert_eq!(terms.len(), 1);
        assert!((terms[0].coeff - 1.0).abs() < 1e-9);
        assert_eq!(terms[0].as_flat_perm().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn decompose_permutation_matrix_is_a_single_term() {
        let d = BvnDecomposer::default();
        let perm = vec![2usize, 0, 3, 1];
        let terms = d.decompose(&matrix::perm_to_dense(&perm).view()).unwrap();
        assert_eq!(terms.len(), 1);
        assert!((terms[0].coeff - 1.0).abs() < 1e-9);
        assert_eq!(terms[0].as_flat_perm().unwrap(), perm);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_decompose_terms_are_permutations_with_unit_mass(
            n in 1usize..7,
            seed in any::<u64>(),
        ) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut m = matrix::random_matrix(&mut rng, n);
            m.mapv_inplace(|x| x + 0.05);
            crate::sinkhorn::balance(&mut m).unwrap();

            let d = BvnDecomposer::default();
            let terms = d.decompose(&m.view()).unwrap();

            let mass: f64 = terms.iter().map(|t| t.coeff).sum();
            prop_assert!((mass - 1.0).abs() <= 1e-5, "coefficients sum to {mass}");
            for t in &terms {
                prop_assert!(t.coeff >= 0.0);
                prop_assert!(matrix::is_permutation(&t.matrix.view()));
            }
        }
    }

    #[test]
    fn mean_permutation_recovers_preconditioned_bias() {
        let perm = vec![1usize, 2, 0];
        let m = matrix::preconditioned_bistoch(&perm, 0.05).unwrap();
        let d = BvnDecomposer::default();
        let mean = d.mean_permutation(&m.view()).unwrap();
        assert_eq!(
            mean, matrix::perm_to_dense(&perm),
            "mean permutation should be the biased one"
        );
    }

    #[test]
    fn mean_permutation_is_deterministic() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut m = matrix::random_matrix(&mut rng, 5);
        m.mapv_inplace(|x| x + 0.05);
        crate::sinkhorn::balance(&mut m).unwrap();

        let d = BvnDecomposer::default();
        let a = d.mean_permutation(&m.view()).unwrap();
        let b = d.mean_permutation(&m.view()).unwrap();
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 24,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_sample_returns_valid_permutation_both_strategies(
            n in 1usize..6,
            seed in any::<u64>(),
        ) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut m = matrix::random_matrix(&mut rng, n);
            m.mapv_inplace(|x| x + 0.05);
            crate::sinkhorn::balance(&mut m).unwrap();

            for strategy in [SamplingStrategy::Exact, SamplingStrategy::Gibbs] {
                let d = BvnDecomposer::new(strategy);
                let mut r1 = ChaCha8Rng::seed_from_u64(seed ^ 0x5eed);
                let mut r2 = ChaCha8Rng::seed_from_u64(seed ^ 0x5eed);
                let s1 = d.sample(&mut r1, &m.view()).unwrap();
                let s2 = d.sample(&mut r2, &m.view()).unwrap();
                prop_assert!(matrix::is_permutation(&s1.view()));
                prop_assert_eq!(&s1, &s2, "same seed must give the same sample");
            }
        }
    }

    #[test]
    fn exact_sampling_prefers_the_heavy_permutation() {
        let m = ndarray::array![[0.9, 0.1], [0.1, 0.9]];
        let d = BvnDecomposer::new(SamplingStrategy::Exact);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        // P(identity) ∝ 0.81 vs P(swap) ∝ 0.01, so ~99% identity.
        let mut identity_count = 0;
        for _ in 0..500 {
            let s = d.sample(&mut rng, &m.view()).unwrap();
            if s == matrix::identity(2) {
                identity_count += 1;
            }
        }
        assert!(
            identity_count > 450,
            "expected a heavy identity bias, got {identity_count}/500"
        );
    }

    #[test]
    fn sample_and_decompose_reject_non_bistochastic_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let raw = matrix::random_matrix(&mut rng, 4);

        let d = BvnDecomposer::default();
        assert!(d.decompose(&raw.view()).is_err());
        assert!(d.mean_permutation(&raw.view()).is_err());
        assert!(d.sample(&mut rng, &raw.view()).is_err());
    }

    #[test]
    fn check_bistochastic_rejects_bad_inputs() {
        assert!(check_bistochastic(&Array2::<f64>::zeros((0, 0)).view()).is_err());
        assert!(check_bistochastic(&Array2::<f64>::zeros((2, 3)).view()).is_err());

        let mut m = matrix::uniform_bistoc(3);
        assert!(check_bistochastic(&m.view()).is_ok());

        m[[0, 0]] = f64::NAN;
        assert!(check_bistochastic(&m.view()).is_err());

        let m = ndarray::array![[1.2, -0.2], [-0.2, 1.2]];
        assert!(check_bistochastic(&m.view()).is_err());
    }
}

//! Joint Metropolis–Hastings search over several Birkhoff polytopes.
//!
//! One polytope per "schedule" to be learned. Each iteration proposes a move
//! for a chosen subset of schedules, estimates the (noisy, sample-based) loss
//! of the new joint configuration, and accepts or rejects on the ratio of
//! masses, where mass = 1 / loss is the walk's potential.
//!
//! Two things are deliberately decoupled:
//!
//! - the **walk** only ever updates `current_mass` on accept and rolls every
//!   polytope back to its snapshot on reject;
//! - the **best-found state** is updated inside loss estimation, immediately,
//!   for every individual sample that beats the running best — whether or not
//!   the surrounding proposal is later rejected. A lucky sample inside a
//!   rejected proposal is still kept.
//!
//! The loss itself is a Monte-Carlo estimate: an average over
//! `SAMPLES_PER_MATRIX` joint permutation samples, the first of which is
//! always the deterministic mean permutation of each schedule so the mode of
//! the current configuration is evaluated on every call.

use crate::decomp::{BvnDecomposer, SamplingStrategy};
use crate::polytope::{BirkhoffPolytope, VertexCurvePolytope};
use crate::{matrix, Error, Result};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Joint samples drawn per loss estimate (1 mean + the rest random).
const SAMPLES_PER_MATRIX: usize = 20;

/// Metropolis–Hastings learner over a family of bistochastic matrices.
///
/// The loss is caller-supplied: it maps one permutation matrix per schedule
/// to a non-negative scalar and may itself be stochastic. It is never assumed
/// monotone or smooth. A loss-evaluation failure inside the decomposition
/// layer degrades to a `+∞` estimate, which a proposal can never get
/// accepted with; it does not abort the walk.
pub struct MhJointPermutationLearner<L>
where
    L: FnMut(&[Array2<f64>]) -> f64,
{
    polytopes: Vec<Box<dyn BirkhoffPolytope>>,
    decomposer: BvnDecomposer,
    loss: L,
    rng: ChaCha8Rng,
    best_loss: f64,
    best: Vec<Array2<f64>>,
    current_mass: f64,
}

impl<L> MhJointPermutationLearner<L>
where
    L: FnMut(&[Array2<f64>]) -> f64,
{
    /// Build one vertex-curve polytope per schedule dimension, all at their
    /// uniform points, and seed `current_mass` from a first loss estimate
    /// there. The seed is explicit so runs are reproducible.
    pub fn new(dims: &[usize], loss: L, seed: u64) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::Domain("at least one schedule is required"));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(Error::Domain("schedule dimensions must be >= 1"));
        }

        let polytopes: Vec<Box<dyn BirkhoffPolytope>> = dims
            .iter()
            .map(|&d| Box::new(VertexCurvePolytope::new(d)) as Box<dyn BirkhoffPolytope>)
            .collect();
        let best = dims.iter().map(|&d| matrix::uniform_bistoc(d)).collect();

        let mut learner = Self {
            polytopes,
            decomposer: BvnDecomposer::new(SamplingStrategy::Gibbs),
            loss,
            rng: ChaCha8Rng::seed_from_u64(seed),
            best_loss: f64::INFINITY,
            best,
            current_mass: 0.0,
        };

        let initial = learner.modified_loss();
        learner.current_mass = 1.0 / initial;
        Ok(learner)
    }

    pub fn num_schedules(&self) -> usize {
        self.polytopes.len()
    }

    /// The best-scoring joint sample seen so far, one matrix per schedule.
    pub fn best(&self) -> &[Array2<f64>] {
        &self.best
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    /// Average loss over `SAMPLES_PER_MATRIX` joint samples at the current
    /// points: first the mean permutation of every schedule, then random
    /// samples. Every individual sample competes for the best-so-far slot.
    /// Any decomposition failure turns the whole estimate into `+∞`.
    fn modified_loss(&mut self) -> f64 {
        let mut collector = 0.0;

        let mut samples = Vec::with_capacity(self.polytopes.len());
        for p in &self.polytopes {
            match self.decomposer.mean_permutation(&p.current_point()) {
                Ok(s) => samples.push(s),
                Err(_) => return f64::INFINITY,
            }
        }
        collector += self.test_samples(samples);

        for _ in 0..SAMPLES_PER_MATRIX - 1 {
            let mut samples = Vec::with_capacity(self.polytopes.len());
            for p in &self.polytopes {
                match self.decomposer.sample(&mut self.rng, &p.current_point()) {
                    Ok(s) => samples.push(s),
                    Err(_) => return f64::INFINITY,
                }
            }
            collector += self.test_samples(samples);
        }

        collector / SAMPLES_PER_MATRIX as f64
    }

    fn test_samples(&mut self, samples: Vec<Array2<f64>>) -> f64 {
        let sample_loss = (self.loss)(&samples);
        if sample_loss < self.best_loss {
            self.best_loss = sample_loss;
            self.best = samples;
        }
        sample_loss
    }

    /// Propose a joint move for every schedule.
    pub fn iterate(&mut self) {
        let all: Vec<usize> = (0..self.polytopes.len()).collect();
        self.iterate_subset(&all);
    }

    /// Propose a move for a single schedule.
    pub fn iterate_one(&mut self, idx: usize) {
        self.iterate_subset(&[idx]);
    }

    /// Propose a move for the given schedules, then accept or reject the
    /// whole configuration at once. Out-of-range entries are ignored.
    pub fn iterate_subset(&mut self, schedules: &[usize]) {
        let num = self.polytopes.len();

        // Draw a direction and a step for every schedule, moved or not, so
        // the RNG stream advances identically regardless of the subset.
        let mut dirs = Vec::with_capacity(num);
        for p in &self.polytopes {
            dirs.push(p.random_direction(&mut self.rng));
        }
        let snapshots: Vec<Array2<f64>> = self
            .polytopes
            .iter()
            .map(|p| p.current_point().to_owned())
            .collect();
        let move_by: Vec<f64> = (0..num).map(|_| self.rng.random()).collect();

        for i in 0..num {
            if !schedules.contains(&i) {
                continue;
            }
            self.polytopes[i]
                .move_point(&dirs[i].view(), move_by[i])
                .expect("a direction drawn from a polytope always fits it");
        }

        let proposed_mass = 1.0 / self.modified_loss();
        let ratio = proposed_mass / self.current_mass;

        if ratio >= 1.0 {
            // No worse: accept.
            self.current_mass = proposed_mass;
            return;
        }

        // Worsening proposal: accept with probability = ratio.
        if self.rng.random::<f64>() < ratio {
            self.current_mass = proposed_mass;
            return;
        }

        // Reject: restore every schedule's pre-proposal point. A snapshot
        // that no longer fits its polytope is a programming error, not a
        // recoverable condition.
        for (p, snapshot) in self.polytopes.iter_mut().zip(snapshots) {
            p.set_current_point(snapshot)
                .expect("snapshot no longer fits the polytope it came from");
        }
    }

    /// Force-set schedule `idx`'s point, e.g. from
    /// [`matrix::preconditioned_bistoch`], to start the walk near a known
    /// good permutation.
    pub fn precondition(&mut self, idx: usize, bistoch: Array2<f64>) -> Result<()> {
        let p = self
            .polytopes
            .get_mut(idx)
            .ok_or(Error::Domain("schedule index out of range"))?;
        p.set_current_point(bistoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomp;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn abs_diff_loss(targets: Vec<Array2<f64>>) -> impl FnMut(&[Array2<f64>]) -> f64 {
        move |samples: &[Array2<f64>]| {
            let mut total = 0.0;
            for (s, t) in samples.iter().zip(&targets) {
                for (a, b) in s.iter().zip(t.iter()) {
                    total += (a - b).abs();
                }
            }
            total
        }
    }

    #[test]
    fn constructor_rejects_degenerate_dimensions() {
        assert!(MhJointPermutationLearner::new(&[], |_: &[Array2<f64>]| 0.0, 1).is_err());
        assert!(MhJointPermutationLearner::new(&[3, 0], |_: &[Array2<f64>]| 0.0, 1).is_err());
    }

    #[test]
    fn construction_evaluates_and_tracks_a_permutation_best() {
        let targets = vec![matrix::identity(3), matrix::identity(4)];
        let learner = MhJointPermutationLearner::new(&[3, 4], abs_diff_loss(targets), 42).unwrap();

        assert_eq!(learner.num_schedules(), 2);
        assert!(learner.best_loss().is_finite());
        // Every sample the constructor evaluated was a permutation, so the
        // best slot holds permutations too.
        for b in learner.best() {
            assert!(matrix::is_permutation(&b.view()));
        }
    }

    #[test]
    fn first_sample_per_estimate_is_the_mean_permutation_for_any_seed() {
        // Record the first joint sample each learner evaluates. Both start at
        // the uniform points, so the deterministic mean permutation must make
        // the two recordings agree even though the seeds differ.
        let mut firsts: Vec<Vec<Array2<f64>>> = Vec::new();
        for seed in [1u64, 99] {
            let record: Rc<RefCell<Vec<Vec<Array2<f64>>>>> = Rc::new(RefCell::new(Vec::new()));
            let sink = record.clone();
            let _ = MhJointPermutationLearner::new(
                &[3, 3],
                move |s: &[Array2<f64>]| {
                    sink.borrow_mut().push(s.to_vec());
                    1.0
                },
                seed,
            )
            .unwrap();
            firsts.push(record.borrow()[0].clone());
        }
        assert_eq!(firsts[0], firsts[1]);

        // And it matches what the decomposer reports for the uniform point.
        let d = BvnDecomposer::new(SamplingStrategy::Gibbs);
        let expected = d.mean_permutation(&matrix::uniform_bistoc(3).view()).unwrap();
        assert_eq!(firsts[0][0], expected);
        assert_eq!(firsts[0][1], expected);
    }

    #[test]
    fn iterate_keeps_points_bistochastic_and_best_loss_monotone() {
        let targets = vec![matrix::identity(3)];
        let mut learner =
            MhJointPermutationLearner::new(&[3], abs_diff_loss(targets), 7).unwrap();

        let mut prev_best = learner.best_loss();
        for _ in 0..30 {
            learner.iterate();
            assert!(learner.best_loss() <= prev_best, "best loss regressed");
            prev_best = learner.best_loss();

            for p in &learner.polytopes {
                decomp::check_bistochastic(&p.current_point())
                    .expect("walk left the polytope");
            }
        }
    }

    #[test]
    fn infinite_loss_proposals_are_always_rejected() {
        // The constructor's 20 evaluations see loss 1.0; everything after is
        // +∞, so every proposal has mass 0 and must be rolled back.
        let mut calls = 0usize;
        let loss = move |_: &[Array2<f64>]| {
            calls += 1;
            if calls <= 20 {
                1.0
            } else {
                f64::INFINITY
            }
        };
        let mut learner = MhJointPermutationLearner::new(&[3, 3], loss, 11).unwrap();

        for _ in 0..5 {
            learner.iterate();
            for p in &learner.polytopes {
                assert_eq!(
                    p.current_point().to_owned(),
                    matrix::uniform_bistoc(3),
                    "a rejected proposal must restore the snapshot"
                );
            }
        }
    }

    #[test]
    fn iterate_subset_ignores_out_of_range_indices() {
        let targets = vec![matrix::identity(3)];
        let mut learner =
            MhJointPermutationLearner::new(&[3], abs_diff_loss(targets), 5).unwrap();
        // Must not panic; index 7 simply selects nothing extra.
        learner.iterate_subset(&[0, 7]);
        learner.iterate_subset(&[]);
    }

    #[test]
    fn precondition_validates_index_and_dimension() {
        let targets = vec![matrix::identity(3)];
        let mut learner =
            MhJointPermutationLearner::new(&[3], abs_diff_loss(targets), 5).unwrap();

        assert!(learner.precondition(1, matrix::uniform_bistoc(3)).is_err());
        assert!(learner.precondition(0, matrix::uniform_bistoc(4)).is_err());

        let biased = matrix::preconditioned_bistoch(&[2, 0, 1], 0.1).unwrap();
        learner.precondition(0, biased.clone()).unwrap();
        assert_eq!(learner.polytopes[0].current_point().to_owned(), biased);
    }
}

use std::f64::consts::PI;
use std::path::Path;

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use serde::{Deserialize, Serialize};
use super::scorer::SequenceScorer;

/// Accepted drift when checking that a probability vector sums to 1.0.
const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Hidden Markov model with one diagonal-covariance Gaussian per state.
///
/// This is the word model used by the recognizer: one `GaussianHmm` is
/// trained per word (outside of this crate) and scores how well an unknown
/// observation sequence fits that word.
///
/// ## Responsibilities
/// - Compute the log-likelihood of observation sequences (forward algorithm)
/// - Draw synthetic observation sequences
/// - Persist to / restore from postcard-encoded files
///
/// ## Invariants
/// - At least one state and one feature
/// - `start_prob` and every row of `trans_mat` are probability distributions
/// - Every state has exactly `n_features` means and strictly positive variances
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GaussianHmm {
	/// Initial state distribution.
	start_prob: Vec<f64>,
	/// `trans_mat[i][j]` is the probability of moving from state `i` to `j`.
	trans_mat: Vec<Vec<f64>>,
	/// Per-state emission means.
	means: Vec<Vec<f64>>,
	/// Per-state emission variances (diagonal of the covariance).
	variances: Vec<Vec<f64>>,
}

impl GaussianHmm {
	/// Creates a model from already trained parameters.
	///
	/// # Errors
	/// Returns an error if any invariant of the model is violated.
	pub fn new(
		start_prob: Vec<f64>,
		trans_mat: Vec<Vec<f64>>,
		means: Vec<Vec<f64>>,
		variances: Vec<Vec<f64>>,
	) -> Result<Self, String> {
		let n_states = start_prob.len();
		if n_states == 0 {
			return Err("At least one state is required".to_owned());
		}
		if trans_mat.len() != n_states || means.len() != n_states || variances.len() != n_states {
			return Err(format!(
				"State count mismatch: start={}, trans={}, means={}, variances={}",
				n_states, trans_mat.len(), means.len(), variances.len()
			));
		}

		Self::check_distribution("Start probabilities", &start_prob)?;
		for (i, row) in trans_mat.iter().enumerate() {
			if row.len() != n_states {
				return Err(format!("Transition row {} has {} entries, expected {}", i, row.len(), n_states));
			}
			Self::check_distribution(&format!("Transition row {}", i), row)?;
		}

		let n_features = means[0].len();
		if n_features == 0 {
			return Err("At least one feature is required".to_owned());
		}
		for (state, (mean, variance)) in means.iter().zip(&variances).enumerate() {
			if mean.len() != n_features || variance.len() != n_features {
				return Err(format!("State {} does not have {} features", state, n_features));
			}
			if mean.iter().any(|m| !m.is_finite()) {
				return Err(format!("State {} has a non-finite mean", state));
			}
			if variance.iter().any(|v| !v.is_finite() || *v <= 0.0) {
				return Err(format!("State {} variances must be finite and > 0", state));
			}
		}

		Ok(Self { start_prob, trans_mat, means, variances })
	}

	/// Ensures `probabilities` is a distribution (non-negative, sums to 1.0).
	fn check_distribution(name: &str, probabilities: &[f64]) -> Result<(), String> {
		if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
			return Err(format!("{} must be finite and non-negative", name));
		}
		let sum: f64 = probabilities.iter().sum();
		if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
			return Err(format!("{} must sum to 1.0, got {}", name, sum));
		}
		Ok(())
	}

	/// Number of hidden states.
	pub fn n_states(&self) -> usize {
		self.start_prob.len()
	}

	/// Number of features per observation frame.
	pub fn n_features(&self) -> usize {
		self.means.first().map_or(0, Vec::len)
	}

	/// Loads a model previously written with [`GaussianHmm::save`].
	///
	/// The decoded parameters go through [`GaussianHmm::new`] again, so a
	/// corrupted file can not produce an invalid model.
	pub fn load<P: AsRef<Path>>(filepath: P) -> Result<Self, Box<dyn std::error::Error>> {
		let bytes = std::fs::read(filepath)?;
		let model: Self = postcard::from_bytes(&bytes)?;
		Ok(Self::new(model.start_prob, model.trans_mat, model.means, model.variances)?)
	}

	/// Writes the model as a postcard-encoded file.
	pub fn save<P: AsRef<Path>>(&self, filepath: P) -> Result<(), Box<dyn std::error::Error>> {
		let bytes = postcard::to_stdvec(self)?;
		std::fs::write(filepath, bytes)?;
		Ok(())
	}

	/// Draws a synthetic observation sequence of `n_frames` frames.
	///
	/// The hidden path follows `start_prob` then `trans_mat`; each frame is
	/// drawn from the Gaussian of the current state.
	pub fn sample<R: Rng>(&self, n_frames: usize, rng: &mut R) -> Vec<Vec<f64>> {
		let mut frames = Vec::with_capacity(n_frames);
		let mut state = Self::pick(&self.start_prob, rng);

		for t in 0..n_frames {
			if t > 0 {
				state = Self::pick(&self.trans_mat[state], rng);
			}
			let frame = self.means[state]
				.iter()
				.zip(&self.variances[state])
				.map(|(mean, variance)| {
					let z: f64 = StandardNormal.sample(rng);
					mean + variance.sqrt() * z
				})
				.collect();
			frames.push(frame);
		}

		frames
	}

	/// Picks an index with probability proportional to its weight.
	fn pick<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
		let mut r: f64 = rng.random();

		// Rounding can leave `r` slightly above the last bucket
		let mut fallback = 0;
		for (index, weight) in weights.iter().enumerate() {
			if r < *weight {
				return index;
			}
			r -= weight;
			if *weight > 0.0 {
				fallback = index;
			}
		}

		fallback
	}

	/// Log density of `frame` under the Gaussian of `state`.
	fn log_emission(&self, state: usize, frame: &[f64]) -> f64 {
		let quadratic: f64 = self.means[state]
			.iter()
			.zip(&self.variances[state])
			.zip(frame)
			.map(|((mean, variance), x)| {
				let delta = x - mean;
				(2.0 * PI * variance).ln() + delta * delta / variance
			})
			.sum();
		-0.5 * quadratic
	}

	/// Log-likelihood of a single non-empty sub-sequence.
	///
	/// Runs the forward recursion in log space:
	/// `alpha_t(j) = log_sum_exp_i(alpha_{t-1}(i) + log a_ij) + log b_j(o_t)`
	fn forward(&self, frames: &[Vec<f64>], log_trans: &[Vec<f64>]) -> f64 {
		let n_states = self.n_states();

		let mut alpha: Vec<f64> = (0..n_states)
			.map(|j| self.start_prob[j].ln() + self.log_emission(j, &frames[0]))
			.collect();
		let mut next = vec![f64::NEG_INFINITY; n_states];
		let mut incoming = vec![f64::NEG_INFINITY; n_states];

		for frame in &frames[1..] {
			for j in 0..n_states {
				for i in 0..n_states {
					incoming[i] = alpha[i] + log_trans[i][j];
				}
				next[j] = log_sum_exp(&incoming) + self.log_emission(j, frame);
			}
			std::mem::swap(&mut alpha, &mut next);
		}

		log_sum_exp(&alpha)
	}
}

impl SequenceScorer for GaussianHmm {
	/// Sums the forward log-likelihood of every sub-sequence in `lengths`.
	///
	/// # Errors
	/// - A frame does not have `n_features` values
	/// - `lengths` does not cover the observations exactly
	/// - A sub-sequence is empty
	/// - An observation is `NaN`, or the result is
	fn score(&self, observations: &[Vec<f64>], lengths: &[usize]) -> Result<f64, String> {
		let n_features = self.n_features();
		if let Some(frame) = observations.iter().find(|frame| frame.len() != n_features) {
			return Err(format!("Frame has {} features, model expects {}", frame.len(), n_features));
		}
		if observations.iter().flatten().any(|x| x.is_nan()) {
			return Err("Observations contain NaN".to_owned());
		}

		let total = lengths
			.iter()
			.try_fold(0usize, |sum, &length| sum.checked_add(length))
			.ok_or_else(|| "Lengths overflow".to_owned())?;
		if total != observations.len() {
			return Err(format!("Lengths sum to {} but {} frames were given", total, observations.len()));
		}
		if lengths.is_empty() {
			return Err("No observations to score".to_owned());
		}

		let log_trans: Vec<Vec<f64>> = self.trans_mat
			.iter()
			.map(|row| row.iter().map(|p| p.ln()).collect())
			.collect();

		let mut log_likelihood = 0.0;
		let mut offset = 0;
		for &length in lengths {
			if length == 0 {
				return Err("Empty sub-sequence".to_owned());
			}
			let end = offset + length;
			let frames = observations
				.get(offset..end)
				.ok_or_else(|| format!("Sub-sequence {}..{} is out of range", offset, end))?;
			log_likelihood += self.forward(frames, &log_trans);
			offset = end;
		}

		if log_likelihood.is_nan() {
			return Err("Log-likelihood is NaN".to_owned());
		}
		Ok(log_likelihood)
	}
}

/// Numerically stable `log(sum(exp(x)))`.
///
/// Returns negative infinity when every value is negative infinity.
fn log_sum_exp(values: &[f64]) -> f64 {
	let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
	if max == f64::NEG_INFINITY {
		return f64::NEG_INFINITY;
	}
	max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn single_state(mean: f64, variance: f64) -> GaussianHmm {
		GaussianHmm::new(vec![1.0], vec![vec![1.0]], vec![vec![mean]], vec![vec![variance]]).unwrap()
	}

	fn assert_close(a: f64, b: f64) {
		assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
	}

	#[test]
	fn single_state_score_is_sum_of_log_densities() {
		let model = single_state(0.0, 1.0);
		let score = model.score(&[vec![0.0], vec![0.0]], &[2]).unwrap();
		assert_close(score, -(2.0 * PI).ln());
	}

	#[test]
	fn states_sharing_an_emission_score_like_one_state() {
		let shared = GaussianHmm::new(
			vec![0.3, 0.7],
			vec![vec![0.5, 0.5], vec![0.2, 0.8]],
			vec![vec![1.0, -1.0], vec![1.0, -1.0]],
			vec![vec![2.0, 0.5], vec![2.0, 0.5]],
		).unwrap();
		let single = GaussianHmm::new(vec![1.0], vec![vec![1.0]], vec![vec![1.0, -1.0]], vec![vec![2.0, 0.5]]).unwrap();

		let observations = vec![vec![0.5, -0.2], vec![1.7, -1.1], vec![0.9, 0.3]];
		assert_close(
			shared.score(&observations, &[3]).unwrap(),
			single.score(&observations, &[3]).unwrap(),
		);
	}

	#[test]
	fn sub_sequences_are_scored_independently() {
		let model = GaussianHmm::new(
			vec![0.9, 0.1],
			vec![vec![0.6, 0.4], vec![0.1, 0.9]],
			vec![vec![0.0], vec![3.0]],
			vec![vec![1.0], vec![0.5]],
		).unwrap();
		let first = vec![vec![0.1], vec![2.5]];
		let second = vec![vec![3.2], vec![2.9], vec![-0.4]];
		let joined: Vec<Vec<f64>> = first.iter().chain(&second).cloned().collect();

		assert_close(
			model.score(&joined, &[2, 3]).unwrap(),
			model.score(&first, &[2]).unwrap() + model.score(&second, &[3]).unwrap(),
		);
	}

	#[test]
	fn score_rejects_malformed_input() {
		let model = single_state(0.0, 1.0);
		assert!(model.score(&[vec![0.0], vec![0.0]], &[3]).is_err());
		assert!(model.score(&[vec![0.0, 1.0]], &[1]).is_err());
		assert!(model.score(&[vec![0.0]], &[0, 1]).is_err());
		assert!(model.score(&[], &[]).is_err());
		assert!(model.score(&[vec![f64::NAN]], &[1]).is_err());
		assert!(model.score(&[vec![0.0]], &[usize::MAX, 2]).is_err());
		assert!(model.score(&[vec![0.0], vec![0.0]], &[usize::MAX, 3]).is_err());
	}

	#[test]
	fn new_rejects_invalid_parameters() {
		assert!(GaussianHmm::new(vec![], vec![], vec![], vec![]).is_err());
		assert!(GaussianHmm::new(vec![0.5], vec![vec![1.0]], vec![vec![0.0]], vec![vec![1.0]]).is_err());
		assert!(GaussianHmm::new(vec![1.0], vec![vec![1.0]], vec![vec![0.0]], vec![vec![-1.0]]).is_err());
		assert!(GaussianHmm::new(vec![1.0], vec![vec![1.0]], vec![vec![]], vec![vec![]]).is_err());
		assert!(GaussianHmm::new(
			vec![0.5, 0.5],
			vec![vec![1.0], vec![0.0, 1.0]],
			vec![vec![0.0], vec![0.0]],
			vec![vec![1.0], vec![1.0]],
		).is_err());
	}

	#[test]
	fn sample_has_requested_shape_and_is_reproducible() {
		let model = GaussianHmm::new(
			vec![0.5, 0.5],
			vec![vec![0.5, 0.5], vec![0.5, 0.5]],
			vec![vec![0.0, 0.0], vec![10.0, 10.0]],
			vec![vec![1e-6, 1e-6], vec![1e-6, 1e-6]],
		).unwrap();

		let frames = model.sample(20, &mut StdRng::seed_from_u64(7));
		assert_eq!(frames.len(), 20);
		for frame in &frames {
			assert_eq!(frame.len(), 2);
			let near_a_mean = frame.iter().all(|x| x.abs() < 0.1) || frame.iter().all(|x| (x - 10.0).abs() < 0.1);
			assert!(near_a_mean, "{:?}", frame);
		}
		assert_eq!(frames, model.sample(20, &mut StdRng::seed_from_u64(7)));
	}

	#[test]
	fn model_prefers_its_own_samples() {
		let low = single_state(0.0, 1.0);
		let high = single_state(5.0, 1.0);
		let frames = low.sample(15, &mut StdRng::seed_from_u64(42));

		let lengths = [frames.len()];
		assert!(low.score(&frames, &lengths).unwrap() > high.score(&frames, &lengths).unwrap());
	}

	#[test]
	fn save_then_load_keeps_parameters() {
		let path = std::env::temp_dir().join(format!("asl-rec-hmm-{}.hmm", std::process::id()));
		let model = GaussianHmm::new(
			vec![0.25, 0.75],
			vec![vec![0.9, 0.1], vec![0.0, 1.0]],
			vec![vec![1.5], vec![-2.0]],
			vec![vec![0.3], vec![4.0]],
		).unwrap();

		model.save(&path).unwrap();
		let loaded = GaussianHmm::load(&path).unwrap();
		std::fs::remove_file(&path).unwrap();

		assert_eq!(model, loaded);
		assert_eq!(loaded.n_states(), 2);
		assert_eq!(loaded.n_features(), 1);
	}
}

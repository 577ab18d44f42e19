use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use log::{debug, info};

use serde::{Deserialize, Serialize};
use crate::data::TestSet;
use crate::model::registry::ModelRegistry;

/// Log-likelihood of one test item under every word model.
pub type ScoreMap = HashMap<String, f64>;

/// Outcome of a recognition pass.
///
/// Both vectors are ordered by test item index.
///
/// # Invariants
/// - `probabilities.len() == guesses.len()` == number of test items
/// - Each score map has exactly the registry words as keys
/// - `guesses[i]` has the highest score of `probabilities[i]`; on a tie the
///   word met first in registry order wins
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Recognition {
	/// Per-item scores. A model that failed to score holds `f64::NEG_INFINITY`.
	pub probabilities: Vec<ScoreMap>,
	/// Per-item best word.
	pub guesses: Vec<String>,
}

/// Upper bound accepted by [`RecognizerConfig::set_workers`].
pub const MAX_WORKERS: usize = 1024;

/// Settings of the parallel recognition pass.
///
/// # Invariants
/// - `workers <= MAX_WORKERS`
/// - `chunk_factor >= 1`
#[derive(Clone, Debug)]
pub struct RecognizerConfig {
	/// Number of worker threads, `0` uses one per CPU.
	workers: usize,

	/// Items are split into `workers * chunk_factor` chunks.
	chunk_factor: usize,
}

impl Default for RecognizerConfig {
	fn default() -> Self {
		Self { workers: 0, chunk_factor: 8 }
	}
}

impl RecognizerConfig {
	/// Returns the requested number of workers (`0` = one per CPU).
	pub fn workers(&self) -> usize {
		self.workers
	}

	/// Sets the number of worker threads, `0` uses one per CPU.
	///
	/// # Errors
	/// Returns an error if `workers` is above `MAX_WORKERS`.
	pub fn set_workers(&mut self, workers: usize) -> Result<(), String> {
		if workers > MAX_WORKERS {
			return Err(format!("Workers must be <= {}, got {}", MAX_WORKERS, workers));
		}
		self.workers = workers;
		Ok(())
	}

	/// Returns the current chunk factor.
	pub fn chunk_factor(&self) -> usize {
		self.chunk_factor
	}

	/// Sets the number of chunks per worker.
	///
	/// # Errors
	/// Returns an error if `chunk_factor` is 0.
	pub fn set_chunk_factor(&mut self, chunk_factor: usize) -> Result<(), String> {
		if chunk_factor == 0 {
			return Err("Chunk factor must be >= 1".to_owned());
		}
		self.chunk_factor = chunk_factor;
		Ok(())
	}

	/// Effective number of worker threads.
	pub fn worker_count(&self) -> usize {
		if self.workers == 0 { num_cpus::get() } else { self.workers }
	}
}

/// Scores every test item under every word model and keeps the best word.
///
/// # Behavior
/// - Items are processed in index order `0..item_count()`.
/// - Models are scored in registry order.
/// - A model returning an error (or `NaN`) gets `f64::NEG_INFINITY`; the
///   item is still recognized.
/// - If no model scores above negative infinity, the first registry word is
///   the guess.
///
/// # Errors
/// - The registry is empty.
/// - The test set has no item for an index below `item_count()`.
pub fn recognize<T: TestSet + ?Sized>(models: &ModelRegistry, test_set: &T) -> Result<Recognition, String> {
	if models.is_empty() {
		return Err("No models available for recognition".to_owned());
	}

	let count = test_set.item_count();
	let mut recognition = Recognition {
		probabilities: Vec::with_capacity(count),
		guesses: Vec::with_capacity(count),
	};

	for index in 0..count {
		let (scores, guess) = recognize_item(models, test_set, index)?;
		recognition.probabilities.push(scores);
		recognition.guesses.push(guess);
	}

	info!("Recognized {} items against {} word models", count, models.len());
	Ok(recognition)
}

/// Same result as [`recognize`], computed on several threads.
///
/// # Behavior
/// - Splits item indices into contiguous chunks
///   (`config.worker_count() * config.chunk_factor()` of them).
/// - Each chunk is processed on a scoped thread; results are sent back
///   through a channel with their index and reassembled in order.
///
/// # Errors
/// Same as [`recognize`].
pub fn recognize_parallel<T>(models: &ModelRegistry, test_set: &T, config: &RecognizerConfig) -> Result<Recognition, String>
where
	T: TestSet + Sync + ?Sized,
{
	if models.is_empty() {
		return Err("No models available for recognition".to_owned());
	}

	let count = test_set.item_count();
	if count == 0 {
		return Ok(Recognition::default());
	}

	// Never more chunks than items, never zero
	let chunks = config
		.worker_count()
		.saturating_mul(config.chunk_factor())
		.clamp(1, count);
	let chunk_size = count.div_ceil(chunks);

	let mut results: Vec<Option<(ScoreMap, String)>> = (0..count).map(|_| None).collect();
	let (tx, rx) = mpsc::channel();

	thread::scope(|scope| -> Result<(), String> {
		for start in (0..count).step_by(chunk_size) {
			let tx = tx.clone();
			let end = (start + chunk_size).min(count);

			scope.spawn(move || {
				for index in start..end {
					if tx.send((index, recognize_item(models, test_set, index))).is_err() {
						return;
					}
				}
			});
		}
		drop(tx);

		for (index, result) in rx.iter() {
			results[index] = Some(result?);
		}
		Ok(())
	})?;

	let mut recognition = Recognition {
		probabilities: Vec::with_capacity(count),
		guesses: Vec::with_capacity(count),
	};
	for (index, result) in results.into_iter().enumerate() {
		let (scores, guess) = result.ok_or_else(|| format!("Test item {} was not recognized", index))?;
		recognition.probabilities.push(scores);
		recognition.guesses.push(guess);
	}

	info!(
		"Recognized {} items against {} word models on {} threads",
		count, models.len(), config.worker_count()
	);
	Ok(recognition)
}

/// Scores one item under every model and picks its best word.
fn recognize_item<T: TestSet + ?Sized>(models: &ModelRegistry, test_set: &T, index: usize) -> Result<(ScoreMap, String), String> {
	let (observations, lengths) = test_set
		.get_item(index)
		.ok_or_else(|| format!("Test item {} is missing", index))?;

	let mut scores = ScoreMap::with_capacity(models.len());
	let mut guess: Option<&str> = None;
	let mut best_score = f64::NEG_INFINITY;

	for (word, model) in models.iter() {
		let score = match model.score(observations, lengths) {
			Ok(score) if !score.is_nan() => score,
			Ok(_) => {
				debug!("Item {}: model '{}' returned NaN", index, word);
				f64::NEG_INFINITY
			}
			Err(e) => {
				debug!("Item {}: model '{}' failed: {}", index, word, e);
				f64::NEG_INFINITY
			}
		};

		// Strict comparison: ties keep the earlier word
		if guess.is_none() || score > best_score {
			best_score = score;
			guess = Some(word);
		}
		scores.insert(word.to_owned(), score);
	}

	let guess = guess.ok_or_else(|| "No models available for recognition".to_owned())?;
	Ok((scores, guess.to_owned()))
}

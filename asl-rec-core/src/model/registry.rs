use std::path::Path;

use log::info;

use crate::io;
use super::gaussian_hmm::GaussianHmm;
use super::scorer::SequenceScorer;

/// Ordered mapping from a word to its trained model.
///
/// Entries keep their insertion order. The recognizer walks them in that
/// order, so when two words reach the same score the first inserted wins.
///
/// # Invariants
/// - Words are unique
#[derive(Default)]
pub struct ModelRegistry {
	entries: Vec<(String, Box<dyn SequenceScorer>)>,
}

impl ModelRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self { entries: Vec::new() }
	}

	/// Loads every `.hmm` file of a directory as a `GaussianHmm`.
	///
	/// # Behavior
	/// - The word is the file name without extension (`BOOK.hmm` → `BOOK`).
	/// - Files are loaded in file name order.
	///
	/// # Errors
	/// - Returns an error if the path is not a directory.
	/// - Returns an error if a model fails to load.
	pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self, Box<dyn std::error::Error>> {
		let string_path = match dir.as_ref().to_str() {
			Some(s) => s,
			None => return Err("Invalid filepath".into()),
		};
		let folder = io::normalize_folder(string_path);

		if !folder.is_dir() {
			return Err(format!("Expected a directory, got: {}", folder.display()).into());
		}

		let mut registry = Self::new();
		for file in io::list_files(&folder, "hmm")? {
			let full_path = folder.join(&file);
			let word = io::get_filename(&full_path)?;
			registry.insert(word, GaussianHmm::load(&full_path)?)?;
		}

		info!("Loaded {} word models from {}", registry.len(), folder.display());
		Ok(registry)
	}

	/// Adds a model for `word`.
	///
	/// # Errors
	/// Returns an error if the word already has a model.
	pub fn insert<S, M>(&mut self, word: S, model: M) -> Result<(), String>
	where
		S: Into<String>,
		M: SequenceScorer + 'static,
	{
		let word = word.into();
		if self.contains(&word) {
			return Err(format!("Model already loaded: {}", word));
		}
		self.entries.push((word, Box::new(model)));
		Ok(())
	}

	/// Returns true if `word` has a model.
	pub fn contains(&self, word: &str) -> bool {
		self.entries.iter().any(|(w, _)| w == word)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Words in registry order.
	pub fn words(&self) -> impl Iterator<Item=&str> {
		self.entries.iter().map(|(w, _)| w.as_str())
	}

	/// `(word, model)` pairs in registry order.
	pub fn iter(&self) -> impl Iterator<Item=(&str, &dyn SequenceScorer)> {
		self.entries.iter().map(|(w, m)| (w.as_str(), m.as_ref()))
	}
}

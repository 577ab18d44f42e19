//! Test sets consumed by the recognizer.

/// File-backed test set of single words.
pub mod singles;

/// Indexed collection of unknown observation sequences.
///
/// Items are addressed by a contiguous index `0..item_count()`. Each item
/// yields its observation frames and the lengths splitting them into
/// sub-sequences (see [`crate::model::scorer::SequenceScorer`]).
pub trait TestSet {
	/// Number of items in the set.
	fn item_count(&self) -> usize;

	/// Returns `(observations, lengths)` for an item, `None` if the index is out of range.
	fn get_item(&self, index: usize) -> Option<(&[Vec<f64>], &[usize])>;
}

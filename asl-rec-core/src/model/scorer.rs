/// Anything able to score an observation sequence.
///
/// `observations` holds one feature vector per frame. `lengths` splits the
/// frames into consecutive sub-sequences; its sum must equal the number of
/// frames.
///
/// Implementations return the total log-likelihood, or an error message when
/// the input cannot be scored (shape mismatch, numerical failure...).
/// The recognizer folds any error into `f64::NEG_INFINITY`.
pub trait SequenceScorer: Send + Sync {
	fn score(&self, observations: &[Vec<f64>], lengths: &[usize]) -> Result<f64, String>;
}

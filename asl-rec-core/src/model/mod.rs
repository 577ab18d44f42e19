//! Word models used during recognition.
//!
//! This module groups:
//! - The scorer capability every word model exposes (`SequenceScorer`)
//! - A Gaussian hidden Markov model implementing it (`GaussianHmm`)
//! - The ordered word → model registry (`ModelRegistry`)

/// Capability interface: log-likelihood of an observation sequence.
pub mod scorer;

/// Gaussian HMM with diagonal covariances.
///
/// Supports log-space forward scoring, synthetic sampling
/// and postcard persistence.
pub mod gaussian_hmm;

/// Ordered mapping from word to trained model.
///
/// Iteration order is insertion order, which fixes argmax tie-breaking.
pub mod registry;

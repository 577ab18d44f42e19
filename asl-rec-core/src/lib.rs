//! Word recognition over pre-trained sequence models.
//!
//! This crate scores unknown observation sequences against a registry of
//! per-word models and keeps the best word as a guess. It provides:
//! - A narrow scorer capability (`SequenceScorer`) and a Gaussian HMM implementation
//! - An ordered word → model registry
//! - A test set abstraction with a file-backed implementation
//! - Sequential and parallel recognition passes
//! - A word error rate report
//!
//! Model fitting is not part of this crate: models are loaded already trained.

/// Scorer capability, Gaussian HMM scorer and model registry.
pub mod model;

/// Test set abstraction and the file-backed `SinglesData` set.
pub mod data;

/// Recognition passes (sequential and parallel) and their configuration.
pub mod recognizer;

/// Word error rate report built from guesses and ground-truth words.
pub mod report;

/// I/O utilities (file loading, path helpers, directory listing).
///
/// Only `get_filename` and `list_files` are exposed.
pub mod io;

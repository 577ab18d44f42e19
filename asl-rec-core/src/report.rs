use std::fmt;

use serde::{Deserialize, Serialize};

/// One test item as seen by the report.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReportRow {
	pub expected: String,
	pub guessed: String,
}

impl ReportRow {
	pub fn is_correct(&self) -> bool {
		self.expected == self.guessed
	}
}

/// Word error rate of a recognition pass.
///
/// Built from the guesses and the ground-truth words, both ordered by
/// test item index. Printing the report lists every item and marks wrong
/// guesses with `*`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecognitionReport {
	total: usize,
	correct: usize,
	word_error_rate: f64,
	rows: Vec<ReportRow>,
}

impl RecognitionReport {
	/// Compares `guesses` against `expected`.
	///
	/// # Errors
	/// Returns an error if both lists do not have the same length.
	pub fn new(guesses: &[String], expected: &[String]) -> Result<Self, String> {
		if guesses.len() != expected.len() {
			return Err(format!(
				"Got {} guesses for {} test items",
				guesses.len(), expected.len()
			));
		}

		let rows: Vec<ReportRow> = expected
			.iter()
			.zip(guesses)
			.map(|(expected, guessed)| ReportRow { expected: expected.clone(), guessed: guessed.clone() })
			.collect();
		let total = rows.len();
		let correct = rows.iter().filter(|row| row.is_correct()).count();
		let word_error_rate = if total == 0 { 0.0 } else { 1.0 - correct as f64 / total as f64 };

		Ok(Self { total, correct, word_error_rate, rows })
	}

	pub fn total(&self) -> usize {
		self.total
	}

	pub fn correct(&self) -> usize {
		self.correct
	}

	/// `1 - correct / total`, `0.0` for an empty test set.
	pub fn word_error_rate(&self) -> f64 {
		self.word_error_rate
	}

	/// Wrong guesses with their item index.
	pub fn mismatches(&self) -> impl Iterator<Item=(usize, &ReportRow)> {
		self.rows.iter().enumerate().filter(|(_, row)| !row.is_correct())
	}
}

impl fmt::Display for RecognitionReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f)?;
		writeln!(f, "**** WER = {}", self.word_error_rate)?;
		writeln!(f, "Total correct: {} out of {}", self.correct, self.total)?;
		writeln!(f, "Video  {:<60}  Correct", "Recognized")?;
		writeln!(f, "{}", "=".repeat(101))?;
		for (index, row) in self.rows.iter().enumerate() {
			let guessed = if row.is_correct() { row.guessed.clone() } else { format!("*{}", row.guessed) };
			writeln!(f, "{:>5}: {:<60}  {}", index, guessed, row.expected)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn words(list: &[&str]) -> Vec<String> {
		list.iter().map(|w| w.to_string()).collect()
	}

	#[test]
	fn counts_correct_guesses() {
		let report = RecognitionReport::new(
			&words(&["JOHN", "BOOK", "CAR", "JOHN"]),
			&words(&["JOHN", "BOOK", "VEGETABLE", "MARY"]),
		).unwrap();

		assert_eq!(report.total(), 4);
		assert_eq!(report.correct(), 2);
		assert!((report.word_error_rate() - 0.5).abs() < 1e-12);

		let mismatches: Vec<usize> = report.mismatches().map(|(index, _)| index).collect();
		assert_eq!(mismatches, vec![2, 3]);
	}

	#[test]
	fn empty_report_has_zero_error_rate() {
		let report = RecognitionReport::new(&[], &[]).unwrap();
		assert_eq!(report.word_error_rate(), 0.0);
	}

	#[test]
	fn length_mismatch_is_an_error() {
		assert!(RecognitionReport::new(&words(&["A"]), &words(&[])).is_err());
	}

	#[test]
	fn display_marks_wrong_guesses() {
		let report = RecognitionReport::new(&words(&["JOHN", "CAR"]), &words(&["JOHN", "BOOK"])).unwrap();
		let text = report.to_string();

		assert!(text.contains("**** WER = 0.5"));
		assert!(text.contains("Total correct: 1 out of 2"));
		assert!(text.contains("*CAR"));
		assert!(!text.contains("*JOHN"));
	}
}

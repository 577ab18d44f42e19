use std::collections::BTreeMap;
use std::path::Path;

use log::info;

use serde::{Deserialize, Serialize};
use crate::io::{build_output_path, read_file};
use super::TestSet;

/// One unknown word to recognize.
///
/// An item holds one or more recorded sequences of the same word. They are
/// stored back to back in `frames`; `lengths` gives the size of each one.
///
/// # Invariants
/// - At least one sequence, and no empty sequence
/// - Every frame has the same number of features
/// - `lengths` sums to `frames.len()`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestItem {
	/// Ground-truth word, used for reporting only.
	word: String,
	frames: Vec<Vec<f64>>,
	lengths: Vec<usize>,
}

impl TestItem {
	/// Builds an item from its sequences.
	///
	/// # Errors
	/// Returns an error if an invariant is violated.
	pub fn new<S: Into<String>>(word: S, sequences: Vec<Vec<Vec<f64>>>) -> Result<Self, String> {
		let word = word.into();
		if sequences.is_empty() {
			return Err(format!("Item '{}' has no sequence", word));
		}

		let n_features = sequences[0].first().map_or(0, Vec::len);
		let mut frames = Vec::new();
		let mut lengths = Vec::with_capacity(sequences.len());
		for sequence in sequences {
			if sequence.is_empty() {
				return Err(format!("Item '{}' has an empty sequence", word));
			}
			if sequence.iter().any(|frame| frame.is_empty() || frame.len() != n_features) {
				return Err(format!("Item '{}' frames must all have {} features", word, n_features));
			}
			lengths.push(sequence.len());
			frames.extend(sequence);
		}

		Ok(Self { word, frames, lengths })
	}

	/// Splits the stored frames back into sequences and rebuilds the item
	/// through [`TestItem::new`].
	///
	/// # Errors
	/// Returns an error if `lengths` does not cover `frames` exactly, or if
	/// `new` rejects the sequences.
	fn revalidate(self) -> Result<Self, String> {
		let total = self.lengths.iter().try_fold(0usize, |sum, &length| sum.checked_add(length));
		if total != Some(self.frames.len()) {
			return Err(format!("Item '{}' lengths do not cover its {} frames", self.word, self.frames.len()));
		}

		let mut frames = self.frames.into_iter();
		let sequences: Vec<Vec<Vec<f64>>> = self.lengths
			.iter()
			.map(|&length| frames.by_ref().take(length).collect())
			.collect();
		Self::new(self.word, sequences)
	}

	pub fn word(&self) -> &str {
		&self.word
	}

	pub fn frames(&self) -> &[Vec<f64>] {
		&self.frames
	}

	pub fn lengths(&self) -> &[usize] {
		&self.lengths
	}
}

/// Test set of single words, indexed `0..N-1`.
///
/// Can be built in memory or loaded from a `.dat` text file:
///
/// ```text
/// # <item_id> <sequence_id> <word> <f1> ... <fd>
/// 0 0 JOHN  0.12 -1.30
/// 0 0 JOHN  0.10 -1.10
/// 1 0 BOOK  2.05  0.40
/// ```
///
/// Each line is one frame. Lines sharing an `(item_id, sequence_id)` pair
/// form one sequence, appended in file order. Blank lines and `#` comments
/// are ignored.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SinglesData {
	items: Vec<TestItem>,
}

/// Item being assembled while parsing.
struct PartialItem {
	word: String,
	sequences: Vec<Vec<Vec<f64>>>,
	last_sequence: Option<usize>,
}

impl SinglesData {
	/// Creates a test set; item `i` of `items` gets index `i`.
	pub fn new(items: Vec<TestItem>) -> Self {
		Self { items }
	}

	/// Appends an item with the next index.
	pub fn push(&mut self, item: TestItem) {
		self.items.push(item);
	}

	/// Loads a test set from a binary cache if it exists,
	/// otherwise parses the `.dat` file and writes the cache.
	///
	/// - `filepath` is the `.dat` text file.
	/// - The cache is the sibling `.bin` file, encoded with `postcard`.
	///
	/// # Notes
	/// The cache is not invalidated when the `.dat` file changes; delete it
	/// to force a new parse.
	pub fn load<P: AsRef<Path>>(filepath: P) -> Result<Self, Box<dyn std::error::Error>> {
		let binary_data_path = build_output_path(&filepath, "bin")?;
		let data: Self = if binary_data_path.exists() {
			let bytes = std::fs::read(&binary_data_path)?;
			Self::revalidate(postcard::from_bytes(&bytes)?)?
		} else {
			Self::read_data_file(&filepath, &binary_data_path)?
		};

		info!("Loaded {} test items from {}", data.len(), filepath.as_ref().display());
		Ok(data)
	}

	/// Re-checks a set decoded from a cache: every item through
	/// [`TestItem::new`], and a single feature count across items.
	fn revalidate(data: Self) -> Result<Self, String> {
		let items = data.items
			.into_iter()
			.map(TestItem::revalidate)
			.collect::<Result<Vec<_>, String>>()?;

		let n_features = items.first().map_or(0, |item| item.frames[0].len());
		if items.iter().any(|item| item.frames[0].len() != n_features) {
			return Err(format!("Test items must all have {} features", n_features));
		}
		Ok(Self::new(items))
	}

	/// Parses the text file and serializes the result to `binary_data_path`.
	fn read_data_file<PF, PB>(filename: PF, binary_data_path: PB) -> Result<Self, Box<dyn std::error::Error>>
	where
		PF: AsRef<Path>,
		PB: AsRef<Path>,
	{
		let lines = read_file(&filename)?;
		let data = Self::parse(&lines)?;

		let bytes = postcard::to_stdvec(&data)?;
		std::fs::write(binary_data_path, bytes)?;

		Ok(data)
	}

	/// Parses the lines of a `.dat` file.
	///
	/// # Errors
	/// - A line has fewer than three fields or no feature
	/// - An id or a feature is not a number
	/// - Feature counts differ between lines
	/// - An item is labelled with two different words
	/// - Item ids are not contiguous from 0
	pub fn parse(lines: &[String]) -> Result<Self, String> {
		let mut items: BTreeMap<usize, PartialItem> = BTreeMap::new();
		let mut n_features: Option<usize> = None;

		for (index, line) in lines.iter().enumerate() {
			let line_number = index + 1;
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			let mut fields = line.split_whitespace();
			let (item_id, sequence_id, word) = match (fields.next(), fields.next(), fields.next()) {
				(Some(item_id), Some(sequence_id), Some(word)) => (item_id, sequence_id, word),
				_ => return Err(format!("Line {}: expected '<item_id> <sequence_id> <word> <features...>'", line_number)),
			};
			let item_id: usize = item_id
				.parse()
				.map_err(|_| format!("Line {}: invalid item id '{}'", line_number, item_id))?;
			let sequence_id: usize = sequence_id
				.parse()
				.map_err(|_| format!("Line {}: invalid sequence id '{}'", line_number, sequence_id))?;

			let frame = fields
				.map(|field| field.parse::<f64>().map_err(|_| format!("Line {}: invalid feature '{}'", line_number, field)))
				.collect::<Result<Vec<f64>, String>>()?;
			if frame.is_empty() {
				return Err(format!("Line {}: no features", line_number));
			}
			match n_features {
				None => n_features = Some(frame.len()),
				Some(n) if n != frame.len() => {
					return Err(format!("Line {}: expected {} features, got {}", line_number, n, frame.len()));
				}
				Some(_) => (),
			}

			let item = items.entry(item_id).or_insert_with(|| PartialItem {
				word: word.to_owned(),
				sequences: Vec::new(),
				last_sequence: None,
			});
			if item.word != word {
				return Err(format!(
					"Line {}: item {} is labelled both '{}' and '{}'",
					line_number, item_id, item.word, word
				));
			}

			if item.last_sequence != Some(sequence_id) {
				item.sequences.push(Vec::new());
				item.last_sequence = Some(sequence_id);
			}
			if let Some(sequence) = item.sequences.last_mut() {
				sequence.push(frame);
			}
		}

		let mut data = Self::default();
		for (expected, (item_id, partial)) in items.into_iter().enumerate() {
			if item_id != expected {
				return Err(format!("Item ids must be contiguous from 0, item {} is missing", expected));
			}
			data.push(TestItem::new(partial.word, partial.sequences)?);
		}
		Ok(data)
	}

	/// Ground-truth words ordered by item index.
	pub fn wordlist(&self) -> Vec<String> {
		self.items.iter().map(|item| item.word.clone()).collect()
	}

	/// Ground-truth word of an item.
	pub fn word(&self, index: usize) -> Option<&str> {
		self.items.get(index).map(TestItem::word)
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

impl TestSet for SinglesData {
	fn item_count(&self) -> usize {
		self.items.len()
	}

	fn get_item(&self, index: usize) -> Option<(&[Vec<f64>], &[usize])> {
		self.items.get(index).map(|item| (item.frames(), item.lengths()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lines(text: &str) -> Vec<String> {
		text.lines().map(str::to_owned).collect()
	}

	#[test]
	fn parse_groups_frames_into_items_and_sequences() {
		let data = SinglesData::parse(&lines(
			"# item seq word features\n\
			 1 0 BOOK 2.0 0.5\n\
			 0 0 JOHN 0.1 -1.3\n\
			 0 0 JOHN 0.2 -1.1\n\
			 \n\
			 0 1 JOHN 0.3 -0.9\n",
		)).unwrap();

		assert_eq!(data.item_count(), 2);
		assert_eq!(data.wordlist(), vec!["JOHN".to_owned(), "BOOK".to_owned()]);

		let (frames, lengths) = data.get_item(0).unwrap();
		assert_eq!(frames, &[vec![0.1, -1.3], vec![0.2, -1.1], vec![0.3, -0.9]]);
		assert_eq!(lengths, &[2, 1]);

		let (frames, lengths) = data.get_item(1).unwrap();
		assert_eq!(frames, &[vec![2.0, 0.5]]);
		assert_eq!(lengths, &[1]);

		assert!(data.get_item(2).is_none());
		assert_eq!(data.word(1), Some("BOOK"));
	}

	#[test]
	fn parse_rejects_inconsistent_files() {
		// gap in item ids
		assert!(SinglesData::parse(&lines("0 0 A 1.0\n2 0 B 1.0")).is_err());
		// one item, two words
		assert!(SinglesData::parse(&lines("0 0 A 1.0\n0 0 B 1.0")).is_err());
		// feature count changes
		assert!(SinglesData::parse(&lines("0 0 A 1.0 2.0\n1 0 B 1.0")).is_err());
		// not a number
		assert!(SinglesData::parse(&lines("0 0 A one")).is_err());
		// no feature
		assert!(SinglesData::parse(&lines("0 0 A")).is_err());
	}

	#[test]
	fn empty_file_gives_empty_set() {
		let data = SinglesData::parse(&lines("# nothing\n\n")).unwrap();
		assert!(data.is_empty());
		assert_eq!(data.item_count(), 0);
	}

	#[test]
	fn item_new_validates_sequences() {
		assert!(TestItem::new("A", vec![]).is_err());
		assert!(TestItem::new("A", vec![vec![]]).is_err());
		assert!(TestItem::new("A", vec![vec![vec![1.0]], vec![vec![1.0, 2.0]]]).is_err());

		let item = TestItem::new("A", vec![vec![vec![1.0], vec![2.0]], vec![vec![3.0]]]).unwrap();
		assert_eq!(item.lengths(), &[2, 1]);
		assert_eq!(item.frames().len(), 3);
	}

	#[test]
	fn load_writes_and_reuses_binary_cache() {
		let dir = std::env::temp_dir().join(format!("asl-rec-singles-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let dat = dir.join("test.dat");
		std::fs::write(&dat, "0 0 JOHN 0.5\n1 0 BOOK 1.5\n").unwrap();

		let parsed = SinglesData::load(&dat).unwrap();
		assert!(dir.join("test.bin").exists());

		std::fs::remove_file(&dat).unwrap();
		let cached = SinglesData::load(&dat).unwrap();
		std::fs::remove_dir_all(&dir).unwrap();

		assert_eq!(parsed, cached);
		assert_eq!(cached.wordlist(), vec!["JOHN".to_owned(), "BOOK".to_owned()]);
	}

	#[test]
	fn load_rejects_a_corrupted_cache() {
		let dir = std::env::temp_dir().join(format!("asl-rec-corrupt-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let dat = dir.join("test.dat");
		let bin = dir.join("test.bin");

		// lengths claim more frames than stored
		let short = SinglesData::new(vec![TestItem { word: "JOHN".to_owned(), frames: vec![vec![0.5]], lengths: vec![usize::MAX, 2] }]);
		std::fs::write(&bin, postcard::to_stdvec(&short).unwrap()).unwrap();
		let short_result = SinglesData::load(&dat);

		// feature count changes between items
		let mixed = SinglesData::new(vec![
			TestItem::new("JOHN", vec![vec![vec![0.5]]]).unwrap(),
			TestItem::new("BOOK", vec![vec![vec![0.5, 1.0]]]).unwrap(),
		]);
		std::fs::write(&bin, postcard::to_stdvec(&mixed).unwrap()).unwrap();
		let mixed_result = SinglesData::load(&dat);

		// empty sequence hidden in the lengths
		let hollow = SinglesData::new(vec![TestItem { word: "GO".to_owned(), frames: vec![vec![0.5]], lengths: vec![0, 1] }]);
		std::fs::write(&bin, postcard::to_stdvec(&hollow).unwrap()).unwrap();
		let hollow_result = SinglesData::load(&dat);

		std::fs::remove_dir_all(&dir).unwrap();
		assert!(short_result.is_err());
		assert!(mixed_result.is_err());
		assert!(hollow_result.is_err());
	}
}

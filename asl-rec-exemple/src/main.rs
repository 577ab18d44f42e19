use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use asl_rec_core::data::singles::SinglesData;
use asl_rec_core::io::list_files;
use asl_rec_core::model::gaussian_hmm::GaussianHmm;
use asl_rec_core::model::registry::ModelRegistry;
use asl_rec_core::recognizer::{recognize, recognize_parallel, RecognizerConfig};
use asl_rec_core::report::RecognitionReport;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DATA_DIR: &str = "./data";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Write a small synthetic data set the first time (word models + test set)
    let data_dir = Path::new(DATA_DIR);
    if !data_dir.is_dir() || list_files(data_dir, "hmm")?.is_empty() {
        write_demo_data(data_dir)?;
    }

    // Load all word models from the "data" directory (.hmm files)
    let models = ModelRegistry::load_dir(DATA_DIR)?;

    // Load the test set, test.bin is used automatically if existing
    let test_set = SinglesData::load(data_dir.join("test.dat"))?;

    // Score every test item under every word model
    let recognition = recognize(&models, &test_set)?;

    // The parallel pass must give exactly the same output
    let mut config = RecognizerConfig::default();
    config.set_chunk_factor(4)?;
    let parallel = recognize_parallel(&models, &test_set, &config)?;
    if parallel != recognition {
        return Err("Parallel recognition differs from sequential recognition".into());
    }

    // Show the log-likelihoods of the first items, best word first
    for (index, scores) in recognition.probabilities.iter().enumerate().take(3) {
        let mut sorted: Vec<(&String, &f64)> = scores.iter().collect();
        sorted.sort_by(|a, b| b.1.total_cmp(a.1));
        println!("Item {}: {:?}", index, sorted);
    }

    let report = RecognitionReport::new(&recognition.guesses, &test_set.wordlist())?;
    println!("{}", report);

    Ok(())
}

/// Three-state left-to-right word model over two features.
fn word_model(offset: f64) -> Result<GaussianHmm, String> {
    GaussianHmm::new(
        vec![1.0, 0.0, 0.0],
        vec![
            vec![0.6, 0.4, 0.0],
            vec![0.0, 0.6, 0.4],
            vec![0.0, 0.0, 1.0],
        ],
        vec![
            vec![offset, 0.0],
            vec![offset + 1.0, 1.0],
            vec![offset + 2.0, 0.0],
        ],
        vec![vec![0.5, 0.5]; 3],
    )
}

/// Saves one model per word and a sampled test set in `data_dir`.
fn write_demo_data(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(data_dir)?;

    let words = [("JOHN", 0.0), ("BOOK", 1.5), ("GO", 3.0)];
    let mut rng = StdRng::seed_from_u64(2017);
    let mut lines = String::from("# <item_id> <sequence_id> <word> <features...>\n");
    let mut item_id = 0;

    for (word, offset) in words {
        let model = word_model(offset)?;
        model.save(data_dir.join(format!("{}.hmm", word)))?;

        for _ in 0..5 {
            let n_frames = rng.random_range(8..16);
            for frame in model.sample(n_frames, &mut rng) {
                let features: Vec<String> = frame.iter().map(|x| format!("{:.4}", x)).collect();
                writeln!(lines, "{} 0 {} {}", item_id, word, features.join(" "))?;
            }
            item_id += 1;
        }
    }

    fs::write(data_dir.join("test.dat"), lines)?;

    // A cache from a previous data set would shadow the new file
    let cache = data_dir.join("test.bin");
    if cache.exists() {
        fs::remove_file(cache)?;
    }

    info!("Wrote {} demo models and {} test items to {}", words.len(), item_id, data_dir.display());
    Ok(())
}

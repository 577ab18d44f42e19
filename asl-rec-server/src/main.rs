use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};
use log::info;

use serde::{Deserialize, Serialize};
use asl_rec_core::data::singles::SinglesData;
use asl_rec_core::io::{get_filename, list_files};
use asl_rec_core::model::gaussian_hmm::GaussianHmm;
use asl_rec_core::model::registry::ModelRegistry;
use asl_rec_core::recognizer::{recognize, recognize_parallel, Recognition, RecognizerConfig};
use asl_rec_core::report::RecognitionReport;

/// Struct representing query parameters for the `/v1/recognize` endpoint
#[derive(Deserialize)]
struct RecognizeParams {
	parallel: Option<bool>,
	workers: Option<usize>, // 0 -> one per CPU
}

#[derive(Deserialize)]
struct ModelQuery {
	names: Option<String>
}

#[derive(Deserialize)]
struct TestSetQuery {
	name: Option<String>
}

/// Body of a `/v1/recognize` answer.
///
/// Failed scores are `-inf`, which JSON can not express: they are sent as `null`.
#[derive(Serialize)]
struct RecognizeResponse {
	#[serde(flatten)]
	recognition: Recognition,
	report: RecognitionReport,
}

/// Server settings read from the environment.
struct ServerConfig {
	host: String,
	port: u16,
	data_dir: PathBuf,
}

impl ServerConfig {
	/// Reads `ASL_REC_HOST`, `ASL_REC_PORT` and `ASL_REC_DATA`.
	///
	/// Defaults: `127.0.0.1`, `5000` and `./data`.
	fn from_env() -> Result<Self, String> {
		let host = env::var("ASL_REC_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
		let port = match env::var("ASL_REC_PORT") {
			Ok(port) => port.parse().map_err(|_| format!("Invalid ASL_REC_PORT: '{}'", port))?,
			Err(_) => 5000,
		};
		let data_dir = PathBuf::from(env::var("ASL_REC_DATA").unwrap_or_else(|_| "./data".to_owned()));
		Ok(Self { host, port, data_dir })
	}
}

struct SharedData {
	data_dir: PathBuf,
	models: ModelRegistry,
	test_set: Option<SinglesData>,
}

/// Rejects names that would escape the data folder.
fn check_name(name: &str) -> Result<&str, String> {
	if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
		return Err(format!("Invalid name: '{}'", name));
	}
	Ok(name)
}

/// HTTP GET endpoint `/v1/recognize`
///
/// Recognizes the loaded test set with the loaded word models.
/// Returns scores, guesses and the error report as JSON.
#[get("/v1/recognize")]
async fn get_recognize(data: web::Data<Mutex<SharedData>>, query: web::Query<RecognizeParams>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let test_set = match &shared_data.test_set {
		Some(test_set) => test_set,
		None => return HttpResponse::BadRequest().body("No test set loaded"),
	};

	let result = if query.parallel.unwrap_or(false) {
		let mut config = RecognizerConfig::default();
		if let Err(e) = config.set_workers(query.workers.unwrap_or(0)) {
			return HttpResponse::BadRequest().body(e);
		}
		recognize_parallel(&shared_data.models, test_set, &config)
	} else {
		recognize(&shared_data.models, test_set)
	};
	let recognition = match result {
		Ok(recognition) => recognition,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	match RecognitionReport::new(&recognition.guesses, &test_set.wordlist()) {
		Ok(report) => {
			info!("Recognition done, WER = {}", report.word_error_rate());
			HttpResponse::Ok().json(RecognizeResponse { recognition, report })
		}
		Err(e) => HttpResponse::InternalServerError().body(e),
	}
}

#[get("/v1/models")]
async fn get_models(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	match list_files(&shared_data.data_dir, "hmm") {
		Ok(files) => {
			let names: Vec<String> = files.iter().filter_map(|file| get_filename(file).ok()).collect();
			HttpResponse::Ok().body(names.join("\n"))
		}
		Err(_) => HttpResponse::InternalServerError().body("Failed to list models")
	}
}

#[get("/v1/loaded_models")]
async fn get_loaded_models(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	HttpResponse::Ok().body(shared_data.models.words().collect::<Vec<_>>().join("\n"))
}

/// HTTP PUT endpoint `/v1/load_models?names=A,B`
///
/// Replaces the registry with the given models, in the given order.
/// The previous registry is kept if any model fails to load.
#[put("/v1/load_models")]
async fn put_models(data: web::Data<Mutex<SharedData>>, query: web::Query<ModelQuery>) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let query_names = match &query.names {
		Some(s) if !s.trim().is_empty() => s.trim(),
		_ => return HttpResponse::BadRequest().body("Missing or empty model name"),
	};

	let mut models = ModelRegistry::new();
	for name in query_names.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
		let name = match check_name(name) {
			Ok(name) => name,
			Err(e) => return HttpResponse::BadRequest().body(e),
		};
		let model_path = shared_data.data_dir.join(format!("{}.hmm", name));
		let model = match GaussianHmm::load(&model_path) {
			Ok(m) => m,
			Err(e) => return HttpResponse::InternalServerError().body(format!("Failed to load model '{}': {}", name, e)),
		};
		if let Err(e) = models.insert(name, model) {
			return HttpResponse::BadRequest().body(e);
		}
	}

	info!("Loaded {} word models", models.len());
	shared_data.models = models;
	HttpResponse::Ok().body("Models loaded successfully")
}

/// HTTP PUT endpoint `/v1/load_test_set?name=test`
///
/// Loads `<name>.dat` (or its `.bin` cache) from the data folder.
#[put("/v1/load_test_set")]
async fn put_test_set(data: web::Data<Mutex<SharedData>>, query: web::Query<TestSetQuery>) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let name = match query.name.as_deref().map(str::trim).map(check_name) {
		Some(Ok(name)) => name,
		Some(Err(e)) => return HttpResponse::BadRequest().body(e),
		None => return HttpResponse::BadRequest().body("Missing test set name"),
	};

	let path = shared_data.data_dir.join(format!("{}.dat", name));
	let test_set = match SinglesData::load(&path) {
		Ok(test_set) => test_set,
		Err(e) => return HttpResponse::InternalServerError().body(format!("Failed to load test set: {}", e)),
	};

	let body = format!("Loaded {} test items", test_set.len());
	shared_data.test_set = Some(test_set);
	HttpResponse::Ok().body(body)
}

/// Main entry point for the server.
///
/// Starts with an empty registry and no test set; both are loaded
/// through the `PUT` endpoints.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

	let config = ServerConfig::from_env()
		.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

	let shared_data = SharedData {
		data_dir: config.data_dir.clone(),
		models: ModelRegistry::new(),
		test_set: None,
	};
	let shared_data = web::Data::new(Mutex::new(shared_data));

	info!("Serving {} on {}:{}", config.data_dir.display(), config.host, config.port);
	HttpServer::new(move || {
		App::new()
			.wrap(Logger::default())
			.wrap(Cors::permissive())
			.app_data(shared_data.clone())
			.service(get_recognize)
			.service(get_models)
			.service(get_loaded_models)
			.service(put_models)
			.service(put_test_set)
	})
		.bind((config.host.as_str(), config.port))?
		.run()
		.await
}

use anyhow::Result;
use serde::Deserialize;

/// Runtime configuration for Prism.
///
/// Values are loaded from (in order): `config` file (optional) and environment
/// variables prefixed with `PRISM_` (e.g. `PRISM_PORT`). Capability endpoints
/// (fetcher, semantic scorer) are configured here so pipelines receive fully
/// resolved settings and never read the environment themselves.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Settings {
	pub host: String,
	pub port: u16,
	pub database_url: String,
	/// Messages-style JSON endpoint of the semantic scorer provider.
	pub scorer_base_url: String,
	pub scorer_api_key: Option<String>,
	pub scorer_model: String,
	/// Per-attempt fetch timeout in seconds.
	pub fetch_timeout_secs: u64,
	/// Per-attempt semantic scorer timeout in seconds.
	pub scorer_timeout_secs: u64,
	/// Bounded fan-out: concurrent child pipelines per batch.
	pub batch_concurrency: usize,
	/// Optional wall-clock bound for a whole batch, in seconds. When it
	/// elapses, still-running children are cooperatively cancelled.
	pub batch_timeout_secs: Option<u64>,
	/// Worker pool sizes (independent pools).
	pub job_workers: usize,
	pub batch_workers: usize,
	pub log_level: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 8080,
			database_url: "sqlite://prism.db?mode=rwc".to_string(),
			scorer_base_url: "https://api.anthropic.com/v1/messages".to_string(),
			scorer_api_key: None,
			scorer_model: "default".to_string(),
			fetch_timeout_secs: 30,
			scorer_timeout_secs: 30,
			batch_concurrency: 3,
			batch_timeout_secs: None,
			job_workers: 3,
			batch_workers: 3,
			log_level: Some("info".to_string()),
		}
	}
}

/// Partial settings used to overlay environment/file values on top of defaults.
#[derive(Debug, Deserialize)]
struct PartialSettings {
	host: Option<String>,
	port: Option<u16>,
	database_url: Option<String>,
	scorer_base_url: Option<String>,
	scorer_api_key: Option<String>,
	scorer_model: Option<String>,
	fetch_timeout_secs: Option<u64>,
	scorer_timeout_secs: Option<u64>,
	batch_concurrency: Option<usize>,
	batch_timeout_secs: Option<u64>,
	job_workers: Option<usize>,
	batch_workers: Option<usize>,
	log_level: Option<String>,
}

/// Load settings from config file (optional) and environment variables.
pub fn load() -> Result<Settings> {
	let builder = config::Config::builder()
		.add_source(config::File::with_name("config").required(false))
		// Use a double-underscore separator so single-underscore env names like
		// `PRISM_DATABASE_URL` map to `database_url` instead of nested keys.
		.add_source(config::Environment::with_prefix("PRISM").separator("__"));

	let cfg = builder.build()?;
	let partial: PartialSettings = cfg.try_deserialize()?;

	let mut s = Settings::default();
	if let Some(host) = partial.host {
		s.host = host;
	}
	if let Some(port) = partial.port {
		s.port = port;
	}
	if let Some(db) = partial.database_url {
		s.database_url = db;
	}
	if let Some(base) = partial.scorer_base_url {
		s.scorer_base_url = base;
	}
	if let Some(key) = partial.scorer_api_key {
		s.scorer_api_key = Some(key);
	}
	if let Some(model) = partial.scorer_model {
		s.scorer_model = model;
	}
	if let Some(t) = partial.fetch_timeout_secs {
		s.fetch_timeout_secs = t;
	}
	if let Some(t) = partial.scorer_timeout_secs {
		s.scorer_timeout_secs = t;
	}
	if let Some(c) = partial.batch_concurrency {
		s.batch_concurrency = c;
	}
	if let Some(t) = partial.batch_timeout_secs {
		s.batch_timeout_secs = Some(t);
	}
	if let Some(w) = partial.job_workers {
		s.job_workers = w;
	}
	if let Some(w) = partial.batch_workers {
		s.batch_workers = w;
	}
	if let Some(level) = partial.log_level {
		s.log_level = Some(level);
	}

	// Explicitly prefer direct environment variables when present. Some
	// environments (CI, test harnesses) may set env vars in ways the `config`
	// crate doesn't map as expected; read the common ones directly so explicit
	// overrides take effect.
	if let Ok(h) = std::env::var("PRISM_HOST") {
		if !h.is_empty() {
			s.host = h;
		}
	}
	if let Ok(p) = std::env::var("PRISM_PORT") {
		if let Ok(pn) = p.parse::<u16>() {
			s.port = pn;
		}
	}
	if let Ok(db) = std::env::var("PRISM_DATABASE_URL") {
		if !db.is_empty() {
			s.database_url = db;
		}
	}
	if let Ok(k) = std::env::var("PRISM_SCORER_API_KEY") {
		if !k.is_empty() {
			s.scorer_api_key = Some(k);
		}
	}
	if let Ok(l) = std::env::var("PRISM_LOG_LEVEL") {
		if !l.is_empty() {
			s.log_level = Some(l);
		}
	}

	Ok(s)
}

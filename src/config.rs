//! Worker configuration (spec §10.1): three-tier precedence — config file,
//! then environment variables, then CLI flags — mirroring the teacher's
//! `Config::load()` shape, retargeted at the env vars spec §6 names
//! (`MONGO_ENDPOINT`, `LAMAPI_ENDPOINT`, ...).

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub mongo: MongoConfig,
    pub redis: RedisConfig,
    pub lamapi: LamApiConfig,
    pub model: ModelConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub endpoint: String,
    /// Redis logical DB index holding the `STOP` job-signal key (spec §6).
    pub job_db: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LamApiConfig {
    pub endpoint: String,
    pub token: String,
    /// Secondary bearer token accepted by some deployments (`ALLIGATOR_TOKEN`).
    pub alligator_token: Option<String>,
    pub default_kg: String,
    /// Candidate list length per NE cell when a page doesn't override it.
    pub default_limit: usize,
    /// Semaphore bound on in-flight KG requests (spec §4.1/§5, default 50).
    pub max_concurrent_requests: usize,
    /// Per-call deadline (spec §5, default 1000s).
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the ρ (initial prediction) model weights.
    pub pn_model_path: String,
    /// Path to the ρ′ (revision prediction) model weights.
    pub rn_model_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How long to sleep between claim attempts when no page is `TODO`.
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub poll_interval_secs: u64,
    /// Exit the claim/poll loop once `STOP` is observed with no `TODO` page
    /// left, rather than polling forever (spec §6 "Job signal").
    pub exit_on_stop_when_idle: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command-line overrides, highest precedence (spec §10.1).
#[derive(Parser, Debug, Clone)]
#[command(name = "alligator-worker")]
#[command(version, about = "Knowledge-graph table annotation worker")]
pub struct CommandLineArgs {
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    #[arg(long, value_name = "URI")]
    pub mongo_uri: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub mongo_database: Option<String>,

    #[arg(long, value_name = "URL")]
    pub redis_endpoint: Option<String>,

    #[arg(long, value_name = "URL")]
    pub lamapi_endpoint: Option<String>,

    #[arg(long, value_name = "TOKEN")]
    pub lamapi_token: Option<String>,

    #[arg(long, value_name = "N")]
    pub max_concurrent_requests: Option<usize>,

    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, value_name = "N")]
    pub default_limit: Option<usize>,
}

impl Config {
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (spec §6 names)
    /// 3. Configuration file (`conf/config.toml`)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables (spec §6): `MONGO_ENDPOINT`,
    /// `MONGO_INITDB_ROOT_USERNAME`, `MONGO_INITDB_ROOT_PASSWORD`,
    /// `MONGO_DBNAME`, `REDIS_ENDPOINT`, `REDIS_JOB_DB`, `LAMAPI_ENDPOINT`,
    /// `LAMAPI_TOKEN`, `ALLIGATOR_TOKEN`.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MONGO_ENDPOINT") {
            tracing::info!("Override mongo.uri from env: {v}");
            self.mongo.uri = v;
        }
        if let Ok(v) = std::env::var("MONGO_INITDB_ROOT_USERNAME") {
            self.mongo.username = Some(v);
        }
        if let Ok(v) = std::env::var("MONGO_INITDB_ROOT_PASSWORD") {
            self.mongo.password = Some(v);
        }
        if let Ok(v) = std::env::var("MONGO_DBNAME") {
            tracing::info!("Override mongo.database from env: {v}");
            self.mongo.database = v;
        }
        if let Ok(v) = std::env::var("REDIS_ENDPOINT") {
            tracing::info!("Override redis.endpoint from env: {v}");
            self.redis.endpoint = v;
        }
        if let Ok(v) = std::env::var("REDIS_JOB_DB")
            && let Ok(v) = v.parse()
        {
            self.redis.job_db = v;
        }
        if let Ok(v) = std::env::var("LAMAPI_ENDPOINT") {
            tracing::info!("Override lamapi.endpoint from env: {v}");
            self.lamapi.endpoint = v;
        }
        if let Ok(v) = std::env::var("LAMAPI_TOKEN") {
            self.lamapi.token = v;
        }
        if let Ok(v) = std::env::var("ALLIGATOR_TOKEN") {
            self.lamapi.alligator_token = Some(v);
        }
        if let Ok(v) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(v) = &args.mongo_uri {
            tracing::info!("Override mongo.uri from CLI: {v}");
            self.mongo.uri = v.clone();
        }
        if let Some(v) = &args.mongo_database {
            self.mongo.database = v.clone();
        }
        if let Some(v) = &args.redis_endpoint {
            self.redis.endpoint = v.clone();
        }
        if let Some(v) = &args.lamapi_endpoint {
            tracing::info!("Override lamapi.endpoint from CLI: {v}");
            self.lamapi.endpoint = v.clone();
        }
        if let Some(v) = &args.lamapi_token {
            self.lamapi.token = v.clone();
        }
        if let Some(v) = args.max_concurrent_requests {
            self.lamapi.max_concurrent_requests = v;
        }
        if let Some(v) = &args.log_level {
            self.logging.level = v.clone();
        }
        if let Some(v) = args.default_limit {
            self.lamapi.default_limit = v;
        }
    }

    /// Fatal on a missing required setting or unreadable model file (spec §7
    /// taxonomy item 4: "Configuration error ... worker aborts on startup").
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.mongo.uri.is_empty() {
            anyhow::bail!("mongo.uri (MONGO_ENDPOINT) must be set");
        }
        if self.mongo.database.is_empty() {
            anyhow::bail!("mongo.database (MONGO_DBNAME) must be set");
        }
        if self.lamapi.endpoint.is_empty() {
            anyhow::bail!("lamapi.endpoint (LAMAPI_ENDPOINT) must be set");
        }
        if self.lamapi.token.is_empty() {
            anyhow::bail!("lamapi.token (LAMAPI_TOKEN) must be set");
        }
        if self.lamapi.max_concurrent_requests == 0 {
            anyhow::bail!("lamapi.max_concurrent_requests must be > 0");
        }
        if self.lamapi.default_limit == 0 {
            anyhow::bail!("lamapi.default_limit must be > 0");
        }
        if !Path::new(&self.model.pn_model_path).exists() {
            anyhow::bail!("model.pn_model_path does not exist: {}", self.model.pn_model_path);
        }
        if !Path::new(&self.model.rn_model_path).exists() {
            anyhow::bail!("model.rn_model_path does not exist: {}", self.model.rn_model_path);
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths = ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];
        possible_paths.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self { uri: String::new(), username: None, password: None, database: String::new() }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { endpoint: "redis://127.0.0.1:6379".to_string(), job_db: 0 }
    }
}

impl Default for LamApiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            alligator_token: None,
            default_kg: "wikidata".to_string(),
            default_limit: 50,
            max_concurrent_requests: 50,
            request_timeout_secs: 1000,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { pn_model_path: "models/pn.json".to_string(), rn_model_path: "models/rn.json".to_string() }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { poll_interval_secs: 5, exit_on_stop_when_idle: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,alligator=debug".to_string(), file: Some("logs/alligator-worker.log".to_string()) }
    }
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }
    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '1000s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_mongo_uri() {
        let config = Config {
            mongo: MongoConfig { database: "alligator".into(), ..Default::default() },
            lamapi: LamApiConfig { endpoint: "http://lamapi".into(), token: "t".into(), ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_duration_accepts_plain_seconds_and_suffixed() {
        assert_eq!(parse_duration_to_secs("1000").unwrap(), 1000);
        assert_eq!(parse_duration_to_secs("5m").unwrap(), 300);
    }
}

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chunkrelay_blob::{BlobConfig, S3Config, UploadRules};
use chunkrelay_core::{RelayConfig, RelayConfigSnapshot};
use chunkrelay_pipeline::{
    ClientCredentialsConfig, HttpEngineConfig, HttpResultConfig, DEFAULT_MAX_ITEMS_PER_PAGE,
};

/// `CHUNKRELAY__BLOB__BUCKET` -> `blob.bucket`
pub const ENV_PREFIX: &str = "CHUNKRELAY__";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fill every key the service reads that has no value yet.
pub fn apply_defaults(config: &mut RelayConfig) {
    config.set_default("http.host", "127.0.0.1");
    config.set_default("http.port", "3036");
    config.set_default("upload.block_digits", "8");
    config.set_default("upload.max_chunk_bytes", (100u64 * 1024 * 1024).to_string());
    config.set_default("upload.session_ttl_secs", "86400");
    config.set_default("upload.finalized_retention_secs", "604800");
    config.set_default("upload.sweep_interval_secs", "300");
    config.set_default("blob.backend", "memory");
    config.set_default("blob.region", "us-east-1");
    config.set_default("pipeline.backend", "memory");
    config.set_default("pipeline.name", "csv-ingest");
    config.set_default("pipeline.api_version", "2018-06-01");
    config.set_default("results.backend", "memory");
    config.set_default(
        "results.max_items_per_page",
        DEFAULT_MAX_ITEMS_PER_PAGE.to_string(),
    );
}

/// `.env`, then the process environment, then defaults.
pub fn load() -> RelayConfig {
    dotenvy::dotenv().ok();
    let mut config = RelayConfig::new();
    config.load_env(ENV_PREFIX);
    apply_defaults(&mut config);
    config
}

#[derive(Debug, Clone)]
pub enum BlobBackend {
    Memory,
    S3(S3Config),
}

impl BlobBackend {
    pub fn name(&self) -> &'static str {
        match self {
            BlobBackend::Memory => "memory",
            BlobBackend::S3(_) => "s3",
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineBackend {
    Memory,
    Http(HttpEngineConfig),
}

#[derive(Debug, Clone)]
pub enum ResultsBackend {
    Memory,
    Http(HttpResultConfig),
}

/// Typed view of the configuration, validated once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub blob: BlobConfig,
    pub sweep_interval: Duration,
    pub blob_backend: BlobBackend,
    pub pipeline_name: String,
    pub pipeline_backend: PipelineBackend,
    pub results_backend: ResultsBackend,
    pub max_items_per_page: u32,
    /// Client-credentials grant for the HTTP backends; `None` uses a static dev token.
    pub auth: Option<ClientCredentialsConfig>,
}

fn number<T: std::str::FromStr>(config: &RelayConfigSnapshot, key: &str) -> Result<T> {
    let raw = config.require(key)?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| anyhow!("configuration value '{key}' must be a number (got '{raw}')"))
}

fn seconds(config: &RelayConfigSnapshot, key: &str) -> Result<Duration> {
    Ok(Duration::from_secs(number(config, key)?))
}

impl Settings {
    pub fn from_config(config: &RelayConfigSnapshot) -> Result<Self> {
        let rules = UploadRules::new()
            .with_block_digits(number(config, "upload.block_digits")?)
            .with_max_chunk_bytes(number(config, "upload.max_chunk_bytes")?);
        let blob = BlobConfig::new()
            .with_upload_rules(rules)
            .with_session_ttl(seconds(config, "upload.session_ttl_secs")?)
            .with_finalized_retention(seconds(config, "upload.finalized_retention_secs")?);

        let max_items_per_page: u32 = number(config, "results.max_items_per_page")?;
        if max_items_per_page == 0 {
            bail!("results.max_items_per_page must be greater than zero");
        }

        let sweep_interval = seconds(config, "upload.sweep_interval_secs")?;
        if sweep_interval.is_zero() {
            bail!("upload.sweep_interval_secs must be greater than zero");
        }

        let blob_backend = match config.require("blob.backend")?.as_str() {
            "memory" => BlobBackend::Memory,
            "s3" => BlobBackend::S3(S3Config {
                bucket: config.require("blob.bucket")?,
                region: config.require("blob.region")?,
                endpoint_url: config.get_string("blob.endpoint"),
                access_key_id: config.get_string("blob.access_key_id"),
                secret_access_key: config.get_string("blob.secret_access_key"),
            }),
            other => bail!("unknown blob.backend '{other}' (expected memory or s3)"),
        };

        let pipeline_backend = match config.require("pipeline.backend")?.as_str() {
            "memory" => PipelineBackend::Memory,
            "http" => PipelineBackend::Http(HttpEngineConfig {
                base_url: config.require("pipeline.base_url")?,
                api_version: config.require("pipeline.api_version")?,
                timeout: HTTP_TIMEOUT,
            }),
            other => bail!("unknown pipeline.backend '{other}' (expected memory or http)"),
        };

        let results_backend = match config.require("results.backend")?.as_str() {
            "memory" => ResultsBackend::Memory,
            "http" => ResultsBackend::Http(HttpResultConfig {
                base_url: config.require("results.base_url")?,
                timeout: HTTP_TIMEOUT,
            }),
            other => bail!("unknown results.backend '{other}' (expected memory or http)"),
        };

        let auth = match config.get_string("auth.token_url") {
            Some(token_url) => Some(ClientCredentialsConfig {
                token_url,
                client_id: config.require("auth.client_id")?,
                client_secret: config.require("auth.client_secret")?,
                scopes: config
                    .get("auth.scope")
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            }),
            None => None,
        };
        let uses_http = matches!(pipeline_backend, PipelineBackend::Http(_))
            || matches!(results_backend, ResultsBackend::Http(_));
        if uses_http && auth.is_none() {
            bail!("auth.token_url, auth.client_id and auth.client_secret are required for http backends");
        }

        Ok(Self {
            host: config.require("http.host")?,
            port: number(config, "http.port")?,
            blob,
            sweep_interval,
            blob_backend,
            pipeline_name: config.require("pipeline.name")?,
            pipeline_backend,
            results_backend,
            max_items_per_page,
            auth,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub port: String,
    pub features: Features,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    // CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,

    // Background embedding worker
    #[serde(default = "default_num_workers")]
    pub num_embedding_workers: usize,
    #[serde(default = "default_worker_interval_secs")]
    pub worker_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_cors_enabled() -> bool {
    true
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string(), "http://localhost:8501".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_num_workers() -> usize {
    10
}

fn default_worker_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Features {
    /// Call the embedding service at all
    #[serde(default)]
    pub embedding: bool,
    /// Defer embedding to the background worker instead of ingesting synchronously
    #[serde(default)]
    pub embedding_job: bool,
    /// Memoize embeddings in the cache layer
    #[serde(default)]
    pub embedding_cache: bool,
    /// Run the risk classifier on ingestion
    #[serde(default)]
    pub risk_analysis: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Ada-002 vectors are 1536 wide
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default = "default_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_embedding_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            api_key: None,
            insecure_skip_verify: false,
            cache_ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis URL; `None` selects the in-process store
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command deadline against the remote backend
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// LRU capacity of the in-process store
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    #[serde(default = "default_ttl_secs")]
    pub query_ttl_secs: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_op_timeout_ms() -> u64 {
    5000
}

fn default_memory_capacity() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            memory_capacity: default_memory_capacity(),
            query_ttl_secs: default_ttl_secs(),
        }
    }
}

/// Hybrid scoring constants. Defaults must not change: ranked output depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// BM25 term-frequency saturation
    #[serde(default = "default_k1")]
    pub k1: f64,
    /// BM25 length normalization
    #[serde(default = "default_b")]
    pub b: f64,
    /// Excerpt length in characters
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.7;
pub const DEFAULT_LEXICAL_WEIGHT: f64 = 0.3;
pub const DEFAULT_BM25_K1: f64 = 1.5;
pub const DEFAULT_BM25_B: f64 = 0.75;

fn default_vector_weight() -> f64 {
    DEFAULT_VECTOR_WEIGHT
}

fn default_lexical_weight() -> f64 {
    DEFAULT_LEXICAL_WEIGHT
}

fn default_k1() -> f64 {
    DEFAULT_BM25_K1
}

fn default_b() -> f64 {
    DEFAULT_BM25_B
}

fn default_excerpt_chars() -> usize {
    200
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            k1: default_k1(),
            b: default_b(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Evict the oldest-ingested documents beyond this count (unbounded when unset)
    #[serde(default)]
    pub max_documents: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Documents at or above this score raise an alert
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_alert_threshold() -> f64 {
    0.7
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            cache_ttl_secs: default_ttl_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Overlay settings from the process environment
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("REDIS_HOST") {
            let port = var("REDIS_PORT").unwrap_or_else(|| "6379".to_string());
            let db = var("REDIS_DB").unwrap_or_else(|| "0".to_string());
            let auth = match var("REDIS_PASSWORD") {
                Some(password) if !password.is_empty() => {
                    format!(":{}@", utf8_percent_encode(&password, NON_ALPHANUMERIC))
                }
                _ => String::new(),
            };
            self.cache.redis_url = Some(format!("redis://{}{}:{}/{}", auth, host, port, db));
        }

        if let Some(key) = var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.embedding.api_key = Some(key);
            }
        }

        if let Some(port) = var("REGWATCH_PORT") {
            self.port = port;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: "8080".to_string(),
            features: Features::default(),
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
            scoring: ScoringConfig::default(),
            store: StoreConfig::default(),
            risk: RiskConfig::default(),
            cors: CorsConfig::default(),
            num_embedding_workers: default_num_workers(),
            worker_interval_secs: default_worker_interval_secs(),
        }
    }
}

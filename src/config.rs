use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,

    // Upstream RPC
    pub helius_rpc_url: String,
    pub sol_commitment: String,

    // Key backend
    pub mongo_uri: String,
    pub mongo_db: String,

    // Admission control
    pub rate_limit_rpm: u32,

    // Caching and fan-out
    pub cache_ttl: Duration,
    pub key_cache_ttl: Duration,
    pub balance_timeout: Duration,
    pub max_concurrency: usize,

    // Key issuance endpoints
    pub admin_token: Option<String>,
    pub public_signup: bool,
}

fn getenv(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn duration_or(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| humantime::parse_duration(&v).ok())
        .unwrap_or(default)
}

fn signup_enabled(value: Option<String>) -> bool {
    match value {
        Some(v) => {
            let normalized = v.trim().to_ascii_lowercase();
            !matches!(normalized.as_str(), "0" | "false" | "no" | "off")
        }
        None => true,
    }
}

impl Config {
    /// Loads configuration from environment variables with sane defaults.
    /// Unparseable values fall back to their defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Config {
            port: parse_or(env::var("PORT").ok(), 8080),
            helius_rpc_url: getenv("HELIUS_RPC_URL", ""),
            sol_commitment: getenv("SOL_COMMITMENT", "finalized"),
            mongo_uri: getenv("MONGO_URI", "mongodb://localhost:27017"),
            mongo_db: getenv("MONGO_DB", "solapi"),
            rate_limit_rpm: parse_or(env::var("RATE_LIMIT_RPM").ok(), 10),
            cache_ttl: duration_or(env::var("CACHE_TTL").ok(), Duration::from_secs(10)),
            key_cache_ttl: duration_or(env::var("KEY_CACHE_TTL").ok(), Duration::from_secs(60)),
            balance_timeout: duration_or(env::var("BALANCE_TIMEOUT").ok(), Duration::from_secs(3)),
            max_concurrency: parse_or(env::var("MAX_CONCURRENCY").ok(), 16),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|v| !v.is_empty()),
            public_signup: signup_enabled(env::var("PUBLIC_SIGNUP").ok()),
        }
    }
}

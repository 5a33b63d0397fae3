use std::{env, path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub rate_limit_max: u64,
    pub rate_limit_window: Duration,
    pub trusted_origins: Vec<String>,
    pub leads_file: PathBuf,
    pub slow_request: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());
        let trusted_origins = env::var("TRUSTED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let leads_file = env::var("LEADS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("public/leads.json"));

        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            redis_url,
            cache_ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", 60)),
            cache_max_entries: parse_or("CACHE_MAX_ENTRIES", 1000),
            rate_limit_max: parse_or("RATE_LIMIT_MAX", 100),
            rate_limit_window: Duration::from_secs(parse_or("RATE_LIMIT_WINDOW_SECS", 60)),
            trusted_origins,
            leads_file,
            slow_request: Duration::from_millis(parse_or("SLOW_REQUEST_MS", 500)),
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

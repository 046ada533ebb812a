#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub cors_origins: Vec<String>,
    pub duckdb_memory_limit: String,
    pub rate_limit_disable: bool,
    pub public_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("FUNNELFLOW_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("FUNNELFLOW_DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string()),
            cors_origins: std::env::var("FUNNELFLOW_CORS_ORIGINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            duckdb_memory_limit: std::env::var("FUNNELFLOW_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "512MB".to_string()),
            rate_limit_disable: std::env::var("FUNNELFLOW_RATE_LIMIT_DISABLE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            public_url: std::env::var("FUNNELFLOW_PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

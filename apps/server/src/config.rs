use serde::Deserialize;

/// Settings for the key service binary. Every field has a default, so an
/// empty or missing `config.toml` is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Used when `RUST_LOG` is unset.
    pub log_level: String,
    pub max_body_bytes: usize,
    /// Lifetime hint attached to a freshly rotated pair as `expiresAt`.
    /// 0 turns the hint off.
    pub key_rotation_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_origins: vec!["http://localhost:5173".to_string()],
            log_level: "info".to_string(),
            max_body_bytes: 1024 * 1024,
            key_rotation_days: 90,
        }
    }
}

impl ServerConfig {
    /// Read `CONFIG_PATH` (default `config.toml`), then apply env overrides.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::from_toml_str(""),
            Err(e) => Err(format!("failed to read {path}: {e}").into()),
        }
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: ServerConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// `HOST`, `PORT` and `LOG_LEVEL` win over the file. A set but
    /// unparseable `PORT` is an error.
    pub fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(host) = std::env::var("HOST") {
            self.host = host;
        }
        if let Ok(raw) = std::env::var("PORT") {
            self.port = raw
                .parse()
                .map_err(|e| format!("PORT={raw} is not a valid port: {e}"))?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

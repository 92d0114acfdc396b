use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use taskvault_shared::constants::MIN_RSA_KEY_BITS;

use crate::error::CryptoError;
use crate::wrapping::KdfParams;

/// Client-side settings for key management and message sync.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// RSA modulus size for new key pairs. Default: 2048
    #[serde(default = "default_rsa_key_bits")]
    pub rsa_key_bits: usize,
    /// Argon2id parameters for private key wrapping.
    #[serde(default)]
    pub kdf: KdfParams,
    /// SQLCipher database holding the local copy of workspace keys.
    #[serde(default = "default_key_store_path")]
    pub key_store_path: PathBuf,
    /// Base URL of the key service. Default: "http://127.0.0.1:3000"
    #[serde(default = "default_key_service_url")]
    pub key_service_url: String,
    /// Per-request timeout against the key service. Default: 10
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Change events held while keys are not ready. Default: 256
    #[serde(default = "default_pending_event_capacity")]
    pub pending_event_capacity: usize,
}

fn default_rsa_key_bits() -> usize {
    2048
}
fn default_key_store_path() -> PathBuf {
    PathBuf::from("taskvault-keys.db")
}
fn default_key_service_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_pending_event_capacity() -> usize {
    256
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: default_rsa_key_bits(),
            kdf: KdfParams::default(),
            key_store_path: default_key_store_path(),
            key_service_url: default_key_service_url(),
            request_timeout_secs: default_request_timeout_secs(),
            pending_event_capacity: default_pending_event_capacity(),
        }
    }
}

impl CryptoConfig {
    /// Parse TOML, apply `TASKVAULT_*` environment overrides, then validate.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, CryptoError> {
        let mut config: CryptoConfig =
            toml::from_str(toml_str).map_err(|e| CryptoError::ConfigError(e.to_string()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for callers without a config file.
    pub fn from_env() -> Result<Self, CryptoError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Returns an error if a variable is set but cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> Result<(), CryptoError> {
        if let Some(val) = parsed_env("TASKVAULT_RSA_KEY_BITS")? {
            self.rsa_key_bits = val;
        }
        if let Some(val) = parsed_env("TASKVAULT_KDF_MEMORY_KIB")? {
            self.kdf.memory_kib = val;
        }
        if let Some(val) = parsed_env("TASKVAULT_KDF_ITERATIONS")? {
            self.kdf.iterations = val;
        }
        if let Some(val) = parsed_env("TASKVAULT_KDF_PARALLELISM")? {
            self.kdf.parallelism = val;
        }
        if let Ok(val) = std::env::var("TASKVAULT_KEY_STORE_PATH") {
            self.key_store_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TASKVAULT_KEY_SERVICE_URL") {
            self.key_service_url = val;
        }
        if let Some(val) = parsed_env("TASKVAULT_REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = val;
        }
        if let Some(val) = parsed_env("TASKVAULT_PENDING_EVENT_CAPACITY")? {
            self.pending_event_capacity = val;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.rsa_key_bits < MIN_RSA_KEY_BITS {
            return Err(CryptoError::ConfigError(format!(
                "rsa_key_bits must be at least {MIN_RSA_KEY_BITS}, got {}",
                self.rsa_key_bits
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(CryptoError::ConfigError(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.pending_event_capacity == 0 {
            return Err(CryptoError::ConfigError(
                "pending_event_capacity must be positive".into(),
            ));
        }
        if self.kdf.iterations == 0 || self.kdf.parallelism == 0 {
            return Err(CryptoError::ConfigError(
                "kdf iterations and parallelism must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, CryptoError> {
    match std::env::var(name) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| CryptoError::ConfigError(format!("invalid {name} value: {val}"))),
        Err(_) => Ok(None),
    }
}

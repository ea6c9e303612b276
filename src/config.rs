//! Configuration management for Depot Server

use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::upload::{
    UploadSettings, DEFAULT_CHUNK_SIZE, DEFAULT_STREAM_BLOCK_SIZE, MAX_FILE_SIZE,
    SESSION_EXPIRY_HOURS,
};

/// Default interval between abandoned upload sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Token signing secret used when `SECRET_KEY` is unset
pub const DEFAULT_SECRET_KEY: &str = "change-me-in-production";

/// Default lifetime of an access token (24 hours)
pub const DEFAULT_TOKEN_EXPIRE_MINUTES: i64 = 1440;

/// Work factors bcrypt accepts
const BCRYPT_COSTS: std::ops::RangeInclusive<u32> = 4..=31;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Upload root holding every project directory
    pub upload_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub chunk_size: u64,
    pub max_file_size: u64,
    pub stream_block_size: usize,
    pub session_ttl_hours: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret signing access tokens
    pub secret_key: String,
    pub algorithm: Algorithm,
    pub access_token_expire_minutes: i64,
    pub password_hash_cost: u32,
    /// Accept the `x-user-id` header from an authenticating proxy
    pub trust_user_header: bool,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("access_token_expire_minutes", &self.access_token_expire_minutes)
            .field("password_hash_cost", &self.password_hash_cost)
            .field("trust_user_header", &self.trust_user_header)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct AdminConfig {
    /// Username of the bootstrap admin, created at startup when set
    pub username: Option<String>,
    /// Password set on the bootstrap admin at startup
    pub password: Option<String>,
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("uploads"),
            },
            upload: UploadConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                max_file_size: MAX_FILE_SIZE,
                stream_block_size: DEFAULT_STREAM_BLOCK_SIZE,
                session_ttl_hours: SESSION_EXPIRY_HOURS,
                sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            },
            database: DatabaseConfig {
                url: "sqlite:./depot.db".to_string(),
            },
            auth: AuthConfig {
                secret_key: DEFAULT_SECRET_KEY.to_string(),
                algorithm: Algorithm::HS256,
                access_token_expire_minutes: DEFAULT_TOKEN_EXPIRE_MINUTES,
                password_hash_cost: bcrypt::DEFAULT_COST,
                trust_user_header: false,
            },
            admin: AdminConfig {
                username: None,
                password: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                upload_dir: env::var("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_dir),
            },
            upload: UploadConfig {
                chunk_size: parse_var("UPLOAD_CHUNK_SIZE", defaults.upload.chunk_size)?,
                max_file_size: parse_var("UPLOAD_MAX_FILE_SIZE", defaults.upload.max_file_size)?,
                stream_block_size: parse_var(
                    "UPLOAD_STREAM_BLOCK_SIZE",
                    defaults.upload.stream_block_size,
                )?,
                session_ttl_hours: parse_var(
                    "UPLOAD_SESSION_TTL_HOURS",
                    defaults.upload.session_ttl_hours,
                )?,
                sweep_interval_secs: parse_var(
                    "UPLOAD_SWEEP_INTERVAL_SECS",
                    defaults.upload.sweep_interval_secs,
                )?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            auth: AuthConfig {
                secret_key: env::var("SECRET_KEY").unwrap_or(defaults.auth.secret_key),
                algorithm: parse_var("ALGORITHM", defaults.auth.algorithm)?,
                access_token_expire_minutes: parse_var(
                    "ACCESS_TOKEN_EXPIRE_MINUTES",
                    defaults.auth.access_token_expire_minutes,
                )?,
                password_hash_cost: parse_var("BCRYPT_COST", defaults.auth.password_hash_cost)?,
                trust_user_header: parse_var(
                    "AUTH_TRUST_USER_HEADER",
                    defaults.auth.trust_user_header,
                )?,
            },
            admin: AdminConfig {
                username: env::var("ADMIN_USERNAME").ok().filter(|name| !name.is_empty()),
                password: env::var("ADMIN_PASSWORD").ok().filter(|pw| !pw.is_empty()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.chunk_size == 0 {
            return Err(ConfigError::NotPositive("UPLOAD_CHUNK_SIZE"));
        }
        if self.upload.stream_block_size == 0 {
            return Err(ConfigError::NotPositive("UPLOAD_STREAM_BLOCK_SIZE"));
        }
        if self.upload.sweep_interval_secs == 0 {
            return Err(ConfigError::NotPositive("UPLOAD_SWEEP_INTERVAL_SECS"));
        }
        if self.auth.secret_key.is_empty() {
            return Err(ConfigError::Empty("SECRET_KEY"));
        }
        // Tokens are signed with a shared secret
        if !matches!(
            self.auth.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(ConfigError::InvalidValue {
                name: "ALGORITHM",
                value: format!("{:?}", self.auth.algorithm),
            });
        }
        if self.auth.access_token_expire_minutes <= 0 {
            return Err(ConfigError::NotPositive("ACCESS_TOKEN_EXPIRE_MINUTES"));
        }
        if !BCRYPT_COSTS.contains(&self.auth.password_hash_cost) {
            return Err(ConfigError::InvalidValue {
                name: "BCRYPT_COST",
                value: self.auth.password_hash_cost.to_string(),
            });
        }
        Ok(())
    }

    /// Settings handed to the upload engine
    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            chunk_size: self.upload.chunk_size,
            max_file_size: self.upload.max_file_size,
            stream_block_size: self.upload.stream_block_size,
            session_ttl: chrono::Duration::hours(self.upload.session_ttl_hours),
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.upload.chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.upload.max_file_size, 10 * 1024 * 1024 * 1024);
        assert!(config.admin.username.is_none());
        assert!(config.validate().is_ok());

        let settings = config.upload_settings();
        assert_eq!(settings.session_ttl, chrono::Duration::hours(24));
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mut config = Config::default();
        config.upload.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive("UPLOAD_CHUNK_SIZE"))
        ));
    }

    #[test]
    fn test_auth_defaults_and_validation() {
        let config = Config::default();
        assert_eq!(config.auth.algorithm, Algorithm::HS256);
        assert_eq!(config.auth.access_token_expire_minutes, 1440);
        assert!(!config.auth.trust_user_header);
        assert!(!format!("{:?}", config.auth).contains(DEFAULT_SECRET_KEY));

        let mut config = Config::default();
        config.auth.algorithm = Algorithm::RS256;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "ALGORITHM", .. })
        ));

        let mut config = Config::default();
        config.auth.secret_key.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Empty("SECRET_KEY"))));

        let mut config = Config::default();
        config.auth.password_hash_cost = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "BCRYPT_COST", .. })
        ));

        assert_eq!("HS512".parse::<Algorithm>().unwrap(), Algorithm::HS512);
    }

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("DEPOT_TEST_SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}

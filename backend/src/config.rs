use encore_sdk::Argon2Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Which tier backs the store. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    /// Present only for the Postgres backend.
    pub database_url: Option<String>,
    pub port: u16,
    pub cors_allow_origins: Vec<String>,
    pub argon2: Argon2Config,
    pub key_bundle_validity_days: i64,
}

impl Config {
    /// Reads the configuration after loading `.env` (if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let store = match lookup("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let database_url = match store {
            StoreBackend::Memory => None,
            StoreBackend::Postgres => {
                let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));
                let user = required("POSTGRES_USER")?;
                let password = required("POSTGRES_PASSWORD")?;
                let host = required("POSTGRES_HOST")?;
                let port: u16 = parse_or(&lookup, "POSTGRES_PORT", 5432)?;
                let db = required("POSTGRES_DB")?;
                Some(format!("postgres://{user}:{password}@{host}:{port}/{db}"))
            }
        };

        let cors_allow_origins = lookup("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let defaults = Argon2Config::default();
        let argon2 = Argon2Config {
            memory_kib: parse_or(&lookup, "ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&lookup, "ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&lookup, "ARGON2_PARALLELISM", defaults.parallelism)?,
        };

        let key_bundle_validity_days: i64 = parse_or(
            &lookup,
            "KEY_BUNDLE_VALIDITY_DAYS",
            encore_sdk::x3dh::DEFAULT_VALIDITY_DAYS,
        )?;
        if key_bundle_validity_days <= 0 {
            return Err(ConfigError::Invalid {
                name: "KEY_BUNDLE_VALIDITY_DAYS",
                value: key_bundle_validity_days.to_string(),
            });
        }

        Ok(Self {
            store,
            database_url,
            port: parse_or(&lookup, "PORT", 8081)?,
            cors_allow_origins,
            argon2,
            key_bundle_validity_days,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

//! Server configuration loaded from the environment

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub enable_billing: bool,
    pub run_migrations: bool,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url,
            enable_billing: env_flag("ENABLE_BILLING", true),
            run_migrations: env_flag("RUN_MIGRATIONS", true),
            allowed_origins: parse_origins(
                &std::env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            ),
        })
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| parse_flag(&v, default))
        .unwrap_or(default)
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE", false));
        assert!(!parse_flag("off", true));
        // Garbage keeps the default
        assert!(parse_flag("maybe", true));
        assert!(!parse_flag("", false));
    }

    #[test]
    fn test_parse_origins_skips_blanks() {
        assert_eq!(
            parse_origins("http://localhost:3000, https://app.learnwell.io,,"),
            vec![
                "http://localhost:3000".to_string(),
                "https://app.learnwell.io".to_string()
            ]
        );
    }
}

use crate::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct AiProviderConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub host: String,
    pub port: u16,

    // Database configuration
    pub database_url: String,
    pub db_max_connections: u32,

    // Authentication: shared secret or RSA public key
    pub jwt_secret: Option<String>,
    pub jwt_public_key_pem: Option<String>,

    // AI vendors
    pub openai: AiProviderConfig,
    pub anthropic: AiProviderConfig,
    pub default_ai_provider: String,
    pub ai_request_timeout_secs: u64,

    // Scheduled learning
    pub scheduler_enabled: bool,
    pub pipeline_lease_ttl_secs: i64,

    // Service configuration
    pub service_name: String,
    pub environment: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL must be set".to_string()))?;

        let jwt_secret = optional_var("JWT_SECRET");
        let jwt_public_key_pem = optional_var("JWT_PUBLIC_KEY_PEM");
        if jwt_secret.is_none() && jwt_public_key_pem.is_none() {
            return Err(AppError::Config(
                "either JWT_SECRET or JWT_PUBLIC_KEY_PEM must be set".to_string(),
            ));
        }

        Ok(Self {
            host: var_or("HOST", "0.0.0.0"),
            port: var_or("PORT", "8080").parse().unwrap_or(8080),
            database_url,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", "10").parse().unwrap_or(10),
            jwt_secret,
            jwt_public_key_pem,
            openai: AiProviderConfig {
                api_key: optional_var("OPENAI_API_KEY"),
                model: var_or("OPENAI_MODEL", "gpt-4o-mini"),
                base_url: var_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            },
            anthropic: AiProviderConfig {
                api_key: optional_var("ANTHROPIC_API_KEY"),
                model: var_or("ANTHROPIC_MODEL", "claude-3-5-haiku-latest"),
                base_url: var_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com/v1"),
            },
            default_ai_provider: var_or("DEFAULT_AI_PROVIDER", "openai").to_lowercase(),
            ai_request_timeout_secs: var_or("AI_REQUEST_TIMEOUT_SECS", "30")
                .parse()
                .unwrap_or(30),
            scheduler_enabled: var_or("SCHEDULER_ENABLED", "true")
                .parse()
                .unwrap_or(true),
            pipeline_lease_ttl_secs: var_or("PIPELINE_LEASE_TTL_SECS", "1800")
                .parse()
                .unwrap_or(1800),
            service_name: var_or("SERVICE_NAME", "faq-learning-service"),
            environment: var_or("ENVIRONMENT", "development"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for key in [
            "DATABASE_URL",
            "JWT_SECRET",
            "JWT_PUBLIC_KEY_PEM",
            "PORT",
            "OPENAI_API_KEY",
            "DEFAULT_AI_PROVIDER",
            "SCHEDULER_ENABLED",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("JWT_SECRET", "secret");

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_ai_provider, "openai");
        assert!(config.openai.api_key.is_none());
        assert!(config.scheduler_enabled);
        assert_eq!(config.pipeline_lease_ttl_secs, 1800);
        clear();
    }

    #[test]
    #[serial]
    fn test_missing_database_url_is_error() {
        clear();
        env::set_var("JWT_SECRET", "secret");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));
        clear();
    }

    #[test]
    #[serial]
    fn test_requires_some_jwt_key() {
        clear();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("JWT_SECRET", "  ");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));
        clear();
    }
}

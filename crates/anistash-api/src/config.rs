//! API configuration.

use anistash_worker::config::DEFAULT_FILE_SALT;

/// API server configuration.
#[derive(Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Expose `/metrics`
    pub metrics_enabled: bool,
    /// Bearer secret for `/trigger`. Empty disables the check.
    ///
    /// From the environment this is `TRIGGER_SECRET`, else the file salt (with its default).
    pub trigger_secret: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
            cors_origins: vec!["*".to_string()],
            max_body_size: 64 * 1024,
            metrics_enabled: true,
            trigger_secret: String::new(),
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_origins", &self.cors_origins)
            .field("max_body_size", &self.max_body_size)
            .field("metrics_enabled", &self.metrics_enabled)
            .field("trigger_auth", &!self.trigger_secret.is_empty())
            .finish()
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            trigger_secret: std::env::var("TRIGGER_SECRET")
                .or_else(|_| std::env::var("HF_FILE_SALT"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| DEFAULT_FILE_SALT.to_string()),
        }
    }

    pub fn trigger_auth_enabled(&self) -> bool {
        !self.trigger_secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 7860);
        assert!(config.metrics_enabled);
        assert!(!config.trigger_auth_enabled());
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = ApiConfig {
            trigger_secret: "hunter2".into(),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("trigger_auth: true"));
    }
}

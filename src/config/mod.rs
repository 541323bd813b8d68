use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub pagination: PaginationConfig,
    pub search: SearchConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Hard ceiling for any page size, whatever the environment asks for.
pub const PAGE_LIMIT_CEILING: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub default_limit: i64,
    pub max_limit: i64,
    pub debug_logging: bool,
}

impl PaginationConfig {
    /// `max_limit` in `1..=PAGE_LIMIT_CEILING`, `default_limit` in `1..=max_limit`.
    pub fn clamped(mut self) -> Self {
        self.max_limit = self.max_limit.clamp(1, PAGE_LIMIT_CEILING);
        self.default_limit = self.default_limit.clamp(1, self.max_limit);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Wrap search phrases in `unaccent(...)`; needs the extension installed
    pub unaccent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
    /// Read page rows and their count in one snapshot
    pub consistent_pagination: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub default_avatar: String,
    pub default_bio: String,
    pub asset_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Pagination overrides
        if let Ok(v) = env::var("PAGINATION_DEFAULT_LIMIT") {
            self.pagination.default_limit = v.parse().unwrap_or(self.pagination.default_limit);
        }
        if let Ok(v) = env::var("PAGINATION_MAX_LIMIT") {
            self.pagination.max_limit = v.parse().unwrap_or(self.pagination.max_limit);
        }
        if let Ok(v) = env::var("PAGINATION_DEBUG_LOGGING") {
            self.pagination.debug_logging = v.parse().unwrap_or(self.pagination.debug_logging);
        }
        self.pagination = self.pagination.clamped();

        // Search overrides
        if let Ok(v) = env::var("SEARCH_UNACCENT") {
            self.search.unaccent = v.parse().unwrap_or(self.search.unaccent);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_SLOW_QUERY_WARNING") {
            self.database.enable_slow_query_warning = v.parse().unwrap_or(self.database.enable_slow_query_warning);
        }
        if let Ok(v) = env::var("DATABASE_SLOW_QUERY_THRESHOLD_MS") {
            self.database.slow_query_threshold_ms = v.parse().unwrap_or(self.database.slow_query_threshold_ms);
        }
        if let Ok(v) = env::var("DATABASE_CONSISTENT_PAGINATION") {
            self.database.consistent_pagination = v.parse().unwrap_or(self.database.consistent_pagination);
        }

        // API overrides
        if let Ok(v) = env::var("PORT") {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Profile defaults
        if let Ok(v) = env::var("PROFILE_DEFAULT_AVATAR") {
            self.profile.default_avatar = v;
        }
        if let Ok(v) = env::var("PROFILE_DEFAULT_BIO") {
            self.profile.default_bio = v;
        }
        if let Ok(v) = env::var("ASSET_BASE_URL") {
            self.profile.asset_base_url = v;
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            pagination: PaginationConfig { default_limit: 30, max_limit: 30, debug_logging: true },
            search: SearchConfig { unaccent: false },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 100,
                consistent_pagination: false,
            },
            api: ApiConfig { port: 3000, enable_request_logging: true },
            security: SecurityConfig {
                jwt_secret: "development-secret".to_string(),
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
            },
            profile: ProfileConfig::defaults("http://localhost:9000/assets"),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            pagination: PaginationConfig { default_limit: 30, max_limit: 30, debug_logging: false },
            search: SearchConfig { unaccent: true },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 500,
                consistent_pagination: false,
            },
            api: ApiConfig { port: 3000, enable_request_logging: true },
            security: SecurityConfig {
                jwt_secret: String::new(),
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
            profile: ProfileConfig::defaults("https://assets.staging.example.com"),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            pagination: PaginationConfig { default_limit: 30, max_limit: 30, debug_logging: false },
            search: SearchConfig { unaccent: true },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
                enable_query_logging: false,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 1000,
                consistent_pagination: false,
            },
            api: ApiConfig { port: 3000, enable_request_logging: false },
            security: SecurityConfig {
                jwt_secret: String::new(),
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
            profile: ProfileConfig::defaults("https://assets.example.com"),
        }
    }
}

impl ProfileConfig {
    fn defaults(asset_base_url: &str) -> Self {
        Self {
            default_avatar: "avatars/default.png".to_string(),
            default_bio: "This user has not written a bio yet.".to_string(),
            asset_base_url: asset_base_url.to_string(),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}

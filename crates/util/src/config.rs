use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://orgsvc.db";
pub const DEFAULT_DEPARTMENT_SERVICE_URL: &str = "http://127.0.0.1:8080/api/v1/";
pub const DEFAULT_EMPLOYEE_SERVICE_URL: &str = "http://127.0.0.1:8080/api/v1/";
pub const DEFAULT_FAKESTORE_BASE_URL: &str = "https://fakestoreapi.com/";
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_PRODUCT_CACHE_TTL_SECS: u64 = 600;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Which service routers the process mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Department,
    Employee,
    Product,
    All,
}

impl ServiceKind {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "department" | "department-service" => Ok(Self::Department),
            "employee" | "employee-service" => Ok(Self::Employee),
            "product" | "product-service" => Ok(Self::Product),
            "all" => Ok(Self::All),
            other => Err(ConfigError::InvalidService(other.to_string())),
        }
    }

    pub fn serves_departments(self) -> bool {
        matches!(self, Self::Department | Self::All)
    }

    pub fn serves_employees(self) -> bool {
        matches!(self, Self::Employee | Self::All)
    }

    pub fn serves_products(self) -> bool {
        matches!(self, Self::Product | Self::All)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Department => "department-service",
            Self::Employee => "employee-service",
            Self::Product => "product-service",
            Self::All => "all",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub service: ServiceKind,
    pub database_url: String,
    pub department_service_url: Url,
    pub employee_service_url: Url,
    pub fakestore_base_url: Url,
    /// Upper bound for every call to a peer service.
    pub remote_timeout: Duration,
    pub product_cache_ttl: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let service_value = env::var("APP_SERVICE").unwrap_or_else(|_| "all".to_string());
        let service = ServiceKind::from_str(&service_value)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        Ok(Self {
            bind_addr,
            environment,
            service,
            database_url,
            department_service_url: url_var(
                "DEPARTMENT_SERVICE_URL",
                DEFAULT_DEPARTMENT_SERVICE_URL,
            )?,
            employee_service_url: url_var("EMPLOYEE_SERVICE_URL", DEFAULT_EMPLOYEE_SERVICE_URL)?,
            fakestore_base_url: url_var("FAKESTORE_BASE_URL", DEFAULT_FAKESTORE_BASE_URL)?,
            remote_timeout: Duration::from_millis(u64_var(
                "REMOTE_TIMEOUT_MS",
                DEFAULT_REMOTE_TIMEOUT_MS,
            )?),
            product_cache_ttl: Duration::from_secs(u64_var(
                "PRODUCT_CACHE_TTL_SECS",
                DEFAULT_PRODUCT_CACHE_TTL_SECS,
            )?),
        })
    }
}

/// Parses a base URL and makes sure it ends with `/` so relative joins keep the path.
fn url_var(name: &'static str, default: &str) -> Result<Url, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let mut url = Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl {
        name,
        value: raw.clone(),
        reason: err.to_string(),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn u64_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or(ConfigError::InvalidNumber { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    InvalidService(String),
    BindAddress(std::net::AddrParseError),
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },
    InvalidNumber {
        name: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::InvalidService(value) => write!(
                f,
                "APP_SERVICE must be one of 'department', 'employee', 'product', or 'all' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidUrl {
                name,
                value,
                reason,
            } => write!(f, "invalid {name} value '{value}': {reason}"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const PARAMETERS_FILE: &str = "dashboard_parameters.txt";
pub const DEFAULT_YEAR_TO_ANALYZE: i32 = 2024;
pub const DEFAULT_CURRENT_MONTH: u32 = 11;

static DEFAULT_REGION_ORDER: Lazy<Vec<String>> = Lazy::new(|| {
    ["EUROPE", "LATAM", "MEA", "APAC", "NORAM"]
        .iter()
        .map(|r| r.to_string())
        .collect()
});

static DEFAULT_COUNTRY_ALIASES: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    BTreeMap::from([("UAE".to_string(), "United Arab Emirates".to_string())])
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost {
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("parameters line {line_no} is not of the form key=value: '{line}'")]
    MalformedLine { line_no: usize, line: String },
    #[error("parameter '{key}' must be an integer, got '{value}'")]
    InvalidParameter { key: String, value: String },
    #[error("current_month must be between 1 and 12, got {0}")]
    MonthOutOfRange(u32),
    #[error("the {0} form maximum must be at least 1")]
    ZeroMaximum(&'static str),
    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The two knobs an operator sets per refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardParameters {
    pub year_to_analyze: i32,
    pub current_month: u32,
}

impl Default for DashboardParameters {
    fn default() -> Self {
        Self {
            year_to_analyze: DEFAULT_YEAR_TO_ANALYZE,
            current_month: DEFAULT_CURRENT_MONTH,
        }
    }
}

impl DashboardParameters {
    /// Read `key=value` lines. A missing file yields the defaults; a missing
    /// key falls back to that key's default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "parameters file does not exist, using default values"
            );
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut params = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    line_no: idx + 1,
                    line: line.to_string(),
                });
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "year_to_analyze" => params.year_to_analyze = parse_int(key, value)?,
                "current_month" => params.current_month = parse_int(key, value)?,
                other => debug!(key = other, "ignoring unrecognized parameter"),
            }
        }
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if (1..=12).contains(&self.current_month) {
            Ok(())
        } else {
            Err(ConfigError::MonthOutOfRange(self.current_month))
        }
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parse a `FROM=TO` alias pair as given on the command line.
pub fn parse_alias(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((from, to)) if !from.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(format!("expected FROM=TO, got '{raw}'")),
    }
}

/// Settings for the presentation stage.
#[derive(Debug, Clone)]
pub struct PresentationConfig {
    /// Regions listed first, in this order; any other region follows
    /// alphabetically.
    pub region_order: Vec<String>,
    pub country_aliases: BTreeMap<String, String>,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            region_order: DEFAULT_REGION_ORDER.clone(),
            country_aliases: DEFAULT_COUNTRY_ALIASES.clone(),
        }
    }
}

/// Process-level configuration sourced from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let input_dir = env::var("APP_INPUT_DIR").unwrap_or_else(|_| "Input".to_string());
        let output_dir = env::var("APP_OUTPUT_DIR").unwrap_or_else(|_| "Output".to_string());
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "8050".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;
        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            input_dir: PathBuf::from(input_dir),
            output_dir: PathBuf::from(output_dir),
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
        })
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.output_dir.join("Assets")
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

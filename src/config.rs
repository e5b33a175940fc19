use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_BIND_PORT: u16 = 8000;
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SEARCH_MODEL: &str = "gpt-4o-search-preview";
const DEFAULT_SEARCH_CONTEXT_SIZE: &str = "high";
const DEFAULT_ARTICLE_COUNT: usize = 5;
const DEFAULT_COUNTRY: &str = "Morocco";
const DEFAULT_LOCATION_COUNTRY: &str = "MA";
const DEFAULT_LOCATION_CITY: &str = "Casablanca";
const DEFAULT_LLM_MAX_ATTEMPTS: u32 = 1;
const DEFAULT_LLM_RETRY_DELAY_MS: u64 = 5_000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SLIDER_LOGIN_PATH: &str = "/api/auth/login";
const DEFAULT_SLIDER_CREATE_PATH: &str = "/api/sliders";
const DEFAULT_SLIDER_CONCURRENCY: usize = 3;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

// ── Secret wrapper ───────────────────────────────────────────────────────────

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ── Config types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub http_timeout: Duration,
    pub llm: LlmConfig,
    pub email: Option<EmailConfig>,
    pub slider: Option<SliderConfig>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<Secret>,
    pub base_url: String,
    pub model: String,
    pub search_context_size: String,
    pub article_count: usize,
    pub country: String,
    pub location_country: String,
    pub location_city: String,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub recipient: String,
}

#[derive(Debug, Clone)]
pub struct SliderConfig {
    pub base_url: String,
    pub credentials: SliderCredentials,
    pub login_path: String,
    pub create_path: String,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub enum SliderCredentials {
    /// Pre-issued bearer token, used as is.
    Token(Secret),
    /// Exchanged for a token at the login route, or sent as basic auth.
    Login { username: String, password: Secret },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let llm = LlmConfig {
            api_key: var("OPENAI_API_KEY").map(Secret::new),
            base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: var("OPENAI_SEARCH_MODEL").unwrap_or_else(|| DEFAULT_SEARCH_MODEL.to_string()),
            search_context_size: var("OPENAI_SEARCH_CONTEXT_SIZE")
                .unwrap_or_else(|| DEFAULT_SEARCH_CONTEXT_SIZE.to_string()),
            article_count: parse_or(
                "NEWS_COUNT",
                var("NEWS_COUNT"),
                DEFAULT_ARTICLE_COUNT,
                "a positive integer",
            )?
            .max(1),
            country: var("NEWS_COUNTRY").unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            location_country: var("WATCHER_COUNTRY")
                .unwrap_or_else(|| DEFAULT_LOCATION_COUNTRY.to_string()),
            location_city: var("WATCHER_CITY")
                .unwrap_or_else(|| DEFAULT_LOCATION_CITY.to_string()),
            max_attempts: parse_or(
                "LLM_MAX_ATTEMPTS",
                var("LLM_MAX_ATTEMPTS"),
                DEFAULT_LLM_MAX_ATTEMPTS,
                "a positive integer",
            )?
            .max(1),
            retry_delay: Duration::from_millis(parse_or(
                "LLM_RETRY_DELAY_MS",
                var("LLM_RETRY_DELAY_MS"),
                DEFAULT_LLM_RETRY_DELAY_MS,
                "a number of milliseconds",
            )?),
        };

        let email = match (var("EMAIL_API_URL"), var("EMAIL_RECIPIENT")) {
            (Some(api_url), Some(recipient)) => Some(EmailConfig { api_url, recipient }),
            _ => None,
        };

        let credentials = match (
            var("SLIDER_API_TOKEN"),
            var("SLIDER_API_USERNAME"),
            var("SLIDER_API_PASSWORD"),
        ) {
            (Some(token), _, _) => Some(SliderCredentials::Token(Secret::new(token))),
            (None, Some(username), Some(password)) => Some(SliderCredentials::Login {
                username,
                password: Secret::new(password),
            }),
            _ => None,
        };

        let slider = match (var("SLIDER_API_URL"), credentials) {
            (Some(base_url), Some(credentials)) => Some(SliderConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                credentials,
                login_path: route_path(
                    var("SLIDER_LOGIN_PATH").as_deref().unwrap_or(DEFAULT_SLIDER_LOGIN_PATH),
                ),
                create_path: route_path(
                    var("SLIDER_CREATE_PATH").as_deref().unwrap_or(DEFAULT_SLIDER_CREATE_PATH),
                ),
                concurrency: parse_or(
                    "SLIDER_CONCURRENCY",
                    var("SLIDER_CONCURRENCY"),
                    DEFAULT_SLIDER_CONCURRENCY,
                    "a positive integer",
                )?
                .max(1),
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr: parse_or(
                "BIND_ADDR",
                var("BIND_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], DEFAULT_BIND_PORT)),
                "a socket address",
            )?,
            http_timeout: Duration::from_secs(parse_or(
                "HTTP_TIMEOUT_SECS",
                var("HTTP_TIMEOUT_SECS"),
                DEFAULT_HTTP_TIMEOUT_SECS,
                "a number of seconds",
            )?
            .max(1)),
            llm,
            email,
            slider,
        })
    }

    /// Reports which integrations are enabled. Never logs credential values.
    pub fn log_summary(&self) {
        if self.llm.api_key.is_none() {
            tracing::error!("OPENAI_API_KEY is not set; news requests will fail");
        }
        tracing::info!(
            model = %self.llm.model,
            articles = self.llm.article_count,
            country = %self.llm.country,
            email = self.email.is_some(),
            sliders = self.slider.is_some(),
            "configuration loaded"
        );
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────────────

fn parse_or<T: FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, expected, value }),
    }
}

fn route_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

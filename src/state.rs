use std::time::Duration;

use crate::config::AppConfig;

const USER_AGENT: &str = concat!("good-news-sliders/", env!("CARGO_PKG_VERSION"));

pub struct AppState {
    pub config: AppConfig,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.http_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { config, http })
    }
}

/// Classifies a client error the same way for every upstream.
pub fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("TimeoutError: {}", e)
    } else if e.is_connect() {
        format!("ConnectError: {}", e)
    } else {
        format!("RequestError: {}", e)
    }
}

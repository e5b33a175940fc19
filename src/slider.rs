use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use url::Url;

use crate::config::{SliderConfig, SliderCredentials};
use crate::models::{Article, SliderBatch, SliderCreation, SliderOutcome};
use crate::state::describe_request_error;

// ── Constants ────────────────────────────────────────────────────────────────

const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
const TOKEN_FIELDS: &[&str] = &["token", "access_token", "accessToken"];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SliderError {
    #[error("slider API is not configured")]
    NotConfigured,
    #[error("article has no image")]
    MissingImage,
    #[error("slider API authentication failed: {0}")]
    Auth(String),
    #[error("image download failed: {0}")]
    ImageDownload(String),
    #[error("slider upload failed: {0}")]
    Upload(String),
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum SliderAuth {
    Bearer(String),
    Basic { username: String, password: String },
}

impl SliderAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            SliderAuth::Bearer(token) => request.bearer_auth(token),
            SliderAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }
}

struct DownloadedImage {
    bytes: Vec<u8>,
    file_name: String,
    content_type: String,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Slider API client for one batch. The credential exchange runs at most once
/// per client and is shared by every article in the batch.
pub struct SliderClient<'a> {
    config: &'a SliderConfig,
    http: &'a reqwest::Client,
    // Failures are cached too, so a rejected login is not repeated per article.
    auth: OnceCell<Result<SliderAuth, String>>,
}

impl<'a> SliderClient<'a> {
    pub fn new(config: &'a SliderConfig, http: &'a reqwest::Client) -> Self {
        Self {
            config,
            http,
            auth: OnceCell::new(),
        }
    }

    /// Creates one slider per article. Results keep the input order.
    pub async fn create_sliders(&self, articles: &[Article]) -> SliderBatch {
        let pending: Vec<_> = articles.iter().map(|article| self.process(article)).collect();
        let results: Vec<SliderOutcome> = stream::iter(pending)
            .buffered(self.config.concurrency)
            .collect()
            .await;

        batch(results)
    }

    async fn process(&self, article: &Article) -> SliderOutcome {
        let result = self.create_slider(article).await;
        match &result {
            Ok(_) => tracing::info!(title = %article.title, "slider created"),
            Err(e) => tracing::warn!(title = %article.title, error = %e, "slider creation failed"),
        }
        outcome(article, result)
    }

    pub async fn create_slider(&self, article: &Article) -> Result<Value, SliderError> {
        let image_url = article
            .image
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(SliderError::MissingImage)?;

        let auth = self.authenticate().await?;
        let image = self.download_image(image_url).await?;

        let part = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.content_type)
            .map_err(|e| SliderError::Upload(e.to_string()))?;

        let form = Form::new()
            .text("title", article.title.clone())
            .text("description", article.summary.clone())
            .text("content", article.mini_article.clone())
            .text("link", article.url.clone().unwrap_or_default())
            .text("source", article.source.clone().unwrap_or_default())
            .text("tags", article.tags.join(","))
            .text("date", article.date.clone().unwrap_or_default())
            .part("image", part);

        let request = self.http.post(self.endpoint(&self.config.create_path));
        let response = auth
            .apply(request)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SliderError::Upload(describe_request_error(&e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SliderError::Upload(describe_request_error(&e)))?;
        if !status.is_success() {
            tracing::debug!(%status, body = %text, "slider API error body");
            return Err(SliderError::Upload(format!("slider API returned status {}", status)));
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn authenticate(&self) -> Result<&SliderAuth, SliderError> {
        self.auth
            .get_or_init(|| self.exchange_credentials())
            .await
            .as_ref()
            .map_err(|reason| SliderError::Auth(reason.clone()))
    }

    async fn exchange_credentials(&self) -> Result<SliderAuth, String> {
        let (username, password) = match &self.config.credentials {
            SliderCredentials::Token(token) => {
                return Ok(SliderAuth::Bearer(token.expose().to_string()))
            }
            SliderCredentials::Login { username, password } => (username, password),
        };

        let response = self
            .http
            .post(self.endpoint(&self.config.login_path))
            .json(&json!({"username": username, "password": password.expose()}))
            .send()
            .await
            .map_err(|e| describe_request_error(&e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::METHOD_NOT_ALLOWED {
            tracing::info!(%status, "slider API has no login route, using basic auth");
            return Ok(SliderAuth::Basic {
                username: username.clone(),
                password: password.expose().to_string(),
            });
        }
        if !status.is_success() {
            tracing::warn!(%status, "slider API login rejected");
            return Err(format!("login returned status {}", status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|_| "login response was not JSON".to_string())?;
        let token = extract_token(&body)
            .ok_or_else(|| "login response did not contain a token".to_string())?;
        tracing::debug!("slider API token obtained");
        Ok(SliderAuth::Bearer(token))
    }

    async fn download_image(&self, raw_url: &str) -> Result<DownloadedImage, SliderError> {
        let url = Url::parse(raw_url)
            .map_err(|_| SliderError::ImageDownload(format!("invalid image URL {:?}", raw_url)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SliderError::ImageDownload(format!(
                "unsupported image URL scheme {:?}",
                url.scheme()
            )));
        }

        let mut response = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "image/*,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| SliderError::ImageDownload(describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SliderError::ImageDownload(format!(
                "image host returned status {}",
                status
            )));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_IMAGE_BYTES as u64)
        {
            return Err(SliderError::ImageDownload("image is too large".to_string()));
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty() && v != "application/octet-stream");
        if let Some(kind) = header_type.as_deref().filter(|v| !v.starts_with("image/")) {
            return Err(SliderError::ImageDownload(format!(
                "image host returned content type {}",
                kind
            )));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SliderError::ImageDownload(describe_request_error(&e)))?
        {
            if bytes.len() + chunk.len() > MAX_IMAGE_BYTES {
                return Err(SliderError::ImageDownload("image is too large".to_string()));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(SliderError::ImageDownload("image is empty".to_string()));
        }

        let content_type = header_type.unwrap_or_else(|| {
            mime_guess::from_path(url.path())
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

        Ok(DownloadedImage {
            bytes,
            file_name: image_file_name(&url),
            content_type,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

// ── Batch helpers ────────────────────────────────────────────────────────────

/// Slider creation entry point. Without a slider config every article is
/// reported as failed.
pub async fn create_sliders(
    config: Option<&SliderConfig>,
    http: &reqwest::Client,
    articles: &[Article],
) -> SliderBatch {
    match config {
        Some(config) => SliderClient::new(config, http).create_sliders(articles).await,
        None => batch(
            articles
                .iter()
                .map(|article| outcome(article, Err(SliderError::NotConfigured)))
                .collect(),
        ),
    }
}

fn outcome(article: &Article, result: Result<Value, SliderError>) -> SliderOutcome {
    let slider_creation = match result {
        Ok(response) => SliderCreation {
            success: true,
            response: Some(response),
            error: None,
        },
        Err(e) => SliderCreation {
            success: false,
            response: None,
            error: Some(e.to_string()),
        },
    };
    SliderOutcome {
        article_title: article.title.clone(),
        slider_creation,
    }
}

fn batch(results: Vec<SliderOutcome>) -> SliderBatch {
    let mut batch = SliderBatch {
        message: String::new(),
        results,
    };
    batch.message = format!(
        "Created {} of {} sliders",
        batch.succeeded(),
        batch.results.len()
    );
    batch
}

fn extract_token(body: &Value) -> Option<String> {
    let lookup = |obj: &Value| {
        TOKEN_FIELDS
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    };
    lookup(body).or_else(|| body.get("data").and_then(lookup))
}

fn image_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("image")
        .to_string()
}

use std::time::Duration;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::models::Article;
use crate::state::describe_request_error;

// ── Lazy static regexes ──────────────────────────────────────────────────────

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

// Outermost array of objects, for replies with prose around the JSON.
static JSON_ARRAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[\s*\{.*\}\s*\]").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,
    #[error("language model request failed: {0}")]
    Request(String),
    #[error("language model API returned status {0}")]
    Upstream(StatusCode),
    #[error("language model returned no content")]
    EmptyResponse,
    #[error("failed to parse news data: {0}")]
    Parse(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::Upstream(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    web_search_options: WebSearchOptions<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WebSearchOptions<'a> {
    search_context_size: &'a str,
    user_location: UserLocation<'a>,
}

#[derive(Debug, Serialize)]
struct UserLocation<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    approximate: ApproximateLocation<'a>,
}

#[derive(Debug, Serialize)]
struct ApproximateLocation<'a> {
    country: &'a str,
    city: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Asks the language model for today's positive news and parses its answer.
pub async fn fetch_news(
    config: &LlmConfig,
    http: &reqwest::Client,
    today: NaiveDate,
) -> Result<Vec<Article>, FetchError> {
    let api_key = config.api_key.as_ref().ok_or(FetchError::MissingApiKey)?;
    let prompt = build_prompt(config.article_count, &config.country, today);

    let mut attempt = 1;
    let content = loop {
        match request_completion(config, http, api_key.expose(), &prompt).await {
            Ok(content) => break content,
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = backoff_delay(config.retry_delay, attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "language model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    };

    let articles = parse_articles(&content, config.article_count).map_err(|e| {
        tracing::warn!(error = %e, raw = %content, "unparsable language model output");
        e
    })?;
    tracing::info!(count = articles.len(), "fetched news articles");
    Ok(articles)
}

pub fn build_prompt(count: usize, country: &str, today: NaiveDate) -> String {
    let since = today - chrono::Duration::days(1);
    format!(
        r#"Find exactly {count} strictly positive news articles about {country} published between {since} and {today}.
Only keep clearly good news (economy, culture, sports, innovation, sustainability, diplomacy, tourism, technology, healthcare).
Exclude anything about crime, accidents, conflict or disasters. Use reputable news outlets from {country} and avoid duplicates.
If you find fewer than {count}, broaden the search until you have {count} qualifying articles.

Return ONLY a JSON array of exactly {count} objects, most recent first, with no text before or after it.
Every object must contain all of these fields, using null when a value is unavailable:
- "title": the original headline
- "summary": 2-3 sentence summary
- "mini_article": a short engaging narrative of 3-4 paragraphs
- "image": URL of the main article image
- "url": direct link to the article
- "source": name of the outlet
- "tags": exactly 3 keywords
- "date": publication date as YYYY-MM-DD"#
    )
}

/// Parses the model's reply into articles.
///
/// Markdown fences are stripped first. If the remaining text is not a JSON
/// array, the outermost `[{...}]` span is tried instead. Surplus articles are
/// dropped; a shortfall is only logged.
pub fn parse_articles(text: &str, count: usize) -> Result<Vec<Article>, FetchError> {
    let body = strip_code_fence(text.trim());

    let mut articles: Vec<Article> = match serde_json::from_str(body) {
        Ok(articles) => articles,
        Err(direct) => {
            let span = JSON_ARRAY_RE
                .find(body)
                .ok_or_else(|| FetchError::Parse(direct.to_string()))?;
            serde_json::from_str(span.as_str()).map_err(|e| FetchError::Parse(e.to_string()))?
        }
    };

    if articles.len() > count {
        tracing::warn!(expected = count, got = articles.len(), "dropping surplus articles");
        articles.truncate(count);
    } else if articles.len() < count {
        tracing::warn!(expected = count, got = articles.len(), "fewer articles than requested");
    }
    Ok(articles)
}

// ── Internals ────────────────────────────────────────────────────────────────

async fn request_completion(
    config: &LlmConfig,
    http: &reqwest::Client,
    api_key: &str,
    prompt: &str,
) -> Result<String, FetchError> {
    let body = ChatRequest {
        model: &config.model,
        messages: vec![ChatMessage {
            role: "user",
            content: prompt,
        }],
        web_search_options: WebSearchOptions {
            search_context_size: &config.search_context_size,
            user_location: UserLocation {
                kind: "approximate",
                approximate: ApproximateLocation {
                    country: &config.location_country,
                    city: &config.location_city,
                },
            },
        },
    };

    let response = http
        .post(format!("{}/chat/completions", config.base_url))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| FetchError::Request(describe_request_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        tracing::warn!(%status, body = %detail, "language model API error");
        return Err(FetchError::Upstream(status));
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| FetchError::Parse(format!("invalid completion payload: {}", e)))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(FetchError::EmptyResponse)
}

fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text,
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

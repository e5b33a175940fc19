use std::fmt::Write as _;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Serialize;

use crate::config::EmailConfig;
use crate::models::Article;
use crate::state::describe_request_error;

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email API request failed: {0}")]
    Request(String),
    #[error("email API returned status {0}")]
    Upstream(StatusCode),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailPayload<'a> {
    to: &'a str,
    cc: &'a str,
    bcc: &'a str,
    subject: &'a str,
    message: &'a str,
    is_html: bool,
}

/// Emails the digest. Failures are logged and swallowed.
pub async fn send_report(
    config: Option<&EmailConfig>,
    http: &reqwest::Client,
    articles: &[Article],
    today: NaiveDate,
) {
    let Some(config) = config else {
        tracing::debug!("email notifier not configured, skipping report");
        return;
    };
    if articles.is_empty() {
        tracing::debug!("no articles, skipping report");
        return;
    }

    let (subject, html) = render_report(articles, today);
    match post_report(config, http, &subject, &html).await {
        Ok(()) => tracing::info!(recipient = %config.recipient, count = articles.len(), "news report emailed"),
        Err(e) => tracing::warn!(recipient = %config.recipient, error = %e, "failed to send news report"),
    }
}

async fn post_report(
    config: &EmailConfig,
    http: &reqwest::Client,
    subject: &str,
    html: &str,
) -> Result<(), EmailError> {
    let payload = EmailPayload {
        to: &config.recipient,
        cc: "",
        bcc: "",
        subject,
        message: html,
        is_html: true,
    };

    let response = http
        .post(&config.api_url)
        .timeout(SEND_TIMEOUT)
        .json(&payload)
        .send()
        .await
        .map_err(|e| EmailError::Request(describe_request_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        tracing::debug!(%status, body = %detail, "email API error body");
        return Err(EmailError::Upstream(status));
    }
    Ok(())
}

/// Builds the subject line and HTML body of the daily digest.
pub fn render_report(articles: &[Article], today: NaiveDate) -> (String, String) {
    let subject = format!("Recent Positive News Report for {}", today);

    let mut body = String::new();
    let _ = writeln!(body, "<h2>{}</h2>", escape_html(&subject));
    let _ = writeln!(
        body,
        "<p>Here are the {} positive news articles from recent days:</p>",
        articles.len()
    );

    for (i, article) in articles.iter().enumerate() {
        let _ = writeln!(
            body,
            "<div style='border: 1px solid #ddd; padding: 15px; margin: 10px 0; border-radius: 5px;'>"
        );
        let _ = writeln!(body, "<h3>{}. {}</h3>", i + 1, text_or(&article.title, "No title"));
        let _ = writeln!(
            body,
            "<p><strong>Source:</strong> {}</p>",
            text_or(article.source.as_deref().unwrap_or(""), "Unknown")
        );
        let _ = writeln!(
            body,
            "<p><strong>Date:</strong> {}</p>",
            text_or(article.date.as_deref().unwrap_or(""), "Unknown")
        );
        let _ = writeln!(
            body,
            "<p><strong>Summary:</strong> {}</p>",
            text_or(&article.summary, "No summary")
        );
        let _ = writeln!(
            body,
            "<div><strong>Full Article:</strong><br>{}</div>",
            text_or(&article.mini_article, "No content").replace('\n', "<br>")
        );
        if let Some(url) = article.url.as_deref().filter(|u| !u.trim().is_empty()) {
            let _ = writeln!(
                body,
                "<p><a href='{}' target='_blank'>Read Full Article</a></p>",
                escape_html(url)
            );
        }
        if !article.tags.is_empty() {
            let _ = writeln!(
                body,
                "<p><strong>Tags:</strong> {}</p>",
                escape_html(&article.tags.join(", "))
            );
        }
        body.push_str("</div>\n");
    }

    (subject, body)
}

fn text_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        escape_html(value)
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One curated news item, as produced by the language model or posted by a client.
///
/// The model is told to emit `null` for anything it cannot find, so every field
/// tolerates `null` or absence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mini_article: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub date: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
pub struct NewsQuery {
    #[serde(default, deserialize_with = "query_flag")]
    pub create_sliders: bool,
}

// Query-string booleans: true/1/yes/on and false/0/no/off, any case. Empty is false.
fn query_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean {:?}",
            other
        ))),
    }
}

#[derive(Debug, Serialize)]
pub struct NewsResponse {
    pub status: &'static str,
    pub articles: Vec<Article>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sliders: Option<SliderBatch>,
}

#[derive(Debug, Serialize)]
pub struct CreateSlidersResponse {
    pub status: &'static str,
    pub message: String,
    pub results: Vec<SliderOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SliderBatch {
    pub message: String,
    pub results: Vec<SliderOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SliderOutcome {
    pub article_title: String,
    pub slider_creation: SliderCreation,
}

#[derive(Debug, Clone, Serialize)]
pub struct SliderCreation {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SliderBatch {
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.slider_creation.success)
            .count()
    }
}

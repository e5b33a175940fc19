use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::models::{Article, CreateSlidersResponse, NewsQuery, NewsResponse};
use crate::news::FetchError;
use crate::state::AppState;
use crate::{email, news, slider};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/news", get(news_endpoint))
        .route("/api/create-sliders", post(create_sliders_endpoint))
        .route("/api/news-and-sliders", get(news_and_sliders_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn news_endpoint(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewsQuery>,
) -> Response {
    run_news_pipeline(&state, query.create_sliders).await
}

async fn news_and_sliders_endpoint(State(state): State<Arc<AppState>>) -> Response {
    run_news_pipeline(&state, true).await
}

async fn create_sliders_endpoint(
    State(state): State<Arc<AppState>>,
    Json(articles): Json<Vec<Article>>,
) -> Response {
    let batch = slider::create_sliders(state.config.slider.as_ref(), &state.http, &articles).await;
    tracing::info!(
        requested = articles.len(),
        created = batch.succeeded(),
        "create-sliders finished"
    );
    let response = CreateSlidersResponse {
        status: "success",
        message: batch.message,
        results: batch.results,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Fetch, then email and build sliders side by side. Only the fetch can fail
/// the request.
async fn run_news_pipeline(state: &AppState, with_sliders: bool) -> Response {
    let today = chrono::Local::now().date_naive();

    let articles = match news::fetch_news(&state.config.llm, &state.http, today).await {
        Ok(articles) => articles,
        Err(e) => return fetch_error_response(e),
    };

    let slider_config = if with_sliders {
        let config = state.config.slider.as_ref();
        if config.is_none() {
            tracing::warn!("slider creation requested but the slider API is not configured");
        }
        config
    } else {
        None
    };

    let notify = email::send_report(state.config.email.as_ref(), &state.http, &articles, today);
    let sliders = async {
        match slider_config {
            Some(config) => Some(
                slider::SliderClient::new(config, &state.http)
                    .create_sliders(&articles)
                    .await,
            ),
            None => None,
        }
    };
    let ((), sliders) = tokio::join!(notify, sliders);

    let response = NewsResponse {
        status: "success",
        count: articles.len(),
        articles,
        sliders,
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn fetch_error_response(e: FetchError) -> Response {
    tracing::error!(error = %e, "news fetch failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": e.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::Request;
    use mockito::Server;
    use serde_json::Value;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn state_from(pairs: &[(&str, String)]) -> AppState {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let config = AppConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
        AppState::new(config).unwrap()
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn articles_json(server_url: &str, images: &[&str]) -> Value {
        Value::Array(
            images
                .iter()
                .enumerate()
                .map(|(i, image)| {
                    json!({
                        "title": format!("Story {}", i + 1),
                        "summary": "Good things happened.",
                        "mini_article": "A longer telling of the good things.",
                        "image": format!("{}{}", server_url, image),
                        "url": format!("https://news.test/{}", i + 1),
                        "source": "Morocco World News",
                        "tags": ["culture", "tourism", "festival"],
                        "date": "2026-10-17"
                    })
                })
                .collect(),
        )
    }

    async fn mock_completion(server: &mut Server, content: &str) -> mockito::Mock {
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
                    .to_string(),
            )
            .create_async()
            .await
    }

    #[tokio::test]
    async fn health_is_ok_without_any_configuration() {
        let (status, body) = call(router(state_from(&[])), get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn news_returns_parsed_articles() {
        let mut server = Server::new_async().await;
        let five = articles_json(&server.url(), &["/a.jpg"; 5]);
        let completion = mock_completion(&mut server, &five.to_string()).await;

        let app = router(state_from(&[
            ("OPENAI_API_KEY", "sk-test".into()),
            ("OPENAI_BASE_URL", server.url()),
        ]));
        let (status, body) = call(app, get("/api/news")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["count"], 5);
        assert_eq!(body["articles"], five);
        assert!(body.get("sliders").is_none());
        completion.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_model_output_is_a_500() {
        let mut server = Server::new_async().await;
        let _completion = mock_completion(&mut server, "I could not find any news today.").await;

        let app = router(state_from(&[
            ("OPENAI_API_KEY", "sk-test".into()),
            ("OPENAI_BASE_URL", server.url()),
        ]));
        let (status, body) = call(app, get("/api/news")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("parse"));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_500_without_leaking_anything() {
        let app = router(state_from(&[]));
        let (status, body) = call(app, get("/api/news")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "OPENAI_API_KEY is not configured");
    }

    #[tokio::test]
    async fn sliders_are_omitted_when_the_slider_api_is_not_configured() {
        let mut server = Server::new_async().await;
        let five = articles_json(&server.url(), &["/a.jpg"; 5]);
        let _completion = mock_completion(&mut server, &five.to_string()).await;

        let app = router(state_from(&[
            ("OPENAI_API_KEY", "sk-test".into()),
            ("OPENAI_BASE_URL", server.url()),
        ]));
        let (status, body) = call(app, get("/api/news?create_sliders=true")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 5);
        assert!(body.get("sliders").is_none());
    }

    #[tokio::test]
    async fn news_and_sliders_survives_email_failure_and_a_bad_image() {
        let mut server = Server::new_async().await;
        let five = articles_json(
            &server.url(),
            &["/img/1.jpg", "/img/2.jpg", "/img/gone.jpg", "/img/4.jpg", "/img/5.jpg"],
        );
        let _completion = mock_completion(
            &mut server,
            &format!("```json\n{}\n```", five),
        )
        .await;
        let email = server
            .mock("POST", "/send-email")
            .with_status(502)
            .expect(1)
            .create_async()
            .await;
        let _images = server
            .mock("GET", mockito::Matcher::Regex(r"^/img/\d\.jpg$".into()))
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body(vec![0xFF, 0xD8, 0xFF])
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/img/gone.jpg")
            .with_status(404)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/api/sliders")
            .match_header("authorization", "Bearer slider-token")
            .with_status(201)
            .with_body(r#"{"id": 1}"#)
            .expect(4)
            .create_async()
            .await;

        let app = router(state_from(&[
            ("OPENAI_API_KEY", "sk-test".into()),
            ("OPENAI_BASE_URL", server.url()),
            ("EMAIL_API_URL", format!("{}/send-email", server.url())),
            ("EMAIL_RECIPIENT", "desk@example.com".into()),
            ("SLIDER_API_URL", server.url()),
            ("SLIDER_API_TOKEN", "slider-token".into()),
        ]));
        let (status, body) = call(app, get("/api/news-and-sliders")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 5);
        let results = body["sliders"]["results"].as_array().unwrap();
        assert_eq!(results.len(), 5);
        let failed: Vec<_> = results
            .iter()
            .filter(|r| r["slider_creation"]["success"] == false)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["article_title"], "Story 3");
        assert_eq!(body["sliders"]["message"], "Created 4 of 5 sliders");
        email.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn create_sliders_with_empty_array_succeeds() {
        let app = router(state_from(&[]));
        let (status, body) = call(app, post_json("/api/create-sliders", json!([]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["results"], json!([]));
    }

    #[tokio::test]
    async fn create_sliders_reports_unconfigured_api_per_article() {
        let app = router(state_from(&[]));
        let articles = articles_json("https://img.test", &["/a.jpg", "/b.jpg"]);
        let (status, body) = call(app, post_json("/api/create-sliders", articles)).await;

        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1]["slider_creation"]["error"],
            "slider API is not configured"
        );
    }

    #[tokio::test]
    async fn create_sliders_uploads_given_articles() {
        let mut server = Server::new_async().await;
        let _image = server
            .mock("GET", "/a.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![0x89, 0x50, 0x4E, 0x47])
            .create_async()
            .await;
        let create = server
            .mock("POST", "/api/sliders")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"slider": "ok"}"#)
            .expect(1)
            .create_async()
            .await;

        let app = router(state_from(&[
            ("SLIDER_API_URL", server.url()),
            ("SLIDER_API_TOKEN", "t".into()),
        ]));
        let articles = articles_json(&server.url(), &["/a.png"]);
        let (status, body) = call(app, post_json("/api/create-sliders", articles)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Created 1 of 1 sliders");
        assert_eq!(
            body["results"][0]["slider_creation"],
            json!({"success": true, "response": {"slider": "ok"}})
        );
        create.assert_async().await;
    }
}

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::Method,
    middleware,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::giphy::{GiphyClient, Paging};
use crate::rate_limit::{rate_limit, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    /// `None` when no API key is configured.
    pub giphy: Option<Arc<GiphyClient>>,
    pub rate_limiter: RateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    let giphy = Router::new()
        .route("/giphy/search", get(giphy_search))
        .route("/giphy/trending", get(giphy_trending))
        .layer(middleware::from_fn_with_state(state.rate_limiter.clone(), rate_limit));

    Router::new()
        .route("/health", get(health_check))
        .merge(giphy)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    giphy: bool,
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
    rating: Option<String>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        giphy: state.giphy.is_some(),
    })
}

fn client(state: &AppState) -> Result<&GiphyClient, ServerError> {
    state.giphy.as_deref().ok_or(ServerError::NotConfigured)
}

async fn giphy_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ServerError> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ServerError::BadRequest("Missing search query 'q'".into()))?;

    let paging = Paging {
        limit: params.limit,
        offset: params.offset,
        rating: params.rating.clone(),
    };
    Ok(Json(client(&state)?.search(query, &paging).await?))
}

async fn giphy_trending(
    State(state): State<AppState>,
    Query(paging): Query<Paging>,
) -> Result<Json<Value>, ServerError> {
    Ok(Json(client(&state)?.trending(&paging).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    /// Stands in for GIPHY: echoes what it was asked and adds fields the
    /// proxy must not relay.
    async fn fake_upstream() -> String {
        async fn answer(endpoint: &'static str, params: HashMap<String, String>) -> Json<Value> {
            Json(json!({
                "data": [{ "id": "gif1", "endpoint": endpoint, "q": params.get("q"), "limit": params.get("limit") }],
                "pagination": { "offset": params.get("offset"), "count": 1 },
                "meta": { "api_key": params.get("api_key") },
            }))
        }

        let app = Router::new()
            .route("/search", get(|Query(p): Query<HashMap<String, String>>| answer("search", p)))
            .route("/trending", get(|Query(p): Query<HashMap<String, String>>| answer("trending", p)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn router(giphy: Option<GiphyClient>, limiter: RateLimiter) -> Router {
        build_router(AppState {
            giphy: giphy.map(Arc::new),
            rate_limiter: limiter,
        })
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_configuration() {
        let app = router(None, RateLimiter::new(10.0, 10.0));
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["giphy"], false);
    }

    #[tokio::test]
    async fn unconfigured_proxy_is_unavailable() {
        let app = router(None, RateLimiter::new(10.0, 10.0));
        let (status, _) = get_json(&app, "/giphy/trending").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn search_relays_results_without_the_key() {
        let base = fake_upstream().await;
        let app = router(
            Some(GiphyClient::new(&base, "top-secret").unwrap()),
            RateLimiter::new(10.0, 10.0),
        );

        let (status, body) = get_json(&app, "/giphy/search?q=cats&limit=500&offset=24").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["q"], "cats");
        assert_eq!(body["data"][0]["limit"], "50");
        assert_eq!(body["pagination"]["offset"], "24");
        assert!(body.get("meta").is_none());
        assert!(!body.to_string().contains("top-secret"));

        let (status, body) = get_json(&app, "/giphy/trending?limit=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["endpoint"], "trending");
        assert_eq!(body["data"][0]["limit"], "1");
    }

    #[tokio::test]
    async fn search_requires_a_query() {
        let base = fake_upstream().await;
        let app = router(Some(GiphyClient::new(&base, "k").unwrap()), RateLimiter::new(10.0, 10.0));
        let (status, _) = get_json(&app, "/giphy/search").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/giphy/search?q=%20%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clients_over_their_budget_are_refused() {
        let app = router(None, RateLimiter::new(0.001, 1.0));
        let request = || {
            Request::builder()
                .uri("/giphy/trending")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);
        let second = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        // Health checks are not limited.
        let (status, _) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }
}

//! Axum + Askama search front end for the indoor farms directory.

pub mod search;

use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use farmdir_load::FarmdirConfig;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use search::{
    search_words, CompanyDetail, CompanyHit, DirectorySearch, MemorySearch, PgSearch, Totals,
};

pub const CRATE_NAME: &str = "farmdir-web";

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<dyn DirectorySearch>,
}

impl AppState {
    pub fn new(search: Arc<dyn DirectorySearch>) -> Self {
        Self { search }
    }
}

#[derive(Debug, Deserialize, Default)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    totals: Totals,
}

#[derive(Template)]
#[template(path = "search.html")]
struct SearchTemplate {
    query: String,
    hits: Vec<CompanyHit>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/search", get(search_page_handler))
        .route("/api/search", get(search_api_handler))
        .route("/api/companies/{id}", get(company_api_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = FarmdirConfig::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to the directory database")?;
    let state = AppState::new(Arc::new(PgSearch::new(pool)));
    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(port = config.web_port, "serving directory search");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.search.totals().await {
        Ok(totals) => render_html(IndexTemplate { totals }),
        Err(err) => server_error(err),
    }
}

async fn search_page_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state.search.search(&search_words(&query.q)).await {
        Ok(hits) => render_html(SearchTemplate {
            query: query.q,
            hits,
        }),
        Err(err) => server_error(err),
    }
}

async fn search_api_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state.search.search(&search_words(&query.q)).await {
        Ok(hits) => Json(serde_json::json!({
            "query": query.q,
            "hits": hits,
        }))
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn company_api_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match state.search.company(id).await {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("company {id} not found") })),
        )
            .into_response(),
        Err(err) => server_error(err),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use farmdir_load::{JoinKeys, LoadDriver, MemoryStore, SheetSet};
    use farmdir_storage::DataDir;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn fixture_app() -> Router {
        let fixtures = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sheets");
        let sheets = SheetSet::load(&DataDir::new(fixtures)).unwrap();
        let mut store = MemoryStore::new();
        let ready = store.reset();
        let report = LoadDriver::new(sheets, JoinKeys::default())
            .run(&mut store, ready)
            .await;
        assert!(report.success, "{:?}", report.error_message);
        app(AppState::new(Arc::new(MemorySearch::new(store.into_tables()))))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn hit_names(app: Router, q: &str) -> Vec<String> {
        let (status, body) = get(app, &format!("/api/search?q={q}")).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        json["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["trade_name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn handler_smoke_get_index() {
        let (status, body) = get(fixture_app().await, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Indoor Farms Directory"));
        assert!(body.contains("3 companies, 3 facilities, 4 products, 4 addresses"));
    }

    #[tokio::test]
    async fn search_matches_products_and_dedupes() {
        let app = fixture_app().await;
        assert_eq!(
            hit_names(app.clone(), "salad").await,
            vec!["Gotham Greens", "Bowery Farming"]
        );
        assert_eq!(
            hit_names(app.clone(), "GREENS").await,
            vec!["Gotham Greens", "Bowery Farming"]
        );
        assert_eq!(
            hit_names(app.clone(), "strawberry%20gotham").await,
            vec!["Oishii", "Gotham Greens"]
        );
        assert!(hit_names(app, "").await.is_empty());
    }

    #[tokio::test]
    async fn search_page_renders_hits() {
        let (status, body) = get(fixture_app().await, "/search?q=basil").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Gotham Greens"));
        assert!(body.contains("Brooklyn, NY"));
        assert!(!body.contains("Oishii"));

        let (status, body) = get(fixture_app().await, "/search?q=tomato").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("No companies match"));
    }

    #[tokio::test]
    async fn company_detail_json() {
        let app = fixture_app().await;
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/api/companies/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE].to_str().unwrap(), "application/json");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["trade_name"], "Gotham Greens");
        assert_eq!(json["address"]["address_1"], "810 Humboldt St");
        assert_eq!(json["products"].as_array().unwrap().len(), 2);
        let facilities = json["facilities"].as_array().unwrap();
        assert_eq!(facilities.len(), 2);
        assert_eq!(facilities[0]["type"], "greenhouse");
        assert_eq!(facilities[0]["address"]["latitude"], 40.6743);
        assert!(facilities[1]["address"].is_null());

        let (status, _) = get(app, "/api/companies/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

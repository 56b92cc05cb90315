//! HTTP surface. Every route answers 200 with a best-effort payload; only a
//! malformed query gets a 400.

pub mod query;

use crate::core::error::ValidationError;
use crate::core::history::{HistorySeries, Stage};
use crate::core::price::{ConsensusBatch, Interval};
use crate::core::risk::RiskReport;
use crate::engine::Engine;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use query::{HistoryQuery, PricesQuery, RiskQuery};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const PRICES_UNAVAILABLE: &str = "prices_unavailable";
const DEFAULT_HISTORY_DAYS: u32 = 30;

pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/prices", get(prices))
        .route("/price-history", get(price_history))
        .route("/portfolio-risk", get(portfolio_risk))
        .with_state(engine)
}

pub async fn serve(engine: Arc<Engine>, listen: &str) -> anyhow::Result<()> {
    use anyhow::Context;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(engine))
        .await
        .context("Server failed")
}

pub struct ApiError(ValidationError);

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "Rejected request");
        let body = ErrorBody {
            error: "validation_error",
            message: self.0.to_string(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct PricesResponse {
    #[serde(flatten)]
    batch: ConsensusBatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

async fn prices(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<PricesQuery>,
) -> Result<Json<PricesResponse>, ApiError> {
    let ids = query::ids(q.ids.as_deref())?;
    let currency = query::currency(q.currency.as_deref(), engine.default_currency())?;

    let mut batch = engine.prices(&ids, &currency).await;
    if batch.has_any_price() {
        return Ok(Json(PricesResponse { batch, error: None }));
    }
    warn!(ids = ids.len(), %currency, "No prices available");
    batch.rows.clear();
    Ok(Json(PricesResponse {
        batch,
        error: Some(PRICES_UNAVAILABLE),
    }))
}

#[derive(Serialize)]
struct DebugTrace {
    path: Vec<Stage>,
    notes: Vec<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    #[serde(flatten)]
    series: HistorySeries,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<DebugTrace>,
}

async fn price_history(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let id = query::id(q.id.as_deref())?;
    let days = query::days(q.days.as_deref(), DEFAULT_HISTORY_DAYS)?;
    let interval = query::interval(q.interval.as_deref(), Interval::Daily)?;
    let currency = query::currency(q.currency.as_deref(), engine.default_currency())?;
    let debug = query::flag(q.debug.as_deref(), "debug")?;

    let resolution = engine.history(&id, &currency, days, interval).await;
    Ok(Json(HistoryResponse {
        series: resolution.series,
        debug: debug.then_some(DebugTrace {
            path: resolution.path,
            notes: resolution.notes,
        }),
    }))
}

async fn portfolio_risk(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<RiskQuery>,
) -> Result<Json<RiskReport>, ApiError> {
    let ids = query::ids(q.ids.as_deref())?;
    let values = query::values(q.values.as_deref())?;
    let days = query::days(q.days.as_deref(), DEFAULT_HISTORY_DAYS)?;
    let currency = query::currency(q.currency.as_deref(), engine.default_currency())?;
    if query::interval(q.interval.as_deref(), Interval::Daily)? != Interval::Daily {
        return Err(ValidationError::Invalid {
            field: "interval",
            value: q.interval.unwrap_or_default(),
        }
        .into());
    }

    Ok(Json(engine.risk(&ids, &values, &currency, days).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::TieredCache;
    use crate::core::clock::{DAY_MS, ManualClock};
    use crate::core::config::AppConfig;
    use crate::core::error::ProviderError;
    use crate::core::price::{PriceProvider, ProviderSample, SeriesPoint};
    use crate::providers::registry::IdRegistry;
    use crate::store::bars::BarStore;
    use crate::store::memory::MemoryCollection;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const NOW: i64 = 1_700_000_000_000;

    /// Prices bitcoin at 100 with a 25% daily gain, and serves a gently
    /// rising daily history for anything.
    struct StubProvider;

    #[async_trait]
    impl PriceProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_prices(&self, ids: &[String], _currency: &str) -> Vec<ProviderSample> {
            ids.iter()
                .map(|id| match id.as_str() {
                    "bitcoin" => ProviderSample {
                        asset_id: id.clone(),
                        price: Some(100.0),
                        pct_24h: Some(25.0),
                        source: "stub".to_string(),
                    },
                    _ => ProviderSample::empty(id, "stub"),
                })
                .collect()
        }

        async fn fetch_history(
            &self,
            id: &str,
            _currency: &str,
            days: u32,
            interval: Interval,
        ) -> Result<Vec<SeriesPoint>, ProviderError> {
            if id != "bitcoin" || interval != Interval::Daily {
                return Ok(Vec::new());
            }
            Ok((0..=days as i64)
                .map(|i| SeriesPoint {
                    t: NOW - (days as i64 - i) * DAY_MS,
                    p: 100.0 + (i % 3) as f64,
                })
                .collect())
        }
    }

    fn app() -> Router {
        let clock = Arc::new(ManualClock::new(NOW));
        let cache = Arc::new(TieredCache::new(Arc::new(MemoryCollection::new()), clock));
        let provider: Arc<dyn PriceProvider> = Arc::new(StubProvider);
        let engine = Engine::new(
            Arc::new(IdRegistry::with_defaults()),
            vec![provider.clone()],
            provider,
            Arc::new(BarStore::new(Arc::new(MemoryCollection::new()))),
            cache,
            &AppConfig::default(),
        );
        create_router(Arc::new(engine))
    }

    async fn get(uri: &str) -> (StatusCode, Value) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_prices_resolves_aliases() {
        let (status, body) = get("/prices?ids=BTC,dogecoin&currency=USD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updatedAt"], NOW);
        assert!(body.get("error").is_none());

        let rows = body["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "bitcoin");
        assert_eq!(rows[0]["price"], 100.0);
        assert_eq!(rows[0]["price24hAgo"], 80.0);
        assert_eq!(rows[0]["source"], "consensus");
        assert_eq!(rows[1]["id"], "dogecoin");
        assert!(rows[1]["price"].is_null());
    }

    #[tokio::test]
    async fn test_prices_unavailable_is_still_ok() {
        let (status, body) = get("/prices?ids=dogecoin,litecoin").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], PRICES_UNAVAILABLE);
        assert_eq!(body["rows"], serde_json::json!([]));
        assert_eq!(body["updatedAt"], NOW);
    }

    #[tokio::test]
    async fn test_malformed_queries_are_rejected() {
        for uri in [
            "/prices",
            "/prices?ids=bitcoin&currency=u$d",
            "/price-history?id=bitcoin&days=0",
            "/price-history?id=bitcoin&interval=weekly",
            "/portfolio-risk?ids=bitcoin,ethereum&values=1",
            "/portfolio-risk?ids=bitcoin&values=1&interval=hourly",
        ] {
            let (status, body) = get(uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "validation_error", "{uri}");
            assert!(body["message"].is_string());
        }
    }

    #[tokio::test]
    async fn test_history_debug_trace() {
        let (status, body) = get("/price-history?id=btc&days=7&interval=daily&debug=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "bitcoin");
        assert_eq!(body["points"].as_array().unwrap().len(), 8);
        assert_eq!(
            body["debug"]["path"],
            serde_json::json!(["hot_cache", "durable_store", "provider"])
        );
        assert!(body.get("stale").is_none());

        let (_, body) = get("/price-history?id=btc&days=7").await;
        assert!(body.get("debug").is_none());
    }

    #[tokio::test]
    async fn test_history_unavailable_is_empty_not_error() {
        let (status, body) = get("/price-history?id=dogecoin&days=7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["points"], serde_json::json!([]));
        assert_eq!(body["error"], "history_unavailable");
    }

    #[tokio::test]
    async fn test_portfolio_risk() {
        let (status, body) = get("/portfolio-risk?ids=btc,dogecoin&values=300,100&days=30").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allocationHash"].as_str().unwrap().len(), 16);
        let assets = body["assets"].as_array().unwrap();
        assert_eq!(assets[0]["id"], "bitcoin");
        assert_eq!(assets[0]["weight"], 0.75);
        assert!(assets[0]["volatility"].is_number());
        assert!(assets[1]["volatility"].is_null());
        assert!(body["score"].is_number());
    }
}

use pxfeed::core::clock::{DAY_MS, HOUR_MS, ManualClock};
use pxfeed::core::config::AppConfig;
use pxfeed::core::history::Stage;
use pxfeed::core::price::{Interval, SeriesPoint};
use pxfeed::engine::Engine;
use pxfeed::store::KeyValueStore;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

const NOW: i64 = 1_700_000_000_000;

mod test_utils {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn mock_simple_price(server: &MockServer, ids: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", ids))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    pub async fn mock_market_chart(server: &MockServer, id: &str, status: u16, body: String) {
        Mock::given(method("GET"))
            .and(path(format!("/coins/{id}/market_chart")))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    pub fn chart_body(points: &[(i64, f64)]) -> String {
        let prices: Vec<String> = points.iter().map(|(t, p)| format!("[{t}, {p}]")).collect();
        format!(r#"{{"prices": [{}]}}"#, prices.join(","))
    }
}

struct Harness {
    engine: Engine,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

fn harness(server_uri: &str) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.providers.coingecko.base_url = server_uri.to_string();
    config.fetch.attempts = 1;
    config.fetch.jitter_ms = 0;
    config.fetch.timeout_ms = 2_000;

    let clock = Arc::new(ManualClock::new(NOW));
    let store = KeyValueStore::open(dir.path());
    let engine = Engine::from_config(&config, &store, clock.clone()).unwrap();
    Harness {
        engine,
        clock,
        _dir: dir,
    }
}

#[test_log::test(tokio::test)]
async fn test_prices_take_24h_reference_from_history_when_provider_has_none() {
    let server = wiremock::MockServer::start().await;
    test_utils::mock_simple_price(
        &server,
        "bitcoin,ethereum",
        r#"{"bitcoin": {"usd": 66000.0, "usd_24h_change": 10.0},
            "ethereum": {"usd": 3000.0}}"#,
    )
    .await;
    let hourly: Vec<(i64, f64)> = (0..=24)
        .map(|h| (NOW - DAY_MS + h * HOUR_MS, 2500.0 + h as f64 * 20.0))
        .collect();
    test_utils::mock_market_chart(&server, "ethereum", 200, test_utils::chart_body(&hourly)).await;

    let h = harness(&server.uri());
    let batch = h.engine.prices(&["ETH", "btc"], "usd").await;
    info!(?batch, "Consensus batch");

    let btc = batch.row("bitcoin").unwrap();
    assert_eq!(btc.price, Some(66000.0));
    assert!((btc.price_24h_ago.unwrap() - 60000.0).abs() < 1e-6);

    let eth = batch.row("ethereum").unwrap();
    assert_eq!(eth.price, Some(3000.0));
    assert_eq!(eth.price_24h_ago, Some(2500.0));
    assert!((eth.pct_24h.unwrap() - 20.0).abs() < 1e-9);
    assert!(!eth.stale);
    assert_eq!(batch.updated_at, NOW);
}

#[test_log::test(tokio::test)]
async fn test_one_day_history_synthesized_when_provider_fails() {
    let server = wiremock::MockServer::start().await;
    test_utils::mock_market_chart(&server, "solana", 500, String::new()).await;
    test_utils::mock_simple_price(
        &server,
        "solana",
        r#"{"solana": {"usd": 150.0, "usd_24h_change": -25.0}}"#,
    )
    .await;

    let h = harness(&server.uri());
    let out = h.engine.history("SOL", "usd", 1, Interval::Hourly).await;

    assert_eq!(
        out.path,
        vec![
            Stage::HotCache,
            Stage::Provider,
            Stage::CoarserInterval,
            Stage::Synthesized
        ]
    );
    let points = &out.series.points;
    assert_eq!(points.len(), 2);
    assert_eq!(points[1].t - points[0].t, DAY_MS);
    assert_eq!(points[0], SeriesPoint { t: NOW - DAY_MS, p: 200.0 });
    assert_eq!(points[1], SeriesPoint { t: NOW, p: 150.0 });
    assert!(out.notes.iter().any(|n| n.contains("coingecko")));
}

#[test_log::test(tokio::test)]
async fn test_daily_history_served_from_durable_bars_after_first_fetch() {
    let server = wiremock::MockServer::start().await;
    let daily: Vec<(i64, f64)> = (0..=30)
        .map(|d| (NOW - (30 - d) * DAY_MS, 60000.0 + d as f64 * 100.0))
        .collect();
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/coins/bitcoin/market_chart"))
        .and(wiremock::matchers::query_param("interval", "daily"))
        .respond_with(
            wiremock::ResponseTemplate::new(200).set_body_string(test_utils::chart_body(&daily)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri());
    let first = h.engine.history("bitcoin", "usd", 30, Interval::Daily).await;
    assert_eq!(first.path.last(), Some(&Stage::Provider));
    assert_eq!(first.series.points.len(), 31);

    // Past the hot tier: the recorded bars answer without another call.
    h.clock.advance_ms(10 * 60 * 1000);
    let second = h.engine.history("bitcoin", "usd", 30, Interval::Daily).await;
    assert_eq!(second.path.last(), Some(&Stage::DurableStore));
    assert!(second.series.points.len() >= 30);
    assert!(second.series.points.windows(2).all(|w| w[0].t < w[1].t));
}

#[test_log::test(tokio::test)]
async fn test_total_outage_serves_last_good_prices() {
    let server = wiremock::MockServer::start().await;
    test_utils::mock_simple_price(
        &server,
        "bitcoin",
        r#"{"bitcoin": {"usd": 65000.0, "usd_24h_change": 1.0}}"#,
    )
    .await;

    let h = harness(&server.uri());
    let good = h.engine.prices(&["bitcoin"], "usd").await;
    assert_eq!(good.row("bitcoin").unwrap().price, Some(65000.0));

    server.reset().await;
    wiremock::Mock::given(wiremock::matchers::any())
        .respond_with(wiremock::ResponseTemplate::new(503))
        .mount(&server)
        .await;
    h.clock.advance_ms(60_000);

    let served = h.engine.prices(&["bitcoin"], "usd").await;
    assert!(served.rows.iter().all(|r| r.stale));
    assert_eq!(served.updated_at, good.updated_at);
    assert_eq!(served.row("bitcoin").unwrap().price, Some(65000.0));
}

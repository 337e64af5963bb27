//! End-to-end tests of the HTTP surface against a mocked upstream provider.
//!
//! Each test starts its own wiremock server for the Open-Meteo endpoints and
//! serves the real router on an ephemeral port.

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use forecast_consensus::{routes, Config, ForecastEngine, ModelConfig, OpenMeteoClient};

const HOURS: usize = 48;

// ---

fn hourly_times() -> Vec<String> {
    (0..HOURS)
        .map(|h| format!("2025-06-{:02}T{:02}:00", 1 + h / 24, h % 24))
        .collect()
}

/// Two days from two models: 10/12°C, overcast, rain at 15:00 on day one.
fn forecast_body() -> Value {
    // ---
    let rain: Vec<f64> = (0..HOURS).map(|h| if h == 15 { 1.5 } else { 0.0 }).collect();

    json!({
        "latitude": 52.37,
        "longitude": 4.89,
        "timezone": "Europe/Amsterdam",
        "hourly_units": { "time": "iso8601" },
        "hourly": {
            "time": hourly_times(),
            "temperature_2m_gfs_seamless": vec![10.0; HOURS],
            "temperature_2m_icon_seamless": vec![12.0; HOURS],
            "weather_code_gfs_seamless": vec![3; HOURS],
            "weather_code_icon_seamless": vec![3; HOURS],
            "precipitation_gfs_seamless": rain,
            "precipitation_icon_seamless": rain,
        },
        "daily": {
            "time": ["2025-06-01", "2025-06-02"],
            "sunrise": ["2025-06-01T05:20", "2025-06-02T05:19"],
            "sunset": ["2025-06-01T21:50", "2025-06-02T21:51"]
        }
    })
}

fn air_quality_body() -> Value {
    json!({
        "hourly": {
            "time": hourly_times(),
            "uv_index": vec![2.5; HOURS],
            "european_aqi": vec![30; HOURS]
        }
    })
}

async fn mount_upstream(server: &MockServer, forecast: ResponseTemplate, air: ResponseTemplate) {
    // ---
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("timezone", "auto"))
        .respond_with(forecast)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/air-quality"))
        .respond_with(air)
        .mount(server)
        .await;
}

/// Serve the router against `upstream`; returns the base URL.
async fn spawn_app(upstream: &MockServer) -> Result<String> {
    // ---
    let config = Config {
        forecast_url: upstream.uri(),
        air_quality_url: upstream.uri(),
        forecast_days: 2,
        ..Config::default()
    };
    let models = ModelConfig::load(None)?;
    let client = OpenMeteoClient::new(&config, &models)?;
    let engine = std::sync::Arc::new(ForecastEngine::from_config(client, models, &config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, routes::router(engine)).await });

    Ok(format!("http://{addr}"))
}

async fn upstream_calls(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .count()
}

#[tokio::test]
async fn forecast_endpoint_returns_consensus() -> Result<()> {
    // ---
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ResponseTemplate::new(200).set_body_json(forecast_body()),
        ResponseTemplate::new(200).set_body_json(air_quality_body()),
    )
    .await;
    let base = spawn_app(&upstream).await?;

    let response = Client::new()
        .get(format!("{base}/forecast?lat=52.37&lon=4.89"))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;

    let hourly = body["hourly"].as_array().expect("hourly array");
    assert_eq!(hourly.len(), HOURS);

    let first = &hourly[0];
    assert_eq!(first["time"], "2025-06-01T00:00:00");
    let temperature = first["temperature"]["value"].as_f64().expect("temperature");
    assert!((10.0..=12.0).contains(&temperature), "got {temperature}");
    assert_eq!(first["temperature"]["model_count"], 2);
    assert_eq!(first["weather_code"]["code"], 3);
    assert_eq!(first["uv_index"], 2.5);
    assert!(first["wind_speed"].is_null());

    let daily = body["daily"].as_array().expect("daily array");
    assert_eq!(daily.len(), 2);
    assert_eq!(daily[0]["precipitation_total"], 1.5);
    assert_eq!(daily[0]["slots"][2]["precipitation_mm"], 1.5);
    assert_eq!(daily[0]["sunrise"], "2025-06-01T05:20:00");

    assert_eq!(body["parameters"]["temperature"]["status"], "ok");
    assert_eq!(body["parameters"]["wind_speed"]["status"], "degraded");

    Ok(())
}

#[tokio::test]
async fn repeated_requests_hit_the_cache() -> Result<()> {
    // ---
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ResponseTemplate::new(200).set_body_json(forecast_body()),
        ResponseTemplate::new(200).set_body_json(air_quality_body()),
    )
    .await;
    let base = spawn_app(&upstream).await?;
    let client = Client::new();

    let first: Value = client
        .get(format!("{base}/forecast?lat=52.37&lon=4.89"))
        .send()
        .await?
        .json()
        .await?;
    // Rounds to the same 4-decimal coordinate.
    let second: Value = client
        .get(format!("{base}/forecast?lat=52.370001&lon=4.890002"))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(first, second);
    assert_eq!(upstream_calls(&upstream, "/v1/forecast").await, 1);

    let stats: Value = client
        .get(format!("{base}/cache/stats"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["raw"]["valid"], 1);
    assert_eq!(stats["processed"]["valid"], 1);
    assert_eq!(stats["processed"]["keys"], json!(["52.3700,4.8900"]));
    assert_eq!(stats["ttl_synchronized"], true);

    client
        .get(format!("{base}/forecast?lat=52.37&lon=4.89&refresh=true"))
        .send()
        .await?;
    assert_eq!(upstream_calls(&upstream, "/v1/forecast").await, 2);

    Ok(())
}

#[tokio::test]
async fn upstream_failure_maps_to_bad_gateway() -> Result<()> {
    // ---
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ResponseTemplate::new(500).set_body_json(json!({ "error": true, "reason": "model run unavailable" })),
        ResponseTemplate::new(200).set_body_json(air_quality_body()),
    )
    .await;
    let base = spawn_app(&upstream).await?;

    let response = Client::new()
        .get(format!("{base}/forecast?lat=52.37&lon=4.89"))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await?;
    let message = body["error"].as_str().expect("error message");
    assert!(message.contains("model run unavailable"), "got {message}");

    let stats: Value = Client::new()
        .get(format!("{base}/cache/stats"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["processed"]["total"], 0);

    Ok(())
}

#[tokio::test]
async fn air_quality_failure_only_drops_uv_and_aqi() -> Result<()> {
    // ---
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ResponseTemplate::new(200).set_body_json(forecast_body()),
        ResponseTemplate::new(503),
    )
    .await;
    let base = spawn_app(&upstream).await?;

    let response = Client::new()
        .get(format!("{base}/forecast?lat=52.37&lon=4.89"))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;

    assert!(body["hourly"][0]["uv_index"].is_null());
    assert!(body["hourly"][0]["european_aqi"].is_null());
    assert!(body["hourly"][0]["temperature"]["value"].is_number());
    assert!(body["daily"][0]["uv_max"].is_null());

    Ok(())
}

#[tokio::test]
async fn invalid_requests_map_to_bad_request() -> Result<()> {
    // ---
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ResponseTemplate::new(200).set_body_json(forecast_body()),
        ResponseTemplate::new(200).set_body_json(air_quality_body()),
    )
    .await;
    let base = spawn_app(&upstream).await?;
    let client = Client::new();

    for query in ["lat=123&lon=4.89", "lat=52.37&lon=-181", "lat=52.37", "lat=north&lon=4.89"] {
        let response = client.get(format!("{base}/forecast?{query}")).send().await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {query}");
        let body: Value = response.json().await?;
        assert!(body["error"].is_string(), "query {query}");
    }

    assert_eq!(upstream_calls(&upstream, "/v1/forecast").await, 0);

    Ok(())
}

#[tokio::test]
async fn delete_cache_and_health() -> Result<()> {
    // ---
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ResponseTemplate::new(200).set_body_json(forecast_body()),
        ResponseTemplate::new(200).set_body_json(air_quality_body()),
    )
    .await;
    let base = spawn_app(&upstream).await?;
    let client = Client::new();

    client
        .get(format!("{base}/forecast?lat=48.8566&lon=2.3522"))
        .send()
        .await?;

    let response = client.delete(format!("{base}/cache")).send().await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let stats: Value = client
        .get(format!("{base}/cache/stats"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["raw"]["total"], 0);
    assert_eq!(stats["processed"]["total"], 0);

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["invalid_parameters"], json!({}));

    Ok(())
}

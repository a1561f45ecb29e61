//! Integration tests for WeatherService and WeatherTools using wiremock.
//!
//! Both Open-Meteo endpoints (geocoding and forecast) are served by one
//! mock server; retries use millisecond backoff to keep the suite fast.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use skycast_core::{Config, Units};
use skycast_weather::{ErrorKind, LookupOutcome, ToolResponse, WeatherService, WeatherTools};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.http.geocoding_url = server.uri();
    config.http.forecast_url = server.uri();
    config.http.timeout_secs = 5.0;
    config.http.retry_backoff_secs = 0.01;
    config.http.max_backoff_secs = 0.05;
    config.rate_limit.requests_per_second = 0;
    config
}

fn tools_for(config: Config) -> WeatherTools {
    WeatherTools::new(Arc::new(WeatherService::from_config(config).unwrap()))
}

fn place(name: &str, admin1: &str, country: &str, lat: f64, lon: f64, tz: Option<&str>) -> serde_json::Value {
    json!({
        "id": 1,
        "name": name,
        "latitude": lat,
        "longitude": lon,
        "country": country,
        "admin1": admin1,
        "timezone": tz,
    })
}

fn chongqing() -> serde_json::Value {
    json!({
        "results": [place("Chongqing", "Chongqing", "China", 29.56278, 106.55278, Some("Asia/Shanghai"))]
    })
}

fn current_body() -> serde_json::Value {
    json!({
        "latitude": 29.56, "longitude": 106.55, "timezone": "Asia/Shanghai",
        "current_weather": {
            "time": "2024-05-01T14:00", "temperature": 27.3, "windspeed": 8.1,
            "winddirection": 120.0, "weathercode": 61, "is_day": 1
        }
    })
}

async fn mount_geocode(server: &MockServer, name: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", name))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_weather_success() {
    let server = MockServer::start().await;
    mount_geocode(&server, "chongqing", chongqing()).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("current_weather", "true"))
        .and(query_param("temperature_unit", "celsius"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
        .mount(&server)
        .await;

    let tools = tools_for(config_for(&server));
    let response = tools
        .get_weather("Chongqing", Some("metric"), None, &CancellationToken::new())
        .await;

    match response {
        ToolResponse::Success { data } => {
            assert_eq!(data["location"]["name"], "Chongqing");
            assert_eq!(data["units"], "metric");
            assert_eq!(data["current"]["temperature"], 27.3);
            assert_eq!(data["current"]["condition"], "rain");
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_latin_query_matches_chinese_localized_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("language", "zh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [place("重庆市", "重庆市", "中国", 29.56278, 106.55278, Some("Asia/Shanghai"))]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
        .mount(&server)
        .await;

    let tools = tools_for(config_for(&server));
    let response = tools
        .get_weather("Chongqing", None, Some("zh"), &CancellationToken::new())
        .await;

    match response {
        ToolResponse::Success { data } => {
            assert_eq!(data["location"]["name"], "重庆市");
            assert_eq!(data["current"]["summary"], "小雨");
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_lookup_within_ttl_hits_upstream_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chongqing()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
        .expect(1)
        .mount(&server)
        .await;

    let service = WeatherService::from_config(config_for(&server)).unwrap();
    let cancel = CancellationToken::new();

    for city in ["Chongqing", "  chongqing", "CHONGQING "] {
        let outcome = service.current_weather(city, Units::Metric, "en", &cancel).await;
        assert!(outcome.is_found(), "{outcome:?}");
    }

    let geocode = &service.stats()[0];
    assert_eq!((geocode.hits, geocode.misses), (2, 1));
}

#[tokio::test]
async fn test_geocode_refetched_after_ttl_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chongqing()))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.cache.geocode_ttl_secs = 1;
    let service = WeatherService::from_config(config).unwrap();
    let cancel = CancellationToken::new();

    assert!(service.resolve_city("Chongqing", "en", &cancel).await.is_found());
    assert!(service.resolve_city("Chongqing", "en", &cancel).await.is_found());
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(service.resolve_city("Chongqing", "en", &cancel).await.is_found());
}

#[tokio::test]
async fn test_near_matches_surface_as_suggestions() {
    let server = MockServer::start().await;
    mount_geocode(
        &server,
        "chongqing",
        json!({
            "results": [
                place("Yuzhong", "Chongqing", "China", 29.55, 106.56, None),
                place("Jiangbei", "Chongqing", "China", 29.6, 106.57, None),
            ]
        }),
    )
    .await;

    let tools = tools_for(config_for(&server));
    let response = tools
        .get_weather("Chongqing", None, None, &CancellationToken::new())
        .await;

    match response {
        ToolResponse::NotFound {
            error_message,
            suggestions,
        } => {
            assert!(error_message.to_lowercase().contains("chongqing"));
            assert_eq!(
                suggestions,
                vec!["Yuzhong, Chongqing, China", "Jiangbei, Chongqing, China"]
            );
        }
        other => panic!("expected not_found, got {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_candidates_is_not_found_without_suggestions() {
    let server = MockServer::start().await;
    mount_geocode(&server, "atlantis", json!({"generationtime_ms": 0.2})).await;

    let service = WeatherService::from_config(config_for(&server)).unwrap();
    let outcome = service
        .resolve_city("Atlantis", "en", &CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        LookupOutcome::NotFound {
            query: "Atlantis".into(),
            suggestions: vec![],
        }
    );
}

#[tokio::test]
async fn test_transient_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_geocode(&server, "chongqing", chongqing()).await;

    let service = WeatherService::from_config(config_for(&server)).unwrap();
    let outcome = service
        .resolve_city("Chongqing", "en", &CancellationToken::new())
        .await;

    assert!(outcome.is_found(), "{outcome:?}");
}

#[tokio::test]
async fn test_exhausted_retries_report_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let tools = tools_for(config_for(&server));
    let response = tools
        .get_forecast("Chongqing", Some(3), None, None, &CancellationToken::new())
        .await;

    match response {
        ToolResponse::Error { error_kind, .. } => assert_eq!(error_kind, ErrorKind::Transient),
        other => panic!("expected transient error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_error_is_permanent_and_not_retried() {
    let server = MockServer::start().await;
    mount_geocode(&server, "chongqing", chongqing()).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": true,
            "reason": "Forecast days is invalid"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tools = tools_for(config_for(&server));
    let response = tools
        .get_forecast("Chongqing", Some(3), None, None, &CancellationToken::new())
        .await;

    match response {
        ToolResponse::Error {
            error_kind,
            error_message,
        } => {
            assert_eq!(error_kind, ErrorKind::Permanent);
            assert!(error_message.contains("400"), "{error_message}");
        }
        other => panic!("expected permanent error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forecast_request_carries_days_and_units() {
    let server = MockServer::start().await;
    mount_geocode(&server, "chongqing", chongqing()).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("forecast_days", "2"))
        .and(query_param("temperature_unit", "fahrenheit"))
        .and(query_param("windspeed_unit", "mph"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "daily": {
                "time": ["2024-05-01", "2024-05-02"],
                "temperature_2m_max": [84.2, 86.7],
                "temperature_2m_min": [69.8, 72.5],
                "weathercode": [3, 95]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tools = tools_for(config_for(&server));
    let response = tools
        .dispatch_json(
            r#"{"type": "get_forecast", "city": "Chongqing", "days": 2, "units": "imperial", "language": "zh"}"#,
            &CancellationToken::new(),
        )
        .await;

    match response {
        ToolResponse::Success { data } => {
            assert_eq!(data["days"].as_array().unwrap().len(), 2);
            assert_eq!(data["days"][1]["condition"], "thunderstorm");
            assert_eq!(data["days"][1]["summary"], "雷暴");
            assert_eq!(data["units"], "imperial");
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_local_time_uses_geocoder_timezone() {
    let server = MockServer::start().await;
    mount_geocode(&server, "chongqing", chongqing()).await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"timezone": "UTC"})))
        .expect(0)
        .mount(&server)
        .await;

    let tools = tools_for(config_for(&server));
    let response = tools
        .get_local_time("Chongqing", None, &CancellationToken::new())
        .await;

    match response {
        ToolResponse::Success { data } => {
            assert_eq!(data["time"]["timezone"], "Asia/Shanghai");
            assert_eq!(data["time"]["utc_offset"], "UTC+8");
            assert_eq!(data["time"]["estimated"], false);
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_local_time_falls_back_to_estimated_zone() {
    let server = MockServer::start().await;
    mount_geocode(
        &server,
        "chongqing",
        json!({"results": [place("Chongqing", "Chongqing", "China", 29.56, 106.55, None)]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("timezone", "auto"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let service = WeatherService::from_config(config_for(&server)).unwrap();
    let report = service
        .local_time("Chongqing", "en", &CancellationToken::new())
        .await
        .found()
        .unwrap();

    assert_eq!(report.time.timezone, "Etc/GMT-7");
    assert_eq!(report.time.utc_offset, "UTC+7");
    assert!(report.time.estimated);
}

#[tokio::test]
async fn test_lookups_for_different_cities_do_not_block_each_other() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", "slowtown"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": [place("Slowtown", "Region", "Country", 10.0, 10.0, None)]}))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;
    mount_geocode(&server, "chongqing", chongqing()).await;

    let service = Arc::new(WeatherService::from_config(config_for(&server)).unwrap());
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let slow = {
        let service = Arc::clone(&service);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = service.resolve_city("Slowtown", "en", &cancel).await;
            (outcome.is_found(), start.elapsed())
        })
    };
    let fast = {
        let service = Arc::clone(&service);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = service.resolve_city("Chongqing", "en", &cancel).await;
            (outcome.is_found(), start.elapsed())
        })
    };

    let (slow_found, slow_elapsed) = slow.await.unwrap();
    let (fast_found, fast_elapsed) = fast.await.unwrap();

    assert!(slow_found && fast_found);
    assert!(slow_elapsed >= Duration::from_millis(800));
    assert!(
        fast_elapsed < Duration::from_millis(600),
        "fast lookup waited {fast_elapsed:?}"
    );
}

#[tokio::test]
async fn test_shared_rate_limit_spreads_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(4)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.rate_limit.requests_per_second = 2;
    let service = Arc::new(WeatherService::from_config(config).unwrap());
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for city in ["alpha", "bravo", "charlie", "delta"] {
        let service = Arc::clone(&service);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            service.resolve_city(city, "en", &cancel).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_not_found());
    }

    // 4 requests at 2/s: the second pair waits for the first to age out
    assert!(start.elapsed() >= Duration::from_millis(950));
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chongqing())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let tools = tools_for(config_for(&server));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let response = tools.get_weather("Chongqing", None, None, &cancel).await;

    assert!(start.elapsed() < Duration::from_secs(2));
    match response {
        ToolResponse::Error { error_kind, .. } => assert_eq!(error_kind, ErrorKind::Transient),
        other => panic!("expected cancellation error, got {other:?}"),
    }
}

//! TelemetryExecutor against a local fake service

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::time::Instant;

use arrival_bench_core::{
    ExecutorError, FailureReason, Iteration, OrchestratorBuilder, RequestExecutor, RunConfig,
    RunStatus, StreamConfig, TagSet, ThresholdConfig, WorkerContext,
};
use arrival_bench_http::{Device, DeviceRegistry, HttpConfig, TelemetryExecutor};

#[derive(Default)]
struct Service {
    posts: AtomicUsize,
}

async fn post_telemetry(
    State(service): State<Arc<Service>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if key != Some(format!("key-{uuid}").as_str()) {
        return StatusCode::UNAUTHORIZED;
    }
    if body.get("x_coord").is_none() || body.get("device_time").is_none() {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    service.posts.fetch_add(1, Ordering::SeqCst);
    StatusCode::CREATED
}

async fn latest(Path(uuid): Path<String>) -> StatusCode {
    if uuid == "dev-known" {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn spawn_service() -> (SocketAddr, Arc<Service>) {
    let service = Arc::new(Service::default());
    let app = Router::new()
        .route("/api/", get(|| async { "telemetry" }))
        .route("/api/health/", get(|| async { "ok" }))
        .route("/api/health/db", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route("/api/devices", get(|| async { "[]" }))
        .route("/api/telemetry/latest/:uuid", get(latest))
        .route("/api/telemetry/:uuid", post(post_telemetry))
        .with_state(Arc::clone(&service));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, service)
}

fn devices() -> DeviceRegistry {
    DeviceRegistry::from_devices(vec![
        Device {
            device_uuid: "dev-known".into(),
            api_key: "key-dev-known".into(),
        },
        Device {
            device_uuid: "dev-new".into(),
            api_key: "key-dev-new".into(),
        },
    ])
}

fn executor(addr: SocketAddr) -> TelemetryExecutor {
    let config = HttpConfig::default().with_request_timeout(Duration::from_secs(5));
    TelemetryExecutor::new(format!("http://{addr}"), &config, devices()).unwrap()
}

fn iteration(exec: &str) -> Iteration {
    Iteration::new(
        0,
        "s".into(),
        Some(exec.into()),
        Arc::new(TagSet::new()),
        Instant::now(),
    )
}

#[tokio::test]
async fn test_get_endpoints_classify_status() {
    let (addr, _) = spawn_service().await;
    let exec = executor(addr);
    let mut ctx = WorkerContext::new(0, "s".into(), 1);

    let home = exec.execute(&mut ctx, &iteration("home")).await.unwrap();
    assert!(home.is_success());
    assert_eq!(home.status_code, Some(200));

    let db = exec.execute(&mut ctx, &iteration("health_db")).await.unwrap();
    assert!(!db.is_success());
    assert_eq!(db.outcome.failure(), Some(&FailureReason::UnexpectedStatus(503)));
}

#[tokio::test]
async fn test_latest_accepts_not_found() {
    let (addr, _) = spawn_service().await;
    let exec = executor(addr);

    let mut known = WorkerContext::new(0, "s".into(), 1);
    let result = exec
        .execute(&mut known, &iteration("telemetry_get_latest"))
        .await
        .unwrap();
    assert_eq!(result.status_code, Some(200));
    assert!(result.is_success());

    let mut fresh = WorkerContext::new(1, "s".into(), 1);
    let result = exec
        .execute(&mut fresh, &iteration("telemetry_get_latest"))
        .await
        .unwrap();
    assert_eq!(result.status_code, Some(404));
    assert!(result.is_success());
}

#[tokio::test]
async fn test_device_follows_run_slot_across_streams() {
    let (addr, _) = spawn_service().await;
    let exec = executor(addr);

    // Worker 0 of a second pool sits in run slot 1 and gets the second device
    let mut read = WorkerContext::with_run_slot(0, 0, "read".into(), 1);
    let mut write = WorkerContext::with_run_slot(0, 1, "write".into(), 1);

    let first = exec
        .execute(&mut read, &iteration("telemetry_get_latest"))
        .await
        .unwrap();
    let second = exec
        .execute(&mut write, &iteration("telemetry_get_latest"))
        .await
        .unwrap();
    assert_eq!(first.status_code, Some(200));
    assert_eq!(second.status_code, Some(404));
}

#[tokio::test]
async fn test_post_sends_device_key_and_payload() {
    let (addr, service) = spawn_service().await;
    let exec = executor(addr);

    for worker_id in 0..4 {
        let mut ctx = WorkerContext::new(worker_id, "s".into(), 9);
        let result = exec
            .execute(&mut ctx, &iteration("telemetry_post"))
            .await
            .unwrap();
        assert_eq!(result.status_code, Some(201));
        assert!(result.is_success());
    }
    assert_eq!(service.posts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_connection_refused_is_connection_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let exec = executor(addr);
    let mut ctx = WorkerContext::new(0, "s".into(), 1);

    let err = exec.execute(&mut ctx, &iteration("home")).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn test_short_run_against_service() {
    let (addr, service) = spawn_service().await;
    let config = RunConfig::new("local")
        .with_seed(5)
        .with_graceful_stop(Duration::from_secs(5))
        .with_stream(
            StreamConfig::constant("writes", 20.0, Duration::from_secs(1))
                .with_exec("telemetry_post")
                .with_workers(2, 10),
        )
        .with_stream(StreamConfig::constant("home", 10.0, Duration::from_secs(1)).with_exec("home"))
        .with_threshold(
            "http_req_failed{endpoint:telemetry_post}",
            ThresholdConfig::abort_on_fail("rate<0.01", Duration::ZERO),
        );

    let summary = OrchestratorBuilder::new()
        .config(config)
        .executor(Arc::new(executor(addr)))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.totals.count, 30);
    assert_eq!(summary.totals.errors, 0);
    assert_eq!(service.posts.load(Ordering::SeqCst), 20);
    assert_eq!(summary.exit_code(), 0);
}

//! Integration tests for flowgate
//!
//! Health poller scenarios run against in-process TCP stub servers; the
//! bootstrap pipeline runs against stub proxy binaries so no nginx or
//! Docker daemon is required.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flowgate::config::{
    ProxyParams, RawParams, ENV_BACKEND_URL, ENV_NGINX_BIN, ENV_TEMPLATE,
};
use flowgate::health::{HealthOutcome, HealthPoller};
use flowgate::logpolicy::LogPolicy;
use flowgate::supervisor::{Supervisor, SupervisorState};
use flowgate::template;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve minimal HTTP responses: 503 until `healthy_after` requests have
/// been seen, 200 afterwards. Returns the bound address and a request
/// counter.
async fn stub_health_server(healthy_after: usize) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let server_counter = Arc::clone(&counter);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let seen = server_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let healthy = seen > healthy_after;
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = if healthy {
                    "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                } else {
                    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, counter)
}

/// Serve 200 to every request, recording the User-Agent header of the
/// first one.
async fn stub_ua_capture_server() -> (SocketAddr, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(None));
    let server_captured = Arc::clone(&captured);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let captured = Arc::clone(&server_captured);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 2048];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&buf[..n]).into_owned();
                for line in head.lines() {
                    if let Some(value) = line
                        .strip_prefix("user-agent:")
                        .or_else(|| line.strip_prefix("User-Agent:"))
                    {
                        captured
                            .lock()
                            .unwrap()
                            .get_or_insert_with(|| value.trim().to_string());
                    }
                }
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, captured)
}

#[tokio::test]
async fn test_poller_returns_healthy_after_n_polls() {
    let (addr, counter) = stub_health_server(2).await;
    let interval = Duration::from_millis(100);

    let poller = HealthPoller::new(
        format!("http://{addr}/health"),
        Duration::from_secs(10),
    )
    .with_interval(interval);

    let started = Instant::now();
    let outcome = poller.wait_healthy().await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, HealthOutcome::Healthy);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    // Two failed attempts means roughly two interval sleeps before success.
    assert!(elapsed >= Duration::from_millis(180), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "elapsed: {elapsed:?}");
}

#[tokio::test]
async fn test_poller_healthy_target_returns_immediately() {
    let (addr, _) = stub_health_server(0).await;

    let poller = HealthPoller::new(format!("http://{addr}/"), Duration::from_secs(30))
        .with_interval(Duration::from_secs(1));

    let started = Instant::now();
    assert_eq!(poller.wait_healthy().await, HealthOutcome::Healthy);
    // A healthy first observation must not wait out any interval.
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_poller_times_out_at_deadline() {
    // Never becomes healthy.
    let (addr, _) = stub_health_server(usize::MAX).await;
    let timeout = Duration::from_millis(500);

    let poller = HealthPoller::new(format!("http://{addr}/health"), timeout)
        .with_interval(Duration::from_millis(100));

    let started = Instant::now();
    let outcome = poller.wait_healthy().await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, HealthOutcome::Timeout);
    // At the boundary: not early, not much later.
    assert!(elapsed >= timeout, "elapsed: {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_secs(1), "elapsed: {elapsed:?}");
}

#[tokio::test]
async fn test_poller_reports_exited_target_without_waiting_for_deadline() {
    let (addr, _) = stub_health_server(usize::MAX).await;

    let poller = HealthPoller::new(
        format!("http://{addr}/health"),
        Duration::from_secs(30),
    )
    .with_interval(Duration::from_millis(50))
    .with_liveness(|| async { false });

    let started = Instant::now();
    assert_eq!(poller.wait_healthy().await, HealthOutcome::TargetExited);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_poller_sends_identifiable_user_agent() {
    let (addr, captured) = stub_ua_capture_server().await;

    let poller = HealthPoller::new(format!("http://{addr}/"), Duration::from_secs(5));
    assert_eq!(poller.wait_healthy().await, HealthOutcome::Healthy);

    let ua = captured.lock().unwrap().clone().expect("user agent captured");
    assert!(
        ua.starts_with("flowgate-healthcheck"),
        "unexpected user agent: {ua}"
    );
}

/// Mirror of the documented startup scenario: the backend answers 200 only
/// after a delay shorter than the timeout, so the orchestration proceeds.
#[tokio::test]
async fn test_backend_becomes_healthy_within_timeout() {
    let (addr, _) = stub_health_server(3).await;

    let poller = HealthPoller::new(
        format!("http://{addr}/health"),
        Duration::from_secs(30),
    )
    .with_interval(Duration::from_millis(200));

    let started = Instant::now();
    assert_eq!(poller.wait_healthy().await, HealthOutcome::Healthy);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(30), "elapsed: {elapsed:?}");
}

fn stub_proxy_binary(dir: &Path, script: &str) -> String {
    let path = dir.join("nginx");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn bootstrap_params(nginx_bin: &str) -> ProxyParams {
    let template_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("templates/default.conf.template");
    let vars = HashMap::from([
        (
            ENV_BACKEND_URL.to_string(),
            "http://flowgate-backend:7860".to_string(),
        ),
        (
            ENV_TEMPLATE.to_string(),
            template_path.to_string_lossy().into_owned(),
        ),
        (ENV_NGINX_BIN.to_string(), nginx_bin.to_string()),
    ]);
    ProxyParams::resolve(&RawParams::new(vars, Vec::new())).unwrap()
}

#[tokio::test]
async fn test_bootstrap_pipeline_renders_validates_and_supervises() {
    let work = tempfile::tempdir().unwrap();
    let bin = stub_proxy_binary(work.path(), "#!/bin/sh\nexit 0\n");

    let params = bootstrap_params(&bin);
    let policy = LogPolicy::from_params(&params);
    let rendered = template::render_config(&params, &policy).unwrap();

    // The shipped template resolves completely from the parameter set.
    let conf = rendered.read().unwrap();
    assert!(!conf.contains("${"), "unresolved placeholder in:\n{conf}");
    assert!(conf.contains("listen 8080;"));
    assert!(conf.contains("proxy_pass http://flowgate-backend:7860;"));
    assert!(conf.contains("client_max_body_size 10m;"));
    assert!(conf.contains("gzip_comp_level 5;"));
    assert!(conf.contains("worker_connections 1024;"));
    assert!(conf.contains("error_log /dev/stderr warn;"));

    let mut supervisor = Supervisor::new(
        &params.nginx_bin,
        rendered.conf_path().to_path_buf(),
        rendered.runtime_dir().to_path_buf(),
    );
    supervisor.validate().await.unwrap();
    supervisor.start().unwrap();
    let code = supervisor.supervise().await.unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn test_invalid_config_never_reaches_the_supervisor() {
    let work = tempfile::tempdir().unwrap();
    let bin = stub_proxy_binary(
        work.path(),
        "#!/bin/sh\necho 'nginx: [emerg] invalid number of arguments' >&2\nexit 1\n",
    );

    let params = bootstrap_params(&bin);
    let policy = LogPolicy::from_params(&params);
    let rendered = template::render_config(&params, &policy).unwrap();

    let mut supervisor = Supervisor::new(
        &params.nginx_bin,
        rendered.conf_path().to_path_buf(),
        rendered.runtime_dir().to_path_buf(),
    );

    let err = supervisor.validate().await.unwrap_err();
    assert!(err.to_string().contains("[emerg]"));
    assert_eq!(supervisor.state(), SupervisorState::Initializing);
    assert!(supervisor.start().is_err());
}

//! Two-service stack orchestration
//!
//! Brings up the backend and frontend containers in dependency order on an
//! isolated network, gating each start on the previous service's health.
//! Restarts are idempotent: a same-named prior instance is stopped and
//! removed before the new one is created. Note the unavoidable window
//! between that lookup and the create: two concurrent invocations against
//! the same container names can interleave; no host-level lock is taken.

use crate::docker::{ContainerSpec, DockerManager};
use crate::error::FlowgateError;
use crate::health::HealthPoller;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub const BACKEND_NAME: &str = "flowgate-backend";
pub const FRONTEND_NAME: &str = "flowgate-frontend";

/// Port the backend API listens on inside its container.
const BACKEND_CONTAINER_PORT: u16 = 7860;
/// Port the frontend proxy listens on inside its container.
const FRONTEND_CONTAINER_PORT: u16 = 8080;

/// Interval between health re-checks in monitor mode.
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug, Clone)]
#[command(
    name = "flowgate-stack",
    about = "Start the backend and frontend containers with health-gated ordering"
)]
pub struct StackOptions {
    /// Host port the backend API is published on
    #[arg(long, env = "FLOWGATE_STACK_BACKEND_PORT", default_value_t = 7860)]
    pub backend_port: u16,

    /// Host port the frontend is published on
    #[arg(long, env = "FLOWGATE_STACK_FRONTEND_PORT", default_value_t = 8080)]
    pub frontend_port: u16,

    /// Backend image reference
    #[arg(
        long,
        env = "FLOWGATE_STACK_BACKEND_IMAGE",
        default_value = "flowgate/backend:latest"
    )]
    pub backend_image: String,

    /// Frontend image reference
    #[arg(
        long,
        env = "FLOWGATE_STACK_FRONTEND_IMAGE",
        default_value = "flowgate/frontend:latest"
    )]
    pub frontend_image: String,

    /// Environment file passed to the backend container
    #[arg(long, env = "FLOWGATE_STACK_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Name of the isolated network the stack runs on
    #[arg(long, env = "FLOWGATE_STACK_NETWORK", default_value = "flowgate-net")]
    pub network: String,

    /// Health check timeout in seconds, per service
    #[arg(long, env = "FLOWGATE_STACK_TIMEOUT", default_value_t = 30)]
    pub timeout: u64,

    /// Stop and remove started containers when the orchestrator exits
    #[arg(long, env = "FLOWGATE_STACK_CLEANUP")]
    pub cleanup: bool,

    /// Keep running after startup, streaming logs and re-checking health
    #[arg(long, env = "FLOWGATE_STACK_MONITOR")]
    pub monitor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackState {
    NetworkReady,
    BackendStarting,
    BackendHealthy,
    FrontendStarting,
    FrontendHealthy,
    Ready,
    Aborted,
}

/// Build the backend container spec from the options.
pub fn backend_spec(options: &StackOptions) -> Result<ContainerSpec, FlowgateError> {
    let mut env = Vec::new();
    if let Some(path) = &options.env_file {
        env = parse_env_file(path)?;
    }

    Ok(ContainerSpec {
        name: BACKEND_NAME.to_string(),
        image: options.backend_image.clone(),
        published_port: options.backend_port,
        container_port: BACKEND_CONTAINER_PORT,
        env,
        network: options.network.clone(),
    })
}

/// Build the frontend container spec. The backend URL is wired over the
/// stack network using the backend container's DNS name.
pub fn frontend_spec(options: &StackOptions) -> ContainerSpec {
    ContainerSpec {
        name: FRONTEND_NAME.to_string(),
        image: options.frontend_image.clone(),
        published_port: options.frontend_port,
        container_port: FRONTEND_CONTAINER_PORT,
        env: vec![
            format!("FLOWGATE_BACKEND_URL=http://{BACKEND_NAME}:{BACKEND_CONTAINER_PORT}"),
            format!("FLOWGATE_PORT={FRONTEND_CONTAINER_PORT}"),
        ],
        network: options.network.clone(),
    }
}

/// Health endpoint published on the host for a service.
pub fn health_url(published_port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{published_port}{path}")
}

/// Parse a `KEY=VALUE` environment file. Blank lines and `#` comments are
/// skipped; a line without `=` is an error naming its line number.
pub fn parse_env_file(path: &Path) -> Result<Vec<String>, FlowgateError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        FlowgateError::lifecycle(format!("cannot read env file '{}': {e}", path.display()))
    })?;

    let mut env = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.contains('=') {
            return Err(FlowgateError::lifecycle(format!(
                "invalid line {} in env file '{}': expected KEY=VALUE",
                index + 1,
                path.display()
            )));
        }
        env.push(line.to_string());
    }
    Ok(env)
}

pub struct StackManager {
    docker: DockerManager,
    options: StackOptions,
    state: StackState,
    started: Vec<String>,
}

impl StackManager {
    pub fn new(docker: DockerManager, options: StackOptions) -> Self {
        Self {
            docker,
            options,
            state: StackState::NetworkReady,
            started: Vec::new(),
        }
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    fn set_state(&mut self, state: StackState) {
        info!(?state, "Stack state");
        self.state = state;
    }

    /// Run the ordered startup protocol: network, backend, backend health,
    /// frontend, frontend health. Aborts without starting the frontend if
    /// the backend never becomes healthy.
    pub async fn bring_up(&mut self) -> Result<(), FlowgateError> {
        self.docker
            .ensure_network(&self.options.network)
            .await
            .map_err(|e| FlowgateError::lifecycle(e.to_string()))?;
        self.set_state(StackState::NetworkReady);

        self.set_state(StackState::BackendStarting);
        let backend = backend_spec(&self.options)?;
        self.start_service(&backend).await?;
        self.await_healthy(BACKEND_NAME, self.options.backend_port, "/health")
            .await?;
        self.set_state(StackState::BackendHealthy);

        self.set_state(StackState::FrontendStarting);
        let frontend = frontend_spec(&self.options);
        self.start_service(&frontend).await?;
        self.await_healthy(FRONTEND_NAME, self.options.frontend_port, "/")
            .await?;
        self.set_state(StackState::FrontendHealthy);

        self.set_state(StackState::Ready);
        Ok(())
    }

    async fn start_service(&mut self, spec: &ContainerSpec) -> Result<(), FlowgateError> {
        self.docker
            .remove_existing(&spec.name)
            .await
            .map_err(|e| FlowgateError::lifecycle(e.to_string()))?;
        self.docker
            .pull_if_missing(&spec.image)
            .await
            .map_err(|e| FlowgateError::lifecycle(e.to_string()))?;
        self.docker
            .run_container(spec)
            .await
            .map_err(|e| FlowgateError::lifecycle(e.to_string()))?;
        self.started.push(spec.name.clone());
        Ok(())
    }

    async fn await_healthy(
        &mut self,
        name: &'static str,
        published_port: u16,
        path: &str,
    ) -> Result<(), FlowgateError> {
        let url = health_url(published_port, path);
        info!(service = name, %url, timeout_secs = self.options.timeout, "Waiting for service health");

        let docker = self.docker.clone();
        let poller = HealthPoller::new(url.clone(), Duration::from_secs(self.options.timeout))
            .with_liveness(move || {
                let docker = docker.clone();
                async move { docker.is_running(name).await }
            });

        let outcome = poller.wait_healthy().await;
        if outcome.is_healthy() {
            info!(service = name, "Service is healthy");
            return Ok(());
        }

        self.set_state(StackState::Aborted);
        error!(service = name, %outcome, "Service failed to become healthy");
        let logs = self.docker.tail_logs(name, 40).await;
        if logs.is_empty() {
            warn!(service = name, "No log output captured from failing service");
        } else {
            eprintln!("--- last log lines from {name} ---");
            eprint!("{logs}");
            eprintln!("----------------------------------");
        }

        Err(FlowgateError::Health {
            service: name.to_string(),
            outcome,
        })
    }

    /// Operator-facing endpoint report. With cleanup-on-exit the manual
    /// commands are omitted because the orchestrator removes the containers
    /// itself.
    pub fn print_report(&self) {
        println!();
        println!("Stack is ready:");
        println!("  frontend  http://127.0.0.1:{}", self.options.frontend_port);
        println!(
            "  backend   http://127.0.0.1:{}/health",
            self.options.backend_port
        );
        if !self.options.cleanup {
            println!();
            println!("Clean up with:");
            println!("  docker rm -f {BACKEND_NAME} {FRONTEND_NAME}");
            println!("  docker network rm {}", self.options.network);
        }
        println!();
    }

    /// Stop and remove every container this run started, most recent first.
    /// Runs on success, failure and interrupt when cleanup-on-exit is set.
    pub async fn cleanup(&mut self) {
        let started = std::mem::take(&mut self.started);
        for name in started.into_iter().rev() {
            self.docker
                .stop_and_remove(&name, Duration::from_secs(10))
                .await;
        }
    }

    /// Monitor mode: stream both containers' logs and re-check health
    /// periodically until interrupted.
    pub async fn monitor(&self) {
        let backend_logs = self
            .docker
            .stream_logs(BACKEND_NAME.to_string(), "backend");
        let frontend_logs = self
            .docker
            .stream_logs(FRONTEND_NAME.to_string(), "frontend");

        info!(
            interval_secs = MONITOR_INTERVAL.as_secs(),
            "Monitoring stack; press Ctrl+C to stop"
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, leaving monitor mode");
                    break;
                }
                _ = tokio::time::sleep(MONITOR_INTERVAL) => {
                    for (name, port, path) in [
                        (BACKEND_NAME, self.options.backend_port, "/health"),
                        (FRONTEND_NAME, self.options.frontend_port, "/"),
                    ] {
                        let poller = HealthPoller::new(
                            health_url(port, path),
                            Duration::from_secs(5),
                        );
                        if !poller.wait_healthy().await.is_healthy() {
                            warn!(service = name, "Service is unhealthy");
                        }
                    }
                }
            }
        }

        let _ = backend_logs.send(true);
        let _ = frontend_logs.send(true);
    }
}

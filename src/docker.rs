//! Docker plumbing for the stack orchestrator
//!
//! Thin, idempotent wrappers over the Docker API: network creation that
//! tolerates an existing network, container recreation that removes a
//! same-named prior instance, image pulls only when the image is absent,
//! and log retrieval for failure diagnosis and monitor mode.

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything needed to start one stack container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name; doubles as its DNS name on the stack network.
    pub name: String,
    pub image: String,
    /// Host port published on 127.0.0.1.
    pub published_port: u16,
    /// Port the service listens on inside the container.
    pub container_port: u16,
    pub env: Vec<String>,
    pub network: String,
}

#[derive(Clone)]
pub struct DockerManager {
    client: Docker,
}

impl DockerManager {
    /// Connect to the Docker daemon via DOCKER_HOST or the platform socket
    /// default, and verify it responds.
    pub async fn connect() -> anyhow::Result<Self> {
        let client = if let Ok(host) = std::env::var("DOCKER_HOST") {
            if let Some(socket) = host.strip_prefix("unix://") {
                Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
            } else {
                Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION)
            }
            .map_err(|e| {
                anyhow::anyhow!("cannot connect to Docker via DOCKER_HOST='{}': {}", host, e)
            })?
        } else {
            Docker::connect_with_socket_defaults()
                .map_err(|e| anyhow::anyhow!("cannot connect to Docker daemon: {}", e))?
        };

        client.ping().await.map_err(|e| {
            anyhow::anyhow!(
                "Docker daemon is not responding: {}. Ensure dockerd is running \
                 or set DOCKER_HOST.",
                e
            )
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { client })
    }

    /// Create the stack network if it does not exist yet. An
    /// already-present network with the same name is success.
    pub async fn ensure_network(&self, name: &str) -> anyhow::Result<()> {
        let options = CreateNetworkOptions {
            name,
            ..Default::default()
        };

        match self.client.create_network(options).await {
            Ok(_) => {
                info!(network = name, "Created network");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                debug!(network = name, "Network already exists");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("failed to create network '{}': {}", name, e)),
        }
    }

    /// Stop and remove a container by name if it exists. Gone-already and
    /// not-running responses are success, so restarts are idempotent.
    pub async fn remove_existing(&self, name: &str) -> anyhow::Result<()> {
        match self
            .client
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(_) => info!(container = name, "Stopped prior instance"),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {}
            Err(e) => warn!(container = name, error = %e, "Error stopping prior instance"),
        }

        match self
            .client
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => {
                debug!(container = name, "Removed prior instance");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(anyhow::anyhow!(
                "failed to remove container '{}': {}",
                name,
                e
            )),
        }
    }

    /// Pull an image only when it is not already present locally.
    pub async fn pull_if_missing(&self, image: &str) -> anyhow::Result<()> {
        if self.client.inspect_image(image).await.is_ok() {
            debug!(image, "Image present locally, skipping pull");
            return Ok(());
        }

        info!(image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(error) = progress.error {
                        anyhow::bail!("failed to pull image '{}': {}", image, error);
                    }
                }
                Err(e) => {
                    let msg = e.to_string();
                    if msg.contains("manifest unknown") || msg.contains("not found") {
                        anyhow::bail!(
                            "image '{}' not found in registry. Check the name and tag.",
                            image
                        );
                    }
                    anyhow::bail!("failed to pull image '{}': {}", image, e);
                }
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }

    /// Create and start a container from a spec. The published port is
    /// bound on 127.0.0.1 only.
    pub async fn run_container(&self, spec: &ContainerSpec) -> anyhow::Result<()> {
        let port_key = format!("{}/tcp", spec.container_port);

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(spec.published_port.to_string()),
            }]),
        );

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                network_mode: Some(spec.network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        self.client
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("Conflict") && msg.contains("name") {
                    anyhow::anyhow!(
                        "container name '{}' already exists. Try: docker rm -f {}",
                        spec.name,
                        spec.name
                    )
                } else {
                    anyhow::anyhow!(
                        "failed to create container '{}' from image '{}': {}",
                        spec.name,
                        spec.image,
                        e
                    )
                }
            })?;

        self.client
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("port is already allocated") || msg.contains("address already in use")
                {
                    anyhow::anyhow!(
                        "cannot start '{}': port {} is already in use on the host",
                        spec.name,
                        spec.published_port
                    )
                } else {
                    anyhow::anyhow!("failed to start container '{}': {}", spec.name, e)
                }
            })?;

        info!(
            container = %spec.name,
            image = %spec.image,
            port = spec.published_port,
            network = %spec.network,
            "Container started"
        );
        Ok(())
    }

    /// Whether the named container currently reports a running state.
    pub async fn is_running(&self, name: &str) -> bool {
        match self.client.inspect_container(name, None).await {
            Ok(info) => info.state.and_then(|s| s.running).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Fetch the last `lines` of a container's output for failure diagnosis.
    pub async fn tail_logs(&self, name: &str, lines: usize) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: lines.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(name, Some(options));
        let mut out = String::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok(output) => out.push_str(&String::from_utf8_lossy(&output.into_bytes())),
                Err(e) => {
                    warn!(container = name, error = %e, "Error reading container logs");
                    break;
                }
            }
        }
        out
    }

    /// Follow a container's output and forward it to tracing under the
    /// given label. Returns a sender that stops the stream when signalled.
    pub fn stream_logs(&self, name: String, label: &'static str) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let client = self.client.clone();

        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut stream = client.logs(&name, Some(options));

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    entry = stream.next() => {
                        match entry {
                            Some(Ok(LogOutput::StdErr { message })) => {
                                let line = String::from_utf8_lossy(&message);
                                let line = line.trim_end();
                                if !line.is_empty() {
                                    warn!(target: "container", service = label, "{}", line);
                                }
                            }
                            Some(Ok(output)) => {
                                let bytes = output.into_bytes();
                                let line = String::from_utf8_lossy(&bytes);
                                let line = line.trim_end();
                                if !line.is_empty() {
                                    info!(target: "container", service = label, "{}", line);
                                }
                            }
                            Some(Err(e)) => {
                                warn!(container = %name, error = %e, "Log stream error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Graceful stop + remove, used by cleanup paths.
    pub async fn stop_and_remove(&self, name: &str, grace: Duration) {
        match self
            .client
            .stop_container(name, Some(StopContainerOptions { t: grace.as_secs() as i64 }))
            .await
        {
            Ok(_)
            | Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {}
            Err(e) => warn!(container = name, error = %e, "Error stopping container"),
        }

        if let Err(e) = self
            .client
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            if !matches!(
                e,
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                }
            ) {
                warn!(container = name, error = %e, "Error removing container");
            }
        } else {
            info!(container = name, "Container removed");
        }
    }
}

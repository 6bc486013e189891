//! Foreground supervision of the proxy process
//!
//! The bootstrap binary is the container's init process; the proxy runs as
//! its child with signals forwarded. Container stop signals (SIGTERM,
//! SIGINT) are translated into the proxy's graceful-quit request so
//! in-flight requests finish before exit, with a SIGKILL escalation if the
//! grace period elapses. The supervisor's exit code mirrors the child's.

use crate::error::FlowgateError;
use crate::validate;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// How long a draining proxy may run after the graceful-quit request.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// Created, configuration not yet validated.
    Initializing,
    /// Rendered configuration passed the syntax check.
    Validated,
    /// Proxy process is serving traffic.
    Running,
    /// Termination signal received, graceful quit requested.
    Draining,
    /// Proxy process has exited.
    Terminated,
}

pub struct Supervisor {
    nginx_bin: String,
    conf_path: PathBuf,
    runtime_dir: PathBuf,
    state: SupervisorState,
    child: Option<Child>,
}

impl Supervisor {
    pub fn new(nginx_bin: &str, conf_path: PathBuf, runtime_dir: PathBuf) -> Self {
        Self {
            nginx_bin: nginx_bin.to_string(),
            conf_path,
            runtime_dir,
            state: SupervisorState::Initializing,
            child: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Syntax-check the rendered configuration. The proxy cannot be started
    /// until this has passed.
    pub async fn validate(&mut self) -> Result<(), FlowgateError> {
        validate::check(&self.nginx_bin, &self.conf_path, &self.runtime_dir).await?;
        self.state = SupervisorState::Validated;
        Ok(())
    }

    /// Launch the proxy in the foreground (`daemon off`).
    pub fn start(&mut self) -> Result<(), FlowgateError> {
        if self.state != SupervisorState::Validated {
            return Err(FlowgateError::lifecycle(
                "refusing to start proxy with unvalidated configuration",
            ));
        }

        let child = Command::new(&self.nginx_bin)
            .arg("-c")
            .arg(&self.conf_path)
            .arg("-p")
            .arg(&self.runtime_dir)
            .arg("-g")
            .arg("daemon off;")
            .spawn()
            .map_err(|e| {
                FlowgateError::lifecycle(format!("failed to spawn '{}': {e}", self.nginx_bin))
            })?;

        info!(
            pid = child.id().unwrap_or(0),
            bin = %self.nginx_bin,
            "Proxy process started"
        );
        self.child = Some(child);
        self.state = SupervisorState::Running;
        Ok(())
    }

    /// Wait for the proxy to exit, handling termination signals in between.
    /// Returns the child's exit code for the caller to mirror.
    pub async fn supervise(mut self) -> Result<i32, FlowgateError> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| FlowgateError::lifecycle("supervise called before start"))?;

        // First arm that completes wins; the arm bodies must not touch the
        // child while the other future still borrows it.
        let early_status = tokio::select! {
            status = child.wait() => Some(status),
            _ = wait_for_stop_signal() => None,
        };

        let status = match early_status {
            Some(status) => status.map_err(|e| {
                FlowgateError::lifecycle(format!("failed to wait for proxy: {e}"))
            })?,
            None => {
                self.state = SupervisorState::Draining;
                info!("Termination signal received, requesting graceful drain");
                request_graceful_quit(&child);

                match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                    Ok(status) => status.map_err(|e| {
                        FlowgateError::lifecycle(format!("failed to wait for proxy: {e}"))
                    })?,
                    Err(_) => {
                        warn!(
                            grace_secs = GRACEFUL_STOP_TIMEOUT.as_secs(),
                            "Grace period exceeded, killing proxy"
                        );
                        child.kill().await.map_err(|e| {
                            FlowgateError::lifecycle(format!("failed to kill proxy: {e}"))
                        })?;
                        child.wait().await.map_err(|e| {
                            FlowgateError::lifecycle(format!("failed to wait for proxy: {e}"))
                        })?
                    }
                }
            }
        };

        self.state = SupervisorState::Terminated;
        let code = exit_code(&status);
        info!(code, "Proxy process exited");
        Ok(code)
    }
}

/// Resolve a process exit status to the code the supervisor should mirror.
/// Signal deaths map to the conventional 128+signal.
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}

/// Block until SIGTERM or SIGINT arrives.
async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Ask the proxy to stop accepting connections and finish in-flight
/// requests (nginx's SIGQUIT contract).
fn request_graceful_quit(child: &Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGQUIT);
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

//! Syntax validation of the rendered configuration
//!
//! Invokes the proxy binary's own check mode (`nginx -t`) against the
//! rendered artifact. This is a hard gate: the supervisor is never started
//! when validation fails, and the validator's diagnostics are surfaced
//! verbatim.

use crate::error::FlowgateError;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

/// Run `<nginx_bin> -t` against the rendered configuration. The runtime
/// directory doubles as the nginx prefix so relative paths and the pid file
/// stay inside the process-local directory.
pub async fn check(
    nginx_bin: &str,
    conf_path: &Path,
    runtime_dir: &Path,
) -> Result<(), FlowgateError> {
    let output = Command::new(nginx_bin)
        .arg("-t")
        .arg("-c")
        .arg(conf_path)
        .arg("-p")
        .arg(runtime_dir)
        .output()
        .await
        .map_err(|e| {
            FlowgateError::Validation {
                diagnostics: format!("cannot execute '{nginx_bin}': {e}"),
            }
        })?;

    // nginx -t writes its verdict to stderr on both success and failure.
    let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.stdout.is_empty() {
        diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
    }

    if output.status.success() {
        info!(conf = %conf_path.display(), "Configuration syntax check passed");
        Ok(())
    } else {
        Err(FlowgateError::Validation { diagnostics })
    }
}

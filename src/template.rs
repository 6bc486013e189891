//! Template rendering for the proxy configuration
//!
//! Substitutes `${NAME}` placeholders from the resolved parameter set into
//! the configuration template. Rendering fails fast when the template is
//! missing or any placeholder has no resolved value; a partially rendered
//! artifact is never written. Output goes to a fresh, process-unique
//! directory so concurrent instances cannot race on a shared path.

use crate::config::ProxyParams;
use crate::error::FlowgateError;
use crate::logpolicy::LogPolicy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const CONF_FILE: &str = "nginx.conf";
const POLICY_FILE: &str = "log_policy.conf";

/// Substitute every `${NAME}` placeholder in `template` from `values`.
///
/// All unresolved placeholders are collected and reported together so the
/// operator sees the full list in one failure.
pub fn render_str(
    template: &str,
    values: &HashMap<String, String>,
) -> Result<String, FlowgateError> {
    let placeholder = Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid placeholder pattern");

    let mut missing: Vec<&str> = placeholder
        .captures_iter(template)
        .map(|c| c.get(1).expect("capture group").as_str())
        .filter(|name| !values.contains_key(*name))
        .collect();

    if !missing.is_empty() {
        missing.sort_unstable();
        missing.dedup();
        return Err(FlowgateError::template(format!(
            "unresolved placeholders: {}",
            missing.join(", ")
        )));
    }

    Ok(placeholder
        .replace_all(template, |caps: &regex::Captures| {
            values[&caps[1]].clone()
        })
        .into_owned())
}

/// The rendered configuration and its process-local home. Removing the value
/// removes the directory, so the artifact lives exactly as long as the
/// process that rendered it.
#[derive(Debug)]
pub struct RenderedConfig {
    dir: TempDir,
    conf_path: PathBuf,
}

impl RenderedConfig {
    /// Path of the rendered nginx configuration.
    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    /// Directory used as the nginx prefix (pid file, temp paths).
    pub fn runtime_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Contents of the rendered configuration, for debug dumps.
    pub fn read(&self) -> std::io::Result<String> {
        std::fs::read_to_string(&self.conf_path)
    }
}

/// Render the template into a fresh runtime directory, alongside the log
/// policy fragment it includes.
pub fn render_config(
    params: &ProxyParams,
    policy: &LogPolicy,
) -> Result<RenderedConfig, FlowgateError> {
    let template = std::fs::read_to_string(&params.template_path).map_err(|e| {
        FlowgateError::template(format!(
            "cannot read template '{}': {e}",
            params.template_path.display()
        ))
    })?;

    let dir = tempfile::Builder::new()
        .prefix("flowgate-")
        .tempdir()
        .map_err(|e| FlowgateError::template(format!("cannot create runtime directory: {e}")))?;

    let policy_path = dir.path().join(POLICY_FILE);
    std::fs::write(&policy_path, policy.render_fragment()).map_err(|e| {
        FlowgateError::template(format!(
            "cannot write log policy fragment '{}': {e}",
            policy_path.display()
        ))
    })?;

    let mut values = params.placeholder_map();
    values.insert(
        "RUNTIME_DIR".to_string(),
        dir.path().to_string_lossy().into_owned(),
    );
    values.insert(
        "LOG_POLICY_FILE".to_string(),
        policy_path.to_string_lossy().into_owned(),
    );

    let rendered = render_str(&template, &values)?;

    let conf_path = dir.path().join(CONF_FILE);
    std::fs::write(&conf_path, rendered).map_err(|e| {
        FlowgateError::template(format!(
            "cannot write rendered config '{}': {e}",
            conf_path.display()
        ))
    })?;

    debug!(conf = %conf_path.display(), "Rendered proxy configuration");

    Ok(RenderedConfig { dir, conf_path })
}

//! Parameter resolution for the proxy bootstrap
//!
//! Parameters arrive from named environment variables and positional
//! arguments and are resolved into an immutable [`ProxyParams`] value before
//! any artifact is written. Precedence per parameter: environment variable,
//! then positional argument, then built-in default. An empty string for an
//! optional parameter counts as unset and falls back to its default, so the
//! template never receives an empty substitution.

use crate::error::FlowgateError;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;

pub const ENV_BACKEND_URL: &str = "FLOWGATE_BACKEND_URL";
pub const ENV_LISTEN_PORT: &str = "FLOWGATE_PORT";
pub const ENV_MAX_BODY_SIZE: &str = "FLOWGATE_MAX_BODY_SIZE";
pub const ENV_GZIP_LEVEL: &str = "FLOWGATE_GZIP_LEVEL";
pub const ENV_CLIENT_TIMEOUT: &str = "FLOWGATE_CLIENT_TIMEOUT";
pub const ENV_WORKER_CONNECTIONS: &str = "FLOWGATE_WORKER_CONNECTIONS";
pub const ENV_ERROR_LOG_LEVEL: &str = "FLOWGATE_ERROR_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "FLOWGATE_LOG_FORMAT";
pub const ENV_SUPPRESS_PROBE_LOGS: &str = "FLOWGATE_SUPPRESS_PROBE_LOGS";
pub const ENV_DEBUG: &str = "FLOWGATE_DEBUG";
pub const ENV_TEMPLATE: &str = "FLOWGATE_TEMPLATE";
pub const ENV_NGINX_BIN: &str = "FLOWGATE_NGINX_BIN";

fn default_listen_port() -> u16 {
    8080
}

fn default_max_body_size() -> String {
    "10m".to_string()
}

fn default_gzip_level() -> u8 {
    5
}

fn default_client_timeout_secs() -> u64 {
    12
}

fn default_worker_connections() -> u32 {
    1024
}

fn default_error_log_level() -> String {
    "warn".to_string()
}

fn default_template_path() -> PathBuf {
    PathBuf::from("templates/default.conf.template")
}

fn default_nginx_bin() -> String {
    "nginx".to_string()
}

/// Levels accepted by nginx's error_log directive.
const ERROR_LOG_LEVELS: &[&str] = &[
    "debug", "info", "notice", "warn", "error", "crit", "alert", "emerg",
];

/// Unresolved inputs: a snapshot of the recognized environment variables plus
/// positional arguments. Kept separate from [`ProxyParams`] so resolution is
/// a pure function over explicit data.
#[derive(Debug, Clone, Default)]
pub struct RawParams {
    vars: HashMap<String, String>,
    args: Vec<String>,
}

impl RawParams {
    /// Snapshot the current process environment and arguments.
    pub fn from_env() -> Self {
        let recognized = [
            ENV_BACKEND_URL,
            ENV_LISTEN_PORT,
            ENV_MAX_BODY_SIZE,
            ENV_GZIP_LEVEL,
            ENV_CLIENT_TIMEOUT,
            ENV_WORKER_CONNECTIONS,
            ENV_ERROR_LOG_LEVEL,
            ENV_LOG_FORMAT,
            ENV_SUPPRESS_PROBE_LOGS,
            ENV_DEBUG,
            ENV_TEMPLATE,
            ENV_NGINX_BIN,
        ];

        let mut vars = HashMap::new();
        for key in recognized {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }

        Self {
            vars,
            args: std::env::args().skip(1).collect(),
        }
    }

    pub fn new(vars: HashMap<String, String>, args: Vec<String>) -> Self {
        Self { vars, args }
    }

    /// Look up an optional parameter. An empty value counts as unset.
    fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// First positional argument, if non-empty.
    fn positional(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Fully resolved parameter set. Immutable once built; passed explicitly to
/// the log policy builder, renderer and supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyParams {
    /// Upstream the proxy forwards to. Required.
    pub backend_url: String,
    /// Port the proxy binds.
    pub listen_port: u16,
    /// client_max_body_size value, e.g. "10m".
    pub max_body_size: String,
    /// gzip_comp_level, 1-9.
    pub gzip_level: u8,
    /// Header/body read timeouts in seconds.
    pub client_timeout_secs: u64,
    /// worker_connections cap.
    pub worker_connections: u32,
    /// error_log verbosity.
    pub error_log_level: String,
    /// Access log selector: "default", "json", or a custom format string.
    pub log_format: String,
    /// Exclude known health-probe requests from the access log.
    pub suppress_probe_logs: bool,
    /// Dump the rendered config and resolved parameters before starting.
    pub debug: bool,
    /// Template to render.
    pub template_path: PathBuf,
    /// Proxy binary used for validation and supervision.
    pub nginx_bin: String,
}

impl ProxyParams {
    /// Resolve raw inputs into a complete parameter set.
    ///
    /// The backend URL is mandatory (environment variable, falling back to
    /// the first positional argument) and must match
    /// `scheme://host[:port][/path]` with an http or https scheme. All other
    /// parameters fall back to their defaults when absent or empty.
    pub fn resolve(raw: &RawParams) -> Result<Self, FlowgateError> {
        let backend_url = raw
            .get(ENV_BACKEND_URL)
            .or_else(|| raw.positional(0))
            .ok_or_else(|| {
                FlowgateError::config(format!(
                    "backend URL is required: set {ENV_BACKEND_URL} or pass it as the first argument"
                ))
            })?
            .to_string();
        validate_backend_url(&backend_url)?;

        let listen_port = match raw.get(ENV_LISTEN_PORT) {
            Some(v) => v.parse::<u16>().map_err(|_| {
                FlowgateError::config(format!("invalid listen port '{v}': expected 1-65535"))
            })?,
            None => default_listen_port(),
        };

        let gzip_level = match raw.get(ENV_GZIP_LEVEL) {
            Some(v) => {
                let level = v.parse::<u8>().map_err(|_| {
                    FlowgateError::config(format!("invalid gzip level '{v}': expected 1-9"))
                })?;
                if !(1..=9).contains(&level) {
                    return Err(FlowgateError::config(format!(
                        "invalid gzip level '{v}': expected 1-9"
                    )));
                }
                level
            }
            None => default_gzip_level(),
        };

        let client_timeout_secs = match raw.get(ENV_CLIENT_TIMEOUT) {
            Some(v) => v.parse::<u64>().map_err(|_| {
                FlowgateError::config(format!("invalid client timeout '{v}': expected seconds"))
            })?,
            None => default_client_timeout_secs(),
        };

        let worker_connections = match raw.get(ENV_WORKER_CONNECTIONS) {
            Some(v) => v.parse::<u32>().map_err(|_| {
                FlowgateError::config(format!("invalid worker connection limit '{v}'"))
            })?,
            None => default_worker_connections(),
        };

        let error_log_level = match raw.get(ENV_ERROR_LOG_LEVEL) {
            Some(v) => {
                let level = v.to_ascii_lowercase();
                if !ERROR_LOG_LEVELS.contains(&level.as_str()) {
                    return Err(FlowgateError::config(format!(
                        "invalid error log level '{v}': expected one of {}",
                        ERROR_LOG_LEVELS.join(", ")
                    )));
                }
                level
            }
            None => default_error_log_level(),
        };

        let suppress_probe_logs = match raw.get(ENV_SUPPRESS_PROBE_LOGS) {
            Some(v) => parse_bool(v).ok_or_else(|| {
                FlowgateError::config(format!(
                    "invalid value '{v}' for {ENV_SUPPRESS_PROBE_LOGS}: expected a boolean"
                ))
            })?,
            None => true,
        };

        let debug = match raw.get(ENV_DEBUG) {
            Some(v) => parse_bool(v).ok_or_else(|| {
                FlowgateError::config(format!(
                    "invalid value '{v}' for {ENV_DEBUG}: expected a boolean"
                ))
            })?,
            None => false,
        };

        Ok(Self {
            backend_url,
            listen_port,
            max_body_size: raw
                .get(ENV_MAX_BODY_SIZE)
                .map(str::to_string)
                .unwrap_or_else(default_max_body_size),
            gzip_level,
            client_timeout_secs,
            worker_connections,
            error_log_level,
            log_format: raw
                .get(ENV_LOG_FORMAT)
                .map(str::to_string)
                .unwrap_or_else(|| "default".to_string()),
            suppress_probe_logs,
            debug,
            template_path: raw
                .get(ENV_TEMPLATE)
                .map(PathBuf::from)
                .unwrap_or_else(default_template_path),
            nginx_bin: raw
                .get(ENV_NGINX_BIN)
                .map(str::to_string)
                .unwrap_or_else(default_nginx_bin),
        })
    }

    /// The substitution map handed to the template renderer. Every template
    /// placeholder must resolve from here or from the renderer's derived
    /// entries (RUNTIME_DIR, LOG_POLICY_FILE).
    pub fn placeholder_map(&self) -> HashMap<String, String> {
        HashMap::from([
            ("BACKEND_URL".to_string(), self.backend_url.clone()),
            ("LISTEN_PORT".to_string(), self.listen_port.to_string()),
            ("MAX_BODY_SIZE".to_string(), self.max_body_size.clone()),
            ("GZIP_LEVEL".to_string(), self.gzip_level.to_string()),
            (
                "CLIENT_TIMEOUT".to_string(),
                self.client_timeout_secs.to_string(),
            ),
            (
                "WORKER_CONNECTIONS".to_string(),
                self.worker_connections.to_string(),
            ),
            (
                "ERROR_LOG_LEVEL".to_string(),
                self.error_log_level.clone(),
            ),
        ])
    }
}

/// Strict backend URL check: http/https scheme, alphanumeric/dot/hyphen
/// host, optional port, optional path or query.
fn validate_backend_url(url: &str) -> Result<(), FlowgateError> {
    let pattern = Regex::new(r"^https?://[A-Za-z0-9][A-Za-z0-9.-]*(:[0-9]{1,5})?(/\S*)?$")
        .expect("valid backend URL pattern");
    if pattern.is_match(url) {
        Ok(())
    } else {
        Err(FlowgateError::config(format!(
            "invalid backend URL '{url}': expected http://host[:port][/path] or https://host[:port][/path]"
        )))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(vars: &[(&str, &str)], args: &[&str]) -> RawParams {
        RawParams::new(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            args.iter().map(|a| a.to_string()).collect(),
        )
    }

    #[test]
    fn test_backend_url_required() {
        let err = ProxyParams::resolve(&raw(&[], &[])).unwrap_err();
        assert!(err.to_string().contains("backend URL is required"));
    }

    #[test]
    fn test_well_formed_backend_urls_accepted() {
        for url in [
            "http://backend:8000",
            "https://api.example.com:9000/v1",
            "http://10.0.0.5",
            "https://svc.internal/api/v1?mode=full",
        ] {
            let params =
                ProxyParams::resolve(&raw(&[(ENV_BACKEND_URL, url)], &[])).unwrap();
            assert_eq!(params.backend_url, url);
        }
    }

    #[test]
    fn test_malformed_backend_urls_rejected() {
        for url in [
            "not-a-url",
            "ftp://backend:8000",
            "http://",
            "backend:8000",
            "http://ho st",
        ] {
            let err = ProxyParams::resolve(&raw(&[(ENV_BACKEND_URL, url)], &[])).unwrap_err();
            assert!(
                err.to_string().contains(url),
                "error should name the offending value: {err}"
            );
        }
    }

    #[test]
    fn test_env_beats_positional() {
        let params = ProxyParams::resolve(&raw(
            &[(ENV_BACKEND_URL, "http://from-env:8000")],
            &["http://from-arg:9000"],
        ))
        .unwrap();
        assert_eq!(params.backend_url, "http://from-env:8000");
    }

    #[test]
    fn test_positional_fallback() {
        let params = ProxyParams::resolve(&raw(&[], &["http://from-arg:9000"])).unwrap();
        assert_eq!(params.backend_url, "http://from-arg:9000");
    }

    #[test]
    fn test_documented_defaults() {
        let params =
            ProxyParams::resolve(&raw(&[(ENV_BACKEND_URL, "http://backend:7860")], &[]))
                .unwrap();
        assert_eq!(params.listen_port, 8080);
        assert_eq!(params.max_body_size, "10m");
        assert_eq!(params.gzip_level, 5);
        assert_eq!(params.client_timeout_secs, 12);
        assert_eq!(params.worker_connections, 1024);
        assert_eq!(params.error_log_level, "warn");
        assert_eq!(params.log_format, "default");
        assert!(params.suppress_probe_logs);
        assert!(!params.debug);
    }

    #[test]
    fn test_empty_optional_treated_as_unset() {
        let params = ProxyParams::resolve(&raw(
            &[
                (ENV_BACKEND_URL, "http://backend:7860"),
                (ENV_LISTEN_PORT, ""),
                (ENV_MAX_BODY_SIZE, ""),
                (ENV_ERROR_LOG_LEVEL, ""),
            ],
            &[],
        ))
        .unwrap();
        assert_eq!(params.listen_port, 8080);
        assert_eq!(params.max_body_size, "10m");
        assert_eq!(params.error_log_level, "warn");
    }

    #[test]
    fn test_empty_required_is_missing() {
        let err = ProxyParams::resolve(&raw(&[(ENV_BACKEND_URL, "")], &[""])).unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_gzip_level_range() {
        for bad in ["0", "10", "abc"] {
            let err = ProxyParams::resolve(&raw(
                &[
                    (ENV_BACKEND_URL, "http://backend:7860"),
                    (ENV_GZIP_LEVEL, bad),
                ],
                &[],
            ))
            .unwrap_err();
            assert!(err.to_string().contains("gzip"));
        }

        let params = ProxyParams::resolve(&raw(
            &[
                (ENV_BACKEND_URL, "http://backend:7860"),
                (ENV_GZIP_LEVEL, "9"),
            ],
            &[],
        ))
        .unwrap();
        assert_eq!(params.gzip_level, 9);
    }

    #[test]
    fn test_error_log_level_enum() {
        let err = ProxyParams::resolve(&raw(
            &[
                (ENV_BACKEND_URL, "http://backend:7860"),
                (ENV_ERROR_LOG_LEVEL, "verbose"),
            ],
            &[],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("verbose"));
    }

    #[test]
    fn test_boolean_parsing() {
        for (value, expected) in [("1", true), ("TRUE", true), ("off", false), ("No", false)] {
            let params = ProxyParams::resolve(&raw(
                &[
                    (ENV_BACKEND_URL, "http://backend:7860"),
                    (ENV_SUPPRESS_PROBE_LOGS, value),
                ],
                &[],
            ))
            .unwrap();
            assert_eq!(params.suppress_probe_logs, expected, "value: {value}");
        }

        let err = ProxyParams::resolve(&raw(
            &[
                (ENV_BACKEND_URL, "http://backend:7860"),
                (ENV_DEBUG, "maybe"),
            ],
            &[],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_placeholder_map_covers_template_parameters() {
        let params = ProxyParams::resolve(&raw(
            &[(ENV_BACKEND_URL, "http://backend:7860")],
            &[],
        ))
        .unwrap();
        let map = params.placeholder_map();
        assert_eq!(map["BACKEND_URL"], "http://backend:7860");
        assert_eq!(map["LISTEN_PORT"], "8080");
        assert_eq!(map["MAX_BODY_SIZE"], "10m");
        assert_eq!(map["GZIP_LEVEL"], "5");
        assert_eq!(map["CLIENT_TIMEOUT"], "12");
        assert_eq!(map["WORKER_CONNECTIONS"], "1024");
        assert_eq!(map["ERROR_LOG_LEVEL"], "warn");
    }
}

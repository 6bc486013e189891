//! Access-log policy for the rendered proxy configuration
//!
//! Derives the log_format definition and the probe-suppression classifier
//! from the resolved parameters, and emits them as an http-context include
//! written next to the rendered configuration.

use crate::config::ProxyParams;
use serde::Serialize;

/// Name of the access-log format declared in the fragment.
pub const FORMAT_NAME: &str = "flowgate";

/// User agent sent by this crate's own health poller. Requests carrying it
/// are classified as non-loggable when probe suppression is on.
pub const PROBE_USER_AGENT: &str = "flowgate-healthcheck";

/// Structured access-log field set: each field maps to the nginx variable
/// whose value fills it at log time.
#[derive(Debug, Serialize)]
struct JsonFieldSet {
    time_local: &'static str,
    remote_addr: &'static str,
    remote_user: &'static str,
    request: &'static str,
    status: &'static str,
    body_bytes_sent: &'static str,
    http_referer: &'static str,
    http_user_agent: &'static str,
    request_time: &'static str,
    upstream_response_time: &'static str,
    upstream_addr: &'static str,
    upstream_status: &'static str,
    host: &'static str,
}

impl Default for JsonFieldSet {
    fn default() -> Self {
        Self {
            time_local: "$time_local",
            remote_addr: "$remote_addr",
            remote_user: "$remote_user",
            request: "$request",
            status: "$status",
            body_bytes_sent: "$body_bytes_sent",
            http_referer: "$http_referer",
            http_user_agent: "$http_user_agent",
            request_time: "$request_time",
            upstream_response_time: "$upstream_response_time",
            upstream_addr: "$upstream_addr",
            upstream_status: "$upstream_status",
            host: "$host",
        }
    }
}

/// The chosen access-log format.
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Built-in plaintext (combined-style) format.
    Plain,
    /// Built-in structured JSON format.
    Json,
    /// User-supplied format string, used verbatim.
    Custom(String),
}

/// Log policy computed once per process start.
#[derive(Debug, Clone, PartialEq)]
pub struct LogPolicy {
    pub format: LogFormat,
    pub suppress_probes: bool,
}

impl LogPolicy {
    /// Select the policy from resolved parameters. A selector of `json`
    /// picks the structured format, `default` the plaintext one; any other
    /// non-empty value is a custom format string.
    pub fn from_params(params: &ProxyParams) -> Self {
        let format = match params.log_format.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "default" => LogFormat::Plain,
            _ => LogFormat::Custom(params.log_format.clone()),
        };
        Self {
            format,
            suppress_probes: params.suppress_probe_logs,
        }
    }

    /// Render the nginx http-context fragment: the log_format definition,
    /// the probe classifier when suppression is on, and the access_log
    /// directive conditioned on it.
    pub fn render_fragment(&self) -> String {
        let mut out = String::new();

        match &self.format {
            LogFormat::Plain => {
                out.push_str(&format!(
                    "log_format {FORMAT_NAME} '$remote_addr - $remote_user [$time_local] \
                     \"$request\" $status $body_bytes_sent \
                     \"$http_referer\" \"$http_user_agent\"';\n"
                ));
            }
            LogFormat::Json => {
                let fields = serde_json::to_string(&JsonFieldSet::default())
                    .expect("static field set serializes");
                out.push_str(&format!(
                    "log_format {FORMAT_NAME} escape=json '{fields}';\n"
                ));
            }
            LogFormat::Custom(format) => {
                out.push_str(&format!("log_format {FORMAT_NAME} {format};\n"));
            }
        }

        if self.suppress_probes {
            out.push_str(&format!(
                "\nmap $http_user_agent $flowgate_loggable {{\n\
                 \x20   default 1;\n\
                 \x20   ~^kube-probe/ 0;\n\
                 \x20   ~^{PROBE_USER_AGENT} 0;\n\
                 }}\n\n\
                 access_log /dev/stdout {FORMAT_NAME} if=$flowgate_loggable;\n"
            ));
        } else {
            out.push_str(&format!("\naccess_log /dev/stdout {FORMAT_NAME};\n"));
        }

        out
    }
}

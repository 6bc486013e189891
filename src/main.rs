use flowgate::config::{ProxyParams, RawParams};
use flowgate::error::FlowgateError;
use flowgate::logpolicy::LogPolicy;
use flowgate::supervisor::Supervisor;
use flowgate::template;
use flowgate::{PKG_NAME, VERSION};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowgate=debug".parse().expect("valid log directive")),
        )
        .init();

    info!(name = PKG_NAME, version = VERSION, "Starting proxy bootstrap");

    match run().await {
        // The container's exit status follows the supervised proxy.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "Proxy bootstrap failed");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32, FlowgateError> {
    let params = ProxyParams::resolve(&RawParams::from_env())?;
    info!(
        backend = %params.backend_url,
        port = params.listen_port,
        template = %params.template_path.display(),
        "Resolved proxy parameters"
    );

    let policy = LogPolicy::from_params(&params);
    let rendered = template::render_config(&params, &policy)?;

    if params.debug {
        info!(?params, "Resolved parameter set");
        match rendered.read() {
            Ok(conf) => info!("Rendered configuration:\n{conf}"),
            Err(e) => error!(error = %e, "Cannot read back rendered configuration"),
        }
    }

    let mut supervisor = Supervisor::new(
        &params.nginx_bin,
        rendered.conf_path().to_path_buf(),
        rendered.runtime_dir().to_path_buf(),
    );
    supervisor.validate().await?;
    supervisor.start()?;
    let code = supervisor.supervise().await?;

    // The runtime directory outlives the proxy process and is removed here.
    drop(rendered);
    Ok(code)
}

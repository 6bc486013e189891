use clap::Parser;
use flowgate::docker::DockerManager;
use flowgate::error::FlowgateError;
use flowgate::lifecycle::{StackManager, StackOptions};
use flowgate::{PKG_NAME, VERSION};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowgate=info".parse().expect("valid log directive")),
        )
        .init();

    let options = StackOptions::parse();
    let cleanup_on_exit = options.cleanup;
    let monitor = options.monitor;

    info!(name = PKG_NAME, version = VERSION, "Starting stack orchestrator");

    let docker = match DockerManager::connect().await {
        Ok(docker) => docker,
        Err(e) => {
            error!(error = %e, "Cannot reach Docker daemon");
            std::process::exit(1);
        }
    };

    let mut stack = StackManager::new(docker, options);

    let result = tokio::select! {
        result = stack.bring_up() => result,
        _ = tokio::signal::ctrl_c() => {
            Err(FlowgateError::lifecycle("interrupted during startup"))
        }
    };

    let code = match result {
        Ok(()) => {
            stack.print_report();
            if monitor {
                stack.monitor().await;
            } else if cleanup_on_exit {
                info!("Press Ctrl+C to stop the stack and clean up");
                let _ = tokio::signal::ctrl_c().await;
            }
            0
        }
        Err(e) => {
            error!(error = %e, "Stack startup failed");
            1
        }
    };

    if cleanup_on_exit {
        info!("Cleaning up started containers");
        stack.cleanup().await;
    }

    std::process::exit(code);
}

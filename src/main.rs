use std::process::ExitCode;

use job_executor::config::ExecutorConfig;
use job_executor::runtime::ExecutorRuntime;
use job_executor::server::build_router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "job_executor=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ExecutorConfig::from_env();
    let addr = config.listen_addr;

    // Bean handlers are registered by embedding applications through the
    // library; the standalone binary serves glue scripts only.
    let runtime = match ExecutorRuntime::start(config, Vec::new(), None) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start executor");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            runtime.shutdown().await;
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("listening on {}", addr);

    let app = build_router(runtime.app_state());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    runtime.shutdown().await;

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use job_worker::config::WorkerConfig;
use job_worker::pipeline::EchoPipeline;
use job_worker::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;

    // Extra pipeline names bound to the echo handler, comma separated
    let extra_pipelines: Vec<String> = std::env::var("WORKER_PIPELINES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect();

    let run_once = std::env::var("WORKER_RUN_ONCE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.redacted_url(),
        "Job worker starting"
    );

    let worker = Worker::connect(config)
        .await
        .context("could not connect to the job store")?;

    let echo = Arc::new(EchoPipeline);
    worker.add_pipeline("echo", echo.clone()).await;
    for name in extra_pipelines {
        worker.add_pipeline(name, echo.clone()).await;
    }
    let names = worker.pipelines().names().await.join(", ");
    info!(worker_id = %worker.id(), pipelines = %names, "Pipelines registered");

    // Ctrl-C stops the loop; a second one kills the process
    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, stopping worker...");
            shutdown.stop();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    if run_once {
        let outcome = worker.run_once().await?;
        info!(?outcome, "Processed one job");
        return Ok(());
    }

    worker.start().await?;
    Ok(())
}

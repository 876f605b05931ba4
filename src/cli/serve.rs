use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::ServeArgs;
use crate::core::config::AppConfig;
use crate::core::jobs::JobStatusStore;
use crate::core::lifecycle::LifecycleManager;
use crate::core::service::ProcessingService;
use crate::core::terminal::{self, GuideSection};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging;

pub(super) async fn run_serve(mut config: AppConfig, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let log_tx = logging::init_tracing(&config.logging.level, false);
    let service = ProcessingService::from_config(&config).await?;

    let server = ApiServer::new(ApiServerConfig {
        service,
        jobs: JobStatusStore::in_memory(),
        log_tx,
        host: config.server.host.clone(),
        port: config.server.port,
        cors_origins: config.server.cors_origins.clone(),
    });

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(server)));
    lifecycle.start().await?;
    info!("Server lifecycle is {:?}", lifecycle.state());

    terminal::print_banner();
    GuideSection::new("API")
        .status(
            "Endpoint",
            &format!(
                "{}",
                style(format!(
                    "http://{}:{}/api",
                    config.server.host, config.server.port
                ))
                .underlined()
                .cyan()
            ),
        )
        .blank()
        .status(
            "Press Ctrl+C to stop the server.",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await
}

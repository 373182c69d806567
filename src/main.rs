//! prompt-guard service binary.
//!
//! Loads configuration, wires the orchestrator and serves the HTTP and
//! WebSocket API until Ctrl-C.
//!
//! ## Environment Variables
//!
//! - `PROMPT_GUARD_CONFIG`: path to the TOML config (defaults apply when unset)
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`: server-side keys
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter
//!
//! Run with `--print-schema` to print the config JSON Schema and exit.

use std::path::PathBuf;
use std::sync::Arc;

use prompt_guard_orchestrator::config::{self, loader, watcher::ConfigWatcher};
use prompt_guard_orchestrator::registry::{spawn_discovery, HttpModelCatalog};
use prompt_guard_orchestrator::{
    init_tracing_with, metrics, web_api, HttpProviderFactory, Orchestrator, OrchestratorError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), OrchestratorError> {
    if std::env::args().any(|a| a == "--print-schema") {
        let schema = config::export_schema()
            .map_err(|e| OrchestratorError::Other(format!("schema export failed: {e}")))?;
        println!("{schema}");
        return Ok(());
    }

    let config = loader::load_from_env()?;
    let _ = init_tracing_with(config.observability.log_format);
    metrics::init_metrics()?;

    info!(
        port = config.server.port,
        threshold = config.security.threshold,
        "starting prompt-guard"
    );

    let factory = Arc::new(HttpProviderFactory::from_env(config.generation.attempt_timeout()));
    let orch = Arc::new(
        Orchestrator::builder(factory)
            .with_config(&config)
            .build()?,
    );
    orch.apply_config(&config)?;

    let shutdown = CancellationToken::new();

    let sweeper = orch.admission().spawn_sweeper(config.demo.sweep_interval());

    let discovery = config.discovery.enabled.then(|| {
        spawn_discovery(
            Arc::clone(orch.registry()),
            Arc::new(HttpModelCatalog::from_env()),
            config.discovery.interval(),
            shutdown.child_token(),
        )
    });

    // Hot reload only when the config came from a file.
    let _watcher = match std::env::var(loader::CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            match ConfigWatcher::new(PathBuf::from(path.trim())) {
                Ok((watcher, mut rx)) => {
                    let orch = Arc::clone(&orch);
                    tokio::spawn(async move {
                        while let Ok(new_config) = rx.recv().await {
                            if let Err(e) = orch.apply_config(&new_config) {
                                warn!(error = %e, "config reload not applied");
                            }
                        }
                    });
                    Some(watcher)
                }
                Err(e) => {
                    warn!(error = %e, "config hot reload disabled");
                    None
                }
            }
        }
        _ => None,
    };

    let server = tokio::spawn(web_api::start_server(
        Arc::clone(&orch),
        config.server.clone(),
        config.observability.metrics_enabled,
        shutdown.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        result = server => match result {
            Ok(Ok(())) => info!("server stopped"),
            Ok(Err(e)) => error!(error = %e, "server failed"),
            Err(e) => error!(error = %e, "server task panicked"),
        },
    }

    shutdown.cancel();
    orch.admission().dispose();
    let _ = sweeper.await;
    if let Some(handle) = discovery {
        let _ = handle.await;
    }
    info!("prompt-guard stopped");
    Ok(())
}

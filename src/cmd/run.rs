//! `edgeward run`: start the edge node.
//!
//! Loads the configuration file, builds the [`Engine`], spawns one
//! health prober per probed backend plus the sweep janitor, then serves
//! until SIGTERM or Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::probe;
use crate::cli::RunArgs;
use crate::config::sources;
use crate::config::ConfigSource;
use crate::engine::Engine;
use crate::error::EdgewardError;
use crate::logging;
use crate::server::{self, AppState, LoadedConfig};

pub async fn execute(args: RunArgs) -> Result<(), EdgewardError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let source = resolve_file_source(args.config.as_deref()).await?;
    let (config, version) = source.load().await?;

    let client = server::build_http_client();
    let engine = Arc::new(Engine::new(&config, client.clone())?);

    let state = Arc::new(AppState {
        config: LoadedConfig {
            version,
            source_name: source.name().to_string(),
            loaded_at: Instant::now(),
        },
        engine: Arc::clone(&engine),
        start_time: Instant::now(),
    });

    // Flipping the watch to true stops the probers and the janitor.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut workers = probe::spawn_probers(&engine.registry, &engine.health, &client, &shutdown_rx);
    workers.push(server::spawn_janitor(
        Arc::clone(&engine),
        Duration::from_secs(args.sweep_interval.max(1)),
        shutdown_rx,
    ));

    let router = server::build_router(state, args.max_body);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        identity = %engine.policy.identity,
        backends = engine.registry.len(),
        "edgeward started"
    );

    let graceful_shutdown = async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    };

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful_shutdown)
    .await?;

    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "background task failed");
        }
    }

    tracing::info!("edgeward stopped");
    Ok(())
}

async fn resolve_file_source(
    explicit: Option<&std::path::Path>,
) -> Result<Box<dyn ConfigSource>, EdgewardError> {
    if let Some(path) = explicit {
        return sources::create_file_source(path);
    }

    let candidates = [
        "edgeward.yaml",
        "edgeward.yml",
        "edgeward.json",
        "edgeward.toml",
    ];

    for name in &candidates {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return sources::create_file_source(&path);
        }
    }

    Err(EdgewardError::NoConfigSource {
        hint: "Provide --config <file> or place edgeward.yaml in the working directory.\n  \
               Run 'edgeward init' to create a config file."
            .into(),
    })
}

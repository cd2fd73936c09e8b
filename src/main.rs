use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::TryStreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use preview_gateway::config::{self, Config};
use preview_gateway::models::token::encode_token;
use preview_gateway::models::{ResourceKind, TenantId};
use preview_gateway::store::content::ObjectContentStore;
use preview_gateway::store::postgres::PgStore;
use preview_gateway::store::Backend;
use preview_gateway::{api, jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Token { command }) => {
            let (state, db) = connect(cfg).await?;
            let result = handle_token_command(command, &state).await;
            db.close().await;
            result
        }
        Some(cli::Commands::Sweep) => {
            let (state, db) = connect(cfg).await?;
            let result = state.files.sweep_expired().await;
            db.close().await;
            let purged = result?;
            println!("Purged {} expired file access token(s).", purged);
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Spans go to an OTLP collector only when one is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "preview-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = std::env::var("PREVIEW_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let (plain_layer, json_layer) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "preview_gateway=debug,tower_http=debug".into()),
        ))
        .with(plain_layer)
        .with(json_layer)
        .with(telemetry_layer)
        .init();
    Ok(())
}

/// Builds the persistence handle and application state. The returned store
/// is kept so the pool can be closed on the way out.
async fn connect(cfg: Config) -> anyhow::Result<(Arc<AppState>, PgStore)> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url, cfg.database_max_connections)
        .await
        .context("failed to connect to database")?;

    let content = ObjectContentStore::from_url(&cfg.content_store_url)
        .context("failed to initialize content store")?;

    let backend = Backend::postgres(db.clone(), Arc::new(content));
    Ok((Arc::new(AppState::new(backend, cfg)), db))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let sweep_every = cfg.sweep_interval_secs;
    let (state, db) = connect(cfg).await?;

    tracing::info!("Running migrations...");
    db.migrate().await.context("failed to run migrations")?;

    let sweeper = if sweep_every > 0 {
        tracing::info!(interval_secs = sweep_every, "background file token sweep started");
        Some(jobs::sweep::spawn(state.clone(), Duration::from_secs(sweep_every)))
    } else {
        None
    };

    let app = api::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        mode = ?state.files.mode(),
        "preview gateway listening on {}",
        addr
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    db.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn handle_token_command(
    cmd: cli::TokenCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Create {
            kind,
            id,
            tenant,
            force,
        } => {
            let kind = parse_kind(&kind)?;
            let token = state
                .previews
                .issue(kind, id, TenantId(tenant), force)
                .await
                .with_context(|| format!("failed to create token for {} {}", kind, id))?;
            println!(
                "Preview token:\n  ID:       {}\n  Resource: {}\n  Token:    {}\n  Forced:   {}",
                token.id,
                token.resource,
                encode_token(token.token),
                token.forced
            );
        }
        cli::TokenCommands::List { kind, tenant } => {
            let kind = parse_kind(&kind)?;
            let tokens: Vec<_> = state
                .previews
                .for_tenant(kind, TenantId(tenant))
                .try_collect()
                .await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!("{:<10} {:<20} {:<34} {:<8}", "ID", "RESOURCE", "TOKEN", "FORCED");
                for t in tokens {
                    println!(
                        "{:<10} {:<20} {:<34} {:<8}",
                        t.id,
                        t.resource.to_string(),
                        encode_token(t.token),
                        t.forced
                    );
                }
            }
        }
        cli::TokenCommands::Delete { kind, id, tenant } => {
            let kind = parse_kind(&kind)?;
            state.previews.delete(kind, id, TenantId(tenant)).await?;
            println!("Token deleted.");
        }
    }
    Ok(())
}

fn parse_kind(raw: &str) -> anyhow::Result<ResourceKind> {
    raw.parse::<ResourceKind>()
        .with_context(|| format!("invalid token type '{}' (expected deployment or group)", raw))
}

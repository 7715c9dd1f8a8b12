/*
 * NamespaceLabel Operator - Operator Service
 * Copyright (C) 2025 NamespaceLabel team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Operator Service - Kubernetes controller for `NamespaceLabel` resources
//!
//! - Watches `NamespaceLabel` custom resources (and Namespaces)
//! - Keeps each namespace's labels in sync with the `NamespaceLabel`s inside it
//! - Serves health and readiness endpoints

use anyhow::Context as _;
use axum::{response::Json, routing::get, Router};
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use namespacelabel::config::{LogFormat, OperatorConfig};
use namespacelabel::controller::run_controller;
use namespacelabel::NamespaceLabel;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Parser)]
#[command(name = "namespacelabel-operator", version, about)]
struct Cli {
    /// Path to the operator configuration file
    #[arg(long, env = "NAMESPACELABEL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and health server (default)
    Run,
    /// Print the NamespaceLabel CustomResourceDefinition as YAML
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Crd => {
            print!("{}", serde_yaml::to_string(&NamespaceLabel::crd())?);
            Ok(())
        }
        Command::Run => run(&cli.config).await,
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path);
    init_tracing(&config);
    config.validate().context("Invalid operator configuration")?;

    info!(
        "Starting NamespaceLabel operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let config = Arc::new(config);

    // Start the controller in the background
    let controller_handle = {
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_controller(client, config).await {
                tracing::error!("Controller error: {}", e);
            }
        })
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        );

    let listener = tokio::net::TcpListener::bind(config.server.bind_address.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!("Health server listening on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("NamespaceLabel operator stopped");

    Ok(())
}

/// Tracing is not initialised yet when this runs, so problems go to stderr
fn load_config(path: &Path) -> OperatorConfig {
    if !path.exists() {
        eprintln!(
            "Config file {} not found, using defaults",
            path.display()
        );
        return OperatorConfig::default();
    }

    match OperatorConfig::from_mounted_file(path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err}. Using defaults.");
            OperatorConfig::default()
        }
    }
}

fn init_tracing(config: &OperatorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "namespacelabel-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "namespacelabel-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

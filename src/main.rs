mod compress;
mod config;
mod decoder;
mod detector;
mod error;
mod handlers;
mod models;
mod overlay;
mod summary;

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, API_KEY_ENV, MODEL_ID_ENV};
use detector::{Detector, HostedDetector};
use handlers::AppState;
use overlay::Overlay;

/// Proxy between the damage assessor UI and a hosted detection model.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "damage-backend.toml")]
    config: PathBuf,

    /// Address to bind, overrides `server.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on, overrides `server.port`
    #[arg(long)]
    port: Option<u16>,

    /// Log filter when RUST_LOG is unset, overrides `server.log_level`
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Largest accepted request body in bytes, overrides `server.max_body_bytes`
    #[arg(long, value_name = "BYTES")]
    max_body_bytes: Option<usize>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_found = args.config.exists();
    let mut config = if config_found {
        Config::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        Config::default()
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    if let Some(limit) = args.max_body_bytes {
        config.server.max_body_bytes = limit;
    }
    config.detector.fill_missing(
        std::env::var(MODEL_ID_ENV).ok(),
        std::env::var(API_KEY_ENV).ok(),
    );
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.server.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !config_found {
        warn!("{} not found, using defaults", args.config.display());
    }

    let detector: Option<Arc<dyn Detector>> = match HostedDetector::from_config(&config.detector) {
        Some(detector) => {
            info!(endpoint = %config.detector.endpoint, "hosted detector configured");
            Some(Arc::new(detector))
        }
        None => {
            warn!(
                "{} / {} missing, /analyze will answer with a configuration error",
                API_KEY_ENV, MODEL_ID_ENV
            );
            None
        }
    };

    let overlay = Overlay::from_config(&config.overlay)?;
    if !overlay.has_font() {
        info!("no overlay font configured, annotated images carry boxes only");
    }

    let state = web::Data::new(AppState {
        detector,
        policy: config.policy.clone(),
        compression: config.compression,
        overlay,
        max_body_bytes: config.server.max_body_bytes,
    });

    let addr = (config.server.bind.clone(), config.server.port);
    info!("Server running at http://{}:{}", addr.0, addr.1);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .configure(handlers::app_config(state.clone()))
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}

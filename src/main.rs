use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{dispatcher, error, info};

use scorta::{
    cache::{FilterInitError, FilterOptions, FilterState},
    config::{CliArgs, Settings, SettingsError},
    infra::{
        assets::{AssetService, FsConditionalGate, FsOracle, SettingsPolicy},
        error::InfraError,
        http, telemetry,
    },
};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Filter(#[from] FilterInitError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }
    eprintln!("scorta: {error}");
}

async fn run() -> Result<(), AppError> {
    let args = CliArgs::parse();
    let settings = Settings::load(&args)?;
    telemetry::init(&settings.logging)?;

    info!(
        provider = settings.cache.config.provider.as_str(),
        key_format = %settings.cache.key_format,
        assets_root = %settings.assets.root.display(),
        "starting scorta"
    );

    let policy = Arc::new(SettingsPolicy::new(&settings.assets));
    let oracle = Arc::new(FsOracle::new(settings.assets.root.clone()));
    let conditional = Arc::new(FsConditionalGate::new(settings.assets.expires_minutes));

    let filter = FilterState::new(
        FilterOptions {
            cache: settings.cache.config.clone(),
            key_format: settings.cache.key_format.clone(),
            body_limit_bytes: settings.cache.body_limit_bytes,
            flush_on_start: settings.cache.flush_on_start,
        },
        policy,
        oracle,
        conditional,
    )
    .await?;

    let assets = AssetService::new(&settings.assets);
    http::serve(&settings.server, filter, assets).await?;
    Ok(())
}

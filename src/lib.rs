pub mod api;
pub mod cli;
pub mod core;
pub mod engine;
pub mod providers;
pub mod store;

use crate::core::clock::SystemClock;
use crate::core::config::AppConfig;
use crate::core::price::Interval;
use crate::engine::Engine;
use crate::store::KeyValueStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Serve {
        listen: Option<String>,
    },
    Prices {
        ids: Vec<String>,
        currency: Option<String>,
    },
    History {
        id: String,
        currency: Option<String>,
        days: u32,
        interval: Interval,
        debug: bool,
    },
    Risk {
        ids: Vec<String>,
        values: Vec<f64>,
        currency: Option<String>,
        days: u32,
    },
}

/// Loads config, opens the store and builds the engine.
pub fn build_engine(config: &AppConfig) -> Result<Engine> {
    let data_path = config.default_data_path()?;
    let store = KeyValueStore::open(&data_path.join("store"));
    Engine::from_config(config, &store, Arc::new(SystemClock))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("pxfeed starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let engine = build_engine(&config)?;

    match command {
        AppCommand::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            api::serve(Arc::new(engine), &listen).await
        }
        AppCommand::Prices { ids, currency } => {
            cli::prices::run(&engine, &ids, currency.as_deref()).await
        }
        AppCommand::History {
            id,
            currency,
            days,
            interval,
            debug,
        } => cli::history::run(&engine, &id, currency.as_deref(), days, interval, debug).await,
        AppCommand::Risk {
            ids,
            values,
            currency,
            days,
        } => cli::risk::run(&engine, &ids, &values, currency.as_deref(), days).await,
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod cli;
mod connection_string;

use clap::{CommandFactory, Parser};
use std::env;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cli::{Args, ArgsError};
use eventhub_relay::Pipeline;

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = env::var("EVENTHUB_RELAY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    if let Err(e) = init_logging(&log_level) {
        eprintln!("eventhub-relay: could not set up logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    let config = match args.into_config(now) {
        Ok(config) => config,
        Err(ArgsError::MissingParameters) => {
            println!("{}", Args::command().render_help());
            println!("  {}", ArgsError::MissingParameters);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Invalid arguments: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Error creating pipeline on startup: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Relaying stdin to Event Hub");
    match pipeline.run(tokio::io::stdin()).await {
        Ok(summary) => {
            debug!("Pipeline finished: {summary:?}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Relay failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = format!("h2=off,hyper=off,hyper_util=off,reqwest=off,rustls=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter)?)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

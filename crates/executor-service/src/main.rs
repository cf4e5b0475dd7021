//! Main entry point for the executor service.
//!
//! Loads configuration, wires the pluggable storage, account and delivery
//! implementations into an execution engine, and runs it next to the HTTP
//! API that origins submit requests through.

use clap::Parser;
use executor_config::Config;
use executor_core::ExecutionEngine;
use executor_types::truncate_id;
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod factory_registry;
mod server;

/// Command-line arguments for the executor service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started executor");

	let config = Config::from_file(&args.config.to_string_lossy()).await?;
	tracing::info!("Loaded configuration [{}]", config.executor.id);

	let engine = factory_registry::build_executor_from_config(config.clone()).await?;
	let engine = Arc::new(engine);
	engine.initialize().await?;
	spawn_notification_log(&engine).await;

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			let engine_task = engine.run();
			let api_task = server::start_server(api_config, Arc::clone(&engine));

			tokio::select! {
				result = engine_task => {
					tracing::info!("Engine finished");
					result?;
				}
				result = api_task => {
					tracing::info!("API server finished");
					result?;
				}
			}
		},
		None => {
			tracing::info!("Starting engine only");
			engine.run().await?;
		},
	}

	engine.shutdown().await?;
	tracing::info!("Stopped executor");
	Ok(())
}

/// Drains user-facing notifications into the log. This binary has no other
/// display surface.
async fn spawn_notification_log(engine: &ExecutionEngine) {
	let Some(mut notifications) = engine.take_notifications().await else {
		return;
	};
	tokio::spawn(async move {
		while let Some(event) = notifications.recv().await {
			tracing::info!(
				target: "notifications",
				kind = ?event.kind,
				request_id = %truncate_id(&event.request_id),
				origin = %event.origin_name,
				tx_hash = ?event.tx_hash,
				detail = ?event.detail,
				"{}",
				event.title
			);
		}
	});
}

use anyhow::{Context, Result};
use semap::config::Config;
use semap::encoder::RemoteTextEncoder;
use semap::facade::QueryFacade;
use semap::server::MapServer;
use semap_core::TextEncoder;
use semap_store::open_store;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[derive(clap::Args, Debug)]
#[command(disable_version_flag = true)]
pub struct Subcommand {
	/// Path to a configuration file (YAML) to configure the server, database
	/// and text encoder. Command line arguments override file settings.
	#[arg(short = 'c', long, value_name = "FILE", display_order = 0)]
	pub config: Option<PathBuf>,

	/// Database URI: "memory:" or a directory path.
	#[arg(long, display_order = 0)]
	pub database: Option<String>,

	/// Serve via socket ip. Default: 0.0.0.0
	#[arg(short = 'i', long, display_order = 0)]
	pub ip: Option<String>,

	/// Serve via port. Default: 8080
	#[arg(short, long, display_order = 0)]
	pub port: Option<u16>,

	/// Shutdown the server automatically after x milliseconds.
	#[arg(long, display_order = 1)]
	pub auto_shutdown: Option<u64>,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	let config = match &arguments.config {
		Some(path) => Config::from_path(path)?,
		None => Config::default(),
	};

	let database = arguments
		.database
		.clone()
		.or_else(|| config.database.clone())
		.context("no database configured; pass --database or set 'database' in the config file")?;
	let store = open_store(&database)?;

	let encoder = config
		.encoder
		.url
		.as_ref()
		.map(|url| Arc::new(RemoteTextEncoder::new(url)) as Arc<dyn TextEncoder>);
	if encoder.is_none() {
		log::info!("no text encoder configured; /api/image-text will answer 505");
	}

	let facade = Arc::new(QueryFacade::new(store, encoder));
	let datasets = facade.list_collections().await.map_err(anyhow::Error::new)?;
	for dataset in &datasets {
		log::info!("serving dataset '{dataset}'");
	}

	let ip = arguments.ip.clone().or_else(|| config.server.ip.clone()).unwrap_or_else(|| "0.0.0.0".to_string());
	let port = arguments.port.or(config.server.port).unwrap_or(8080);
	let mut server = MapServer::new(ip, port, facade);
	server.start().await?;

	if let Some(milliseconds) = arguments.auto_shutdown {
		sleep(Duration::from_millis(milliseconds)).await;
		server.stop().await;
	} else {
		loop {
			sleep(Duration::from_secs(60)).await;
		}
	}

	Ok(())
}

//! Server configuration loader.
//!
//! ## YAML shape
//!
//! ```yaml
//! # Database URI: "memory:" or a directory path
//! database: /var/lib/semap/db
//!
//! # Optional HTTP server configuration
//! server:
//!   ip: 0.0.0.0
//!   port: 8080
//!
//! # Optional text-encoder service (enables /api/image-text)
//! encoder:
//!   url: http://localhost:9090/embed-text
//! ```
//!
//! All sections are optional; command-line arguments override file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
	/// Database URI; see `semap_store::open_store`.
	#[serde(default)]
	pub database: Option<String>,

	#[serde(default)]
	pub server: ServerConfig,

	#[serde(default)]
	pub encoder: EncoderConfig,
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
	/// IP address to bind to. Defaults to "0.0.0.0".
	pub ip: Option<String>,

	/// Port to listen on. Defaults to 8080.
	pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
	/// Endpoint of the text-encoder service.
	pub url: Option<String>,
}

impl Config {
	pub fn from_path(path: &Path) -> Result<Config> {
		let file = File::open(path).with_context(|| format!("opening config file {path:?}"))?;
		serde_yaml_ng::from_reader(BufReader::new(file)).with_context(|| format!("parsing config file {path:?}"))
	}

	pub fn from_string(yaml: &str) -> Result<Config> {
		serde_yaml_ng::from_str(yaml).context("parsing config")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn empty_config_is_all_defaults() {
		let config = Config::from_string("{}").unwrap();
		assert_eq!(config, Config::default());
	}

	#[test]
	fn full_config_parses() {
		let config = Config::from_string(
			"database: ./db\nserver:\n  ip: 127.0.0.1\n  port: 9000\nencoder:\n  url: http://enc:9090/embed\n",
		)
		.unwrap();
		assert_eq!(config.database.as_deref(), Some("./db"));
		assert_eq!(config.server.ip.as_deref(), Some("127.0.0.1"));
		assert_eq!(config.server.port, Some(9000));
		assert_eq!(config.encoder.url.as_deref(), Some("http://enc:9090/embed"));
	}

	#[test]
	fn unknown_fields_are_rejected() {
		assert!(Config::from_string("tiles: []").is_err());
	}
}

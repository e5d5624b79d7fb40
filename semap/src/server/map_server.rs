//! Server lifecycle: bind, serve, shut down gracefully.

use super::routes::build_router;
use crate::facade::QueryFacade;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Thin orchestration layer around the router.
///
/// Guarantees:
/// - **Idempotent start/stop:** starting twice stops the previous instance;
///   stopping twice is a no-op.
/// - **Graceful shutdown:** `stop` signals the serving task and waits for it.
pub struct MapServer {
	ip: String,
	port: u16,
	facade: Arc<QueryFacade>,
	exit_signal: Option<oneshot::Sender<()>>,
	join: Option<tokio::task::JoinHandle<()>>,
}

impl MapServer {
	pub fn new(ip: impl Into<String>, port: u16, facade: Arc<QueryFacade>) -> MapServer {
		MapServer {
			ip: ip.into(),
			port,
			facade,
			exit_signal: None,
			join: None,
		}
	}

	pub async fn start(&mut self) -> Result<()> {
		if self.exit_signal.is_some() {
			self.stop().await;
		}

		let app = build_router(Arc::clone(&self.facade));
		let address = format!("{}:{}", self.ip, self.port);
		let listener = TcpListener::bind(&address)
			.await
			.with_context(|| format!("binding {address}"))?;
		log::info!("listening on http://{address}/");

		let (exit_signal, exit_receiver) = oneshot::channel::<()>();
		let join = tokio::spawn(async move {
			let serving = axum::serve(listener, app).with_graceful_shutdown(async {
				exit_receiver.await.ok();
			});
			if let Err(err) = serving.await {
				log::error!("server stopped with an error: {err}");
			}
		});

		self.exit_signal = Some(exit_signal);
		self.join = Some(join);
		Ok(())
	}

	/// Signals shutdown and waits until the serving task has finished.
	pub async fn stop(&mut self) {
		if let Some(exit_signal) = self.exit_signal.take() {
			exit_signal.send(()).ok();
		}
		if let Some(join) = self.join.take() {
			join.await.ok();
		}
	}
}

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{info, warn};
use warden::state::read_snapshot;
use warden::{Engine, EngineConfig, Supervisor};

use crate::{http, shutdown};

pub async fn run(mut config: EngineConfig, bind: Option<String>) -> Result<()> {
	if let Some(bind) = bind {
		config.http.bind = bind;
	}
	let bind = config.http.bind.clone();
	let snapshot_path = config.state.snapshot_path.clone();

	if let Some(path) = &snapshot_path {
		if let Some(previous) = read_snapshot(path).await {
			info!(
				target = "warden.state",
				lifecycle = %previous.lifecycle,
				status = %previous.external_status,
				activity = %previous.current_activity,
				last_update = previous.last_update,
				"previous run left this state; starting from INITIAL"
			);
		}
	}

	let engine = Arc::new(Engine::builder(config).build().context("building engine")?);
	let persister = snapshot_path.map(|path| engine.state().spawn_persister(path));

	let listener = tokio::net::TcpListener::bind(&bind)
		.await
		.with_context(|| format!("binding control surface to {bind}"))?;
	info!(target = "warden.http", addr = %bind, "control surface listening");
	let (stop_http, http_stopped) = oneshot::channel::<()>();
	let app = http::router(Arc::clone(&engine));
	let server = tokio::spawn(async move {
		axum::serve(listener, app)
			.with_graceful_shutdown(async move {
				let _ = http_stopped.await;
			})
			.await
	});

	let starter = tokio::spawn({
		let engine = Arc::clone(&engine);
		async move { engine.start().await }
	});
	let supervisor = Supervisor::spawn(Arc::clone(&engine));

	shutdown::signal().await;
	info!(target = "warden", "shutting down");

	if !starter.is_finished() {
		starter.abort();
	}
	supervisor.stop().await;
	let _ = stop_http.send(());
	match server.await {
		Ok(Ok(())) => {}
		Ok(Err(err)) => warn!(target = "warden.http", error = %err, "control surface stopped with error"),
		Err(err) => warn!(target = "warden.http", error = %err, "control surface task failed"),
	}
	engine.shutdown().await;
	if let Some(persister) = persister {
		persister.abort();
	}
	info!(target = "warden", "stopped");
	Ok(())
}

//! JSON-RPC connection over a DevTools websocket.
//!
//! Request/response correlation follows the usual pattern:
//!
//! 1. `send()` allocates a sequential id and parks a oneshot sender under it
//! 2. the request is written to the websocket sink
//! 3. the reader task parses every inbound frame; frames with an `id` complete
//!    the matching oneshot, frames without one are events and are dropped
//! 4. when the socket ends, every pending request fails with
//!    [`RuntimeError::TargetClosed`] and the connection is marked closed

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Result, RuntimeError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

#[derive(Debug, Serialize)]
struct Request<'a> {
	id: u32,
	method: &'a str,
	params: Value,
}

#[derive(Debug, Deserialize)]
struct Inbound {
	id: Option<u32>,
	result: Option<Value>,
	error: Option<ProtocolError>,
	method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProtocolError {
	#[serde(default)]
	code: i64,
	message: String,
}

/// A correlated DevTools connection to one browser or page target.
pub struct CdpConnection {
	last_id: AtomicU32,
	pending: Pending,
	sink: tokio::sync::Mutex<SplitSink<Socket, Message>>,
	closed: Arc<AtomicBool>,
	reader: JoinHandle<()>,
	endpoint: String,
}

impl CdpConnection {
	pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
		let (socket, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(endpoint))
			.await
			.map_err(|_| RuntimeError::Timeout {
				ms: timeout.as_millis() as u64,
				condition: format!("websocket connect to {endpoint}"),
			})??;
		debug!(target = "warden.cdp", %endpoint, "websocket connected");

		let (sink, stream) = socket.split();
		let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
		let closed = Arc::new(AtomicBool::new(false));
		let reader = tokio::spawn(read_loop(stream, Arc::clone(&pending), Arc::clone(&closed), endpoint.to_string()));

		Ok(Self {
			last_id: AtomicU32::new(1),
			pending,
			sink: tokio::sync::Mutex::new(sink),
			closed,
			reader,
			endpoint: endpoint.to_string(),
		})
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Sends `method` and waits up to `timeout` for its response.
	pub async fn send(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
		if self.is_closed() {
			return Err(RuntimeError::TargetClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);

		let payload = serde_json::to_string(&Request { id, method, params })?;
		trace!(target = "warden.cdp", id, %method, "send");
		if let Err(err) = self.sink.lock().await.send(Message::Text(payload.into())).await {
			self.pending.lock().remove(&id);
			return Err(err.into());
		}

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(RuntimeError::TargetClosed),
			Err(_) => {
				self.pending.lock().remove(&id);
				Err(RuntimeError::Timeout {
					ms: timeout.as_millis() as u64,
					condition: method.to_string(),
				})
			}
		}
	}

	pub async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		if let Err(err) = self.sink.lock().await.close().await {
			debug!(target = "warden.cdp", endpoint = %self.endpoint, error = %err, "websocket close failed");
		}
		self.reader.abort();
		fail_pending(&self.pending);
	}
}

impl Drop for CdpConnection {
	fn drop(&mut self) {
		self.reader.abort();
	}
}

async fn read_loop(mut stream: SplitStream<Socket>, pending: Pending, closed: Arc<AtomicBool>, endpoint: String) {
	while let Some(frame) = stream.next().await {
		let text = match frame {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(err) => {
				warn!(target = "warden.cdp", %endpoint, error = %err, "websocket read failed");
				break;
			}
		};

		let inbound: Inbound = match serde_json::from_str(text.as_str()) {
			Ok(inbound) => inbound,
			Err(err) => {
				warn!(target = "warden.cdp", %endpoint, error = %err, "unparseable frame");
				continue;
			}
		};

		let Some(id) = inbound.id else {
			trace!(target = "warden.cdp", method = ?inbound.method, "event");
			continue;
		};

		let Some(tx) = pending.lock().remove(&id) else {
			debug!(target = "warden.cdp", id, "response for unknown request");
			continue;
		};

		let result = match inbound.error {
			Some(error) => Err(RuntimeError::Protocol {
				method: format!("request {id}"),
				message: format!("{} (code {})", error.message, error.code),
			}),
			None => Ok(inbound.result.unwrap_or(Value::Null)),
		};
		let _ = tx.send(result);
	}

	closed.store(true, Ordering::SeqCst);
	fail_pending(&pending);
	debug!(target = "warden.cdp", %endpoint, "websocket reader ended");
}

fn fail_pending(pending: &Pending) {
	for (_, tx) in pending.lock().drain() {
		let _ = tx.send(Err(RuntimeError::TargetClosed));
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tokio::net::TcpListener;

	use super::*;

	async fn echo_server(reply: Value) -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
			let (mut tx, mut rx) = ws.split();
			while let Some(Ok(Message::Text(text))) = rx.next().await {
				let request: Value = serde_json::from_str(text.as_str()).unwrap();
				tx.send(Message::Text(json!({"method": "Page.loadEventFired", "params": {}}).to_string().into()))
					.await
					.unwrap();
				let mut response = reply.clone();
				response["id"] = request["id"].clone();
				tx.send(Message::Text(response.to_string().into())).await.unwrap();
			}
		});
		format!("ws://{addr}")
	}

	#[tokio::test]
	async fn response_is_correlated_past_interleaved_events() {
		let url = echo_server(json!({"result": {"frameId": "F1"}})).await;
		let conn = CdpConnection::connect(&url, Duration::from_secs(2)).await.unwrap();
		let result = conn.send("Page.navigate", json!({"url": "about:blank"}), Duration::from_secs(2)).await.unwrap();
		assert_eq!(result["frameId"], "F1");
	}

	#[tokio::test]
	async fn protocol_error_is_surfaced() {
		let url = echo_server(json!({"error": {"code": -32000, "message": "Cannot navigate"}})).await;
		let conn = CdpConnection::connect(&url, Duration::from_secs(2)).await.unwrap();
		let err = conn.send("Page.navigate", json!({}), Duration::from_secs(2)).await.unwrap_err();
		assert!(err.to_string().contains("Cannot navigate"));
	}

	#[tokio::test]
	async fn send_after_close_reports_target_closed() {
		let url = echo_server(json!({"result": {}})).await;
		let conn = CdpConnection::connect(&url, Duration::from_secs(2)).await.unwrap();
		conn.close().await;
		assert!(conn.is_closed());
		let err = conn.send("Page.reload", json!({}), Duration::from_secs(1)).await.unwrap_err();
		assert!(matches!(err, RuntimeError::TargetClosed));
	}
}

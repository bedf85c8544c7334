//! JSON-RPC 2.0 connection over a framed byte stream.
//!
//! Responses are matched to pending requests by id. Notifications from the
//! server are forwarded on a channel. Requests from the server are answered
//! immediately with an empty result, which is all an orchestrating client
//! needs to keep a server from stalling.

use crate::codec::{read_message, write_message};
use crate::types::LspError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;

/// A notification sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

pub struct RpcConnection {
    writer: Writer,
    next_id: AtomicI64,
    pending: Pending,
    reader_handle: JoinHandle<()>,
    timeout: Duration,
}

impl RpcConnection {
    /// Start reading from `reader`. Server notifications arrive on the
    /// returned channel until the stream ends.
    pub fn new<R, W>(
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Writer = Arc::new(Mutex::new(Box::new(writer)));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (notifications, receiver) = mpsc::unbounded_channel();

        let reader_handle = tokio::spawn(reader_loop(
            BufReader::new(reader),
            Arc::clone(&writer),
            Arc::clone(&pending),
            notifications,
        ));

        let connection = Self {
            writer,
            next_id: AtomicI64::new(1),
            pending,
            reader_handle,
            timeout,
        };
        (connection, receiver)
    }

    /// Send a request and wait for its result.
    pub async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, LspError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_string(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!(method, id, "Sending request");
        if let Err(e) = write_message(&mut *self.writer.lock().await, &body).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(LspError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(LspError::RequestTimeout(self.timeout.as_millis() as u64));
            }
        };

        if let Some(error) = response.get("error") {
            return Err(LspError::JsonRpcError {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification (no response expected).
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), LspError> {
        let body = serde_json::to_string(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))?;

        trace!(method, "Sending notification");
        write_message(&mut *self.writer.lock().await, &body).await
    }

    /// Whether the server side of the stream is still open.
    pub fn is_open(&self) -> bool {
        !self.reader_handle.is_finished()
    }

    /// Stop reading. Pending requests fail with [`LspError::ConnectionClosed`].
    pub fn close(&self) {
        self.reader_handle.abort();
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

async fn reader_loop<R>(
    mut reader: BufReader<R>,
    writer: Writer,
    pending: Pending,
    notifications: mpsc::UnboundedSender<Notification>,
) where
    R: AsyncRead + Send + Unpin,
{
    loop {
        let content = match read_message(&mut reader).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                debug!("Server closed its output stream");
                break;
            }
            Err(LspError::Protocol(message)) => {
                warn!(error = %message, "Skipping malformed message");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Error reading from server");
                break;
            }
        };

        let message: Value = match serde_json::from_str(&content) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Invalid JSON from server");
                continue;
            }
        };

        match (message.get("method").and_then(Value::as_str), message.get("id")) {
            (Some(method), Some(id)) => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": default_reply(method, message.get("params")),
                });
                trace!(method, "Answering server request");
                if let Err(e) = write_message(&mut *writer.lock().await, &reply.to_string()).await {
                    warn!(method, error = %e, "Failed to answer server request");
                }
            }
            (Some(method), None) => {
                let notification = Notification {
                    method: method.to_string(),
                    params: message.get("params").cloned().unwrap_or(Value::Null),
                };
                if notifications.send(notification).is_err() {
                    trace!(method, "Notification dropped, no receiver");
                }
            }
            (None, Some(id)) => match id.as_i64() {
                Some(id) => match pending.lock().await.remove(&id) {
                    Some(sender) => {
                        let _ = sender.send(message);
                    }
                    None => debug!(id, "Received response for unknown request"),
                },
                None => debug!(?id, "Received response with non-numeric id"),
            },
            (None, None) => debug!("Ignoring message without method or id"),
        }
    }

    // Fail whatever is still waiting.
    pending.lock().await.clear();
}

/// Result sent back for a request initiated by the server.
fn default_reply(method: &str, params: Option<&Value>) -> Value {
    match method {
        // One entry per requested configuration item.
        "workspace/configuration" => {
            let items = params
                .and_then(|params| params.get("items"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Value::Array(vec![Value::Null; items])
        }
        _ => Value::Null,
    }
}

//! Inbound envelope server.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use homenode_app::node::Node;

/// Accept loop. One task per connection; connections may pipeline
/// several newline-terminated requests.
///
/// # Errors
///
/// Returns the accept error that ended the loop.
pub async fn serve(listener: TcpListener, node: Arc<Node>) -> std::io::Result<()> {
    info!(address = %listener.local_addr()?, "api listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &node).await {
                debug!(%peer, %err, "connection ended");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, node: &Arc<Node>) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = respond(node, &line).await;
        let mut payload = serde_json::to_vec(&response).unwrap_or_else(|_| b"null".to_vec());
        payload.push(b'\n');
        write.write_all(&payload).await?;
    }
    Ok(())
}

async fn respond(node: &Arc<Node>, line: &str) -> Value {
    let request = match serde_json::from_str::<Value>(line) {
        Ok(Value::Array(parts)) => parts,
        Ok(_) => return error_envelope("Request must be a JSON array"),
        Err(err) => return error_envelope(&format!("Invalid JSON: {err}")),
    };
    match node.dispatch(&request).await {
        Ok(value) => value,
        Err(message) => error_envelope(&message),
    }
}

fn error_envelope(message: &str) -> Value {
    serde_json::json!({ "ERROR": message })
}

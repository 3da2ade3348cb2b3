//! Outbound envelope client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use homenode_app::ports::ApiClient;
use homenode_domain::error::ApiError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`ApiClient`] over plain TCP. One connection per call; the whole
/// round trip (connect, write, read) shares a single deadline.
pub struct TcpApiClient {
    port: u16,
    timeout: Duration,
}

impl TcpApiClient {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Targets may carry an explicit port (`host:port`); bare hosts get
    /// the client's default.
    fn address(&self, target: &str) -> String {
        if target.contains(':') {
            target.to_string()
        } else {
            format!("{target}:{}", self.port)
        }
    }

    async fn round_trip(&self, address: &str, request: Vec<Value>) -> Result<Value, ApiError> {
        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|err| ApiError::Unreachable(err.to_string()))?;

        let mut payload = serde_json::to_vec(&Value::Array(request))
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
        payload.push(b'\n');
        stream
            .write_all(&payload)
            .await
            .map_err(|err| ApiError::Unreachable(err.to_string()))?;

        let mut line = String::new();
        let read = BufReader::new(stream)
            .read_line(&mut line)
            .await
            .map_err(|err| ApiError::Unreachable(err.to_string()))?;
        if read == 0 {
            return Err(ApiError::InvalidResponse(
                "connection closed before response".to_string(),
            ));
        }

        let value: Value = serde_json::from_str(line.trim())
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
        if let Some(message) = value.get("ERROR").and_then(Value::as_str) {
            return Err(ApiError::Remote(message.to_string()));
        }
        Ok(value)
    }
}

#[async_trait]
impl ApiClient for TcpApiClient {
    async fn call(&self, target: &str, request: Vec<Value>) -> Result<Value, ApiError> {
        let address = self.address(target);
        debug!(%address, "remote command");
        tokio::time::timeout(self.timeout, self.round_trip(&address, request))
            .await
            .map_err(|_| ApiError::Timeout)?
    }
}

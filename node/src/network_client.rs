use async_trait::async_trait;
use hailmary_lib::dht_messages::DhtMessage;
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{DhtError, Result};

/// Request/response transport between nodes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync + 'static {
    async fn call_node(&self, address: &str, message: DhtMessage) -> Result<DhtMessage>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One TCP connection per request: write the bincode request, close the write
/// half, read the response until EOF.
pub struct RealNetworkClient {
    io_timeout: Duration,
    max_retries: u32,
}

impl Default for RealNetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RealNetworkClient {
    pub fn new() -> Self {
        Self {
            io_timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    async fn call_node_with_retry(&self, address: &str, message: DhtMessage) -> Result<DhtMessage> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                debug!(
                    "Retrying call to {} (attempt {}/{})",
                    address,
                    attempt + 1,
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
                delay *= 2; // Exponential backoff
            }

            match self.call_node_once(address, message.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!("Call to {} failed: {}", address, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DhtError::Network(format!("no attempt made to {}", address))))
    }

    async fn call_node_once(&self, address: &str, message: DhtMessage) -> Result<DhtMessage> {
        let mut stream = match timeout(self.io_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(DhtError::Io(e)),
            Err(_) => return Err(DhtError::Network(format!("connect to {} timed out", address))),
        };

        let encoded = bincode::serialize(&message)?;
        match timeout(self.io_timeout, stream.write_all(&encoded)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(DhtError::Io(e)),
            Err(_) => return Err(DhtError::Network(format!("write to {} timed out", address))),
        }

        match timeout(Duration::from_secs(1), stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Shutdown error (non-critical): {}", e),
            Err(_) => debug!("Shutdown timed out (non-critical)"),
        }

        let mut buffer = Vec::new();
        match timeout(self.io_timeout, stream.read_to_end(&mut buffer)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(DhtError::Io(e)),
            Err(_) => return Err(DhtError::Network(format!("read from {} timed out", address))),
        }

        Ok(bincode::deserialize(&buffer)?)
    }
}

#[async_trait]
impl NetworkClient for RealNetworkClient {
    async fn call_node(&self, address: &str, message: DhtMessage) -> Result<DhtMessage> {
        self.call_node_with_retry(address, message).await
    }
}

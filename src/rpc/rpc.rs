use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use alloy::network::Ethereum;
use alloy::primitives::{Address, BlockNumber, Bytes, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{
    Block, BlockId, BlockNumberOrTag, TransactionReceipt, TransactionRequest,
};
use alloy::transports::TransportError;
use governor::clock::{QuantaClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request parameter: {0}")]
    InvalidInput(String),

    #[error("Node error: {0}")]
    Node(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Substrings of node errors that indicate a transient condition.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "reset",
    "broken pipe",
    "eof",
    "rate limit",
    "too many requests",
    "429",
    "502",
    "503",
    "504",
    "unavailable",
    "bad gateway",
    "try again",
];

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport(_) => true,
            RpcError::Node(msg) => {
                let msg = msg.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| msg.contains(m))
            }
            RpcError::InvalidUrl(_) | RpcError::InvalidInput(_) | RpcError::Decode(_) => false,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Transport(kind) => RpcError::Transport(kind.to_string()),
            other => RpcError::Node(other.to_string()),
        }
    }
}

/// Exponential backoff for retryable node calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 0 disables retries.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Wait before `attempt` (0 is the first try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Run `operation`, retrying retryable failures per `config`.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!("RPC '{}' succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "RPC '{}' failed ({}), retry {}/{} in {:?}",
                    operation_name,
                    e,
                    attempt,
                    config.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(
                        "RPC '{}' failed after {} attempts: {}",
                        operation_name,
                        attempt + 1,
                        e
                    );
                }
                return Err(e);
            }
        }
    }
}

type DirectRateLimiter =
    RateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: NonZeroU32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl RateLimitConfig {
    pub fn per_second(requests: u32) -> Self {
        Self {
            requests_per_second: NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN),
            jitter_min_ms: 5,
            jitter_max_ms: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub url: Url,
    pub rate_limit: Option<RateLimitConfig>,
    pub retry: RetryConfig,
}

impl RpcClientConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            rate_limit: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }
}

/// JSON-RPC client for the calls the indexer makes: chain head, blocks
/// with transaction hashes, and receipts.
pub struct RpcClient {
    provider: RootProvider<Ethereum>,
    retry: RetryConfig,
    limiter: Option<(DirectRateLimiter, Jitter)>,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcError> {
        let provider = RootProvider::<Ethereum>::new_http(config.url);
        let limiter = config.rate_limit.map(|rate| {
            (
                RateLimiter::direct(Quota::per_second(rate.requests_per_second)),
                Jitter::new(
                    Duration::from_millis(rate.jitter_min_ms),
                    Duration::from_millis(rate.jitter_max_ms),
                ),
            )
        });
        Ok(Self {
            provider,
            retry: config.retry,
            limiter,
        })
    }

    pub fn parse_url(url: &str) -> Result<Url, RpcError> {
        Url::parse(url).map_err(|e| RpcError::InvalidUrl(e.to_string()))
    }

    /// Rate-limited, retried node call.
    async fn call<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, RpcError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        with_retry(&self.retry, name, || async {
            if let Some((limiter, jitter)) = &self.limiter {
                limiter.until_ready_with_jitter(*jitter).await;
            }
            operation().await.map_err(RpcError::from)
        })
        .await
    }

    pub async fn get_block_number(&self) -> Result<BlockNumber, RpcError> {
        self.call("eth_blockNumber", || async {
            self.provider.get_block_number().await
        })
        .await
    }

    async fn get_block(&self, block_id: BlockId) -> Result<Option<Block>, RpcError> {
        let name = format!("eth_getBlock({:?})", block_id);
        self.call(&name, || async move { self.provider.get_block(block_id).await })
            .await
    }

    pub async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, RpcError> {
        self.get_block(BlockId::Number(BlockNumberOrTag::Number(number)))
            .await
    }

    pub async fn get_block_by_hash(&self, hash: B256) -> Result<Option<Block>, RpcError> {
        self.get_block(BlockId::hash(hash)).await
    }

    pub async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let name = format!("eth_getTransactionReceipt({:?})", hash);
        self.call(&name, || async move {
            self.provider.get_transaction_receipt(hash).await
        })
        .await
    }

    /// Read-only contract call against the latest block.
    pub async fn eth_call(&self, to: Address, input: Bytes) -> Result<Bytes, RpcError> {
        let request = TransactionRequest::default().to(to).input(input.into());
        self.call("eth_call", || {
            let request = request.clone();
            async move { self.provider.call(request).await }
        })
        .await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("retry", &self.retry)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

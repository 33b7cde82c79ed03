use alloy::eips::BlockId;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, TransactionRequest};
use alloy::transports::{TransportError, TransportResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use super::decoder;
use super::types::{CallOutcome, LedgerBlock, LedgerTransaction};
use crate::config::RpcConfig;
use crate::error::SnapshotError;

/// Read-only view of a chain node.
///
/// Every query against a finalized height is deterministic, so callers may retry freely.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, SnapshotError>;

    /// Fetch a block with its full transaction list.
    async fn get_block(&self, number: u64) -> Result<LedgerBlock, SnapshotError>;

    /// `eth_call` against `contract` as of block `at`, returning the raw return data.
    async fn call(&self, contract: Address, input: Bytes, at: u64) -> Result<Bytes, SnapshotError>;

    /// One round trip through the aggregator contract. Returns exactly one outcome per
    /// entry of `calls`, in the same order.
    async fn aggregate(
        &self,
        aggregator: Address,
        calls: &[(Address, Bytes)],
        at: u64,
    ) -> Result<Vec<CallOutcome>, SnapshotError>;
}

/// `LedgerClient` over an alloy HTTP provider.
pub struct RpcLedgerClient {
    provider: DynProvider,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl RpcLedgerClient {
    pub fn connect(config: &RpcConfig) -> Result<Self, SnapshotError> {
        let provider = ProviderBuilder::new()
            .connect_http(config.url.parse().map_err(|e| {
                SnapshotError::Configuration(format!("Invalid RPC URL: {}", e))
            })?)
            .erased();

        Ok(Self {
            provider,
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
        })
    }

    async fn request<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T, SnapshotError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = TransportResult<T>> + Send,
        T: Send,
    {
        let timeout = self.timeout;
        retry_remote(self.max_retries, self.retry_base_delay, || {
            let fut = f();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result.map_err(classify_transport_error),
                    Err(_) => Err(SnapshotError::RemoteUnavailable(format!(
                        "{} timed out after {}ms",
                        what,
                        timeout.as_millis()
                    ))),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn latest_block_number(&self) -> Result<u64, SnapshotError> {
        self.request("eth_blockNumber", || async {
            self.provider.get_block_number().await
        })
        .await
    }

    async fn get_block(&self, number: u64) -> Result<LedgerBlock, SnapshotError> {
        let block = self
            .request("eth_getBlockByNumber", || async {
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .full()
                    .await
            })
            .await?
            .ok_or(SnapshotError::NotFound(number))?;

        let transactions = block
            .transactions
            .txns()
            .map(|tx| LedgerTransaction {
                from: TransactionResponse::from(tx),
                to: alloy::consensus::Transaction::to(tx),
            })
            .collect();

        Ok(LedgerBlock {
            number: block.header.number,
            transactions,
        })
    }

    async fn call(&self, contract: Address, input: Bytes, at: u64) -> Result<Bytes, SnapshotError> {
        self.request("eth_call", || {
            let tx = TransactionRequest::default()
                .to(contract)
                .input(input.clone().into());
            async move { self.provider.call(tx).block(BlockId::number(at)).await }
        })
        .await
    }

    async fn aggregate(
        &self,
        aggregator: Address,
        calls: &[(Address, Bytes)],
        at: u64,
    ) -> Result<Vec<CallOutcome>, SnapshotError> {
        let data = self
            .call(aggregator, decoder::encode_aggregate3(calls), at)
            .await?;
        let outcomes = decoder::decode_aggregate3(&data)?;
        if outcomes.len() != calls.len() {
            return Err(SnapshotError::ExecutionReverted(format!(
                "aggregate3 returned {} results for {} calls",
                outcomes.len(),
                calls.len()
            )));
        }
        Ok(outcomes)
    }
}

/// JSON-RPC error responses are logical answers (reverts), except rate limiting.
/// Everything else is the transport.
fn classify_transport_error(err: TransportError) -> SnapshotError {
    match err.as_error_resp() {
        Some(payload) if is_rate_limited(payload.code, &payload.message) => {
            SnapshotError::RemoteUnavailable(payload.message.to_string())
        }
        Some(payload) => SnapshotError::ExecutionReverted(payload.message.to_string()),
        None => SnapshotError::RemoteUnavailable(err.to_string()),
    }
}

fn is_rate_limited(code: i64, message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    code == -32005
        || code == 429
        || message.contains("rate limit")
        || message.contains("too many requests")
}

/// Retry an async operation with exponential backoff.
/// Only transient errors are retried; logical errors are returned immediately.
pub async fn retry_remote<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    mut f: F,
) -> Result<T, SnapshotError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SnapshotError>>,
{
    let mut delay = base_delay;

    for attempt in 0..max_retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "RPC call failed, retrying..."
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
            Err(e) => return Err(e),
        }
    }

    f().await
}

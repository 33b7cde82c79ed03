use alloy::primitives::{Address, Bytes, U256};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SnapshotError;
use crate::indexer::client::LedgerClient;
use crate::indexer::decoder;

/// One holder's balance lookup; the error is always `BalanceUnavailable`.
pub type BalanceResult = (Address, Result<U256, SnapshotError>);

/// Fetches `balanceOf` for many holders at one height.
///
/// Each chunk of holders goes through one aggregate call. Holders whose sub-call failed,
/// or every holder of a chunk whose aggregate failed outright, are retried with individual
/// calls. A holder that still fails is reported on its own and never affects its siblings.
pub struct BalanceBatcher {
    client: Arc<dyn LedgerClient>,
    token: Address,
    aggregator: Address,
    chunk_size: usize,
    fallback_concurrency: usize,
}

impl BalanceBatcher {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        token: Address,
        aggregator: Address,
        chunk_size: usize,
        fallback_concurrency: usize,
    ) -> Self {
        Self {
            client,
            token,
            aggregator,
            chunk_size: chunk_size.max(1),
            fallback_concurrency: fallback_concurrency.max(1),
        }
    }

    /// Balances of `holders` at block `at`, in the same order as `holders`.
    pub async fn fetch_balances(&self, holders: &[Address], at: u64) -> Vec<BalanceResult> {
        let mut results = Vec::with_capacity(holders.len());
        for chunk in holders.chunks(self.chunk_size) {
            results.extend(self.fetch_chunk(chunk, at).await);
        }
        results
    }

    async fn fetch_chunk(&self, holders: &[Address], at: u64) -> Vec<BalanceResult> {
        let calls: Vec<(Address, Bytes)> = holders
            .iter()
            .map(|holder| (self.token, decoder::encode_balance_of(*holder)))
            .collect();

        let mut resolved: Vec<Option<U256>> =
            match self.client.aggregate(self.aggregator, &calls, at).await {
                Ok(outcomes) if outcomes.len() == holders.len() => outcomes
                    .iter()
                    .map(|outcome| {
                        if outcome.success {
                            decoder::decode_balance_of(&outcome.return_data).ok()
                        } else {
                            None
                        }
                    })
                    .collect(),
                Ok(outcomes) => {
                    tracing::warn!(
                        block = at,
                        expected = holders.len(),
                        got = outcomes.len(),
                        "Multicall result count mismatch, falling back to individual calls"
                    );
                    vec![None; holders.len()]
                }
                Err(e) => {
                    tracing::warn!(
                        block = at,
                        holders = holders.len(),
                        error = %e,
                        "Multicall failed, falling back to individual calls"
                    );
                    vec![None; holders.len()]
                }
            };

        let pending: Vec<usize> = resolved
            .iter()
            .enumerate()
            .filter(|(_, balance)| balance.is_none())
            .map(|(i, _)| i)
            .collect();

        let mut failures: HashMap<usize, SnapshotError> = HashMap::new();
        if !pending.is_empty() {
            tracing::debug!(block = at, retries = pending.len(), "Retrying holders individually");

            let retried: Vec<(usize, Result<U256, SnapshotError>)> = stream::iter(pending)
                .map(|i| async move { (i, self.fetch_single(holders[i], at).await) })
                .buffered(self.fallback_concurrency)
                .collect()
                .await;

            for (i, result) in retried {
                match result {
                    Ok(balance) => resolved[i] = Some(balance),
                    Err(e) => {
                        failures.insert(i, e);
                    }
                }
            }
        }

        holders
            .iter()
            .zip(resolved)
            .enumerate()
            .map(|(i, (holder, balance))| {
                let result = balance.ok_or_else(|| SnapshotError::BalanceUnavailable {
                    address: *holder,
                    block: at,
                    reason: failures
                        .remove(&i)
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unresolved".to_string()),
                });
                (*holder, result)
            })
            .collect()
    }

    /// A single `balanceOf` call, bypassing the aggregator.
    pub async fn fetch_single(&self, holder: Address, at: u64) -> Result<U256, SnapshotError> {
        let data = self
            .client
            .call(self.token, decoder::encode_balance_of(holder), at)
            .await?;
        decoder::decode_balance_of(&data)
    }
}

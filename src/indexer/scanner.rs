use alloy::primitives::Address;
use futures::{future, stream, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::client::LedgerClient;
use super::decoder;
use super::types::LedgerBlock;
use crate::error::SnapshotError;
use crate::participants::ParticipantSet;

/// Discovers every address that sent a transaction to `contract` within a block range.
pub struct ParticipantScanner {
    client: Arc<dyn LedgerClient>,
    contract: Address,
    window_size: u64,
    concurrency: usize,
    /// Caps in-flight block fetches across all windows.
    limiter: Arc<Semaphore>,
}

impl ParticipantScanner {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        contract: Address,
        window_size: u64,
        concurrency: usize,
    ) -> Self {
        let window_size = window_size.max(1);
        let concurrency = concurrency.max(1);
        Self {
            client,
            contract,
            window_size,
            concurrency,
            limiter: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Scan `[start_block, end_block]` inclusive.
    ///
    /// Any failed block fetch fails the whole scan: an incomplete set would silently drop
    /// holders from every later snapshot. After the first error no new window is started.
    pub async fn scan(
        &self,
        start_block: u64,
        end_block: u64,
        shutdown: &CancellationToken,
    ) -> Result<ParticipantSet, SnapshotError> {
        if start_block > end_block {
            return Err(SnapshotError::Configuration(format!(
                "scan range start {} is after end {}",
                start_block, end_block
            )));
        }

        let windows = split_windows(start_block, end_block, self.window_size);
        let total_windows = windows.len();
        let mut done = 0usize;

        tracing::info!(
            from = start_block,
            to = end_block,
            windows = total_windows,
            "Scanning for participants"
        );

        let participants = stream::iter(windows)
            .map(|(from, to)| self.scan_window(from, to, shutdown))
            .buffer_unordered(self.concurrency)
            .try_fold(BTreeSet::new(), |mut acc, (from, to, partial)| {
                done += 1;
                tracing::info!(
                    from,
                    to,
                    found = partial.len(),
                    progress = %format!("{}%", done * 100 / total_windows),
                    "Scanned window"
                );
                acc.extend(partial);
                future::ready(Ok(acc))
            })
            .await?;

        tracing::info!(participants = participants.len(), "Participant scan complete");
        Ok(ParticipantSet::from(participants))
    }

    async fn scan_window(
        &self,
        from: u64,
        to: u64,
        shutdown: &CancellationToken,
    ) -> Result<(u64, u64, BTreeSet<Address>), SnapshotError> {
        if shutdown.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        let partial = stream::iter(from..=to)
            .map(|number| self.fetch_block(number))
            .buffer_unordered(self.concurrency)
            .try_fold(BTreeSet::new(), |mut acc, block| {
                acc.extend(decoder::participants_in_block(&block, self.contract));
                future::ready(Ok(acc))
            })
            .await?;

        Ok((from, to, partial))
    }

    async fn fetch_block(&self, number: u64) -> Result<LedgerBlock, SnapshotError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| SnapshotError::Cancelled)?;

        self.client.get_block(number).await.map_err(|e| {
            tracing::error!(block = number, error = %e, "Block fetch failed, aborting scan");
            e
        })
    }
}

/// Split `[start, end]` into consecutive inclusive windows of at most `size` blocks.
pub fn split_windows(start: u64, end: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut windows = Vec::new();
    let mut current = start;
    loop {
        let window_end = current.saturating_add(size - 1).min(end);
        windows.push((current, window_end));
        if window_end >= end {
            break;
        }
        current = window_end + 1;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{addr, MockLedger, TOKEN};

    fn ledger() -> MockLedger {
        MockLedger::new(300)
            .with_tx(100, addr(1), Some(TOKEN))
            .with_tx(100, addr(2), None)
            .with_tx(101, addr(2), Some(addr(9)))
            .with_tx(120, addr(3), Some(TOKEN))
            .with_tx(150, addr(1), Some(TOKEN))
            .with_tx(199, addr(4), Some(TOKEN))
            .with_tx(200, addr(5), Some(TOKEN))
    }

    #[test]
    fn test_split_windows() {
        assert_eq!(split_windows(100, 100, 10), vec![(100, 100)]);
        assert_eq!(split_windows(100, 125, 10), vec![(100, 109), (110, 119), (120, 125)]);
        assert_eq!(split_windows(0, 9, 10), vec![(0, 9)]);
        assert_eq!(
            split_windows(u64::MAX - 1, u64::MAX, 10),
            vec![(u64::MAX - 1, u64::MAX)]
        );
    }

    #[tokio::test]
    async fn test_scan_collects_senders_to_contract() {
        let client = Arc::new(ledger());
        let scanner = ParticipantScanner::new(client, TOKEN, 10, 4);
        let set = scanner
            .scan(100, 199, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(set.as_slice(), &[addr(1), addr(3), addr(4)]);
    }

    #[tokio::test]
    async fn test_scan_independent_of_window_and_concurrency() {
        let client = Arc::new(ledger());
        let expected = ParticipantScanner::new(client.clone(), TOKEN, 1000, 1)
            .scan(90, 210, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(expected.as_slice(), &[addr(1), addr(3), addr(4), addr(5)]);

        for window in [1, 7, 50, 121] {
            for concurrency in [1, 3, 32] {
                let set = ParticipantScanner::new(client.clone(), TOKEN, window, concurrency)
                    .scan(90, 210, &CancellationToken::new())
                    .await
                    .unwrap();
                assert_eq!(set, expected, "window={} concurrency={}", window, concurrency);
            }
        }
    }

    #[tokio::test]
    async fn test_scan_respects_concurrency_limit() {
        let client = Arc::new(ledger());
        ParticipantScanner::new(client.clone(), TOKEN, 5, 3)
            .scan(100, 160, &CancellationToken::new())
            .await
            .unwrap();
        assert!(client.max_in_flight() <= 3);
        assert_eq!(client.block_fetches(), 61);
    }

    #[tokio::test]
    async fn test_failed_block_fails_scan() {
        let client = Arc::new(ledger().fail_block(150));
        let scanner = ParticipantScanner::new(client, TOKEN, 10, 4);
        let result = scanner.scan(100, 199, &CancellationToken::new()).await;
        assert!(matches!(result, Err(SnapshotError::RemoteUnavailable(_))));
    }

    #[tokio::test]
    async fn test_block_past_tip_fails_scan() {
        let client = Arc::new(MockLedger::new(105));
        let scanner = ParticipantScanner::new(client, TOKEN, 10, 4);
        let result = scanner.scan(100, 110, &CancellationToken::new()).await;
        assert!(matches!(result, Err(SnapshotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelled_scan_starts_no_windows() {
        let client = Arc::new(ledger());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = ParticipantScanner::new(client.clone(), TOKEN, 10, 4)
            .scan(100, 199, &shutdown)
            .await;
        assert!(matches!(result, Err(SnapshotError::Cancelled)));
        assert_eq!(client.block_fetches(), 0);
    }
}

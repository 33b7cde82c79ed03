//! Scripted in-memory ledger for unit tests.

use alloy::primitives::{address, Address, Bytes, U256};
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::SnapshotError;
use crate::indexer::client::LedgerClient;
use crate::indexer::decoder;
use crate::indexer::types::{CallOutcome, LedgerBlock, LedgerTransaction};

pub const TOKEN: Address = address!("ae7ab96520DE3A18E5e111B5EaAb095312D7fE84");

pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18))
}

#[derive(Default)]
pub struct MockLedger {
    tip: u64,
    blocks: HashMap<u64, LedgerBlock>,
    balances: HashMap<(u64, Address), U256>,
    failing_blocks: HashSet<u64>,
    reverting_holders: HashSet<Address>,
    aggregate_failing_holders: HashSet<Address>,
    aggregate_down: bool,
    block_fetches: AtomicUsize,
    aggregate_calls: AtomicUsize,
    individual_calls: Mutex<Vec<(u64, Address)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockLedger {
    pub fn new(tip: u64) -> Self {
        Self {
            tip,
            ..Default::default()
        }
    }

    pub fn with_tx(mut self, block: u64, from: Address, to: Option<Address>) -> Self {
        let entry = self.blocks.entry(block).or_insert_with(|| LedgerBlock {
            number: block,
            transactions: Vec::new(),
        });
        entry.transactions.push(LedgerTransaction { from, to });
        self
    }

    pub fn with_balance(mut self, block: u64, holder: Address, balance: U256) -> Self {
        self.balances.insert((block, holder), balance);
        self
    }

    /// Fetching this block fails with `RemoteUnavailable`.
    pub fn fail_block(mut self, block: u64) -> Self {
        self.failing_blocks.insert(block);
        self
    }

    /// `balanceOf(holder)` reverts everywhere, aggregated or not.
    pub fn revert_holder(mut self, holder: Address) -> Self {
        self.reverting_holders.insert(holder);
        self
    }

    /// `balanceOf(holder)` reports `success = false` inside aggregates only.
    pub fn fail_in_aggregate(mut self, holder: Address) -> Self {
        self.aggregate_failing_holders.insert(holder);
        self
    }

    /// Every aggregate call fails outright.
    pub fn aggregate_unavailable(mut self) -> Self {
        self.aggregate_down = true;
        self
    }

    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn individual_calls(&self) -> Vec<(u64, Address)> {
        self.individual_calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn balance_at(&self, block: u64, holder: Address) -> U256 {
        self.balances
            .get(&(block, holder))
            .copied()
            .unwrap_or(U256::ZERO)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn latest_block_number(&self) -> Result<u64, SnapshotError> {
        Ok(self.tip)
    }

    async fn get_block(&self, number: u64) -> Result<LedgerBlock, SnapshotError> {
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_blocks.contains(&number) {
            return Err(SnapshotError::RemoteUnavailable(format!(
                "connection reset fetching block {}",
                number
            )));
        }
        if number > self.tip {
            return Err(SnapshotError::NotFound(number));
        }
        Ok(self.blocks.get(&number).cloned().unwrap_or(LedgerBlock {
            number,
            transactions: Vec::new(),
        }))
    }

    async fn call(&self, _contract: Address, input: Bytes, at: u64) -> Result<Bytes, SnapshotError> {
        let holder = decoder::decode_balance_of_input(&input)?;
        self.individual_calls.lock().unwrap().push((at, holder));
        tokio::task::yield_now().await;

        if self.reverting_holders.contains(&holder) {
            return Err(SnapshotError::ExecutionReverted("execution reverted".into()));
        }
        Ok(Bytes::from(self.balance_at(at, holder).abi_encode()))
    }

    async fn aggregate(
        &self,
        _aggregator: Address,
        calls: &[(Address, Bytes)],
        at: u64,
    ) -> Result<Vec<CallOutcome>, SnapshotError> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.aggregate_down {
            return Err(SnapshotError::ExecutionReverted(
                "aggregator has no code at this height".into(),
            ));
        }

        calls
            .iter()
            .map(|(_, data)| {
                let holder = decoder::decode_balance_of_input(data)?;
                let failed = self.reverting_holders.contains(&holder)
                    || self.aggregate_failing_holders.contains(&holder);
                Ok(if failed {
                    CallOutcome {
                        success: false,
                        return_data: Bytes::new(),
                    }
                } else {
                    CallOutcome {
                        success: true,
                        return_data: Bytes::from(self.balance_at(at, holder).abi_encode()),
                    }
                })
            })
            .collect()
    }
}

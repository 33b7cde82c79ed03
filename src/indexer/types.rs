use alloy::primitives::{utils::format_ether, Address, Bytes, U256};
use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Minimal transaction info needed for participant discovery.
/// `to` is `None` for contract creations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub from: Address,
    pub to: Option<Address>,
}

/// A block with its transactions, in block order.
#[derive(Debug, Clone, Default)]
pub struct LedgerBlock {
    pub number: u64,
    pub transactions: Vec<LedgerTransaction>,
}

/// One sub-call result of an aggregate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
}

/// The balance of one holder at one block, ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub block_number: u64,
    pub address: Address,
    /// Raw balance in wei.
    pub balance: U256,
}

impl BalanceSnapshot {
    pub fn new(block_number: u64, address: Address, balance: U256) -> Self {
        Self {
            block_number,
            address,
            balance,
        }
    }

    /// Decimal rendering used in output rows, e.g. `5.0` or `0.000000000000000001`.
    pub fn display_value(&self) -> String {
        format_ether_trimmed(self.balance)
    }

    /// `balance / 10^18`, parsed from the same rendering the output rows use.
    pub fn value(&self) -> BigDecimal {
        wei_to_ether(self.balance)
    }
}

/// Exact conversion of a wei amount to an 18-decimal value.
pub fn wei_to_ether(wei: U256) -> BigDecimal {
    // format_ether always yields a plain decimal literal.
    BigDecimal::from_str(&format_ether_trimmed(wei)).unwrap_or_default()
}

/// Formats a wei amount with trailing fractional zeros removed, keeping one digit.
pub fn format_ether_trimmed(wei: U256) -> String {
    let full = format_ether(wei);
    match full.split_once('.') {
        Some((int, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                format!("{}.0", int)
            } else {
                format!("{}.{}", int, frac)
            }
        }
        None => format!("{}.0", full),
    }
}

/// A group of sampled block heights processed as one unit of concurrent work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub index: usize,
    /// Ascending.
    pub heights: Vec<u64>,
}

impl BatchJob {
    pub fn first(&self) -> Option<u64> {
        self.heights.first().copied()
    }

    pub fn last(&self) -> Option<u64> {
        self.heights.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ether(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18))
    }

    #[test]
    fn test_whole_ether_renders_with_one_decimal() {
        assert_eq!(format_ether_trimmed(ether(5)), "5.0");
        assert_eq!(format_ether_trimmed(U256::ZERO), "0.0");
    }

    #[test]
    fn test_single_wei_renders_exactly() {
        assert_eq!(format_ether_trimmed(U256::from(1)), "0.000000000000000001");
        assert_eq!(
            format_ether_trimmed(ether(3) + U256::from(250_000_000_000_000_000u64)),
            "3.25"
        );
    }

    #[test]
    fn test_value_is_exact() {
        let snapshot = BalanceSnapshot::new(100, Address::ZERO, ether(1_000_000) + U256::from(7));
        assert_eq!(
            snapshot.value(),
            BigDecimal::from_str("1000000.000000000000000007").unwrap()
        );

        let max = BalanceSnapshot::new(100, Address::ZERO, U256::MAX);
        assert_eq!(
            max.value() * BigDecimal::from_str("1e18").unwrap(),
            BigDecimal::from_str(&U256::MAX.to_string()).unwrap()
        );
    }

    #[test]
    fn test_value_is_integer_over_ten_pow_18() {
        let snapshot = BalanceSnapshot::new(1, Address::ZERO, ether(5));
        assert_eq!(snapshot.value(), BigDecimal::from(5));

        let one_wei = BalanceSnapshot::new(1, Address::ZERO, U256::from(1));
        assert_eq!(one_wei.value(), BigDecimal::new(1.into(), 18));
    }
}

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use super::types::{CallOutcome, LedgerBlock};
use crate::error::SnapshotError;

// ABI bindings for the two read-only calls the snapshot needs.
sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }

    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Call3Result[] memory returnData);
    }
}

pub fn encode_balance_of(owner: Address) -> Bytes {
    Bytes::from(IERC20::balanceOfCall { owner }.abi_encode())
}

pub fn decode_balance_of(data: &[u8]) -> Result<U256, SnapshotError> {
    IERC20::balanceOfCall::abi_decode_returns(data).map_err(|e| {
        SnapshotError::ExecutionReverted(format!("undecodable balanceOf return: {}", e))
    })
}

#[cfg(test)]
pub(crate) fn decode_balance_of_input(data: &[u8]) -> Result<Address, SnapshotError> {
    IERC20::balanceOfCall::abi_decode(data)
        .map(|call| call.owner)
        .map_err(|e| SnapshotError::ExecutionReverted(format!("not a balanceOf call: {}", e)))
}

/// Encode an `aggregate3` call where every sub-call may fail on its own.
pub fn encode_aggregate3(calls: &[(Address, Bytes)]) -> Bytes {
    let calls = calls
        .iter()
        .map(|(target, data)| IMulticall3::Call3 {
            target: *target,
            allowFailure: true,
            callData: data.clone(),
        })
        .collect();
    Bytes::from(IMulticall3::aggregate3Call { calls }.abi_encode())
}

pub fn decode_aggregate3(data: &[u8]) -> Result<Vec<CallOutcome>, SnapshotError> {
    let results = IMulticall3::aggregate3Call::abi_decode_returns(data).map_err(|e| {
        SnapshotError::ExecutionReverted(format!("undecodable aggregate3 return: {}", e))
    })?;
    Ok(results
        .into_iter()
        .map(|r| CallOutcome {
            success: r.success,
            return_data: r.returnData,
        })
        .collect())
}

/// Senders of every transaction in `block` sent to `contract`, in block order.
/// Address comparison is on the raw 20 bytes, so letter case never matters.
pub fn participants_in_block(block: &LedgerBlock, contract: Address) -> Vec<Address> {
    block
        .transactions
        .iter()
        .filter(|tx| tx.to == Some(contract))
        .map(|tx| tx.from)
        .collect()
}

use alloy::primitives::{Address, B256, U256};
use serde::Serialize;

pub const EVENT_NAME: &str = "TokensLocked";

/// One decoded `TokensLocked` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedTokensRecord {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub token: Address,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub destination_chain_id: u64,
}

/// JSON body posted to the relayer API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub transaction_hash: String,
    pub block_number: u64,
    pub event: &'static str,
    pub args: RelayArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayArgs {
    pub token: String,
    pub sender: String,
    pub recipient: String,
    /// Decimal string, never a JSON number.
    pub amount: String,
    pub destination_chain_id: u64,
}

impl LockedTokensRecord {
    pub fn tx_hash_hex(&self) -> String {
        format!("{:#x}", self.transaction_hash)
    }

    pub fn to_request(&self) -> RelayRequest {
        RelayRequest {
            transaction_hash: self.tx_hash_hex(),
            block_number: self.block_number,
            event: EVENT_NAME,
            args: RelayArgs {
                token: self.token.to_checksum(None),
                sender: self.sender.to_checksum(None),
                recipient: self.recipient.to_checksum(None),
                amount: self.amount.to_string(),
                destination_chain_id: self.destination_chain_id,
            },
        }
    }
}

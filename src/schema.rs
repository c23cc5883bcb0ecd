//! Typed description of the watched event.
//!
//! The schema is built once at startup and then shared read-only by the
//! connector (to build the log filter) and the decoder (to check the shape
//! of every raw log).

use alloy::primitives::{keccak256, B256};
use alloy::sol;
use serde::Deserialize;
use std::sync::Arc;

sol! {
    event TokensLocked(
        address indexed token,
        address indexed sender,
        address recipient,
        uint256 amount,
        uint256 destinationChainId
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventSchema {
    pub name: String,
    #[serde(default)]
    pub anonymous: bool,
    pub inputs: Vec<EventField>,
}

impl EventSchema {
    /// Schema of `TokensLocked`, the only event this relayer understands.
    pub fn tokens_locked() -> Arc<Self> {
        let field = |name: &str, kind: &str, indexed: bool| EventField {
            name: name.to_string(),
            kind: kind.to_string(),
            indexed,
        };
        Arc::new(Self {
            name: "TokensLocked".to_string(),
            anonymous: false,
            inputs: vec![
                field("token", "address", true),
                field("sender", "address", true),
                field("recipient", "address", false),
                field("amount", "uint256", false),
                field("destinationChainId", "uint256", false),
            ],
        })
    }

    /// Canonical signature, e.g. `TokensLocked(address,address,address,uint256,uint256)`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.inputs.iter().map(|f| f.kind.as_str()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// topic0 of every log emitted for this event.
    pub fn selector(&self) -> B256 {
        keccak256(self.signature().as_bytes())
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &EventField> {
        self.inputs.iter().filter(|f| f.indexed)
    }

    pub fn data_fields(&self) -> impl Iterator<Item = &EventField> {
        self.inputs.iter().filter(|f| !f.indexed)
    }

    /// Number of topics a matching log carries, selector included.
    pub fn expected_topics(&self) -> usize {
        let selector = usize::from(!self.anonymous);
        selector + self.indexed_fields().count()
    }

    /// Every field of the schema is a static 32-byte ABI word.
    pub fn expected_data_len(&self) -> usize {
        32 * self.data_fields().count()
    }
}

use crate::connector::RawLogEntry;
use crate::error::DecodeError;
use crate::record::LockedTokensRecord;
use crate::schema::{EventSchema, TokensLocked};
use alloy::primitives::Log as PrimitiveLog;
use alloy::sol_types::SolEvent;
use std::sync::Arc;

/// Decodes raw logs against an immutable event schema.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    schema: Arc<EventSchema>,
}

impl EventDecoder {
    pub fn new(schema: Arc<EventSchema>) -> Self {
        Self { schema }
    }

    pub fn decode(&self, raw: &RawLogEntry) -> Result<LockedTokensRecord, DecodeError> {
        decode(&self.schema, raw)
    }
}

/// Decodes one `TokensLocked` log.
///
/// The topic and data layout is checked against `schema` first so a log
/// of the wrong shape is reported precisely instead of failing inside the
/// ABI decoder. Malformed input is always an `Err`, never a panic.
pub fn decode(schema: &EventSchema, raw: &RawLogEntry) -> Result<LockedTokensRecord, DecodeError> {
    check_shape(schema, raw)?;

    let transaction_hash = raw
        .transaction_hash
        .ok_or(DecodeError::MissingMetadata("transaction hash"))?;
    let block_number = raw
        .block_number
        .ok_or(DecodeError::MissingMetadata("block number"))?;

    let log = PrimitiveLog::new(raw.address, raw.topics.clone(), raw.data.clone())
        .ok_or(DecodeError::TopicCount {
            expected: schema.expected_topics(),
            actual: raw.topics.len(),
        })?;
    let event = TokensLocked::decode_log(&log).map_err(|e| DecodeError::Abi(e.to_string()))?;

    let destination_chain_id =
        u64::try_from(event.destinationChainId).map_err(|e| DecodeError::Overflow {
            field: "destinationChainId",
            reason: e.to_string(),
        })?;

    Ok(LockedTokensRecord {
        transaction_hash,
        block_number,
        token: event.token,
        sender: event.sender,
        recipient: event.recipient,
        amount: event.amount,
        destination_chain_id,
    })
}

fn check_shape(schema: &EventSchema, raw: &RawLogEntry) -> Result<(), DecodeError> {
    let expected = schema.expected_topics();
    if raw.topics.len() != expected {
        return Err(DecodeError::TopicCount {
            expected,
            actual: raw.topics.len(),
        });
    }

    if !schema.anonymous {
        let selector = schema.selector();
        if raw.topics[0] != selector {
            return Err(DecodeError::SignatureMismatch {
                expected: format!("{selector:#x}"),
                actual: format!("{:#x}", raw.topics[0]),
            });
        }
    }

    let expected = schema.expected_data_len();
    if raw.data.len() != expected {
        return Err(DecodeError::DataLength {
            expected,
            actual: raw.data.len(),
        });
    }

    Ok(())
}

//! Connection to the source chain node and log retrieval.
//!
//! [`ChainConnector`] and [`LogSubscription`] are the seams the relay loop
//! is written against; [`RpcChainConnector`] is the alloy-backed
//! implementation used in production.

use crate::error::{ConnectionError, RelayError, ValidationError};
use crate::schema::EventSchema;
use alloy::network::Ethereum;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Where to listen: node, contract and the event layout to expect.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub node_url: String,
    pub contract_address: String,
    pub schema: Arc<EventSchema>,
}

/// A log entry as returned by the node, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
}

impl From<Log> for RawLogEntry {
    fn from(log: Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            transaction_hash: log.transaction_hash,
            block_number: log.block_number,
            log_index: log.log_index,
        }
    }
}

/// Read-only binding of an event schema to a deployed contract.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    pub address: Address,
    pub schema: Arc<EventSchema>,
}

impl ContractHandle {
    /// Filter matching the bound event on the bound contract.
    pub fn event_filter(&self) -> Filter {
        Filter::new()
            .address(self.address)
            .event_signature(self.schema.selector())
    }
}

/// Connection lifecycle towards a single chain node.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Opens a session and proves it with a round trip before returning.
    async fn connect(&mut self, endpoint: &ChainEndpoint) -> Result<(), ConnectionError>;

    /// Drops the current session, if any.
    fn disconnect(&mut self);

    /// Liveness probe. Never fails; an unreachable node reads as `false`.
    async fn is_connected(&self) -> bool;

    async fn get_contract(
        &self,
        address: &str,
        schema: Arc<EventSchema>,
    ) -> Result<ContractHandle, RelayError>;

    /// Starts watching for entries emitted after the current head block.
    async fn subscribe(
        &self,
        contract: &ContractHandle,
    ) -> Result<Box<dyn LogSubscription>, ConnectionError>;
}

/// A stream of new log entries, drained batch by batch.
#[async_trait]
pub trait LogSubscription: Send {
    /// Every entry seen since the previous call, ordered by block and log index.
    async fn next_batch(&mut self) -> Result<Vec<RawLogEntry>, ConnectionError>;
}

/// Checks that `address` is a 20-byte hex address. Mixed-case input must
/// carry a valid EIP-55 checksum.
pub fn validate_address(address: &str) -> Result<Address, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let trimmed = address.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let mixed_case =
        hex.chars().any(|c| c.is_ascii_lowercase()) && hex.chars().any(|c| c.is_ascii_uppercase());

    if mixed_case {
        Address::parse_checksummed(trimmed, None).map_err(|e| invalid(e.to_string()))
    } else {
        Address::from_str(trimmed).map_err(|e| invalid(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub connect_timeout: Duration,
    pub liveness_timeout: Duration,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(5),
        }
    }
}

/// alloy provider over WebSocket (`ws://`, `wss://`) or HTTP.
pub struct RpcChainConnector {
    settings: ConnectorSettings,
    provider: Option<Arc<dyn Provider<Ethereum>>>,
}

impl RpcChainConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            settings,
            provider: None,
        }
    }

    async fn open(&self, node_url: &str) -> Result<Arc<dyn Provider<Ethereum>>, ConnectionError> {
        let unreachable = |reason: String| ConnectionError::Unreachable {
            url: node_url.to_string(),
            reason,
        };

        let url = Url::parse(node_url).map_err(|e| unreachable(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {
                let connect = ProviderBuilder::new().connect_ws(WsConnect::new(node_url));
                let provider = timeout(self.settings.connect_timeout, connect)
                    .await
                    .map_err(|_| unreachable("timed out opening websocket".to_string()))?
                    .map_err(|e| unreachable(e.to_string()))?;
                Ok(Arc::new(provider))
            }
            "http" | "https" => Ok(Arc::new(ProviderBuilder::new().connect_http(url))),
            other => Err(unreachable(format!("unsupported scheme '{other}'"))),
        }
    }

    /// Keeps `provider` only once it answers `eth_chainId` in time.
    async fn attach(
        &mut self,
        node_url: &str,
        provider: Arc<dyn Provider<Ethereum>>,
    ) -> Result<(), ConnectionError> {
        let liveness = |reason: String| ConnectionError::Liveness {
            url: node_url.to_string(),
            reason,
        };

        let chain_id = timeout(self.settings.liveness_timeout, provider.get_chain_id())
            .await
            .map_err(|_| liveness("chain id query timed out".to_string()))?
            .map_err(|e| liveness(e.to_string()))?;

        tracing::info!(chain_id, "✅ Connected to chain node");
        self.provider = Some(provider);
        Ok(())
    }
}

#[async_trait]
impl ChainConnector for RpcChainConnector {
    async fn connect(&mut self, endpoint: &ChainEndpoint) -> Result<(), ConnectionError> {
        tracing::info!(node = %endpoint.node_url, "🔌 Connecting to chain node");
        self.provider = None;

        let provider = self.open(&endpoint.node_url).await?;
        self.attach(&endpoint.node_url, provider).await
    }

    fn disconnect(&mut self) {
        if self.provider.take().is_some() {
            tracing::debug!("Dropped chain node session");
        }
    }

    async fn is_connected(&self) -> bool {
        let Some(provider) = &self.provider else {
            return false;
        };
        matches!(
            timeout(self.settings.liveness_timeout, provider.get_block_number()).await,
            Ok(Ok(_))
        )
    }

    async fn get_contract(
        &self,
        address: &str,
        schema: Arc<EventSchema>,
    ) -> Result<ContractHandle, RelayError> {
        let address = validate_address(address)?;
        if !self.is_connected().await {
            tracing::error!("Cannot bind contract, not connected to the chain node");
            return Err(ConnectionError::NotConnected.into());
        }
        Ok(ContractHandle { address, schema })
    }

    async fn subscribe(
        &self,
        contract: &ContractHandle,
    ) -> Result<Box<dyn LogSubscription>, ConnectionError> {
        let provider = self.provider.clone().ok_or(ConnectionError::NotConnected)?;
        let head = provider
            .get_block_number()
            .await
            .map_err(|e| ConnectionError::Rpc(e.to_string()))?;

        tracing::debug!(from_block = head + 1, contract = %contract.address, "Created log filter");
        Ok(Box::new(PollingLogSubscription {
            provider,
            filter: contract.event_filter(),
            last_block: head,
        }))
    }
}

/// `eth_getLogs` over the block range produced since the previous poll.
struct PollingLogSubscription {
    provider: Arc<dyn Provider<Ethereum>>,
    filter: Filter,
    last_block: u64,
}

#[async_trait]
impl LogSubscription for PollingLogSubscription {
    async fn next_batch(&mut self) -> Result<Vec<RawLogEntry>, ConnectionError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| ConnectionError::Rpc(e.to_string()))?;

        if head <= self.last_block {
            return Ok(Vec::new());
        }

        let filter = self
            .filter
            .clone()
            .from_block(self.last_block + 1)
            .to_block(head);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ConnectionError::Rpc(e.to_string()))?;

        tracing::debug!(
            from = self.last_block + 1,
            to = head,
            count = logs.len(),
            "📊 Polled logs"
        );
        self.last_block = head;

        let mut entries: Vec<RawLogEntry> = logs.into_iter().map(RawLogEntry::from).collect();
        entries.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Log as PrimitiveLog, U64};
    use alloy::providers::mock::Asserter;

    fn mocked_provider(asserter: &Asserter) -> Arc<dyn Provider<Ethereum>> {
        Arc::new(ProviderBuilder::new().connect_mocked_client(asserter.clone()))
    }

    fn polling_from(asserter: &Asserter, last_block: u64) -> PollingLogSubscription {
        let contract = ContractHandle {
            address: Address::repeat_byte(0x33),
            schema: EventSchema::tokens_locked(),
        };
        PollingLogSubscription {
            provider: mocked_provider(asserter),
            filter: contract.event_filter(),
            last_block,
        }
    }

    fn rpc_log(block: u64, index: u64) -> Log {
        Log {
            inner: PrimitiveLog::new_unchecked(
                Address::repeat_byte(0x33),
                vec![EventSchema::tokens_locked().selector()],
                Bytes::new(),
            ),
            block_number: Some(block),
            log_index: Some(index),
            transaction_hash: Some(B256::repeat_byte(block as u8)),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_address_accepts_lowercase_and_checksummed() {
        assert!(validate_address("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").is_ok());
        assert!(validate_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").is_ok());
        assert!(validate_address("0xA0B86991C6218B36C1D19D4A2E9EB0CE3606EB48").is_ok());
    }

    #[test]
    fn test_validate_address_rejects_malformed() {
        for bad in [
            "",
            "0x1234",
            "not-an-address",
            "0xZZb86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            // checksum with one flipped letter
            "0xa0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        ] {
            let err = validate_address(bad).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidAddress { .. }), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_a_connection_error() {
        let mut connector = RpcChainConnector::new(ConnectorSettings::default());
        let endpoint = ChainEndpoint {
            node_url: "ftp://node.example".to_string(),
            contract_address: String::new(),
            schema: EventSchema::tokens_locked(),
        };
        let err = connector.connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Unreachable { .. }));
        assert!(!connector.is_connected().await);
    }

    #[tokio::test]
    async fn test_get_contract_validates_before_connection_check() {
        let connector = RpcChainConnector::new(ConnectorSettings::default());
        let err = connector
            .get_contract("0x1234", EventSchema::tokens_locked())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let err = connector
            .get_contract(
                "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                EventSchema::tokens_locked(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Connection(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_unmoved_head_skips_get_logs() {
        let asserter = Asserter::new();
        let mut subscription = polling_from(&asserter, 10);

        asserter.push_success(&U64::from(10));
        // Would be consumed by an eth_getLogs call.
        asserter.push_success(&vec![rpc_log(10, 0)]);

        let batch = subscription.next_batch().await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(subscription.last_block, 10);
        assert_eq!(asserter.read_q().len(), 1);
    }

    #[tokio::test]
    async fn test_new_blocks_are_fetched_and_cursor_advances() {
        let asserter = Asserter::new();
        let mut subscription = polling_from(&asserter, 10);

        asserter.push_success(&U64::from(12));
        asserter.push_success(&vec![rpc_log(11, 0), rpc_log(12, 0)]);

        let batch = subscription.next_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].block_number, Some(11));
        assert_eq!(batch[1].transaction_hash, Some(B256::repeat_byte(12)));
        assert_eq!(subscription.last_block, 12);
        assert!(asserter.read_q().is_empty());
    }

    #[tokio::test]
    async fn test_rpc_failure_keeps_cursor() {
        let asserter = Asserter::new();
        let mut subscription = polling_from(&asserter, 12);

        asserter.push_failure_msg("head unavailable");
        let err = subscription.next_batch().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Rpc(_)));
        assert_eq!(subscription.last_block, 12);

        asserter.push_success(&U64::from(15));
        asserter.push_failure_msg("range too large");
        assert!(subscription.next_batch().await.is_err());
        assert_eq!(subscription.last_block, 12);
    }

    #[tokio::test]
    async fn test_batch_is_ordered_by_block_then_log_index() {
        let asserter = Asserter::new();
        let mut subscription = polling_from(&asserter, 10);

        asserter.push_success(&U64::from(12));
        asserter.push_success(&vec![rpc_log(12, 1), rpc_log(11, 3), rpc_log(12, 0)]);

        let order: Vec<(Option<u64>, Option<u64>)> = subscription
            .next_batch()
            .await
            .unwrap()
            .iter()
            .map(|e| (e.block_number, e.log_index))
            .collect();
        assert_eq!(
            order,
            vec![(Some(11), Some(3)), (Some(12), Some(0)), (Some(12), Some(1))]
        );
    }

    #[tokio::test]
    async fn test_failed_chain_id_round_trip_is_a_liveness_error() {
        let asserter = Asserter::new();
        let mut connector = RpcChainConnector::new(ConnectorSettings::default());

        asserter.push_failure_msg("node is syncing");
        let err = connector
            .attach("ws://node.example", mocked_provider(&asserter))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Liveness { .. }));
        assert!(connector.provider.is_none());
    }

    #[tokio::test]
    async fn test_attached_provider_drives_liveness_and_subscribe() {
        let asserter = Asserter::new();
        let mut connector = RpcChainConnector::new(ConnectorSettings::default());

        asserter.push_success(&U64::from(1));
        connector
            .attach("ws://node.example", mocked_provider(&asserter))
            .await
            .unwrap();

        asserter.push_success(&U64::from(100));
        assert!(connector.is_connected().await);
        // No queued answer: the liveness probe fails instead of erroring.
        assert!(!connector.is_connected().await);

        asserter.push_success(&U64::from(100));
        let contract = ContractHandle {
            address: Address::repeat_byte(0x33),
            schema: EventSchema::tokens_locked(),
        };
        let mut subscription = connector.subscribe(&contract).await.unwrap();

        asserter.push_success(&U64::from(100));
        assert!(subscription.next_batch().await.unwrap().is_empty());

        connector.disconnect();
        assert!(!connector.is_connected().await);
    }
}

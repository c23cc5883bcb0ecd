#![allow(dead_code)] // each test binary uses a different subset

use alloy::primitives::{address, Address, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use bridge_relayer::connector::{validate_address, ContractHandle};
use bridge_relayer::error::{ConnectionError, RelayError};
use bridge_relayer::schema::{EventSchema, TokensLocked};
use bridge_relayer::{ChainConnector, ChainEndpoint, LogSubscription, RawLogEntry};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

pub const TOKEN: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
pub const SENDER: Address = address!("0x1111111111111111111111111111111111111111");
pub const RECIPIENT: Address = address!("0x2222222222222222222222222222222222222222");
pub const BRIDGE: &str = "0x3333333333333333333333333333333333333333";

// ---------------------------------------------------------------------------
// Mock relayer API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub at: Instant,
    pub content_type: Option<String>,
    pub body: Value,
}

struct MockRelayerState {
    /// Scripted responses; the last one repeats once the script runs out.
    responses: Mutex<VecDeque<(u16, String)>>,
    received: Mutex<Vec<ReceivedRequest>>,
}

pub struct MockRelayer {
    pub url: Url,
    state: Arc<MockRelayerState>,
}

impl MockRelayer {
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.received.lock().unwrap().len()
    }

    /// Waits until at least `count` requests arrived or `limit` elapsed.
    pub async fn wait_for_requests(&self, count: usize, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.request_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.request_count() >= count
    }
}

async fn relay_handler(
    State(state): State<Arc<MockRelayerState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    state.received.lock().unwrap().push(ReceivedRequest {
        at: Instant::now(),
        content_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });

    let mut responses = state.responses.lock().unwrap();
    let (status, body) = if responses.len() > 1 {
        responses.pop_front().unwrap()
    } else {
        responses.front().cloned().unwrap_or((200, "{}".to_string()))
    };
    (StatusCode::from_u16(status).unwrap(), body)
}

/// Serves `POST /relay` on an ephemeral local port.
pub async fn spawn_mock_relayer(responses: &[(u16, &str)]) -> MockRelayer {
    let state = Arc::new(MockRelayerState {
        responses: Mutex::new(
            responses
                .iter()
                .map(|(status, body)| (*status, body.to_string()))
                .collect(),
        ),
        received: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/relay", post(relay_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockRelayer {
        url: Url::parse(&format!("http://{addr}/relay")).unwrap(),
        state,
    }
}

// ---------------------------------------------------------------------------
// Mock chain
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockChain {
    connect_failures: AtomicU32,
    connected: AtomicBool,
    node_down: AtomicBool,
    connect_calls: Mutex<Vec<Instant>>,
    batches: Mutex<VecDeque<Vec<RawLogEntry>>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn push_batch(&self, batch: Vec<RawLogEntry>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    /// Makes liveness checks fail while `down` is set.
    pub fn set_node_down(&self, down: bool) {
        self.node_down.store(down, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> Vec<Instant> {
        self.connect_calls.lock().unwrap().clone()
    }
}

pub struct MockConnector {
    chain: Arc<MockChain>,
}

impl MockConnector {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect(&mut self, endpoint: &ChainEndpoint) -> Result<(), ConnectionError> {
        self.chain.connect_calls.lock().unwrap().push(Instant::now());

        let remaining = self.chain.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.chain.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectionError::Unreachable {
                url: endpoint.node_url.clone(),
                reason: "connection refused".to_string(),
            });
        }
        if self.chain.node_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Liveness {
                url: endpoint.node_url.clone(),
                reason: "node down".to_string(),
            });
        }

        self.chain.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.chain.connected.store(false, Ordering::SeqCst);
    }

    async fn is_connected(&self) -> bool {
        self.chain.connected.load(Ordering::SeqCst) && !self.chain.node_down.load(Ordering::SeqCst)
    }

    async fn get_contract(
        &self,
        address: &str,
        schema: Arc<EventSchema>,
    ) -> Result<ContractHandle, RelayError> {
        let address = validate_address(address)?;
        if !self.is_connected().await {
            return Err(ConnectionError::NotConnected.into());
        }
        Ok(ContractHandle { address, schema })
    }

    async fn subscribe(
        &self,
        _contract: &ContractHandle,
    ) -> Result<Box<dyn LogSubscription>, ConnectionError> {
        Ok(Box::new(MockSubscription {
            chain: self.chain.clone(),
        }))
    }
}

struct MockSubscription {
    chain: Arc<MockChain>,
}

#[async_trait]
impl LogSubscription for MockSubscription {
    async fn next_batch(&mut self) -> Result<Vec<RawLogEntry>, ConnectionError> {
        if self.chain.node_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Rpc("node down".to_string()));
        }
        Ok(self.chain.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn endpoint(contract_address: &str) -> ChainEndpoint {
    ChainEndpoint {
        node_url: "ws://mock-node:8546".to_string(),
        contract_address: contract_address.to_string(),
        schema: EventSchema::tokens_locked(),
    }
}

pub fn tokens_locked_log(amount: U256, destination_chain_id: u64, block: u64) -> RawLogEntry {
    let event = TokensLocked {
        token: TOKEN,
        sender: SENDER,
        recipient: RECIPIENT,
        amount,
        destinationChainId: U256::from(destination_chain_id),
    };
    let data = event.encode_log_data();
    RawLogEntry {
        address: BRIDGE.parse().unwrap(),
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        transaction_hash: Some(B256::repeat_byte(block as u8)),
        block_number: Some(block),
        log_index: Some(0),
    }
}

pub fn malformed_log(block: u64) -> RawLogEntry {
    let mut raw = tokens_locked_log(U256::from(1u8), 1, block);
    raw.topics.truncate(1);
    raw
}

//! Supervised relay loop.
//!
//! ```text
//! Idle -> Connecting -> Subscribing -> Polling
//!            ^                            |
//!            +------ Reconnecting <-------+   (connection or validation fault)
//! ```
//!
//! Decode failures skip a single entry and delivery failures drop a single
//! record; neither leaves `Polling`. Only cancellation ends the loop.

use crate::connector::{ChainConnector, ChainEndpoint, LogSubscription, RawLogEntry};
use crate::decoder::EventDecoder;
use crate::delivery::DeliveryClient;
use crate::error::{ConnectionError, RelayError};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Connecting,
    Subscribing,
    Polling,
    Reconnecting,
}

/// Health of the chain connection as seen from the relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Degraded,
}

impl RelayState {
    pub fn connection_state(self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Disconnected,
            Self::Connecting | Self::Subscribing => ConnectionState::Connecting,
            Self::Polling => ConnectionState::Subscribed,
            Self::Reconnecting => ConnectionState::Degraded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: RelayState,
    pub to: RelayState,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub reconnect_cooldown: Duration,
    /// Log decoded records instead of delivering them.
    pub dry_run: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            reconnect_cooldown: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

/// Per-process counters, reset on restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub relayed: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub reconnects: u64,
}

pub struct Relayer<C: ChainConnector> {
    connector: C,
    endpoint: ChainEndpoint,
    decoder: EventDecoder,
    delivery: DeliveryClient,
    settings: RelaySettings,
    state: RelayState,
    stats: RelayStats,
    observer: Option<mpsc::UnboundedSender<StateTransition>>,
}

impl<C: ChainConnector> Relayer<C> {
    pub fn new(
        connector: C,
        endpoint: ChainEndpoint,
        delivery: DeliveryClient,
        settings: RelaySettings,
    ) -> Self {
        let decoder = EventDecoder::new(endpoint.schema.clone());
        Self {
            connector,
            endpoint,
            decoder,
            delivery,
            settings,
            state: RelayState::Idle,
            stats: RelayStats::default(),
            observer: None,
        }
    }

    /// Reports every state change on `observer`.
    pub fn with_state_observer(mut self, observer: mpsc::UnboundedSender<StateTransition>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Runs until `cancel` fires, reconnecting after every connection fault.
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(
            node = %self.endpoint.node_url,
            contract = %self.endpoint.contract_address,
            relayer = %self.delivery.endpoint(),
            dry_run = self.settings.dry_run,
            "🚀 Starting bridge relayer"
        );
        self.transition(RelayState::Connecting);

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_session() => result,
            };
            let error = match result {
                Ok(never) => match never {},
                Err(error) => error,
            };

            self.connector.disconnect();
            self.stats.reconnects += 1;
            self.transition(RelayState::Reconnecting);
            tracing::error!(
                error = %error,
                cooldown = ?self.settings.reconnect_cooldown,
                "Relay loop failed, reconnecting after cooldown"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.reconnect_cooldown) => {}
            }
            self.transition(RelayState::Connecting);
        }

        self.connector.disconnect();
        self.transition(RelayState::Idle);
        tracing::info!(
            relayed = self.stats.relayed,
            dropped = self.stats.dropped,
            skipped = self.stats.skipped,
            reconnects = self.stats.reconnects,
            "🛑 Relay loop stopped"
        );
    }

    /// One connection lifetime. Only returns on a fault.
    async fn run_session(&mut self) -> Result<Infallible, RelayError> {
        self.connector.connect(&self.endpoint).await?;

        self.transition(RelayState::Subscribing);
        let contract = self
            .connector
            .get_contract(&self.endpoint.contract_address, self.endpoint.schema.clone())
            .await?;
        let subscription = self.connector.subscribe(&contract).await?;
        tracing::info!(
            contract = %contract.address,
            event = %contract.schema.name,
            "📡 Listening for events"
        );

        self.transition(RelayState::Polling);
        self.poll(subscription).await
    }

    async fn poll(
        &mut self,
        mut subscription: Box<dyn LogSubscription>,
    ) -> Result<Infallible, RelayError> {
        loop {
            if !self.connector.is_connected().await {
                return Err(ConnectionError::Liveness {
                    url: self.endpoint.node_url.clone(),
                    reason: "node stopped answering".to_string(),
                }
                .into());
            }

            for raw in subscription.next_batch().await? {
                self.handle_entry(raw).await;
            }

            sleep(self.settings.poll_interval).await;
        }
    }

    async fn handle_entry(&mut self, raw: RawLogEntry) {
        let record = match self.decoder.decode(&raw) {
            Ok(record) => record,
            Err(e) => {
                self.stats.skipped += 1;
                tracing::warn!(
                    tx_hash = ?raw.transaction_hash,
                    block = ?raw.block_number,
                    error = %e,
                    "Skipping log that does not match the event schema"
                );
                return;
            }
        };

        let tx_hash = record.tx_hash_hex();
        tracing::info!(
            tx_hash = %tx_hash,
            block = record.block_number,
            token = %record.token,
            amount = %record.amount,
            destination_chain_id = record.destination_chain_id,
            "📥 TokensLocked received"
        );

        if self.settings.dry_run {
            let body = serde_json::to_string(&record.to_request()).unwrap_or_default();
            tracing::info!(tx_hash = %tx_hash, body = %body, "DRY RUN: would relay event");
            return;
        }

        match self.delivery.send(&record).await {
            Ok(ack) => {
                self.stats.relayed += 1;
                tracing::debug!(
                    tx_hash = %tx_hash,
                    attempts = ack.attempts,
                    "Delivery acknowledged"
                );
            }
            Err(e) => {
                self.stats.dropped += 1;
                tracing::error!(
                    tx_hash = %tx_hash,
                    attempts = e.attempts(),
                    error = %e,
                    "Dropping event after failed delivery"
                );
            }
        }
    }

    fn transition(&mut self, to: RelayState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(
            ?from,
            ?to,
            connection = ?to.connection_state(),
            "Relay state change"
        );
        if let Some(observer) = &self.observer {
            // A dropped receiver only means nobody is watching anymore.
            let _ = observer.send(StateTransition { from, to });
        }
    }
}

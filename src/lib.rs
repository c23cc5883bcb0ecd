pub mod config;
pub mod connector;
pub mod decoder;
pub mod delivery;
pub mod error;
pub mod record;
pub mod relayer;
pub mod retry;
pub mod schema;
pub mod units;

pub use config::RelayerConfig;
pub use connector::{ChainConnector, ChainEndpoint, LogSubscription, RawLogEntry, RpcChainConnector};
pub use decoder::EventDecoder;
pub use delivery::{Ack, DeliveryClient, DeliverySettings};
pub use error::{
    ConfigError, ConnectionError, DecodeError, DeliveryError, RelayError, ValidationError,
};
pub use record::LockedTokensRecord;
pub use relayer::{RelaySettings, RelayState, Relayer};
pub use retry::{execute_with_retry, RetryConfig};
pub use schema::EventSchema;

pub mod config;
pub mod error;
pub mod handler;
pub mod history;
pub mod naming;
pub mod policy;
pub mod types;

pub use config::{BrokerConfig, RetryConfig};
pub use error::{HopperError, Result};
pub use handler::MessageHandler;
pub use history::{DeliveryRecord, DEATH_HEADER};
pub use policy::{decide, RetryDecision};
pub use types::{group_queues, PeekedMessage, QueueGroup, QueueStat};

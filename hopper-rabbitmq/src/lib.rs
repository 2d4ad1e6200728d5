pub mod consumer;
pub mod headers;
pub mod inspect;
pub mod management;
pub mod reprocess;
pub mod session;
pub mod topology;

pub use consumer::{consume, ConsumeReport};
pub use inspect::{peek, InspectedMessage};
pub use management::ManagementClient;
pub use reprocess::{ReprocessReport, Reprocessor};
pub use session::BrokerSession;
pub use topology::{TopologyBuilder, TopologyStyle};

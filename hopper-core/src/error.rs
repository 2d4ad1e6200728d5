use thiserror::Error;

#[derive(Debug, Error)]
pub enum HopperError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("management api error: {0}")]
    Management(String),

    #[error("topology conflict on {object}: {detail}")]
    TopologyConflict { object: String, detail: String },

    #[error("publish error: {0}")]
    Publish(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("handler error: {0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, HopperError>;
